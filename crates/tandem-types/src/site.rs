//! Remote-site configuration entities.

use serde::{Deserialize, Serialize};

/// A configured peer server instance.
///
/// Loaded once from configuration and immutable at runtime; the mutable
/// connection state lives with the federation link, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSite {
    pub hostname: String,
    pub port: u16,
    /// Credential used to log in to the peer.
    pub username: String,
    pub password: String,
    /// Dial prefix for calls routed toward this site.
    #[serde(default)]
    pub prefix: String,
    /// When false the link uses plaintext ws/http, for lab setups only.
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_secure() -> bool {
    true
}

impl RemoteSite {
    /// Websocket URL of the peer's hub endpoint, tagged as a remote
    /// connection.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{}://{}:{}/ws?type=remote",
            scheme, self.hostname, self.port
        )
    }

    /// Base URL of the peer's REST surface.
    pub fn rest_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.hostname, self.port)
    }
}

/// Connection state of a site as exposed to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStatus {
    pub connected: bool,
}
