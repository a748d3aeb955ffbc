//! REST surface of a peer site: the nonce handshake, the four snapshot
//! fetches, and inter-site post-it creation.
//!
//! The trait is injected into the link state machine so transitions are
//! testable without a network; [`ReqwestPeerApi`] is the production
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde_json::{Map, Value};
use thiserror::Error;

use tandem_types::RemoteSite;

/// Marker header telling the peer the request originates from a federated
/// site rather than a browser client.
pub const REMOTE_MARKER_HEADER: &str = "x-remote-site";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials attached to authenticated peer REST calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCredentials {
    pub username: String,
    pub token: String,
}

impl PeerCredentials {
    /// Value of the `Authorization` header the peer expects.
    pub fn header_value(&self) -> String {
        format!("{}:{}", self.username, self.token)
    }
}

#[derive(Debug, Error)]
pub enum RestError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },
    #[error("login challenge carried no digest nonce")]
    MissingNonce,
}

/// REST client for one peer site.
#[async_trait]
pub trait PeerRestApi: Send + Sync {
    /// POSTs the remote-login endpoint; the peer answers `401` with a
    /// digest challenge whose nonce seeds the token derivation.
    async fn remote_login(&self, site: &RemoteSite) -> Result<String, RestError>;

    /// Snapshot fetches. Failures are logged by the implementation and
    /// yield an empty map so sibling fetches are unaffected.
    async fn op_extensions(
        &self,
        site: &RemoteSite,
        creds: &PeerCredentials,
    ) -> Map<String, Value>;
    async fn op_groups(&self, site: &RemoteSite, creds: &PeerCredentials) -> Map<String, Value>;
    async fn usernames(&self, site: &RemoteSite, creds: &PeerCredentials) -> Map<String, Value>;
    async fn user_endpoints(
        &self,
        site: &RemoteSite,
        creds: &PeerCredentials,
    ) -> Map<String, Value>;

    /// Creates a post-it on the peer on behalf of a local user.
    async fn create_postit(
        &self,
        site: &RemoteSite,
        creds: &PeerCredentials,
        creator: &str,
        recipient: &str,
        text: &str,
    ) -> Result<(), RestError>;
}

/// Production implementation over a shared `reqwest` client.
pub struct ReqwestPeerApi {
    client: reqwest::Client,
}

impl ReqwestPeerApi {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch_map(
        &self,
        site: &RemoteSite,
        creds: &PeerCredentials,
        path: &str,
        what: &str,
    ) -> Map<String, Value> {
        let url = format!("{}{}", site.rest_base(), path);
        let response = self
            .client
            .get(&url)
            .header(REMOTE_MARKER_HEADER, "true")
            .header(header::AUTHORIZATION, creds.header_value())
            .send()
            .await;
        let body = match response {
            Ok(res) if res.status().is_success() => match res.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(url = %url, what, "snapshot body unreadable: {}", e);
                    return Map::new();
                }
            },
            Ok(res) => {
                tracing::warn!(url = %url, what, status = %res.status(), "snapshot fetch refused");
                return Map::new();
            }
            Err(e) => {
                tracing::error!(url = %url, what, "snapshot fetch failed: {}", e);
                return Map::new();
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&body) {
            Ok(map) => map,
            Err(e) => {
                tracing::error!(url = %url, what, body = %body, "bad snapshot payload: {}", e);
                Map::new()
            }
        }
    }
}

impl Default for ReqwestPeerApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerRestApi for ReqwestPeerApi {
    async fn remote_login(&self, site: &RemoteSite) -> Result<String, RestError> {
        let url = format!("{}/webrest/authentication/remotelogin", site.rest_base());
        let response = self
            .client
            .post(&url)
            .header(REMOTE_MARKER_HEADER, "true")
            .form(&[
                ("username", site.username.as_str()),
                ("password", site.password.as_str()),
            ])
            .send()
            .await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Err(RestError::UnexpectedStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or(RestError::MissingNonce)?;
        parse_digest_nonce(challenge).ok_or(RestError::MissingNonce)
    }

    async fn op_extensions(
        &self,
        site: &RemoteSite,
        creds: &PeerCredentials,
    ) -> Map<String, Value> {
        self.fetch_map(site, creds, "/webrest/astproxy/extensions", "extensions")
            .await
    }

    async fn op_groups(&self, site: &RemoteSite, creds: &PeerCredentials) -> Map<String, Value> {
        self.fetch_map(site, creds, "/webrest/astproxy/opgroups", "operator groups")
            .await
    }

    async fn usernames(&self, site: &RemoteSite, creds: &PeerCredentials) -> Map<String, Value> {
        self.fetch_map(site, creds, "/webrest/configmanager/usernames", "usernames")
            .await
    }

    async fn user_endpoints(
        &self,
        site: &RemoteSite,
        creds: &PeerCredentials,
    ) -> Map<String, Value> {
        self.fetch_map(
            site,
            creds,
            "/webrest/configmanager/alluserendpoints",
            "user endpoints",
        )
        .await
    }

    async fn create_postit(
        &self,
        site: &RemoteSite,
        creds: &PeerCredentials,
        creator: &str,
        recipient: &str,
        text: &str,
    ) -> Result<(), RestError> {
        let url = format!("{}/webrest/postit/create", site.rest_base());
        let response = self
            .client
            .post(&url)
            .header(REMOTE_MARKER_HEADER, "true")
            .header(header::AUTHORIZATION, creds.header_value())
            .form(&[
                ("creator", creator),
                ("recipient", recipient),
                ("text", text),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RestError::UnexpectedStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(())
    }
}

/// Extracts the nonce from a `Digest <nonce>` challenge header.
fn parse_digest_nonce(header: &str) -> Option<String> {
    let rest = header.strip_prefix("Digest")?.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
