//! Server configuration loading from file and environment variables.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Deserialize;
use thiserror::Error;

use tandem_types::RemoteSite;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Broadcast / privacy settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Token lifecycle settings.
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Reconnect policy for peer-site links.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Configured peer sites, keyed by site name.
    #[serde(default)]
    pub sites: HashMap<String, RemoteSite>,

    /// Provisioned accounts, keyed by username.
    #[serde(default)]
    pub users: HashMap<String, UserConfig>,
}

/// Network configuration. The hub serves every listed address; the original
/// deployment exposed the same engine on an http and an https port.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: Vec<SocketAddr>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "tandem_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Broadcast / privacy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Token substituted for redacted digits and names.
    #[serde(default = "default_mask")]
    pub mask: String,

    /// Per-recipient ownership-aware redaction for extension updates
    /// instead of the two-room split.
    #[serde(default)]
    pub ownership_aware: bool,
}

/// Token lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_expiration_secs")]
    pub expiration_secs: u64,
}

/// Peer-link reconnect configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_secs")]
    pub base_secs: u64,

    #[serde(default = "default_backoff_jitter_secs")]
    pub jitter_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// One provisioned account. An entry with `site` set is a federation
/// account: peers log in with it and their sessions are bound to that
/// site name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserConfig {
    pub password: String,

    /// Site name for federation accounts; absent for human users.
    #[serde(default)]
    pub site: Option<String>,

    /// Capability grants, e.g. "extensions", "queues", "admin_queues",
    /// "trunks", "parkings", "privacy", "postit", "admin_postit",
    /// "phonebook", "remote_site".
    #[serde(default)]
    pub grants: Vec<String>,

    /// Extensions the user owns.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Voicemail boxes the user owns.
    #[serde(default)]
    pub voicemails: Vec<String>,
}

fn default_listen() -> Vec<SocketAddr> {
    vec![SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        8283,
    )]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mask() -> String {
    "xxx".to_string()
}

fn default_token_expiration_secs() -> u64 {
    3600
}

fn default_backoff_base_secs() -> u64 {
    60
}

fn default_backoff_jitter_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            mask: default_mask(),
            ownership_aware: false,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_token_expiration_secs(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: default_backoff_base_secs(),
            jitter_secs: default_backoff_jitter_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> tandem_federation::BackoffPolicy {
        tandem_federation::BackoffPolicy {
            base: std::time::Duration::from_secs(self.base_secs),
            jitter: std::time::Duration::from_secs(self.jitter_secs),
            connect_timeout: std::time::Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TANDEM_LISTEN` overrides `server.listen` (comma-separated addresses)
/// - `TANDEM_LOG_LEVEL` overrides `logging.level`
/// - `TANDEM_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TANDEM_MASK` overrides `broadcast.mask`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(listen) = std::env::var("TANDEM_LISTEN") {
        let parsed: Vec<SocketAddr> = listen
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect();
        if !parsed.is_empty() {
            config.server.listen = parsed;
        }
    }
    if let Ok(level) = std::env::var("TANDEM_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TANDEM_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(mask) = std::env::var("TANDEM_MASK") {
        if !mask.is_empty() {
            config.broadcast.mask = mask;
        }
    }

    Ok(config)
}
