//! Shared view over every configured peer site: static configuration,
//! connection status, link credentials, and the four snapshot caches.
//!
//! Links mutate this state as they authenticate and drop; REST handlers
//! and the astproxy integration read it. All maps sit behind one lock with
//! short critical sections and no I/O while held.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use tandem_hub::redact::redact_conversations;
use tandem_hub::registry::SessionRegistry;
use tandem_types::{Masking, RemoteSite, SiteStatus};

use crate::rest::{PeerCredentials, PeerRestApi, RestError};

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("nonexistent remote site \"{0}\"")]
    Unknown(String),
    #[error("remote site \"{0}\" is not connected")]
    NotConnected(String),
    #[error(transparent)]
    Rest(#[from] RestError),
}

/// The four snapshots fetched from a peer right after authentication.
#[derive(Debug, Clone, Default)]
pub struct SiteSnapshots {
    pub op_extensions: Map<String, Value>,
    pub op_groups: Map<String, Value>,
    pub usernames: Map<String, Value>,
    pub user_endpoints: Map<String, Value>,
}

#[derive(Default)]
struct SiteCaches {
    connected: HashMap<String, bool>,
    credentials: HashMap<String, PeerCredentials>,
    op_extensions: HashMap<String, Map<String, Value>>,
    op_groups: HashMap<String, Map<String, Value>>,
    usernames: HashMap<String, Map<String, Value>>,
    user_endpoints: HashMap<String, Map<String, Value>>,
}

pub struct RemoteSites {
    sites: HashMap<String, RemoteSite>,
    caches: RwLock<SiteCaches>,
}

impl RemoteSites {
    pub fn new(sites: HashMap<String, RemoteSite>) -> Self {
        Self {
            sites,
            caches: RwLock::new(SiteCaches::default()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn site(&self, name: &str) -> Option<&RemoteSite> {
        self.sites.get(name)
    }

    pub fn site_names(&self) -> Vec<String> {
        self.sites.keys().cloned().collect()
    }

    pub fn remote_site_exists(&self, name: &str) -> bool {
        self.sites.contains_key(name)
    }

    /// Dial prefix toward one site, `None` when unconfigured.
    pub fn site_prefix(&self, name: &str) -> Option<String> {
        self.sites.get(name).map(|s| s.prefix.clone())
    }

    pub fn all_site_prefixes(&self) -> HashMap<String, String> {
        self.sites
            .iter()
            .map(|(name, site)| (name.clone(), site.prefix.clone()))
            .collect()
    }

    /// Status of every configured site; never-connected sites report
    /// `connected: false`.
    pub async fn all_sites_status(&self) -> HashMap<String, SiteStatus> {
        let caches = self.caches.read().await;
        self.sites
            .keys()
            .map(|name| {
                let connected = caches.connected.get(name).copied().unwrap_or(false);
                (name.clone(), SiteStatus { connected })
            })
            .collect()
    }

    pub async fn site_status(&self, name: &str) -> Option<SiteStatus> {
        if !self.sites.contains_key(name) {
            return None;
        }
        let caches = self.caches.read().await;
        let connected = caches.connected.get(name).copied().unwrap_or(false);
        Some(SiteStatus { connected })
    }

    pub async fn credentials(&self, name: &str) -> Option<PeerCredentials> {
        self.caches.read().await.credentials.get(name).cloned()
    }

    pub(crate) async fn mark_connected(&self, name: &str, creds: PeerCredentials) {
        let mut caches = self.caches.write().await;
        caches.connected.insert(name.to_string(), true);
        caches.credentials.insert(name.to_string(), creds);
    }

    pub(crate) async fn store_snapshots(&self, name: &str, snapshots: SiteSnapshots) {
        let mut caches = self.caches.write().await;
        caches
            .op_extensions
            .insert(name.to_string(), snapshots.op_extensions);
        caches
            .op_groups
            .insert(name.to_string(), snapshots.op_groups);
        caches
            .usernames
            .insert(name.to_string(), snapshots.usernames);
        caches
            .user_endpoints
            .insert(name.to_string(), snapshots.user_endpoints);
    }

    /// Drops everything known about a site's live link. The snapshots are
    /// purged rather than kept stale; the next authentication refetches
    /// them.
    pub(crate) async fn purge(&self, name: &str) {
        let mut caches = self.caches.write().await;
        caches.connected.insert(name.to_string(), false);
        caches.credentials.remove(name);
        caches.op_extensions.remove(name);
        caches.op_groups.remove(name);
        caches.usernames.remove(name);
        caches.user_endpoints.remove(name);
    }

    /// Operator extensions of every connected site. With a mask token the
    /// embedded conversations of every extension are redacted for
    /// privacy-restricted viewers.
    pub async fn op_extensions(&self, mask: Option<&str>) -> HashMap<String, Map<String, Value>> {
        let caches = self.caches.read().await;
        match mask {
            None => caches.op_extensions.clone(),
            Some(mask) => caches
                .op_extensions
                .iter()
                .map(|(site, extens)| {
                    let masked = extens
                        .iter()
                        .map(|(exten, value)| {
                            (
                                exten.clone(),
                                redact_conversations(value, Masking::Full(mask)),
                            )
                        })
                        .collect();
                    (site.clone(), masked)
                })
                .collect(),
        }
    }

    pub async fn op_groups(&self) -> HashMap<String, Map<String, Value>> {
        self.caches.read().await.op_groups.clone()
    }

    pub async fn usernames(&self) -> HashMap<String, Map<String, Value>> {
        self.caches.read().await.usernames.clone()
    }

    pub async fn user_endpoints(&self) -> HashMap<String, Map<String, Value>> {
        self.caches.read().await.user_endpoints.clone()
    }

    /// Replaces a cached extension entry, only if the snapshot already
    /// knows the extension. Returns whether the patch applied.
    pub(crate) async fn patch_op_extension(
        &self,
        site: &str,
        exten: &str,
        value: Value,
    ) -> bool {
        let mut caches = self.caches.write().await;
        match caches
            .op_extensions
            .get_mut(site)
            .and_then(|extens| extens.get_mut(exten))
        {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Updates the presence of one cached endpoint. All three levels
    /// (site, user, endpoint type) must already exist in the snapshot.
    pub(crate) async fn patch_endpoint_presence(
        &self,
        site: &str,
        username: &str,
        endpoint_type: &str,
        status: &str,
    ) -> bool {
        let mut caches = self.caches.write().await;
        let endpoint = caches
            .user_endpoints
            .get_mut(site)
            .and_then(|users| users.get_mut(username))
            .and_then(|entry| entry.get_mut(endpoint_type))
            .and_then(Value::as_object_mut);
        match endpoint {
            Some(endpoint) => {
                endpoint.insert("status".to_string(), Value::String(status.to_string()));
                true
            }
            None => false,
        }
    }

    /// Creates a post-it on a peer on behalf of a local user. Fails
    /// immediately for unconfigured or unauthenticated sites.
    pub async fn new_remote_postit(
        &self,
        api: &dyn PeerRestApi,
        creator: &str,
        site_name: &str,
        recipient: &str,
        text: &str,
    ) -> Result<(), SiteError> {
        let site = self
            .sites
            .get(site_name)
            .ok_or_else(|| SiteError::Unknown(site_name.to_string()))?;
        let creds = self
            .credentials(site_name)
            .await
            .ok_or_else(|| SiteError::NotConnected(site_name.to_string()))?;
        api.create_postit(site, &creds, creator, recipient, text)
            .await?;
        tracing::info!(site = site_name, recipient, "created post-it on peer site");
        Ok(())
    }
}

/// Whether a connection id belongs to an authenticated peer site rather
/// than a local client.
pub async fn is_client_remote(registry: &SessionRegistry, connection_id: Uuid) -> bool {
    registry
        .get(connection_id)
        .await
        .is_some_and(|s| s.site_name.is_some())
}
