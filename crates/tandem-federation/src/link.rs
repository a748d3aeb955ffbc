//! Outbound link to one configured remote site.
//!
//! Each site gets its own [`SiteLink`] task that walks the handshake
//! ladder (connect, nonce, login, ack), snapshots the peer's state, then
//! consumes relay frames until the socket drops. On any failure the link
//! purges everything it cached and retries after a jittered delay, so a
//! reconnect always starts from a fresh snapshot.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::watch;

use tandem_hub::hub::Hub;
use tandem_hub::redact::{masking_for, redact_conversations};
use tandem_types::events::EndpointPresence;
use tandem_types::wire::{evt, Frame, LoginData, RemoteRelay};
use tandem_types::RemoteSite;

use crate::backoff::BackoffPolicy;
use crate::rest::{PeerCredentials, PeerRestApi, RestError};
use crate::sites::{RemoteSites, SiteSnapshots};
use crate::transport::{ConnectError, PeerConnector, PeerLink};

/// Where the link currently sits in its connection ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    AwaitingNonce,
    AwaitingLogin,
    Authenticated,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Rest(#[from] RestError),
    #[error("login frame serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("peer closed the socket during the handshake")]
    ClosedDuringHandshake,
    #[error("peer refused the login: {0}")]
    LoginRefused(String),
    #[error("no login ack within the handshake timeout")]
    HandshakeTimeout,
}

pub struct SiteLink {
    site_name: String,
    site: RemoteSite,
    hub: Arc<Hub>,
    sites: Arc<RemoteSites>,
    connector: Arc<dyn PeerConnector>,
    rest: Arc<dyn PeerRestApi>,
    backoff: BackoffPolicy,
    state: watch::Sender<LinkState>,
}

impl SiteLink {
    pub fn new(
        site_name: impl Into<String>,
        site: RemoteSite,
        hub: Arc<Hub>,
        sites: Arc<RemoteSites>,
        connector: Arc<dyn PeerConnector>,
        rest: Arc<dyn PeerRestApi>,
        backoff: BackoffPolicy,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            site_name: site_name.into(),
            site,
            hub,
            sites,
            connector,
            rest,
            backoff,
            state,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: LinkState) {
        self.state.send_replace(next);
    }

    /// Drives the link forever: one connection attempt, teardown, then a
    /// jittered pause before the next. The attempt counter resets only
    /// after an authenticated session.
    pub async fn run(self: Arc<Self>) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            tracing::info!(site = %self.site_name, attempt, "connecting to peer site");
            if self.connect_once().await {
                attempt = 0;
            }
            self.teardown().await;
            let delay = self.backoff.delay();
            tracing::info!(
                site = %self.site_name,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One full connection attempt. Returns whether the link reached the
    /// authenticated state before the socket dropped.
    async fn connect_once(&self) -> bool {
        match self.establish().await {
            Err(err) => {
                tracing::warn!(site = %self.site_name, "peer link failed: {err}");
                false
            }
            Ok((link, creds)) => {
                self.on_authenticated(&creds).await;
                let PeerLink {
                    outbound,
                    mut inbound,
                } = link;
                // Keeping the sender alive keeps the outbound pump, and
                // with it the socket, open while we consume.
                let _outbound = outbound;
                while let Some(frame) = inbound.recv().await {
                    self.handle_relay(frame).await;
                }
                tracing::warn!(site = %self.site_name, "peer link closed");
                true
            }
        }
    }

    /// Walks the handshake up to the login ack and hands back the live
    /// link together with the credentials the peer now accepts.
    async fn establish(&self) -> Result<(PeerLink, PeerCredentials), LinkError> {
        self.set_state(LinkState::Connecting);
        let mut link = self
            .connector
            .connect(&self.site, self.backoff.connect_timeout)
            .await?;

        self.set_state(LinkState::AwaitingNonce);
        let nonce = self.rest.remote_login(&self.site).await?;
        let token = self
            .hub
            .auth()
            .calculate_token(&self.site.username, &self.site.password, &nonce);
        let creds = PeerCredentials {
            username: self.site.username.clone(),
            token,
        };

        self.set_state(LinkState::AwaitingLogin);
        let login = LoginData {
            access_key_id: creds.username.clone(),
            token: creds.token.clone(),
            origin_agent: None,
        };
        let frame = Frame::new(evt::LOGIN, serde_json::to_value(&login)?);
        if link.outbound.send(frame).await.is_err() {
            return Err(LinkError::ClosedDuringHandshake);
        }

        let ack = tokio::time::timeout(self.backoff.connect_timeout, async {
            loop {
                match link.inbound.recv().await {
                    None => return Err(LinkError::ClosedDuringHandshake),
                    Some(frame) => match frame.event.as_str() {
                        evt::AUTHE_OK => return Ok(()),
                        evt::UNAUTHORIZED => {
                            return Err(LinkError::LoginRefused(frame.data.to_string()))
                        }
                        other => {
                            tracing::debug!(
                                site = %self.site_name,
                                event = other,
                                "frame before the login ack"
                            );
                        }
                    },
                }
            }
        })
        .await;
        match ack {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(LinkError::HandshakeTimeout),
        }

        tracing::info!(site = %self.site_name, "authenticated to peer site");
        Ok((link, creds))
    }

    /// Marks the site connected, pulls the four snapshots, and tells the
    /// authorized local clients the site is up.
    async fn on_authenticated(&self, creds: &PeerCredentials) {
        self.sites
            .mark_connected(&self.site_name, creds.clone())
            .await;
        self.refresh_snapshots(creds).await;
        self.notify_site_status().await;
        self.set_state(LinkState::Authenticated);
    }

    async fn refresh_snapshots(&self, creds: &PeerCredentials) {
        let (op_extensions, op_groups, usernames, user_endpoints) = tokio::join!(
            self.rest.op_extensions(&self.site, creds),
            self.rest.op_groups(&self.site, creds),
            self.rest.usernames(&self.site, creds),
            self.rest.user_endpoints(&self.site, creds),
        );
        tracing::info!(
            site = %self.site_name,
            extensions = op_extensions.len(),
            users = usernames.len(),
            "peer snapshots refreshed"
        );
        self.sites
            .store_snapshots(
                &self.site_name,
                SiteSnapshots {
                    op_extensions,
                    op_groups,
                    usernames,
                    user_endpoints,
                },
            )
            .await;
    }

    /// Drops everything cached for the site and notifies the status flip.
    async fn teardown(&self) {
        self.set_state(LinkState::Disconnected);
        self.sites.purge(&self.site_name).await;
        self.notify_site_status().await;
    }

    async fn notify_site_status(&self) {
        let Some(status) = self.sites.site_status(&self.site_name).await else {
            return;
        };
        let mut data = Map::new();
        data.insert(
            self.site_name.clone(),
            json!({ "connected": status.connected }),
        );
        let authz = self.hub.authz();
        self.hub
            .broadcast_filtered(evt::REMOTE_SITE_UPDATE, Value::Object(data), |s| {
                authz.remote_site_allowed(&s.username)
            })
            .await;
    }

    /// One frame from the authenticated peer.
    async fn handle_relay(&self, frame: Frame) {
        match frame.event.as_str() {
            evt::REMOTE_EXTEN_UPDATE => self.relay_exten_update(frame.data).await,
            evt::REMOTE_ENDPOINT_PRESENCE_UPDATE => self.relay_presence(frame.data).await,
            other => {
                tracing::debug!(site = %self.site_name, event = other, "ignoring peer event");
            }
        }
    }

    /// A peer extension changed: patch the cached snapshot entry and
    /// rebroadcast to authorized local clients with per-viewer masking.
    /// Updates for extensions outside the snapshot are dropped whole.
    async fn relay_exten_update(&self, data: Value) {
        let Some(exten) = data.get("exten").and_then(Value::as_str).map(str::to_string) else {
            tracing::warn!(site = %self.site_name, "malformed peer extension update: {data}");
            return;
        };
        if !self
            .sites
            .patch_op_extension(&self.site_name, &exten, data.clone())
            .await
        {
            tracing::debug!(
                site = %self.site_name,
                exten = %exten,
                "dropping update for an extension outside the snapshot"
            );
            return;
        }
        let authz = self.hub.authz();
        let mask = self.hub.mask();
        self.hub
            .broadcast_per_recipient(
                evt::REMOTE_EXTEN_UPDATE,
                |s| authz.remote_site_allowed(&s.username) && authz.extensions_allowed(&s.username),
                |s| {
                    let masking = masking_for(
                        mask,
                        authz.privacy_enabled(&s.username),
                        false,
                        authz.user_owns_extension(&s.username, &exten),
                    );
                    Some(RemoteRelay::wrap(
                        &self.site_name,
                        redact_conversations(&data, masking),
                    ))
                },
            )
            .await;
    }

    /// A peer endpoint presence changed: patch the cached endpoint and
    /// rebroadcast to clients allowed to see remote sites.
    async fn relay_presence(&self, data: Value) {
        let presence: EndpointPresence = match serde_json::from_value(data.clone()) {
            Ok(presence) => presence,
            Err(err) => {
                tracing::warn!(
                    site = %self.site_name,
                    "malformed peer presence update: {data} ({err})"
                );
                return;
            }
        };
        if !self
            .sites
            .patch_endpoint_presence(
                &self.site_name,
                &presence.username,
                &presence.endpoint_type,
                &presence.status,
            )
            .await
        {
            tracing::debug!(
                site = %self.site_name,
                username = %presence.username,
                "dropping presence for an endpoint outside the snapshot"
            );
            return;
        }
        let authz = self.hub.authz();
        self.hub
            .broadcast_filtered(
                evt::REMOTE_ENDPOINT_PRESENCE_UPDATE,
                RemoteRelay::wrap(&self.site_name, data),
                |s| authz.remote_site_allowed(&s.username),
            )
            .await;
    }
}
