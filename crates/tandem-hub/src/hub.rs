//! The hub composes the session registry, the room router, and the
//! collaborator services into one facade owning login, disconnect, and
//! every frame emission primitive.
//!
//! Delivery targeting: room broadcasts, filtered broadcasts, and per-user
//! sends reach **local** sessions only; peers are reached exclusively
//! through [`Hub::relay_to_peers`]. This keeps local detail events from
//! leaking to a peer whose login username happens to collide with a local
//! user.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use tandem_types::wire::{Frame, LoginData};

use crate::collab::{Authentication, Authorization, ClientPresence, IdentityGrants, UserDirectory};
use crate::registry::{Session, SessionRegistry};
use crate::rooms::{rooms_for, RoomId, RoomRouter};

/// Outbound queue depth per session. Bounded to prevent unbounded memory
/// growth from slow consumers; beyond this, frames are dropped with a
/// warning.
pub const SEND_QUEUE_DEPTH: usize = 256;

/// Origin tag the desktop application sends in its login frame.
pub const DESKTOP_ORIGIN: &str = "desktop";

const HUB_EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications emitted by the hub for interested components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A local client completed the login handshake.
    ClientLoggedIn { username: String },
    /// The last desktop-tagged session of a user closed.
    AllClientsDisconnected { username: String },
}

/// Login handshake failures. Every variant maps to a `401` frame followed
/// by a forced close.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("invalid credentials for {username}")]
    Unauthorized { username: String },
    #[error("no remote site bound to the token of {username}")]
    UnknownSite { username: String },
}

/// Central state shared by the websocket listeners, the event bridge, and
/// the federation relays.
pub struct Hub {
    registry: SessionRegistry,
    rooms: RoomRouter,
    auth: Arc<dyn Authentication>,
    authz: Arc<dyn Authorization>,
    users: Arc<dyn UserDirectory>,
    mask: String,
    ownership_aware: bool,
    events: broadcast::Sender<HubEvent>,
}

impl Hub {
    pub fn new(
        auth: Arc<dyn Authentication>,
        authz: Arc<dyn Authorization>,
        users: Arc<dyn UserDirectory>,
        mask: String,
        ownership_aware: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(HUB_EVENT_CAPACITY);
        Self {
            registry: SessionRegistry::new(),
            rooms: RoomRouter::new(),
            auth,
            authz,
            users,
            mask,
            ownership_aware,
            events,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomRouter {
        &self.rooms
    }

    pub fn auth(&self) -> &Arc<dyn Authentication> {
        &self.auth
    }

    pub fn authz(&self) -> &Arc<dyn Authorization> {
        &self.authz
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    /// Privacy mask token.
    pub fn mask(&self) -> &str {
        &self.mask
    }

    /// Whether extension broadcasts apply per-recipient ownership-aware
    /// redaction instead of the two-room split.
    pub fn ownership_aware(&self) -> bool {
        self.ownership_aware
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Authenticates a local client and registers its session.
    ///
    /// On success the connection joins the rooms derived from its grants
    /// snapshot and becomes eligible for per-event targeting.
    pub async fn login_local(
        &self,
        connection_id: Uuid,
        login: &LoginData,
        sender: mpsc::Sender<String>,
    ) -> Result<Session, LoginError> {
        let username = login.access_key_id.clone();
        if !self.auth.verify_token(&username, &login.token, false) {
            return Err(LoginError::Unauthorized { username });
        }

        let grants = IdentityGrants::load(self.authz.as_ref(), &username);
        let rooms = rooms_for(&grants);
        let session = Session {
            connection_id,
            username: username.clone(),
            token: login.token.clone(),
            site_name: None,
            origin_agent: login.origin_agent.clone(),
            sender,
        };
        self.registry.register(session.clone()).await;
        self.rooms.join(connection_id, &rooms).await;

        tracing::info!(
            username = %username,
            rooms = rooms.len(),
            origin = login.origin_agent.as_deref().unwrap_or("-"),
            "client authenticated"
        );
        let _ = self.events.send(HubEvent::ClientLoggedIn { username });
        Ok(session)
    }

    /// Authenticates an inbound remote peer and registers its session with
    /// the site name bound to its token. Peers join no rooms; they are
    /// addressed only through [`Hub::relay_to_peers`].
    pub async fn login_remote(
        &self,
        connection_id: Uuid,
        login: &LoginData,
        sender: mpsc::Sender<String>,
    ) -> Result<Session, LoginError> {
        let username = login.access_key_id.clone();
        if !self.auth.verify_token(&username, &login.token, true) {
            return Err(LoginError::Unauthorized { username });
        }
        let site_name = self
            .auth
            .remote_site_name(&username, &login.token)
            .ok_or(LoginError::UnknownSite {
                username: username.clone(),
            })?;

        let session = Session {
            connection_id,
            username: username.clone(),
            token: login.token.clone(),
            site_name: Some(site_name.clone()),
            origin_agent: login.origin_agent.clone(),
            sender,
        };
        self.registry.register(session.clone()).await;

        tracing::info!(username = %username, site = %site_name, "remote peer authenticated");
        Ok(session)
    }

    /// Removes a session and its room memberships. Safe to call for
    /// connections that never authenticated, and safe to call twice.
    ///
    /// Remote peer tokens are revoked so they cannot be replayed. For local
    /// desktop sessions, closing the last one reports the user's desktop
    /// presence as offline and emits
    /// [`HubEvent::AllClientsDisconnected`].
    pub async fn disconnect(&self, connection_id: Uuid) -> Option<Session> {
        let removed = self.registry.remove(connection_id).await?;
        self.rooms.leave_all(connection_id).await;

        match &removed.site_name {
            Some(site) => {
                let revoked = self.auth.remove_token(&removed.username, &removed.token);
                tracing::info!(
                    site = %site,
                    username = %removed.username,
                    revoked,
                    "remote peer disconnected"
                );
            }
            None => {
                if removed.origin_agent.as_deref() == Some(DESKTOP_ORIGIN) {
                    let remaining = self
                        .registry
                        .sessions_of(&removed.username)
                        .await
                        .iter()
                        .filter(|s| {
                            s.is_local() && s.origin_agent.as_deref() == Some(DESKTOP_ORIGIN)
                        })
                        .count();
                    if remaining == 0 {
                        self.users.set_client_presence(
                            &removed.username,
                            DESKTOP_ORIGIN,
                            ClientPresence::Offline,
                        );
                        let _ = self.events.send(HubEvent::AllClientsDisconnected {
                            username: removed.username.clone(),
                        });
                    }
                }
                tracing::info!(username = %removed.username, "client disconnected");
            }
        }
        Some(removed)
    }

    /// Emits a frame to every member of a room.
    ///
    /// The frame is serialized once; per-session delivery goes through the
    /// bounded sender, dropping on slow consumers rather than blocking the
    /// hub.
    pub async fn broadcast_to_room(&self, room: RoomId, event: &str, payload: Value) {
        let members = self.rooms.members(room).await;
        if members.is_empty() {
            return;
        }
        let Some(text) = encode_frame(event, payload) else {
            return;
        };
        for session in self
            .registry
            .snapshot()
            .await
            .iter()
            .filter(|s| members.contains(&s.connection_id))
        {
            deliver(session, event, text.clone());
        }
    }

    /// Emits a shared payload to every local session whose username passes
    /// the predicate. The predicate is evaluated now, not at login time.
    pub async fn broadcast_filtered<A>(&self, event: &str, payload: Value, authorize: A)
    where
        A: Fn(&Session) -> bool,
    {
        let Some(text) = encode_frame(event, payload) else {
            return;
        };
        for session in self.registry.snapshot().await.iter().filter(|s| s.is_local()) {
            if authorize(session) {
                deliver(session, event, text.clone());
            }
        }
    }

    /// Per-recipient variant of [`Hub::broadcast_filtered`]: each authorized
    /// session receives the payload the closure builds for it; `None` skips
    /// the session.
    pub async fn broadcast_per_recipient<A, P>(&self, event: &str, authorize: A, payload_for: P)
    where
        A: Fn(&Session) -> bool,
        P: Fn(&Session) -> Option<Value>,
    {
        for session in self.registry.snapshot().await.iter().filter(|s| s.is_local()) {
            if !authorize(session) {
                continue;
            }
            let Some(payload) = payload_for(session) else {
                continue;
            };
            let Some(text) = encode_frame(event, payload) else {
                continue;
            };
            deliver(session, event, text);
        }
    }

    /// Emits a frame to every local session of a username.
    pub async fn send_to_user(&self, username: &str, event: &str, payload: Value) {
        let Some(text) = encode_frame(event, payload) else {
            return;
        };
        for session in self
            .registry
            .sessions_of(username)
            .await
            .iter()
            .filter(|s| s.is_local())
        {
            deliver(session, event, text.clone());
        }
    }

    /// Emits a frame to every authenticated peer session whose login
    /// username passes the authorization check. The check runs at emission
    /// time — a peer whose authorization was withdrawn after login receives
    /// nothing.
    pub async fn relay_to_peers<A>(&self, event: &str, payload: Value, authorize: A)
    where
        A: Fn(&Session) -> bool,
    {
        let Some(text) = encode_frame(event, payload) else {
            return;
        };
        for session in self
            .registry
            .snapshot()
            .await
            .iter()
            .filter(|s| s.site_name.is_some())
        {
            if authorize(session) {
                deliver(session, event, text.clone());
            }
        }
    }
}

fn encode_frame(event: &str, payload: Value) -> Option<String> {
    match Frame::new(event, payload).encode() {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(event, "failed to serialize frame: {}", e);
            None
        }
    }
}

fn deliver(session: &Session, event: &str, text: String) {
    if let Err(e) = session.sender.try_send(text) {
        tracing::warn!(
            username = %session.username,
            event,
            "dropping frame for slow consumer: {}",
            e
        );
    }
}
