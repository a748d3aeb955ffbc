//! Session bookkeeping for authenticated connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// An authenticated connection.
///
/// `site_name` distinguishes the two connection kinds: `None` is a local
/// client, `Some` an inbound remote peer. The sender is the bounded outbound
/// frame queue owned by the connection's writer task; whichever transport
/// listener accepted the socket, delivery goes through this sink, so any
/// number of listeners share one hub.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: Uuid,
    pub username: String,
    pub token: String,
    pub site_name: Option<String>,
    /// Client identification from the login frame, e.g. the desktop app tag.
    pub origin_agent: Option<String>,
    pub sender: mpsc::Sender<String>,
}

impl Session {
    /// True for sessions representing local clients rather than peers.
    pub fn is_local(&self) -> bool {
        self.site_name.is_none()
    }
}

/// In-memory table of active sessions, keyed by connection id.
///
/// Owned by the composition root and passed by handle to every component
/// that needs it; tests build isolated instances. Lookups never fail on
/// missing entries — disconnect races are expected and return `None`.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, overwriting any prior entry for the same
    /// connection id.
    pub async fn register(&self, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session.connection_id, session);
    }

    /// Removes a session. No-op (returning `None`) if the connection was
    /// never registered or was already removed — duplicate disconnects must
    /// not raise.
    pub async fn remove(&self, connection_id: Uuid) -> Option<Session> {
        self.sessions.write().await.remove(&connection_id)
    }

    pub async fn get(&self, connection_id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&connection_id).cloned()
    }

    /// Looks a session up by its credential pair; used to answer "is this a
    /// known, already-authenticated peer" queries.
    pub async fn find_by_username_and_token(
        &self,
        username: &str,
        token: &str,
    ) -> Option<Session> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.username == username && s.token == token)
            .cloned()
    }

    /// Site name bound to a credential pair, if any.
    pub async fn site_name_of(&self, username: &str, token: &str) -> Option<String> {
        self.find_by_username_and_token(username, token)
            .await
            .and_then(|s| s.site_name)
    }

    pub async fn count_active(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stable copy of the current sessions. Iterating the copy tolerates
    /// concurrent registration/removal; the token keeper and the broadcast
    /// helpers rely on this.
    pub async fn snapshot(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// All sessions of a username, local and remote alike.
    pub async fn sessions_of(&self, username: &str) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.username == username)
            .cloned()
            .collect()
    }
}
