//! Typed interfaces for the external collaborator services.
//!
//! The hub never interprets token contents, permission storage, or user
//! configuration itself; it consults these traits. Implementations are
//! injected by the composition root as `Arc<dyn …>`, which also lets tests
//! swap in fixtures.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the authentication collaborator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown token for user {username}")]
    UnknownToken { username: String },
    #[error("authentication backend error: {0}")]
    Backend(String),
}

/// Token verification and lifecycle, shared by local logins and federation.
pub trait Authentication: Send + Sync {
    /// Checks a token. `remote` selects the remote-site verification mode
    /// used for inbound peer logins; local client logins pass `false`.
    fn verify_token(&self, username: &str, token: &str, remote: bool) -> bool;

    /// Derives the login token from credentials and the digest nonce
    /// obtained from a peer's remote-login challenge.
    fn calculate_token(&self, username: &str, password: &str, nonce: &str) -> String;

    /// Resolves the site name bound to an authenticated remote-site token.
    fn remote_site_name(&self, username: &str, token: &str) -> Option<String>;

    /// Extends the expiry of an active token. Called periodically by the
    /// token lifecycle keeper for every registered session.
    fn update_token_expires(&self, username: &str, token: &str) -> Result<(), AuthError>;

    /// Revokes a token; returns whether it existed. Invoked when a remote
    /// peer disconnects so its token cannot be replayed.
    fn remove_token(&self, username: &str, token: &str) -> bool;

    /// Configured token lifetime; the keeper sweeps at half this interval.
    fn token_expiration_timeout(&self) -> Duration;
}

/// Per-capability authorization predicates.
///
/// All predicates are consulted live at emission time where the contract
/// demands it (peer relays, counter broadcasts); room membership snapshots
/// them once at login.
pub trait Authorization: Send + Sync {
    /// Operator panel: extensions category.
    fn extensions_allowed(&self, username: &str) -> bool;
    /// Operator panel: queues category.
    fn queues_allowed(&self, username: &str) -> bool;
    /// Queue supervision; also bypasses privacy for queue-routed calls.
    fn admin_queues_allowed(&self, username: &str) -> bool;
    /// Operator panel: trunks category.
    fn trunks_allowed(&self, username: &str) -> bool;
    /// Operator panel: parkings category.
    fn parkings_allowed(&self, username: &str) -> bool;
    /// Whether counterpart data must be masked for this user.
    fn privacy_enabled(&self, username: &str) -> bool;
    /// May read caller notes they created plus public ones.
    fn postit_allowed(&self, username: &str) -> bool;
    /// May read every caller note.
    fn admin_postit_allowed(&self, username: &str) -> bool;
    /// May see phonebook matches on ringing calls.
    fn phonebook_allowed(&self, username: &str) -> bool;
    /// May see remote-site data and status.
    fn remote_site_allowed(&self, username: &str) -> bool;
    /// Ownership check: is `exten` one of the user's endpoint extensions.
    fn user_owns_extension(&self, username: &str, exten: &str) -> bool;
}

/// Client presence values reported to the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPresence {
    Online,
    Offline,
}

/// User/endpoint associations.
pub trait UserDirectory: Send + Sync {
    /// Usernames owning an endpoint extension.
    fn users_by_extension(&self, exten: &str) -> Vec<String>;
    /// Usernames associated with a voicemail mailbox.
    fn users_by_voicemail(&self, mailbox: &str) -> Vec<String>;
    /// All endpoint extensions of a user.
    fn endpoint_extensions(&self, username: &str) -> Vec<String>;
    /// Records the presence of a user's client device. The hub reports
    /// `Offline` for the desktop device when a user's last desktop-tagged
    /// session closes.
    fn set_client_presence(&self, username: &str, device: &str, presence: ClientPresence);
}

/// Authorization flags snapshotted at login time.
///
/// Room membership derives from this snapshot and is not re-evaluated
/// mid-session; predicates that must stay live are consulted through
/// [`Authorization`] directly instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityGrants {
    pub extensions: bool,
    pub queues: bool,
    pub admin_queues: bool,
    pub trunks: bool,
    pub parkings: bool,
    pub privacy_enabled: bool,
}

impl IdentityGrants {
    /// Snapshots the room-relevant flags for a username.
    pub fn load(authz: &dyn Authorization, username: &str) -> Self {
        Self {
            extensions: authz.extensions_allowed(username),
            queues: authz.queues_allowed(username),
            admin_queues: authz.admin_queues_allowed(username),
            trunks: authz.trunks_allowed(username),
            parkings: authz.parkings_allowed(username),
            privacy_enabled: authz.privacy_enabled(username),
        }
    }
}
