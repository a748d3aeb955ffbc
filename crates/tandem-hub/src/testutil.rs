//! In-memory collaborator doubles shared by the unit tests of this crate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_types::wire::{Frame, LoginData};

use crate::collab::{
    AuthError, Authentication, Authorization, ClientPresence, UserDirectory,
};
use crate::hub::{Hub, SEND_QUEUE_DEPTH};

/// Token store backed by plain maps. Local tokens follow the `tok-<user>`
/// convention used by [`login`].
#[derive(Default)]
pub struct StaticAuth {
    pub local: Mutex<HashSet<(String, String)>>,
    pub remote: Mutex<HashMap<(String, String), String>>,
    pub expiry: Mutex<Duration>,
    pub touched: Mutex<Vec<(String, String)>>,
    pub removed: Mutex<Vec<(String, String)>>,
    pub fail_touch: Mutex<HashSet<String>>,
}

impl Authentication for StaticAuth {
    fn verify_token(&self, username: &str, token: &str, remote: bool) -> bool {
        let key = (username.to_string(), token.to_string());
        if remote {
            self.remote.lock().unwrap().contains_key(&key)
        } else {
            self.local.lock().unwrap().contains(&key)
        }
    }

    fn calculate_token(&self, username: &str, password: &str, nonce: &str) -> String {
        format!("{username}:{password}:{nonce}")
    }

    fn remote_site_name(&self, username: &str, token: &str) -> Option<String> {
        let key = (username.to_string(), token.to_string());
        self.remote.lock().unwrap().get(&key).cloned()
    }

    fn update_token_expires(&self, username: &str, token: &str) -> Result<(), AuthError> {
        if self.fail_touch.lock().unwrap().contains(username) {
            return Err(AuthError::UnknownToken {
                username: username.to_string(),
            });
        }
        self.touched
            .lock()
            .unwrap()
            .push((username.to_string(), token.to_string()));
        Ok(())
    }

    fn remove_token(&self, username: &str, token: &str) -> bool {
        self.removed
            .lock()
            .unwrap()
            .push((username.to_string(), token.to_string()));
        let key = (username.to_string(), token.to_string());
        let local = self.local.lock().unwrap().remove(&key);
        let remote = self.remote.lock().unwrap().remove(&key).is_some();
        local || remote
    }

    fn token_expiration_timeout(&self) -> Duration {
        *self.expiry.lock().unwrap()
    }
}

/// Per-user authorization flags, mutable mid-test to exercise live
/// re-checks.
#[derive(Default, Clone)]
pub struct UserFlags {
    pub extensions: bool,
    pub queues: bool,
    pub admin_queues: bool,
    pub trunks: bool,
    pub parkings: bool,
    pub privacy: bool,
    pub postit: bool,
    pub admin_postit: bool,
    pub phonebook: bool,
    pub remote_site: bool,
    pub owned: HashSet<String>,
}

#[derive(Default)]
pub struct StaticAuthz {
    pub users: Mutex<HashMap<String, UserFlags>>,
}

impl StaticAuthz {
    pub fn set(&self, username: &str, apply: impl FnOnce(&mut UserFlags)) {
        let mut users = self.users.lock().unwrap();
        apply(users.entry(username.to_string()).or_default());
    }

    fn flag(&self, username: &str, read: impl Fn(&UserFlags) -> bool) -> bool {
        self.users
            .lock()
            .unwrap()
            .get(username)
            .map(read)
            .unwrap_or(false)
    }
}

impl Authorization for StaticAuthz {
    fn extensions_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.extensions)
    }
    fn queues_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.queues)
    }
    fn admin_queues_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.admin_queues)
    }
    fn trunks_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.trunks)
    }
    fn parkings_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.parkings)
    }
    fn privacy_enabled(&self, username: &str) -> bool {
        self.flag(username, |f| f.privacy)
    }
    fn postit_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.postit)
    }
    fn admin_postit_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.admin_postit)
    }
    fn phonebook_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.phonebook)
    }
    fn remote_site_allowed(&self, username: &str) -> bool {
        self.flag(username, |f| f.remote_site)
    }
    fn user_owns_extension(&self, username: &str, exten: &str) -> bool {
        self.flag(username, |f| f.owned.contains(exten))
    }
}

#[derive(Default)]
pub struct StaticUsers {
    pub by_extension: Mutex<HashMap<String, Vec<String>>>,
    pub by_voicemail: Mutex<HashMap<String, Vec<String>>>,
    pub endpoints: Mutex<HashMap<String, Vec<String>>>,
    pub presence: Mutex<Vec<(String, String, ClientPresence)>>,
}

impl UserDirectory for StaticUsers {
    fn users_by_extension(&self, exten: &str) -> Vec<String> {
        self.by_extension
            .lock()
            .unwrap()
            .get(exten)
            .cloned()
            .unwrap_or_default()
    }

    fn users_by_voicemail(&self, mailbox: &str) -> Vec<String> {
        self.by_voicemail
            .lock()
            .unwrap()
            .get(mailbox)
            .cloned()
            .unwrap_or_default()
    }

    fn endpoint_extensions(&self, username: &str) -> Vec<String> {
        self.endpoints
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or_default()
    }

    fn set_client_presence(&self, username: &str, device: &str, presence: ClientPresence) {
        self.presence
            .lock()
            .unwrap()
            .push((username.to_string(), device.to_string(), presence));
    }
}

pub struct Fixture {
    pub auth: Arc<StaticAuth>,
    pub authz: Arc<StaticAuthz>,
    pub users: Arc<StaticUsers>,
}

impl Fixture {
    pub fn new() -> Self {
        let auth = StaticAuth::default();
        *auth.expiry.lock().unwrap() = Duration::from_secs(3600);
        Self {
            auth: Arc::new(auth),
            authz: Arc::new(StaticAuthz::default()),
            users: Arc::new(StaticUsers::default()),
        }
    }

    pub fn add_local_token(&self, username: &str) {
        self.auth
            .local
            .lock()
            .unwrap()
            .insert((username.to_string(), format!("tok-{username}")));
    }

    pub fn add_peer_token(&self, username: &str, token: &str, site: &str) {
        self.auth.remote.lock().unwrap().insert(
            (username.to_string(), token.to_string()),
            site.to_string(),
        );
    }

    /// Local token plus the extensions grant, with or without privacy.
    pub fn grant_extensions(&self, username: &str, privacy: bool) {
        self.add_local_token(username);
        self.authz.set(username, |f| {
            f.extensions = true;
            f.privacy = privacy;
        });
    }

    /// Local token plus arbitrary grant flags.
    pub fn grant(&self, username: &str, apply: impl FnOnce(&mut UserFlags)) {
        self.add_local_token(username);
        self.authz.set(username, apply);
    }

    pub fn set_remote_site_allowed(&self, username: &str, allowed: bool) {
        self.authz.set(username, |f| f.remote_site = allowed);
    }

    pub fn map_extension(&self, exten: &str, usernames: &[&str]) {
        self.users.by_extension.lock().unwrap().insert(
            exten.to_string(),
            usernames.iter().map(|u| u.to_string()).collect(),
        );
    }

    pub fn map_voicemail(&self, mailbox: &str, usernames: &[&str]) {
        self.users.by_voicemail.lock().unwrap().insert(
            mailbox.to_string(),
            usernames.iter().map(|u| u.to_string()).collect(),
        );
    }
}

pub fn new_hub(fx: &Fixture) -> Hub {
    new_hub_with(fx, "xxx", false)
}

pub fn new_hub_with(fx: &Fixture, mask: &str, ownership_aware: bool) -> Hub {
    Hub::new(
        fx.auth.clone(),
        fx.authz.clone(),
        fx.users.clone(),
        mask.to_string(),
        ownership_aware,
    )
}

/// Performs a local login with the `tok-<user>` convention and hands back
/// the connection id and the outbound frame queue.
pub async fn login(hub: &Hub, username: &str, origin: Option<&str>) -> (Uuid, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let connection_id = Uuid::new_v4();
    let data = LoginData {
        access_key_id: username.to_string(),
        token: format!("tok-{username}"),
        origin_agent: origin.map(String::from),
    };
    hub.login_local(connection_id, &data, tx).await.unwrap();
    (connection_id, rx)
}

pub async fn peer_login(hub: &Hub, username: &str, token: &str) -> (Uuid, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let connection_id = Uuid::new_v4();
    let data = LoginData {
        access_key_id: username.to_string(),
        token: token.to_string(),
        origin_agent: None,
    };
    hub.login_remote(connection_id, &data, tx).await.unwrap();
    (connection_id, rx)
}

/// Pops the next queued frame without waiting; `None` means the queue is
/// empty, which the negative-delivery tests rely on.
pub async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> Option<Frame> {
    let text = rx.try_recv().ok()?;
    Frame::parse(&text).ok()
}
