//! In-memory doubles for the link state machine and relay tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_hub::collab::{
    AuthError, Authentication, Authorization, ClientPresence, UserDirectory,
};
use tandem_hub::hub::{Hub, SEND_QUEUE_DEPTH};
use tandem_types::wire::{Frame, LoginData};
use tandem_types::RemoteSite;

use crate::rest::{PeerCredentials, PeerRestApi, RestError};
use crate::sites::SiteSnapshots;
use crate::transport::{ConnectError, PeerConnector, PeerLink};

pub fn branch_site() -> RemoteSite {
    RemoteSite {
        hostname: "branch.example.com".to_string(),
        port: 8283,
        username: "hub".to_string(),
        password: "secret".to_string(),
        prefix: "9".to_string(),
        secure: true,
    }
}

/// REST double: hands out a fixed nonce, serves whatever snapshots the
/// test loaded, and records post-it creations.
pub struct FakeRest {
    pub nonce: String,
    pub login_calls: AtomicUsize,
    pub snapshots: Mutex<SiteSnapshots>,
    pub postits: Mutex<Vec<(String, String, String)>>,
}

impl FakeRest {
    pub fn new() -> Self {
        Self {
            nonce: "n0nce".to_string(),
            login_calls: AtomicUsize::new(0),
            snapshots: Mutex::new(SiteSnapshots::default()),
            postits: Mutex::new(Vec::new()),
        }
    }

    pub fn with_snapshots(snapshots: SiteSnapshots) -> Self {
        let rest = Self::new();
        *rest.snapshots.lock().unwrap() = snapshots;
        rest
    }
}

#[async_trait]
impl PeerRestApi for FakeRest {
    async fn remote_login(&self, _site: &RemoteSite) -> Result<String, RestError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce.clone())
    }

    async fn op_extensions(
        &self,
        _site: &RemoteSite,
        _creds: &PeerCredentials,
    ) -> Map<String, Value> {
        self.snapshots.lock().unwrap().op_extensions.clone()
    }

    async fn op_groups(
        &self,
        _site: &RemoteSite,
        _creds: &PeerCredentials,
    ) -> Map<String, Value> {
        self.snapshots.lock().unwrap().op_groups.clone()
    }

    async fn usernames(
        &self,
        _site: &RemoteSite,
        _creds: &PeerCredentials,
    ) -> Map<String, Value> {
        self.snapshots.lock().unwrap().usernames.clone()
    }

    async fn user_endpoints(
        &self,
        _site: &RemoteSite,
        _creds: &PeerCredentials,
    ) -> Map<String, Value> {
        self.snapshots.lock().unwrap().user_endpoints.clone()
    }

    async fn create_postit(
        &self,
        _site: &RemoteSite,
        _creds: &PeerCredentials,
        creator: &str,
        recipient: &str,
        text: &str,
    ) -> Result<(), RestError> {
        self.postits.lock().unwrap().push((
            creator.to_string(),
            recipient.to_string(),
            text.to_string(),
        ));
        Ok(())
    }
}

/// The scripted peer side of one connection: frames the link sent, and a
/// sender to answer as the peer. Dropping both halves closes the link.
pub struct PeerEnd {
    pub from_link: mpsc::Receiver<Frame>,
    pub to_link: mpsc::Sender<Frame>,
}

/// Connector double: every `connect` call yields a fresh in-memory pipe
/// and pushes the peer side to the test through the channel returned by
/// [`ScriptedConnector::new`].
pub struct ScriptedConnector {
    ends: Mutex<mpsc::UnboundedSender<PeerEnd>>,
    pub fail_connects: AtomicUsize,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            ends: Mutex::new(tx),
            fail_connects: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        });
        (connector, rx)
    }
}

#[async_trait]
impl PeerConnector for ScriptedConnector {
    async fn connect(
        &self,
        _site: &RemoteSite,
        _timeout: Duration,
    ) -> Result<PeerLink, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectError::Handshake("scripted failure".to_string()));
        }
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let _ = self.ends.lock().unwrap().send(PeerEnd {
            from_link: out_rx,
            to_link: in_tx,
        });
        Ok(PeerLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Grant flags for one test user.
#[derive(Default, Clone)]
pub struct Grants {
    pub remote_site: bool,
    pub extensions: bool,
    pub privacy: bool,
    pub owned: HashSet<String>,
}

#[derive(Default)]
pub struct FedAuthz {
    users: Mutex<HashMap<String, Grants>>,
}

impl FedAuthz {
    pub fn set(&self, username: &str, apply: impl FnOnce(&mut Grants)) {
        let mut users = self.users.lock().unwrap();
        apply(users.entry(username.to_string()).or_default());
    }

    fn flag(&self, username: &str, read: impl Fn(&Grants) -> bool) -> bool {
        self.users
            .lock()
            .unwrap()
            .get(username)
            .map(read)
            .unwrap_or(false)
    }
}

impl Authorization for FedAuthz {
    fn extensions_allowed(&self, username: &str) -> bool {
        self.flag(username, |g| g.extensions)
    }
    fn queues_allowed(&self, _username: &str) -> bool {
        false
    }
    fn admin_queues_allowed(&self, _username: &str) -> bool {
        false
    }
    fn trunks_allowed(&self, _username: &str) -> bool {
        false
    }
    fn parkings_allowed(&self, _username: &str) -> bool {
        false
    }
    fn privacy_enabled(&self, username: &str) -> bool {
        self.flag(username, |g| g.privacy)
    }
    fn postit_allowed(&self, _username: &str) -> bool {
        false
    }
    fn admin_postit_allowed(&self, _username: &str) -> bool {
        false
    }
    fn phonebook_allowed(&self, _username: &str) -> bool {
        false
    }
    fn remote_site_allowed(&self, username: &str) -> bool {
        self.flag(username, |g| g.remote_site)
    }
    fn user_owns_extension(&self, username: &str, exten: &str) -> bool {
        self.flag(username, |g| g.owned.contains(exten))
    }
}

#[derive(Default)]
pub struct FedAuth {
    pub local: Mutex<HashSet<(String, String)>>,
    pub remote: Mutex<HashMap<(String, String), String>>,
}

impl Authentication for FedAuth {
    fn verify_token(&self, username: &str, token: &str, remote: bool) -> bool {
        let key = (username.to_string(), token.to_string());
        if remote {
            self.remote.lock().unwrap().contains_key(&key)
        } else {
            self.local.lock().unwrap().contains(&key)
        }
    }

    fn calculate_token(&self, username: &str, password: &str, nonce: &str) -> String {
        format!("{username}.{password}.{nonce}")
    }

    fn remote_site_name(&self, username: &str, token: &str) -> Option<String> {
        let key = (username.to_string(), token.to_string());
        self.remote.lock().unwrap().get(&key).cloned()
    }

    fn update_token_expires(&self, _username: &str, _token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn remove_token(&self, username: &str, token: &str) -> bool {
        let key = (username.to_string(), token.to_string());
        self.remote.lock().unwrap().remove(&key).is_some()
    }

    fn token_expiration_timeout(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

pub struct NullUsers;

impl UserDirectory for NullUsers {
    fn users_by_extension(&self, _exten: &str) -> Vec<String> {
        Vec::new()
    }
    fn users_by_voicemail(&self, _mailbox: &str) -> Vec<String> {
        Vec::new()
    }
    fn endpoint_extensions(&self, _username: &str) -> Vec<String> {
        Vec::new()
    }
    fn set_client_presence(&self, _username: &str, _device: &str, _presence: ClientPresence) {}
}

/// Hub wired with the federation doubles.
pub struct FedFixture {
    pub auth: Arc<FedAuth>,
    pub authz: Arc<FedAuthz>,
    pub hub: Arc<Hub>,
}

impl FedFixture {
    pub fn new() -> Self {
        let auth = Arc::new(FedAuth::default());
        let authz = Arc::new(FedAuthz::default());
        let hub = Arc::new(Hub::new(
            auth.clone(),
            authz.clone(),
            Arc::new(NullUsers),
            "xxx".to_string(),
            false,
        ));
        Self { auth, authz, hub }
    }

    /// Registers a local client session with the given grants and hands
    /// back its frame queue.
    pub async fn login_viewer(
        &self,
        username: &str,
        apply: impl FnOnce(&mut Grants),
    ) -> mpsc::Receiver<String> {
        self.auth
            .local
            .lock()
            .unwrap()
            .insert((username.to_string(), format!("tok-{username}")));
        self.authz.set(username, apply);
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let data = LoginData {
            access_key_id: username.to_string(),
            token: format!("tok-{username}"),
            origin_agent: None,
        };
        self.hub
            .login_local(Uuid::new_v4(), &data, tx)
            .await
            .unwrap();
        rx
    }

    /// Registers an inbound peer session bound to a site name.
    pub async fn login_peer(&self, username: &str, site: &str) -> mpsc::Receiver<String> {
        self.auth.remote.lock().unwrap().insert(
            (username.to_string(), format!("ptok-{username}")),
            site.to_string(),
        );
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let data = LoginData {
            access_key_id: username.to_string(),
            token: format!("ptok-{username}"),
            origin_agent: None,
        };
        self.hub
            .login_remote(Uuid::new_v4(), &data, tx)
            .await
            .unwrap();
        rx
    }
}

/// Pops the next queued frame without waiting.
pub async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> Option<Frame> {
    let text = rx.try_recv().ok()?;
    Frame::parse(&text).ok()
}
