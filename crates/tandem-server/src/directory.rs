//! In-memory collaborator directory built from configuration.
//!
//! Reference implementation of the hub's three collaborator traits for
//! deployments without an external identity backend. Tokens follow the
//! digest handshake: the control plane hands a client a single-use nonce
//! via [`Directory::new_nonce`], the client derives
//! HMAC-SHA-256(key = password, message = `username:password:nonce`)
//! hex-encoded, and the first `verify_token` for that value promotes it
//! to an active token with an expiry window swept by the token keeper.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use tandem_hub::collab::{
    AuthError, Authentication, Authorization, ClientPresence, UserDirectory,
};

use crate::config::Config;

/// Outstanding nonces kept per account; the oldest is dropped beyond this.
const MAX_PENDING_NONCES: usize = 8;

struct Account {
    password: String,
    site: Option<String>,
    grants: HashSet<String>,
    extensions: Vec<String>,
    voicemails: Vec<String>,
}

#[derive(Default)]
struct AuthState {
    /// Single-use login nonces per username.
    nonces: HashMap<String, Vec<String>>,
    /// Active tokens with their expiry deadline.
    tokens: HashMap<(String, String), DateTime<Utc>>,
}

pub struct Directory {
    accounts: HashMap<String, Account>,
    by_extension: HashMap<String, Vec<String>>,
    by_voicemail: HashMap<String, Vec<String>>,
    expiration: Duration,
    state: Mutex<AuthState>,
    presence: Mutex<HashMap<(String, String), ClientPresence>>,
}

impl Directory {
    pub fn from_config(config: &Config) -> Self {
        let mut accounts = HashMap::new();
        let mut by_extension: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_voicemail: HashMap<String, Vec<String>> = HashMap::new();

        for (username, user) in &config.users {
            for exten in &user.extensions {
                by_extension
                    .entry(exten.clone())
                    .or_default()
                    .push(username.clone());
            }
            for mailbox in &user.voicemails {
                by_voicemail
                    .entry(mailbox.clone())
                    .or_default()
                    .push(username.clone());
            }
            accounts.insert(
                username.clone(),
                Account {
                    password: user.password.clone(),
                    site: user.site.clone(),
                    grants: user.grants.iter().cloned().collect(),
                    extensions: user.extensions.clone(),
                    voicemails: user.voicemails.clone(),
                },
            );
        }
        for owners in by_extension.values_mut() {
            owners.sort();
        }
        for owners in by_voicemail.values_mut() {
            owners.sort();
        }

        Self {
            accounts,
            by_extension,
            by_voicemail,
            expiration: Duration::from_secs(config.tokens.expiration_secs),
            state: Mutex::new(AuthState::default()),
            presence: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a login handshake: checks the password and hands out a
    /// single-use nonce for the digest challenge. `None` means the
    /// credentials are wrong or the account does not exist.
    pub fn new_nonce(&self, username: &str, password: &str) -> Option<String> {
        let account = self.accounts.get(username)?;
        if account.password != password {
            tracing::info!(username, "login challenge refused");
            return None;
        }
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill(&mut bytes);
        let nonce = hex::encode(bytes);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let pending = state.nonces.entry(username.to_string()).or_default();
        if pending.len() >= MAX_PENDING_NONCES {
            pending.remove(0);
        }
        pending.push(nonce.clone());
        Some(nonce)
    }

    /// Presence as last reported for a user's device.
    pub fn presence_of(&self, username: &str, device: &str) -> Option<ClientPresence> {
        self.presence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(username.to_string(), device.to_string()))
            .copied()
    }

    fn deadline(&self) -> DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(self.expiration)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600))
    }

    fn grant(&self, username: &str, name: &str) -> bool {
        self.accounts
            .get(username)
            .map(|account| account.grants.contains(name))
            .unwrap_or(false)
    }
}

fn hmac_token(username: &str, password: &str, nonce: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(password.as_bytes()).expect("HMAC key length is valid");
    mac.update(format!("{username}:{password}:{nonce}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

impl Authentication for Directory {
    fn verify_token(&self, username: &str, token: &str, remote: bool) -> bool {
        let Some(account) = self.accounts.get(username) else {
            return false;
        };
        // Federation accounts only verify in remote mode and vice versa.
        if account.site.is_some() != remote {
            return false;
        }
        let key = (username.to_string(), token.to_string());
        let now = Utc::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(expires) = state.tokens.get(&key) {
            if *expires > now {
                return true;
            }
            state.tokens.remove(&key);
            tracing::info!(username, "expired token rejected");
        }

        if let Some(pending) = state.nonces.get_mut(username) {
            if let Some(pos) = pending
                .iter()
                .position(|nonce| hmac_token(username, &account.password, nonce) == token)
            {
                pending.remove(pos);
                let deadline = self.deadline();
                state.tokens.insert(key, deadline);
                return true;
            }
        }
        false
    }

    fn calculate_token(&self, username: &str, password: &str, nonce: &str) -> String {
        hmac_token(username, password, nonce)
    }

    fn remote_site_name(&self, username: &str, token: &str) -> Option<String> {
        let site = self.accounts.get(username)?.site.clone()?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.tokens.get(&(username.to_string(), token.to_string())) {
            Some(expires) if *expires > Utc::now() => Some(site),
            _ => None,
        }
    }

    fn update_token_expires(&self, username: &str, token: &str) -> Result<(), AuthError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = self.deadline();
        match state
            .tokens
            .get_mut(&(username.to_string(), token.to_string()))
        {
            Some(expires) => {
                *expires = deadline;
                Ok(())
            }
            None => Err(AuthError::UnknownToken {
                username: username.to_string(),
            }),
        }
    }

    fn remove_token(&self, username: &str, token: &str) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tokens
            .remove(&(username.to_string(), token.to_string()))
            .is_some()
    }

    fn token_expiration_timeout(&self) -> Duration {
        self.expiration
    }
}

impl Authorization for Directory {
    fn extensions_allowed(&self, username: &str) -> bool {
        self.grant(username, "extensions")
    }
    fn queues_allowed(&self, username: &str) -> bool {
        self.grant(username, "queues")
    }
    fn admin_queues_allowed(&self, username: &str) -> bool {
        self.grant(username, "admin_queues")
    }
    fn trunks_allowed(&self, username: &str) -> bool {
        self.grant(username, "trunks")
    }
    fn parkings_allowed(&self, username: &str) -> bool {
        self.grant(username, "parkings")
    }
    fn privacy_enabled(&self, username: &str) -> bool {
        self.grant(username, "privacy")
    }
    fn postit_allowed(&self, username: &str) -> bool {
        self.grant(username, "postit")
    }
    fn admin_postit_allowed(&self, username: &str) -> bool {
        self.grant(username, "admin_postit")
    }
    fn phonebook_allowed(&self, username: &str) -> bool {
        self.grant(username, "phonebook")
    }
    fn remote_site_allowed(&self, username: &str) -> bool {
        self.grant(username, "remote_site")
    }
    fn user_owns_extension(&self, username: &str, exten: &str) -> bool {
        self.accounts
            .get(username)
            .map(|account| account.extensions.iter().any(|e| e == exten))
            .unwrap_or(false)
    }
}

impl UserDirectory for Directory {
    fn users_by_extension(&self, exten: &str) -> Vec<String> {
        self.by_extension.get(exten).cloned().unwrap_or_default()
    }

    fn users_by_voicemail(&self, mailbox: &str) -> Vec<String> {
        self.by_voicemail.get(mailbox).cloned().unwrap_or_default()
    }

    fn endpoint_extensions(&self, username: &str) -> Vec<String> {
        self.accounts
            .get(username)
            .map(|account| account.extensions.clone())
            .unwrap_or_default()
    }

    fn set_client_presence(&self, username: &str, device: &str, presence: ClientPresence) {
        tracing::debug!(username, device, ?presence, "client presence updated");
        self.presence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((username.to_string(), device.to_string()), presence);
    }
}
