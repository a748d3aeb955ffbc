//! Background keep-alive for session tokens.
//!
//! Connected clients never re-authenticate, so their tokens must be
//! touched before the expiration timeout lapses. The keeper sweeps a
//! registry snapshot at half the timeout.

use std::sync::Arc;
use std::time::Duration;

use crate::hub::Hub;

/// Floor for the sweep interval, guarding against a zero timeout.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Runs forever; spawn it once per hub.
pub async fn run_token_keeper(hub: Arc<Hub>) {
    let interval = sweep_interval(hub.auth().token_expiration_timeout());
    tracing::info!(interval_secs = interval.as_secs(), "token keeper started");
    loop {
        tokio::time::sleep(interval).await;
        sweep(&hub).await;
    }
}

fn sweep_interval(expiry: Duration) -> Duration {
    (expiry / 2).max(MIN_SWEEP_INTERVAL)
}

/// One pass over the current sessions. Per-entry failures are logged and
/// never abort the sweep.
async fn sweep(hub: &Hub) {
    let sessions = hub.registry().snapshot().await;
    let mut touched = 0usize;
    for session in &sessions {
        match hub
            .auth()
            .update_token_expires(&session.username, &session.token)
        {
            Ok(()) => touched += 1,
            Err(e) => tracing::warn!(
                username = %session.username,
                "failed to extend token expiration: {}",
                e
            ),
        }
    }
    tracing::debug!(touched, total = sessions.len(), "token keep-alive sweep");
}
