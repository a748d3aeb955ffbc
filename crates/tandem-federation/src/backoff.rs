//! Reconnect scheduling shared by every peer link.

use std::time::Duration;

use rand::Rng;

/// Delay and timeout knobs for outbound peer links. One policy instance is
/// shared by all links of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Fixed delay before every reconnect attempt.
    pub base: Duration,
    /// Upper bound of the uniform jitter added to `base`.
    pub jitter: Duration,
    /// Timeout for the websocket connect, also applied to the login
    /// handshake.
    pub connect_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            jitter: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Next reconnect delay: `base + uniform(0, jitter)`. The jitter keeps
    /// a fleet of links from retrying in lockstep after a shared outage.
    pub fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..self.jitter);
        self.base + jitter
    }
}
