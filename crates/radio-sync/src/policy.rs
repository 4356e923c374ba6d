//! Reconnect backoff.
//!
//! The policy is a pure function of `(attempt, config) -> delay`.  The attempt
//! counter itself lives on [`ConnectionManager`](crate::ConnectionManager),
//! where callers can inspect and reset it.

use std::time::Duration;

use radio_proto::config::ReconnectConfig;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Automatic reconnects allowed before recovery is handed back to the user.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread delays over `[delay/2, delay]` so a fleet of dashboards does not
    /// reconnect in lockstep after a server restart.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: cfg.jitter,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempt, max)`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The delay actually used for scheduling: [`delay_for`](Self::delay_for)
    /// with jitter applied when enabled.  Never exceeds the capped delay.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(spread)
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
