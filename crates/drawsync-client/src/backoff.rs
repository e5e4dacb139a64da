//! Reconnect delay schedule.

use std::time::Duration;

use drawsync_core::config::ClientConfig;

/// Linear backoff: `initial + step * retries`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            step: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before the reconnect that follows `retries` failed attempts.
    pub fn delay(&self, retries: u32) -> Duration {
        let ceiling = self.max.max(self.initial);
        self.initial
            .saturating_add(self.step.saturating_mul(retries))
            .min(ceiling)
    }
}

impl From<&ClientConfig> for Backoff {
    fn from(config: &ClientConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.backoff_initial_ms),
            step: Duration::from_millis(config.backoff_step_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}
