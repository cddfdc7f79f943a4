//! Reconnect backoff: capped exponential delay plus jitter.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use vaultindex_core::BackoffConfig;

/// Computes reconnect delays from a [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before reconnect `attempt` (0-based), without jitter.
    ///
    /// `min(max_delay, base * 2^min(attempt, cap_exponent))`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.config.cap_exponent).min(63);
        let ms = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Base delay plus an explicit jitter, clamped below `max_jitter_ms`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let jitter = match self.config.max_jitter_ms {
            0 => 0,
            max => jitter_ms % max,
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Delay before reconnect `attempt`, or `None` once the retry budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        Some(self.delay_with_jitter(attempt, clock_jitter()))
    }

    /// `true` while fewer than `max_retries` reconnects have been attempted.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_retries
    }

    /// Upper bound of any delay this policy produces.
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(
            self.config
                .max_delay_ms
                .saturating_add(self.config.max_jitter_ms),
        )
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

/// Sub-second clock noise; enough to spread reconnects of sibling processes.
fn clock_jitter() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0)
}
