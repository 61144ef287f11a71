//! Retry policy with exponential backoff and jitter.
//!
//! Transient provider failures back off exponentially so a struggling
//! external service is not hammered; jitter spreads out concurrent jobs
//! retrying against the same shared provider.

use std::time::Duration;

use rand::Rng;

/// Retry policy for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per stage, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt (doubled each attempt after)
    pub base_delay_ms: u64,
    /// Upper bound on the computed delay, pre-jitter
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before the attempt following `attempt`.
    ///
    /// Base delay doubled per attempt, capped, plus up to 25% jitter.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_delay_ms);
        let jitter = rand::rng().random_range(0..=raw / 4);
        Duration::from_millis(raw + jitter)
    }
}
