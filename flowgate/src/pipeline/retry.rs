//! Retry policy with exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a stage's work attempts.
///
/// A stage gets `max_retries + 1` attempts in total. The delay before the
/// retry that follows failed attempt `n` (0-based) is
/// `base_delay_ms * 2^n`, capped at `max_delay_ms`. Only retryable failures
/// consume the budget; a fatal failure ends the stage at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `max_retries` and the default delays.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// A policy that never retries: one attempt only.
    #[must_use]
    pub fn no_retries() -> Self {
        Self::new(0)
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Total attempts this policy allows.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The backoff delay after failed attempt `attempt` (0-based).
    ///
    /// Saturates instead of overflowing, so absurd attempt numbers simply
    /// pin to the cap.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }
}
