//! Retry budgets for message transmission and session restarts.

use std::time::Duration;

/// A bounded retry budget with fixed or exponential pauses. No jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Pause before the first retry.
    pub base: Duration,
    /// Double the pause on each retry.
    pub exponential: bool,
}

impl RetryPolicy {
    /// Restarting a missing process: 2s, 4s, 8s.
    pub const RESTART: Self = Self {
        max_retries: 3,
        base: Duration::from_secs(2),
        exponential: true,
    };

    /// Re-sending after a failed write: 1s each time.
    pub const WRITE: Self = Self {
        max_retries: 3,
        base: Duration::from_secs(1),
        exponential: false,
    };

    /// Pause before retry number `retry` (0-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        if self.exponential {
            self.base.saturating_mul(2_u32.saturating_pow(retry))
        } else {
            self.base
        }
    }

    /// Whether retry number `retry` (0-based) is still within budget.
    #[must_use]
    pub fn allows(&self, retry: u32) -> bool {
        retry < self.max_retries
    }
}
