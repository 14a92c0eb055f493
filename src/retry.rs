//! Retry policy for provider calls: pure delay computation plus the decision
//! whether another attempt is allowed. Sleeping is the caller's business.

use std::time::Duration;

use rand::Rng;

use crate::error::{ErrorClass, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per provider per call (not "extra" attempts).
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Base used after a rate-limit response.
    pub rate_limit_base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter, e.g. 0.25 for ±25%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            rate_limit_base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// May another attempt follow `err` after `attempts_used` attempts?
    pub fn should_retry(&self, err: &ProviderError, attempts_used: u32) -> bool {
        err.is_retryable() && attempts_used < self.max_attempts
    }

    pub fn base_for(&self, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::RateLimit => self.rate_limit_base_delay,
            _ => self.base_delay,
        }
    }

    /// Delay after the `attempt`-th failure (0-based):
    /// `min(base * 2^attempt, max) * (1 + jitter * jitter_unit)`.
    ///
    /// `jitter_unit` must lie in `-1.0..=1.0`; it is clamped otherwise.
    pub fn next_delay(&self, attempt: u32, class: ErrorClass, jitter_unit: f64) -> Duration {
        let base = self.base_for(class).as_secs_f64();
        let exp = base * 2f64.powi(attempt.min(30) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let unit = if jitter_unit.is_finite() {
            jitter_unit.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let factor = 1.0 + self.jitter.clamp(0.0, 1.0) * unit;
        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    /// [`next_delay`](Self::next_delay) with a random jitter draw.
    pub fn delay_with_jitter(&self, attempt: u32, class: ErrorClass) -> Duration {
        let unit = rand::rng().random_range(-1.0..=1.0);
        self.next_delay(attempt, class, unit)
    }
}
