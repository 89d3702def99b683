use std::time::Duration;

use config::shared::RetryConfig;
use rand::Rng;

/// Exponential backoff with full jitter.
///
/// The delay before retry `n` is drawn uniformly from zero to
/// `min(max_delay, initial_delay * backoff_factor^(n - 1))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl RetryPolicy {
    /// A policy making a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    /// Attempts per key, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the upper bound of the delay after the given failed attempt, starting at 1.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);

        if !scaled.is_finite() || scaled >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(scaled.round() as u64)
    }

    /// Returns a random delay to wait after the given failed attempt, starting at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=ceiling);

        Duration::from_millis(jitter)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }
}
