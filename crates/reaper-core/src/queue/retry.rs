//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Backoff for a policy whose whole pass failed transiently.
///
/// Per-resource failures never reach here: they are simply picked up again
/// by the next pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for the next retry based on the failure count.
    ///
    /// `delay = min(base_delay * multiplier^(failures - 1), max_delay)`
    ///
    /// Example with base_delay=1s, multiplier=2.0, max_delay=300s:
    /// - failure 1: 1s
    /// - failure 2: 2s
    /// - failure 3: 4s
    /// - failure 10: 300s (capped)
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}
