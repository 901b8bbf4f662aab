//! Retry policy for applying a single change.
//!
//! Applying is single-shot by default. With more than one attempt configured,
//! the applier re-runs a failed write in a fresh transaction after the delay
//! from [`RetryConfig::delay_for_attempt`], for retryable errors only.
//!
//! # Example
//!
//! ```rust
//! use changestream_mirror::resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let retry = RetryConfig {
//!     max_attempts: 3,
//!     ..RetryConfig::default()
//! };
//! assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
//! assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
//! ```

use std::time::Duration;

/// Configuration for per-change retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per change, including the first. `1` disables retry.
    pub max_attempts: usize,

    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Maximum delay between attempts (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for tests.
    ///
    /// Fails quickly to avoid slow tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Calculate the delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_secs_f64(delay_secs), self.max_delay)
    }
}
