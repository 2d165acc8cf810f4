//! Bounded retry with exponential backoff for upstream calls.
//!
//! Only transport-level and 5xx failures are retried here, and only a
//! couple of times: anything longer-lived is the sync worker's job,
//! which blocks the owning ingestion job instead of spinning in-process.

use chronicle_core::sync::UpstreamError;
use rand::RngExt;
use std::time::Duration;

/// Retry policy for transient upstream errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No retries; every failure surfaces immediately
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Whether this error is worth retrying in-process.
    ///
    /// Rate limiting is deliberately excluded: the reset is minutes
    /// away, which is the job coordinator's territory.
    pub fn should_retry(&self, error: &UpstreamError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        match error {
            UpstreamError::RateLimited { .. } => false,
            UpstreamError::Permanent { .. } => false,
            UpstreamError::Timeout => true,
            UpstreamError::Server { .. } => true,
            UpstreamError::Network { .. } => true,
        }
    }

    /// Delay before the given retry attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let mut delay = self.initial_delay.as_millis() as f64;
        for _ in 1..attempt {
            delay *= self.backoff_multiplier;
        }

        if self.use_jitter {
            let factor: f64 = rand::rng().random_range(1.0..1.25);
            delay *= factor;
        }

        Duration::from_millis(delay as u64)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
