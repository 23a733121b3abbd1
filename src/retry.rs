//! Retry decisions with exponential backoff.

use crate::config::RetryConfig;
use crate::error::{ClientError, ErrorKind};
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made.
    pub retryable: bool,
    /// How long to wait before it.
    pub delay: Duration,
    /// Classification of the failure that led here.
    pub reason: ErrorKind,
}

/// Derives a [`RetryDecision`] for every failed attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from config.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Decide what follows the failure of attempt number `attempt` (0-based).
    pub fn decide(&self, error: &ClientError, attempt: u32) -> RetryDecision {
        let reason = error.kind();

        if !reason.is_retryable() || attempt >= self.config.max_retries {
            return RetryDecision {
                retryable: false,
                delay: Duration::ZERO,
                reason,
            };
        }

        let delay = match error.retry_after() {
            Some(wait) => wait,
            None => self.backoff(attempt),
        };

        RetryDecision {
            retryable: true,
            delay,
            reason,
        }
    }

    /// Computed backoff before retry number `attempt` (0-based):
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let mut secs = base * 2f64.powi(attempt.min(31) as i32);

        if self.config.jitter {
            // ±25%
            secs *= 1.0 + (rand::random::<f64>() - 0.5) * 0.5;
        }

        if !secs.is_finite() || secs >= self.config.max_delay.as_secs_f64() {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}
