//! Failure classification and backoff for item fetches.

use std::time::Duration;

use crate::error::ScrapeError;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Flaky render, transport, or session trouble; retry with backoff.
    Transient,
    /// Retrying cannot change the outcome; record immediately.
    Permanent,
}

/// Per-item retry budget and backoff curve.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (attempts = max_retries + 1).
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }

    pub fn classify(err: &ScrapeError) -> FailureClass {
        match err {
            ScrapeError::RenderTimeout { .. }
            | ScrapeError::StaleElement(_)
            | ScrapeError::SessionCrash(_)
            | ScrapeError::Driver(_) => FailureClass::Transient,
            ScrapeError::Config(_)
            | ScrapeError::PoolTimeout(_)
            | ScrapeError::NotFound { .. }
            | ScrapeError::Cancelled => FailureClass::Permanent,
        }
    }

    /// True when this error should get another attempt after `attempt`
    /// zero-based tries.
    pub fn should_retry(&self, err: &ScrapeError, attempt: u32) -> bool {
        attempt < self.max_retries && Self::classify(err) == FailureClass::Transient
    }

    /// Exponential backoff before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
