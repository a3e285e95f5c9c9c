//! Per-job metrics session, reported through the `tracing` facade.
//!
//! The crate never binds a log sink; the embedding application decides where
//! these events go.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Fraction of attempts (as a percentage) below which the finish log
/// escalates to an error.
const LOW_RATE_PERCENT: f64 = 50.0;

/// Errors kept verbatim on the summary; the rest are only counted.
const MAX_SAMPLED_ERRORS: usize = 5;

/// Counters for one scrape job.
#[derive(Debug)]
pub struct JobMetrics {
    site: String,
    mode: &'static str,
    started: Instant,
    attempts: usize,
    succeeded: usize,
    failed: usize,
    errors: Vec<String>,
}

/// Snapshot emitted when a job finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub site: String,
    pub mode: String,
    pub duration_secs: f64,
    pub attempts: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_percent: f64,
    pub errors: Vec<String>,
}

impl JobMetrics {
    pub fn start(site: &str, mode: &'static str) -> Self {
        info!(site, mode, "starting scrape session");
        Self {
            site: site.to_string(),
            mode,
            started: Instant::now(),
            attempts: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn record_success(&mut self, url: &str) {
        self.attempts += 1;
        self.succeeded += 1;
        debug!(site = %self.site, url, "scraped item");
    }

    pub fn record_failure(&mut self, url: &str, error: &str) {
        self.attempts += 1;
        self.failed += 1;
        if self.errors.len() < MAX_SAMPLED_ERRORS {
            self.errors.push(format!("{url}: {error}"));
        }
        warn!(site = %self.site, url, error, "scrape attempt failed");
    }

    /// Close the session and log the rollup.
    pub fn finish(self) -> JobSummary {
        let duration = self.started.elapsed();
        let success_percent = if self.attempts > 0 {
            self.succeeded as f64 / self.attempts as f64 * 100.0
        } else {
            0.0
        };

        if self.attempts > 0 && success_percent < LOW_RATE_PERCENT {
            error!(
                site = %self.site,
                succeeded = self.succeeded,
                attempts = self.attempts,
                success_percent,
                "low success rate"
            );
        } else {
            info!(
                site = %self.site,
                succeeded = self.succeeded,
                attempts = self.attempts,
                success_percent,
                "scrape session completed"
            );
        }

        JobSummary {
            site: self.site,
            mode: self.mode.to_string(),
            duration_secs: duration.as_secs_f64(),
            attempts: self.attempts,
            succeeded: self.succeeded,
            failed: self.failed,
            success_percent,
            errors: self.errors,
        }
    }
}
