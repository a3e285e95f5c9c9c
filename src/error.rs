//! Error taxonomy for selector loading and scrape jobs.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while loading selector configuration or scraping pages.
///
/// Field-level problems (a price that matched but did not parse) are not
/// errors at all; they downgrade the field and show up in item diagnostics.
/// Item-level failures are recorded per URL in the job result. Only a
/// configuration error aborts a whole job.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Selector configuration is malformed or incomplete. Fatal at job start.
    #[error("selector config: {0}")]
    Config(String),

    /// No browser session became available within the acquire timeout.
    #[error("no idle browser session within {0:?}")]
    PoolTimeout(Duration),

    /// The render-ready marker never appeared within the navigation timeout.
    #[error("render timeout for {url}")]
    RenderTimeout { url: String },

    /// A queried element went away between render and read.
    #[error("stale element: {0}")]
    StaleElement(String),

    /// A mandatory field stayed unresolved after every selector.
    #[error("mandatory field `{field}` not found at {url}")]
    NotFound { url: String, field: String },

    /// The underlying browser session died mid-fetch.
    #[error("browser session crashed: {0}")]
    SessionCrash(String),

    /// Driver-level failure: navigation, protocol, or transport.
    #[error("driver: {0}")]
    Driver(anyhow::Error),

    /// The job deadline cancelled this fetch.
    #[error("cancelled by job timeout")]
    Cancelled,
}

impl From<crate::browser::DriverError> for ScrapeError {
    fn from(err: crate::browser::DriverError) -> Self {
        use crate::browser::DriverError;
        match err {
            DriverError::Crashed(msg) => ScrapeError::SessionCrash(msg),
            DriverError::Stale(msg) => ScrapeError::StaleElement(msg),
            DriverError::Navigation(msg) => ScrapeError::Driver(anyhow::anyhow!(msg)),
            DriverError::Other(err) => ScrapeError::Driver(err),
        }
    }
}
