//! shopscrape - selector-fallback scraping core for JavaScript-rendered
//! storefront pages.
//!
//! Pulls structured product records (title, price, images, availability,
//! variant options) out of e-commerce pages whose markup drifts over time.
//! Selectors are tried in prioritized fallback order per field, browser
//! sessions are pooled and recycled, fetches run under bounded concurrency
//! with retry/backoff, and every job reports its own extraction health so
//! stale selectors surface as a warning instead of silently empty data.
//!
//! Persistence, export formatting, and UI/HTTP wiring are collaborators of
//! this crate, not part of it: jobs go in, plain owned records come out.

pub mod browser;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod health;
pub mod item;
pub mod listing;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod selectors;
mod util;

pub use browser::pool::{BrowserSessionPool, SessionLease};
pub use browser::{DriverError, PageDriver, SessionFactory};
pub use error::ScrapeError;
pub use health::{HealthFlag, HealthReport};
pub use models::{
    FailureKind, FieldOutcome, ItemFailure, ItemStatus, JobTarget, Price, ScrapeJob, ScrapeResult,
    ScrapedItem, Variant, VariantGroup,
};
pub use orchestrator::{OrchestratorConfig, ScrapeOrchestrator};
pub use retry::RetryPolicy;
pub use selectors::{SelectorRegistry, SelectorSnapshot};

#[cfg(feature = "browser")]
pub use browser::chromium::{ChromiumLaunchConfig, ChromiumSessionFactory};
