//! Data shapes exchanged with callers: jobs in, product records and
//! diagnostics out.
//!
//! Everything here is a plain owned value. A `ScrapedItem` has no ties to the
//! session or snapshot that produced it, so callers can hand records straight
//! to a persistence or export layer.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;
use crate::health::HealthReport;

/// Parsed price with an integer amount in the currency's major unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: i64,
    pub currency: String,
}

impl Price {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

/// Canonical availability of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Available,
    Sold,
    Unknown,
}

/// A named option group exposed on a detail page, e.g. color or size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantGroup {
    pub name: String,
    pub values: Vec<String>,
}

/// One concrete combination of option values.
///
/// `option_values` maps group name to the chosen value. Pages without any
/// variant structure still yield one synthesized variant so downstream
/// consumers see a uniform shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub option_values: BTreeMap<String, String>,
    pub sku: Option<String>,
    pub price: Option<Price>,
}

/// How a field resolved against the selector fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOutcome {
    /// The selector at this index produced the value.
    Matched(usize),
    /// A selector matched but the value did not parse; the field was
    /// downgraded to empty rather than failing the item.
    ParseFailed(usize),
    /// Every selector in the chain came up empty.
    NotFound,
}

/// One fully assembled product record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub url: String,
    pub title: String,
    pub price: Option<Price>,
    pub description: String,
    pub condition: Option<String>,
    /// Image URLs in page order; the first is the primary image.
    pub images: Vec<String>,
    pub status: ItemStatus,
    pub variant_groups: Vec<VariantGroup>,
    pub variants: Vec<Variant>,
    /// Per-field selector outcome, keyed by field name.
    pub diagnostics: BTreeMap<String, FieldOutcome>,
}

impl ScrapedItem {
    /// True when every mandatory field resolved: a title, and a price either
    /// on the item or on at least one variant.
    pub fn has_mandatory_fields(&self) -> bool {
        !self.title.is_empty()
            && (self.price.is_some() || self.variants.iter().any(|v| v.price.is_some()))
    }
}

/// What a scrape job points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobTarget {
    /// A search or listing page to collect item URLs from.
    SearchPage(String),
    /// An explicit list of item detail URLs.
    ItemUrls(Vec<String>),
}

/// A single scrape job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    /// Site key into the selector snapshot.
    pub site: String,
    pub target: JobTarget,
    /// Cap on collected item URLs from a listing page.
    pub max_items: usize,
    /// Cap on scroll-to-load iterations on the listing page.
    pub max_scroll: u32,
    /// Worker cap for the item fan-out; clamped to the pool size.
    pub concurrency_limit: usize,
    /// Render deadline for a single page navigation.
    pub per_item_timeout: Duration,
    /// Transient-failure retries per item (attempts = retries + 1).
    pub max_retries: u32,
    /// Overall deadline; in-flight items at expiry are recorded as cancelled.
    pub job_timeout: Option<Duration>,
}

impl ScrapeJob {
    /// Job that collects item URLs from a search page first.
    pub fn search(site: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_target(site, JobTarget::SearchPage(url.into()))
    }

    /// Job over an explicit URL list, skipping listing collection.
    pub fn items(site: impl Into<String>, urls: Vec<String>) -> Self {
        Self::with_target(site, JobTarget::ItemUrls(urls))
    }

    fn with_target(site: impl Into<String>, target: JobTarget) -> Self {
        Self {
            site: site.into(),
            target,
            max_items: 30,
            max_scroll: 5,
            concurrency_limit: 4,
            per_item_timeout: Duration::from_secs(20),
            max_retries: 2,
            job_timeout: None,
        }
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = n;
        self
    }

    pub fn max_scroll(mut self, n: u32) -> Self {
        self.max_scroll = n;
        self
    }

    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.concurrency_limit = n;
        self
    }

    pub fn per_item_timeout(mut self, t: Duration) -> Self {
        self.per_item_timeout = t;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn job_timeout(mut self, t: Duration) -> Self {
        self.job_timeout = Some(t);
        self
    }
}

/// Why an item ended up in the failure list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RenderTimeout,
    PoolTimeout,
    NotFound,
    SessionCrash,
    Cancelled,
    Driver,
}

impl From<&ScrapeError> for FailureKind {
    fn from(err: &ScrapeError) -> Self {
        match err {
            ScrapeError::RenderTimeout { .. } => FailureKind::RenderTimeout,
            ScrapeError::PoolTimeout(_) => FailureKind::PoolTimeout,
            ScrapeError::NotFound { .. } => FailureKind::NotFound,
            ScrapeError::SessionCrash(_) => FailureKind::SessionCrash,
            ScrapeError::Cancelled => FailureKind::Cancelled,
            ScrapeError::StaleElement(_) | ScrapeError::Driver(_) | ScrapeError::Config(_) => {
                FailureKind::Driver
            }
        }
    }
}

/// A URL the job could not turn into an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub url: String,
    pub kind: FailureKind,
    pub attempts: u32,
}

/// Aggregated outcome of one job, in input URL order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub items: Vec<ScrapedItem>,
    pub failures: Vec<ItemFailure>,
    /// Items with all mandatory fields over attempted URLs.
    pub success_rate: f64,
    pub health: HealthReport,
}
