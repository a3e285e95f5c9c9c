//! Extraction health scoring.
//!
//! A scrape that "works" but comes back hollow usually means the site shipped
//! new markup and the selectors went stale. The health report turns that into
//! a signal callers can alert on instead of silently storing empty records.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::ScrapedItem;
use crate::selectors::fields;

/// Success-rate floor below which a job is flagged.
pub const DEFAULT_WARN_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthFlag {
    Ok,
    Warning,
}

/// Per-field extraction shortfall across a job's returned items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldHealth {
    pub field: String,
    pub missing: usize,
    pub total: usize,
}

/// Job-level health verdict handed to external alerting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub flag: HealthFlag,
    /// Fields missing from more than half of the returned items.
    pub degraded_fields: Vec<FieldHealth>,
}

/// Score a finished job: success rate over attempted URLs plus the per-field
/// breakdown. A job that attempted work and produced nothing is flagged;
/// that is the selector-staleness signature.
pub fn evaluate(items: &[ScrapedItem], attempted: usize, threshold: f64) -> (f64, HealthReport) {
    let complete = items.iter().filter(|i| i.has_mandatory_fields()).count();
    let success_rate = if attempted == 0 {
        0.0
    } else {
        complete as f64 / attempted as f64
    };

    let flag = if success_rate < threshold {
        HealthFlag::Warning
    } else {
        HealthFlag::Ok
    };

    let mut degraded_fields = Vec::new();
    if !items.is_empty() {
        let total = items.len();
        let checks: [(&str, Box<dyn Fn(&ScrapedItem) -> bool>); 3] = [
            (fields::TITLE, Box::new(|i: &ScrapedItem| i.title.is_empty())),
            (fields::PRICE, Box::new(|i: &ScrapedItem| i.price.is_none())),
            (fields::IMAGES, Box::new(|i: &ScrapedItem| i.images.is_empty())),
        ];
        for (field, is_missing) in checks {
            let missing = items.iter().filter(|i| is_missing(i)).count();
            if missing * 2 > total {
                degraded_fields.push(FieldHealth {
                    field: field.to_string(),
                    missing,
                    total,
                });
            }
        }
    }

    if flag == HealthFlag::Warning {
        warn!(
            success_rate,
            attempted,
            complete,
            "low scrape success rate; selectors may be stale"
        );
    }

    (success_rate, HealthReport {
        flag,
        degraded_fields,
    })
}
