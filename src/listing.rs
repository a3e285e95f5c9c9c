//! Listing-page collection: scroll, gather item links, dedupe, truncate.

use std::collections::HashSet;
use std::time::Duration;

use scraper::Html;
use tracing::debug;

use crate::browser::pool::SessionLease;
use crate::error::ScrapeError;
use crate::extract;
use crate::fetch::PageFetcher;
use crate::selectors::{fields, SiteRules};
use crate::util::normalize_url;

/// Collects candidate item URLs from search/listing pages.
#[derive(Debug, Clone, Default)]
pub struct ListingCollector {
    fetcher: PageFetcher,
}

impl ListingCollector {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self { fetcher }
    }

    /// Navigate to a listing page, scroll it out, and return up to
    /// `max_items` item URLs in first-seen page order.
    ///
    /// A listing page that renders with zero items yields an empty list, not
    /// an error; that distinction belongs to the health report.
    pub async fn collect(
        &self,
        lease: &mut SessionLease,
        rules: &SiteRules,
        search_url: &str,
        max_items: usize,
        max_scroll: u32,
        timeout: Duration,
    ) -> Result<Vec<String>, ScrapeError> {
        self.fetcher.navigate(lease, rules, search_url, timeout).await?;

        let probe = rules.field(fields::ITEM_LINKS);
        let html = self.fetcher.scroll_to_load(lease, probe, max_scroll).await?;

        let urls = extract_item_urls(rules, &html, max_items);
        debug!(
            url = search_url,
            collected = urls.len(),
            "collected listing URLs"
        );
        Ok(urls)
    }
}

/// Extract, filter, normalize, and dedupe item links from a rendered
/// listing document.
pub fn extract_item_urls(rules: &SiteRules, html: &str, max_items: usize) -> Vec<String> {
    let dom = Html::parse_document(html);

    // anchors default to their href when the selector names no attribute
    let found = extract::resolve_chain_values(rules.field(fields::ITEM_LINKS), &dom, Some("href"));
    let Some(found) = found else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for raw in found.values {
        if !rules.valid_domains.is_empty()
            && !rules.valid_domains.iter().any(|domain| raw.contains(domain.as_str()))
        {
            continue;
        }
        let url = normalize_url(&raw);
        if seen.insert(url.clone()) {
            urls.push(url);
            if urls.len() >= max_items {
                break;
            }
        }
    }
    urls
}
