//! Page navigation with render-ready polling and scroll-to-load.
//!
//! Navigation alone proves nothing on client-rendered storefronts: the
//! document arrives as an empty shell and fills in later. The fetcher polls
//! the rendered document for a marker element the site only produces after
//! hydration, and gives listing pages their scroll passes before collection.

use std::sync::OnceLock;
use std::time::Duration;

use scraper::{Html, Selector};
use tokio::time::Instant;
use tracing::debug;

use crate::browser::pool::SessionLease;
use crate::error::ScrapeError;
use crate::extract;
use crate::selectors::{fields, CompiledSelector, SiteRules};

/// Timing knobs for navigation polling and scroll settling.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Interval between render-ready checks.
    pub poll_interval: Duration,
    /// Wait after each scroll before recounting loaded items.
    pub settle_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_millis(1500),
        }
    }
}

/// Navigates leased sessions and waits out client-side rendering.
#[derive(Debug, Clone, Default)]
pub struct PageFetcher {
    config: FetcherConfig,
}

impl PageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FetcherConfig) -> Self {
        Self { config }
    }

    /// Navigate and poll until the site's render marker appears, returning
    /// the rendered document. Times out with `RenderTimeout`.
    pub async fn navigate(
        &self,
        lease: &mut SessionLease,
        rules: &SiteRules,
        url: &str,
        timeout: Duration,
    ) -> Result<String, ScrapeError> {
        lease.driver().navigate(url).await?;
        lease.record_page();

        let deadline = Instant::now() + timeout;
        loop {
            let html = lease.driver().content().await?;
            if render_ready(rules, &html) {
                return Ok(html);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ScrapeError::RenderTimeout {
                    url: url.to_string(),
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Scroll to the bottom repeatedly so lazy listings load, stopping after
    /// `max_scroll` passes or once two consecutive passes leave the
    /// probe-match count unchanged. Returns the final rendered document.
    pub async fn scroll_to_load(
        &self,
        lease: &mut SessionLease,
        probe: &[CompiledSelector],
        max_scroll: u32,
    ) -> Result<String, ScrapeError> {
        let mut html = lease.driver().content().await?;
        let mut last_count = count_probe_matches(&html, probe);
        let mut stable_passes = 0u32;

        for pass in 0..max_scroll {
            lease.driver().scroll_to_bottom().await?;
            tokio::time::sleep(self.config.settle_delay).await;

            html = lease.driver().content().await?;
            let count = count_probe_matches(&html, probe);
            debug!(pass, count, "scroll-to-load pass");

            if count == last_count {
                stable_passes += 1;
                if stable_passes >= 2 {
                    break;
                }
            } else {
                stable_passes = 0;
                last_count = count;
            }
        }

        Ok(html)
    }
}

/// True once the site's ready marker is present. Sites without a configured
/// marker fall back to plain body presence.
fn render_ready(rules: &SiteRules, html: &str) -> bool {
    let dom = Html::parse_document(html);
    let chain = rules.field(fields::READY);
    if chain.is_empty() {
        static BODY: OnceLock<Selector> = OnceLock::new();
        let body = BODY.get_or_init(|| Selector::parse("body").unwrap());
        return dom.select(body).next().is_some();
    }
    chain
        .iter()
        .any(|selector| !extract::select_document(&dom, selector).is_empty())
}

/// Matches for the first probe selector that hits anything.
fn count_probe_matches(html: &str, probe: &[CompiledSelector]) -> usize {
    let dom = Html::parse_document(html);
    probe
        .iter()
        .map(|selector| extract::select_document(&dom, selector).len())
        .find(|&n| n > 0)
        .unwrap_or(0)
}
