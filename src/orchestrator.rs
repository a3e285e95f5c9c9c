//! Top-level job coordination.
//!
//! A job runs as an explicit pipeline: collect candidate URLs (single
//! session, sequential), then fan the detail fetches out across bounded
//! workers that each lease their own session per attempt. Results are slotted
//! by input position, so output order never depends on which worker finished
//! first.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::browser::pool::BrowserSessionPool;
use crate::error::ScrapeError;
use crate::fetch::PageFetcher;
use crate::health;
use crate::item::ItemAssembler;
use crate::listing::ListingCollector;
use crate::metrics::JobMetrics;
use crate::models::{FailureKind, ItemFailure, JobTarget, ScrapeJob, ScrapeResult, ScrapedItem};
use crate::retry::RetryPolicy;
use crate::selectors::SelectorSnapshot;

/// Orchestrator-level knobs independent of any single job.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a worker waits for a pool session before giving up.
    pub acquire_timeout: Duration,
    /// Success-rate floor for the health flag.
    pub warn_threshold: f64,
    /// First retry delay; doubles per attempt up to `max_backoff`.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            acquire_timeout: Duration::from_secs(30),
            warn_threshold: health::DEFAULT_WARN_THRESHOLD,
            base_backoff: retry.base_backoff,
            max_backoff: retry.max_backoff,
        }
    }
}

/// Coordinates listing collection, item fan-out, and result aggregation.
pub struct ScrapeOrchestrator {
    pool: Arc<BrowserSessionPool>,
    assembler: ItemAssembler,
    collector: ListingCollector,
    config: OrchestratorConfig,
}

impl ScrapeOrchestrator {
    pub fn new(pool: BrowserSessionPool) -> Self {
        Self::with_config(pool, PageFetcher::new(), OrchestratorConfig::default())
    }

    pub fn with_config(
        pool: BrowserSessionPool,
        fetcher: PageFetcher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool: Arc::new(pool),
            assembler: ItemAssembler::new(fetcher.clone()),
            collector: ListingCollector::new(fetcher),
            config,
        }
    }

    /// Run one job to completion against an immutable selector snapshot.
    ///
    /// Item failures land in the result's failure list; only an unknown site
    /// (a configuration problem) errors the call itself. A job with zero
    /// successes still returns a well-formed result.
    pub async fn run(
        &self,
        job: &ScrapeJob,
        snapshot: Arc<SelectorSnapshot>,
    ) -> Result<ScrapeResult, ScrapeError> {
        if snapshot.site(&job.site).is_none() {
            return Err(ScrapeError::Config(format!(
                "no selector rules for site `{}`",
                job.site
            )));
        }

        let mode = match job.target {
            JobTarget::SearchPage(_) => "search",
            JobTarget::ItemUrls(_) => "single",
        };
        let mut metrics = JobMetrics::start(&job.site, mode);

        let urls = match &job.target {
            JobTarget::SearchPage(search_url) => {
                match self.collect_listing(job, &snapshot, search_url).await {
                    Ok(urls) => urls,
                    Err(err) => {
                        // The listing page itself failed; the job still
                        // returns a result so callers can see the failure.
                        metrics.record_failure(search_url, &err.to_string());
                        let failures = vec![ItemFailure {
                            url: search_url.clone(),
                            kind: FailureKind::from(&err),
                            attempts: 1,
                        }];
                        let (success_rate, health) =
                            health::evaluate(&[], 0, self.config.warn_threshold);
                        metrics.finish();
                        return Ok(ScrapeResult {
                            items: Vec::new(),
                            failures,
                            success_rate,
                            health,
                        });
                    }
                }
            }
            JobTarget::ItemUrls(urls) => urls.clone(),
        };

        let outcome = self.fan_out(job, &snapshot, urls).await;
        let attempted = outcome.len();

        let mut items = Vec::new();
        let mut failures = Vec::new();
        for (url, result) in outcome {
            match result {
                Ok(item) => {
                    metrics.record_success(&url);
                    items.push(item);
                }
                Err((kind, attempts)) => {
                    metrics.record_failure(&url, &format!("{kind:?}"));
                    failures.push(ItemFailure {
                        url,
                        kind,
                        attempts,
                    });
                }
            }
        }

        let (success_rate, health) =
            health::evaluate(&items, attempted, self.config.warn_threshold);
        metrics.finish();

        Ok(ScrapeResult {
            items,
            failures,
            success_rate,
            health,
        })
    }

    /// Listing collection on one exclusively leased session, released before
    /// the item fan-out begins.
    async fn collect_listing(
        &self,
        job: &ScrapeJob,
        snapshot: &SelectorSnapshot,
        search_url: &str,
    ) -> Result<Vec<String>, ScrapeError> {
        let rules = snapshot.site(&job.site).expect("site validated at job start");
        let mut lease = self.pool.acquire(self.config.acquire_timeout).await?;
        let result = self
            .collector
            .collect(
                &mut lease,
                rules,
                search_url,
                job.max_items,
                job.max_scroll,
                job.per_item_timeout,
            )
            .await;
        if matches!(result, Err(ScrapeError::SessionCrash(_))) {
            lease.mark_crashed();
        }
        result
    }

    /// Fan item fetches out under the politeness limit, preserving input
    /// order in the output regardless of completion order.
    async fn fan_out(
        &self,
        job: &ScrapeJob,
        snapshot: &Arc<SelectorSnapshot>,
        urls: Vec<String>,
    ) -> Vec<(String, Result<ScrapedItem, (FailureKind, u32)>)> {
        let limit = job.concurrency_limit.clamp(1, self.pool.capacity());
        let semaphore = Arc::new(Semaphore::new(limit));
        let policy = RetryPolicy {
            max_retries: job.max_retries,
            base_backoff: self.config.base_backoff,
            max_backoff: self.config.max_backoff,
        };

        let attempt_counters: Vec<Arc<AtomicU32>> =
            urls.iter().map(|_| Arc::new(AtomicU32::new(0))).collect();

        let mut handles = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let pool = Arc::clone(&self.pool);
            let assembler = self.assembler.clone();
            let snapshot = Arc::clone(snapshot);
            let site = job.site.clone();
            let policy = policy.clone();
            let acquire_timeout = self.config.acquire_timeout;
            let per_item_timeout = job.per_item_timeout;
            let attempts = Arc::clone(&attempt_counters[index]);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");
                fetch_item(
                    pool,
                    assembler,
                    snapshot,
                    site,
                    url,
                    policy,
                    acquire_timeout,
                    per_item_timeout,
                    attempts,
                )
                .await
            }));
        }

        let deadline = job.job_timeout.map(|t| tokio::time::Instant::now() + t);
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut timed_out = false;

        let mut results = Vec::with_capacity(urls.len());
        for (index, mut handle) in handles.into_iter().enumerate() {
            let joined = match deadline {
                Some(d) if !timed_out => match tokio::time::timeout_at(d, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        timed_out = true;
                        info!("job timeout elapsed; cancelling outstanding fetches");
                        for abort in &abort_handles {
                            abort.abort();
                        }
                        handle.await
                    }
                },
                _ => handle.await,
            };

            let url = urls[index].clone();
            let result = match joined {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err((
                    FailureKind::Cancelled,
                    attempt_counters[index].load(Ordering::Relaxed),
                )),
                Err(err) => std::panic::resume_unwind(err.into_panic()),
            };
            results.push((url, result));
        }
        results
    }
}

/// One worker: lease a session per attempt, assemble the item, and retry
/// transient failures with backoff. A crashed session is flagged so the pool
/// replaces it and the retry runs on a fresh one.
#[allow(clippy::too_many_arguments)]
async fn fetch_item(
    pool: Arc<BrowserSessionPool>,
    assembler: ItemAssembler,
    snapshot: Arc<SelectorSnapshot>,
    site: String,
    url: String,
    policy: RetryPolicy,
    acquire_timeout: Duration,
    per_item_timeout: Duration,
    attempts: Arc<AtomicU32>,
) -> Result<ScrapedItem, (FailureKind, u32)> {
    let mut attempt = 0u32;
    loop {
        attempts.store(attempt + 1, Ordering::Relaxed);

        let result = {
            let mut lease = match pool.acquire(acquire_timeout).await {
                Ok(lease) => lease,
                Err(err) => return Err((FailureKind::from(&err), attempt + 1)),
            };
            let result = assembler
                .assemble(&mut lease, &snapshot, &site, &url, per_item_timeout)
                .await;
            if matches!(result, Err(ScrapeError::SessionCrash(_))) {
                lease.mark_crashed();
            }
            result
        };

        match result {
            Ok(item) => return Ok(item),
            Err(err) => {
                if policy.should_retry(&err, attempt) {
                    debug!(url = %url, attempt, error = %err, "retrying transient failure");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                } else {
                    return Err((FailureKind::from(&err), attempt + 1));
                }
            }
        }
    }
}
