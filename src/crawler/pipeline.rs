//! Run pipeline
//!
//! Drives one run: a bounded pool of workers pulls targets from the plan,
//! resolves them to working URLs, fetches listing and detail pages through
//! the cascade, extracts records and hands new ones to the ingestion API in
//! batches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ RunPlan  │──▶│ target chan │──▶│ Worker 1..N              │──▶│  outbox  │──▶ ingest
//! │ targets  │   └─────────────┘   │ resolve → fetch → extract│   │ (batches)│
//! └──────────┘                     │ → dedup                  │   └──────────┘
//!                                  └────────────┬─────────────┘
//!                                               ▼
//!                                       ┌──────────────┐
//!                                       │   Results    │
//!                                       │  Collector   │
//!                                       └──────────────┘
//! ```
//!
//! Stop conditions (runtime, early exit, URL cap) are checked between work
//! units; in-flight fetches are never cut short.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::browser::BrowserDriver;
use super::extract::ExtractionAdapter;
use super::orchestrator::Orchestrator;
use crate::config::Config;
use crate::dedup::{self, Deduplicator, SeenTodayStore};
use crate::discovery::homepage::extract_links;
use crate::discovery::sitemap::is_detail_like;
use crate::discovery::{DetailUrlBuffer, DiscoveryCache, SearchTerms, UrlDiscovery, XhrEndpointCache};
use crate::error::Error;
use crate::ingest::{validate_for_upsert, IngestClient};
use crate::metrics::{self, MeteredResource, UsageSnapshot};
use crate::models::{CrawlTarget, FetchResult, JobRecord};
use crate::ratelimit::RateLimiter;
use crate::scheduler::{should_stop, CrawlHistory, RunPlan};
use crate::storage::StateFile;
use crate::utils::error::IngestError;
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Configuration
// ============================================================================

/// Listing pages fetched per target
const MAX_LISTING_PAGES: usize = 4;

/// Buffered detail pages fetched per target
const MAX_DETAIL_PAGES: usize = 160;
const TEST_MODE_DETAIL_PAGES: usize = 10;

/// Slot queries handed to web search per target
const SEARCH_QUERIES_PER_TARGET: usize = 3;

/// Pipeline settings derived from [`Config`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub channel_buffer_size: usize,
    pub max_listing_pages: usize,
    pub max_detail_pages: usize,
    pub batch_size: usize,
    pub max_urls: Option<usize>,
    pub max_targets: Option<usize>,
    pub max_runtime: chrono::Duration,
    pub min_jobs_for_early_exit: u64,
    pub ingest_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_buffer_size: 100,
            max_listing_pages: MAX_LISTING_PAGES,
            max_detail_pages: MAX_DETAIL_PAGES,
            batch_size: 100,
            max_urls: None,
            max_targets: None,
            max_runtime: chrono::Duration::minutes(30),
            min_jobs_for_early_exit: 100,
            ingest_retries: 3,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.crawler.workers.max(1),
            max_detail_pages: if config.run.test_mode {
                TEST_MODE_DETAIL_PAGES
            } else {
                MAX_DETAIL_PAGES
            },
            batch_size: config.ingest.batch_size.max(1),
            max_urls: config.run.max_urls,
            max_targets: config.effective_max_targets(),
            max_runtime: chrono::Duration::minutes(config.run.max_runtime_mins as i64),
            min_jobs_for_early_exit: config.run.min_jobs_for_early_exit,
            ..Default::default()
        }
    }
}

// ============================================================================
// Run Context
// ============================================================================

/// Everything shared by the workers of one run
///
/// Components are built once per process and passed to workers explicitly;
/// nothing here is module-level state.
pub struct RunContext {
    pub config: Config,
    pub limiter: Arc<RateLimiter>,
    pub orchestrator: Arc<Orchestrator>,
    pub discovery: Arc<UrlDiscovery>,
    pub dedup: Arc<Deduplicator>,
    pub ingest: Option<IngestClient>,
    pub history: Arc<CrawlHistory>,
    discovery_cache: Arc<DiscoveryCache>,
    detail_buffer: Arc<DetailUrlBuffer>,
    search_quota: Arc<MeteredResource>,
    suggest_usage: Arc<MeteredResource>,
}

impl RunContext {
    /// Build the standard context from configuration
    ///
    /// Persisted state is read from `run.state_dir`: the same-day dedup
    /// store and crawl history unless `run.dry_run` is set, the discovery
    /// cache and detail buffer when `discovery.persist_cache` is set.
    ///
    /// # Errors
    ///
    /// - `Error::Config` for invalid configuration
    /// - `Error::Fetch`, `Error::Discovery` or `Error::Ingest` when a client
    ///   cannot be created
    pub fn from_config(
        config: Config,
        driver: Option<Arc<dyn BrowserDriver>>,
        today: NaiveDate,
    ) -> crate::error::Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(format!("{e:#}")))?;

        let state_dir = config.run.state_dir.clone();
        let ttl = Duration::from_secs(config.discovery.cache_ttl_secs);

        let (discovery_cache, detail_buffer) = if config.discovery.persist_cache {
            (
                DiscoveryCache::persistent(ttl, StateFile::in_dir(&state_dir, "discovery-cache.json")),
                DetailUrlBuffer::persistent(
                    config.discovery.detail_buffer_cap,
                    StateFile::in_dir(&state_dir, "detail-urls.json"),
                ),
            )
        } else {
            (
                DiscoveryCache::new(ttl),
                DetailUrlBuffer::new(config.discovery.detail_buffer_cap),
            )
        };
        let discovery_cache = Arc::new(discovery_cache);
        let detail_buffer = Arc::new(detail_buffer);
        let xhr_cache = Arc::new(XhrEndpointCache::new());

        let limiter = Arc::new(RateLimiter::new(
            &config.rate_limit,
            config.crawler.max_concurrent_requests,
        ));
        let orchestrator = Arc::new(
            Orchestrator::from_config(
                &config,
                Arc::clone(&limiter),
                driver,
                Arc::clone(&xhr_cache),
                Arc::clone(&detail_buffer),
            )?,
        );

        let search_quota = Arc::new(MeteredResource::new("searches", config.effective_max_searches()));
        let suggest_usage = Arc::new(MeteredResource::unlimited("suggestions"));
        let discovery = Arc::new(
            UrlDiscovery::from_config(
                &config,
                Arc::clone(&orchestrator),
                Arc::clone(&discovery_cache),
                xhr_cache,
                Arc::clone(&detail_buffer),
                Arc::clone(&search_quota),
                Arc::clone(&suggest_usage),
            )?,
        );

        // Dry runs read nothing that later runs depend on and write nothing back
        let (store, history) = if config.run.dry_run {
            (
                SeenTodayStore::in_memory(today),
                CrawlHistory::new(config.recrawl_after()),
            )
        } else {
            (
                SeenTodayStore::load(StateFile::in_dir(&state_dir, "seen-today.json"), today),
                CrawlHistory::persistent(
                    config.recrawl_after(),
                    StateFile::in_dir(&state_dir, "crawl-history.json"),
                ),
            )
        };
        let dedup = Arc::new(Deduplicator::with_store(store));
        let history = Arc::new(history);

        let ingest = match config.ingest.secret.as_deref() {
            Some(secret) if !secret.is_empty() => {
                Some(IngestClient::new(&config.ingest)?)
            }
            _ => {
                info!("No ingest secret configured, records will not be sent");
                None
            }
        };

        Ok(Self {
            config,
            limiter,
            orchestrator,
            discovery,
            dedup,
            ingest,
            history,
            discovery_cache,
            detail_buffer,
            search_quota,
            suggest_usage,
        })
    }

    /// Assemble a context from prebuilt parts (in-memory state only)
    pub fn from_parts(
        config: Config,
        limiter: Arc<RateLimiter>,
        orchestrator: Arc<Orchestrator>,
        discovery_cache: Arc<DiscoveryCache>,
        detail_buffer: Arc<DetailUrlBuffer>,
        discovery: Arc<UrlDiscovery>,
        dedup: Arc<Deduplicator>,
    ) -> Self {
        let history = Arc::new(CrawlHistory::new(config.recrawl_after()));
        Self {
            config,
            limiter,
            orchestrator,
            discovery,
            dedup,
            ingest: None,
            history,
            discovery_cache,
            detail_buffer,
            search_quota: Arc::new(MeteredResource::unlimited("searches")),
            suggest_usage: Arc::new(MeteredResource::unlimited("suggestions")),
        }
    }

    pub fn with_ingest(mut self, ingest: IngestClient) -> Self {
        self.ingest = Some(ingest);
        self
    }

    /// Quota usage of the metered providers
    pub fn usage(&self) -> Vec<UsageSnapshot> {
        vec![self.search_quota.snapshot(), self.suggest_usage.snapshot()]
    }

    /// Write cross-run state; every store is attempted even if one fails
    ///
    /// # Errors
    ///
    /// Returns the last write error
    pub fn persist_state(&self) -> Result<()> {
        let mut last_error = None;

        if let Err(e) = self.dedup.flush() {
            warn!(error = %e, "Failed to save seen-today store");
            last_error = Some(e);
        }
        if let Err(e) = self.discovery_cache.flush() {
            warn!(error = %e, "Failed to save discovery cache");
            last_error = Some(e);
        }
        if let Err(e) = self.detail_buffer.flush() {
            warn!(error = %e, "Failed to save detail URL buffer");
            last_error = Some(e);
        }
        if let Err(e) = self.history.flush() {
            warn!(error = %e, "Failed to save crawl history");
            last_error = Some(e);
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop accepting fetches; waiting acquisitions fail fast
    pub fn shutdown(&self) {
        self.limiter.close();
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Unit of work for a worker
#[derive(Debug, Clone)]
struct TargetJob {
    target: CrawlTarget,
    job_id: u64,
}

/// Outcome reported by a worker
#[derive(Debug)]
enum TargetResult {
    Done {
        job_id: u64,
        target_id: String,
        urls: usize,
        emitted: usize,
    },
    Unresolved {
        job_id: u64,
        target_id: String,
    },
    Skipped {
        job_id: u64,
        target_id: String,
        reason: &'static str,
    },
}

// ============================================================================
// Statistics
// ============================================================================

/// Live counters for a run
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub targets: AtomicU64,
    pub unresolved: AtomicU64,
    pub skipped: AtomicU64,
    pub urls_fetched: AtomicU64,
    pub records_emitted: AtomicU64,
    pub duplicates: AtomicU64,
    pub out_of_window: AtomicU64,
    pub failures: AtomicU64,
    pub ingested: AtomicU64,
    pub ingest_failures: AtomicU64,
    pub invalid: AtomicU64,
    pub not_due: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            targets: self.targets.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            urls_fetched: self.urls_fetched.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            out_of_window: self.out_of_window.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            ingest_failures: self.ingest_failures.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            not_due: self.not_due.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Snapshot of run statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub targets: u64,
    pub unresolved: u64,
    pub skipped: u64,
    pub urls_fetched: u64,
    pub records_emitted: u64,
    pub duplicates: u64,
    pub out_of_window: u64,
    pub failures: u64,
    pub ingested: u64,
    pub ingest_failures: u64,
    /// Records rejected by upsert validation
    pub invalid: u64,
    /// URLs held back because they were crawled recently
    pub not_due: u64,
}

impl StatsSnapshot {
    /// Share of extracted records that were new (0.0 - 1.0)
    pub fn novelty_rate(&self) -> f64 {
        let total = self.records_emitted + self.duplicates;
        if total == 0 {
            return 0.0;
        }
        self.records_emitted as f64 / total as f64
    }
}

// ============================================================================
// Pipeline Implementation
// ============================================================================

/// State shared by the workers of one `run` call
struct RunShared {
    context: Arc<RunContext>,
    adapter: Arc<dyn ExtractionAdapter>,
    plan: RunPlan,
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
    started: DateTime<Utc>,
    outbox: Mutex<Vec<JobRecord>>,
    unsent: Mutex<Vec<JobRecord>>,
}

impl RunShared {
    /// Whether new work units should be started
    fn should_stop(&self) -> Option<&'static str> {
        if let Some(max_urls) = self.config.max_urls {
            if self.stats.urls_fetched.load(Ordering::Relaxed) >= max_urls as u64 {
                return Some("url limit reached");
            }
        }
        let found = self.stats.records_emitted.load(Ordering::Relaxed);
        if should_stop(
            found,
            self.started,
            Utc::now(),
            self.config.max_runtime,
            self.config.min_jobs_for_early_exit,
        ) {
            return Some("run limits reached");
        }
        None
    }
}

/// Runs plans against a shared [`RunContext`]
pub struct CrawlPipeline {
    context: Arc<RunContext>,
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
    unsent: std::sync::Mutex<Vec<JobRecord>>,
}

impl CrawlPipeline {
    pub fn new(context: Arc<RunContext>) -> Self {
        let config = PipelineConfig::from_config(&context.config);
        Self::with_config(context, config)
    }

    pub fn with_config(context: Arc<RunContext>, config: PipelineConfig) -> Self {
        Self {
            context,
            config,
            stats: PipelineStats::new(),
            unsent: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Records whose ingest batch failed after retries
    pub fn take_unsent(&self) -> Vec<JobRecord> {
        std::mem::take(&mut *self.unsent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Run a plan to completion or until a stop condition
    ///
    /// Failures of single targets or URLs are counted, never fatal.
    ///
    /// # Errors
    ///
    /// Returns an error only if the worker pool cannot be driven
    pub async fn run(&self, plan: &RunPlan, adapter: Arc<dyn ExtractionAdapter>) -> Result<StatsSnapshot> {
        let mut targets = plan.targets();
        if let Some(cap) = self.config.max_targets {
            if targets.len() > cap {
                debug!(planned = targets.len(), cap, "Target list capped");
                targets.truncate(cap);
            }
        }
        let total = targets.len();

        info!(
            slot = plan.slot.index,
            slot_name = plan.slot.definition.name,
            backlog = plan.backlog,
            targets = total,
            workers = self.config.workers,
            "Starting run"
        );
        metrics::update_run_state(true, Some(plan.slot.index));

        let shared = Arc::new(RunShared {
            context: Arc::clone(&self.context),
            adapter,
            plan: plan.clone(),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            started: Utc::now(),
            outbox: Mutex::new(Vec::new()),
            unsent: Mutex::new(Vec::new()),
        });

        let (job_tx, job_rx) = mpsc::channel::<TargetJob>(self.config.channel_buffer_size);
        let (result_tx, mut result_rx) = mpsc::channel::<TargetResult>(self.config.channel_buffer_size);

        let handles = spawn_workers(&shared, job_rx, result_tx.clone());

        let stats = Arc::clone(&self.stats);
        let collector = tokio::spawn(async move {
            while let Some(result) = result_rx.recv().await {
                match result {
                    TargetResult::Done {
                        job_id,
                        target_id,
                        urls,
                        emitted,
                    } => {
                        bump(&stats.targets, 1);
                        info!(job_id, target = %target_id, urls, emitted, "Target done");
                    }
                    TargetResult::Unresolved { job_id, target_id } => {
                        bump(&stats.unresolved, 1);
                        warn!(job_id, target = %target_id, "Target temporarily unresolvable");
                    }
                    TargetResult::Skipped {
                        job_id,
                        target_id,
                        reason,
                    } => {
                        bump(&stats.skipped, 1);
                        debug!(job_id, target = %target_id, reason, "Target skipped");
                    }
                }
            }
        });

        for (idx, target) in targets.into_iter().enumerate() {
            let job = TargetJob {
                target,
                job_id: idx as u64,
            };
            if job_tx.send(job).await.is_err() {
                warn!("Target channel closed");
                break;
            }
        }
        drop(job_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task failed");
            }
        }
        drop(result_tx);
        collector.await.context("Result collector failed")?;

        flush_outbox(&shared, true).await;
        let failed = std::mem::take(&mut *shared.unsent.lock().await);
        self.unsent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(failed);

        metrics::update_run_state(false, None);
        let snapshot = self.stats.snapshot();
        info!(
            targets = snapshot.targets,
            unresolved = snapshot.unresolved,
            skipped = snapshot.skipped,
            urls = snapshot.urls_fetched,
            emitted = snapshot.records_emitted,
            duplicates = snapshot.duplicates,
            failures = snapshot.failures,
            ingested = snapshot.ingested,
            invalid = snapshot.invalid,
            "Run completed"
        );

        Ok(snapshot)
    }
}

fn spawn_workers(
    shared: &Arc<RunShared>,
    job_rx: mpsc::Receiver<TargetJob>,
    result_tx: mpsc::Sender<TargetResult>,
) -> Vec<JoinHandle<()>> {
    let job_rx = Arc::new(Mutex::new(job_rx));
    let mut handles = Vec::with_capacity(shared.config.workers);

    for worker_id in 0..shared.config.workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let shared = Arc::clone(shared);

        handles.push(tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = job_rx.lock().await;
                    rx.recv().await
                };
                let Some(job) = job else {
                    break;
                };

                debug!(worker_id, job_id = job.job_id, target = %job.target.id, "Processing target");
                let result = process_target(&shared, job).await;

                if result_tx.send(result).await.is_err() {
                    warn!(worker_id, "Result channel closed");
                    break;
                }
            }
        }));
    }

    handles
}

async fn process_target(shared: &RunShared, job: TargetJob) -> TargetResult {
    let TargetJob { target, job_id } = job;

    if let Some(reason) = shared.should_stop() {
        return TargetResult::Skipped {
            job_id,
            target_id: target.id,
            reason,
        };
    }

    let terms = SearchTerms::new(
        shared.plan.search_queries(&target.id, SEARCH_QUERIES_PER_TARGET),
        shared.plan.pages_per_query(),
    );
    let listing = shared.context.discovery.resolve_with(&target, &terms).await;
    if listing.is_empty() {
        return TargetResult::Unresolved {
            job_id,
            target_id: target.id,
        };
    }

    let mut fetched: HashSet<String> = HashSet::new();
    let mut emitted = 0usize;

    let listing = due_urls(shared, listing, shared.config.max_listing_pages);
    for url in &listing {
        if shared.should_stop().is_some() {
            break;
        }
        if !fetched.insert(url.clone()) {
            continue;
        }
        if let Some(page) = fetch_page(shared, url).await {
            let details: Vec<String> = extract_links(&page.body, &page.final_url)
                .into_iter()
                .map(|link| link.url)
                .filter(|u| is_detail_like(u))
                .collect();
            shared.context.discovery.register_detail_urls(&target, details);
            emitted += handle_page(shared, &page, &target).await;
        }
    }

    let details: Vec<String> = shared
        .context
        .discovery
        .detail_urls(&target)
        .into_iter()
        .filter(|u| !fetched.contains(u))
        .collect();
    let details = due_urls(shared, details, shared.config.max_detail_pages);
    for url in details {
        if shared.should_stop().is_some() {
            break;
        }
        if !fetched.insert(url.clone()) {
            continue;
        }
        if let Some(page) = fetch_page(shared, &url).await {
            emitted += handle_page(shared, &page, &target).await;
        }
    }

    TargetResult::Done {
        job_id,
        target_id: target.id,
        urls: fetched.len(),
        emitted,
    }
}

/// Drop recently crawled URLs, order the rest by priority, keep `limit`
fn due_urls(shared: &RunShared, urls: Vec<String>, limit: usize) -> Vec<String> {
    let (mut due, fresh) = shared.context.history.due(urls, Utc::now());
    if fresh > 0 {
        bump(&shared.stats.not_due, fresh as u64);
        debug!(fresh, "Recently crawled URLs held back");
    }
    due.truncate(limit);
    due
}

async fn fetch_page(shared: &RunShared, url: &str) -> Option<FetchResult> {
    let history = &shared.context.history;
    match shared.context.orchestrator.fetch_default(url).await {
        Ok(page) => {
            bump(&shared.stats.urls_fetched, 1);
            let last_modified = page
                .header("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|dt| dt.with_timezone(&Utc));
            history.record_success(url, last_modified, Utc::now());
            Some(page)
        }
        Err(e) => {
            bump(&shared.stats.failures, 1);
            warn!(url = %url, error = %e, "Fetch failed");
            history.record_error(url, e.to_string(), Utc::now());
            None
        }
    }
}

/// Extract, filter and dedup one page; returns records emitted
async fn handle_page(shared: &RunShared, page: &FetchResult, target: &CrawlTarget) -> usize {
    let mut fresh = Vec::new();
    let mut duplicates = 0usize;

    for mut record in shared.adapter.extract(page, target) {
        if !shared.plan.accepts_posted(record.posted_at.as_deref()) {
            bump(&shared.stats.out_of_window, 1);
            continue;
        }
        dedup::stamp(&mut record);
        if shared.context.dedup.should_emit(&record) {
            fresh.push(record);
        } else {
            duplicates += 1;
        }
    }

    let emitted = fresh.len();
    bump(&shared.stats.records_emitted, emitted as u64);
    bump(&shared.stats.duplicates, duplicates as u64);
    metrics::record_dedup_results(emitted, duplicates);

    if emitted > 0 {
        shared.outbox.lock().await.extend(fresh);
        flush_outbox(shared, false).await;
    }
    emitted
}

/// Send full batches, or everything when `force` is set
async fn flush_outbox(shared: &RunShared, force: bool) {
    loop {
        let batch: Vec<JobRecord> = {
            let mut outbox = shared.outbox.lock().await;
            let size = shared.config.batch_size;
            if outbox.is_empty() || (!force && outbox.len() < size) {
                return;
            }
            let take = outbox.len().min(size);
            outbox.drain(..take).collect()
        };
        send_batch(shared, batch).await;
    }
}

async fn send_batch(shared: &RunShared, batch: Vec<JobRecord>) {
    let Some(client) = &shared.context.ingest else {
        debug!(batch = batch.len(), "Dry run, batch not sent");
        return;
    };

    let mut valid = Vec::with_capacity(batch.len());
    for record in batch {
        match validate_for_upsert(&record) {
            Ok(()) => valid.push(record),
            Err(e) => {
                bump(&shared.stats.invalid, 1);
                warn!(title = %record.title, url = %record.apply_url, error = %e, "Record rejected before ingest");
            }
        }
    }
    let (batch, dropped) = dedup::dedup_batch(valid);
    if dropped > 0 {
        debug!(dropped, "Batch duplicates removed");
    }
    if batch.is_empty() {
        return;
    }

    let retry = RetryConfig::new(shared.config.ingest_retries);
    let records = &batch;
    let result = with_retry_if(
        &retry,
        || async move { client.upsert(records).await.map_err(anyhow::Error::from) },
        |e| {
            e.downcast_ref::<IngestError>()
                .is_some_and(IngestError::is_recoverable)
        },
    )
    .await;

    match result {
        Ok(count) => {
            bump(&shared.stats.ingested, count as u64);
            metrics::record_ingest(count, false);
        }
        Err(e) => {
            warn!(batch = batch.len(), error = %e, "Ingest batch failed");
            bump(&shared.stats.ingest_failures, batch.len() as u64);
            metrics::record_ingest(batch.len(), true);
            shared.unsent.lock().await.extend(batch);
        }
    }
}
