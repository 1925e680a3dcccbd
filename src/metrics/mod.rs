//! Prometheus metrics and quota metering for the harvesting engine
//!
//! This module provides:
//! - Prometheus counters/histograms for fetch attempts, rate-limit waits,
//!   discovery, deduplication and ingestion
//! - [`MeteredResource`]: an explicit usage counter for quota-consuming calls
//!   (search API, suggestion service), injected where the calls happen
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

mod usage;

pub use usage::{MeteredResource, UsageSnapshot};

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all harvester metrics
struct HarvestMetrics {
    fetch_attempts: CounterVec,
    fetch_duration: HistogramVec,
    rate_limit_wait: HistogramVec,
    discovery_urls: CounterVec,
    discovery_cache: CounterVec,
    dedup: CounterVec,
    ingest: CounterVec,
    run_slot: Gauge,
    is_running: Gauge,
}

/// Global storage for harvester metrics
static HARVEST_METRICS: OnceLock<HarvestMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = jobharvest::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = HarvestMetrics {
        fetch_attempts: register_counter_vec!(
            "jobharvest_fetch_attempts_total",
            "Fetch attempts by strategy and outcome",
            &["strategy", "outcome"]
        )?,
        fetch_duration: register_histogram_vec!(
            "jobharvest_fetch_duration_seconds",
            "Time spent in a single fetch attempt",
            &["strategy"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        rate_limit_wait: register_histogram_vec!(
            "jobharvest_rate_limit_wait_seconds",
            "Time spent waiting for a rate-limit permit",
            &["class"],
            vec![0.0, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
        )?,
        discovery_urls: register_counter_vec!(
            "jobharvest_discovery_urls_total",
            "Validated URLs by discovery source",
            &["source"]
        )?,
        discovery_cache: register_counter_vec!(
            "jobharvest_discovery_cache_total",
            "Discovery cache lookups",
            &["result"]
        )?,
        dedup: register_counter_vec!(
            "jobharvest_dedup_total",
            "Deduplication decisions",
            &["decision"]
        )?,
        ingest: register_counter_vec!(
            "jobharvest_ingest_records_total",
            "Records pushed to the ingestion API",
            &["outcome"]
        )?,
        run_slot: register_gauge!("jobharvest_run_slot", "Run slot selected for this invocation")?,
        is_running: register_gauge!(
            "jobharvest_is_running",
            "Whether a harvest run is in progress (1 = yes, 0 = no)"
        )?,
    };

    HARVEST_METRICS
        .set(metrics)
        .map_err(|_| "Harvest metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    HARVEST_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one fetch attempt
pub fn record_fetch_attempt(strategy: &str, outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.fetch_attempts
            .with_label_values(&[strategy, outcome])
            .inc();
    }
}

/// Record time spent waiting for a rate-limit permit
pub fn observe_rate_limit_wait(class: &str, secs: f64) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.rate_limit_wait.with_label_values(&[class]).observe(secs);
    }
}

/// Record validated URLs contributed by a discovery source
pub fn record_discovery(source: &str, count: usize) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    if count > 0 {
        m.discovery_urls
            .with_label_values(&[source])
            .inc_by(count as f64);
    }
}

/// Record a discovery cache lookup
pub fn record_discovery_cache(hit: bool) {
    if let Some(m) = HARVEST_METRICS.get() {
        let result = if hit { "hit" } else { "miss" };
        m.discovery_cache.with_label_values(&[result]).inc();
    }
}

/// Record deduplication results
pub fn record_dedup_results(emitted: usize, duplicates: usize) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    if emitted > 0 {
        m.dedup
            .with_label_values(&["emitted"])
            .inc_by(emitted as f64);
    }
    if duplicates > 0 {
        m.dedup
            .with_label_values(&["duplicate"])
            .inc_by(duplicates as f64);
    }
}

/// Record an ingestion batch
pub fn record_ingest(count: usize, failed: bool) {
    if let Some(m) = HARVEST_METRICS.get() {
        let outcome = if failed { "failed" } else { "accepted" };
        m.ingest
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

/// Update run state
pub fn update_run_state(is_running: bool, slot: Option<usize>) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    m.is_running.set(if is_running { 1.0 } else { 0.0 });
    if let Some(slot) = slot {
        m.run_slot.set(slot as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a fetch timer for a strategy
pub fn start_fetch_timer(strategy: &str) -> MetricsTimer {
    match HARVEST_METRICS.get() {
        Some(m) => MetricsTimer::new(m.fetch_duration.with_label_values(&[strategy]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok());

        // Second call should also be Ok (idempotent)
        let result2 = init_metrics();
        assert!(result2.is_ok());
    }

    #[test]
    fn test_metrics_initialized() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_fetch_attempt("direct", "success");
        let text = encode_metrics().unwrap();
        assert!(text.contains("jobharvest_") || text.is_empty());
    }

    #[test]
    fn test_recorders_do_not_panic() {
        ensure_metrics_initialized();
        record_fetch_attempt("proxy", "blocked");
        observe_rate_limit_wait("job_board", 2.0);
        record_discovery("sitemap", 3);
        record_discovery_cache(true);
        record_dedup_results(10, 2);
        record_ingest(10, false);
        update_run_state(true, Some(4));
        let _timer = start_fetch_timer("direct");
    }
}
