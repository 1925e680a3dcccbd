//! jobharvest - Crawl orchestration for job postings
//!
//! Harvests job postings from sources that range from cooperative ATS feeds
//! to sites that rate-limit, block and hide listings behind client-side
//! rendering.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`decompress`] - Response body decoding (gzip, deflate, brotli, charsets)
//! - [`ratelimit`] - Per-origin-class rate limiting with a global reservoir
//! - [`crawler`] - Fetch cascade (direct, proxy, browser) and the run pipeline
//! - [`discovery`] - Finding working listing URLs per target, with caching
//! - [`scheduler`] - Rotation slots, crawl buckets and freshness rules
//! - [`dedup`] - Identity hashing and in-run / same-day deduplication
//! - [`ingest`] - Client for the downstream ingestion API
//! - [`models`] - Core data structures and types
//! - [`storage`] - Atomic state files shared across runs
//! - [`metrics`] - Prometheus metrics and quota metering
//! - [`utils`] - Common utilities, retry helpers and domain errors
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jobharvest::config::Config;
//! use jobharvest::crawler::{CrawlPipeline, RunContext, StructuredDataAdapter};
//! use jobharvest::scheduler::RotationScheduler;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let now = chrono::Utc::now().naive_utc();
//!     let plan = RotationScheduler::new().plan_run(now, &config.run)?;
//!
//!     let context = Arc::new(RunContext::from_config(config, None, now.date())?);
//!     let stats = CrawlPipeline::new(Arc::clone(&context))
//!         .run(&plan, Arc::new(StructuredDataAdapter))
//!         .await?;
//!     context.persist_state()?;
//!     println!("{} new postings", stats.records_emitted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod decompress;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod ratelimit;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{CrawlPipeline, ExtractionAdapter, Orchestrator, RunContext};
    pub use crate::dedup::Deduplicator;
    pub use crate::discovery::UrlDiscovery;
    pub use crate::error::{Error, ErrorCategory, HarvestErrorTrait, Result};
    pub use crate::ingest::IngestClient;
    pub use crate::models::{CrawlTarget, FetchResult, JobRecord, PriorityTier};
    pub use crate::scheduler::{RotationScheduler, RunPlan};
}

// Direct re-exports for convenience
pub use models::{CrawlTarget, FetchResult, JobRecord};
