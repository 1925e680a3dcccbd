//! Fetching and the run pipeline
//!
//! This module holds the fetch cascade and everything around it:
//!
//! - [`strategy`] - the [`FetchStrategy`] trait and response classification
//! - [`direct`], [`proxy`], [`browser`] - the three strategies, cheapest first
//! - [`orchestrator`] - runs the cascade under one attempt budget
//! - [`headers`] - browser-like request headers with rotation
//! - [`extract`] - page to record adapters
//! - [`pipeline`] - the worker pool that drives a whole run
//!
//! The headless browser driver itself lives behind the `browser` feature in
//! `chromium`; without it the browser strategy is simply not registered.

pub mod browser;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod direct;
pub mod extract;
pub mod headers;
pub mod orchestrator;
pub mod pipeline;
pub mod proxy;
pub mod strategy;

pub use browser::{BrowserDriver, BrowserStrategy, SessionPool};
pub use direct::DirectStrategy;
pub use extract::{ExtractionAdapter, StructuredDataAdapter};
pub use orchestrator::Orchestrator;
pub use pipeline::{CrawlPipeline, PipelineConfig, PipelineStats, RunContext, StatsSnapshot};
pub use proxy::ProxyStrategy;
pub use strategy::FetchStrategy;
