//! Common test utilities

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jobharvest::config::Config;
use jobharvest::crawler::browser::{BrowserDriver, BrowserSession};
use jobharvest::models::JobRecord;
use jobharvest::utils::error::FetchError;

/// Default configuration with rate limits relaxed for local mock servers
pub fn fast_config() -> Config {
    let mut config = Config::default();
    for policy in [
        &mut config.rate_limit.fast_api,
        &mut config.rate_limit.job_board,
        &mut config.rate_limit.generic,
    ] {
        policy.min_interval_ms = 0;
        policy.requests_per_minute = 10_000;
        policy.max_concurrent = 8;
    }
    config.crawler.request_timeout_secs = 5;
    config.ingest.secret = None;
    config
}

/// Relaxed configuration with state kept under `dir`
#[allow(dead_code)]
pub fn config_in(dir: &Path) -> Config {
    let mut config = fast_config();
    config.run.state_dir = dir.to_path_buf();
    config
}

/// Create a record with a stamped identity hash
#[allow(dead_code)]
pub fn create_test_record(title: &str, company: &str, url: &str) -> JobRecord {
    let mut record = JobRecord::new(title, company, url);
    jobharvest::dedup::stamp(&mut record);
    record
}

/// Browser driver that counts launches and never produces a session
#[derive(Default)]
#[allow(dead_code)]
pub struct CountingDriver {
    pub launches: AtomicUsize,
}

#[allow(dead_code)]
impl CountingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for CountingDriver {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, FetchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Browser("no browser in tests".into()))
    }
}
