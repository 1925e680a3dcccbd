//! Configuration management for the harvesting engine
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Every section has defaults, so a TOML file only
//! needs to name the values it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Candidate/search caps applied when `test_mode` is on
const TEST_MODE_MAX_CANDIDATES: usize = 5;
const TEST_MODE_MAX_SEARCHES: u64 = 2;
const TEST_MODE_MAX_TARGETS: usize = 5;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fetch orchestration
    pub crawler: CrawlerConfig,

    /// Rate limiting
    pub rate_limit: RateLimitConfig,

    /// Proxy gateway and scraping API
    pub proxy: ProxyConfig,

    /// URL discovery
    pub discovery: DiscoveryConfig,

    /// Browser automation
    pub browser: BrowserSettings,

    /// Per-invocation run controls
    pub run: RunConfig,

    /// Downstream ingestion API
    pub ingest: IngestConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Fetch orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Process-wide ceiling on in-flight requests
    pub max_concurrent_requests: usize,

    /// Number of pipeline workers
    pub workers: usize,

    /// Per-attempt timeout in seconds
    pub request_timeout_secs: u64,

    /// Total attempts per URL across every strategy
    pub attempt_budget: u32,

    /// Retries a single strategy may spend before the cascade advances
    pub max_retries_per_strategy: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 6,
            workers: 4,
            request_timeout_secs: 30,
            attempt_budget: 8,
            max_retries_per_strategy: 2,
        }
    }
}

/// Pacing for one origin class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// In-flight requests allowed for the class
    pub max_concurrent: usize,

    /// Minimum gap between consecutive request starts
    pub min_interval_ms: u64,

    /// Sustained requests-per-minute ceiling
    pub requests_per_minute: u32,
}

/// Rate limiter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Tokens available per refill window
    pub reservoir_size: u32,

    /// Refill window in seconds
    pub reservoir_refill_secs: u64,

    /// Structured ATS APIs
    pub fast_api: RateLimitPolicy,

    /// Job boards
    pub job_board: RateLimitPolicy,

    /// Company career sites and anything else
    pub generic: RateLimitPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            reservoir_size: 1000,
            reservoir_refill_secs: 60,
            fast_api: RateLimitPolicy {
                max_concurrent: 10,
                min_interval_ms: 1000,
                requests_per_minute: 60,
            },
            job_board: RateLimitPolicy {
                max_concurrent: 5,
                min_interval_ms: 2000,
                requests_per_minute: 30,
            },
            generic: RateLimitPolicy {
                max_concurrent: 3,
                min_interval_ms: 3000,
                requests_per_minute: 20,
            },
        }
    }
}

/// Proxy gateway settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Residential proxy `host:port`
    pub endpoint: Option<String>,

    /// Proxy username
    pub username: Option<String>,

    /// Proxy password
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Scraping API key (used instead of the proxy when set)
    #[serde(skip_serializing)]
    pub scraper_api_key: Option<String>,

    /// Scraping API base URL
    pub scraper_api_url: String,
}

impl ProxyConfig {
    /// Whether the proxied strategy has anything to route through
    pub fn is_configured(&self) -> bool {
        self.scraper_api_key.is_some()
            || (self.endpoint.is_some() && self.username.is_some() && self.password.is_some())
    }
}

/// URL discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// SerpAPI key
    #[serde(skip_serializing)]
    pub serpapi_key: Option<String>,

    /// Serper.dev key
    #[serde(skip_serializing)]
    pub serper_key: Option<String>,

    /// URL suggestion (LLM) service key
    #[serde(skip_serializing)]
    pub suggest_api_key: Option<String>,

    /// Cache entry lifetime in seconds
    pub cache_ttl_secs: u64,

    /// Candidates probed per target
    pub max_candidates: usize,

    /// Validation stops after this many working URLs
    pub max_working_urls: usize,

    /// Search API calls allowed per run
    pub max_searches_per_run: u64,

    /// Capacity of the rolling detail-URL buffer per target
    pub detail_buffer_cap: usize,

    /// Persist discovery cache under `run.state_dir`
    pub persist_cache: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            serpapi_key: None,
            serper_key: None,
            suggest_api_key: None,
            cache_ttl_secs: 24 * 60 * 60,
            max_candidates: 20,
            max_working_urls: 2,
            max_searches_per_run: 20,
            detail_buffer_cap: 500,
            persist_cache: false,
        }
    }
}

/// Browser automation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Include the browser strategy in the cascade
    pub enabled: bool,

    /// Run without a visible window
    pub headless: bool,

    /// Cap on live sessions across all targets
    pub max_sessions: usize,

    /// Upper bound on scroll / load-more cycles per page
    pub max_reveal_cycles: u32,

    /// Wait after each reveal action
    pub settle_delay_ms: u64,

    /// Consecutive unchanged checks that end the reveal loop
    pub stable_checks: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: true,
            max_sessions: 3,
            max_reveal_cycles: 8,
            settle_delay_ms: 1500,
            stable_checks: 2,
        }
    }
}

/// Per-invocation run controls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Cap candidate/target counts for fast iteration
    pub test_mode: bool,

    /// Pin slot selection (normalised modulo the slot count)
    pub run_slot_override: Option<i64>,

    /// Force the backlog window on
    pub force_backlog: bool,

    /// Force the backlog window off
    pub force_fresh_only: bool,

    /// Stop scheduling new work after this many minutes
    pub max_runtime_mins: u64,

    /// Early exit once this many records were found (after 10 minutes)
    pub min_jobs_for_early_exit: u64,

    /// Stop scheduling new work after this many fetched URLs
    pub max_urls: Option<usize>,

    /// Directory for persisted state (dedup store, discovery cache, crawl history)
    pub state_dir: PathBuf,

    /// Successfully crawled URLs are skipped until this many hours have passed
    pub recrawl_after_hours: u64,

    /// Nothing leaves the process: no ingestion, no seen-today or history writes
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            run_slot_override: None,
            force_backlog: false,
            force_fresh_only: false,
            max_runtime_mins: 30,
            min_jobs_for_early_exit: 100,
            max_urls: None,
            state_dir: PathBuf::from(".cache"),
            recrawl_after_hours: 24,
            dry_run: false,
        }
    }
}

/// Downstream ingestion API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// API base URL
    pub api_url: String,

    /// Shared secret sent as `x-seed-secret`
    #[serde(skip_serializing)]
    pub secret: Option<String>,

    /// Records per upsert call
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_url: String::from("http://localhost:1337/api"),
            secret: None,
            batch_size: 100,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        let d = &*self;
        let max_concurrent_requests =
            env_parse("HARVEST_MAX_CONCURRENT", d.crawler.max_concurrent_requests);
        let workers = env_parse("HARVEST_WORKERS", d.crawler.workers);
        let request_timeout_secs =
            env_parse("HARVEST_REQUEST_TIMEOUT", d.crawler.request_timeout_secs);
        let reservoir_size = env_parse("HARVEST_RESERVOIR_SIZE", d.rate_limit.reservoir_size);
        let reservoir_refill_secs = env_parse(
            "HARVEST_RESERVOIR_REFILL_SECS",
            d.rate_limit.reservoir_refill_secs,
        );
        let max_candidates = env_parse("HARVEST_MAX_CANDIDATES", d.discovery.max_candidates);
        let max_searches = env_parse("HARVEST_MAX_SEARCHES", d.discovery.max_searches_per_run);
        let headless = env_parse("HARVEST_BROWSER_HEADLESS", d.browser.headless);

        self.crawler.max_concurrent_requests = max_concurrent_requests;
        self.crawler.workers = workers;
        self.crawler.request_timeout_secs = request_timeout_secs;
        self.rate_limit.reservoir_size = reservoir_size;
        self.rate_limit.reservoir_refill_secs = reservoir_refill_secs;
        self.discovery.max_candidates = max_candidates;
        self.discovery.max_searches_per_run = max_searches;
        self.browser.headless = headless;

        if let Some(endpoint) = env_opt("SMARTPROXY_ENDPOINT") {
            self.proxy.endpoint = Some(endpoint);
        }
        if let Some(username) = env_opt("SMARTPROXY_USERNAME") {
            self.proxy.username = Some(username);
        }
        if let Some(password) = env_opt("SMARTPROXY_PASSWORD") {
            self.proxy.password = Some(password);
        }
        if let Some(key) = env_opt("SCRAPER_API_KEY") {
            self.proxy.scraper_api_key = Some(key);
        }
        if self.proxy.scraper_api_url.is_empty() {
            self.proxy.scraper_api_url = String::from("http://api.scraperapi.com");
        }

        if let Some(key) = env_opt("SERP_API_KEY") {
            self.discovery.serpapi_key = Some(key);
        }
        if let Some(key) = env_opt("SERPER_API_KEY") {
            self.discovery.serper_key = Some(key);
        }
        if let Some(key) = env_opt("PERPLEXITY_API_KEY") {
            self.discovery.suggest_api_key = Some(key);
        }

        if env_flag("TEST_MODE") {
            self.run.test_mode = true;
        }
        if let Some(slot) = env_opt("RUN_SLOT_INDEX")
            .or_else(|| env_opt("RUN_SLOT_OVERRIDE"))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
        {
            self.run.run_slot_override = Some(slot.floor() as i64);
        }
        if env_flag("RUN_BACKLOG") {
            self.run.force_backlog = true;
        }
        if env_flag("RUN_FRESH_ONLY") {
            self.run.force_fresh_only = true;
        }
        if let Some(dir) = env_opt("HARVEST_STATE_DIR") {
            self.run.state_dir = PathBuf::from(dir);
        }
        if let Some(hours) = env_opt("HARVEST_RECRAWL_AFTER_HOURS").and_then(|v| v.parse().ok()) {
            self.run.recrawl_after_hours = hours;
        }

        if let Some(api_url) = env_opt("INGEST_API_URL") {
            self.ingest.api_url = api_url;
        }
        if let Some(secret) = env_opt("INGEST_SECRET") {
            self.ingest.secret = Some(secret);
        }

        if let Some(level) = env_opt("HARVEST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_opt("HARVEST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.crawler.max_concurrent_requests == 0 {
            anyhow::bail!("max_concurrent_requests must be greater than 0");
        }

        if self.crawler.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.crawler.attempt_budget == 0 {
            anyhow::bail!("attempt_budget must be greater than 0");
        }

        if self.rate_limit.reservoir_size == 0 {
            anyhow::bail!("reservoir_size must be greater than 0");
        }

        if self.rate_limit.reservoir_refill_secs == 0 {
            anyhow::bail!("reservoir_refill_secs must be greater than 0");
        }

        for (name, policy) in [
            ("fast_api", &self.rate_limit.fast_api),
            ("job_board", &self.rate_limit.job_board),
            ("generic", &self.rate_limit.generic),
        ] {
            if policy.max_concurrent == 0 || policy.requests_per_minute == 0 {
                anyhow::bail!("rate_limit.{name} must allow at least one request");
            }
        }

        if self.browser.max_sessions == 0 {
            anyhow::bail!("browser.max_sessions must be greater than 0");
        }

        if self.run.force_backlog && self.run.force_fresh_only {
            anyhow::bail!("force_backlog and force_fresh_only cannot both be set");
        }

        if self.ingest.batch_size == 0 {
            anyhow::bail!("ingest.batch_size must be greater than 0");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }

    /// Candidates probed per target, reduced in test mode
    pub fn effective_max_candidates(&self) -> usize {
        if self.run.test_mode {
            self.discovery.max_candidates.min(TEST_MODE_MAX_CANDIDATES)
        } else {
            self.discovery.max_candidates
        }
    }

    /// Search calls allowed this run, reduced in test mode
    pub fn effective_max_searches(&self) -> u64 {
        if self.run.test_mode {
            self.discovery.max_searches_per_run.min(TEST_MODE_MAX_SEARCHES)
        } else {
            self.discovery.max_searches_per_run
        }
    }

    /// Targets crawled this run, capped in test mode
    pub fn effective_max_targets(&self) -> Option<usize> {
        self.run.test_mode.then_some(TEST_MODE_MAX_TARGETS)
    }

    /// Re-crawl window for successfully fetched URLs
    pub fn recrawl_after(&self) -> chrono::Duration {
        // Capped at ten years to stay inside chrono's range
        chrono::Duration::hours(self.run.recrawl_after_hours.min(24 * 3_650) as i64)
    }

    /// Require the ingest secret (fatal at startup when ingestion is enabled)
    pub fn require_ingest_secret(&self) -> Result<&str> {
        self.ingest
            .secret
            .as_deref()
            .context("INGEST_SECRET is required to push records")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_concurrent_requests() {
        let mut config = Config::default();
        config.crawler.max_concurrent_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conflicting_backlog_flags() {
        let mut config = Config::default();
        config.run.force_backlog = true;
        config.run.force_fresh_only = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_test_mode_caps() {
        let mut config = Config::default();
        assert_eq!(config.effective_max_candidates(), 20);
        config.run.test_mode = true;
        assert_eq!(config.effective_max_candidates(), 5);
        assert_eq!(config.effective_max_searches(), 2);
        assert_eq!(config.effective_max_targets(), Some(5));

        config.run.test_mode = false;
        assert_eq!(config.effective_max_targets(), None);
        assert_eq!(config.recrawl_after(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_partial_toml() {
        let toml_src = r#"
            [crawler]
            max_concurrent_requests = 2

            [run]
            test_mode = true
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.crawler.max_concurrent_requests, 2);
        assert_eq!(config.crawler.attempt_budget, 8);
        assert!(config.run.test_mode);
        assert_eq!(config.rate_limit.generic.min_interval_ms, 3000);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("RUN_SLOT_INDEX", "-3");
        std::env::set_var("RUN_BACKLOG", "1");
        std::env::set_var("HARVEST_MAX_CONCURRENT", "9");
        std::env::set_var("SERPER_API_KEY", "k");

        let config = Config::from_env().unwrap();

        std::env::remove_var("RUN_SLOT_INDEX");
        std::env::remove_var("RUN_BACKLOG");
        std::env::remove_var("HARVEST_MAX_CONCURRENT");
        std::env::remove_var("SERPER_API_KEY");

        assert_eq!(config.run.run_slot_override, Some(-3));
        assert!(config.run.force_backlog);
        assert_eq!(config.crawler.max_concurrent_requests, 9);
        assert_eq!(config.discovery.serper_key.as_deref(), Some("k"));
        assert_eq!(config.proxy.scraper_api_url, "http://api.scraperapi.com");
    }

    #[test]
    #[serial]
    fn test_proxy_configured() {
        let mut config = Config::default();
        assert!(!config.proxy.is_configured());
        config.proxy.scraper_api_key = Some("key".into());
        assert!(config.proxy.is_configured());
    }
}
