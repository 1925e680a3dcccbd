//! Direct HTTP strategy with rotated realistic headers

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::headers::{build_api_headers, build_page_headers, random_referer, rotated_user_agent};
use super::strategy::{map_transport_error, read_response, FetchStrategy};
use crate::config::Config;
use crate::models::FetchResult;
use crate::utils::error::FetchError;
use crate::utils::retry::BackoffPolicy;

/// Plain request from this host, rotating user agent and referer per attempt
pub struct DirectStrategy {
    /// HTTP client with configured timeout and cookies; bodies arrive raw
    client: Client,

    /// Same-strategy retries after the first attempt
    max_retries: u32,

    backoff: BackoffPolicy,

    /// Rotation cursor for user agents
    rotation: AtomicUsize,
}

impl DirectStrategy {
    /// Create from configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::with_settings(
            config.request_timeout(),
            config.crawler.max_retries_per_strategy,
            BackoffPolicy::default(),
        )
    }

    /// Create with explicit timeout, retry count and backoff
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_settings(
        timeout: Duration,
        max_retries: u32,
        backoff: BackoffPolicy,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .cookie_store(true)
            // Bodies are decoded by `read_response`, which tolerates mislabelled encodings
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()?;

        Ok(Self {
            client,
            max_retries,
            backoff,
            rotation: AtomicUsize::new(rand::random::<u8>() as usize),
        })
    }
}

/// JSON endpoints get API headers instead of navigation headers
pub(crate) fn looks_like_api(url: &str) -> bool {
    let path = crate::utils::strip_query(url).to_ascii_lowercase();
    path.ends_with(".json") || path.contains("/api/") || path.contains("/wday/cxs/")
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    async fn attempt(&self, url: &str) -> Result<FetchResult, FetchError> {
        let index = self.rotation.fetch_add(1, Ordering::Relaxed);
        let user_agent = rotated_user_agent(index);
        let referer = random_referer();

        let headers = if looks_like_api(url) {
            build_api_headers(user_agent, Some(referer))
        } else {
            build_page_headers(user_agent, Some(referer))
        };

        debug!(url = %url, user_agent, "Direct fetch attempt");

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(map_transport_error)?;

        read_response(response, self.name()).await
    }
}
