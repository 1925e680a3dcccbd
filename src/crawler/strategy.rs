//! Fetch strategy capability and shared response handling
//!
//! A strategy is one way of fetching a URL (direct, proxied, browser). It
//! performs a single attempt; retries and cascading are driven by
//! [`crate::crawler::orchestrator::Orchestrator`] using the strategy's own
//! retry budget and backoff policy.

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, RETRY_AFTER};
use reqwest::Response;
use std::collections::HashMap;
use std::time::Duration;

use crate::decompress::decompress;
use crate::models::FetchResult;
use crate::utils::error::FetchError;
use crate::utils::retry::BackoffPolicy;

/// Markers that identify a challenge page wherever they appear
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "Just a moment...",
    "Checking your browser",
    "challenge-form",
    "Request unsuccessful. Incapsula",
    "px-captcha",
];

/// Markers that only count on small pages; real listings mention them too
const SMALL_PAGE_MARKERS: &[&str] = &["captcha", "Access Denied"];

/// Bodies shorter than this are checked against [`SMALL_PAGE_MARKERS`]
const SMALL_PAGE_BYTES: usize = 15_000;

/// One concrete method of fetching a URL
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Short name for logs and metrics
    fn name(&self) -> &'static str;

    /// Whether the strategy is configured at all
    fn is_available(&self) -> bool {
        true
    }

    /// Same-strategy retries after the first attempt
    fn max_retries(&self) -> u32;

    /// Backoff between same-strategy retries
    fn backoff(&self) -> &BackoffPolicy;

    /// Perform a single attempt
    async fn attempt(&self, url: &str) -> Result<FetchResult, FetchError>;
}

/// Return the matching challenge marker, if the body is a soft block
pub fn detect_soft_block(body: &str) -> Option<&'static str> {
    if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| body.contains(*m)) {
        return Some(marker);
    }
    if body.len() < SMALL_PAGE_BYTES {
        let lower = body.to_lowercase();
        return SMALL_PAGE_MARKERS
            .iter()
            .find(|m| lower.contains(&m.to_lowercase()))
            .copied();
    }
    None
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn an HTTP response into a [`FetchResult`]
///
/// Non-success statuses map onto [`FetchError`] variants, bodies pass through
/// the decompression layer, and challenge pages become [`FetchError::SoftBlock`].
pub async fn read_response(
    response: Response,
    strategy: &'static str,
) -> Result<FetchResult, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        return Err(FetchError::from_status(status.as_u16(), retry_after));
    }

    let final_url = response.url().to_string();
    let content_encoding = response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let bytes = response.bytes().await?;
    let decoded = decompress(&bytes, content_encoding.as_deref());

    if let Some(marker) = detect_soft_block(&decoded.text) {
        return Err(FetchError::SoftBlock(marker.to_string()));
    }

    Ok(FetchResult {
        final_url,
        status: status.as_u16(),
        headers,
        body: decoded.text,
        strategy,
    })
}

/// Map a transport error, keeping timeouts distinct
pub fn map_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(err)
    }
}
