//! Error types for the harvesting engine
//!
//! This module defines the domain error types used by the fetch, discovery and
//! ingest layers, plus the [`FailureClass`] taxonomy that drives retry and
//! strategy-cascade decisions.

use std::time::Duration;
use thiserror::Error;

/// How a failed attempt should be handled by the retry/cascade machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Connection reset, timeout, 5xx: retry the same strategy with backoff
    Transient,
    /// 429: retry the same strategy with a longer backoff
    RateLimited,
    /// 403 or challenge page: abandon this strategy, advance to the next one
    Blocked,
    /// 404/410: fail fast, no retry and no strategy advance
    NotFound,
    /// Invalid input or exhausted budget: stop immediately
    Fatal,
}

impl FailureClass {
    /// Whether the same strategy should be retried
    pub fn retries_same_strategy(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }

    /// Whether the cascade should move on to the next strategy
    pub fn advances_strategy(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited | Self::Blocked)
    }

    /// Short label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::Blocked => "blocked",
            Self::NotFound => "not_found",
            Self::Fatal => "fatal",
        }
    }
}

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded (429)
    #[error("Rate limit exceeded")]
    RateLimit {
        /// Server supplied Retry-After, if any
        retry_after: Option<Duration>,
    },

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Access refused by origin (403 and friends)
    #[error("Blocked by origin: HTTP {0}")]
    Blocked(u16),

    /// Success status with an anti-bot challenge body
    #[error("Soft block detected: {0}")]
    SoftBlock(String),

    /// Resource does not exist
    #[error("Not found: HTTP {0}")]
    NotFound(u16),

    /// Other 4xx responses
    #[error("Client error: HTTP {0}")]
    ClientError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// A strategy gave up after its own retry budget
    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    /// Strategy is not configured (no proxy credentials, no browser driver)
    #[error("Strategy unavailable: {0}")]
    StrategyUnavailable(String),

    /// The overall attempt budget for a URL ran out
    #[error("Attempt budget exhausted after {0} attempts")]
    BudgetExhausted(u32),

    /// Every strategy in the cascade failed
    #[error("All fetch strategies failed after {attempts} attempts: {last}")]
    AllStrategiesFailed {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Browser automation failure
    #[error("Browser error: {0}")]
    Browser(String),
}

impl FetchError {
    /// Map a non-success HTTP status to its error variant
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            404 | 410 => Self::NotFound(status),
            429 => Self::RateLimit { retry_after },
            401 | 403 | 407 | 451 => Self::Blocked(status),
            500..=599 => Self::ServerError(status),
            _ => Self::ClientError(status),
        }
    }

    /// Classify this error for retry/cascade decisions
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Http(e) if e.is_builder() => FailureClass::Fatal,
            Self::Http(_) | Self::ServerError(_) | Self::Timeout | Self::MaxRetriesExceeded => {
                FailureClass::Transient
            }
            Self::Browser(_) => FailureClass::Transient,
            Self::RateLimit { .. } => FailureClass::RateLimited,
            Self::Blocked(_)
            | Self::SoftBlock(_)
            | Self::ClientError(_)
            | Self::StrategyUnavailable(_) => FailureClass::Blocked,
            Self::NotFound(_) => FailureClass::NotFound,
            Self::BudgetExhausted(_) | Self::InvalidUrl(_) => FailureClass::Fatal,
            Self::AllStrategiesFailed { last, .. } => match last.class() {
                FailureClass::NotFound => FailureClass::NotFound,
                _ => FailureClass::Fatal,
            },
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerError(s)
            | Self::Blocked(s)
            | Self::NotFound(s)
            | Self::ClientError(s) => Some(*s),
            Self::RateLimit { .. } => Some(429),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::AllStrategiesFailed { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Check if this error may succeed on a later attempt
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.class(), FailureClass::NotFound | FailureClass::Fatal)
    }
}

/// Errors raised inside URL discovery strategies
///
/// These never escape [`crate::discovery::UrlDiscovery::resolve`], which maps
/// exhaustion to an empty result; they are surfaced by the individual
/// strategy functions so callers and tests can see why a source gave nothing.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Underlying fetch failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Search provider call failed
    #[error("Search provider '{provider}' failed: {reason}")]
    Search { provider: String, reason: String },

    /// No credentials configured for an optional provider
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Per-run quota for a provider is used up
    #[error("Quota exhausted for {0}")]
    QuotaExhausted(String),

    /// URL suggestion service failed
    #[error("Suggestion service failed: {0}")]
    Suggest(String),

    /// Malformed payload
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Errors from the downstream ingestion API
#[derive(Error, Debug)]
pub enum IngestError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("Ingest rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Shared secret missing or refused
    #[error("Ingest authentication failed")]
    Unauthorized,

    /// Record failed local validation
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl IngestError {
    /// Non-2xx and transport failures are retryable by the batch caller
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized | Self::InvalidRecord(_) => false,
        }
    }
}
