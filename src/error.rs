//! Crate-wide error type
//!
//! Fetch, discovery, scheduler and ingest failures each have their own enum;
//! [`Error`] wraps them so run setup and the CLI can report one type while the
//! pipeline keeps matching on the domain variants.
//!
//! # Architecture
//!
//! - [`HarvestErrorTrait`] - `is_recoverable` and `category` for [`Error`]
//! - [`ErrorCategory`] - Originating layer, used as a log and metrics label
//! - [`Error`] - Wrapper over the domain enums plus I/O, JSON and config errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobharvest::error::{Error, HarvestErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Skipping unit of work: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{DiscoveryError, FailureClass, FetchError, IngestError};

/// Recoverability and category of an error
pub trait HarvestErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the run can continue past it)
    fn is_recoverable(&self) -> bool;

    /// Layer the error came from
    fn category(&self) -> ErrorCategory;
}

/// Which layer an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit, blocking)
    Network,
    /// URL discovery errors
    Discovery,
    /// Downstream ingestion errors
    Ingest,
    /// Storage and I/O errors
    Storage,
    /// Parsing and serialization errors
    Parsing,
    /// Configuration and validation errors
    Config,
    /// Scheduler and timing errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Discovery => "discovery",
            Self::Ingest => "ingest",
            Self::Storage => "storage",
            Self::Parsing => "parsing",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the jobharvest crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Discovery strategy errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Ingestion API errors
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Scheduler and timing errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HarvestErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            // Discovery exhaustion only ever makes a target temporarily unresolvable
            Self::Discovery(_) => true,
            Self::Ingest(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Ingest(_) => ErrorCategory::Ingest,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
