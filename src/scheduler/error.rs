//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Slot catalog is empty
    EmptySlotCatalog,

    /// Slot index outside the catalog
    InvalidSlot { index: usize, total: usize },

    /// Unknown bucket id
    UnknownBucket { id: String },

    /// Invalid hour value (must be 0-23)
    InvalidHour { hour: u32 },

    /// Invalid calendar date
    InvalidDate { reason: String },

    /// Conflicting operator overrides
    ConflictingOverrides { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySlotCatalog => write!(f, "Slot catalog is empty"),
            Self::InvalidSlot { index, total } => {
                write!(f, "Invalid slot index {}. Catalog has {} slots", index, total)
            }
            Self::UnknownBucket { id } => write!(f, "Unknown crawl bucket '{}'", id),
            Self::InvalidHour { hour } => {
                write!(f, "Invalid hour '{}'. Must be 0-23", hour)
            }
            Self::InvalidDate { reason } => write!(f, "Invalid date: {}", reason),
            Self::ConflictingOverrides { reason } => {
                write!(f, "Conflicting overrides: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid slot error
    pub fn invalid_slot(index: usize, total: usize) -> Self {
        Self::InvalidSlot { index, total }
    }

    /// Create an unknown bucket error
    pub fn unknown_bucket(id: impl Into<String>) -> Self {
        Self::UnknownBucket { id: id.into() }
    }

    /// Create an invalid hour error
    pub fn invalid_hour(hour: u32) -> Self {
        Self::InvalidHour { hour }
    }

    /// Check if the error is recoverable
    ///
    /// Scheduler errors come from configuration, so none of them are.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}
