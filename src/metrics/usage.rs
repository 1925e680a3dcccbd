//! Usage metering for quota-bound external calls

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a metered resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub name: String,
    pub used: u64,
    pub limit: Option<u64>,
}

impl UsageSnapshot {
    /// Units left before the limit, `None` when unlimited
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Counter for a quota-consuming resource (search API calls, LLM calls)
///
/// Shared by reference between every component that spends the quota.
#[derive(Debug)]
pub struct MeteredResource {
    name: String,
    limit: Option<u64>,
    used: AtomicU64,
}

impl MeteredResource {
    pub fn new(name: impl Into<String>, limit: u64) -> Self {
        Self {
            name: name.into(),
            limit: Some(limit),
            used: AtomicU64::new(0),
        }
    }

    pub fn unlimited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: None,
            used: AtomicU64::new(0),
        }
    }

    /// Record `n` units of usage unconditionally
    pub fn record(&self, n: u64) {
        self.used.fetch_add(n, Ordering::SeqCst);
    }

    /// Reserve `n` units if the limit allows it
    pub fn try_consume(&self, n: u64) -> bool {
        let Some(limit) = self.limit else {
            self.record(n);
            return true;
        };

        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.checked_add(n)?;
                (next <= limit).then_some(next)
            })
            .is_ok()
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.used.load(Ordering::SeqCst) >= limit)
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            name: self.name.clone(),
            used: self.used.load(Ordering::SeqCst),
            limit: self.limit,
        }
    }
}
