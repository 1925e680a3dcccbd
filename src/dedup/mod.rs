//! Record deduplication
//!
//! Three layers keep the ingestion API from seeing the same posting twice:
//! - an in-run set keyed by the identity hash
//! - a persisted same-day store ([`SeenTodayStore`]) shared across runs
//! - a batch pass before ingest on primary and secondary keys
//!
//! The identity hash is also the key the downstream upsert is idempotent on.

mod store;

pub use store::{SeenTodayStore, MAX_STORED_KEYS, RECENT_RETENTION_DAYS};

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

use crate::models::JobRecord;
use crate::utils::strip_query;

/// Trimmed and lower-cased
fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Stable identity hash of a record (SHA-256, hex)
///
/// Built from title, company, apply URL without query, external id, location
/// and posting date. Case and surrounding whitespace do not matter.
pub fn identity_hash(record: &JobRecord) -> String {
    let title = normalize(&record.title);
    let company = normalize(&record.company);
    let url = strip_query(&normalize(&record.apply_url)).to_string();
    let id = normalize(record.external_id.as_deref().unwrap_or_default());
    let location = normalize(record.location.as_deref().unwrap_or_default());
    let posted = normalize(record.posted_at.as_deref().unwrap_or_default());

    let parts: Vec<&str> = [&title, &company, &url, &id, &location, &posted]
        .into_iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();

    let content = if parts.is_empty() {
        format!("{title}|{company}")
    } else {
        parts.join("|")
    };

    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Fill the record's hash if it has none
pub fn stamp(record: &mut JobRecord) {
    if record.hash.is_empty() {
        record.hash = identity_hash(record);
    }
}

/// Key used by the same-day store
pub fn seen_key(record: &JobRecord) -> String {
    let apply = strip_query(&record.apply_url).to_lowercase();
    let company = record.company.to_lowercase();
    let title = record.title.to_lowercase();
    [record.hash.as_str(), &apply, &company, &title]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("|")
}

/// Secondary key for batch dedup
fn secondary_key(record: &JobRecord) -> Option<String> {
    if record.apply_url.is_empty() {
        return None;
    }
    Some(format!(
        "{}|{}|{}",
        strip_query(&record.apply_url).to_lowercase(),
        record.company.to_lowercase(),
        record.title.to_lowercase()
    ))
}

/// Drop repeats within a batch, by hash and by apply URL + company + title
///
/// Returns the kept records and how many were dropped.
pub fn dedup_batch(records: Vec<JobRecord>) -> (Vec<JobRecord>, usize) {
    let total = records.len();
    let mut primary = HashSet::new();
    let mut secondary = HashSet::new();

    let kept: Vec<JobRecord> = records
        .into_iter()
        .filter(|record| {
            let hash_new = record.hash.is_empty() || primary.insert(record.hash.clone());
            let secondary_new = match secondary_key(record) {
                Some(key) => secondary.insert(key),
                None => true,
            };
            hash_new && secondary_new
        })
        .collect();

    let dropped = total - kept.len();
    (kept, dropped)
}

/// Intra-run and same-day dedup
///
/// `should_emit` is the only entry point; it consults and updates both layers
/// under one lock so two workers never both see a key as new.
pub struct Deduplicator {
    run: Mutex<HashSet<String>>,
    store: Option<SeenTodayStore>,
}

impl Deduplicator {
    /// In-run dedup only
    pub fn new() -> Self {
        Self {
            run: Mutex::new(HashSet::new()),
            store: None,
        }
    }

    /// In-run dedup backed by a same-day store
    pub fn with_store(store: SeenTodayStore) -> Self {
        Self {
            run: Mutex::new(HashSet::new()),
            store: Some(store),
        }
    }

    pub fn store(&self) -> Option<&SeenTodayStore> {
        self.store.as_ref()
    }

    /// Whether the record is new; marks it seen when it is
    pub fn should_emit(&self, record: &JobRecord) -> bool {
        let hash = if record.hash.is_empty() {
            identity_hash(record)
        } else {
            record.hash.clone()
        };

        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        if run.contains(&hash) {
            return false;
        }

        if let Some(store) = &self.store {
            let mut keyed = record.clone();
            keyed.hash = hash.clone();
            if !store.is_new_today(&seen_key(&keyed)) {
                run.insert(hash);
                debug!(title = %record.title, "Seen earlier today");
                return false;
            }
        }

        run.insert(hash);
        true
    }

    /// Keys seen in this run
    pub fn len(&self) -> usize {
        self.run.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the same-day store if present
    ///
    /// # Errors
    ///
    /// Propagates write errors from the store
    pub fn flush(&self) -> anyhow::Result<()> {
        if let Some(store) = &self.store {
            store.flush()?;
        }
        Ok(())
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}
