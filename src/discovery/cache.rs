//! Discovery caches
//!
//! - [`DiscoveryCache`]: validated URLs per target with a TTL
//! - [`DetailUrlBuffer`]: rolling buffer of detail-page URLs seen while rendering
//! - [`XhrEndpointCache`]: dynamic endpoints observed during browser fetches
//!
//! All three are owned by the run context and shared through `Arc`. Reads and
//! writes for one key happen under a single lock, so two workers never see a
//! half-applied update.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::storage::StateFile;
use crate::utils::strip_fragment;

/// Endpoints kept per target
pub const MAX_XHR_ENDPOINTS: usize = 20;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Validated URL cache
// ============================================================================

/// Working URLs for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryCacheEntry {
    pub working_urls: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

/// TTL-bounded cache of validated URLs, keyed by target id
pub struct DiscoveryCache {
    ttl: ChronoDuration,
    entries: Mutex<HashMap<String, DiscoveryCacheEntry>>,
    file: Option<StateFile>,
}

impl DiscoveryCache {
    /// In-memory cache living as long as the process
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX),
            entries: Mutex::new(HashMap::new()),
            file: None,
        }
    }

    /// Cache backed by a state file; unreadable files start empty
    pub fn persistent(ttl: Duration, file: StateFile) -> Self {
        let mut cache = Self::new(ttl);
        match file.load::<HashMap<String, DiscoveryCacheEntry>>() {
            Ok(Some(entries)) => {
                debug!(entries = entries.len(), path = %file.path().display(), "Discovery cache loaded");
                cache.entries = Mutex::new(entries);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable discovery cache"),
        }
        cache.file = Some(file);
        cache
    }

    /// Fresh, non-empty working URLs for a target
    pub fn get(&self, target_id: &str) -> Option<Vec<String>> {
        self.get_at(target_id, Utc::now())
    }

    /// Lookup against an explicit clock
    pub fn get_at(&self, target_id: &str, now: DateTime<Utc>) -> Option<Vec<String>> {
        let entries = lock(&self.entries);
        let entry = entries.get(target_id)?;
        if entry.working_urls.is_empty() || now - entry.discovered_at >= self.ttl {
            return None;
        }
        Some(entry.working_urls.clone())
    }

    pub fn insert(&self, target_id: &str, working_urls: Vec<String>) {
        self.insert_at(target_id, working_urls, Utc::now());
    }

    pub fn insert_at(&self, target_id: &str, working_urls: Vec<String>, now: DateTime<Utc>) {
        lock(&self.entries).insert(
            target_id.to_string(),
            DiscoveryCacheEntry {
                working_urls,
                discovered_at: now,
            },
        );
    }

    pub fn invalidate(&self, target_id: &str) {
        lock(&self.entries).remove(target_id);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write expired-free entries to the backing file, if any
    pub fn flush(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let now = Utc::now();
        let snapshot: HashMap<String, DiscoveryCacheEntry> = lock(&self.entries)
            .iter()
            .filter(|(_, entry)| now - entry.discovered_at < self.ttl)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        file.save(&snapshot)
    }
}

// ============================================================================
// Detail URL buffer
// ============================================================================

/// Per-target rolling buffer of detail-page URLs, deduplicated and capped
pub struct DetailUrlBuffer {
    cap: usize,
    entries: Mutex<HashMap<String, VecDeque<String>>>,
    file: Option<StateFile>,
}

impl DetailUrlBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: Mutex::new(HashMap::new()),
            file: None,
        }
    }

    /// Buffer backed by a state file; unreadable files start empty
    pub fn persistent(cap: usize, file: StateFile) -> Self {
        let mut buffer = Self::new(cap);
        match file.load::<HashMap<String, VecDeque<String>>>() {
            Ok(Some(entries)) => buffer.entries = Mutex::new(entries),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable detail URL buffer"),
        }
        buffer.file = Some(file);
        buffer
    }

    /// Append new URLs, evicting the oldest past the cap
    pub fn extend(&self, key: &str, urls: Vec<String>) {
        let mut entries = lock(&self.entries);
        let buffer = entries.entry(key.to_ascii_lowercase()).or_default();
        let mut added = 0usize;
        for url in urls {
            let url = strip_fragment(&url).to_string();
            if buffer.contains(&url) {
                continue;
            }
            buffer.push_back(url);
            added += 1;
        }
        while buffer.len() > self.cap {
            buffer.pop_front();
        }
        if added > 0 {
            debug!(key, added, total = buffer.len(), "Detail URLs buffered");
        }
    }

    /// Buffered URLs, oldest first
    pub fn get(&self, key: &str) -> Vec<String> {
        lock(&self.entries)
            .get(&key.to_ascii_lowercase())
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &str) -> usize {
        lock(&self.entries)
            .get(&key.to_ascii_lowercase())
            .map_or(0, VecDeque::len)
    }

    pub fn flush(&self) -> Result<()> {
        match &self.file {
            Some(file) => file.save(&*lock(&self.entries)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// XHR endpoint cache
// ============================================================================

/// Dynamic endpoints captured during browser fetches, newest first
#[derive(Default)]
pub struct XhrEndpointCache {
    entries: Mutex<HashMap<String, VecDeque<String>>>,
}

impl XhrEndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record endpoints; a repeat moves to the front, the oldest drops past the cap
    pub fn record(&self, key: &str, endpoints: Vec<String>) {
        let mut entries = lock(&self.entries);
        let list = entries.entry(key.to_ascii_lowercase()).or_default();
        for endpoint in endpoints {
            if !endpoint.starts_with("http") {
                continue;
            }
            let endpoint = strip_fragment(&endpoint).to_string();
            list.retain(|e| e != &endpoint);
            list.push_front(endpoint);
        }
        list.truncate(MAX_XHR_ENDPOINTS);
    }

    pub fn get(&self, key: &str) -> Vec<String> {
        lock(&self.entries)
            .get(&key.to_ascii_lowercase())
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}
