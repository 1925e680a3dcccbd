//! Persisted same-day seen-key store
//!
//! File layout: `{"date": "YYYY-MM-DD", "keys": [...], "recent": {key: date}}`.
//! Keys only count for the stored date; a file from another day loads empty.
//! `recent` outlives the day rollover and backs `was_seen_recently`.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::storage::StateFile;

/// Keys kept on save, newest first to survive
pub const MAX_STORED_KEYS: usize = 50_000;

/// `recent` entries older than this are pruned
pub const RECENT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
struct SeenTodayData {
    date: String,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    recent: BTreeMap<String, String>,
}

#[derive(Debug)]
struct SeenState {
    date: NaiveDate,
    keys: HashSet<String>,
    /// Insertion order of `keys`
    order: VecDeque<String>,
    recent: HashMap<String, NaiveDate>,
    dirty: bool,
}

impl SeenState {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            keys: HashSet::new(),
            order: VecDeque::new(),
            recent: HashMap::new(),
            dirty: false,
        }
    }

    fn prune_recent(&mut self) {
        let cutoff = self.date - Duration::days(RECENT_RETENTION_DAYS);
        self.recent.retain(|_, seen| *seen >= cutoff);
    }
}

/// Seen keys for one calendar day, shared across runs on that day
pub struct SeenTodayStore {
    state: Mutex<SeenState>,
    file: Option<StateFile>,
}

impl SeenTodayStore {
    /// Store that is never written to disk
    pub fn in_memory(today: NaiveDate) -> Self {
        Self {
            state: Mutex::new(SeenState::empty(today)),
            file: None,
        }
    }

    /// Load from a state file
    ///
    /// A missing or unreadable file starts empty; a file for another date
    /// keeps only its `recent` map.
    pub fn load(file: StateFile, today: NaiveDate) -> Self {
        let mut state = SeenState::empty(today);

        match file.load::<SeenTodayData>() {
            Ok(Some(data)) => {
                state.recent = data
                    .recent
                    .into_iter()
                    .filter_map(|(key, date)| {
                        NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                            .ok()
                            .map(|d| (key, d))
                    })
                    .collect();
                state.prune_recent();

                let stored_date = NaiveDate::parse_from_str(&data.date, "%Y-%m-%d").ok();
                if stored_date == Some(today) {
                    for key in data.keys {
                        if state.keys.insert(key.clone()) {
                            state.order.push_back(key);
                        }
                    }
                    debug!(keys = state.keys.len(), "Seen-today store loaded");
                } else {
                    info!(stored = %data.date, today = %today, "Seen-today store rolled over");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable seen-today store"),
        }

        Self {
            state: Mutex::new(state),
            file: Some(file),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SeenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn date(&self) -> NaiveDate {
        self.lock().date
    }

    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().keys.contains(key)
    }

    /// True the first time a key is seen today; records it either way
    pub fn is_new_today(&self, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }
        let mut state = self.lock();
        let today = state.date;
        state.recent.insert(key.to_string(), today);
        state.dirty = true;

        if state.keys.contains(key) {
            return false;
        }
        state.keys.insert(key.to_string());
        state.order.push_back(key.to_string());
        true
    }

    /// Whether a key was seen within the last `max_days` days
    pub fn was_seen_recently(&self, key: &str, max_days: i64) -> bool {
        let state = self.lock();
        let cutoff = state.date - Duration::days(max_days);
        state.recent.get(key).is_some_and(|seen| *seen >= cutoff)
    }

    /// Write the store if anything changed
    ///
    /// Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written
    pub fn flush(&self) -> Result<bool> {
        let Some(file) = &self.file else {
            return Ok(false);
        };

        let data = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(false);
            }
            state.prune_recent();

            let skip = state.order.len().saturating_sub(MAX_STORED_KEYS);
            SeenTodayData {
                date: state.date.format("%Y-%m-%d").to_string(),
                keys: state.order.iter().skip(skip).cloned().collect(),
                recent: state
                    .recent
                    .iter()
                    .map(|(k, d)| (k.clone(), d.format("%Y-%m-%d").to_string()))
                    .collect(),
            }
        };

        file.save(&data)?;
        self.lock().dirty = false;
        debug!(keys = data.keys.len(), path = %file.path().display(), "Seen-today store saved");
        Ok(true)
    }
}
