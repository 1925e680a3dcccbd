//! Per-URL freshness, work ordering and run stop conditions
//!
//! [`CrawlHistory`] remembers the last outcome per URL across runs; the
//! pipeline asks it which URLs are due and in what order to fetch them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::storage::StateFile;

/// Outcome of the last crawl of a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Success,
    Error,
    Skipped,
}

/// What is known about a URL from earlier runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlLog {
    pub url: String,
    pub last_seen: DateTime<Utc>,
    pub status: CrawlStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl CrawlLog {
    pub fn new(url: impl Into<String>, last_seen: DateTime<Utc>, status: CrawlStatus) -> Self {
        Self {
            url: url.into(),
            last_seen,
            status,
            last_modified: None,
            error_reason: None,
        }
    }
}

/// Default re-crawl age in hours
pub const DEFAULT_MAX_AGE_HOURS: i64 = 24;

/// Default run limits for [`should_stop`]
pub const DEFAULT_MAX_RUNTIME_MINS: i64 = 30;
pub const DEFAULT_MIN_JOBS: u64 = 100;

/// Early exit is only considered after this many minutes
const EARLY_EXIT_AFTER_MINS: i64 = 10;

/// Whether a URL is due for a crawl
///
/// Errored URLs are always eligible; successful ones wait out `max_age`.
pub fn should_crawl(log: Option<&CrawlLog>, max_age: Duration, now: DateTime<Utc>) -> bool {
    let Some(log) = log else {
        return true;
    };
    if now - log.last_seen > max_age {
        return true;
    }
    match log.status {
        CrawlStatus::Error => true,
        CrawlStatus::Success | CrawlStatus::Skipped => false,
    }
}

/// Base weight by kind of origin
fn origin_weight(url: &str) -> i64 {
    let url = url.to_ascii_lowercase();
    if url.contains("greenhouse.io") || url.contains("lever.co") {
        100
    } else if url.contains("workday") || url.contains("successfactors") {
        90
    } else if url.contains("reed.co.uk") || url.contains("totaljobs.com") {
        80
    } else if url.contains("arup.com") || url.contains("atkinsglobal.com") {
        70
    } else {
        50
    }
}

/// Ordering score for the work queue, higher first
pub fn priority(url: &str, log: Option<&CrawlLog>, now: DateTime<Utc>) -> u32 {
    let mut score = origin_weight(url);

    match log {
        None => score += 50,
        Some(log) => {
            if log.status == CrawlStatus::Error {
                score += 30;
            }
            if let Some(modified) = log.last_modified {
                if now - modified < Duration::days(7) {
                    score += 20;
                }
            }
            if log.status == CrawlStatus::Success && now - log.last_seen < Duration::hours(12) {
                score -= 30;
            }
        }
    }

    score.max(0) as u32
}

/// Sort URLs by descending priority, stable for equal scores
pub fn order_by_priority<F>(urls: &mut [String], lookup: F, now: DateTime<Utc>)
where
    F: Fn(&str) -> Option<CrawlLog>,
{
    urls.sort_by_cached_key(|url| std::cmp::Reverse(priority(url, lookup(url).as_ref(), now)));
}

/// Whether a run should stop taking new work
///
/// Stops past `max_runtime`, or once `min_jobs` were found and the run has
/// been going for ten minutes.
pub fn should_stop(
    found: u64,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
    max_runtime: Duration,
    min_jobs: u64,
) -> bool {
    let elapsed = now - started;
    if elapsed > max_runtime {
        return true;
    }
    found >= min_jobs && elapsed > Duration::minutes(EARLY_EXIT_AFTER_MINS)
}

// ============================================================================
// Crawl History
// ============================================================================

/// Entries kept when the history is saved, most recently seen first
pub const MAX_HISTORY_ENTRIES: usize = 20_000;

/// Last crawl outcome per URL
pub struct CrawlHistory {
    max_age: Duration,
    entries: Mutex<HashMap<String, CrawlLog>>,
    file: Option<StateFile>,
}

impl CrawlHistory {
    /// History living as long as the process
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: Mutex::new(HashMap::new()),
            file: None,
        }
    }

    /// History backed by a state file; unreadable files start empty
    pub fn persistent(max_age: Duration, file: StateFile) -> Self {
        let mut history = Self::new(max_age);
        match file.load::<Vec<CrawlLog>>() {
            Ok(Some(logs)) => {
                debug!(entries = logs.len(), "Crawl history loaded");
                history.entries = Mutex::new(logs.into_iter().map(|l| (l.url.clone(), l)).collect());
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable crawl history"),
        }
        history.file = Some(file);
        history
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CrawlLog>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, url: &str) -> Option<CrawlLog> {
        self.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a successful fetch
    pub fn record_success(&self, url: &str, last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        let mut log = CrawlLog::new(url, now, CrawlStatus::Success);
        log.last_modified = last_modified;
        self.lock().insert(url.to_string(), log);
    }

    /// Record a failed fetch
    pub fn record_error(&self, url: &str, reason: impl Into<String>, now: DateTime<Utc>) {
        let mut log = CrawlLog::new(url, now, CrawlStatus::Error);
        log.error_reason = Some(reason.into());
        self.lock().insert(url.to_string(), log);
    }

    /// URLs due for a crawl, highest priority first
    ///
    /// Returns the due URLs and how many were held back as still fresh.
    pub fn due(&self, urls: Vec<String>, now: DateTime<Utc>) -> (Vec<String>, usize) {
        let entries = self.lock();
        let total = urls.len();
        let mut due: Vec<String> = urls
            .into_iter()
            .filter(|url| should_crawl(entries.get(url.as_str()), self.max_age, now))
            .collect();
        order_by_priority(&mut due, |url| entries.get(url).cloned(), now);
        let fresh = total - due.len();
        (due, fresh)
    }

    /// Write the newest entries to the backing file, if any
    pub fn flush(&self) -> anyhow::Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let mut logs: Vec<CrawlLog> = self.lock().values().cloned().collect();
        logs.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        logs.truncate(MAX_HISTORY_ENTRIES);
        file.save(&logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_should_crawl() {
        let now = now();
        assert!(should_crawl(None, Duration::hours(DEFAULT_MAX_AGE_HOURS), now));

        let fresh = CrawlLog::new("u", now - Duration::hours(2), CrawlStatus::Success);
        assert!(!should_crawl(Some(&fresh), Duration::hours(DEFAULT_MAX_AGE_HOURS), now));

        let failed = CrawlLog::new("u", now - Duration::hours(2), CrawlStatus::Error);
        assert!(should_crawl(Some(&failed), Duration::hours(DEFAULT_MAX_AGE_HOURS), now));

        let stale = CrawlLog::new("u", now - Duration::hours(30), CrawlStatus::Success);
        assert!(should_crawl(Some(&stale), Duration::hours(DEFAULT_MAX_AGE_HOURS), now));
    }

    #[test]
    fn test_priority_scores() {
        let now = now();
        assert_eq!(priority("https://boards.greenhouse.io/acme", None, now), 150);
        assert_eq!(priority("https://acme.wd3.myworkdayjobs.com", None, now), 140);
        assert_eq!(priority("https://www.reed.co.uk/jobs", None, now), 130);
        assert_eq!(priority("https://www.arup.com/careers", None, now), 120);
        assert_eq!(priority("https://example.com", None, now), 100);

        let failed = CrawlLog::new("u", now - Duration::hours(1), CrawlStatus::Error);
        assert_eq!(priority("https://example.com", Some(&failed), now), 80);

        let mut recent = CrawlLog::new("u", now - Duration::hours(1), CrawlStatus::Success);
        assert_eq!(priority("https://example.com", Some(&recent), now), 20);
        recent.last_modified = Some(now - Duration::days(1));
        assert_eq!(priority("https://example.com", Some(&recent), now), 40);
    }

    #[test]
    fn test_errored_outranks_recent_success() {
        let now = now();
        let url = "https://www.arup.com/careers";
        let ok = CrawlLog::new(url, now - Duration::hours(3), CrawlStatus::Success);
        let failed = CrawlLog::new(url, now - Duration::hours(3), CrawlStatus::Error);
        assert!(priority(url, Some(&failed), now) > priority(url, Some(&ok), now));
    }

    #[test]
    fn test_order_by_priority() {
        let now = now();
        let mut urls = vec![
            "https://example.com/a".to_string(),
            "https://boards.greenhouse.io/acme".to_string(),
            "https://example.com/b".to_string(),
        ];
        order_by_priority(
            &mut urls,
            |u| (u.ends_with("/a")).then(|| CrawlLog::new(u, now, CrawlStatus::Success)),
            now,
        );
        assert_eq!(urls[0], "https://boards.greenhouse.io/acme");
        assert_eq!(urls[1], "https://example.com/b");
        assert_eq!(urls[2], "https://example.com/a");
    }

    #[test]
    fn test_history_holds_back_fresh_urls() {
        let now = now();
        let history = CrawlHistory::new(Duration::hours(DEFAULT_MAX_AGE_HOURS));
        history.record_success("https://example.com/ok", None, now - Duration::hours(2));
        history.record_error("https://example.com/failed", "HTTP 503", now - Duration::hours(2));

        let (due, fresh) = history.due(
            vec![
                "https://example.com/new".to_string(),
                "https://example.com/ok".to_string(),
                "https://example.com/failed".to_string(),
            ],
            now,
        );
        assert_eq!(fresh, 1);
        assert_eq!(due, vec!["https://example.com/new", "https://example.com/failed"]);
        assert_eq!(
            history.get("https://example.com/failed").and_then(|l| l.error_reason),
            Some("HTTP 503".to_string())
        );
    }

    #[test]
    fn test_history_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = StateFile::in_dir(dir.path(), "crawl-history.json");
        let now = now();

        let history = CrawlHistory::persistent(Duration::hours(24), file.clone());
        history.record_success("https://example.com/ok", Some(now - Duration::days(1)), now);
        history.flush().unwrap();

        let reloaded = CrawlHistory::persistent(Duration::hours(24), file);
        let log = reloaded.get("https://example.com/ok").unwrap();
        assert_eq!(log.status, CrawlStatus::Success);
        assert_eq!(log.last_modified, Some(now - Duration::days(1)));

        // In-memory histories never touch disk
        assert!(CrawlHistory::new(Duration::hours(24)).flush().is_ok());
    }

    #[test]
    fn test_should_stop() {
        let started = now();
        let max = Duration::minutes(DEFAULT_MAX_RUNTIME_MINS);
        assert!(!should_stop(0, started, started + Duration::minutes(5), max, 100));
        assert!(!should_stop(150, started, started + Duration::minutes(5), max, 100));
        assert!(should_stop(150, started, started + Duration::minutes(11), max, 100));
        assert!(!should_stop(50, started, started + Duration::minutes(20), max, 100));
        assert!(should_stop(0, started, started + Duration::minutes(31), max, 100));
    }
}
