//! Candidate validation
//!
//! A candidate is fetched through the cascade and judged by a cheap content
//! heuristic. A 403 means the URL exists behind a wall and counts as valid;
//! the fetch cascade gets another go at it during the crawl.

use lazy_static::lazy_static;
use scraper::{Html, Selector};
use tracing::debug;

use crate::crawler::orchestrator::Orchestrator;
use crate::utils::error::FetchError;

/// Markup shaped like job cards or listings
const JOB_CARD_SELECTOR: &str = r#".job-card, .job-listing, .job-item, .job-result, [class*="JobCard"], [class*="job"], article"#;

const JOB_KEYWORDS: &[&str] = &["graduate", "internship", "placement", "trainee"];

const ERROR_MARKERS: &[&str] = &[
    "page not found",
    "404 not found",
    "this page doesn't exist",
    "no longer available",
    "something went wrong",
];

/// Bodies shorter than this are not a real page
const MIN_PAGE_BYTES: usize = 500;

const PROBE_ATTEMPT_BUDGET: u32 = 3;

lazy_static! {
    static ref JOB_CARDS: Selector = Selector::parse(JOB_CARD_SELECTOR).expect("valid selector");
    static ref HEADINGS: Selector = Selector::parse("h1, h2, title").expect("valid selector");
}

/// How thorough the content check is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Job-card markup, job keywords and "job" in a heading
    JobPage,
    /// Any non-trivial page without error markers (bare origins)
    Loaded,
}

/// Outcome of probing one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Valid,
    /// Exists but refused us (403)
    Walled,
    Rejected(String),
}

impl ProbeVerdict {
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Valid | Self::Walled)
    }
}

/// Job-card markup plus job keywords plus "job" in a heading
pub fn looks_like_job_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    if !JOB_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return false;
    }
    let document = Html::parse_document(html);
    if document.select(&JOB_CARDS).next().is_none() {
        return false;
    }
    document
        .select(&HEADINGS)
        .any(|h| h.text().collect::<String>().to_lowercase().contains("job"))
}

/// Structured feed with at least one element
pub fn looks_like_feed(body: &str) -> bool {
    let trimmed = body.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return false;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Array(items)) => !items.is_empty(),
        Ok(serde_json::Value::Object(map)) => !map.is_empty(),
        _ => false,
    }
}

/// Non-trivial page without error-page markers
pub fn looks_loaded(html: &str) -> bool {
    if html.len() < MIN_PAGE_BYTES {
        return false;
    }
    let lower = html.to_lowercase();
    !ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

/// Judge a fetched body
pub fn judge(body: &str, mode: ProbeMode) -> ProbeVerdict {
    if looks_like_feed(body) {
        return ProbeVerdict::Valid;
    }
    let ok = match mode {
        ProbeMode::JobPage => looks_like_job_page(body),
        ProbeMode::Loaded => looks_loaded(body),
    };
    if ok {
        ProbeVerdict::Valid
    } else {
        ProbeVerdict::Rejected("no job content".into())
    }
}

/// Fetch and judge a candidate URL
pub async fn probe(orchestrator: &Orchestrator, url: &str, mode: ProbeMode) -> ProbeVerdict {
    let verdict = match orchestrator.fetch(url, PROBE_ATTEMPT_BUDGET).await {
        Ok(result) => judge(&result.body, mode),
        Err(e) if e.status() == Some(403) => ProbeVerdict::Walled,
        Err(FetchError::NotFound(status)) => ProbeVerdict::Rejected(format!("HTTP {status}")),
        Err(e) => ProbeVerdict::Rejected(e.to_string()),
    };
    debug!(url = %url, verdict = ?verdict, "Probed candidate");
    verdict
}
