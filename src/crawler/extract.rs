//! Extraction adapters
//!
//! Adapters turn a fetched page into draft [`JobRecord`]s. The pipeline only
//! depends on the [`ExtractionAdapter`] trait; [`StructuredDataAdapter`] is the
//! built-in one and understands schema.org `JobPosting` JSON-LD plus the
//! public Greenhouse and Lever feeds.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::models::{CrawlTarget, FetchResult, JobRecord};
use crate::utils::{normalize_whitespace, truncate_text};

lazy_static! {
    static ref LD_JSON: Selector =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector");
}

const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Turns a fetched page into zero or more draft records
pub trait ExtractionAdapter: Send + Sync {
    fn extract(&self, page: &FetchResult, target: &CrawlTarget) -> Vec<JobRecord>;
}

/// JSON-LD `JobPosting` and ATS JSON feeds
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredDataAdapter;

impl ExtractionAdapter for StructuredDataAdapter {
    fn extract(&self, page: &FetchResult, target: &CrawlTarget) -> Vec<JobRecord> {
        let trimmed = page.body.trim_start();
        let mut records = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(feed) => from_feed(&feed, target),
                Err(_) => Vec::new(),
            }
        } else {
            from_json_ld(&page.body, &page.final_url, target)
        };

        for record in &mut records {
            record.source = target.id.clone();
        }
        records
    }
}

fn str_field<'a>(node: &'a Value, key: &str) -> Option<&'a str> {
    node.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn clean_text(html: &str) -> String {
    let text = Html::parse_fragment(html)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    truncate_text(&normalize_whitespace(&html_escape::decode_html_entities(&text)), MAX_DESCRIPTION_CHARS)
}

// ============================================================================
// ATS feeds
// ============================================================================

fn from_feed(feed: &Value, target: &CrawlTarget) -> Vec<JobRecord> {
    // Greenhouse: {"jobs": [...]}
    if let Some(jobs) = feed.get("jobs").and_then(Value::as_array) {
        return jobs.iter().filter_map(|job| greenhouse_job(job, target)).collect();
    }
    // Lever: [...]
    if let Some(postings) = feed.as_array() {
        return postings.iter().filter_map(|p| lever_posting(p, target)).collect();
    }
    Vec::new()
}

fn greenhouse_job(job: &Value, target: &CrawlTarget) -> Option<JobRecord> {
    let mut record = JobRecord::new(
        str_field(job, "title")?.trim(),
        target.id.clone(),
        str_field(job, "absolute_url")?,
    );
    record.external_id = job.get("id").map(|id| match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    record.location = job
        .get("location")
        .and_then(|l| str_field(l, "name"))
        .map(str::to_string);
    record.posted_at = str_field(job, "updated_at").map(str::to_string);
    record.description = str_field(job, "content").map(|html| clean_text(&html_escape::decode_html_entities(html)));
    Some(record)
}

fn lever_posting(posting: &Value, target: &CrawlTarget) -> Option<JobRecord> {
    let url = str_field(posting, "hostedUrl").or_else(|| str_field(posting, "applyUrl"))?;
    let mut record = JobRecord::new(str_field(posting, "text")?.trim(), target.id.clone(), url);
    record.external_id = str_field(posting, "id").map(str::to_string);

    let categories = posting.get("categories");
    record.location = categories
        .and_then(|c| str_field(c, "location"))
        .map(str::to_string);
    record.job_type = categories
        .and_then(|c| str_field(c, "commitment"))
        .map(str::to_string);
    record.posted_at = posting
        .get("createdAt")
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|d| d.to_rfc3339());
    record.description = str_field(posting, "descriptionPlain")
        .map(|d| truncate_text(&normalize_whitespace(d), MAX_DESCRIPTION_CHARS));
    Some(record)
}

// ============================================================================
// JSON-LD
// ============================================================================

fn is_job_posting(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case("jobposting"),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| t.eq_ignore_ascii_case("jobposting")),
        _ => false,
    }
}

/// Depth-first walk collecting every `JobPosting` node
fn collect_postings<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    match node {
        Value::Object(map) => {
            if is_job_posting(node) {
                out.push(node);
            }
            for value in map.values() {
                collect_postings(value, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_postings(item, out);
            }
        }
        _ => {}
    }
}

fn from_json_ld(html: &str, page_url: &str, target: &CrawlTarget) -> Vec<JobRecord> {
    let document = Html::parse_document(html);
    let blocks: Vec<Value> = document
        .select(&LD_JSON)
        .filter_map(|script| serde_json::from_str(script.text().collect::<String>().trim()).ok())
        .collect();

    let mut postings = Vec::new();
    for block in &blocks {
        collect_postings(block, &mut postings);
    }

    postings
        .into_iter()
        .filter_map(|posting| json_ld_posting(posting, page_url, target))
        .collect()
}

fn json_ld_posting(posting: &Value, page_url: &str, target: &CrawlTarget) -> Option<JobRecord> {
    let title = str_field(posting, "title")?;
    let company = posting
        .get("hiringOrganization")
        .and_then(|org| str_field(org, "name").or_else(|| org.as_str()))
        .unwrap_or(&target.id);
    let url = str_field(posting, "url").unwrap_or(page_url);

    let mut record = JobRecord::new(normalize_whitespace(title), normalize_whitespace(company), url);
    record.external_id = match posting.get("identifier") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(id @ Value::Object(_)) => id.get("value").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        _ => None,
    };
    record.location = posting.get("jobLocation").and_then(|loc| {
        let loc = loc.as_array().and_then(|a| a.first()).unwrap_or(loc);
        loc.get("address")
            .and_then(|a| str_field(a, "addressLocality").or_else(|| a.as_str()))
            .map(str::to_string)
    });
    record.posted_at = str_field(posting, "datePosted").map(str::to_string);
    record.job_type = match posting.get("employmentType") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(types)) => types.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    record.description = str_field(posting, "description").map(clean_text);
    Some(record)
}
