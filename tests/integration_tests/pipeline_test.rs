//! Run context and dedup persistence tests
//!
//! Tests the pieces a run wires together:
//! 1. Building the context from configuration
//! 2. Same-day dedup across separate runs and the day rollover
//! 3. Persisted discovery state
//! 4. Extraction feeding dedup and the ingest client

use chrono::NaiveDate;
use std::sync::Arc;

use jobharvest::crawler::{ExtractionAdapter, RunContext, StructuredDataAdapter};
use jobharvest::dedup::{dedup_batch, Deduplicator, SeenTodayStore};
use jobharvest::error::{Error, ErrorCategory, HarvestErrorTrait};
use jobharvest::ingest::{IngestClient, SECRET_HEADER};
use jobharvest::models::{CrawlTarget, FetchResult, PriorityTier};
use jobharvest::storage::StateFile;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{GREENHOUSE_FEED, POSTING_HTML};
use crate::common::{config_in, create_test_record, fast_config};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn page(url: &str, body: &str) -> FetchResult {
    FetchResult {
        final_url: url.to_string(),
        status: 200,
        headers: Default::default(),
        body: body.to_string(),
        strategy: "direct",
    }
}

#[test]
fn test_context_rejects_invalid_config() {
    let mut config = fast_config();
    config.crawler.workers = 0;

    let err = RunContext::from_config(config, None, day(1)).err().unwrap();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(!err.is_recoverable());
}

#[test]
fn test_context_without_secret_is_dry_run() {
    let dir = TempDir::new().unwrap();
    let context = RunContext::from_config(config_in(dir.path()), None, day(1)).unwrap();
    assert!(context.ingest.is_none());
    assert_eq!(context.usage().len(), 2);
}

#[test]
fn test_same_day_dedup_across_runs() {
    let dir = TempDir::new().unwrap();
    let record = create_test_record("Graduate Analyst", "Acme", "https://acme.com/jobs/analyst");

    let first = RunContext::from_config(config_in(dir.path()), None, day(1)).unwrap();
    assert!(first.dedup.should_emit(&record));
    first.persist_state().unwrap();
    assert!(dir.path().join("seen-today.json").exists());

    let second = RunContext::from_config(config_in(dir.path()), None, day(1)).unwrap();
    assert!(!second.dedup.should_emit(&record), "seen earlier the same day");

    let next_day = RunContext::from_config(config_in(dir.path()), None, day(2)).unwrap();
    assert!(next_day.dedup.should_emit(&record), "store resets on a new day");
}

#[test]
fn test_persisted_discovery_state() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.discovery.persist_cache = true;

    let context = RunContext::from_config(config.clone(), None, day(1)).unwrap();
    let target = CrawlTarget::new("acme", "https://acme.com", PriorityTier::Medium);
    context
        .discovery
        .register_detail_urls(&target, vec!["https://acme.com/jobs/1".into()]);
    context
        .discovery
        .cache()
        .insert("acme", vec!["https://acme.com/careers".into()]);
    context.persist_state().unwrap();

    let reloaded = RunContext::from_config(config, None, day(1)).unwrap();
    assert_eq!(
        reloaded.discovery.cache().get("acme"),
        Some(vec!["https://acme.com/careers".to_string()])
    );
    assert_eq!(reloaded.discovery.detail_urls(&target), vec!["https://acme.com/jobs/1".to_string()]);
}

#[test]
fn test_extraction_feeds_dedup() {
    let target = CrawlTarget::new("acme", "https://boards.greenhouse.io/acme", PriorityTier::High);
    let adapter = StructuredDataAdapter;
    let dedup = Deduplicator::with_store(SeenTodayStore::in_memory(day(1)));

    let feed = page("https://boards-api.greenhouse.io/v1/boards/acme/jobs", GREENHOUSE_FEED);
    let mut records = adapter.extract(&feed, &target);
    records.extend(adapter.extract(&feed, &target));
    assert_eq!(records.len(), 4);

    let mut emitted = 0;
    for record in &mut records {
        jobharvest::dedup::stamp(record);
        if dedup.should_emit(record) {
            emitted += 1;
        }
    }
    assert_eq!(emitted, 2);

    let posting = adapter.extract(&page("https://acme.com/jobs/gce", POSTING_HTML), &target);
    assert_eq!(posting.len(), 1);
    assert_eq!(posting[0].company, "Acme Engineering");
    assert_eq!(posting[0].location.as_deref(), Some("Bristol"));
}

#[tokio::test]
async fn test_ingest_round() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/ingest"))
        .and(header(SECRET_HEADER, "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "count": 2 })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.ingest.api_url = server.uri();
    config.ingest.secret = Some("s3cret".into());

    let context = Arc::new(RunContext::from_config(config, None, day(1)).unwrap());
    let client: &IngestClient = context.ingest.as_ref().unwrap();

    let a = create_test_record("Graduate Analyst", "Acme", "https://acme.com/jobs/analyst");
    let b = create_test_record("Placement Student", "Acme", "https://acme.com/jobs/placement");
    let (batch, dropped) = dedup_batch(vec![a.clone(), b, a]);
    assert_eq!(dropped, 1);

    assert_eq!(client.upsert(&batch).await.unwrap(), 2);
}

#[test]
fn test_state_files_are_json() {
    let dir = TempDir::new().unwrap();
    let context = RunContext::from_config(config_in(dir.path()), None, day(5)).unwrap();
    context
        .dedup
        .should_emit(&create_test_record("Trainee Surveyor", "Acme", "https://acme.com/jobs/ts"));
    context.persist_state().unwrap();

    let raw: serde_json::Value = StateFile::in_dir(dir.path(), "seen-today.json")
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(raw["date"], "2024-03-05");
    assert_eq!(raw["keys"].as_array().map(Vec::len), Some(1));
}
