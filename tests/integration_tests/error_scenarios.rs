//! Error scenario integration tests
//!
//! Tests various failure modes and error handling:
//! 1. Network timeouts
//! 2. Connection failures
//! 3. Rate limiting with Retry-After
//! 4. Ingestion rejections
//! 5. Malformed pages and feeds

use std::sync::Arc;
use std::time::Duration;

use jobharvest::crawler::{DirectStrategy, ExtractionAdapter, FetchStrategy, Orchestrator, StructuredDataAdapter};
use jobharvest::error::{Error, ErrorCategory, HarvestErrorTrait};
use jobharvest::ingest::IngestClient;
use jobharvest::models::{CrawlTarget, FetchResult, PriorityTier};
use jobharvest::ratelimit::RateLimiter;
use jobharvest::utils::error::{FailureClass, FetchError, IngestError};
use jobharvest::utils::retry::BackoffPolicy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::CAREERS_HTML;
use crate::common::{create_test_record, fast_config};

fn direct_only(timeout: Duration, retries: u32, budget: u32) -> Orchestrator {
    let config = fast_config();
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit, 8));
    let direct: Arc<dyn FetchStrategy> =
        Arc::new(DirectStrategy::with_settings(timeout, retries, BackoffPolicy::fast()).unwrap());
    Orchestrator::new(vec![direct], limiter, budget)
}

// ============================================================================
// Network Error Tests
// ============================================================================

#[tokio::test]
async fn test_timeout_handling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(CAREERS_HTML)
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let orchestrator = direct_only(Duration::from_millis(100), 1, 4);
    let err = orchestrator
        .fetch_default(&format!("{}/careers", server.uri()))
        .await
        .unwrap_err();

    match err {
        FetchError::AllStrategiesFailed { attempts, last } => {
            assert_eq!(attempts, 2, "one try plus one retry");
            assert!(matches!(*last, FetchError::Timeout));
        }
        other => panic!("Expected timeout exhaustion, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused() {
    let orchestrator = direct_only(Duration::from_secs(1), 0, 2);
    let err = orchestrator.fetch_default("http://127.0.0.1:1/jobs").await.unwrap_err();

    assert_eq!(err.class(), FailureClass::Fatal);
    let unified = Error::from(err);
    assert_eq!(unified.category(), ErrorCategory::Network);
}

#[tokio::test]
async fn test_rate_limited_then_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CAREERS_HTML))
        .mount(&server)
        .await;

    let orchestrator = direct_only(Duration::from_secs(5), 2, 4);
    let result = orchestrator
        .fetch_default(&format!("{}/careers", server.uri()))
        .await
        .unwrap();
    assert_eq!(result.status, 200);
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(2));
}

// ============================================================================
// Ingest Error Tests
// ============================================================================

#[tokio::test]
async fn test_ingest_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/ingest"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.ingest.api_url = server.uri();
    config.ingest.secret = Some("wrong".into());
    let client = IngestClient::new(&config.ingest).unwrap();

    let err = client
        .upsert(&[create_test_record("Graduate Analyst", "Acme", "https://acme.com/jobs/a")])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Unauthorized));
    assert!(!err.is_recoverable());
    assert_eq!(Error::from(err).category(), ErrorCategory::Ingest);
}

#[tokio::test]
async fn test_ingest_server_error_is_recoverable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/ingest"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.ingest.api_url = server.uri();
    config.ingest.secret = Some("s3cret".into());
    let client = IngestClient::new(&config.ingest).unwrap();

    let err = client
        .upsert(&[create_test_record("Graduate Analyst", "Acme", "https://acme.com/jobs/a")])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Rejected { status: 502, ref body } if body == "bad gateway"));
    assert!(Error::from(err).is_recoverable());
}

// ============================================================================
// Malformed Content Tests
// ============================================================================

#[test]
fn test_malformed_content_yields_no_records() {
    let target = CrawlTarget::new("acme", "https://acme.com", PriorityTier::Low);
    let bodies = [
        "",
        "{\"jobs\": [{\"title\": 5}]}",
        "[1, 2, 3]",
        "<html><script type=\"application/ld+json\">{broken</script></html>",
        "<html><script type=\"application/ld+json\">{\"@type\": \"JobPosting\"}</script></html>",
    ];

    for body in bodies {
        let page = FetchResult {
            final_url: "https://acme.com/careers".into(),
            status: 200,
            headers: Default::default(),
            body: body.into(),
            strategy: "direct",
        };
        assert!(StructuredDataAdapter.extract(&page, &target).is_empty(), "{body}");
    }
}
