//! Fetch cascade integration tests
//!
//! Runs the standard direct → proxy → browser cascade against a mock origin
//! and a mock scraping API.

use std::sync::Arc;
use std::time::Duration;

use jobharvest::crawler::{BrowserDriver, DirectStrategy, FetchStrategy, Orchestrator};
use jobharvest::discovery::{DetailUrlBuffer, XhrEndpointCache};
use jobharvest::ratelimit::RateLimiter;
use jobharvest::utils::error::{FailureClass, FetchError};
use jobharvest::utils::retry::BackoffPolicy;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{CAREERS_HTML, CHALLENGE_HTML};
use crate::common::{fast_config, CountingDriver};

fn cascade(config: &jobharvest::config::Config, driver: Option<Arc<dyn BrowserDriver>>) -> Orchestrator {
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit, 8));
    Orchestrator::from_config(
        config,
        limiter,
        driver,
        Arc::new(XhrEndpointCache::new()),
        Arc::new(DetailUrlBuffer::new(100)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_blocked_direct_falls_through_to_proxy() {
    let server = MockServer::start().await;
    let target = format!("{}/careers", server.uri());

    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("api_key", "test-key"))
        .and(query_param("url", target.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(CAREERS_HTML))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.proxy.scraper_api_key = Some("test-key".into());
    config.proxy.scraper_api_url = format!("{}/scrape", server.uri());

    let driver = CountingDriver::new();
    let orchestrator = cascade(&config, Some(driver.clone() as Arc<dyn BrowserDriver>));
    assert_eq!(orchestrator.strategy_names(), vec!["direct", "proxy", "browser"]);

    let result = orchestrator.fetch_default(&target).await.unwrap();
    assert_eq!(result.strategy, "proxy");
    assert_eq!(result.final_url, target);
    assert!(result.body.contains("Graduate jobs"));
    assert_eq!(driver.launches(), 0, "browser must not be touched after a success");
}

#[tokio::test]
async fn test_direct_success_skips_later_strategies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CAREERS_HTML))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.proxy.scraper_api_key = Some("test-key".into());
    config.proxy.scraper_api_url = format!("{}/scrape", server.uri());

    let result = cascade(&config, None)
        .fetch_default(&format!("{}/careers", server.uri()))
        .await
        .unwrap();
    assert_eq!(result.strategy, "direct");
    assert_eq!(result.status, 200);
}

#[tokio::test]
async fn test_not_found_stops_the_cascade() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.proxy.scraper_api_key = Some("test-key".into());
    config.proxy.scraper_api_url = format!("{}/scrape", server.uri());

    let err = cascade(&config, None)
        .fetch_default(&format!("{}/gone", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NotFound(404)));
    assert_eq!(err.class(), FailureClass::NotFound);
}

#[tokio::test]
async fn test_soft_block_without_fallbacks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHALLENGE_HTML))
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.browser.enabled = false;

    let err = cascade(&config, None)
        .fetch_default(&format!("{}/careers", server.uri()))
        .await
        .unwrap_err();
    match err {
        FetchError::AllStrategiesFailed { attempts, last } => {
            assert_eq!(attempts, 1);
            assert!(matches!(*last, FetchError::SoftBlock(_)));
        }
        other => panic!("expected AllStrategiesFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_attempt_budget_bounds_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let config = fast_config();
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit, 8));
    let direct: Arc<dyn FetchStrategy> = Arc::new(
        DirectStrategy::with_settings(Duration::from_secs(5), 5, BackoffPolicy::fast()).unwrap(),
    );
    let orchestrator = Orchestrator::new(vec![direct], limiter, 2);

    let err = orchestrator
        .fetch_default(&format!("{}/careers", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::BudgetExhausted(2)));
}

#[tokio::test]
async fn test_invalid_urls_are_rejected_before_fetching() {
    let orchestrator = cascade(&fast_config(), None);
    for url in ["not a url", "ftp://example.com/jobs"] {
        let err = orchestrator.fetch_default(url).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)), "{url}");
    }
}
