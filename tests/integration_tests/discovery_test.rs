//! URL discovery integration tests

use std::sync::Arc;
use std::time::Duration;

use jobharvest::crawler::{DirectStrategy, FetchStrategy, Orchestrator};
use jobharvest::config::{DiscoveryConfig, RunConfig};
use jobharvest::discovery::{
    DetailUrlBuffer, DiscoveryCache, DiscoveryLimits, SearchClient, SearchTerms, UrlDiscovery, XhrEndpointCache,
};
use jobharvest::metrics::MeteredResource;
use jobharvest::models::{CrawlTarget, PriorityTier};
use jobharvest::ratelimit::RateLimiter;
use jobharvest::scheduler::RotationScheduler;
use jobharvest::storage::StateFile;
use jobharvest::utils::retry::BackoffPolicy;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::CAREERS_HTML;
use crate::common::fast_config;

fn discovery(cache: Arc<DiscoveryCache>) -> UrlDiscovery {
    let config = fast_config();
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit, 8));
    let direct: Arc<dyn FetchStrategy> = Arc::new(
        DirectStrategy::with_settings(Duration::from_secs(5), 0, BackoffPolicy::fast()).unwrap(),
    );
    UrlDiscovery::new(
        Arc::new(Orchestrator::new(vec![direct], limiter, 4)),
        cache,
        Arc::new(XhrEndpointCache::new()),
        Arc::new(DetailUrlBuffer::new(100)),
        DiscoveryLimits {
            max_candidates: 6,
            max_working_urls: 1,
        },
    )
}

async fn mount_not_found(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(10)
        .mount(server)
        .await;
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_resolves_configured_pattern() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graduate-jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CAREERS_HTML))
        .mount(&server)
        .await;
    mount_not_found(&server).await;

    let discovery = discovery(Arc::new(DiscoveryCache::new(Duration::from_secs(3600))));
    let target = CrawlTarget::new("acme", server.uri(), PriorityTier::Medium).with_patterns(&["/graduate-jobs"]);

    let urls = discovery.resolve(&target).await;
    assert_eq!(urls, vec![format!("{}/graduate-jobs", server.uri())]);
    assert_eq!(discovery.cache().get("acme"), Some(urls));
}

#[tokio::test]
async fn test_cached_target_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graduate-jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CAREERS_HTML))
        .mount(&server)
        .await;
    mount_not_found(&server).await;

    let discovery = discovery(Arc::new(DiscoveryCache::new(Duration::from_secs(3600))));
    let target = CrawlTarget::new("acme", server.uri(), PriorityTier::Medium).with_patterns(&["/graduate-jobs"]);

    let first = discovery.resolve(&target).await;
    assert!(!first.is_empty());
    let before = request_count(&server).await;

    let second = discovery.resolve(&target).await;
    assert_eq!(first, second);
    assert_eq!(request_count(&server).await, before, "cache hit must not fetch");
}

#[tokio::test]
async fn test_sitemap_listing_and_details() {
    let server = MockServer::start().await;
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("User-agent: *\nDisallow: /admin\nSitemap: {uri}/sitemap.xml\n")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{uri}/about-us</loc></url>
  <url><loc>{uri}/graduate-jobs</loc></url>
  <url><loc>{uri}/vacancy/4411-trainee-surveyor</loc></url>
</urlset>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graduate-jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CAREERS_HTML))
        .mount(&server)
        .await;
    mount_not_found(&server).await;

    let discovery = discovery(Arc::new(DiscoveryCache::new(Duration::from_secs(3600))));
    let target = CrawlTarget::new("acme", uri.clone(), PriorityTier::High);

    let urls = discovery.resolve(&target).await;
    assert_eq!(urls, vec![format!("{uri}/graduate-jobs")]);

    let details = discovery.detail_urls(&target);
    assert!(details.contains(&format!("{uri}/vacancy/4411-trainee-surveyor")));
    assert!(!details.contains(&format!("{uri}/about-us")));
}

#[tokio::test]
async fn test_unresolvable_target_is_empty_and_not_cached() {
    let server = MockServer::start().await;
    mount_not_found(&server).await;

    let discovery = discovery(Arc::new(DiscoveryCache::new(Duration::from_secs(3600))));
    let target = CrawlTarget::new("nowhere", server.uri(), PriorityTier::Low);

    assert!(discovery.resolve(&target).await.is_empty());
    assert!(discovery.cache().get("nowhere").is_none());
    assert!(request_count(&server).await > 0);
}

#[tokio::test]
async fn test_persisted_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let file = StateFile::in_dir(dir.path(), "discovery-cache.json");
    let urls = vec!["https://acme.com/graduate-jobs".to_string()];

    let cache = DiscoveryCache::persistent(Duration::from_secs(3600), file.clone());
    cache.insert("acme", urls.clone());
    cache.flush().unwrap();

    let reloaded = Arc::new(DiscoveryCache::persistent(Duration::from_secs(3600), file));
    assert_eq!(reloaded.get("acme"), Some(urls.clone()));

    // A reloaded hit still resolves without any network access
    let discovery = discovery(reloaded);
    let target = CrawlTarget::new("acme", "https://acme.com", PriorityTier::Medium);
    assert_eq!(discovery.resolve(&target).await, urls);
}

#[tokio::test]
async fn test_search_queries_differ_by_slot() {
    let site = MockServer::start().await;
    mount_not_found(&site).await;
    let search = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "organic": [] })))
        .mount(&search)
        .await;

    let target = CrawlTarget::new("acme", site.uri(), PriorityTier::Medium);
    let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(3, 0, 0)
        .unwrap();
    let scheduler = RotationScheduler::new();

    let mut sent_per_slot = Vec::new();
    for slot in [0, 1] {
        let run = RunConfig {
            run_slot_override: Some(slot),
            ..RunConfig::default()
        };
        let plan = scheduler.plan_run(now, &run).unwrap();
        let queries = plan.search_queries(&target.id, 2);
        assert_eq!(queries.len(), 2);

        let config = DiscoveryConfig {
            serper_key: Some("key".into()),
            ..DiscoveryConfig::default()
        };
        let client = SearchClient::new(&config, Arc::new(MeteredResource::unlimited("searches")))
            .unwrap()
            .with_endpoints(format!("{}/serpapi", search.uri()), format!("{}/search", search.uri()));
        let discovery = discovery(Arc::new(DiscoveryCache::new(Duration::from_secs(3600)))).with_search(client);

        let before = search.received_requests().await.unwrap_or_default().len();
        discovery
            .resolve_with(&target, &SearchTerms::new(queries.clone(), plan.pages_per_query()))
            .await;

        let sent: Vec<String> = search
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .skip(before)
            .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
            .filter_map(|body| body["q"].as_str().map(str::to_string))
            .collect();
        let expected: Vec<String> = queries
            .iter()
            .map(|q| format!("site:{} {q}", target.domain()))
            .collect();
        assert_eq!(sent, expected);
        sent_per_slot.push(sent);
    }

    assert!(sent_per_slot[0].iter().all(|q| !sent_per_slot[1].contains(q)));
}
