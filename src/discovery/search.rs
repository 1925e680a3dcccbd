//! Domain-scoped web search
//!
//! SerpAPI is asked first; Serper is the fallback when SerpAPI is not
//! configured or returns nothing. Every provider call consumes one unit of the
//! per-run search quota.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::metrics::MeteredResource;
use crate::utils::error::DiscoveryError;
use crate::utils::strip_fragment;

pub const SERPAPI_URL: &str = "https://serpapi.com/search.json";
pub const SERPER_URL: &str = "https://google.serper.dev/search";

/// Results kept per target
pub const MAX_SEARCH_RESULTS: usize = 30;

/// Queries issued per target when the run supplies none
pub const DEFAULT_QUERIES: &[&str] = &["graduate jobs", "careers", "internship placement"];

/// Results requested per provider page
const RESULTS_PER_PAGE: u32 = 20;

/// What to search for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerms {
    /// Free-text queries, each prefixed with `site:{domain}`
    pub queries: Vec<String>,
    /// Result pages fetched per query
    pub pages: u32,
}

impl SearchTerms {
    /// Falls back to [`DEFAULT_QUERIES`] when `queries` is empty
    pub fn new(queries: Vec<String>, pages: u32) -> Self {
        if queries.is_empty() {
            return Self {
                pages: pages.max(1),
                ..Self::default()
            };
        }
        Self {
            queries,
            pages: pages.max(1),
        }
    }
}

impl Default for SearchTerms {
    fn default() -> Self {
        Self {
            queries: DEFAULT_QUERIES.iter().map(|q| q.to_string()).collect(),
            pages: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    link: String,
}

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

/// Search API client with a shared quota
pub struct SearchClient {
    client: Client,
    serpapi_key: Option<String>,
    serper_key: Option<String>,
    serpapi_url: String,
    serper_url: String,
    quota: Arc<MeteredResource>,
}

impl SearchClient {
    /// Create from discovery settings
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Search` if the HTTP client cannot be created
    pub fn new(config: &DiscoveryConfig, quota: Arc<MeteredResource>) -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| DiscoveryError::Search {
                provider: "client".into(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            serpapi_key: config.serpapi_key.clone(),
            serper_key: config.serper_key.clone(),
            serpapi_url: SERPAPI_URL.to_string(),
            serper_url: SERPER_URL.to_string(),
            quota,
        })
    }

    /// Point both providers at other base URLs
    pub fn with_endpoints(mut self, serpapi_url: impl Into<String>, serper_url: impl Into<String>) -> Self {
        self.serpapi_url = serpapi_url.into();
        self.serper_url = serper_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.serpapi_key.is_some() || self.serper_key.is_some()
    }

    /// Search `site:{domain} {query}` for each query, `terms.pages` result
    /// pages deep
    ///
    /// Stops early when the quota runs out, keeping what was found so far.
    ///
    /// # Errors
    ///
    /// - `NotConfigured` when neither provider has a key
    /// - `QuotaExhausted` when the quota was already used up before any call
    pub async fn search_domain(
        &self,
        domain: &str,
        terms: &SearchTerms,
    ) -> Result<Vec<String>, DiscoveryError> {
        if !self.is_configured() {
            return Err(DiscoveryError::NotConfigured("search API".into()));
        }

        let mut collected: Vec<String> = Vec::new();
        let mut calls = 0usize;

        'queries: for query in &terms.queries {
            let site_query = format!("site:{domain} {query}");

            for page in 0..terms.pages.max(1) {
                let mut results = Vec::new();
                if self.serpapi_key.is_some() {
                    if !self.quota.try_consume(1) {
                        break 'queries;
                    }
                    calls += 1;
                    results = self.serpapi(&site_query, page).await.unwrap_or_else(|e| {
                        warn!(error = %e, "SerpAPI search failed");
                        Vec::new()
                    });
                }

                if results.is_empty() && self.serper_key.is_some() {
                    if !self.quota.try_consume(1) {
                        break 'queries;
                    }
                    calls += 1;
                    results = self.serper(&site_query, page).await.unwrap_or_else(|e| {
                        warn!(error = %e, "Serper search failed");
                        Vec::new()
                    });
                }

                if results.is_empty() {
                    break;
                }
                collected.extend(results);
            }
        }

        if calls == 0 && collected.is_empty() {
            return Err(DiscoveryError::QuotaExhausted(self.quota.snapshot().name));
        }

        let unique = unique_urls(collected, MAX_SEARCH_RESULTS);
        debug!(domain, calls, results = unique.len(), "Search discovery finished");
        Ok(unique)
    }

    async fn serpapi(&self, query: &str, page: u32) -> Result<Vec<String>, DiscoveryError> {
        let Some(key) = &self.serpapi_key else {
            return Ok(Vec::new());
        };
        let start = (page * RESULTS_PER_PAGE).to_string();
        let response = self
            .client
            .get(&self.serpapi_url)
            .header("Accept", "application/json")
            .query(&[
                ("q", query),
                ("engine", "google"),
                ("num", "20"),
                ("start", start.as_str()),
                ("api_key", key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| search_error("serpapi", e))?;

        if !response.status().is_success() {
            return Err(search_error("serpapi", format!("HTTP {}", response.status())));
        }

        let body: SerpApiResponse = response.json().await.map_err(|e| search_error("serpapi", e))?;
        Ok(links(body.organic_results))
    }

    async fn serper(&self, query: &str, page: u32) -> Result<Vec<String>, DiscoveryError> {
        let Some(key) = &self.serper_key else {
            return Ok(Vec::new());
        };
        let response = self
            .client
            .post(&self.serper_url)
            .header("X-API-KEY", key)
            .json(&json!({ "q": query, "num": RESULTS_PER_PAGE, "page": page + 1 }))
            .send()
            .await
            .map_err(|e| search_error("serper", e))?;

        if !response.status().is_success() {
            return Err(search_error("serper", format!("HTTP {}", response.status())));
        }

        let body: SerperResponse = response.json().await.map_err(|e| search_error("serper", e))?;
        Ok(links(body.organic))
    }
}

fn search_error(provider: &str, reason: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::Search {
        provider: provider.to_string(),
        reason: reason.to_string(),
    }
}

fn links(results: Vec<OrganicResult>) -> Vec<String> {
    results
        .into_iter()
        .map(|r| r.link)
        .filter(|link| link.starts_with("http"))
        .collect()
}

/// Dedupe ignoring fragments, keep first occurrence, cap at `limit`
fn unique_urls(urls: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(strip_fragment(url).to_string()))
        .take(limit)
        .collect()
}
