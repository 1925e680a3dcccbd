//! URL discovery
//!
//! Turns a [`CrawlTarget`] into a short list of validated URLs.
//!
//! # Strategy order
//!
//! 1. Sitemap enumeration (listing-like entries; detail-like ones go to the
//!    detail buffer)
//! 2. Domain-scoped web search
//! 3. Homepage anchor harvesting
//! 4. Endpoints captured during earlier browser fetches
//! 5. Static URL-pattern library
//! 6. URL suggestions (only when nothing validated so far)
//! 7. The bare origin
//!
//! Candidates from each source are probed as they arrive. Resolution stops
//! once `max_working_urls` candidates validated or `max_candidates` probes
//! were spent. Results are cached per target; a fresh cache entry
//! short-circuits everything. An empty result means "temporarily
//! unresolvable", never an error.

pub mod cache;
pub mod homepage;
pub mod patterns;
pub mod probe;
pub mod search;
pub mod sitemap;
pub mod suggest;

pub use cache::{DetailUrlBuffer, DiscoveryCache, XhrEndpointCache};
pub use probe::{ProbeMode, ProbeVerdict};
pub use search::{SearchClient, SearchTerms};
pub use suggest::SuggestClient;

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::crawler::orchestrator::Orchestrator;
use crate::metrics::{self, MeteredResource};
use crate::models::CrawlTarget;
use crate::utils::error::DiscoveryError;

/// Where a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    Sitemap,
    Search,
    Homepage,
    Xhr,
    Pattern,
    Suggestion,
    Origin,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Search => "search",
            Self::Homepage => "homepage",
            Self::Xhr => "xhr",
            Self::Pattern => "pattern",
            Self::Suggestion => "suggestion",
            Self::Origin => "origin",
        }
    }
}

/// Probe limits for one resolution
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryLimits {
    /// Candidates probed per target
    pub max_candidates: usize,
    /// Validated URLs after which probing stops
    pub max_working_urls: usize,
}

impl DiscoveryLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_candidates: config.effective_max_candidates().max(1),
            max_working_urls: config.discovery.max_working_urls.max(1),
        }
    }

    /// Probes any one source may use, leaving room for later sources
    fn per_source(&self) -> usize {
        (self.max_candidates / 2).max(1)
    }
}

/// Probe bookkeeping for one resolution
struct Resolution {
    limits: DiscoveryLimits,
    tried: HashSet<String>,
    probes: usize,
    working: Vec<String>,
}

impl Resolution {
    fn new(limits: DiscoveryLimits) -> Self {
        Self {
            limits,
            tried: HashSet::new(),
            probes: 0,
            working: Vec::new(),
        }
    }

    fn done(&self) -> bool {
        self.working.len() >= self.limits.max_working_urls
            || self.probes >= self.limits.max_candidates
    }
}

/// URL discovery service, shared by all workers of a run
pub struct UrlDiscovery {
    orchestrator: Arc<Orchestrator>,
    cache: Arc<DiscoveryCache>,
    xhr_cache: Arc<XhrEndpointCache>,
    detail_buffer: Arc<DetailUrlBuffer>,
    search: Option<SearchClient>,
    suggest: Option<SuggestClient>,
    limits: DiscoveryLimits,
}

impl UrlDiscovery {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        cache: Arc<DiscoveryCache>,
        xhr_cache: Arc<XhrEndpointCache>,
        detail_buffer: Arc<DetailUrlBuffer>,
        limits: DiscoveryLimits,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            xhr_cache,
            detail_buffer,
            search: None,
            suggest: None,
            limits,
        }
    }

    pub fn with_search(mut self, search: SearchClient) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_suggest(mut self, suggest: SuggestClient) -> Self {
        self.suggest = Some(suggest);
        self
    }

    /// Wire up optional providers from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a provider's HTTP client cannot be created
    pub fn from_config(
        config: &Config,
        orchestrator: Arc<Orchestrator>,
        cache: Arc<DiscoveryCache>,
        xhr_cache: Arc<XhrEndpointCache>,
        detail_buffer: Arc<DetailUrlBuffer>,
        search_quota: Arc<MeteredResource>,
        suggest_usage: Arc<MeteredResource>,
    ) -> Result<Self, DiscoveryError> {
        let mut discovery = Self::new(
            orchestrator,
            cache,
            xhr_cache,
            detail_buffer,
            DiscoveryLimits::from_config(config),
        );

        let search = SearchClient::new(&config.discovery, search_quota)?;
        if search.is_configured() {
            discovery = discovery.with_search(search);
        }
        if let Some(key) = &config.discovery.suggest_api_key {
            discovery = discovery.with_suggest(SuggestClient::new(key.clone(), suggest_usage)?);
        }

        info!(
            search = discovery.search.is_some(),
            suggest = discovery.suggest.is_some(),
            max_candidates = discovery.limits.max_candidates,
            "URL discovery ready"
        );
        Ok(discovery)
    }

    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }

    /// Detail-page URLs buffered for a target
    pub fn detail_urls(&self, target: &CrawlTarget) -> Vec<String> {
        self.detail_buffer.get(&buffer_key(target))
    }

    /// Remember detail-page URLs found while crawling a target
    pub fn register_detail_urls(&self, target: &CrawlTarget, urls: Vec<String>) {
        if !urls.is_empty() {
            self.detail_buffer.extend(&buffer_key(target), urls);
        }
    }

    /// Validated URLs for a target; empty when nothing could be validated
    pub async fn resolve(&self, target: &CrawlTarget) -> Vec<String> {
        self.resolve_with(target, &SearchTerms::default()).await
    }

    /// Like [`resolve`](Self::resolve), searching with the run's own terms
    pub async fn resolve_with(&self, target: &CrawlTarget, terms: &SearchTerms) -> Vec<String> {
        if let Some(urls) = self.cache.get(&target.id) {
            metrics::record_discovery_cache(true);
            debug!(target = %target.id, urls = urls.len(), "Discovery cache hit");
            return urls;
        }
        metrics::record_discovery_cache(false);

        let mut run = Resolution::new(self.limits);

        // 1. Sitemaps
        match sitemap::discover_sitemaps(&self.orchestrator, &target.origin).await {
            Ok(found) => {
                self.register_detail_urls(target, found.detail.clone());
                let mut listing = found.listing;
                // Short paths are section pages rather than filtered searches
                listing.sort_by_key(String::len);
                self.try_candidates(&mut run, CandidateSource::Sitemap, listing, probe::ProbeMode::JobPage)
                    .await;
            }
            Err(e) => debug!(target = %target.id, error = %e, "Sitemap discovery skipped"),
        }

        // 2. Search
        if !run.done() {
            if let Some(search) = &self.search {
                match search.search_domain(&target.domain(), terms).await {
                    Ok(urls) => {
                        self.try_candidates(&mut run, CandidateSource::Search, urls, ProbeMode::JobPage)
                            .await
                    }
                    Err(e) => debug!(target = %target.id, error = %e, "Search discovery skipped"),
                }
            }
        }

        // 3. Homepage links
        if !run.done() {
            match homepage::discover_from_homepage(&self.orchestrator, &target.origin).await {
                Ok(urls) => {
                    self.try_candidates(&mut run, CandidateSource::Homepage, urls, ProbeMode::JobPage)
                        .await
                }
                Err(e) => debug!(target = %target.id, error = %e, "Homepage discovery skipped"),
            }
        }

        // 4. Captured endpoints
        if !run.done() {
            let endpoints = self.xhr_cache.get(&buffer_key(target));
            self.try_candidates(&mut run, CandidateSource::Xhr, endpoints, ProbeMode::JobPage)
                .await;
        }

        // 5. Pattern library
        if !run.done() {
            let known = patterns::known_patterns(target);
            self.try_candidates(&mut run, CandidateSource::Pattern, known, ProbeMode::JobPage)
                .await;
        }

        // 6. Suggestions, only when everything else came up empty
        if run.working.is_empty() && !run.done() {
            if let Some(suggest) = &self.suggest {
                let urls = suggest.suggest(target).await;
                self.try_candidates(&mut run, CandidateSource::Suggestion, urls, ProbeMode::JobPage)
                    .await;
            }
        }

        // 7. Bare origin
        if run.working.is_empty() && !run.done() {
            let origin = format!("{}/", target.origin);
            self.try_candidates(&mut run, CandidateSource::Origin, vec![origin], ProbeMode::Loaded)
                .await;
        }

        if run.working.is_empty() {
            info!(target = %target.id, probes = run.probes, "No working URLs found");
        } else {
            info!(
                target = %target.id,
                working = run.working.len(),
                probes = run.probes,
                "URLs discovered"
            );
            self.cache.insert(&target.id, run.working.clone());
        }

        run.working
    }

    async fn try_candidates(
        &self,
        run: &mut Resolution,
        source: CandidateSource,
        candidates: Vec<String>,
        mode: ProbeMode,
    ) {
        let mut used = 0usize;
        let mut found = 0usize;

        for candidate in candidates {
            if run.done() || used >= run.limits.per_source() {
                break;
            }
            if !run.tried.insert(candidate.clone()) {
                continue;
            }

            used += 1;
            run.probes += 1;
            if probe::probe(&self.orchestrator, &candidate, mode).await.is_working() {
                found += 1;
                run.working.push(candidate);
            }
        }

        if used > 0 {
            debug!(source = source.as_str(), probed = used, working = found, "Candidates probed");
        }
        metrics::record_discovery(source.as_str(), found);
    }
}

/// Key for per-target buffers shared with the browser strategy
fn buffer_key(target: &CrawlTarget) -> String {
    target.host().unwrap_or_else(|| target.id.clone())
}
