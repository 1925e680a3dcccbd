//! Sitemap enumeration
//!
//! `robots.txt` is read for `Sitemap:` pointers; without any, the usual
//! locations are tried. Sitemap indexes are expanded breadth-first up to
//! [`MAX_SITEMAP_DEPTH`] levels and [`MAX_SITEMAPS`] documents. Every entry is
//! classified independently as listing-like and/or detail-like.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use tracing::debug;
use url::Url;

use crate::crawler::orchestrator::Orchestrator;
use crate::utils::error::DiscoveryError;

pub const MAX_SITEMAPS: usize = 15;
pub const MAX_URLS_PER_SITEMAP: usize = 200;
pub const MAX_SITEMAP_DEPTH: usize = 2;
pub const MAX_LISTING_URLS: usize = 200;
pub const MAX_DETAIL_URLS: usize = 400;

/// Documents shorter than this are error pages or empty indexes
const MIN_SITEMAP_BYTES: usize = 100;

/// Attempts spent on a single robots.txt or sitemap fetch
const SITEMAP_ATTEMPT_BUDGET: u32 = 2;

const FALLBACK_SITEMAP_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml", "/sitemap/sitemap.xml"];

lazy_static! {
    static ref LISTING_RE: Regex =
        Regex::new(r"search|jobs|intern|placement|graduate|vacanc|opportunit|scheme|programme")
            .expect("valid listing regex");
    static ref DETAIL_RE: Regex =
        Regex::new(r"job|vacanc|role|position|opportunit").expect("valid detail regex");
    static ref NOT_DETAIL_RE: Regex = Regex::new(r"sitemap|search|feed|rss").expect("valid regex");
    static ref ENTRY_RE: Regex =
        Regex::new(r"(?is)<(?:\w+:)?(?:url|sitemap)\b[^>]*>(.*?)</(?:\w+:)?(?:url|sitemap)>")
            .expect("valid entry regex");
    static ref LOC_RE: Regex =
        Regex::new(r"(?is)<(?:\w+:)?loc\b[^>]*>(.*?)</(?:\w+:)?loc>").expect("valid loc regex");
}

/// URL looks like a search or listing page
pub fn is_listing_like(url: &str) -> bool {
    LISTING_RE.is_match(&url.to_lowercase())
}

/// URL looks like a single posting
pub fn is_detail_like(url: &str) -> bool {
    let lower = url.to_lowercase();
    DETAIL_RE.is_match(&lower) && !NOT_DETAIL_RE.is_match(&lower)
}

/// Classified sitemap entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapUrls {
    pub listing: Vec<String>,
    pub detail: Vec<String>,
}

impl SitemapUrls {
    pub fn is_empty(&self) -> bool {
        self.listing.is_empty() && self.detail.is_empty()
    }
}

/// `Sitemap:` lines from a robots.txt body, resolved against `base`
pub fn robots_sitemaps(robots: &str, base: &Url) -> Vec<String> {
    robots
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let (field, value) = line.split_once(':')?;
            if !field.trim().eq_ignore_ascii_case("sitemap") {
                return None;
            }
            base.join(value.trim()).ok().map(String::from)
        })
        .collect()
}

/// `<loc>` values of every `<url>` and `<sitemap>` entry, in document order
pub fn parse_sitemap(xml: &str, base: &Url) -> Vec<String> {
    ENTRY_RE
        .captures_iter(xml)
        .filter_map(|entry| {
            let loc = LOC_RE.captures(entry.get(1)?.as_str())?.get(1)?.as_str();
            let loc = loc
                .trim()
                .trim_start_matches("<![CDATA[")
                .trim_end_matches("]]>")
                .trim();
            if loc.is_empty() {
                return None;
            }
            let decoded = html_escape::decode_html_entities(loc);
            base.join(&decoded).ok().map(String::from)
        })
        .collect()
}

fn push_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, url: &str, cap: usize) {
    if out.len() < cap && seen.insert(url.to_string()) {
        out.push(url.to_string());
    }
}

async fn fetch_text(orchestrator: &Orchestrator, url: &str) -> Option<String> {
    match orchestrator.fetch(url, SITEMAP_ATTEMPT_BUDGET).await {
        Ok(result) => Some(result.body),
        Err(e) => {
            debug!(url = %url, error = %e, "Sitemap source unavailable");
            None
        }
    }
}

/// Enumerate sitemap entries for an origin
///
/// Unreachable robots.txt or sitemaps simply contribute nothing.
///
/// # Errors
///
/// Returns `DiscoveryError::Malformed` if `origin` is not an absolute URL
pub async fn discover_sitemaps(
    orchestrator: &Orchestrator,
    origin: &str,
) -> Result<SitemapUrls, DiscoveryError> {
    let base = Url::parse(origin).map_err(|e| DiscoveryError::Malformed(format!("{origin}: {e}")))?;

    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    if let Ok(robots_url) = base.join("/robots.txt") {
        if let Some(robots) = fetch_text(orchestrator, robots_url.as_str()).await {
            queue.extend(robots_sitemaps(&robots, &base).into_iter().map(|u| (u, 0)));
        }
    }
    if queue.is_empty() {
        queue.extend(
            FALLBACK_SITEMAP_PATHS
                .iter()
                .filter_map(|p| base.join(p).ok())
                .map(|u| (String::from(u), 0)),
        );
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut result = SitemapUrls::default();
    let mut seen_listing = HashSet::new();
    let mut seen_detail = HashSet::new();

    while let Some((sitemap_url, depth)) = queue.pop_front() {
        if visited.len() >= MAX_SITEMAPS {
            break;
        }
        if !visited.insert(sitemap_url.clone()) {
            continue;
        }

        let Some(xml) = fetch_text(orchestrator, &sitemap_url).await else {
            continue;
        };
        if xml.len() < MIN_SITEMAP_BYTES {
            continue;
        }

        let entries = parse_sitemap(&xml, &base);
        debug!(sitemap = %sitemap_url, entries = entries.len(), depth, "Parsed sitemap");

        let (children, pages): (Vec<String>, Vec<String>) = entries
            .into_iter()
            .partition(|u| u.to_lowercase().contains("sitemap"));

        if depth < MAX_SITEMAP_DEPTH {
            for child in children {
                if !visited.contains(&child) && queue.len() < MAX_SITEMAPS {
                    queue.push_back((child, depth + 1));
                }
            }
        }

        for page in pages.iter().take(MAX_URLS_PER_SITEMAP) {
            if is_listing_like(page) {
                push_unique(&mut result.listing, &mut seen_listing, page, MAX_LISTING_URLS);
            }
            if is_detail_like(page) {
                push_unique(&mut result.detail, &mut seen_detail, page, MAX_DETAIL_URLS);
            }
        }
    }

    debug!(
        origin = %origin,
        sitemaps = visited.len(),
        listing = result.listing.len(),
        detail = result.detail.len(),
        "Sitemap discovery finished"
    );
    Ok(result)
}
