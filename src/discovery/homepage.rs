//! Homepage anchor harvesting
//!
//! The target's homepage is fetched and anchors whose text matches a curated
//! keyword list become candidates, in keyword priority order.

use lazy_static::lazy_static;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::crawler::orchestrator::Orchestrator;
use crate::utils::error::DiscoveryError;
use crate::utils::{normalize_whitespace, strip_fragment};

/// Link texts that usually lead to a job search, most specific first
pub const LINK_TEXTS: &[&str] = &[
    "graduate jobs",
    "jobs",
    "search jobs",
    "find jobs",
    "career",
    "careers",
    "vacancies",
    "opportunities",
    "internships",
    "placements",
];

const HOMEPAGE_ATTEMPT_BUDGET: u32 = 4;

lazy_static! {
    static ref ANCHOR_SELECTOR: Selector = Selector::parse("a[href]").expect("valid selector");
}

/// Resolved anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub text: String,
}

/// Absolute http(s) links in a document, first occurrence of each URL
pub fn extract_links(html: &str, base: &str) -> Vec<Link> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();

    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                return None;
            }
            let resolved = base.join(href).ok()?;
            if !matches!(resolved.scheme(), "http" | "https") {
                return None;
            }
            let url = strip_fragment(resolved.as_str()).to_string();
            if !seen.insert(url.clone()) {
                return None;
            }
            Some(Link {
                url,
                text: normalize_whitespace(&anchor.text().collect::<String>()),
            })
        })
        .collect()
}

/// Candidate URLs: for each keyword, the first link whose text contains it
pub fn candidates_from_links(links: &[Link]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for keyword in LINK_TEXTS {
        let found = links
            .iter()
            .find(|link| link.text.to_lowercase().contains(keyword));
        if let Some(link) = found {
            if !out.contains(&link.url) {
                out.push(link.url.clone());
            }
        }
    }
    out
}

/// Fetch the homepage and harvest candidate links
///
/// # Errors
///
/// Returns `DiscoveryError::Fetch` if the homepage cannot be fetched
pub async fn discover_from_homepage(
    orchestrator: &Orchestrator,
    origin: &str,
) -> Result<Vec<String>, DiscoveryError> {
    let page = orchestrator.fetch(origin, HOMEPAGE_ATTEMPT_BUDGET).await?;
    let links = extract_links(&page.body, &page.final_url);
    let candidates = candidates_from_links(&links);
    tracing::debug!(
        origin = %origin,
        links = links.len(),
        candidates = candidates.len(),
        "Homepage links harvested"
    );
    Ok(candidates)
}
