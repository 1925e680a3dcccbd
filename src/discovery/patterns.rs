//! Static library of known-good URL patterns

use crate::models::{CrawlTarget, TargetHint};

/// Listing paths that have worked on the graduate job boards
const BOARD_PATTERNS: &[(&str, &[&str])] = &[
    (
        "gradcracker",
        &[
            "/search/graduate-jobs",
            "/search/internships",
            "/search/placements",
            "/hub/graduate-jobs",
            "/graduate-jobs",
            "/jobs",
        ],
    ),
    (
        "targetjobs",
        &[
            "/uk/en/search/offers",
            "/graduate-jobs",
            "/internships",
            "/placements",
            "/search",
        ],
    ),
    (
        "prospects",
        &[
            "/graduate-jobs",
            "/job-search",
            "/internships",
            "/placements",
            "/work-experience",
            "/jobs",
        ],
    ),
    (
        "milkround",
        &["/jobs", "/graduate-jobs", "/internships", "/placements", "/search"],
    ),
    (
        "brightnetwork",
        &[
            "/graduate-jobs",
            "/internships",
            "/placements",
            "/graduate-jobs-search",
            "/jobs",
        ],
    ),
    (
        "ratemyplacement",
        &["/placements", "/internships", "/graduate-jobs", "/search-jobs"],
    ),
    (
        "reed",
        &["/jobs/graduate-jobs", "/jobs/internships", "/graduate-jobs"],
    ),
    (
        "totaljobs",
        &["/jobs/graduate", "/jobs/graduate-scheme", "/jobs/internship"],
    ),
];

/// Career paths common on company sites
const COMPANY_PATHS: &[&str] = &[
    "/careers",
    "/careers/early-careers",
    "/early-careers",
    "/careers/graduates",
    "/graduates",
    "/careers/students",
    "/jobs",
    "/careers/jobs",
];

/// Public ATS endpoints keyed on the target id as company slug
fn ats_patterns(hint: TargetHint, slug: &str) -> Vec<String> {
    match hint {
        TargetHint::Greenhouse => vec![
            format!("https://boards-api.greenhouse.io/v1/boards/{slug}/jobs?content=true"),
            format!("https://boards.greenhouse.io/{slug}"),
        ],
        TargetHint::Lever => vec![
            format!("https://api.lever.co/v0/postings/{slug}?mode=json"),
            format!("https://jobs.lever.co/{slug}"),
        ],
        TargetHint::SmartRecruiters => vec![
            format!("https://api.smartrecruiters.com/v1/companies/{slug}/postings"),
            format!("https://jobs.smartrecruiters.com/{slug}"),
        ],
        TargetHint::Workday
        | TargetHint::SuccessFactors
        | TargetHint::Icims
        | TargetHint::JobBoard => Vec::new(),
    }
}

fn push_unique(out: &mut Vec<String>, url: Option<String>) {
    if let Some(url) = url {
        if !out.contains(&url) {
            out.push(url);
        }
    }
}

/// Candidate URLs for a target, most specific first
///
/// Configured patterns come first, then the board library, ATS endpoints
/// and finally generic company career paths.
pub fn known_patterns(target: &CrawlTarget) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for pattern in &target.url_patterns {
        push_unique(&mut out, target.absolute(pattern));
    }

    let id = target.id.to_lowercase();
    let domain = target.domain();
    let board = BOARD_PATTERNS
        .iter()
        .find(|(key, _)| id.contains(key) || domain.contains(key));

    if let Some((_, paths)) = board {
        for path in *paths {
            push_unique(&mut out, target.absolute(path));
        }
        return out;
    }

    if let Some(hint) = target.hint {
        for url in ats_patterns(hint, &id) {
            push_unique(&mut out, Some(url));
        }
        if hint == TargetHint::JobBoard {
            return out;
        }
    }

    for path in COMPANY_PATHS {
        push_unique(&mut out, target.absolute(path));
    }

    out
}
