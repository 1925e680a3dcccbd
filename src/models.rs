// Core data structures for the harvesting engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Priority tier for targets and buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    High,
    Medium,
    Low,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Rate-limit class of an origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginClass {
    /// Structured ATS APIs built for machine traffic
    FastApi,
    /// Medium-weight job boards
    JobBoard,
    /// Company career sites and everything else
    Generic,
}

const FAST_API_HOSTS: &[&str] = &["greenhouse", "lever.co", "workday", "smartrecruiters"];

const JOB_BOARD_HOSTS: &[&str] = &[
    "reed.co.uk",
    "totaljobs",
    "monster",
    "gradcracker",
    "prospects.ac.uk",
    "targetjobs",
    "milkround",
    "brightnetwork",
];

impl OriginClass {
    /// Classify a host name
    pub fn classify(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if FAST_API_HOSTS.iter().any(|h| host.contains(h)) {
            Self::FastApi
        } else if JOB_BOARD_HOSTS.iter().any(|h| host.contains(h)) {
            Self::JobBoard
        } else {
            Self::Generic
        }
    }

    /// Classify the host of a URL, `Generic` when it does not parse
    pub fn classify_url(url: &str) -> Self {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(Self::classify))
            .unwrap_or(Self::Generic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastApi => "fast_api",
            Self::JobBoard => "job_board",
            Self::Generic => "generic",
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::FastApi, Self::JobBoard, Self::Generic]
    }
}

/// Known ATS/API behind a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetHint {
    Greenhouse,
    Lever,
    Workday,
    SuccessFactors,
    Icims,
    SmartRecruiters,
    JobBoard,
}

impl TargetHint {
    pub fn origin_class(&self) -> OriginClass {
        match self {
            Self::Greenhouse | Self::Lever | Self::Workday | Self::SmartRecruiters => {
                OriginClass::FastApi
            }
            Self::SuccessFactors | Self::Icims => OriginClass::Generic,
            Self::JobBoard => OriginClass::JobBoard,
        }
    }
}

/// A site, API or company feed being harvested
///
/// Built from static catalogs; never mutated during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTarget {
    /// Stable identifier (e.g. "gradcracker", "arup")
    pub id: String,

    /// Base origin, e.g. `https://www.gradcracker.com`
    pub origin: String,

    /// Known-good URL paths or absolute URLs
    #[serde(default)]
    pub url_patterns: Vec<String>,

    #[serde(default)]
    pub hint: Option<TargetHint>,

    pub priority: PriorityTier,
}

impl CrawlTarget {
    pub fn new(id: impl Into<String>, origin: impl Into<String>, priority: PriorityTier) -> Self {
        Self {
            id: id.into(),
            origin: origin.into().trim_end_matches('/').to_string(),
            url_patterns: Vec::new(),
            hint: None,
            priority,
        }
    }

    pub fn with_patterns(mut self, patterns: &[&str]) -> Self {
        self.url_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_hint(mut self, hint: TargetHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Host part of the origin
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.origin)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    /// Host without a leading `www.`, used for site-scoped search
    pub fn domain(&self) -> String {
        self.host()
            .map(|h| h.trim_start_matches("www.").to_string())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Rate-limit class, from the hint when present
    pub fn origin_class(&self) -> OriginClass {
        match self.hint {
            Some(hint) => hint.origin_class(),
            None => self
                .host()
                .map(|h| OriginClass::classify(&h))
                .unwrap_or(OriginClass::Generic),
        }
    }

    /// Resolve a pattern against the origin
    pub fn absolute(&self, pattern: &str) -> Option<String> {
        if pattern.starts_with("http://") || pattern.starts_with("https://") {
            return Some(pattern.to_string());
        }
        let base = Url::parse(&self.origin).ok()?;
        base.join(pattern).ok().map(|u| u.to_string())
    }
}

/// Draft job record produced by an extraction adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub apply_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Posting timestamp as published by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Source target id
    #[serde(default)]
    pub source: String,

    /// Identity hash, filled by the dedup layer
    #[serde(default)]
    pub hash: String,
}

impl JobRecord {
    pub fn new(
        title: impl Into<String>,
        company: impl Into<String>,
        apply_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            company: company.into(),
            apply_url: apply_url.into(),
            ..Default::default()
        }
    }
}

/// Successful fetch
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// URL after redirects
    pub final_url: String,

    pub status: u16,

    /// Response headers with lowercased names
    pub headers: HashMap<String, String>,

    /// Decoded body text
    pub body: String,

    /// Strategy that produced the result
    pub strategy: &'static str,
}

impl FetchResult {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_classification() {
        assert_eq!(OriginClass::classify("boards.greenhouse.io"), OriginClass::FastApi);
        assert_eq!(OriginClass::classify("jobs.lever.co"), OriginClass::FastApi);
        assert_eq!(OriginClass::classify("www.reed.co.uk"), OriginClass::JobBoard);
        assert_eq!(OriginClass::classify("www.gradcracker.com"), OriginClass::JobBoard);
        assert_eq!(OriginClass::classify("www.arup.com"), OriginClass::Generic);
        assert_eq!(OriginClass::classify_url("not a url"), OriginClass::Generic);
    }

    #[test]
    fn test_target_domain_and_class() {
        let target = CrawlTarget::new("arup", "https://www.arup.com/", PriorityTier::Medium);
        assert_eq!(target.origin, "https://www.arup.com");
        assert_eq!(target.domain(), "arup.com");
        assert_eq!(target.origin_class(), OriginClass::Generic);

        let ats = target.clone().with_hint(TargetHint::Greenhouse);
        assert_eq!(ats.origin_class(), OriginClass::FastApi);
    }

    #[test]
    fn test_absolute_pattern() {
        let target = CrawlTarget::new("gc", "https://www.gradcracker.com", PriorityTier::High);
        assert_eq!(
            target.absolute("/search/all-disciplines/engineering-graduate-jobs").as_deref(),
            Some("https://www.gradcracker.com/search/all-disciplines/engineering-graduate-jobs")
        );
        assert_eq!(
            target.absolute("https://other.com/x").as_deref(),
            Some("https://other.com/x")
        );
    }

    #[test]
    fn test_job_record_serializes_camel_case() {
        let mut record = JobRecord::new("Graduate Engineer", "Arup", "https://arup.com/jobs/1");
        record.posted_at = Some("2024-01-01".into());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["applyUrl"], "https://arup.com/jobs/1");
        assert_eq!(json["postedAt"], "2024-01-01");
        assert!(json.get("location").is_none());
    }

    #[test]
    fn test_fetch_result_header_lookup() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        let result = FetchResult {
            final_url: "https://a.com".into(),
            status: 200,
            headers,
            body: String::new(),
            strategy: "direct",
        };
        assert_eq!(result.header("Content-Type"), Some("text/html"));
    }
}
