//! Natural-language URL suggestions
//!
//! A chat-completion service is asked where a target's job search lives. The
//! answer is free text; URLs are pulled out with a regex and cleaned. These
//! are the least trusted candidates and are always probed before use.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::metrics::MeteredResource;
use crate::models::{CrawlTarget, OriginClass, TargetHint};
use crate::utils::error::DiscoveryError;
use crate::utils::strip_query;

pub const SUGGEST_API_URL: &str = "https://api.perplexity.ai/chat/completions";

/// Model names tried in order until one is accepted
pub const MODELS: &[&str] = &[
    "sonar",
    "sonar-small-online",
    "llama-3.1-sonar-small-128k",
    "llama-3.1-sonar-large-128k-online",
];

lazy_static! {
    static ref URL_RE: Regex =
        Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]()]+"#).expect("valid url regex");
    static ref TRAILING_PUNCT_RE: Regex = Regex::new(r"[.,;:!?)\]}>]+$").expect("valid regex");
    static ref TRAILING_STARS_RE: Regex = Regex::new(r"\*\*+$").expect("valid regex");
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: String,
}

/// Clean URLs found in free text: punctuation, markdown emphasis, query and
/// fragment are dropped; anything that does not parse is discarded
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in URL_RE.find_iter(text) {
        let cleaned = TRAILING_PUNCT_RE.replace(m.as_str(), "");
        let cleaned = TRAILING_STARS_RE.replace(&cleaned, "");
        let cleaned = TRAILING_PUNCT_RE.replace(&cleaned, "");
        let cleaned = strip_query(&cleaned).to_string();
        if cleaned.len() <= 10 || Url::parse(&cleaned).is_err() {
            continue;
        }
        if !out.contains(&cleaned) {
            out.push(cleaned);
        }
    }
    out
}

/// Prompts for a target, shaped by what kind of source it is
pub fn prompts_for(target: &CrawlTarget) -> Vec<String> {
    let name = &target.id;
    match target.hint {
        Some(TargetHint::Greenhouse) => vec![
            format!("What is the current Greenhouse job board URL for {name}? Format: boards.greenhouse.io/{{company}}"),
            format!("What is the current Greenhouse API endpoint for {name} jobs?"),
        ],
        Some(TargetHint::Lever) => vec![
            format!("What is the current Lever API endpoint for {name}? Format: api.lever.co/v0/postings/{{company}}"),
            format!("What is the working Lever careers page URL for {name}?"),
        ],
        _ if target.origin_class() == OriginClass::JobBoard => vec![
            format!("What is the current working URL for searching graduate jobs on {name}? Provide the exact URL."),
            format!("What is the current working URL for searching internships on {name}? Provide the exact URL."),
            format!("What is the current working URL for searching placements on {name}? Provide the exact URL."),
        ],
        _ => vec![
            format!("What is the current careers page URL for {name} ({})? Provide the exact URL.", target.domain()),
            format!("What is the current graduate and early careers job search URL for {name}? Provide the exact URL."),
        ],
    }
}

/// Keep suggestions on the target's own domain or a public ATS host
fn relevant(target: &CrawlTarget, url: &str) -> bool {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
        return false;
    };
    let domain = target.domain().to_lowercase();
    host.ends_with(&domain)
        || host.contains(&target.id.to_lowercase())
        || (target.hint.is_some() && OriginClass::classify(&host) == OriginClass::FastApi)
}

/// URL suggestion service client
pub struct SuggestClient {
    client: Client,
    api_key: String,
    api_url: String,
    usage: Arc<MeteredResource>,
}

impl SuggestClient {
    /// # Errors
    ///
    /// Returns `DiscoveryError::Suggest` if the HTTP client cannot be created
    pub fn new(api_key: impl Into<String>, usage: Arc<MeteredResource>) -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DiscoveryError::Suggest(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            api_url: SUGGEST_API_URL.to_string(),
            usage,
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Candidate URLs for a target; provider failures yield fewer candidates
    pub async fn suggest(&self, target: &CrawlTarget) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for prompt in prompts_for(target) {
            match self.ask(&prompt).await {
                Ok(answer) => {
                    for url in extract_urls(&answer) {
                        if relevant(target, &url) && !urls.contains(&url) {
                            urls.push(url);
                        }
                    }
                }
                Err(e) => {
                    warn!(target = %target.id, error = %e, "URL suggestion failed");
                    break;
                }
            }
        }
        debug!(target = %target.id, suggestions = urls.len(), "URL suggestions collected");
        urls
    }

    /// Send one prompt, falling through models the service rejects
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Suggest` when every model fails
    pub async fn ask(&self, prompt: &str) -> Result<String, DiscoveryError> {
        let mut last_error = String::from("no model tried");

        for model in MODELS {
            if !self.usage.try_consume(1) {
                return Err(DiscoveryError::QuotaExhausted(self.usage.snapshot().name));
            }

            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": model,
                    "messages": [{
                        "role": "user",
                        "content": format!("{prompt} Include full URLs with the https:// protocol."),
                    }],
                    "max_tokens": 1000,
                    "temperature": 0.1,
                }))
                .send()
                .await
                .map_err(|e| DiscoveryError::Suggest(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("HTTP {status}: {}", crate::utils::truncate_text(&body, 200));
                if body.contains("Invalid model") {
                    debug!(model, "Model rejected, trying next");
                    continue;
                }
                return Err(DiscoveryError::Suggest(last_error));
            }

            let chat: ChatResponse = response
                .json()
                .await
                .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
            return Ok(chat
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default());
        }

        Err(DiscoveryError::Suggest(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriorityTier;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_urls_cleans_text() {
        let text = "Try **https://www.arup.com/careers/graduates?src=ai**. Or (https://jobs.arup.com/search#top), \
                    and http://x.y too.";
        assert_eq!(
            extract_urls(text),
            vec![
                "https://www.arup.com/careers/graduates",
                "https://jobs.arup.com/search"
            ]
        );
    }

    #[test]
    fn test_relevance_filter() {
        let arup = CrawlTarget::new("arup", "https://www.arup.com", PriorityTier::Medium);
        assert!(relevant(&arup, "https://jobs.arup.com/search"));
        assert!(relevant(&arup, "https://www.arup.com/careers"));
        assert!(!relevant(&arup, "https://www.indeed.co.uk/arup-jobs"));

        let hinted = arup.clone().with_hint(TargetHint::Greenhouse);
        assert!(relevant(&hinted, "https://boards.greenhouse.io/acme"));
    }

    #[tokio::test]
    async fn test_falls_through_rejected_models() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "model": "sonar" })))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid model 'sonar'"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer pplx-key"))
            .and(body_partial_json(json!({ "model": "sonar-small-online" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "See https://www.arup.com/careers." } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let usage = Arc::new(MeteredResource::unlimited("suggestions"));
        let client = SuggestClient::new("pplx-key", Arc::clone(&usage))
            .unwrap()
            .with_api_url(server.uri());

        let answer = client.ask("Where are Arup's jobs?").await.unwrap();
        assert_eq!(extract_urls(&answer), vec!["https://www.arup.com/careers"]);
        assert_eq!(usage.snapshot().used, 2);
    }
}
