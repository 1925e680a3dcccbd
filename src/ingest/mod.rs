//! Ingestion API client
//!
//! Records go to `POST {base}/jobs/ingest` authenticated by a shared secret
//! header. The API upserts on each record's identity hash, so re-sending a
//! batch is safe; non-2xx responses surface to the caller for retry.

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::models::JobRecord;
use crate::utils::error::IngestError;
use crate::utils::truncate_text;

/// Header carrying the shared secret
pub const SECRET_HEADER: &str = "x-seed-secret";

/// Payload version sent in batch metadata
pub const PAYLOAD_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchMetadata {
    batch_size: usize,
    timestamp: String,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct IngestPayload<'a> {
    data: &'a [JobRecord],
    metadata: BatchMetadata,
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    auth: Option<AuthStatus>,
}

#[derive(Debug, Deserialize)]
struct AuthStatus {
    #[serde(default)]
    matches: bool,
}

/// Reject records the API would refuse anyway
///
/// # Errors
///
/// Returns `IngestError::InvalidRecord` naming the first bad field
pub fn validate_for_upsert(record: &JobRecord) -> Result<(), IngestError> {
    let checks = [
        (record.title.trim().chars().count() >= 3, "title"),
        (record.company.trim().chars().count() >= 2, "company"),
        (record.apply_url.trim().len() >= 10, "apply URL"),
        (record.hash.trim().len() >= 10, "hash"),
    ];
    match checks.iter().find(|(ok, _)| !ok) {
        Some((_, field)) => Err(IngestError::InvalidRecord(format!("invalid {field}"))),
        None => Ok(()),
    }
}

/// Client for the downstream ingestion API
#[derive(Clone)]
pub struct IngestClient {
    client: Client,
    base_url: String,
    secret: String,
}

impl IngestClient {
    /// # Errors
    ///
    /// - `IngestError::Unauthorized` when no secret is configured
    /// - `IngestError::Http` if the HTTP client cannot be created
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let secret = config
            .secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(IngestError::Unauthorized)?;
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        info!(base = %config.api_url, secret_set = true, "Ingest client ready");
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    /// Upsert a batch, returning the count the API reports
    ///
    /// # Errors
    ///
    /// - `IngestError::Unauthorized` on 401/403
    /// - `IngestError::Rejected` on any other non-2xx
    /// - `IngestError::Http` on transport failure
    pub async fn upsert(&self, records: &[JobRecord]) -> Result<usize, IngestError> {
        if records.is_empty() {
            return Ok(0);
        }

        let payload = IngestPayload {
            data: records,
            metadata: BatchMetadata {
                batch_size: records.len(),
                timestamp: Utc::now().to_rfc3339(),
                version: PAYLOAD_VERSION,
            },
        };

        let response = self
            .client
            .post(format!("{}/jobs/ingest", self.base_url))
            .header(SECRET_HEADER, &self.secret)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(IngestError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Ingest batch rejected");
            return Err(IngestError::Rejected {
                status: status.as_u16(),
                body: truncate_text(&body, 500),
            });
        }

        let count = response
            .json::<IngestResponse>()
            .await
            .ok()
            .and_then(|r| r.count)
            .unwrap_or(records.len());
        info!(count, batch = records.len(), "Batch ingested");
        Ok(count)
    }

    /// Whether the API accepts our secret
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Http` on transport failure
    pub async fn test_auth(&self) -> Result<bool, IngestError> {
        let response = self
            .client
            .get(format!("{}/jobs/test-auth", self.base_url))
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "Ingest auth test failed");
            return Ok(false);
        }

        let body: AuthResponse = response.json().await?;
        Ok(body.auth.is_some_and(|a| a.matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> IngestConfig {
        IngestConfig {
            api_url: url.to_string(),
            secret: Some("s3cret".into()),
            batch_size: 100,
        }
    }

    fn valid_record() -> JobRecord {
        let mut record = JobRecord::new(
            "Graduate Engineer",
            "Arup",
            "https://jobs.arup.com/graduate-engineer",
        );
        crate::dedup::stamp(&mut record);
        record
    }

    #[test]
    fn test_validate_for_upsert() {
        assert!(validate_for_upsert(&valid_record()).is_ok());

        let mut short_title = valid_record();
        short_title.title = "QA".into();
        assert!(matches!(
            validate_for_upsert(&short_title),
            Err(IngestError::InvalidRecord(msg)) if msg.contains("title")
        ));

        let mut no_hash = valid_record();
        no_hash.hash.clear();
        assert!(validate_for_upsert(&no_hash).is_err());

        let mut short_url = valid_record();
        short_url.apply_url = "http://x".into();
        assert!(validate_for_upsert(&short_url).is_err());
    }

    #[test]
    fn test_requires_secret() {
        let mut cfg = config("http://localhost");
        cfg.secret = None;
        assert!(matches!(IngestClient::new(&cfg), Err(IngestError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_upsert_sends_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/jobs/ingest"))
            .and(header(SECRET_HEADER, "s3cret"))
            .and(body_partial_json(serde_json::json!({
                "metadata": { "batchSize": 1, "version": "2.0" },
                "data": [{ "title": "Graduate Engineer", "company": "Arup" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "count": 1 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = IngestClient::new(&config(&format!("{}/api/", server.uri()))).unwrap();
        assert_eq!(client.upsert(&[valid_record()]).await.unwrap(), 1);
        assert_eq!(client.upsert(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_failure_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs/ingest"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = IngestClient::new(&config(&server.uri())).unwrap();
        let err = client.upsert(&[valid_record()]).await.unwrap_err();
        assert!(matches!(err, IngestError::Rejected { status: 503, .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_auth_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/test-auth"))
            .and(header(SECRET_HEADER, "s3cret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "auth": { "matches": true } })),
            )
            .mount(&server)
            .await;

        let client = IngestClient::new(&config(&server.uri())).unwrap();
        assert!(client.test_auth().await.unwrap());
    }
}
