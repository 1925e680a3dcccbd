//! Proxied strategy: residential proxy gateway or scraping API

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::debug;

use super::headers::rotated_page_headers;
use super::strategy::{map_transport_error, read_response, FetchStrategy};
use crate::config::{Config, ProxyConfig};
use crate::models::FetchResult;
use crate::utils::error::FetchError;
use crate::utils::retry::BackoffPolicy;

/// Where proxied requests are routed
enum ProxyRoute {
    /// Residential proxy via `reqwest::Proxy` with basic auth
    Gateway { client: Client },

    /// Scraping API taking the target as a query parameter
    ScrapingApi {
        client: Client,
        api_url: String,
        api_key: String,
    },
}

/// Request routed through a residential proxy or a scraping API
pub struct ProxyStrategy {
    route: Option<ProxyRoute>,
    max_retries: u32,
    backoff: BackoffPolicy,
}

impl ProxyStrategy {
    /// Create from configuration; unavailable when nothing is configured
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the proxy or HTTP client cannot be created
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::with_settings(
            &config.proxy,
            config.request_timeout(),
            config.crawler.max_retries_per_strategy,
            BackoffPolicy::default(),
        )
    }

    /// Create with explicit proxy settings, timeout, retry count and backoff
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the proxy or HTTP client cannot be created
    pub fn with_settings(
        proxy: &ProxyConfig,
        timeout: Duration,
        max_retries: u32,
        backoff: BackoffPolicy,
    ) -> Result<Self, FetchError> {
        // The scraping API renders through its own pool and is slower
        let api_timeout = timeout.saturating_mul(2);

        let route = if let Some(api_key) = &proxy.scraper_api_key {
            Some(ProxyRoute::ScrapingApi {
                client: Client::builder()
                    .timeout(api_timeout)
                    .no_gzip()
                    .no_brotli()
                    .no_deflate()
                    .build()?,
                api_url: proxy.scraper_api_url.clone(),
                api_key: api_key.clone(),
            })
        } else if let (Some(endpoint), Some(username), Some(password)) =
            (&proxy.endpoint, &proxy.username, &proxy.password)
        {
            let gateway = Proxy::all(format!("http://{endpoint}"))?.basic_auth(username, password);
            Some(ProxyRoute::Gateway {
                client: Client::builder()
                    .proxy(gateway)
                    .timeout(timeout)
                    .cookie_store(true)
                    .no_gzip()
                    .no_brotli()
                    .no_deflate()
                    .build()?,
            })
        } else {
            None
        };

        Ok(Self {
            route,
            max_retries,
            backoff,
        })
    }
}

#[async_trait]
impl FetchStrategy for ProxyStrategy {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn is_available(&self) -> bool {
        self.route.is_some()
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    async fn attempt(&self, url: &str) -> Result<FetchResult, FetchError> {
        let response = match &self.route {
            Some(ProxyRoute::Gateway { client }) => {
                debug!(url = %url, "Proxy gateway fetch attempt");
                client
                    .get(url)
                    .headers(rotated_page_headers())
                    .send()
                    .await
            }
            Some(ProxyRoute::ScrapingApi {
                client,
                api_url,
                api_key,
            }) => {
                debug!(url = %url, "Scraping API fetch attempt");
                client
                    .get(api_url)
                    .query(&[
                        ("api_key", api_key.as_str()),
                        ("url", url),
                        ("render", "false"),
                    ])
                    .send()
                    .await
            }
            None => {
                return Err(FetchError::StrategyUnavailable(
                    "no proxy or scraping API configured".into(),
                ))
            }
        }
        .map_err(map_transport_error)?;

        let mut result = read_response(response, self.name()).await?;
        // Scraping API responses report the API URL, not the page
        if matches!(self.route, Some(ProxyRoute::ScrapingApi { .. })) {
            result.final_url = url.to_string();
        }
        Ok(result)
    }
}
