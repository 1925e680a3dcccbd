//! Fetch cascade
//!
//! Strategies are tried in a fixed order (direct, proxy, browser). Each one
//! gets its own bounded retry loop; the failure class of every attempt decides
//! what happens next:
//!
//! | Class | Action |
//! |---|---|
//! | Transient | retry the same strategy after exponential backoff |
//! | RateLimited | retry the same strategy after a longer linear backoff |
//! | Blocked | advance to the next strategy immediately |
//! | NotFound / Fatal | stop, no retry and no advance |
//!
//! The first success wins and later strategies are never touched. Every
//! attempt across every strategy counts against one attempt budget, and each
//! attempt holds a rate-limiter permit for the URL's origin class.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::browser::{BrowserDriver, BrowserStrategy};
use super::direct::DirectStrategy;
use super::proxy::ProxyStrategy;
use super::strategy::FetchStrategy;
use crate::config::Config;
use crate::discovery::cache::{DetailUrlBuffer, XhrEndpointCache};
use crate::metrics;
use crate::models::{FetchResult, OriginClass};
use crate::ratelimit::RateLimiter;
use crate::utils::error::{FailureClass, FetchError};

/// Ordered cascade of fetch strategies
pub struct Orchestrator {
    strategies: Vec<Arc<dyn FetchStrategy>>,
    limiter: Arc<RateLimiter>,
    default_budget: u32,
}

impl Orchestrator {
    /// Create with an explicit strategy order
    pub fn new(
        strategies: Vec<Arc<dyn FetchStrategy>>,
        limiter: Arc<RateLimiter>,
        default_budget: u32,
    ) -> Self {
        Self {
            strategies,
            limiter,
            default_budget: default_budget.max(1),
        }
    }

    /// Build the standard direct → proxy → browser cascade
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if an HTTP client cannot be created
    pub fn from_config(
        config: &Config,
        limiter: Arc<RateLimiter>,
        driver: Option<Arc<dyn BrowserDriver>>,
        xhr_cache: Arc<XhrEndpointCache>,
        detail_buffer: Arc<DetailUrlBuffer>,
    ) -> Result<Self, FetchError> {
        let mut strategies: Vec<Arc<dyn FetchStrategy>> = vec![
            Arc::new(DirectStrategy::new(config)?),
            Arc::new(ProxyStrategy::new(config)?),
        ];

        if config.browser.enabled {
            strategies.push(Arc::new(
                BrowserStrategy::new(config, driver).with_discovery_sinks(xhr_cache, detail_buffer),
            ));
        }

        let available: Vec<&str> = strategies
            .iter()
            .filter(|s| s.is_available())
            .map(|s| s.name())
            .collect();
        info!(strategies = ?available, "Fetch cascade ready");

        Ok(Self::new(strategies, limiter, config.crawler.attempt_budget))
    }

    /// Names of the strategies, in cascade order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Fetch with the configured attempt budget
    pub async fn fetch_default(&self, url: &str) -> Result<FetchResult, FetchError> {
        self.fetch(url, self.default_budget).await
    }

    /// Fetch a URL through the cascade
    ///
    /// # Errors
    ///
    /// - `NotFound` / fatal errors from the first strategy that saw them
    /// - `BudgetExhausted` when `attempt_budget` attempts were spent
    /// - `AllStrategiesFailed` carrying the last error otherwise
    pub async fn fetch(&self, url: &str, attempt_budget: u32) -> Result<FetchResult, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let class = parsed
            .host_str()
            .map(OriginClass::classify)
            .unwrap_or(OriginClass::Generic);
        let mut attempts = 0u32;
        let mut last_error: Option<FetchError> = None;

        'cascade: for strategy in &self.strategies {
            if !strategy.is_available() {
                debug!(strategy = strategy.name(), "Strategy unavailable, skipping");
                continue;
            }

            for retry in 0..=strategy.max_retries() {
                if attempts >= attempt_budget {
                    warn!(
                        url = %url,
                        attempts,
                        last_error = ?last_error.as_ref().map(|e| e.to_string()),
                        "Attempt budget exhausted"
                    );
                    return Err(FetchError::BudgetExhausted(attempts));
                }
                attempts += 1;

                let outcome = {
                    let _permit = self
                        .limiter
                        .acquire(class)
                        .await
                        .map_err(|_| FetchError::StrategyUnavailable("rate limiter closed".into()))?;
                    let _timer = metrics::start_fetch_timer(strategy.name());
                    strategy.attempt(url).await
                };

                let err = match outcome {
                    Ok(result) => {
                        metrics::record_fetch_attempt(strategy.name(), "success");
                        debug!(
                            url = %url,
                            strategy = strategy.name(),
                            attempts,
                            "Fetch succeeded"
                        );
                        return Ok(result);
                    }
                    Err(err) => err,
                };

                let failure = err.class();
                metrics::record_fetch_attempt(strategy.name(), failure.as_str());
                debug!(
                    url = %url,
                    strategy = strategy.name(),
                    attempt = retry,
                    class = failure.as_str(),
                    error = %err,
                    "Fetch attempt failed"
                );

                match failure {
                    FailureClass::NotFound | FailureClass::Fatal => return Err(err),
                    FailureClass::Blocked => {
                        last_error = Some(err);
                        continue 'cascade;
                    }
                    FailureClass::Transient | FailureClass::RateLimited => {
                        if retry < strategy.max_retries() {
                            let hint = match &err {
                                FetchError::RateLimit { retry_after } => *retry_after,
                                _ => None,
                            };
                            if let Some(delay) =
                                strategy.backoff().delay_with_hint(failure, retry, hint)
                            {
                                debug!(
                                    strategy = strategy.name(),
                                    delay_ms = delay.as_millis() as u64,
                                    "Backing off before retry"
                                );
                                tokio::time::sleep(delay).await;
                            }
                        }
                        last_error = Some(err);
                    }
                }
            }

            debug!(url = %url, strategy = strategy.name(), "Strategy retries exhausted, advancing");
        }

        let last = last_error
            .unwrap_or_else(|| FetchError::StrategyUnavailable("no fetch strategy available".into()));
        warn!(url = %url, attempts, error = %last, "All fetch strategies failed");
        Err(FetchError::AllStrategiesFailed {
            attempts,
            last: Box::new(last),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::utils::retry::BackoffPolicy;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Strategy replaying a scripted list of outcomes
    struct Scripted {
        name: &'static str,
        script: Mutex<Vec<Result<&'static str, FetchError>>>,
        calls: AtomicU32,
        retries: u32,
        backoff: BackoffPolicy,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            retries: u32,
            script: Vec<Result<&'static str, FetchError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                retries,
                backoff: BackoffPolicy::fast(),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn max_retries(&self) -> u32 {
            self.retries
        }

        fn backoff(&self) -> &BackoffPolicy {
            &self.backoff
        }

        async fn attempt(&self, url: &str) -> Result<FetchResult, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    Err(FetchError::ServerError(500))
                } else {
                    script.remove(0)
                }
            };
            match next {
                Ok(body) => Ok(FetchResult {
                    final_url: url.to_string(),
                    status: 200,
                    headers: HashMap::new(),
                    body: body.to_string(),
                    strategy: self.name,
                }),
                Err(err) => Err(err),
            }
        }
    }

    fn limiter() -> Arc<RateLimiter> {
        let mut config = RateLimitConfig::default();
        for policy in [&mut config.fast_api, &mut config.job_board, &mut config.generic] {
            policy.min_interval_ms = 0;
            policy.requests_per_minute = 10_000;
        }
        Arc::new(RateLimiter::new(&config, 10))
    }

    const URL: &str = "https://www.acme.com/careers";

    #[tokio::test(start_paused = true)]
    async fn test_blocked_advances_and_first_success_wins() {
        let direct = Scripted::new("direct", 2, vec![Err(FetchError::Blocked(403))]);
        let proxy = Scripted::new("proxy", 2, vec![Ok("proxied")]);
        let browser = Scripted::new("browser", 1, vec![Ok("rendered")]);
        let orchestrator = Orchestrator::new(
            vec![direct.clone(), proxy.clone(), browser.clone()],
            limiter(),
            8,
        );

        let result = orchestrator.fetch(URL, 8).await.unwrap();

        assert_eq!(result.body, "proxied");
        assert_eq!(result.strategy, "proxy");
        assert_eq!(direct.calls(), 1);
        assert_eq!(proxy.calls(), 1);
        assert_eq!(browser.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retries_same_strategy() {
        let direct = Scripted::new("direct", 2, vec![Err(FetchError::ServerError(503)), Ok("second try")]);
        let proxy = Scripted::new("proxy", 2, vec![Ok("proxied")]);
        let orchestrator = Orchestrator::new(vec![direct.clone(), proxy.clone()], limiter(), 8);

        let result = orchestrator.fetch(URL, 8).await.unwrap();

        assert_eq!(result.body, "second try");
        assert_eq!(direct.calls(), 2);
        assert_eq!(proxy.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_fails_fast() {
        let direct = Scripted::new("direct", 2, vec![Err(FetchError::NotFound(404))]);
        let proxy = Scripted::new("proxy", 2, vec![Ok("proxied")]);
        let orchestrator = Orchestrator::new(vec![direct.clone(), proxy.clone()], limiter(), 8);

        let err = orchestrator.fetch(URL, 8).await.unwrap_err();

        assert!(matches!(err, FetchError::NotFound(404)));
        assert_eq!(direct.calls(), 1);
        assert_eq!(proxy.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_spans_strategies() {
        let direct = Scripted::new("direct", 2, vec![]);
        let proxy = Scripted::new("proxy", 2, vec![]);
        let orchestrator = Orchestrator::new(vec![direct.clone(), proxy.clone()], limiter(), 8);

        let err = orchestrator.fetch(URL, 4).await.unwrap_err();

        assert!(matches!(err, FetchError::BudgetExhausted(4)));
        assert_eq!(direct.calls(), 3);
        assert_eq!(proxy.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_strategies_failed() {
        let direct = Scripted::new("direct", 0, vec![Err(FetchError::Blocked(403))]);
        let proxy = Scripted::new("proxy", 0, vec![Err(FetchError::Blocked(403))]);
        let orchestrator = Orchestrator::new(vec![direct, proxy], limiter(), 8);

        let err = orchestrator.fetch(URL, 8).await.unwrap_err();
        match err {
            FetchError::AllStrategiesFailed { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, FetchError::Blocked(403)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let orchestrator = Orchestrator::new(vec![], limiter(), 8);
        assert!(matches!(
            orchestrator.fetch("ftp://acme.com", 8).await,
            Err(FetchError::InvalidUrl(_))
        ));
        assert!(matches!(
            orchestrator.fetch("not a url", 8).await,
            Err(FetchError::InvalidUrl(_))
        ));
    }
}
