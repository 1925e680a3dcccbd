//! Retry utilities for resilient operations
//!
//! This module provides two layers:
//! - [`RetryConfig`] with [`with_retry`] / [`with_retry_if`] for generic async
//!   operations (ingest batches, persistence)
//! - [`BackoffPolicy`] computing jittered, capped, per-[`FailureClass`] delays for
//!   the fetch strategies

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::FailureClass;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }

    /// Calculate delay for a given attempt using exponential backoff
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// Returns `Ok(T)` on success, or the last error if all retries fail.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(config, operation, |_| true).await
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// Errors for which `should_retry` returns `false` are returned immediately.
///
/// # Example
///
/// ```no_run
/// use jobharvest::utils::retry::{with_retry_if, RetryConfig};
/// use anyhow::Result;
///
/// async fn push_batch() -> Result<usize> {
///     Ok(10)
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let config = RetryConfig::default();
///     let count = with_retry_if(
///         &config,
///         || async { push_batch().await },
///         |e| !e.to_string().contains("validation"),
///     )
///     .await?;
///     Ok(())
/// }
/// ```
pub async fn with_retry_if<T, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Operation failed, will retry"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed with no error details")))
}

// ============================================================================
// Fetch Backoff
// ============================================================================

/// Per-failure-class backoff for fetch strategies
///
/// Delays are `base(class, attempt) + jitter`, capped at `max_delay_ms`.
/// The jitter window never exceeds the smallest step between consecutive base
/// delays, so for a fixed class the delay is non-decreasing across attempts
/// whatever the random draw.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for transient failures (doubles per attempt)
    pub transient_base_ms: u64,

    /// Linear step for rate-limited failures (`(attempt + 1) * step`)
    pub rate_limit_step_ms: u64,

    /// Upper bound of the random jitter added to each delay
    pub max_jitter_ms: u64,

    /// Hard cap on any single delay
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            transient_base_ms: 2_000,
            rate_limit_step_ms: 15_000,
            max_jitter_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Policy with short delays, for tests and test mode
    pub fn fast() -> Self {
        Self {
            transient_base_ms: 10,
            rate_limit_step_ms: 20,
            max_jitter_ms: 5,
            max_delay_ms: 200,
        }
    }

    /// Deterministic part of the delay, or `None` if the class is not retried
    pub fn base_delay(&self, class: FailureClass, attempt: u32) -> Option<Duration> {
        let ms = match class {
            FailureClass::Transient => {
                let factor = 2_u64.saturating_pow(attempt.min(32));
                self.transient_base_ms.saturating_mul(factor)
            }
            FailureClass::RateLimited => {
                self.rate_limit_step_ms.saturating_mul(u64::from(attempt) + 1)
            }
            FailureClass::Blocked | FailureClass::NotFound | FailureClass::Fatal => return None,
        };
        Some(Duration::from_millis(ms.min(self.max_delay_ms)))
    }

    /// Delay with a caller-supplied jitter sample in `[0, 1)`
    pub fn delay_with_sample(
        &self,
        class: FailureClass,
        attempt: u32,
        sample: f64,
    ) -> Option<Duration> {
        let base = self.base_delay(class, attempt)?;
        let window = self.jitter_window(class);
        let jitter = (window as f64 * sample.clamp(0.0, 1.0)) as u64;
        let ms = (base.as_millis() as u64)
            .saturating_add(jitter)
            .min(self.max_delay_ms);
        Some(Duration::from_millis(ms))
    }

    /// Delay with a random jitter sample
    pub fn delay(&self, class: FailureClass, attempt: u32) -> Option<Duration> {
        let sample: f64 = rand::thread_rng().gen();
        self.delay_with_sample(class, attempt, sample)
    }

    /// Delay honoring a server-provided Retry-After when it is longer
    pub fn delay_with_hint(
        &self,
        class: FailureClass,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        let computed = self.delay(class, attempt)?;
        let hinted = retry_after
            .map(|d| d.min(Duration::from_millis(self.max_delay_ms)))
            .unwrap_or_default();
        Some(computed.max(hinted))
    }

    fn jitter_window(&self, class: FailureClass) -> u64 {
        let step = match class {
            FailureClass::Transient => self.transient_base_ms,
            FailureClass::RateLimited => self.rate_limit_step_ms,
            _ => 0,
        };
        self.max_jitter_ms.min(step)
    }
}
