//! Process-wide and per-origin-class request gate
//!
//! # Scopes
//!
//! Every request passes two nested scopes:
//! - a process-wide concurrency ceiling plus a shared token [`Reservoir`]
//! - a per-[`OriginClass`] scope with its own `max_concurrent`, minimum
//!   spacing between request starts, and a governor requests-per-minute quota
//!
//! # Invariants
//!
//! - At most `max_concurrent` permits per scope are outstanding at any instant
//! - Consecutive request starts in one scope are at least `min_interval_ms` apart
//!
//! Permits release their slots when dropped.

mod reservoir;

pub use reservoir::Reservoir;

use crate::config::{RateLimitConfig, RateLimitPolicy};
use crate::models::OriginClass;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as Governor,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// State for one origin class
struct Scope {
    policy: RateLimitPolicy,
    semaphore: Arc<Semaphore>,
    /// Earliest instant the next request may start
    next_start: Mutex<Option<Instant>>,
    quota: Governor<NotKeyed, InMemoryState, DefaultClock>,
}

impl Scope {
    fn new(policy: RateLimitPolicy) -> Self {
        let rpm = NonZeroU32::new(policy.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent.max(1))),
            next_start: Mutex::new(None),
            quota: Governor::direct(Quota::per_minute(rpm)),
            policy,
        }
    }

    /// Reserve the next start slot and sleep until it
    async fn space(&self) {
        let interval = Duration::from_millis(self.policy.min_interval_ms);
        let start_at = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start_at = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(start_at + interval);
            start_at
        };
        tokio::time::sleep_until(start_at).await;
    }
}

/// Held for the duration of one request
#[derive(Debug)]
pub struct Permit {
    class: OriginClass,
    _scope: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl Permit {
    pub fn class(&self) -> OriginClass {
        self.class
    }
}

/// Request gate shared by every fetch strategy in a run
pub struct RateLimiter {
    global: Arc<Semaphore>,
    reservoir: Reservoir,
    scopes: HashMap<OriginClass, Scope>,
}

impl RateLimiter {
    /// Build from config with a process-wide ceiling of `max_concurrent`
    pub fn new(config: &RateLimitConfig, max_concurrent: usize) -> Self {
        let scopes = OriginClass::all()
            .into_iter()
            .map(|class| (class, Scope::new(Self::policy_for(config, class))))
            .collect();

        Self {
            global: Arc::new(Semaphore::new(max_concurrent.max(1))),
            reservoir: Reservoir::new(
                config.reservoir_size,
                Duration::from_secs(config.reservoir_refill_secs),
            ),
            scopes,
        }
    }

    fn policy_for(config: &RateLimitConfig, class: OriginClass) -> RateLimitPolicy {
        match class {
            OriginClass::FastApi => config.fast_api,
            OriginClass::JobBoard => config.job_board,
            OriginClass::Generic => config.generic,
        }
    }

    /// Policy in force for a class
    pub fn policy(&self, class: OriginClass) -> Option<RateLimitPolicy> {
        self.scopes.get(&class).map(|s| s.policy)
    }

    /// Acquire a permit for the given scope, suspending until one is available
    ///
    /// # Errors
    ///
    /// Returns `AcquireError` only if the limiter was shut down with [`Self::close`].
    pub async fn acquire(&self, class: OriginClass) -> Result<Permit, AcquireError> {
        let started = Instant::now();
        let scope = &self.scopes[&class];

        let scope_permit = Arc::clone(&scope.semaphore).acquire_owned().await?;
        let global_permit = Arc::clone(&self.global).acquire_owned().await?;

        self.reservoir.take().await;
        scope.quota.until_ready().await;
        scope.space().await;

        let waited = started.elapsed();
        debug!(
            class = class.as_str(),
            waited_ms = waited.as_millis() as u64,
            "Rate limit permit acquired"
        );
        crate::metrics::observe_rate_limit_wait(class.as_str(), waited.as_secs_f64());

        Ok(Permit {
            class,
            _scope: scope_permit,
            _global: global_permit,
        })
    }

    /// Acquire a permit for the origin class of a URL
    pub async fn acquire_for_url(&self, url: &str) -> Result<Permit, AcquireError> {
        self.acquire(OriginClass::classify_url(url)).await
    }

    /// Return a permit early
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Wake every waiter with an error and refuse new acquisitions
    pub fn close(&self) {
        self.global.close();
        for scope in self.scopes.values() {
            scope.semaphore.close();
        }
    }

    /// Outstanding permits in a scope
    pub fn in_flight(&self, class: OriginClass) -> usize {
        let scope = &self.scopes[&class];
        scope.policy.max_concurrent.max(1) - scope.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_concurrent: usize, min_interval_ms: u64) -> RateLimitConfig {
        let policy = RateLimitPolicy {
            max_concurrent,
            min_interval_ms,
            requests_per_minute: 1000,
        };
        RateLimitConfig {
            reservoir_size: 1000,
            reservoir_refill_secs: 60,
            fast_api: policy,
            job_board: policy,
            generic: policy,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_starts_are_spaced() {
        let limiter = RateLimiter::new(&config(5, 500), 10);
        let mut starts = Vec::new();

        for _ in 0..4 {
            let permit = limiter.acquire(OriginClass::Generic).await.unwrap();
            starts.push(Instant::now());
            limiter.release(permit);
        }

        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_are_independent() {
        let limiter = RateLimiter::new(&config(5, 1000), 10);
        let start = Instant::now();

        let _a = limiter.acquire(OriginClass::Generic).await.unwrap();
        let _b = limiter.acquire(OriginClass::FastApi).await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_concurrent_per_scope() {
        let limiter = Arc::new(RateLimiter::new(&config(2, 0), 10));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = Arc::clone(&limiter);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire(OriginClass::JobBoard).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.in_flight(OriginClass::JobBoard), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_ceiling_spans_scopes() {
        let limiter = RateLimiter::new(&config(5, 0), 1);
        let _held = limiter.acquire(OriginClass::Generic).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_secs(5),
            limiter.acquire(OriginClass::FastApi),
        )
        .await;
        assert!(blocked.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservoir_bounds_burst() {
        let mut cfg = config(5, 0);
        cfg.reservoir_size = 2;
        cfg.reservoir_refill_secs = 30;
        let limiter = RateLimiter::new(&cfg, 10);
        let start = Instant::now();

        for _ in 0..3 {
            let permit = limiter.acquire(OriginClass::FastApi).await.unwrap();
            limiter.release(permit);
        }
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_waiters() {
        let limiter = Arc::new(RateLimiter::new(&config(1, 0), 10));
        let held = limiter.acquire(OriginClass::Generic).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire(OriginClass::Generic).await.is_err() })
        };
        tokio::task::yield_now().await;
        limiter.close();

        assert!(waiter.await.unwrap());
        drop(held);
    }

    #[tokio::test]
    async fn test_policy_lookup() {
        let limiter = RateLimiter::new(&RateLimitConfig::default(), 6);
        let policy = limiter.policy(OriginClass::JobBoard).unwrap();
        assert_eq!(policy.max_concurrent, 5);
        assert_eq!(policy.min_interval_ms, 2000);
    }
}
