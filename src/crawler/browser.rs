//! Browser-automation strategy
//!
//! # Architecture
//!
//! - [`BrowserDriver`] / [`BrowserSession`]: the automation capability. The
//!   Chromium implementation lives in `crawler::chromium` behind the `browser`
//!   feature; tests use scripted sessions.
//! - [`SessionPool`]: long-lived sessions keyed by target host, capped in total.
//!   A session is checked out by exactly one worker at a time and returned on
//!   drop of its [`SessionLease`]. When the pool is full, the least recently
//!   used idle session of another target is evicted.
//! - [`reveal_content`]: bounded scroll / "load more" loop that stops once the
//!   page height stays unchanged for `stable_checks` consecutive cycles.
//!
//! Endpoints observed while a page loads are fed to the discovery XHR cache,
//! and detail-like links found on rendered pages go to the detail-URL buffer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::strategy::{detect_soft_block, FetchStrategy};
use crate::config::{BrowserSettings, Config};
use crate::decompress::decompress;
use crate::discovery::cache::{DetailUrlBuffer, XhrEndpointCache};
use crate::discovery::homepage::extract_links;
use crate::discovery::sitemap::is_detail_like;
use crate::models::FetchResult;
use crate::utils::error::FetchError;
use crate::utils::retry::BackoffPolicy;

// ============================================================================
// Automation capability
// ============================================================================

/// Launches isolated browser sessions
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, FetchError>;
}

/// One isolated browser context with a single page
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait for the load event
    async fn goto(&mut self, url: &str) -> Result<(), FetchError>;

    /// URL after redirects
    async fn current_url(&mut self) -> Result<String, FetchError>;

    /// Serialized DOM
    async fn content(&mut self) -> Result<String, FetchError>;

    /// Current document scroll height
    async fn page_height(&mut self) -> Result<u64, FetchError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), FetchError>;

    /// Click a pagination or "load more" control; `false` when none was found
    async fn click_load_more(&mut self) -> Result<bool, FetchError>;

    /// XHR/fetch endpoints requested since navigation
    async fn captured_endpoints(&mut self) -> Result<Vec<String>, FetchError>;

    async fn close(self: Box<Self>);
}

// ============================================================================
// Reveal loop
// ============================================================================

/// Bounds for the reveal loop
#[derive(Debug, Clone, Copy)]
pub struct RevealSettings {
    pub max_cycles: u32,
    pub settle: Duration,
    pub stable_checks: u32,
}

impl From<&BrowserSettings> for RevealSettings {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            max_cycles: settings.max_reveal_cycles,
            settle: Duration::from_millis(settings.settle_delay_ms),
            stable_checks: settings.stable_checks.max(1),
        }
    }
}

/// What the reveal loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealOutcome {
    pub cycles: u32,
    pub final_height: u64,
    /// Stopped because content stopped growing
    pub settled: bool,
}

/// Scroll and click "load more" until the page stops growing
pub async fn reveal_content(
    session: &mut dyn BrowserSession,
    settings: RevealSettings,
) -> Result<RevealOutcome, FetchError> {
    let mut height = session.page_height().await?;
    let mut unchanged = 0;
    let mut cycles = 0;

    while cycles < settings.max_cycles {
        cycles += 1;
        session.scroll_to_bottom().await?;
        let clicked = session.click_load_more().await.unwrap_or(false);
        tokio::time::sleep(settings.settle).await;

        let next = session.page_height().await?;
        if next > height || clicked {
            unchanged = 0;
            height = height.max(next);
        } else {
            unchanged += 1;
            if unchanged >= settings.stable_checks {
                return Ok(RevealOutcome {
                    cycles,
                    final_height: height,
                    settled: true,
                });
            }
        }
    }

    Ok(RevealOutcome {
        cycles,
        final_height: height,
        settled: false,
    })
}

// ============================================================================
// Session pool
// ============================================================================

struct IdleSession {
    session: Box<dyn BrowserSession>,
    last_used: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<String, IdleSession>,
    /// Sessions alive, idle or checked out
    live: usize,
}

struct PoolInner {
    state: Mutex<PoolState>,
    returned: Notify,
}

impl PoolInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pool of per-target browser sessions with a global cap
pub struct SessionPool {
    driver: Arc<dyn BrowserDriver>,
    max_sessions: usize,
    inner: Arc<PoolInner>,
}

/// Exclusive use of a pooled session; returned to the pool on drop
pub struct SessionLease {
    key: String,
    session: Option<Box<dyn BrowserSession>>,
    inner: Arc<PoolInner>,
}

impl SessionLease {
    pub fn session(&mut self) -> Option<&mut dyn BrowserSession> {
        self.session.as_deref_mut().map(|s| s as &mut dyn BrowserSession)
    }

    /// Close the session instead of returning it (after a crash or block)
    pub async fn discard(mut self) {
        if let Some(session) = self.session.take() {
            self.inner.lock().live -= 1;
            self.inner.returned.notify_one();
            session.close().await;
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        // Two leases for one key can be out at once; only one stays idle
        let surplus = {
            let mut state = self.inner.lock();
            let surplus = state.idle.insert(
                self.key.clone(),
                IdleSession {
                    session,
                    last_used: Instant::now(),
                },
            );
            if surplus.is_some() {
                state.live -= 1;
            }
            surplus
        };
        self.inner.returned.notify_one();

        if let Some(old) = surplus {
            debug!(key = %self.key, "Closing surplus browser session");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(old.session.close());
            }
        }
    }
}

enum Checkout {
    Reuse(Box<dyn BrowserSession>),
    Create,
    Evict(Box<dyn BrowserSession>),
    Wait,
}

impl SessionPool {
    pub fn new(driver: Arc<dyn BrowserDriver>, max_sessions: usize) -> Self {
        Self {
            driver,
            max_sessions: max_sessions.max(1),
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                returned: Notify::new(),
            }),
        }
    }

    /// Check out the session for `key`, creating or evicting as needed
    pub async fn checkout(&self, key: &str) -> Result<SessionLease, FetchError> {
        loop {
            let step = {
                let mut state = self.inner.lock();
                if let Some(idle) = state.idle.remove(key) {
                    Checkout::Reuse(idle.session)
                } else if state.live < self.max_sessions {
                    state.live += 1;
                    Checkout::Create
                } else if let Some(oldest) = state
                    .idle
                    .iter()
                    .min_by_key(|(_, idle)| idle.last_used)
                    .map(|(k, _)| k.clone())
                {
                    match state.idle.remove(&oldest) {
                        Some(idle) => {
                            debug!(evicted = %oldest, for_key = %key, "Evicting idle browser session");
                            Checkout::Evict(idle.session)
                        }
                        None => Checkout::Wait,
                    }
                } else {
                    Checkout::Wait
                }
            };

            let session = match step {
                Checkout::Reuse(session) => session,
                Checkout::Evict(old) => {
                    old.close().await;
                    self.launch().await?
                }
                Checkout::Create => self.launch().await?,
                Checkout::Wait => {
                    self.inner.returned.notified().await;
                    continue;
                }
            };

            return Ok(SessionLease {
                key: key.to_string(),
                session: Some(session),
                inner: Arc::clone(&self.inner),
            });
        }
    }

    /// Start a session for a slot already counted in `live`
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, FetchError> {
        match self.driver.new_session().await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.inner.lock().live -= 1;
                self.inner.returned.notify_one();
                Err(e)
            }
        }
    }

    /// Sessions alive, idle or checked out
    pub fn live(&self) -> usize {
        self.inner.lock().live
    }

    /// Close every idle session
    pub async fn shutdown(&self) {
        let idle: Vec<_> = {
            let mut state = self.inner.lock();
            let drained: Vec<_> = state.idle.drain().map(|(_, idle)| idle.session).collect();
            state.live -= drained.len();
            drained
        };
        for session in idle {
            session.close().await;
        }
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Render budget when none is derived from configuration
const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Headless-browser rendered fetch with a reveal loop
pub struct BrowserStrategy {
    pool: Option<Arc<SessionPool>>,
    reveal: RevealSettings,
    /// Whole-render budget: navigation, reveal loop and content reads
    render_timeout: Duration,
    max_retries: u32,
    backoff: BackoffPolicy,
    xhr_cache: Option<Arc<XhrEndpointCache>>,
    detail_buffer: Option<Arc<DetailUrlBuffer>>,
}

impl BrowserStrategy {
    /// Create from configuration with an optional driver
    pub fn new(config: &Config, driver: Option<Arc<dyn BrowserDriver>>) -> Self {
        let reveal = RevealSettings::from(&config.browser);
        Self {
            pool: driver.map(|d| Arc::new(SessionPool::new(d, config.browser.max_sessions))),
            reveal,
            render_timeout: config.request_timeout() + reveal.settle * reveal.max_cycles,
            max_retries: config.crawler.max_retries_per_strategy.min(1),
            backoff: BackoffPolicy::default(),
            xhr_cache: None,
            detail_buffer: None,
        }
    }

    /// Create around an existing pool
    pub fn with_pool(pool: Arc<SessionPool>, reveal: RevealSettings, backoff: BackoffPolicy) -> Self {
        Self {
            pool: Some(pool),
            reveal,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            max_retries: 1,
            backoff,
            xhr_cache: None,
            detail_buffer: None,
        }
    }

    /// Feed captured endpoints and detail links into discovery caches
    pub fn with_discovery_sinks(
        mut self,
        xhr_cache: Arc<XhrEndpointCache>,
        detail_buffer: Arc<DetailUrlBuffer>,
    ) -> Self {
        self.xhr_cache = Some(xhr_cache);
        self.detail_buffer = Some(detail_buffer);
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn pool(&self) -> Option<&Arc<SessionPool>> {
        self.pool.as_ref()
    }

    async fn render(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        key: &str,
    ) -> Result<FetchResult, FetchError> {
        session.goto(url).await?;
        let outcome = reveal_content(session, self.reveal).await?;
        debug!(
            url = %url,
            cycles = outcome.cycles,
            height = outcome.final_height,
            settled = outcome.settled,
            "Reveal loop finished"
        );

        let html = session.content().await?;
        let final_url = session.current_url().await.unwrap_or_else(|_| url.to_string());
        let text = decompress(html.as_bytes(), None).text;

        if let Some(marker) = detect_soft_block(&text) {
            return Err(FetchError::SoftBlock(marker.to_string()));
        }

        if let Some(cache) = &self.xhr_cache {
            match session.captured_endpoints().await {
                Ok(endpoints) if !endpoints.is_empty() => cache.record(key, endpoints),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Could not read captured endpoints"),
            }
        }

        if let Some(buffer) = &self.detail_buffer {
            let details: Vec<String> = extract_links(&text, &final_url)
                .into_iter()
                .map(|link| link.url)
                .filter(|link| is_detail_like(link))
                .collect();
            if !details.is_empty() {
                buffer.extend(key, details);
            }
        }

        Ok(FetchResult {
            final_url,
            status: 200,
            headers: HashMap::new(),
            body: text,
            strategy: self.name(),
        })
    }
}

/// Pool key for a URL: its host
pub(crate) fn session_key(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn is_available(&self) -> bool {
        self.pool.is_some()
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    async fn attempt(&self, url: &str) -> Result<FetchResult, FetchError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| FetchError::StrategyUnavailable("no browser driver".into()))?;

        let key = session_key(url);
        let mut lease = pool.checkout(&key).await?;
        let session = lease
            .session()
            .ok_or_else(|| FetchError::Browser("lease has no session".into()))?;

        let rendered = tokio::time::timeout(self.render_timeout, self.render(session, url, &key))
            .await
            .unwrap_or(Err(FetchError::Timeout));

        match rendered {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(url = %url, error = %e, "Browser render failed, discarding session");
                // A stalled session may not close promptly either; its slot is freed first
                if tokio::time::timeout(self.render_timeout, lease.discard()).await.is_err() {
                    debug!(url = %url, "Session close timed out");
                }
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn settings() -> RevealSettings {
        RevealSettings {
            max_cycles: 8,
            settle: Duration::from_millis(1500),
            stable_checks: 2,
        }
    }

    fn session(heights: Vec<u64>) -> ScriptedSession {
        ScriptedSession {
            heights,
            cursor: 0,
            html: String::new(),
            endpoints: Vec::new(),
            url: String::new(),
            closed: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            stall: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_stops_when_stable() {
        let mut s = session(vec![1000, 2000, 3000, 3000, 3000, 9999]);
        let start = Instant::now();

        let outcome = reveal_content(&mut s, settings()).await.unwrap();

        assert!(outcome.settled);
        assert_eq!(outcome.cycles, 4);
        assert_eq!(outcome.final_height, 3000);
        assert_eq!(start.elapsed(), Duration::from_millis(1500 * 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_is_bounded() {
        let heights: Vec<u64> = (1..=20).map(|i| i * 1000).collect();
        let mut s = session(heights);

        let outcome = reveal_content(&mut s, settings()).await.unwrap();

        assert!(!outcome.settled);
        assert_eq!(outcome.cycles, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_reuses_sessions_per_key() {
        let driver = Arc::new(ScriptedDriver::new("<html></html>"));
        let launched = Arc::clone(&driver.launched);
        let pool = SessionPool::new(driver, 2);

        drop(pool.checkout("a.com").await.unwrap());
        drop(pool.checkout("a.com").await.unwrap());
        assert_eq!(launched.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_evicts_lru_when_full() {
        let driver = Arc::new(ScriptedDriver::new("<html></html>"));
        let closed = Arc::clone(&driver.closed);
        let pool = SessionPool::new(driver, 2);

        drop(pool.checkout("a.com").await.unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(pool.checkout("b.com").await.unwrap());
        drop(pool.checkout("c.com").await.unwrap());

        assert_eq!(pool.live(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        // a.com was least recently used
        drop(pool.checkout("b.com").await.unwrap());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_waits_when_all_checked_out() {
        let driver = Arc::new(ScriptedDriver::new("<html></html>"));
        let pool = Arc::new(SessionPool::new(driver, 1));

        let lease = pool.checkout("a.com").await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.checkout("b.com").await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(lease);
        assert!(waiter.await.unwrap());
        assert_eq!(pool.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_closes_surplus_sessions_for_one_key() {
        let driver = Arc::new(ScriptedDriver::new("<html></html>"));
        let launched = Arc::clone(&driver.launched);
        let closed = Arc::clone(&driver.closed);
        let pool = SessionPool::new(driver, 2);

        let first = pool.checkout("a.com").await.unwrap();
        let second = pool.checkout("a.com").await.unwrap();
        assert_eq!(pool.live(), 2);

        drop(first);
        drop(second);
        tokio::task::yield_now().await;
        assert_eq!(pool.live(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        pool.shutdown().await;
        assert_eq!(pool.live(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), launched.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_render_times_out() {
        let mut driver = ScriptedDriver::new("<html></html>");
        driver.stall = true;
        let closed = Arc::clone(&driver.closed);
        let pool = Arc::new(SessionPool::new(Arc::new(driver), 1));
        let strategy = BrowserStrategy::with_pool(Arc::clone(&pool), settings(), BackoffPolicy::fast())
            .with_render_timeout(Duration::from_secs(5));
        let start = Instant::now();

        let err = strategy.attempt("https://acme.com/careers").await.unwrap_err();

        assert!(matches!(err, FetchError::Timeout));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(pool.live(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_strategy_feeds_discovery_caches() {
        let mut driver = ScriptedDriver::new(
            r#"<html><body>
                <a href="/jobs/graduate-engineer-123">Graduate Engineer</a>
                <a href="/about">About</a>
            </body></html>"#,
        );
        driver.endpoints = vec!["https://acme.com/api/jobs?page=1".into()];

        let pool = Arc::new(SessionPool::new(Arc::new(driver), 2));
        let xhr = Arc::new(XhrEndpointCache::new());
        let details = Arc::new(DetailUrlBuffer::new(100));
        let strategy = BrowserStrategy::with_pool(pool, settings(), BackoffPolicy::fast())
            .with_discovery_sinks(Arc::clone(&xhr), Arc::clone(&details));

        let result = strategy.attempt("https://acme.com/careers").await.unwrap();

        assert_eq!(result.strategy, "browser");
        assert_eq!(xhr.get("acme.com"), vec!["https://acme.com/api/jobs?page=1"]);
        assert_eq!(
            details.get("acme.com"),
            vec!["https://acme.com/jobs/graduate-engineer-123"]
        );
    }

    #[tokio::test]
    async fn test_strategy_without_driver_is_unavailable() {
        let strategy = BrowserStrategy::new(&Config::default(), None);
        assert!(!strategy.is_available());
        assert!(matches!(
            strategy.attempt("https://acme.com").await,
            Err(FetchError::StrategyUnavailable(_))
        ));
    }
}
