//! Chromium driver for the browser strategy (`browser` feature)

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::browser::{BrowserDriver, BrowserSession};
use super::headers::random_user_agent;
use crate::config::BrowserSettings;
use crate::utils::error::FetchError;

/// Selectors tried, in order, for pagination / "load more" controls
const LOAD_MORE_SCRIPT: &str = r#"
(() => {
  const selectors = [
    'button[class*="load-more"]', 'button[class*="loadMore"]', 'a[class*="load-more"]',
    '[data-testid*="load-more"]', 'button[aria-label*="more" i]',
    'a[rel="next"]', '.pagination .next a', 'li.next a'
  ];
  for (const sel of selectors) {
    const el = document.querySelector(sel);
    if (el && el.offsetParent !== null && !el.disabled) { el.click(); return true; }
  }
  const buttons = Array.from(document.querySelectorAll('button, a'));
  const more = buttons.find(b => /^(load|show|view) more/i.test((b.textContent || '').trim()));
  if (more && more.offsetParent !== null) { more.click(); return true; }
  return false;
})()
"#;

/// Resource entries initiated by XHR or fetch since navigation
const CAPTURED_ENDPOINTS_SCRIPT: &str = r#"
performance.getEntriesByType('resource')
  .filter(e => e.initiatorType === 'xmlhttprequest' || e.initiatorType === 'fetch')
  .map(e => e.name)
"#;

fn browser_error(err: impl std::fmt::Display) -> FetchError {
    FetchError::Browser(err.to_string())
}

/// Chromium process shared by every session
pub struct ChromiumDriver {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch Chromium
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Browser` if the browser cannot be started
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", random_user_agent()));
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(browser_error)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler,
        })
    }

    /// Close the browser process
    pub async fn shutdown(self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!(error = %e, "Failed to close browser");
        }
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, FetchError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(browser_error)?;
        Ok(Box::new(ChromiumSession { page }))
    }
}

/// One Chromium tab
pub struct ChromiumSession {
    page: Page,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<(), FetchError> {
        // Clear resource timings so captured endpoints belong to this page
        let _ = self.page.evaluate("performance.clearResourceTimings()").await;
        self.page.goto(url).await.map_err(browser_error)?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, FetchError> {
        self.page
            .url()
            .await
            .map_err(browser_error)?
            .ok_or_else(|| FetchError::Browser("page has no URL".into()))
    }

    async fn content(&mut self) -> Result<String, FetchError> {
        self.page.content().await.map_err(browser_error)
    }

    async fn page_height(&mut self) -> Result<u64, FetchError> {
        self.page
            .evaluate("document.body ? document.body.scrollHeight : 0")
            .await
            .map_err(browser_error)?
            .into_value::<u64>()
            .map_err(browser_error)
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), FetchError> {
        self.page
            .evaluate("window.scrollTo(0, document.body ? document.body.scrollHeight : 0)")
            .await
            .map_err(browser_error)?;
        Ok(())
    }

    async fn click_load_more(&mut self) -> Result<bool, FetchError> {
        self.page
            .evaluate(LOAD_MORE_SCRIPT)
            .await
            .map_err(browser_error)?
            .into_value::<bool>()
            .map_err(browser_error)
    }

    async fn captured_endpoints(&mut self) -> Result<Vec<String>, FetchError> {
        self.page
            .evaluate(CAPTURED_ENDPOINTS_SCRIPT)
            .await
            .map_err(browser_error)?
            .into_value::<Vec<String>>()
            .map_err(browser_error)
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.page.close().await {
            debug!(error = %e, "Failed to close page");
        }
    }
}
