use std::sync::Arc;

use jobharvest::config::Config;
use jobharvest::crawler::BrowserDriver;

/// Browser process owned by a command, if one was launched
pub struct BrowserHandle {
    #[cfg(feature = "browser")]
    driver: Option<Arc<jobharvest::crawler::chromium::ChromiumDriver>>,
}

impl BrowserHandle {
    /// Launch Chromium when the browser strategy is enabled
    ///
    /// A failed launch is logged and the cascade runs without the browser.
    pub async fn launch(config: &Config) -> Self {
        #[cfg(feature = "browser")]
        {
            if !config.browser.enabled {
                return Self { driver: None };
            }
            match jobharvest::crawler::chromium::ChromiumDriver::launch(&config.browser).await {
                Ok(driver) => {
                    tracing::info!(headless = config.browser.headless, "Browser launched");
                    Self {
                        driver: Some(Arc::new(driver)),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Browser unavailable, continuing without it");
                    Self { driver: None }
                }
            }
        }
        #[cfg(not(feature = "browser"))]
        {
            if config.browser.enabled {
                tracing::warn!("Built without the `browser` feature, browser strategy disabled");
            }
            Self {}
        }
    }

    pub fn driver(&self) -> Option<Arc<dyn BrowserDriver>> {
        #[cfg(feature = "browser")]
        {
            self.driver
                .as_ref()
                .map(|d| Arc::clone(d) as Arc<dyn BrowserDriver>)
        }
        #[cfg(not(feature = "browser"))]
        {
            None
        }
    }

    /// Close the browser once every other handle to it is gone
    pub async fn shutdown(self) {
        #[cfg(feature = "browser")]
        if let Some(driver) = self.driver {
            match Arc::try_unwrap(driver) {
                Ok(driver) => driver.shutdown().await,
                Err(_) => tracing::warn!("Browser still in use at shutdown"),
            }
        }
    }
}
