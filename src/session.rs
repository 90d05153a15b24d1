use std::sync::Arc;

use crate::browser::{BrowserConfig, BrowserSession, ChromePage};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::http_client::{EnhancedHttpClient, HttpClientConfig};

/// Resources held for the duration of one run: the shared HTTP client and,
/// for browser-backed sources, one Chrome session.
///
/// Call [`FetchSession::release`] when the run ends; dropping an unreleased
/// session still shuts Chrome down.
pub struct FetchSession {
    http: Arc<EnhancedHttpClient>,
    browser: Option<BrowserSession>,
}

impl FetchSession {
    /// Any failure here is fatal for the run.
    pub async fn acquire(cfg: &Config, needs_browser: bool) -> Result<Self> {
        let http = Arc::new(EnhancedHttpClient::with_config(HttpClientConfig::from(&cfg.fetch))?);

        let browser = if needs_browser {
            let browser_config = BrowserConfig::from_settings(&cfg.browser);
            let session = tokio::task::spawn_blocking(move || BrowserSession::launch(browser_config))
                .await
                .map_err(|e| IngestError::ResourceAcquisition {
                    resource: "browser".to_string(),
                    reason: e.to_string(),
                })??;
            Some(session)
        } else {
            None
        };

        Ok(Self { http, browser })
    }

    pub fn http(&self) -> Arc<EnhancedHttpClient> {
        Arc::clone(&self.http)
    }

    pub fn page(&self) -> Option<Arc<ChromePage>> {
        self.browser.as_ref().map(BrowserSession::page)
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    pub fn release(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Release the session after a run. A failed release fails the run even
    /// when the run itself succeeded.
    pub fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        settle(outcome, self.release())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            browser.close()?;
        }
        Ok(())
    }
}

fn settle<T>(outcome: Result<T>, released: Result<()>) -> Result<T> {
    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => {
            log::error!("Failed to release fetch session: {}", e);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release)) => {
            log::error!("Failed to release fetch session: {}", release);
            Err(e)
        }
    }
}

impl Drop for FetchSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            log::warn!("Fetch session dropped without release, closing browser");
            if let Err(e) = self.shutdown() {
                log::error!("Failed to close browser: {}", e);
            }
        }
    }
}
