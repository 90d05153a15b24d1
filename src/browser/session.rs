use headless_chrome::{Browser, LaunchOptions};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use super::config::BrowserConfig;
use super::page::ChromePage;
use super::BrowserError;

/// One Chrome process with the single tab all navigations share.
pub struct BrowserSession {
    // Dropping the last handle kills the Chrome process.
    browser: Browser,
    page: Arc<ChromePage>,
}

impl BrowserSession {
    /// Launch Chrome and open the working tab
    pub fn launch(config: BrowserConfig) -> Result<Self, BrowserError> {
        let args = config.launch_args();
        let launch_options = Self::build_launch_options(&config, &args)?;

        let browser = Browser::new(launch_options)
            .map_err(|e| BrowserError::InitializationError(e.to_string()))?;

        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::TabCreationError(e.to_string()))?;
        tab.set_default_timeout(config.timeout);
        if let Some(ua) = &config.user_agent {
            tab.set_user_agent(ua, Some("en-US,en;q=0.9"), None)
                .map_err(|e| BrowserError::ConfigurationError(e.to_string()))?;
        }

        log::info!(
            "Browser session started (headless={}, timeout={}s)",
            config.headless,
            config.timeout.as_secs()
        );

        Ok(Self {
            browser,
            page: Arc::new(ChromePage::new(tab)),
        })
    }

    fn build_launch_options<'a>(
        config: &BrowserConfig,
        args: &'a [String],
    ) -> Result<LaunchOptions<'a>, BrowserError> {
        LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_size.0, config.window_size.1)))
            .args(args.iter().map(OsStr::new).collect())
            // Challenge waits can leave the connection quiet for a while.
            .idle_browser_timeout(config.timeout + Duration::from_secs(120))
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
    }

    pub fn page(&self) -> Arc<ChromePage> {
        Arc::clone(&self.page)
    }

    /// Close the tab and shut Chrome down.
    pub fn close(self) -> Result<(), BrowserError> {
        let closed = self.page.close();
        drop(self.browser);
        log::info!("Browser session closed");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_options_build() {
        let config = BrowserConfig::default();
        let args = config.launch_args();
        let options = BrowserSession::build_launch_options(&config, &args).unwrap();
        assert!(options
            .args
            .iter()
            .any(|arg| arg.to_string_lossy().contains("AutomationControlled")));
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_launch_and_close() {
        let session = BrowserSession::launch(BrowserConfig::default()).unwrap();
        assert!(session.close().is_ok());
    }
}
