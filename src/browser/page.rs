use headless_chrome::protocol::cdp::Page;
use headless_chrome::Tab;
use std::sync::Arc;

use super::BrowserError;

/// The handful of page operations the ingestion pipeline needs.
///
/// Everything here is read-only apart from `navigate`; extraction works on
/// the rendered HTML returned by `content`.
pub trait PageDriver: Send + Sync {
    fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Whether an element matching the CSS selector exists right now.
    fn has_element(&self, selector: &str) -> Result<bool, BrowserError>;

    fn content(&self) -> Result<String, BrowserError>;

    fn screenshot_png(&self) -> Result<Vec<u8>, BrowserError>;
}

// Applied after each navigation; the page context is fresh every time.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = window.chrome || { runtime: {} };
"#;

/// A Chrome tab driven over CDP
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    /// Close the underlying tab
    pub fn close(&self) -> Result<(), BrowserError> {
        self.tab
            .close(true)
            .map(|_| ())
            .map_err(|e| BrowserError::TabCreationError(format!("Failed to close tab: {}", e)))
    }
}

fn selector_probe(selector: &str) -> String {
    format!(
        r#"document.querySelector('{}') !== null"#,
        selector.replace('\\', "\\\\").replace('\'', "\\'")
    )
}

impl PageDriver for ChromePage {
    fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        log::debug!("Browser navigating to: {}", url);
        self.tab
            .navigate_to(url)
            .map_err(|e| BrowserError::NavigationError(format!("Failed to navigate to {}: {}", url, e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| BrowserError::NavigationError(format!("Navigation timeout for {}: {}", url, e)))?;

        if let Err(e) = self.tab.evaluate(STEALTH_SCRIPT, false) {
            log::debug!("Stealth script failed on {}: {}", url, e);
        }
        Ok(())
    }

    fn has_element(&self, selector: &str) -> Result<bool, BrowserError> {
        let result = self
            .tab
            .evaluate(&selector_probe(selector), false)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn content(&self) -> Result<String, BrowserError> {
        self.tab
            .get_content()
            .map_err(|e| BrowserError::HtmlExtractionError(e.to_string()))
    }

    fn screenshot_png(&self) -> Result<Vec<u8>, BrowserError> {
        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| BrowserError::ScreenshotError(e.to_string()))
    }
}
