//! Headless Chrome plumbing for browser-backed sources.
//!
//! A [`BrowserSession`] owns the Chrome process and the single tab every
//! navigation goes through. Adapters talk to the tab through the
//! [`PageDriver`] trait so the challenge handler and DOM extraction can be
//! exercised against an in-memory page in tests.

pub mod config;
pub mod page;
pub mod session;

pub use config::BrowserConfig;
pub use page::{ChromePage, PageDriver};
pub use session::BrowserSession;

/// Errors that can occur during browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),

    #[error("Tab creation failed: {0}")]
    TabCreationError(String),

    #[error("Navigation error: {0}")]
    NavigationError(String),

    #[error("JavaScript execution error: {0}")]
    JavaScriptError(String),

    #[error("HTML extraction error: {0}")]
    HtmlExtractionError(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotError(String),
}
