use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::models::ContentType;
use crate::sources::madara::SiteSelectors;

pub const DEFAULT_CONFIG_PATH: &str = "ingest.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Where page snapshots are written after repeated navigation failures
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub browser: BrowserSettings,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub mangadex: MangaDexConfig,

    #[serde(default = "default_sites")]
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Total attempts per operation, the first one included
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Backoff unit; attempt `n` waits `n * base_delay_ms` plus jitter
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound of the random jitter added to each backoff
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,

    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    #[serde(default = "default_true")]
    pub enable_compression: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    /// Sleep after every successful list/detail fetch
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Sleep after every catalog item, whatever its outcome
    #[serde(default = "default_item_delay")]
    pub item_delay_ms: u64,

    /// Sleep between list pages
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_true")]
    pub disable_images: bool,

    /// Navigation timeout in seconds
    #[serde(default = "default_browser_timeout")]
    pub timeout_secs: u64,

    /// How long to wait for a content marker before treating the page as empty
    #[serde(default = "default_marker_timeout")]
    pub marker_timeout_secs: u64,

    /// How long a challenge interstitial may take to clear
    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_batch_size")]
    pub chapter_batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MangaDexConfig {
    #[serde(default = "default_mangadex_url")]
    pub base_url: String,

    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    #[serde(default = "default_content_ratings")]
    pub content_ratings: Vec<String>,

    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    #[serde(default = "default_locale")]
    pub preferred_locale: String,

    /// Stop after this many list pages; unbounded when absent
    #[serde(default)]
    pub max_pages: Option<u32>,
}

/// One Madara/MangaReader themed site scraped through the browser.
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,

    #[serde(default = "default_series_path")]
    pub series_path: String,

    #[serde(default = "default_site_content_type")]
    pub content_type: ContentType,

    #[serde(default = "default_locale")]
    pub language: String,

    #[serde(default)]
    pub max_pages: Option<u32>,

    /// Also walk every chapter's reader page and store image URLs
    #[serde(default = "default_false")]
    pub collect_pages: bool,

    /// Overrides for sites that deviate from the stock theme markup
    #[serde(default)]
    pub selectors: SiteSelectors,
}

fn default_db_path() -> String { "manga.db".to_string() }
fn default_snapshot_dir() -> String { "snapshots".to_string() }
fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_max_retries() -> usize { 3 }
fn default_base_delay() -> u64 { 2000 }
fn default_jitter() -> u64 { 1000 }
fn default_timeout() -> u64 { 30 }
fn default_request_delay() -> u64 { 1000 }
fn default_item_delay() -> u64 { 2000 }
fn default_page_delay() -> u64 { 5000 }
fn default_browser_timeout() -> u64 { 60 }
fn default_marker_timeout() -> u64 { 30 }
fn default_challenge_timeout() -> u64 { 60 }
fn default_poll_interval() -> u64 { 500 }
fn default_batch_size() -> usize { 50 }
fn default_mangadex_url() -> String { crate::sources::mangadex::BASE_URL.to_string() }
fn default_page_limit() -> u32 { 100 }
fn default_content_ratings() -> Vec<String> { vec!["safe".to_string(), "suggestive".to_string()] }
fn default_languages() -> Vec<String> { vec!["en".to_string()] }
fn default_locale() -> String { "en".to_string() }
fn default_sites() -> Vec<SiteConfig> { vec![SiteConfig::madarascans()] }
fn default_series_path() -> String { "/series/page/{page}/".to_string() }
fn default_site_content_type() -> ContentType { ContentType::Manhwa }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            jitter_ms: default_jitter(),
            timeout_secs: default_timeout(),
            enable_cookies: true,
            enable_compression: true,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay(),
            item_delay_ms: default_item_delay(),
            page_delay_ms: default_page_delay(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            disable_images: true,
            timeout_secs: default_browser_timeout(),
            marker_timeout_secs: default_marker_timeout(),
            challenge_timeout_secs: default_challenge_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { chapter_batch_size: default_batch_size() }
    }
}

impl Default for MangaDexConfig {
    fn default() -> Self {
        Self {
            base_url: default_mangadex_url(),
            page_limit: default_page_limit(),
            content_ratings: default_content_ratings(),
            languages: default_languages(),
            preferred_locale: default_locale(),
            max_pages: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            snapshot_dir: default_snapshot_dir(),
            fetch: FetchConfig::default(),
            pacing: PacingConfig::default(),
            browser: BrowserSettings::default(),
            store: StoreConfig::default(),
            mangadex: MangaDexConfig::default(),
            sites: default_sites(),
        }
    }
}

impl SiteConfig {
    pub fn madarascans() -> Self {
        Self {
            name: "madarascans".to_string(),
            base_url: "https://madarascans.com".to_string(),
            series_path: default_series_path(),
            content_type: ContentType::Manhwa,
            language: default_locale(),
            max_pages: None,
            collect_pages: false,
            selectors: SiteSelectors::default(),
        }
    }
}

impl Config {
    /// Load `ingest.toml` from the working directory, falling back to defaults
    /// when the file is absent.
    pub fn load() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::from_path(path)
        } else {
            log::info!("{} not found, using default configuration", DEFAULT_CONFIG_PATH);
            Ok(Self::default())
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(content)
            .map_err(|e| IngestError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch.max_retries == 0 {
            return Err(IngestError::Config("fetch.max_retries must be at least 1".into()));
        }
        if self.store.chapter_batch_size == 0 {
            return Err(IngestError::Config("store.chapter_batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

impl PacingConfig {
    pub fn request_delay(&self) -> Duration { Duration::from_millis(self.request_delay_ms) }
    pub fn item_delay(&self) -> Duration { Duration::from_millis(self.item_delay_ms) }
    pub fn page_delay(&self) -> Duration { Duration::from_millis(self.page_delay_ms) }

    /// No pacing at all; used by tests.
    pub fn none() -> Self {
        Self { request_delay_ms: 0, item_delay_ms: 0, page_delay_ms: 0 }
    }
}
