//! Upstream sources.
//!
//! Each source turns one upstream into [`RawRecord`]s: paginated list
//! records, detail records and chapter records. `mangadex` talks to the JSON
//! API; `madara` drives the browser against Madara/MangaReader themed sites.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ItemRef, RawRecord};
use crate::normalizer::NormalizeOptions;

pub mod madara;
pub mod mangadex;

/// Zero-based list page index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageToken(pub u32);

impl PageToken {
    pub fn first() -> Self {
        PageToken(0)
    }

    pub fn next(self) -> Self {
        PageToken(self.0 + 1)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub records: Vec<RawRecord>,
    pub has_more: bool,
}

impl ListPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short name used in logs, metrics and snapshot file names.
    fn name(&self) -> &str;

    fn normalize_options(&self) -> NormalizeOptions;

    async fn list_page(&self, token: PageToken) -> Result<ListPage>;

    /// `NotFound` when the item has vanished upstream.
    async fn fetch_detail(&self, item: &ItemRef) -> Result<RawRecord>;

    async fn fetch_chapters(&self, item: &ItemRef) -> Result<Vec<RawRecord>>;

    /// Whether the orchestrator should collect reader page URLs per chapter.
    fn collects_pages(&self) -> bool {
        false
    }

    async fn page_images(&self, _chapter_url: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// PNG of whatever the source is currently looking at, for diagnostics.
    async fn capture_snapshot(&self) -> Option<Vec<u8>> {
        None
    }
}
