use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sources::madara::{ChapterItem, SeriesCard, SeriesDetail};
use crate::sources::mangadex::{ChapterData, MangaData};

/// Publication status as stored in the `content` table.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ongoing,
    Completed,
    Hiatus,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ongoing => "ongoing",
            Status::Completed => "completed",
            Status::Hiatus => "hiatus",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentRating {
    Safe,
    Suggestive,
    Mature,
}

impl ContentRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentRating::Safe => "safe",
            ContentRating::Suggestive => "suggestive",
            ContentRating::Mature => "mature",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Manga,
    Manhwa,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Manga => "manga",
            ContentType::Manhwa => "manhwa",
        }
    }
}

/// Canonical catalog row, keyed by `source_url`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CatalogEntry {
    pub source_url: String,
    pub title: String,
    pub description: String,
    pub cover_image: String,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub artists: Vec<String>,
    pub status: Status,
    pub content_rating: ContentRating,
    pub rating: f64,
    /// Filled in by the writer once chapters are known.
    pub total_chapters: i64,
    pub content_type: ContentType,
    pub last_chapter_update: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical chapter row. Identity is `(content_id, chapter_number, language)`;
/// the owning content id is supplied when the chapter is written.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChapterEntry {
    pub chapter_number: String,
    pub title: String,
    pub source_url: String,
    pub language: String,
    pub scanlation_group: String,
    pub publish_at: Option<DateTime<Utc>>,
    /// Ordered page image URLs; empty unless page collection is enabled.
    pub pages: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Source-specific record handed from an adapter to the normalizer.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Api(ApiRecord),
    Dom(DomRecord),
}

#[derive(Debug, Clone)]
pub enum ApiRecord {
    Manga(MangaData),
    Chapter(ChapterData),
}

#[derive(Debug, Clone)]
pub enum DomRecord {
    Card(SeriesCard),
    Detail(SeriesDetail),
    Chapter(ChapterItem),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Catalog,
    Chapter,
}

/// Reference to one catalog item, as discovered on a list page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub id: String,
    pub url: String,
}

impl RawRecord {
    /// Identifier used in log lines when this record fails somewhere.
    pub fn identity(&self) -> String {
        match self {
            RawRecord::Api(ApiRecord::Manga(m)) => m.id.clone(),
            RawRecord::Api(ApiRecord::Chapter(c)) => c.id.clone(),
            RawRecord::Dom(DomRecord::Card(c)) => c.url.clone(),
            RawRecord::Dom(DomRecord::Detail(d)) => d.url.clone(),
            RawRecord::Dom(DomRecord::Chapter(c)) => c.url.clone(),
        }
    }

    /// The item a list-page record points at, if it is a catalog record.
    pub fn item_ref(&self) -> Option<ItemRef> {
        match self {
            RawRecord::Api(ApiRecord::Manga(m)) => Some(ItemRef {
                id: m.id.clone(),
                url: crate::sources::mangadex::title_url(&m.id),
            }),
            RawRecord::Dom(DomRecord::Card(c)) => Some(ItemRef {
                id: c.slug.clone(),
                url: c.url.clone(),
            }),
            RawRecord::Dom(DomRecord::Detail(d)) => Some(ItemRef {
                id: d.url.clone(),
                url: d.url.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: usize,
    pub items_seen: usize,
    pub created: usize,
    pub existing: usize,
    pub chapters_written: usize,
    pub skipped: usize,
    pub failed: usize,
}
