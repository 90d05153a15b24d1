use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{ListPage, PageToken, SourceAdapter};
use crate::config::MangaDexConfig;
use crate::error::{IngestError, Result};
use crate::http_client::EnhancedHttpClient;
use crate::models::{ApiRecord, ItemRef, RawRecord};
use crate::normalizer::NormalizeOptions;

pub const BASE_URL: &str = "https://api.mangadex.org";
const SITE_URL: &str = "https://mangadex.org";
const COVER_URL: &str = "https://uploads.mangadex.org/covers";
// Upper bound the API accepts for `limit` on /chapter.
const CHAPTER_PAGE_LIMIT: usize = 100;

/// Locale code -> text, in the order the API sent it.
pub type LocalizedMap = Map<String, Value>;

#[derive(Deserialize, Debug)]
struct Collection<T> {
    data: Vec<T>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct Entity<T> {
    data: T,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MangaData {
    pub id: String,
    pub attributes: MangaAttributes,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Relationship {
    pub id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub attributes: Option<Value>,
}

impl Relationship {
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.as_ref()?.get(key)?.as_str()
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct MangaAttributes {
    #[serde(default, deserialize_with = "localized")]
    pub title: LocalizedMap,
    #[serde(default, deserialize_with = "localized")]
    pub description: LocalizedMap,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content_rating: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Not part of the stock schema; some mirrors embed statistics here.
    #[serde(default)]
    pub rating: Option<Value>,
    #[serde(default)]
    pub last_chapter_update_at: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Tag {
    #[serde(default)]
    pub id: String,
    pub attributes: TagAttributes,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TagAttributes {
    #[serde(default, deserialize_with = "localized")]
    pub name: LocalizedMap,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChapterData {
    pub id: String,
    pub attributes: ChapterAttributes,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChapterAttributes {
    #[serde(default)]
    pub chapter: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub translated_language: Option<String>,
    #[serde(default)]
    pub publish_at: Option<String>,
}

// Empty localized maps come back as `[]` rather than `{}`.
fn localized<'de, D>(deserializer: D) -> std::result::Result<LocalizedMap, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        _ => Ok(LocalizedMap::new()),
    }
}

pub fn title_url(manga_id: &str) -> String {
    format!("{}/title/{}", SITE_URL, manga_id)
}

pub fn chapter_url(chapter_id: &str) -> String {
    format!("{}/chapter/{}", SITE_URL, chapter_id)
}

pub fn cover_url(manga_id: &str, file_name: &str) -> String {
    format!("{}/{}/{}", COVER_URL, manga_id, file_name)
}

/// Browser-free adapter over the MangaDex REST API
pub struct MangaDexAdapter {
    client: Arc<EnhancedHttpClient>,
    config: MangaDexConfig,
}

impl MangaDexAdapter {
    pub fn new(client: Arc<EnhancedHttpClient>, config: MangaDexConfig) -> Self {
        Self { client, config }
    }

    fn includes(&self, query: &mut Vec<(&'static str, String)>) {
        for include in ["author", "artist", "cover_art"] {
            query.push(("includes[]", include.to_string()));
        }
    }

    fn list_query(&self, offset: u64) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("limit", self.config.page_limit.to_string()),
            ("offset", offset.to_string()),
        ];
        for rating in &self.config.content_ratings {
            query.push(("contentRating[]", rating.clone()));
        }
        query.push(("hasAvailableChapters", "true".to_string()));
        query.push(("order[latestUploadedChapter]", "desc".to_string()));
        self.includes(&mut query);
        query
    }

    fn chapter_query(&self, manga_id: &str, offset: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![("manga", manga_id.to_string())];
        for language in &self.config.languages {
            query.push(("translatedLanguage[]", language.clone()));
        }
        query.push(("order[chapter]", "asc".to_string()));
        query.push(("includes[]", "scanlation_group".to_string()));
        query.push(("limit", CHAPTER_PAGE_LIMIT.to_string()));
        query.push(("offset", offset.to_string()));
        query
    }
}

#[async_trait]
impl SourceAdapter for MangaDexAdapter {
    fn name(&self) -> &str {
        "mangadex"
    }

    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            preferred_locale: self.config.preferred_locale.clone(),
        }
    }

    async fn list_page(&self, token: PageToken) -> Result<ListPage> {
        if let Some(max) = self.config.max_pages {
            if token.index() >= max {
                return Ok(ListPage::empty());
            }
        }

        let offset = token.index() as u64 * self.config.page_limit as u64;
        let url = format!("{}/manga", self.config.base_url);
        let list = match self
            .client
            .get_json::<Collection<MangaData>>(&url, &self.list_query(offset))
            .await
        {
            Ok(list) => list,
            Err(IngestError::NotFound(reason)) => {
                log::error!("Failed to fetch manga list at offset {}: {}", offset, reason);
                return Ok(ListPage::empty());
            }
            Err(e) => return Err(e),
        };

        let fetched = list.data.len() as u64;
        let has_more = fetched > 0
            && match list.total {
                Some(total) => offset + fetched < total,
                None => fetched >= self.config.page_limit as u64,
            };

        Ok(ListPage {
            records: list
                .data
                .into_iter()
                .map(|m| RawRecord::Api(ApiRecord::Manga(m)))
                .collect(),
            has_more,
        })
    }

    async fn fetch_detail(&self, item: &ItemRef) -> Result<RawRecord> {
        let url = format!("{}/manga/{}", self.config.base_url, item.id);
        let mut query = Vec::new();
        self.includes(&mut query);
        let entity = self.client.get_json::<Entity<MangaData>>(&url, &query).await?;
        Ok(RawRecord::Api(ApiRecord::Manga(entity.data)))
    }

    async fn fetch_chapters(&self, item: &ItemRef) -> Result<Vec<RawRecord>> {
        let url = format!("{}/chapter", self.config.base_url);
        let mut out = Vec::new();
        let mut offset = 0usize;

        loop {
            let page = match self
                .client
                .get_json::<Collection<ChapterData>>(&url, &self.chapter_query(&item.id, offset))
                .await
            {
                Ok(page) => page,
                Err(IngestError::NotFound(reason)) if offset == 0 => {
                    log::error!("Failed to fetch chapters for {}: {}", item.id, reason);
                    break;
                }
                // A partial list would understate the chapter count.
                Err(e) => return Err(e),
            };

            let fetched = page.data.len();
            out.extend(page.data.into_iter().map(|c| RawRecord::Api(ApiRecord::Chapter(c))));
            offset += fetched;

            let exhausted = match page.total {
                Some(total) => offset as u64 >= total,
                None => fetched < CHAPTER_PAGE_LIMIT,
            };
            if fetched == 0 || exhausted {
                break;
            }
        }

        Ok(out)
    }
}
