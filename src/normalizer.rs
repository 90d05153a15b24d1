//! Source records to canonical entries.
//!
//! Pure functions over [`RawRecord`]s: no I/O, no clock other than the
//! creation timestamps. `total_chapters` is always left at 0 here; the writer
//! fills it in once the chapter list is known.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::{IngestError, Result};
use crate::models::{
    ApiRecord, CatalogEntry, ChapterEntry, ContentRating, ContentType, DomRecord, RawRecord,
    RecordKind, Status,
};
use crate::sources::madara::{ChapterItem, SeriesCard, SeriesDetail};
use crate::sources::mangadex::{self, ChapterData, LocalizedMap, MangaData};

pub const DEFAULT_RATING: f64 = 4.0;
pub const UNKNOWN_GROUP: &str = "Unknown";

const DATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d", "%d/%m/%Y"];

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub preferred_locale: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { preferred_locale: "en".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Catalog(CatalogEntry),
    Chapter(ChapterEntry),
}

/// Normalize one record as the requested kind. Asking for a kind the record
/// cannot produce is a `MalformedRecord`.
pub fn normalize(raw: &RawRecord, kind: RecordKind, opts: &NormalizeOptions) -> Result<Normalized> {
    match kind {
        RecordKind::Catalog => normalize_catalog(raw, opts).map(Normalized::Catalog),
        RecordKind::Chapter => normalize_chapter(raw).map(Normalized::Chapter),
    }
}

pub fn normalize_catalog(raw: &RawRecord, opts: &NormalizeOptions) -> Result<CatalogEntry> {
    match raw {
        RawRecord::Api(ApiRecord::Manga(manga)) => catalog_from_manga(manga, opts),
        RawRecord::Dom(DomRecord::Card(card)) => Ok(catalog_from_card(card)),
        RawRecord::Dom(DomRecord::Detail(detail)) => catalog_from_detail(detail),
        other => Err(IngestError::MalformedRecord {
            item: other.identity(),
            reason: "not a catalog record".to_string(),
        }),
    }
}

/// Normalize a detail record together with the list record it was found
/// through. A listing card fills the cover and rating the series page leaves
/// out, and its colored badge becomes the `Colored` tag.
pub fn normalize_listed_catalog(listing: &RawRecord, detail: &RawRecord, opts: &NormalizeOptions) -> Result<CatalogEntry> {
    match (listing, detail) {
        (RawRecord::Dom(DomRecord::Card(card)), RawRecord::Dom(DomRecord::Detail(detail))) => {
            catalog_from_card_and_detail(card, detail)
        }
        _ => normalize_catalog(detail, opts),
    }
}

pub fn normalize_chapter(raw: &RawRecord) -> Result<ChapterEntry> {
    match raw {
        RawRecord::Api(ApiRecord::Chapter(chapter)) => Ok(chapter_from_api(chapter)),
        RawRecord::Dom(DomRecord::Chapter(item)) => Ok(chapter_from_item(item)),
        other => Err(IngestError::MalformedRecord {
            item: other.identity(),
            reason: "not a chapter record".to_string(),
        }),
    }
}

pub fn map_status(status: &str) -> Status {
    match status.trim().to_lowercase().as_str() {
        "ongoing" => Status::Ongoing,
        "completed" => Status::Completed,
        "hiatus" => Status::Hiatus,
        "cancelled" => Status::Completed,
        _ => Status::Ongoing,
    }
}

pub fn map_content_rating(rating: &str) -> ContentRating {
    match rating.trim().to_lowercase().as_str() {
        "safe" => ContentRating::Safe,
        "suggestive" => ContentRating::Suggestive,
        "erotica" | "pornographic" => ContentRating::Mature,
        _ => ContentRating::Safe,
    }
}

/// Parse a rating into `[0, 5]`; anything unparseable becomes 4.0.
pub fn parse_rating(raw: Option<&Value>) -> f64 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_rating_text(s),
        // statistics payloads: {"bayesian": 8.1, "average": 8.3}
        Some(Value::Object(map)) => map
            .get("bayesian")
            .or_else(|| map.get("average"))
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_rating_text(s),
                _ => None,
            }),
        _ => None,
    };
    clamp_rating(parsed)
}

fn parse_rating_text(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

fn clamp_rating(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 5.0),
        _ => DEFAULT_RATING,
    }
}

fn localized_text(map: &LocalizedMap, locale: &str) -> Option<String> {
    map.get(locale)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_localized(map: &LocalizedMap) -> Option<String> {
    map.values()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn catalog_from_manga(manga: &MangaData, opts: &NormalizeOptions) -> Result<CatalogEntry> {
    let attrs = &manga.attributes;
    let locale = opts.preferred_locale.as_str();

    let title = localized_text(&attrs.title, locale)
        .or_else(|| first_localized(&attrs.title))
        .ok_or_else(|| IngestError::missing_title(&manga.id))?;
    let description = localized_text(&attrs.description, locale).unwrap_or_default();

    let mut authors = Vec::new();
    let mut artists = Vec::new();
    let mut cover_image = String::new();
    for rel in &manga.relationships {
        match rel.rel_type.as_str() {
            "author" => authors.extend(rel.attribute_str("name").map(str::to_string)),
            "artist" => artists.extend(rel.attribute_str("name").map(str::to_string)),
            "cover_art" if cover_image.is_empty() => {
                if let Some(file_name) = rel.attribute_str("fileName") {
                    cover_image = mangadex::cover_url(&manga.id, file_name);
                }
            }
            _ => {}
        }
    }

    let mut genres = Vec::new();
    let mut tags = Vec::new();
    for tag in &attrs.tags {
        let name = match localized_text(&tag.attributes.name, locale) {
            Some(name) => name,
            None => continue,
        };
        if tag.attributes.group.as_deref() == Some("genre") {
            genres.push(name);
        } else {
            tags.push(name);
        }
    }

    let now = Utc::now();
    Ok(CatalogEntry {
        source_url: mangadex::title_url(&manga.id),
        title,
        description,
        cover_image,
        genres,
        tags,
        authors,
        artists,
        status: map_status(attrs.status.as_deref().unwrap_or_default()),
        content_rating: map_content_rating(attrs.content_rating.as_deref().unwrap_or_default()),
        rating: parse_rating(attrs.rating.as_ref()),
        total_chapters: 0,
        content_type: ContentType::Manga,
        last_chapter_update: attrs.last_chapter_update_at.clone(),
        created_at: now,
        updated_at: now,
    })
}

fn catalog_from_card(card: &SeriesCard) -> CatalogEntry {
    let now = Utc::now();
    CatalogEntry {
        source_url: card.url.clone(),
        title: card.title.clone(),
        description: String::new(),
        cover_image: card.cover_url.clone().unwrap_or_default(),
        genres: Vec::new(),
        tags: if card.is_colored { vec!["Colored".to_string()] } else { Vec::new() },
        authors: Vec::new(),
        artists: Vec::new(),
        status: Status::Ongoing,
        content_rating: ContentRating::Safe,
        rating: clamp_rating(card.rating.as_deref().and_then(parse_rating_text)),
        total_chapters: 0,
        content_type: card.content_type,
        last_chapter_update: None,
        created_at: now,
        updated_at: now,
    }
}

fn catalog_from_detail(detail: &SeriesDetail) -> Result<CatalogEntry> {
    let title = detail
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| IngestError::missing_title(&detail.url))?;

    let now = Utc::now();
    Ok(CatalogEntry {
        source_url: detail.url.clone(),
        title: title.to_string(),
        description: detail.description.clone(),
        cover_image: detail.cover_url.clone().unwrap_or_default(),
        genres: detail.genres.clone(),
        tags: Vec::new(),
        authors: Vec::new(),
        artists: Vec::new(),
        status: map_status(detail.status.as_deref().unwrap_or_default()),
        content_rating: ContentRating::Safe,
        rating: clamp_rating(detail.rating.as_deref().and_then(parse_rating_text)),
        total_chapters: 0,
        content_type: detail.content_type,
        last_chapter_update: None,
        created_at: now,
        updated_at: now,
    })
}

fn catalog_from_card_and_detail(card: &SeriesCard, detail: &SeriesDetail) -> Result<CatalogEntry> {
    let listed = catalog_from_card(card);
    let mut entry = catalog_from_detail(detail)?;

    if entry.cover_image.is_empty() {
        entry.cover_image = listed.cover_image;
    }
    if detail.rating.as_deref().and_then(parse_rating_text).is_none() {
        entry.rating = listed.rating;
    }
    for tag in listed.tags {
        if !entry.tags.contains(&tag) {
            entry.tags.push(tag);
        }
    }
    Ok(entry)
}

fn chapter_from_api(chapter: &ChapterData) -> ChapterEntry {
    let attrs = &chapter.attributes;
    let scanlation_group = chapter
        .relationships
        .iter()
        .find(|rel| rel.rel_type == "scanlation_group")
        .and_then(|rel| rel.attribute_str("name"))
        .unwrap_or(UNKNOWN_GROUP)
        .to_string();

    let now = Utc::now();
    ChapterEntry {
        chapter_number: attrs
            .chapter
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "0".to_string()),
        title: attrs.title.clone().unwrap_or_default(),
        source_url: mangadex::chapter_url(&chapter.id),
        language: attrs.translated_language.clone().unwrap_or_else(|| "en".to_string()),
        scanlation_group,
        publish_at: attrs
            .publish_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        pages: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

fn chapter_from_item(item: &ChapterItem) -> ChapterEntry {
    let now = Utc::now();
    ChapterEntry {
        chapter_number: item.number.clone(),
        title: item.title.clone(),
        source_url: item.url.clone(),
        language: item.language.clone(),
        scanlation_group: UNKNOWN_GROUP.to_string(),
        publish_at: item.date.as_deref().and_then(parse_site_date),
        pages: item.pages.clone(),
        created_at: now,
        updated_at: now,
    }
}

/// Release dates as the themes print them, e.g. "January 7, 2024".
pub fn parse_site_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
