//! Browser-backed adapter for Madara / MangaReader themed WordPress sites.
//!
//! These sites sit behind Cloudflare and render their listings with
//! JavaScript, so every page goes through the shared Chrome tab: navigate,
//! wait out any challenge, wait for the content marker, then read the
//! rendered HTML and extract fields with CSS selectors. Nothing on the page
//! is mutated.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ListPage, PageToken, SourceAdapter};
use crate::browser::PageDriver;
use crate::challenge::{ChallengeConfig, ChallengeHandler, ChallengeState};
use crate::config::{BrowserSettings, SiteConfig};
use crate::error::{IngestError, Result};
use crate::models::{ContentType, DomRecord, ItemRef, RawRecord};
use crate::normalizer::NormalizeOptions;
use crate::wait::{wait_until, Clock, SystemClock, WaitOutcome};

const PLACEHOLDER_IMAGE: &str = "loading.gif";

/// CSS selectors describing one site's markup. Defaults match the
/// MangaReader theme used by most scanlation sites.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub card: String,
    pub card_link: String,
    pub card_title: String,
    pub card_cover: String,
    pub card_rating: String,
    pub card_colored: String,
    pub detail_marker: String,
    pub detail_title: String,
    pub detail_description: String,
    pub detail_cover: String,
    pub detail_genres: String,
    pub detail_status: String,
    pub detail_rating: String,
    pub chapter_marker: String,
    pub chapter_item: String,
    pub chapter_link: String,
    pub chapter_label: String,
    pub chapter_date: String,
    pub reader_image: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            card: ".bsx".to_string(),
            card_link: "a".to_string(),
            card_title: ".tt".to_string(),
            card_cover: "img".to_string(),
            card_rating: ".rating".to_string(),
            card_colored: ".colored".to_string(),
            detail_marker: "h1.entry-title, .tt".to_string(),
            detail_title: "h1.entry-title, .tt".to_string(),
            detail_description: ".entry-content".to_string(),
            detail_cover: ".thumb img".to_string(),
            detail_genres: ".genres a, .mgen a".to_string(),
            detail_status: ".status".to_string(),
            detail_rating: ".rating".to_string(),
            chapter_marker: ".chbox, li[data-num]".to_string(),
            chapter_item: "li[data-num]".to_string(),
            chapter_link: "a".to_string(),
            chapter_label: ".chapternum".to_string(),
            chapter_date: ".chapter-date".to_string(),
            reader_image: ".reading-content img".to_string(),
        }
    }
}

/// One series card from a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesCard {
    pub title: String,
    pub url: String,
    pub slug: String,
    pub rating: Option<String>,
    pub cover_url: Option<String>,
    pub is_colored: bool,
    pub content_type: ContentType,
}

/// Fields read from a series page
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDetail {
    pub url: String,
    pub title: Option<String>,
    pub description: String,
    pub cover_url: Option<String>,
    pub genres: Vec<String>,
    pub status: Option<String>,
    pub rating: Option<String>,
    pub content_type: ContentType,
}

/// One entry of a series' chapter list
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterItem {
    pub number: String,
    pub title: String,
    pub url: String,
    pub date: Option<String>,
    pub language: String,
    pub pages: Vec<String>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| IngestError::Config(format!("invalid selector {:?}: {:?}", css, e)))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

// Lazy loaders keep a placeholder in `src` and the real URL in `data-src`.
fn image_source(img: ElementRef<'_>) -> Option<String> {
    ["src", "data-src", "data-lazy-src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.contains(PLACEHOLDER_IMAGE))
        .map(str::to_string)
}

fn absolutize(base: &Url, href: &str) -> String {
    base.join(href.trim())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.trim().to_string())
}

fn slug_of(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Pull a chapter number out of a label or URL such as "Chapter 12.5".
pub fn extract_chapter_number(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(?:chapter|ch\.?)[\s\-/]*(\d+(?:\.\d+)?)").ok()?;
    if let Some(cap) = re.captures(text) {
        return Some(cap[1].to_string());
    }
    let re = Regex::new(r"(\d+(?:\.\d+)?)").ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

pub fn parse_series_cards(html: &str, base: &Url, sel: &SiteSelectors, content_type: ContentType) -> Result<Vec<SeriesCard>> {
    let document = Html::parse_document(html);
    let card_sel = selector(&sel.card)?;
    let link_sel = selector(&sel.card_link)?;
    let title_sel = selector(&sel.card_title)?;
    let cover_sel = selector(&sel.card_cover)?;
    let rating_sel = selector(&sel.card_rating)?;
    let colored_sel = selector(&sel.card_colored)?;

    let mut out = Vec::new();
    for card in document.select(&card_sel) {
        let href = match card.select(&link_sel).next().and_then(|a| a.value().attr("href")) {
            Some(href) if !href.trim().is_empty() => href,
            _ => continue,
        };
        let title = match first_text(card, &title_sel) {
            Some(title) => title,
            None => continue,
        };
        let url = absolutize(base, href);
        out.push(SeriesCard {
            title,
            slug: slug_of(&url),
            url,
            rating: first_text(card, &rating_sel),
            cover_url: card
                .select(&cover_sel)
                .next()
                .and_then(image_source)
                .map(|src| absolutize(base, &src)),
            is_colored: card.select(&colored_sel).next().is_some(),
            content_type,
        });
    }
    Ok(out)
}

pub fn parse_series_detail(html: &str, url: &str, sel: &SiteSelectors, content_type: ContentType) -> Result<SeriesDetail> {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let base = Url::parse(url).map_err(|e| IngestError::MalformedRecord {
        item: url.to_string(),
        reason: e.to_string(),
    })?;

    let genre_sel = selector(&sel.detail_genres)?;
    let mut genres: Vec<String> = Vec::new();
    for genre in root.select(&genre_sel).map(element_text).filter(|g| !g.is_empty()) {
        if !genres.contains(&genre) {
            genres.push(genre);
        }
    }

    Ok(SeriesDetail {
        url: url.to_string(),
        title: first_text(root, &selector(&sel.detail_title)?),
        description: first_text(root, &selector(&sel.detail_description)?).unwrap_or_default(),
        cover_url: root
            .select(&selector(&sel.detail_cover)?)
            .next()
            .and_then(image_source)
            .map(|src| absolutize(&base, &src)),
        genres,
        status: first_text(root, &selector(&sel.detail_status)?).map(|s| s.to_lowercase()),
        rating: first_text(root, &selector(&sel.detail_rating)?),
        content_type,
    })
}

/// Chapter items in ascending chapter order.
pub fn parse_chapter_items(html: &str, base: &Url, sel: &SiteSelectors, language: &str) -> Result<Vec<ChapterItem>> {
    let document = Html::parse_document(html);
    let item_sel = selector(&sel.chapter_item)?;
    let link_sel = selector(&sel.chapter_link)?;
    let label_sel = selector(&sel.chapter_label)?;
    let date_sel = selector(&sel.chapter_date)?;

    let mut out = Vec::new();
    for item in document.select(&item_sel) {
        let href = match item.select(&link_sel).next().and_then(|a| a.value().attr("href")) {
            Some(href) if !href.trim().is_empty() => href,
            _ => continue,
        };
        let label = match first_text(item, &label_sel) {
            Some(label) => label,
            None => continue,
        };
        let number = item
            .value()
            .attr("data-num")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| extract_chapter_number(&label))
            .or_else(|| extract_chapter_number(href));
        let number = match number {
            Some(n) => n,
            None => {
                log::debug!("Skipping chapter without a number: {}", href);
                continue;
            }
        };

        out.push(ChapterItem {
            number,
            title: label,
            url: absolutize(base, href),
            date: first_text(item, &date_sel),
            language: language.to_string(),
            pages: Vec::new(),
        });
    }

    // Sites list newest first; non-numeric tokens sort last, keeping page order.
    out.sort_by(|a, b| {
        let a = a.number.parse::<f64>().ok();
        let b = b.number.parse::<f64>().ok();
        match (a, b) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
    Ok(out)
}

/// Reader page image URLs in document order, placeholders dropped.
pub fn parse_page_images(html: &str, base: &Url, sel: &SiteSelectors) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let image_sel = selector(&sel.reader_image)?;
    Ok(document
        .select(&image_sel)
        .filter_map(image_source)
        .map(|src| absolutize(base, &src))
        .collect())
}

struct RenderRequest {
    url: String,
    marker: String,
    marker_timeout: Duration,
    poll: Duration,
    challenge: ChallengeConfig,
}

/// Navigate, clear any challenge, wait for the marker and return the HTML.
/// `Ok(None)` means the marker never showed up.
fn render_blocking(page: &dyn PageDriver, clock: &dyn Clock, req: RenderRequest) -> Result<Option<String>> {
    page.navigate(&req.url)?;

    let mut handler = ChallengeHandler::new(req.challenge);
    if handler.run(page, clock) == ChallengeState::Failed {
        return Err(IngestError::ChallengeUnresolved(handler.timeout().as_secs()));
    }

    match wait_until(clock, req.marker_timeout, req.poll, || {
        page.has_element(&req.marker).unwrap_or(false)
    }) {
        WaitOutcome::Ready => Ok(Some(page.content()?)),
        WaitOutcome::TimedOut => {
            log::warn!("Timeout waiting for selector {} on {}", req.marker, req.url);
            Ok(None)
        }
    }
}

pub struct MadaraAdapter {
    page: Arc<dyn PageDriver>,
    clock: Arc<dyn Clock>,
    site: SiteConfig,
    base: Url,
    challenge: ChallengeConfig,
    marker_timeout: Duration,
    poll: Duration,
    // Held for the whole navigation: one page load at a time on the shared tab.
    navigation: tokio::sync::Mutex<()>,
    // The series page serves both detail and chapter list.
    last_render: Mutex<Option<(String, String)>>,
}

impl MadaraAdapter {
    pub fn new(page: Arc<dyn PageDriver>, site: SiteConfig, browser: &BrowserSettings) -> Result<Self> {
        let base = Url::parse(&site.base_url)
            .map_err(|e| IngestError::Config(format!("invalid base_url {}: {}", site.base_url, e)))?;
        Ok(Self {
            page,
            clock: Arc::new(SystemClock),
            site,
            base,
            challenge: ChallengeConfig {
                timeout: Duration::from_secs(browser.challenge_timeout_secs),
                poll_interval: Duration::from_millis(browser.poll_interval_ms),
                ..ChallengeConfig::default()
            },
            marker_timeout: Duration::from_secs(browser.marker_timeout_secs),
            poll: Duration::from_millis(browser.poll_interval_ms),
            navigation: tokio::sync::Mutex::new(()),
            last_render: Mutex::new(None),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn list_url(&self, token: PageToken) -> String {
        let path = self
            .site
            .series_path
            .replace("{page}", &(token.index() + 1).to_string());
        absolutize(&self.base, &path)
    }

    async fn render(&self, url: &str, marker: &str) -> Result<Option<String>> {
        let _guard = self.navigation.lock().await;

        let page = Arc::clone(&self.page);
        let clock = Arc::clone(&self.clock);
        let req = RenderRequest {
            url: url.to_string(),
            marker: marker.to_string(),
            marker_timeout: self.marker_timeout,
            poll: self.poll,
            challenge: self.challenge.clone(),
        };

        let html = tokio::task::spawn_blocking(move || render_blocking(page.as_ref(), clock.as_ref(), req))
            .await
            .map_err(|e| IngestError::TransientNetwork(format!("browser task failed: {}", e)))??;

        if let Some(html) = &html {
            let mut last = self.last_render.lock().unwrap_or_else(|p| p.into_inner());
            *last = Some((url.to_string(), html.clone()));
        }
        Ok(html)
    }

    fn cached(&self, url: &str) -> Option<String> {
        let last = self.last_render.lock().unwrap_or_else(|p| p.into_inner());
        last.as_ref().filter(|(u, _)| u == url).map(|(_, html)| html.clone())
    }

    fn selectors(&self) -> &SiteSelectors {
        &self.site.selectors
    }
}

#[async_trait]
impl SourceAdapter for MadaraAdapter {
    fn name(&self) -> &str {
        &self.site.name
    }

    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            preferred_locale: self.site.language.clone(),
        }
    }

    async fn list_page(&self, token: PageToken) -> Result<ListPage> {
        if let Some(max) = self.site.max_pages {
            if token.index() >= max {
                return Ok(ListPage::empty());
            }
        }

        let url = self.list_url(token);
        log::info!("[{}] Getting series list from {}", self.site.name, url);
        let html = match self.render(&url, &self.selectors().card).await? {
            Some(html) => html,
            None => return Ok(ListPage::empty()),
        };

        let cards = parse_series_cards(&html, &self.base, self.selectors(), self.site.content_type)?;
        log::info!("[{}] Found {} series on page {}", self.site.name, cards.len(), token.index() + 1);
        Ok(ListPage {
            has_more: !cards.is_empty(),
            records: cards.into_iter().map(|c| RawRecord::Dom(DomRecord::Card(c))).collect(),
        })
    }

    async fn fetch_detail(&self, item: &ItemRef) -> Result<RawRecord> {
        let html = self
            .render(&item.url, &self.selectors().detail_marker)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("no series details at {}", item.url)))?;

        let detail = parse_series_detail(&html, &item.url, self.selectors(), self.site.content_type)?;
        Ok(RawRecord::Dom(DomRecord::Detail(detail)))
    }

    async fn fetch_chapters(&self, item: &ItemRef) -> Result<Vec<RawRecord>> {
        let sel = self.selectors();
        let mut items = match self.cached(&item.url) {
            Some(html) => parse_chapter_items(&html, &self.base, sel, &self.site.language)?,
            None => Vec::new(),
        };

        if items.is_empty() {
            items = match self.render(&item.url, &sel.chapter_marker).await? {
                Some(html) => parse_chapter_items(&html, &self.base, sel, &self.site.language)?,
                None => Vec::new(),
            };
        }

        log::info!("[{}] Found {} chapters for {}", self.site.name, items.len(), item.url);
        Ok(items.into_iter().map(|c| RawRecord::Dom(DomRecord::Chapter(c))).collect())
    }

    fn collects_pages(&self) -> bool {
        self.site.collect_pages
    }

    async fn page_images(&self, chapter_url: &str) -> Result<Vec<String>> {
        let sel = self.selectors();
        match self.render(chapter_url, &sel.reader_image).await? {
            Some(html) => parse_page_images(&html, &self.base, sel),
            None => Ok(Vec::new()),
        }
    }

    async fn capture_snapshot(&self) -> Option<Vec<u8>> {
        let page = Arc::clone(&self.page);
        match tokio::task::spawn_blocking(move || page.screenshot_png()).await {
            Ok(Ok(png)) => Some(png),
            Ok(Err(e)) => {
                log::warn!("[{}] Snapshot failed: {}", self.site.name, e);
                None
            }
            Err(e) => {
                log::warn!("[{}] Snapshot task failed: {}", self.site.name, e);
                None
            }
        }
    }
}
