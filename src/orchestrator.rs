//! Drives one ingestion run: list pages, then per item detail, normalize,
//! upsert, chapters, write.
//!
//! Items are processed strictly one at a time. A failing item is logged and
//! counted, and the run moves on; only fatal errors (resource acquisition,
//! cancellation) end the run early.

use crate::db::CatalogStore;
use crate::error::{IngestError, Result};
use crate::fetcher::Fetcher;
use crate::models::{ChapterEntry, RawRecord, RunSummary};
use crate::normalizer::{normalize_chapter, normalize_listed_catalog, NormalizeOptions};
use crate::sources::{PageToken, SourceAdapter};
use crate::writer::Writer;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ItemOutcome {
    created: bool,
    chapters_written: usize,
}

pub struct Ingestor<S: CatalogStore> {
    adapter: Box<dyn SourceAdapter>,
    fetcher: Fetcher,
    writer: Writer<S>,
}

impl<S: CatalogStore> Ingestor<S> {
    pub fn new(adapter: Box<dyn SourceAdapter>, fetcher: Fetcher, writer: Writer<S>) -> Self {
        Self { adapter, fetcher, writer }
    }

    pub fn writer(&self) -> &Writer<S> {
        &self.writer
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        let source = self.adapter.name().to_string();
        let opts = self.adapter.normalize_options();
        let mut summary = RunSummary::default();
        let mut token = PageToken::first();

        log::info!("[{}] Starting ingestion", source);

        loop {
            self.fetcher.check_cancelled()?;

            let adapter = self.adapter.as_ref();
            let label = format!("page {}", token.index() + 1);
            let page = match self
                .fetcher
                .fetch(adapter, "list_page", &label, || adapter.list_page(token))
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::error!("source={} op=list_page item={} error={}, stopping pagination", source, label, e);
                    summary.failed += 1;
                    break;
                }
            };

            if page.records.is_empty() {
                log::info!("[{}] No items on {}, done", source, label);
                break;
            }
            summary.pages += 1;
            log::info!("[{}] {} items on {}", source, page.records.len(), label);
            self.fetcher.pace_request().await?;

            for record in &page.records {
                self.fetcher.check_cancelled()?;
                summary.items_seen += 1;

                match self.process_item(record, &opts).await {
                    Ok(outcome) => {
                        if outcome.created {
                            summary.created += 1;
                        } else {
                            summary.existing += 1;
                        }
                        summary.chapters_written += outcome.chapters_written;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) if e.is_absent() => {
                        log::info!("source={} item={} skipped: {}", source, record.identity(), e);
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        log::error!(
                            "source={} item={} kind={} error={}",
                            source,
                            record.identity(),
                            e.kind(),
                            e
                        );
                        summary.failed += 1;
                    }
                }

                self.fetcher.pace_item().await?;
            }

            if !page.has_more {
                break;
            }
            token = token.next();
            self.fetcher.pace_page().await?;
        }

        log::info!(
            "[{}] Run finished: {} pages, {} items ({} new, {} existing, {} skipped, {} failed), {} chapters written",
            source,
            summary.pages,
            summary.items_seen,
            summary.created,
            summary.existing,
            summary.skipped,
            summary.failed,
            summary.chapters_written
        );
        self.fetcher.metrics().log_summary();
        Ok(summary)
    }

    async fn process_item(&mut self, record: &RawRecord, opts: &NormalizeOptions) -> Result<ItemOutcome> {
        let adapter = self.adapter.as_ref();
        let source = adapter.name();
        let item = record.item_ref().ok_or_else(|| IngestError::MalformedRecord {
            item: record.identity(),
            reason: "list record does not reference an item".to_string(),
        })?;

        let detail = self
            .fetcher
            .fetch(adapter, "fetch_detail", &item.id, || adapter.fetch_detail(&item))
            .await?;
        self.fetcher.pace_request().await?;

        let entry = normalize_listed_catalog(record, &detail, opts)?;
        let (content_id, created) = self.writer.upsert_catalog_entry(&entry)?;

        let raw_chapters = match self
            .fetcher
            .fetch(adapter, "fetch_chapters", &item.id, || adapter.fetch_chapters(&item))
            .await
        {
            Ok(chapters) => chapters,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                // Keep the stored count; it reflects the last successful fetch.
                log::error!("source={} item={} op=fetch_chapters error={}", source, item.id, e);
                return Ok(ItemOutcome { created, chapters_written: 0 });
            }
        };

        let mut chapters: Vec<ChapterEntry> = Vec::with_capacity(raw_chapters.len());
        for raw in &raw_chapters {
            match normalize_chapter(raw) {
                Ok(chapter) => chapters.push(chapter),
                Err(e) => log::warn!("source={} item={} chapter={} skipped: {}", source, item.id, raw.identity(), e),
            }
        }

        if adapter.collects_pages() {
            for chapter in chapters.iter_mut() {
                let url = chapter.source_url.clone();
                match self
                    .fetcher
                    .fetch(adapter, "page_images", &url, || adapter.page_images(&url))
                    .await
                {
                    Ok(pages) => chapter.pages = pages,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => log::warn!("source={} item={} op=page_images error={}", source, url, e),
                }
                self.fetcher.pace_request().await?;
            }
        }

        let report = self.writer.record_chapters(&content_id, &chapters)?;
        log::info!(
            "[{}] {} ({}): {} chapters, {} written",
            source,
            entry.title,
            if created { "new" } else { "existing" },
            report.fetched,
            report.written
        );
        Ok(ItemOutcome {
            created,
            chapters_written: report.written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::db::{self, SqliteStore};
    use crate::fetcher::RetryPolicy;
    use crate::models::{ApiRecord, ItemRef};
    use crate::sources::ListPage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn manga(id: &str, title: &str) -> RawRecord {
        RawRecord::Api(ApiRecord::Manga(
            serde_json::from_value(json!({"id": id, "attributes": {"title": {"en": title}}})).unwrap(),
        ))
    }

    fn chapter(id: &str, number: &str) -> RawRecord {
        RawRecord::Api(ApiRecord::Chapter(
            serde_json::from_value(json!({
                "id": id,
                "attributes": {"chapter": number, "translatedLanguage": "en"}
            }))
            .unwrap(),
        ))
    }

    #[derive(Default)]
    struct FakeSource {
        pages: Vec<Vec<RawRecord>>,
        always_more: bool,
        details: HashMap<String, RawRecord>,
        detail_errors: HashMap<String, IngestError>,
        chapters: HashMap<String, Vec<RawRecord>>,
        chapter_errors: HashMap<String, IngestError>,
        list_calls: Arc<AtomicUsize>,
    }

    impl FakeSource {
        fn with_items(mut self, page: &[(&str, &str)]) -> Self {
            let mut records = Vec::new();
            for (id, title) in page {
                let record = manga(id, title);
                self.details.insert(id.to_string(), record.clone());
                records.push(record);
            }
            self.pages.push(records);
            self
        }

        fn with_chapters(mut self, id: &str, numbers: &[&str]) -> Self {
            let records = numbers
                .iter()
                .enumerate()
                .map(|(i, n)| chapter(&format!("{}-c{}", id, i), n))
                .collect();
            self.chapters.insert(id.to_string(), records);
            self
        }

        fn failing_detail(mut self, id: &str, error: IngestError) -> Self {
            self.detail_errors.insert(id.to_string(), error);
            self
        }

        fn failing_chapters(mut self, id: &str, error: IngestError) -> Self {
            self.chapter_errors.insert(id.to_string(), error);
            self
        }
    }

    fn clone_error(e: &IngestError) -> IngestError {
        match e {
            IngestError::TransientNetwork(s) => IngestError::TransientNetwork(s.clone()),
            IngestError::NotFound(s) => IngestError::NotFound(s.clone()),
            IngestError::ResourceAcquisition { resource, reason } => IngestError::ResourceAcquisition {
                resource: resource.clone(),
                reason: reason.clone(),
            },
            other => IngestError::StorageWrite(other.to_string()),
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        fn normalize_options(&self) -> NormalizeOptions {
            NormalizeOptions::default()
        }

        async fn list_page(&self, token: PageToken) -> Result<ListPage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let records = self.pages.get(token.index() as usize).cloned().unwrap_or_default();
            let has_more = self.always_more || (token.index() as usize) + 1 < self.pages.len();
            Ok(ListPage { records, has_more })
        }

        async fn fetch_detail(&self, item: &ItemRef) -> Result<RawRecord> {
            if let Some(e) = self.detail_errors.get(&item.id) {
                return Err(clone_error(e));
            }
            self.details
                .get(&item.id)
                .cloned()
                .ok_or_else(|| IngestError::NotFound(item.id.clone()))
        }

        async fn fetch_chapters(&self, item: &ItemRef) -> Result<Vec<RawRecord>> {
            if let Some(e) = self.chapter_errors.get(&item.id) {
                return Err(clone_error(e));
            }
            Ok(self.chapters.get(&item.id).cloned().unwrap_or_default())
        }
    }

    fn ingestor(source: FakeSource, cancel: CancellationToken) -> Ingestor<SqliteStore> {
        let policy = RetryPolicy { max_retries: 3, base_delay: Duration::ZERO, jitter: Duration::ZERO };
        let fetcher = Fetcher::new(policy, PacingConfig::none(), cancel);
        let writer = Writer::new(SqliteStore::open_in_memory().unwrap(), 50);
        Ingestor::new(Box::new(source), fetcher, writer)
    }

    #[tokio::test]
    async fn test_pagination_stops_on_empty_page() {
        let list_calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            always_more: true,
            list_calls: list_calls.clone(),
            ..FakeSource::default()
        }
        .with_items(&[("a", "Alpha"), ("b", "Beta")])
        .with_items(&[("c", "Gamma")]);

        let mut ingestor = ingestor(source, CancellationToken::new());
        let summary = ingestor.run().await.unwrap();

        assert_eq!(list_calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.created, 3);
        assert_eq!(db::get_content_count(ingestor.writer().store().conn()).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_has_more_false_ends_run() {
        let list_calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource { list_calls: list_calls.clone(), ..FakeSource::default() }
            .with_items(&[("a", "Alpha")]);

        let summary = ingestor(source, CancellationToken::new()).run().await.unwrap();
        assert_eq!(list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.items_seen, 1);
    }

    #[tokio::test]
    async fn test_failing_items_do_not_stop_the_run() {
        let source = FakeSource::default()
            .with_items(&[("a", "Alpha"), ("flaky", "Flaky"), ("gone", "Gone"), ("c", "")])
            .with_items(&[("d", "Delta")])
            .with_chapters("a", &["1", "2"])
            .failing_detail("flaky", IngestError::TransientNetwork("503".into()))
            .failing_detail("gone", IngestError::NotFound("404".into()));

        let mut ingestor = ingestor(source, CancellationToken::new());
        let summary = ingestor.run().await.unwrap();

        assert_eq!(summary.items_seen, 5);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.skipped, 1);
        // exhausted retries + missing title
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.chapters_written, 2);

        let attempts = ingestor.fetcher().metrics().get_metrics("fake", "fetch_detail").unwrap();
        assert_eq!(attempts.retry_count, 2);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let build = || {
            FakeSource::default()
                .with_items(&[("a", "Alpha")])
                .with_chapters("a", &["1", "2", "3"])
        };
        let mut ingestor = ingestor(build(), CancellationToken::new());
        let first = ingestor.run().await.unwrap();
        assert_eq!(first.created, 1);

        // Same store, fresh adapter.
        let Ingestor { fetcher, writer, .. } = ingestor;
        let mut again = Ingestor::new(Box::new(build()), fetcher, writer);
        let second = again.run().await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.existing, 1);

        let conn = again.writer().store().conn();
        assert_eq!(db::get_content_count(conn).unwrap(), 1);
        assert_eq!(db::get_chapter_count(conn).unwrap(), 3);
        let id = db::find_content_id(conn, "https://mangadex.org/title/a").unwrap().unwrap();
        assert_eq!(db::get_content_by_id(conn, &id).unwrap().unwrap().total_chapters, 3);
    }

    #[tokio::test]
    async fn test_chapter_failure_keeps_previous_count() {
        let mut ingestor = ingestor(
            FakeSource::default().with_items(&[("a", "Alpha")]).with_chapters("a", &["1", "2"]),
            CancellationToken::new(),
        );
        ingestor.run().await.unwrap();

        let Ingestor { fetcher, writer, .. } = ingestor;
        let failing = FakeSource::default()
            .with_items(&[("a", "Alpha")])
            .failing_chapters("a", IngestError::NotFound("chapter feed".into()));
        let mut again = Ingestor::new(Box::new(failing), fetcher, writer);
        let summary = again.run().await.unwrap();
        assert_eq!(summary.existing, 1);

        let conn = again.writer().store().conn();
        let id = db::find_content_id(conn, "https://mangadex.org/title/a").unwrap().unwrap();
        assert_eq!(db::get_content_by_id(conn, &id).unwrap().unwrap().total_chapters, 2);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_run() {
        let source = FakeSource::default()
            .with_items(&[("a", "Alpha"), ("b", "Beta")])
            .failing_detail(
                "a",
                IngestError::ResourceAcquisition { resource: "browser".into(), reason: "crashed".into() },
            );

        let err = ingestor(source, CancellationToken::new()).run().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = FakeSource::default().with_items(&[("a", "Alpha")]);

        let err = ingestor(source, cancel).run().await.unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
    }

    #[tokio::test]
    async fn test_madara_card_details_reach_the_store() {
        use crate::config::{BrowserSettings, SiteConfig};
        use crate::sources::madara::tests::StaticSite;
        use crate::sources::madara::MadaraAdapter;
        use crate::wait::ManualClock;

        let list = r#"<html><body><nav></nav>
            <div class="bsx"><a href="/series/solo-leveling/">
              <span class="colored">Color</span>
              <img src="https://cdn.example.com/solo.jpg" />
              <div class="tt">Solo Leveling</div>
              <div class="rating">9.5</div>
            </a></div></body></html>"#;
        let series = r#"<html><body><nav></nav><h1 class="entry-title">Solo Leveling</h1></body></html>"#;
        let site = Arc::new(StaticSite::new(&[
            ("https://madarascans.com/series/page/1/", list),
            ("https://madarascans.com/series/solo-leveling/", series),
        ]));

        let settings = BrowserSettings { marker_timeout_secs: 1, ..BrowserSettings::default() };
        let config = SiteConfig { max_pages: Some(1), ..SiteConfig::madarascans() };
        let adapter = MadaraAdapter::new(site, config, &settings)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new()));

        let policy = RetryPolicy { max_retries: 1, base_delay: Duration::ZERO, jitter: Duration::ZERO };
        let fetcher = Fetcher::new(policy, PacingConfig::none(), CancellationToken::new());
        let writer = Writer::new(SqliteStore::open_in_memory().unwrap(), 50);
        let mut ingestor = Ingestor::new(Box::new(adapter), fetcher, writer);

        let summary = ingestor.run().await.unwrap();
        assert_eq!(summary.created, 1);

        let conn = ingestor.writer().store().conn();
        let id = db::find_content_id(conn, "https://madarascans.com/series/solo-leveling/")
            .unwrap()
            .unwrap();
        let entry = db::get_content_by_id(conn, &id).unwrap().unwrap();
        assert_eq!(entry.tags, vec!["Colored"]);
        assert_eq!(entry.cover_image, "https://cdn.example.com/solo.jpg");
        assert_eq!(entry.rating, 5.0);
        assert_eq!(entry.total_chapters, 0);
    }
}
