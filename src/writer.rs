use chrono::Utc;
use uuid::Uuid;

use crate::db::CatalogStore;
use crate::error::{IngestError, Result};
use crate::models::{CatalogEntry, ChapterEntry};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterWriteReport {
    pub fetched: usize,
    pub written: usize,
    pub failed_batches: usize,
}

/// Deduplicating writer over a [`CatalogStore`].
///
/// Catalog rows are created once per `source_url` and never rewritten;
/// chapters are upserted in batches and the owning row's chapter count is
/// refreshed after every write.
pub struct Writer<S: CatalogStore> {
    store: S,
    batch_size: usize,
}

impl<S: CatalogStore> Writer<S> {
    pub fn new(store: S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the content id and whether the row was created now.
    pub fn upsert_catalog_entry(&self, entry: &CatalogEntry) -> Result<(String, bool)> {
        if let Some(id) = self.store.find_content_id(&entry.source_url)? {
            log::debug!("Already stored: {} ({})", entry.title, id);
            return Ok((id, false));
        }

        let id = Uuid::new_v4().to_string();
        match self.store.insert_content(&id, entry) {
            Ok(()) => {
                log::info!("Stored new entry: {} ({})", entry.title, id);
                Ok((id, true))
            }
            Err(IngestError::StorageConflict(reason)) => {
                // Someone else inserted the same source_url in between.
                log::warn!("Conflict storing {}: {}", entry.source_url, reason);
                match self.store.find_content_id(&entry.source_url)? {
                    Some(existing) => Ok((existing, false)),
                    None => Err(IngestError::StorageConflict(reason)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Write chapters in batches, then set `total_chapters` to the number
    /// fetched. A failed batch is logged and counted; the others still land.
    pub fn record_chapters(&mut self, content_id: &str, chapters: &[ChapterEntry]) -> Result<ChapterWriteReport> {
        let mut report = ChapterWriteReport {
            fetched: chapters.len(),
            ..ChapterWriteReport::default()
        };

        for (index, batch) in chapters.chunks(self.batch_size).enumerate() {
            match self.store.write_chapter_batch(content_id, batch) {
                Ok(written) => report.written += written,
                Err(e) => {
                    log::error!(
                        "item={} op=write_chapters batch={} size={} failed: {}",
                        content_id,
                        index,
                        batch.len(),
                        e
                    );
                    report.failed_batches += 1;
                }
            }
        }

        self.store
            .update_chapter_count(content_id, chapters.len() as i64, Utc::now())?;
        Ok(report)
    }
}
