use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::models::{CatalogEntry, ChapterEntry, ContentType};
use crate::normalizer::{map_content_rating, map_status};

pub fn init_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    log::info!("Creating tables if not exists...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS content (
            id TEXT PRIMARY KEY,
            source_url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            cover_image TEXT NOT NULL DEFAULT '',
            genres TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            authors TEXT NOT NULL DEFAULT '[]',
            artists TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            content_rating TEXT NOT NULL,
            rating REAL NOT NULL,
            total_chapters INTEGER NOT NULL DEFAULT 0,
            content_type TEXT NOT NULL,
            last_chapter_update TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_id TEXT NOT NULL,
            chapter_number TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            source_url TEXT NOT NULL,
            language TEXT NOT NULL,
            scanlation_group TEXT NOT NULL DEFAULT 'Unknown',
            publish_at TEXT,
            pages TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (content_id) REFERENCES content (id),
            UNIQUE(content_id, chapter_number, language)
        );",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ch_content ON chapters(content_id);",
        [],
    )?;

    log::info!("Tables ensured.");
    Ok(())
}

fn to_json(values: &[String]) -> Result<String> {
    serde_json::to_string(values).map_err(|e| IngestError::StorageWrite(e.to_string()))
}

fn from_json(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}

fn parse_ts(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

pub fn find_content_id(conn: &Connection, source_url: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM content WHERE source_url = ?1",
            [source_url],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Plain insert: a second row for the same `source_url` fails with
/// `StorageConflict`.
pub fn insert_content(conn: &Connection, id: &str, entry: &CatalogEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO content (id, source_url, title, description, cover_image, genres, tags, authors, artists,
            status, content_rating, rating, total_chapters, content_type, last_chapter_update, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            id,
            entry.source_url,
            entry.title,
            entry.description,
            entry.cover_image,
            to_json(&entry.genres)?,
            to_json(&entry.tags)?,
            to_json(&entry.authors)?,
            to_json(&entry.artists)?,
            entry.status.as_str(),
            entry.content_rating.as_str(),
            entry.rating,
            entry.total_chapters,
            entry.content_type.as_str(),
            entry.last_chapter_update,
            entry.created_at.to_rfc3339(),
            entry.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Upsert chapters on `(content_id, chapter_number, language)`.
pub fn insert_chapters(tx: &Transaction, content_id: &str, chapters: &[ChapterEntry]) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT INTO chapters (content_id, chapter_number, title, source_url, language, scanlation_group,
            publish_at, pages, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(content_id, chapter_number, language) DO UPDATE SET
            title=excluded.title,
            source_url=excluded.source_url,
            scanlation_group=excluded.scanlation_group,
            publish_at=excluded.publish_at,
            pages=CASE WHEN excluded.pages = '[]' THEN chapters.pages ELSE excluded.pages END,
            updated_at=excluded.updated_at",
    )?;
    let mut written = 0;
    for chapter in chapters {
        written += stmt.execute(params![
            content_id,
            chapter.chapter_number,
            chapter.title,
            chapter.source_url,
            chapter.language,
            chapter.scanlation_group,
            chapter.publish_at.map(|dt| dt.to_rfc3339()),
            to_json(&chapter.pages)?,
            chapter.created_at.to_rfc3339(),
            chapter.updated_at.to_rfc3339(),
        ])?;
    }
    Ok(written)
}

pub fn update_chapter_count(conn: &Connection, content_id: &str, total: i64, at: DateTime<Utc>) -> Result<()> {
    let updated = conn.execute(
        "UPDATE content SET total_chapters = ?1, updated_at = ?2 WHERE id = ?3",
        params![total, at.to_rfc3339(), content_id],
    )?;
    if updated == 0 {
        return Err(IngestError::StorageWrite(format!("no content row with id {}", content_id)));
    }
    Ok(())
}

pub fn get_content_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM content", [], |row| row.get(0))?;
    Ok(count)
}

pub fn get_chapter_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM chapters", [], |row| row.get(0))?;
    Ok(count)
}

pub fn get_chapter_count_for(conn: &Connection, content_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chapters WHERE content_id = ?1",
        [content_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn get_content_by_id(conn: &Connection, content_id: &str) -> Result<Option<CatalogEntry>> {
    let entry = conn
        .query_row(
            "SELECT source_url, title, description, cover_image, genres, tags, authors, artists, status,
                content_rating, rating, total_chapters, content_type, last_chapter_update, created_at, updated_at
             FROM content WHERE id = ?1",
            [content_id],
            |row| {
                let genres: String = row.get(4)?;
                let tags: String = row.get(5)?;
                let authors: String = row.get(6)?;
                let artists: String = row.get(7)?;
                let status: String = row.get(8)?;
                let content_rating: String = row.get(9)?;
                let content_type: String = row.get(12)?;
                let created_at: String = row.get(14)?;
                let updated_at: String = row.get(15)?;
                Ok(CatalogEntry {
                    source_url: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    cover_image: row.get(3)?,
                    genres: from_json(&genres),
                    tags: from_json(&tags),
                    authors: from_json(&authors),
                    artists: from_json(&artists),
                    status: map_status(&status),
                    content_rating: map_content_rating(&content_rating),
                    rating: row.get(10)?,
                    total_chapters: row.get(11)?,
                    content_type: if content_type == "manhwa" { ContentType::Manhwa } else { ContentType::Manga },
                    last_chapter_update: row.get(13)?,
                    created_at: parse_ts(&created_at),
                    updated_at: parse_ts(&updated_at),
                })
            },
        )
        .optional()?;
    Ok(entry)
}

pub fn get_chapters_by_content_id(conn: &Connection, content_id: &str) -> Result<Vec<ChapterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT chapter_number, title, source_url, language, scanlation_group, publish_at, pages, created_at, updated_at
         FROM chapters WHERE content_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([content_id], |row| {
        let publish_at: Option<String> = row.get(5)?;
        let pages: String = row.get(6)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        Ok(ChapterEntry {
            chapter_number: row.get(0)?,
            title: row.get(1)?,
            source_url: row.get(2)?,
            language: row.get(3)?,
            scanlation_group: row.get(4)?,
            publish_at: publish_at.as_deref().map(parse_ts),
            pages: from_json(&pages),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    })?;

    let mut chapters = Vec::new();
    for row in rows {
        chapters.push(row?);
    }
    Ok(chapters)
}

/// Storage operations the writer depends on.
pub trait CatalogStore {
    fn find_content_id(&self, source_url: &str) -> Result<Option<String>>;

    fn insert_content(&self, id: &str, entry: &CatalogEntry) -> Result<()>;

    /// All-or-nothing write of one batch; returns rows touched.
    fn write_chapter_batch(&mut self, content_id: &str, chapters: &[ChapterEntry]) -> Result<usize>;

    fn update_chapter_count(&self, content_id: &str, total: i64, at: DateTime<Utc>) -> Result<()>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = init_db(path)?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl CatalogStore for SqliteStore {
    fn find_content_id(&self, source_url: &str) -> Result<Option<String>> {
        find_content_id(&self.conn, source_url)
    }

    fn insert_content(&self, id: &str, entry: &CatalogEntry) -> Result<()> {
        insert_content(&self.conn, id, entry)
    }

    fn write_chapter_batch(&mut self, content_id: &str, chapters: &[ChapterEntry]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let written = insert_chapters(&tx, content_id, chapters)?;
        tx.commit()?;
        Ok(written)
    }

    fn update_chapter_count(&self, content_id: &str, total: i64, at: DateTime<Utc>) -> Result<()> {
        update_chapter_count(&self.conn, content_id, total, at)
    }
}
