use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use manga_ingest::config::{MangaDexConfig, PacingConfig};
use manga_ingest::db::{self, SqliteStore};
use manga_ingest::fetcher::{Fetcher, RetryPolicy};
use manga_ingest::http_client::EnhancedHttpClient;
use manga_ingest::models::RunSummary;
use manga_ingest::orchestrator::Ingestor;
use manga_ingest::sources::mangadex::{title_url, MangaDexAdapter};
use manga_ingest::writer::Writer;

/// What the fake API serves.
#[derive(Clone)]
struct Fixture {
    manga_ids: Vec<&'static str>,
    chapters_per_manga: usize,
    /// Manga ids whose detail endpoint answers 404
    missing: Vec<&'static str>,
    /// Detail requests answered with 503 before the API recovers
    detail_failures: usize,
    /// Chapter feed pages after the first answer 404
    chapter_tail_missing: bool,
}

impl Fixture {
    fn new(manga_ids: &[&'static str]) -> Self {
        Self {
            manga_ids: manga_ids.to_vec(),
            chapters_per_manga: 3,
            missing: vec![],
            detail_failures: 0,
            chapter_tail_missing: false,
        }
    }
}

struct FakeApi {
    base_url: String,
    shutdown: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
    detail_hits: Arc<AtomicUsize>,
}

impl FakeApi {
    fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.join();
    }
}

fn parse_query(url: &str) -> (String, HashMap<String, String>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (path.to_string(), params)
}

fn manga_json(id: &str) -> Value {
    json!({
        "id": id,
        "type": "manga",
        "attributes": {
            "title": {"en": format!("Series {}", id)},
            "description": {"en": "A test series."},
            "status": "ongoing",
            "contentRating": "safe",
            "tags": [
                {"id": "t1", "attributes": {"name": {"en": "Action"}, "group": "genre"}}
            ]
        },
        "relationships": [
            {"id": "a1", "type": "author", "attributes": {"name": "Author"}},
            {"id": "c1", "type": "cover_art", "attributes": {"fileName": "cover.jpg"}}
        ]
    })
}

fn chapter_json(manga_id: &str, number: usize) -> Value {
    json!({
        "id": format!("{}-ch{}", manga_id, number),
        "type": "chapter",
        "attributes": {
            "chapter": number.to_string(),
            "title": "",
            "translatedLanguage": "en",
            "publishAt": "2024-01-01T00:00:00+00:00"
        },
        "relationships": [
            {"id": "g1", "type": "scanlation_group", "attributes": {"name": "Test Scans"}}
        ]
    })
}

fn respond_json(request: tiny_http::Request, status: u16, body: Value) {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    let response = tiny_http::Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(header);
    let _ = request.respond(response);
}

fn spawn_api(fixture: Fixture) -> FakeApi {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown, shutdown_rx) = mpsc::channel::<()>();
    let detail_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&detail_hits);

    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        let request = match server.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(_) => break,
        };

        let (path, params) = parse_query(request.url());
        let number = |key: &str| params.get(key).and_then(|v| v.parse::<usize>().ok());

        if path == "/manga" {
            let limit = number("limit").unwrap_or(100);
            let offset = number("offset").unwrap_or(0);
            let data: Vec<Value> = fixture
                .manga_ids
                .iter()
                .skip(offset)
                .take(limit)
                .map(|id| manga_json(id))
                .collect();
            let body = json!({
                "result": "ok",
                "data": data,
                "limit": limit,
                "offset": offset,
                "total": fixture.manga_ids.len()
            });
            respond_json(request, 200, body);
        } else if let Some(id) = path.strip_prefix("/manga/") {
            let seen = hits.fetch_add(1, Ordering::SeqCst);
            if seen < fixture.detail_failures {
                respond_json(request, 503, json!({"result": "error"}));
            } else if fixture.missing.contains(&id) {
                respond_json(request, 404, json!({"result": "error"}));
            } else {
                respond_json(request, 200, json!({"result": "ok", "data": manga_json(id)}));
            }
        } else if path == "/chapter" {
            let manga = params.get("manga").cloned().unwrap_or_default();
            let limit = number("limit").unwrap_or(100);
            let offset = number("offset").unwrap_or(0);
            if offset > 0 && fixture.chapter_tail_missing {
                respond_json(request, 404, json!({"result": "error"}));
                continue;
            }
            let data: Vec<Value> = (1..=fixture.chapters_per_manga)
                .skip(offset)
                .take(limit)
                .map(|n| chapter_json(&manga, n))
                .collect();
            let body = json!({
                "result": "ok",
                "data": data,
                "limit": limit,
                "offset": offset,
                "total": fixture.chapters_per_manga
            });
            respond_json(request, 200, body);
        } else {
            respond_json(request, 404, json!({"result": "error"}));
        }
    });

    FakeApi {
        base_url,
        shutdown,
        handle,
        detail_hits,
    }
}

fn fast_fetcher() -> Fetcher {
    let policy = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        jitter: Duration::ZERO,
    };
    Fetcher::new(policy, PacingConfig::none(), CancellationToken::new())
}

fn ingestor(base_url: &str, db_path: &Path, page_limit: u32) -> Ingestor<SqliteStore> {
    let client = Arc::new(EnhancedHttpClient::new().expect("http client"));
    let config = MangaDexConfig {
        base_url: base_url.to_string(),
        page_limit,
        ..MangaDexConfig::default()
    };
    let adapter = MangaDexAdapter::new(client, config);
    let writer = Writer::new(SqliteStore::open(db_path).expect("open db"), 50);
    Ingestor::new(Box::new(adapter), fast_fetcher(), writer)
}

async fn run_once(base_url: &str, db_path: &Path, page_limit: u32) -> (RunSummary, Ingestor<SqliteStore>) {
    let mut ingestor = ingestor(base_url, db_path, page_limit);
    let summary = ingestor.run().await.expect("run succeeds");
    (summary, ingestor)
}

#[tokio::test]
async fn rerun_does_not_duplicate_rows() {
    let api = spawn_api(Fixture::new(&["m1", "m2"]));
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.db");

    let (first, _) = run_once(&api.base_url, &db_path, 100).await;
    assert_eq!(first.created, 2);
    assert_eq!(first.chapters_written, 6);
    assert_eq!(first.failed, 0);

    let (second, ingestor) = run_once(&api.base_url, &db_path, 100).await;
    assert_eq!(second.created, 0);
    assert_eq!(second.existing, 2);

    let conn = ingestor.writer().store().conn();
    assert_eq!(db::get_content_count(conn).unwrap(), 2);
    assert_eq!(db::get_chapter_count(conn).unwrap(), 6);

    let id = db::find_content_id(conn, &title_url("m1")).unwrap().expect("m1 stored");
    let entry = db::get_content_by_id(conn, &id).unwrap().unwrap();
    assert_eq!(entry.title, "Series m1");
    assert_eq!(entry.total_chapters, 3);
    assert_eq!(entry.genres, vec!["Action".to_string()]);
    assert_eq!(entry.authors, vec!["Author".to_string()]);

    let chapters = db::get_chapters_by_content_id(conn, &id).unwrap();
    let numbers: Vec<&str> = chapters.iter().map(|c| c.chapter_number.as_str()).collect();
    assert_eq!(numbers, vec!["1", "2", "3"]);
    assert!(chapters.iter().all(|c| c.scanlation_group == "Test Scans"));

    api.stop();
}

#[tokio::test]
async fn transient_detail_failure_is_retried() {
    let mut fixture = Fixture::new(&["m1"]);
    fixture.detail_failures = 1;
    let api = spawn_api(fixture);
    let dir = tempfile::tempdir().unwrap();

    let (summary, ingestor) = run_once(&api.base_url, &dir.path().join("manga.db"), 100).await;
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(api.detail_hits.load(Ordering::SeqCst), 2);

    let metrics = ingestor
        .fetcher()
        .metrics()
        .get_metrics("mangadex", "fetch_detail")
        .expect("detail metrics");
    assert_eq!(metrics.retry_count, 1);
    assert_eq!(metrics.successful_calls, 1);
    assert_eq!(metrics.failed_calls, 0);

    api.stop();
}

#[tokio::test]
async fn persistent_outage_fails_item_and_run_continues() {
    let mut fixture = Fixture::new(&["m1", "m2"]);
    // Three attempts for m1, then m2 succeeds.
    fixture.detail_failures = 3;
    let api = spawn_api(fixture);
    let dir = tempfile::tempdir().unwrap();

    let (summary, ingestor) = run_once(&api.base_url, &dir.path().join("manga.db"), 100).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(db::get_content_count(ingestor.writer().store().conn()).unwrap(), 1);

    api.stop();
}

#[tokio::test]
async fn missing_item_is_skipped() {
    let mut fixture = Fixture::new(&["gone", "m1"]);
    fixture.missing = vec!["gone"];
    let api = spawn_api(fixture);
    let dir = tempfile::tempdir().unwrap();

    let (summary, _) = run_once(&api.base_url, &dir.path().join("manga.db"), 100).await;
    assert_eq!(summary.items_seen, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 0);

    api.stop();
}

#[tokio::test]
async fn pagination_follows_total() {
    let api = spawn_api(Fixture::new(&["m1", "m2", "m3"]));
    let dir = tempfile::tempdir().unwrap();

    let (summary, _) = run_once(&api.base_url, &dir.path().join("manga.db"), 2).await;
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.items_seen, 3);
    assert_eq!(summary.created, 3);

    api.stop();
}

#[tokio::test]
async fn chapter_feed_cut_short_keeps_stored_count() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.db");

    let mut fixture = Fixture::new(&["m1"]);
    fixture.chapters_per_manga = 150;
    let api = spawn_api(fixture.clone());
    let (first, _) = run_once(&api.base_url, &db_path, 100).await;
    assert_eq!(first.chapters_written, 150);
    api.stop();

    fixture.chapter_tail_missing = true;
    let api = spawn_api(fixture);
    let (second, ingestor) = run_once(&api.base_url, &db_path, 100).await;
    assert_eq!(second.existing, 1);
    assert_eq!(second.chapters_written, 0);

    let conn = ingestor.writer().store().conn();
    let id = db::find_content_id(conn, &title_url("m1")).unwrap().unwrap();
    assert_eq!(db::get_content_by_id(conn, &id).unwrap().unwrap().total_chapters, 150);
    assert_eq!(db::get_chapter_count_for(conn, &id).unwrap(), 150);

    api.stop();
}
