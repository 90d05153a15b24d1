use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use manga_ingest::config::Config;
use manga_ingest::db::SqliteStore;
use manga_ingest::error::{IngestError, Result};
use manga_ingest::fetcher::Fetcher;
use manga_ingest::models::RunSummary;
use manga_ingest::orchestrator::Ingestor;
use manga_ingest::session::FetchSession;
use manga_ingest::sources::madara::MadaraAdapter;
use manga_ingest::sources::mangadex::MangaDexAdapter;
use manga_ingest::sources::SourceAdapter;
use manga_ingest::writer::Writer;

#[derive(Parser, Debug)]
#[command(name = "manga_ingest", about = "Ingest manga catalogs and chapter lists into SQLite")]
struct Cli {
    /// Path to the TOML config file (default: ./ingest.toml if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long, value_name = "FILE")]
    db: Option<String>,

    /// Stop after this many list pages
    #[arg(long)]
    max_pages: Option<u32>,

    /// Write per-operation metrics as JSON to this file when the run ends
    #[arg(long, value_name = "FILE")]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest from the MangaDex API
    Mangadex,
    /// Ingest from a configured Madara/MangaReader site through the browser
    Site {
        /// Site name from the `[[sites]]` config entries
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        eprintln!("Failed to initialise logging from log4rs.yml: {}", e);
    }

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(summary) => {
            log::info!(
                "Done: {} new, {} existing, {} skipped, {} failed",
                summary.created,
                summary.existing,
                summary.skipped,
                summary.failed
            );
            0
        }
        Err(IngestError::Cancelled) => {
            log::warn!("Run cancelled");
            130
        }
        Err(e) => {
            log::error!("Run aborted: {}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load()?,
    };
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }

    let site = match &cli.command {
        Command::Mangadex => None,
        Command::Site { name } => Some(
            cfg.site(name)
                .cloned()
                .ok_or_else(|| IngestError::Config(format!("no site named {} in config", name)))?,
        ),
    };
    let site = site.map(|mut s| {
        if cli.max_pages.is_some() {
            s.max_pages = cli.max_pages;
        }
        s
    });
    if cli.max_pages.is_some() {
        cfg.mangadex.max_pages = cli.max_pages;
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping at the next safe point");
            interrupt.cancel();
        }
    });

    let session = FetchSession::acquire(&cfg, site.is_some()).await?;
    let result = ingest(&cfg, &session, site, cancel, cli.metrics_out.as_deref()).await;
    session.finish(result)
}

async fn ingest(
    cfg: &Config,
    session: &FetchSession,
    site: Option<manga_ingest::config::SiteConfig>,
    cancel: CancellationToken,
    metrics_out: Option<&Path>,
) -> Result<RunSummary> {
    let adapter: Box<dyn SourceAdapter> = match site {
        Some(site) => {
            let page = session.page().ok_or_else(|| IngestError::ResourceAcquisition {
                resource: "browser".to_string(),
                reason: "session has no browser".to_string(),
            })?;
            Box::new(MadaraAdapter::new(page, site, &cfg.browser)?)
        }
        None => Box::new(MangaDexAdapter::new(session.http(), cfg.mangadex.clone())),
    };

    let store = SqliteStore::open(&cfg.db_path)?;
    let writer = Writer::new(store, cfg.store.chapter_batch_size);
    let fetcher = Fetcher::from_config(cfg, cancel);

    let mut ingestor = Ingestor::new(adapter, fetcher, writer);
    let result = ingestor.run().await;

    if let Some(path) = metrics_out {
        match ingestor.fetcher().metrics().write_json(path) {
            Ok(()) => log::info!("Metrics written to {}", path.display()),
            Err(e) => log::warn!("Failed to write metrics: {}", e),
        }
    }
    result
}
