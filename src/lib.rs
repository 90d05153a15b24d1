// Library interface for manga_ingest
// The binary and the integration tests both drive the pipeline through here.

pub mod browser;
pub mod challenge;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod session;
pub mod sources;
pub mod wait;
pub mod writer;

pub use config::Config;
pub use error::{IngestError, Result};
pub use orchestrator::Ingestor;
