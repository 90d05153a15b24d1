//! Retry, backoff, pacing and cancellation around adapter calls.
//!
//! Backoff and pacing are separate concerns: backoff only happens between
//! failed attempts of one operation, pacing happens after successful work so
//! upstreams are not hammered. Every sleep observes the run's
//! [`CancellationToken`].

use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, FetchConfig, PacingConfig};
use crate::error::{IngestError, Result};
use crate::metrics::MetricsTracker;
use crate::sources::SourceAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_retries: usize,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Linear backoff: `base_delay * attempt` plus up to `jitter`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay * attempt as u32 + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            max_retries: cfg.max_retries.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            jitter: Duration::from_millis(cfg.jitter_ms),
        }
    }
}

pub struct Fetcher {
    policy: RetryPolicy,
    pacing: PacingConfig,
    cancel: CancellationToken,
    snapshot_dir: PathBuf,
    metrics: MetricsTracker,
}

impl Fetcher {
    pub fn new(policy: RetryPolicy, pacing: PacingConfig, cancel: CancellationToken) -> Self {
        Self {
            policy,
            pacing,
            cancel,
            snapshot_dir: PathBuf::from("snapshots"),
            metrics: MetricsTracker::new(),
        }
    }

    pub fn from_config(cfg: &Config, cancel: CancellationToken) -> Self {
        Self::new(RetryPolicy::from(&cfg.fetch), cfg.pacing.clone(), cancel)
            .with_snapshot_dir(&cfg.snapshot_dir)
    }

    pub fn with_snapshot_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.snapshot_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    /// `Err(Cancelled)` once the run has been cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `call` up to `max_retries` times.
    ///
    /// Retryable errors back off and try again; the last one comes back
    /// wrapped in `RetriesExhausted`. Anything else is returned as is.
    pub async fn fetch<T, F, Fut>(&self, adapter: &dyn SourceAdapter, operation: &str, item: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let source = adapter.name();
        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            self.check_cancelled()?;
            attempt += 1;

            let start = Instant::now();
            let err = match call().await {
                Ok(value) => {
                    self.metrics.record_success(source, operation, start.elapsed());
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                self.metrics.record_failure(source, operation, &err);
                return Err(err);
            }

            if attempt >= attempts {
                log::error!(
                    "source={} op={} item={} attempt={}/{} giving up: {}",
                    source, operation, item, attempt, attempts, err
                );
                self.write_snapshot(adapter, operation).await;
                let exhausted = IngestError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                };
                self.metrics.record_failure(source, operation, &exhausted);
                return Err(exhausted);
            }

            let delay = self.policy.backoff(attempt);
            log::warn!(
                "source={} op={} item={} attempt={}/{} retrying in {}ms: {}",
                source, operation, item, attempt, attempts, delay.as_millis(), err
            );
            self.metrics.record_retry(source, operation, &err);
            self.sleep(delay).await?;
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub async fn pace_request(&self) -> Result<()> {
        self.sleep(self.pacing.request_delay()).await
    }

    pub async fn pace_item(&self) -> Result<()> {
        self.sleep(self.pacing.item_delay()).await
    }

    pub async fn pace_page(&self) -> Result<()> {
        self.sleep(self.pacing.page_delay()).await
    }

    async fn write_snapshot(&self, adapter: &dyn SourceAdapter, operation: &str) -> Option<PathBuf> {
        let png = adapter.capture_snapshot().await?;
        let path = snapshot_path(&self.snapshot_dir, adapter.name(), operation);

        let written = std::fs::create_dir_all(&self.snapshot_dir).and_then(|_| std::fs::write(&path, png));
        match written {
            Ok(()) => {
                log::info!("Saved page snapshot to {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Could not save snapshot {}: {}", path.display(), e);
                None
            }
        }
    }
}

pub fn snapshot_path(dir: &Path, source: &str, operation: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}.png",
        source,
        operation,
        Utc::now().format("%Y%m%d_%H%M%S")
    ))
}
