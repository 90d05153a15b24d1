/// Per-operation counters for an ingestion run
///
/// Every fetcher call records its outcome here under `<source>:<operation>`;
/// the orchestrator logs a summary when the run ends.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::error::IngestError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub source_name: String,
    pub operation: String,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub total_response_time_ms: u64,
    pub retry_count: u64,
    pub unresolved_challenges: u64,
    pub transient_errors: u64,
    pub not_found: u64,
}

impl OperationMetrics {
    pub fn new(source_name: &str, operation: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            operation: operation.to_string(),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
            retry_count: 0,
            unresolved_challenges: 0,
            transient_errors: 0,
            not_found: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            (self.successful_calls as f64 / self.total_calls as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, response_time: Duration) {
        self.total_calls += 1;
        self.successful_calls += 1;
        self.last_success = Some(Utc::now());

        let response_ms = response_time.as_millis() as u64;
        self.total_response_time_ms += response_ms;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_calls as f64;
    }

    pub fn record_failure(&mut self, error: &IngestError) {
        self.total_calls += 1;
        self.failed_calls += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());

        let root = match error {
            IngestError::RetriesExhausted { last, .. } => last.as_ref(),
            other => other,
        };
        match root {
            IngestError::ChallengeUnresolved(_) => self.unresolved_challenges += 1,
            IngestError::TransientNetwork(_) => self.transient_errors += 1,
            e if e.is_absent() => self.not_found += 1,
            _ => {}
        }
    }

    /// One backoff cycle; `error` is what triggered it.
    pub fn record_retry(&mut self, error: &IngestError) {
        self.retry_count += 1;
        if matches!(error, IngestError::ChallengeUnresolved(_)) {
            self.unresolved_challenges += 1;
        }
    }
}

/// Shared across the fetcher and orchestrator of one run
#[derive(Clone, Default)]
pub struct MetricsTracker {
    metrics: Arc<Mutex<BTreeMap<String, OperationMetrics>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<R>(&self, source_name: &str, operation: &str, f: impl FnOnce(&mut OperationMetrics) -> R) -> R {
        let mut metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        let entry = metrics
            .entry(format!("{}:{}", source_name, operation))
            .or_insert_with(|| OperationMetrics::new(source_name, operation));
        f(entry)
    }

    pub fn record_success(&self, source_name: &str, operation: &str, response_time: Duration) {
        self.with_entry(source_name, operation, |m| m.record_success(response_time));
    }

    pub fn record_failure(&self, source_name: &str, operation: &str, error: &IngestError) {
        let rate = self.with_entry(source_name, operation, |m| {
            m.record_failure(error);
            m.success_rate()
        });
        log::debug!(
            "[{}] {} failure ({}) - Success rate: {:.2}%",
            source_name,
            operation,
            error.kind(),
            rate
        );
    }

    pub fn record_retry(&self, source_name: &str, operation: &str, error: &IngestError) {
        let retries = self.with_entry(source_name, operation, |m| {
            m.record_retry(error);
            m.retry_count
        });
        log::debug!("[{}] {} retry - Total retries: {}", source_name, operation, retries);
    }

    pub fn get_metrics(&self, source_name: &str, operation: &str) -> Option<OperationMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        metrics.get(&format!("{}:{}", source_name, operation)).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<OperationMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        metrics.values().cloned().collect()
    }

    pub fn log_summary(&self) {
        let metrics = self.get_all_metrics();
        if metrics.is_empty() {
            return;
        }
        log::info!("=== Operation Summary ===");
        for m in metrics {
            log::info!(
                "[{}] {}: {} calls, {:.2}% ok, {} failed, {} retries, {} challenges, avg {:.0}ms",
                m.source_name,
                m.operation,
                m.total_calls,
                m.success_rate(),
                m.failed_calls,
                m.retry_count,
                m.unresolved_challenges,
                m.average_response_time_ms
            );
            if let Some(last_error) = &m.last_error {
                log::info!("[{}] {} last error: {}", m.source_name, m.operation, last_error);
            }
        }
    }

    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.get_all_metrics()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Write [`export_json`](Self::export_json) to `path`, creating parent dirs.
    pub fn write_json(&self, path: &Path) -> Result<(), IngestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| IngestError::StorageWrite(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, self.export_json())
            .map_err(|e| IngestError::StorageWrite(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = OperationMetrics::new("mangadex", "list_page");
        assert_eq!(metrics.source_name, "mangadex");
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn test_success_rate_calculation() {
        let mut metrics = OperationMetrics::new("mangadex", "fetch_detail");

        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));
        metrics.record_failure(&IngestError::NotFound("gone".into()));

        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.not_found, 1);
        assert_eq!(metrics.average_response_time_ms, 150.0);
        assert!((metrics.success_rate() - 66.66).abs() < 0.1);
    }

    #[test]
    fn test_exhausted_challenge_is_categorized() {
        let mut metrics = OperationMetrics::new("madarascans", "list_page");
        metrics.record_failure(&IngestError::RetriesExhausted {
            operation: "list_page".into(),
            attempts: 3,
            last: Box::new(IngestError::ChallengeUnresolved(60)),
        });
        assert_eq!(metrics.unresolved_challenges, 1);
        assert_eq!(metrics.transient_errors, 0);
    }

    #[test]
    fn test_tracker_keys_by_source_and_operation() {
        let tracker = MetricsTracker::new();

        tracker.record_success("mangadex", "list_page", Duration::from_millis(40));
        tracker.record_retry("mangadex", "fetch_chapters", &IngestError::TransientNetwork("503".into()));
        tracker.record_failure("mangadex", "fetch_chapters", &IngestError::TransientNetwork("503".into()));

        assert_eq!(tracker.get_metrics("mangadex", "list_page").unwrap().success_rate(), 100.0);
        let chapters = tracker.get_metrics("mangadex", "fetch_chapters").unwrap();
        assert_eq!(chapters.retry_count, 1);
        assert_eq!(chapters.transient_errors, 1);
        assert_eq!(tracker.get_all_metrics().len(), 2);
        assert!(tracker.export_json().contains("fetch_chapters"));
    }

    #[test]
    fn test_write_json_creates_report() {
        let tracker = MetricsTracker::new();
        tracker.record_success("madarascans", "fetch_detail", Duration::from_millis(250));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("metrics.json");
        tracker.write_json(&path).unwrap();

        let written: Vec<OperationMetrics> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].operation, "fetch_detail");
        assert_eq!(written[0].successful_calls, 1);
    }
}
