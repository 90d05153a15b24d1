//! Error taxonomy for the ingestion pipeline.
//!
//! Every per-item or per-batch failure is returned as an [`IngestError`] so
//! the orchestrator can decide between skipping the item and aborting the run.
//! Only [`IngestError::ResourceAcquisition`] and [`IngestError::Cancelled`]
//! end a run.

use crate::browser::BrowserError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("challenge not cleared within {0}s")]
    ChallengeUnresolved(u64),

    #[error("not found upstream: {0}")]
    NotFound(String),

    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("malformed record {item}: {reason}")]
    MalformedRecord { item: String, reason: String },

    #[error("natural key already stored: {0}")]
    StorageConflict(String),

    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("could not acquire {resource}: {reason}")]
    ResourceAcquisition { resource: String, reason: String },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        last: Box<IngestError>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    pub fn missing_title(item: impl Into<String>) -> Self {
        IngestError::MalformedRecord {
            item: item.into(),
            reason: "title mapping is empty".to_string(),
        }
    }

    /// Errors worth another attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::TransientNetwork(_) | IngestError::ChallengeUnresolved(_)
        )
    }

    /// Errors that stop the whole run instead of skipping one item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::ResourceAcquisition { .. } | IngestError::Cancelled
        )
    }

    /// "Nothing here" outcomes that are skipped without noise.
    pub fn is_absent(&self) -> bool {
        match self {
            IngestError::NotFound(_) | IngestError::EmptyResult(_) => true,
            IngestError::RetriesExhausted { last, .. } => last.is_absent(),
            _ => false,
        }
    }

    /// Short stable name used in log lines and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::TransientNetwork(_) => "transient_network",
            IngestError::ChallengeUnresolved(_) => "challenge_unresolved",
            IngestError::NotFound(_) => "not_found",
            IngestError::EmptyResult(_) => "empty_result",
            IngestError::MalformedRecord { .. } => "malformed_record",
            IngestError::StorageConflict(_) => "storage_conflict",
            IngestError::StorageWrite(_) => "storage_write",
            IngestError::ResourceAcquisition { .. } => "resource_acquisition",
            IngestError::RetriesExhausted { .. } => "retries_exhausted",
            IngestError::Cancelled => "cancelled",
            IngestError::Config(_) => "config",
        }
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                IngestError::StorageConflict(e.to_string())
            }
            other => IngestError::StorageWrite(other.to_string()),
        }
    }
}

impl From<BrowserError> for IngestError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::InitializationError(reason)
            | BrowserError::ConfigurationError(reason)
            | BrowserError::TabCreationError(reason) => IngestError::ResourceAcquisition {
                resource: "browser".to_string(),
                reason,
            },
            other => IngestError::TransientNetwork(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(IngestError::TransientNetwork("reset".into()).is_retryable());
        assert!(IngestError::ChallengeUnresolved(60).is_retryable());
        assert!(!IngestError::NotFound("x".into()).is_retryable());
        assert!(!IngestError::missing_title("abc").is_retryable());
    }

    #[test]
    fn test_only_acquisition_and_cancel_are_fatal() {
        let acquisition = IngestError::ResourceAcquisition {
            resource: "browser".into(),
            reason: "no chrome".into(),
        };
        assert!(acquisition.is_fatal());
        assert!(IngestError::Cancelled.is_fatal());
        assert!(!IngestError::StorageWrite("disk full".into()).is_fatal());
        assert!(!IngestError::ChallengeUnresolved(60).is_fatal());
    }

    #[test]
    fn test_browser_init_maps_to_acquisition() {
        let err: IngestError = BrowserError::InitializationError("spawn failed".into()).into();
        assert!(err.is_fatal());
        let err: IngestError = BrowserError::NavigationError("reset".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_exhausted_not_found_is_absent() {
        let err = IngestError::RetriesExhausted {
            operation: "detail".into(),
            attempts: 3,
            last: Box::new(IngestError::NotFound("abc".into())),
        };
        assert!(err.is_absent());
        assert_eq!(err.kind(), "retries_exhausted");
    }
}
