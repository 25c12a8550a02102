//! Engine error taxonomy. Every failure a caller can see is one of these.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Malformed, empty or duplicate step list; malformed ingestion payload.
    #[error("{0}")]
    Validation(String),

    /// The suggestion model cannot be trained on the current data.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// No numeric or boolean properties were found in the event log.
    #[error("no usable numeric or boolean properties in the event log")]
    NoFeatures,

    /// Event store could not be read or written.
    #[error("event store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller stopped waiting; the computation itself keeps running.
    #[error("query timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable name, used as the `error` field of HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::InsufficientData(_) => "insufficient_data",
            EngineError::NoFeatures => "no_features",
            EngineError::StoreUnavailable(_) => "store_unavailable",
            EngineError::Timeout(_) => "timeout",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Only store outages are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_errors_are_retryable() {
        assert!(EngineError::StoreUnavailable("locked".into()).is_retryable());
        assert!(!EngineError::Validation("bad".into()).is_retryable());
        assert!(!EngineError::NoFeatures.is_retryable());
        assert!(!EngineError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn timeout_message_uses_millis() {
        let e = EngineError::Timeout(Duration::from_millis(1500));
        assert_eq!(e.to_string(), "query timed out after 1500ms");
    }
}
