//! Tracker error types.

use thiserror::Error;

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors that can occur in the telemetry pipeline.
///
/// Tracking calls never return these to the host; they surface only from
/// construction and explicit operations, and are logged everywhere else.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collector rejected batch with status {status}")]
    Rejected { status: u16 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] beacon_storage::StorageError),

    #[error("flush scheduler not running")]
    SchedulerStopped,

    #[error("no Tokio runtime available")]
    NoRuntime,
}

impl TrackerError {
    /// Returns true if the failure is worth retrying on the next flush.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
