//! Error types for the core crate

use thiserror::Error;

/// Core input errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed event {id}: {reason}")]
    MalformedEvent { id: String, reason: String },

    #[error("Duplicate event id in log: {0}")]
    DuplicateEvent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::MalformedEvent {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
