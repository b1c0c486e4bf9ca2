//! Consensus error types
//!
//! Only contract violations are errors. Equivocation, missing ancestors and
//! liveness stalls are protocol conditions reported through `EngineUpdate`,
//! notifications and stats.

use lachesis_core::{CoreError, EventId};
use thiserror::Error;

/// Consensus error type
#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    /// Structurally invalid event record
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A parent the engine has never seen
    #[error("Event {event} references unknown parent {parent}")]
    UnknownParent { event: EventId, parent: EventId },

    /// Invalid validator set
    #[error("Invalid validator: {0}")]
    InvalidValidator(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<CoreError> for ConsensusError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedEvent { .. } | CoreError::DuplicateEvent(_) => {
                ConsensusError::MalformedEvent(err.to_string())
            }
            other => ConsensusError::Serialization(other.to_string()),
        }
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
