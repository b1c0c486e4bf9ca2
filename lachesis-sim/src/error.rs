//! Simulator error types

use lachesis_consensus::ConsensusError;
use lachesis_core::CoreError;
use thiserror::Error;

/// Simulator error type
#[derive(Error, Debug)]
pub enum SimError {
    /// An instance or the reference engine rejected an event
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    /// The event log could not be loaded
    #[error("Event log error: {0}")]
    Core(#[from] CoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Report serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for simulator operations
pub type SimResult<T> = Result<T, SimError>;
