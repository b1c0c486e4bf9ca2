//! Lachesis DAG consensus
//!
//! This crate derives frames, roots and Atropos checkpoints from a DAG of
//! validator events, suppressing equivocators and admitting late joiners.

pub mod config;
pub mod election;
pub mod engine;
pub mod error;
pub mod fork;
pub mod output;
pub mod store;
pub mod traits;
pub mod validators;
pub mod vector;

pub use config::EngineConfig;
pub use election::{AtroposDecision, Election, ElectionVote, RootSets, VoteTable};
pub use engine::{ConsensusEvent, EngineStats, Lachesis};
pub use error::{ConsensusError, ConsensusResult};
pub use fork::{ForkDetector, ForkEvidence};
pub use output::ConsensusOutput;
pub use store::{Event, EventStore};
pub use traits::{Engine, EngineUpdate, ProcessedEvent};
pub use validators::{quorum_of, ValidatorLedger, ValidatorSet, ValidatorState, WeightCounter};
pub use vector::{Observation, ObservationVector};
