//! Core DAG data structures
//!
//! This crate provides the building blocks shared by the consensus engine
//! and the multi-validator simulator:
//! - Basic types (ValidatorId, EventId, Seq, Frame, Weight, Timestamp)
//! - The parsed event record consumed by the engines
//! - The event log input collection

pub mod error;
pub mod event;
pub mod log;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use event::*;
pub use log::*;
pub use types::*;
