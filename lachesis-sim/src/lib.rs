//! Multi-validator Lachesis simulation
//!
//! Runs one engine per validator, each with a partial view of the DAG that is
//! filled in through a request/defer protocol, and checks every instance
//! against a full-information reference run.

pub mod config;
pub mod conformance;
pub mod error;
pub mod instance;
pub mod message;
pub mod simulator;
pub mod stats;

pub use config::SimConfig;
pub use conformance::{check_conformance, ConformanceReport, Violation};
pub use error::{SimError, SimResult};
pub use instance::{StalledEvent, ValidatorInstance};
pub use message::{EventRequest, EventResponse};
pub use simulator::{SimulationReport, Simulator};
pub use stats::SyncStats;
