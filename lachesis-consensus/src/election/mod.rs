//! Root and Atropos election

pub mod atropos;
pub mod root;

pub use atropos::{AtroposDecision, Election, ElectionVote, VoteTable};
pub use root::{elect_root, forkless_cause, forkless_cause_weight, RootDecision, RootSets};
