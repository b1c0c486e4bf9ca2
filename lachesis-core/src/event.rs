//! Parsed event records

use crate::{CoreError, CoreResult, EventId, Seq, Timestamp, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An event as delivered by the parsing layer
///
/// This is the only shape the engines consume. Derived consensus state
/// (observation vectors, frame, root and Atropos flags) lives in the
/// consensus crate's event store, never here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRecord {
    /// Globally unique event id
    pub id: EventId,
    /// Validator which created the event
    pub creator: ValidatorId,
    /// Arrival round
    pub timestamp: Timestamp,
    /// Sequence number within the creator's chain
    pub seq: Seq,
    /// Weight declared by the creator
    pub weight: Weight,
    /// Causal parents, possibly from other validators
    #[serde(default)]
    pub parents: Vec<EventId>,
}

impl EventRecord {
    /// Create a new event record
    pub fn new(
        id: impl Into<EventId>,
        creator: impl Into<ValidatorId>,
        timestamp: Timestamp,
        seq: Seq,
        weight: Weight,
    ) -> Self {
        Self {
            id: id.into(),
            creator: creator.into(),
            timestamp,
            seq,
            weight,
            parents: Vec::new(),
        }
    }

    /// Set the parents
    pub fn with_parents<I, P>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<EventId>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this is the first event of its creator's chain
    pub fn is_first(&self) -> bool {
        self.seq == 1
    }

    /// Check the structural contract the engines rely on
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.is_empty() {
            return Err(CoreError::malformed("<empty>", "event id is empty"));
        }
        if self.creator.as_str().is_empty() {
            return Err(CoreError::malformed(self.id.as_str(), "creator is empty"));
        }
        if self.seq == 0 {
            return Err(CoreError::malformed(
                self.id.as_str(),
                "sequence numbers start at 1",
            ));
        }

        let mut seen = HashSet::with_capacity(self.parents.len());
        for parent in &self.parents {
            if parent == &self.id {
                return Err(CoreError::malformed(
                    self.id.as_str(),
                    "event lists itself as a parent",
                ));
            }
            if !seen.insert(parent) {
                return Err(CoreError::malformed(
                    self.id.as_str(),
                    format!("duplicate parent {}", parent),
                ));
            }
        }

        Ok(())
    }
}
