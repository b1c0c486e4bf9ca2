//! Consensus engine traits and types

use crate::election::AtroposDecision;
use crate::fork::ForkEvidence;
use crate::output::ConsensusOutput;
use crate::ConsensusResult;
use lachesis_core::{EventId, EventRecord, Frame, ValidatorId};
use serde::{Deserialize, Serialize};

/// An event taken through the full pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub id: EventId,
    pub creator: ValidatorId,
    pub frame: Frame,
    pub is_root: bool,
}

/// Everything that happened while ingesting one record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineUpdate {
    /// Events admitted to the store, in processing order
    pub processed: Vec<ProcessedEvent>,
    /// Events held back until their creator is activated
    pub buffered: Vec<EventId>,
    /// Late joiners spliced into the active set
    pub activated: Vec<ValidatorId>,
    /// Equivocations detected
    pub forks: Vec<ForkEvidence>,
    /// Frames finalized
    pub decisions: Vec<AtroposDecision>,
    /// The record was already known
    pub duplicate: bool,
}

impl EngineUpdate {
    /// Whether the record changed nothing
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
            && self.buffered.is_empty()
            && self.activated.is_empty()
            && self.forks.is_empty()
            && self.decisions.is_empty()
    }

    /// Append another update's contents
    pub fn merge(&mut self, other: EngineUpdate) {
        self.processed.extend(other.processed);
        self.buffered.extend(other.buffered);
        self.activated.extend(other.activated);
        self.forks.extend(other.forks);
        self.decisions.extend(other.decisions);
        self.duplicate |= other.duplicate;
    }

    /// Whether the given event was admitted
    pub fn admitted(&self, id: &EventId) -> bool {
        self.processed.iter().any(|p| &p.id == id)
    }
}

/// Main consensus engine trait
pub trait Engine: Send {
    /// Feed one event record through the pipeline
    fn ingest(&mut self, record: EventRecord) -> ConsensusResult<EngineUpdate>;

    /// Snapshot of the consensus state
    fn output(&self) -> ConsensusOutput;

    /// Highest frame opened so far
    fn frame(&self) -> Frame;

    /// Current block counter
    fn block(&self) -> u64;

    /// Feed a sequence of records, stopping at the first hard error
    fn ingest_all<I>(&mut self, records: I) -> ConsensusResult<EngineUpdate>
    where
        I: IntoIterator<Item = EventRecord>,
        Self: Sized,
    {
        let mut update = EngineUpdate::default();
        for record in records {
            update.merge(self.ingest(record)?);
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_merge() {
        let mut first = EngineUpdate::default();
        assert!(first.is_empty());

        first.processed.push(ProcessedEvent {
            id: EventId::from("a1"),
            creator: ValidatorId::from("A"),
            frame: 1,
            is_root: true,
        });

        let second = EngineUpdate {
            buffered: vec![EventId::from("d1")],
            duplicate: true,
            ..Default::default()
        };
        first.merge(second);

        assert!(!first.is_empty());
        assert!(first.duplicate);
        assert!(first.admitted(&EventId::from("a1")));
        assert!(!first.admitted(&EventId::from("d1")));
        assert_eq!(first.buffered.len(), 1);
    }
}
