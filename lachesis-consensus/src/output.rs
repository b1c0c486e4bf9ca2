//! Result shape shared by the reference engine and simulated instances

use crate::election::VoteTable;
use crate::{ConsensusError, ConsensusResult};
use lachesis_core::{EventId, Frame, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Snapshot of an engine's consensus state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusOutput {
    /// Highest frame opened
    pub frame: Frame,
    /// Block counter, starting at 1
    pub block: u64,
    /// Frame currently under election
    pub frame_to_decide: Frame,
    /// Validators that rooted each frame
    pub root_set_validators: BTreeMap<Frame, BTreeSet<ValidatorId>>,
    /// Root events of each frame
    pub root_set_events: BTreeMap<Frame, BTreeSet<EventId>>,
    /// Root of each validator per frame
    pub roots: BTreeMap<Frame, BTreeMap<ValidatorId, EventId>>,
    /// Atropos of each decided frame
    pub atropos_roots: BTreeMap<Frame, EventId>,
    /// Vote tables by election frame
    pub election_votes: BTreeMap<Frame, VoteTable>,
    /// Validators currently holding stake, with their activation frame
    pub active_validators: BTreeMap<ValidatorId, Frame>,
    /// Confirmed cheaters
    pub cheaters: BTreeSet<ValidatorId>,
    /// Every stored event
    pub events: BTreeSet<EventId>,
    /// Memoized quorum per frame
    pub quorums: BTreeMap<Frame, Weight>,
}

impl ConsensusOutput {
    /// Root events of a frame
    pub fn root_set(&self, frame: Frame) -> BTreeSet<EventId> {
        self.root_set_events.get(&frame).cloned().unwrap_or_default()
    }

    /// Root a validator contributed to a frame
    pub fn root_of(&self, frame: Frame, validator: &ValidatorId) -> Option<&EventId> {
        self.roots.get(&frame).and_then(|roots| roots.get(validator))
    }

    pub fn atropos(&self, frame: Frame) -> Option<&EventId> {
        self.atropos_roots.get(&frame)
    }

    /// Number of decided frames
    pub fn decided_frames(&self) -> usize {
        self.atropos_roots.len()
    }

    pub fn to_json(&self) -> ConsensusResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save the snapshot as JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConsensusResult<()> {
        fs::write(path.as_ref(), self.to_json()?).map_err(|e| {
            ConsensusError::Serialization(format!("Failed to write output file: {}", e))
        })
    }

    /// Load a snapshot from JSON
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConsensusResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ConsensusError::Serialization(format!("Failed to read output file: {}", e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::ElectionVote;
    use tempfile::tempdir;

    #[test]
    fn test_output_file_round_trip() {
        let mut output = ConsensusOutput {
            frame: 2,
            block: 2,
            frame_to_decide: 2,
            ..Default::default()
        };
        output
            .root_set_events
            .entry(1)
            .or_default()
            .insert(EventId::from("a1"));
        output.atropos_roots.insert(1, EventId::from("a1"));
        output.quorums.insert(1, 3);
        output
            .election_votes
            .entry(1)
            .or_default()
            .entry(EventId::from("a3"))
            .or_default()
            .insert(
                ValidatorId::from("A"),
                ElectionVote {
                    decided: false,
                    yes: true,
                    observed_root: Some(EventId::from("a1")),
                },
            );

        let dir = tempdir().unwrap();
        let path = dir.path().join("output.json");
        output.save_to_file(&path).unwrap();

        let loaded = ConsensusOutput::load_from_file(&path).unwrap();
        assert_eq!(loaded, output);
        assert_eq!(loaded.atropos(1), Some(&EventId::from("a1")));
        assert_eq!(loaded.decided_frames(), 1);
        assert!(loaded.root_set(2).is_empty());
    }
}
