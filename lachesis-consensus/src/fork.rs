//! Equivocation detection

use lachesis_core::{EventId, Seq, Timestamp, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Evidence that a validator reused or decreased a sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkEvidence {
    /// Validator who equivocated
    pub validator: ValidatorId,
    /// The offending event
    pub event: EventId,
    /// Sequence number carried by the offending event
    pub seq: Seq,
    /// Highest sequence number previously issued by the validator
    pub highest_seen: Seq,
    /// Round in which the fork was detected
    pub detected_at: Timestamp,
}

/// Per-validator sequence monitor
#[derive(Debug, Default, Clone)]
pub struct ForkDetector {
    /// Highest sequence number issued, by validator
    highest_seq: HashMap<ValidatorId, Seq>,
}

impl ForkDetector {
    /// Create a new fork detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming event's sequence number and check for equivocation
    pub fn observe(
        &mut self,
        validator: &ValidatorId,
        event: &EventId,
        seq: Seq,
        timestamp: Timestamp,
    ) -> Option<ForkEvidence> {
        match self.highest_seq.get_mut(validator) {
            Some(highest) if seq <= *highest => Some(ForkEvidence {
                validator: validator.clone(),
                event: event.clone(),
                seq,
                highest_seen: *highest,
                detected_at: timestamp,
            }),
            Some(highest) => {
                *highest = seq;
                None
            }
            None => {
                self.highest_seq.insert(validator.clone(), seq);
                None
            }
        }
    }

    /// Highest sequence number seen for a validator
    pub fn highest_seq(&self, validator: &ValidatorId) -> Option<Seq> {
        self.highest_seq.get(validator).copied()
    }
}
