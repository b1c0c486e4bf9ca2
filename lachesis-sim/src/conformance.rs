//! Safety check of partial-view instances against the full-information run
//!
//! Partial information may lag the reference but never contradict it.

use lachesis_consensus::ConsensusOutput;
use lachesis_core::{EventId, Frame, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// One way an instance disagrees with the reference
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    #[error("{counter} is {instance}, ahead of the reference at {reference}")]
    CounterAhead {
        counter: String,
        instance: u64,
        reference: u64,
    },

    #[error("Event {0} is unknown to the reference")]
    UnknownEvent(EventId),

    #[error("Root {event} of frame {frame} is not a reference root")]
    UnknownRoot { frame: Frame, event: EventId },

    #[error("Validator {validator} roots frame {frame} only in the instance")]
    UnknownRootValidator { frame: Frame, validator: ValidatorId },

    #[error("Validator {0} is a cheater only in the instance")]
    UnknownCheater(ValidatorId),

    #[error("Quorum of frame {frame} is {instance}, the reference has {reference}")]
    QuorumMismatch {
        frame: Frame,
        instance: Weight,
        reference: Weight,
    },

    #[error("Atropos of frame {frame} is {instance}, the reference decided {reference}")]
    AtroposMismatch {
        frame: Frame,
        instance: EventId,
        reference: EventId,
    },
}

/// Violations found per instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformanceReport {
    pub violations: BTreeMap<ValidatorId, Vec<Violation>>,
}

impl ConformanceReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one instance's check
    pub fn record(&mut self, validator: ValidatorId, violations: Vec<Violation>) {
        if !violations.is_empty() {
            self.violations.insert(validator, violations);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations_of(&self, validator: &ValidatorId) -> &[Violation] {
        self.violations
            .get(validator)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of violations
    pub fn len(&self) -> usize {
        self.violations.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.is_clean()
    }
}

/// Compare one instance's result with the reference result
pub fn check_conformance(
    reference: &ConsensusOutput,
    instance_id: &ValidatorId,
    instance: &ConsensusOutput,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (counter, ours, theirs) in [
        ("frame", instance.frame, reference.frame),
        ("block", instance.block, reference.block),
        (
            "frame_to_decide",
            instance.frame_to_decide,
            reference.frame_to_decide,
        ),
    ] {
        if ours > theirs {
            violations.push(Violation::CounterAhead {
                counter: counter.to_string(),
                instance: ours,
                reference: theirs,
            });
        }
    }

    violations.extend(
        instance
            .events
            .difference(&reference.events)
            .cloned()
            .map(Violation::UnknownEvent),
    );

    // A partial view may not have seen an equivocation yet, so roots of the
    // reference's cheaters are left out.
    for (frame, roots) in &instance.roots {
        for (validator, event) in roots {
            if reference.cheaters.contains(validator) {
                continue;
            }
            if reference.root_of(*frame, validator) != Some(event) {
                violations.push(Violation::UnknownRoot {
                    frame: *frame,
                    event: event.clone(),
                });
            }
        }
    }
    for (frame, validators) in &instance.root_set_validators {
        let known = reference.root_set_validators.get(frame);
        for validator in validators {
            if reference.cheaters.contains(validator)
                || known.is_some_and(|known| known.contains(validator))
            {
                continue;
            }
            violations.push(Violation::UnknownRootValidator {
                frame: *frame,
                validator: validator.clone(),
            });
        }
    }

    violations.extend(
        instance
            .cheaters
            .difference(&reference.cheaters)
            .cloned()
            .map(Violation::UnknownCheater),
    );

    // Quorums only agree once both sides weigh the same validators from the same frames.
    if instance.cheaters == reference.cheaters
        && instance.active_validators == reference.active_validators
    {
        for (frame, quorum) in &instance.quorums {
            if let Some(expected) = reference.quorums.get(frame) {
                if quorum != expected {
                    violations.push(Violation::QuorumMismatch {
                        frame: *frame,
                        instance: *quorum,
                        reference: *expected,
                    });
                }
            }
        }
    }

    for (frame, atropos) in &instance.atropos_roots {
        if let Some(expected) = reference.atropos(*frame) {
            if atropos != expected {
                violations.push(Violation::AtroposMismatch {
                    frame: *frame,
                    instance: atropos.clone(),
                    reference: expected.clone(),
                });
            }
        }
    }

    for violation in &violations {
        warn!("Instance {} violates conformance: {}", instance_id, violation);
    }
    violations
}
