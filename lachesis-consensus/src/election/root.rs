//! Root election and the forkless-cause relation

use crate::store::{Event, EventStore};
use crate::validators::{ValidatorLedger, WeightCounter};
use lachesis_core::{EventId, Frame, ValidatorId, Weight};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Weight of the validators through which `a` observes `b`
pub fn forkless_cause_weight(a: &Event, b: &Event, ledger: &ValidatorLedger) -> Weight {
    a.highest_observed()
        .iter()
        .filter(|(validator, highest)| {
            b.lowest_observing()
                .seq(validator)
                .is_some_and(|lowest| lowest <= highest.seq)
        })
        .map(|(validator, _)| ledger.weight(validator))
        .sum()
}

/// `a` is causally downstream of a quorum of validators which all observe `b`
pub fn forkless_cause(a: &Event, b: &Event, ledger: &mut ValidatorLedger) -> bool {
    let quorum = ledger.quorum(b.frame().unwrap_or(1));
    forkless_cause_weight(a, b, ledger) >= quorum
}

/// Per-frame root sets; at most one root per validator per frame
#[derive(Debug, Clone, Default)]
pub struct RootSets {
    frames: BTreeMap<Frame, BTreeMap<ValidatorId, EventId>>,
}

impl RootSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root. Returns false if the validator already has a root in that frame.
    pub fn insert(&mut self, frame: Frame, validator: &ValidatorId, root: &EventId) -> bool {
        let roots = self.frames.entry(frame).or_default();
        if roots.contains_key(validator) {
            return false;
        }
        roots.insert(validator.clone(), root.clone());
        true
    }

    /// Roots of a frame keyed by creator
    pub fn get(&self, frame: Frame) -> Option<&BTreeMap<ValidatorId, EventId>> {
        self.frames.get(&frame)
    }

    /// Root a validator contributed to a frame
    pub fn root_of(&self, frame: Frame, validator: &ValidatorId) -> Option<&EventId> {
        self.frames.get(&frame).and_then(|roots| roots.get(validator))
    }

    /// Root events of a frame, cloned in creator order
    pub fn roots(&self, frame: Frame) -> Vec<(ValidatorId, EventId)> {
        self.frames
            .get(&frame)
            .map(|roots| {
                roots
                    .iter()
                    .map(|(v, r)| (v.clone(), r.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn events(&self, frame: Frame) -> BTreeSet<EventId> {
        self.frames
            .get(&frame)
            .map(|roots| roots.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn validators(&self, frame: Frame) -> BTreeSet<ValidatorId> {
        self.frames
            .get(&frame)
            .map(|roots| roots.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Frames that have at least one root
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.frames.keys().copied()
    }

    /// Remove every root of a validator, returning what was removed
    pub fn excise(&mut self, validator: &ValidatorId) -> Vec<(Frame, EventId)> {
        let mut removed = Vec::new();
        for (frame, roots) in self.frames.iter_mut() {
            if let Some(root) = roots.remove(validator) {
                removed.push((*frame, root));
            }
        }
        removed
    }
}

/// Outcome of root election for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootDecision {
    pub frame: Frame,
    pub is_root: bool,
}

/// Decide the frame of a stored event and whether it roots that frame
///
/// The event's lowest-observing vector must already have been propagated.
pub fn elect_root(
    store: &EventStore,
    ledger: &mut ValidatorLedger,
    roots: &RootSets,
    id: &EventId,
) -> Option<RootDecision> {
    let event = store.get(id)?;
    let creator = event.creator();
    let activation = ledger.activation_frame(creator).unwrap_or(1);
    let cheater = ledger.is_cheater(creator);

    let parent = store
        .self_parent(event)
        .or_else(|| store.previous_of(event));

    let parent_frame = match parent {
        Some(parent) if !event.is_first() => parent.frame().unwrap_or(activation),
        _ => {
            let is_root = !cheater && roots.root_of(activation, creator).is_none();
            return Some(RootDecision {
                frame: activation,
                is_root,
            });
        }
    };

    if cheater {
        return Some(RootDecision {
            frame: parent_frame,
            is_root: false,
        });
    }

    let mut counter = WeightCounter::new(ledger.quorum(parent_frame));
    if let Some(candidates) = roots.get(parent_frame) {
        for (validator, root_id) in candidates {
            let Some(root) = store.get(root_id) else {
                continue;
            };
            if forkless_cause(event, root, ledger) {
                counter.count(validator, ledger.weight(validator));
            }
        }
    }

    if !counter.has_quorum() {
        return Some(RootDecision {
            frame: parent_frame,
            is_root: false,
        });
    }

    let frame = parent_frame + 1;
    let is_root = roots.root_of(frame, creator).is_none();
    debug!(
        "Event {} observes {} of frame {} root weight",
        id,
        counter.sum(),
        parent_frame
    );
    Some(RootDecision { frame, is_root })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_sets_one_root_per_validator() {
        let mut roots = RootSets::new();
        let a = ValidatorId::from("A");
        assert!(roots.insert(1, &a, &EventId::from("a1")));
        assert!(!roots.insert(1, &a, &EventId::from("a1-bis")));
        assert!(roots.insert(2, &a, &EventId::from("a3")));

        assert_eq!(roots.root_of(1, &a), Some(&EventId::from("a1")));
        assert_eq!(roots.events(1).len(), 1);
        assert_eq!(roots.frames().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_excise_removes_every_frame() {
        let mut roots = RootSets::new();
        let a = ValidatorId::from("A");
        let b = ValidatorId::from("B");
        roots.insert(1, &a, &EventId::from("a1"));
        roots.insert(1, &b, &EventId::from("b1"));
        roots.insert(2, &a, &EventId::from("a3"));

        let removed = roots.excise(&a);
        assert_eq!(removed.len(), 2);
        assert_eq!(roots.validators(1).into_iter().collect::<Vec<_>>(), vec![b]);
        assert!(roots.events(2).is_empty());
    }
}
