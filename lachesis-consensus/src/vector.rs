//! Observation vectors
//!
//! Every event carries two per-validator vectors derived from the DAG:
//! - `highest_observed`: for each validator, the highest event by that
//!   validator in the event's causal past (the event itself included)
//! - `lowest_observing`: for each validator, the earliest event by that
//!   validator whose causal past contains this event (the event itself
//!   included)
//!
//! Entries for confirmed cheaters are never written.

use crate::store::EventStore;
use crate::validators::ValidatorLedger;
use lachesis_core::{EventId, Seq, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// An observed event of one validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub event: EventId,
    pub seq: Seq,
}

impl Observation {
    pub fn new(event: EventId, seq: Seq) -> Self {
        Self { event, seq }
    }
}

/// Fixed-key mapping validator -> observation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationVector(BTreeMap<ValidatorId, Observation>);

impl ObservationVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, validator: &ValidatorId) -> Option<&Observation> {
        self.0.get(validator)
    }

    /// Sequence number recorded for a validator
    pub fn seq(&self, validator: &ValidatorId) -> Option<Seq> {
        self.0.get(validator).map(|o| o.seq)
    }

    pub fn contains(&self, validator: &ValidatorId) -> bool {
        self.0.contains_key(validator)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ValidatorId, &Observation)> {
        self.0.iter()
    }

    /// Keep the higher sequence number; on a tie keep the lower event id
    pub fn raise(&mut self, validator: &ValidatorId, observation: &Observation) {
        match self.0.get_mut(validator) {
            Some(current) => {
                if observation.seq > current.seq
                    || (observation.seq == current.seq && observation.event < current.event)
                {
                    *current = observation.clone();
                }
            }
            None => {
                self.0.insert(validator.clone(), observation.clone());
            }
        }
    }

    /// Record an observation only if the validator has none yet
    pub fn set_if_absent(&mut self, validator: &ValidatorId, observation: Observation) -> bool {
        if self.0.contains_key(validator) {
            return false;
        }
        self.0.insert(validator.clone(), observation);
        true
    }

    /// Entrywise `>=` on sequence numbers over every validator in `other`
    pub fn dominates(&self, other: &ObservationVector) -> bool {
        other
            .0
            .iter()
            .all(|(v, o)| self.seq(v).is_some_and(|s| s >= o.seq))
    }
}

/// Compute `highest_observed` for a new event from its (already stored) parents
pub fn highest_observed(
    store: &EventStore,
    ledger: &ValidatorLedger,
    id: &EventId,
    creator: &ValidatorId,
    seq: Seq,
    parents: &[EventId],
) -> ObservationVector {
    let mut vector = ObservationVector::new();
    if !ledger.is_cheater(creator) {
        vector.raise(creator, &Observation::new(id.clone(), seq));
    }

    for parent in parents.iter().filter_map(|p| store.get(p)) {
        for (validator, observation) in parent.highest_observed().iter() {
            if ledger.is_cheater(validator) {
                continue;
            }
            vector.raise(validator, observation);
        }
    }

    vector
}

/// Push "observed by `id`'s creator no later than `id`" backwards through the ancestry
///
/// Breadth-first over parents; a branch stops at the first ancestor that
/// already holds a record for the creator, and branches of confirmed
/// cheaters are skipped. Returns the number of ancestors updated.
pub fn propagate_lowest_observing(
    store: &mut EventStore,
    ledger: &ValidatorLedger,
    id: &EventId,
) -> usize {
    let (creator, seq, parents) = match store.get(id) {
        Some(event) => (
            event.creator().clone(),
            event.seq(),
            event.parents().to_vec(),
        ),
        None => return 0,
    };
    if ledger.is_cheater(&creator) {
        return 0;
    }

    let observation = Observation::new(id.clone(), seq);
    if let Some(event) = store.get_mut(id) {
        event.lowest_observing.set_if_absent(&creator, observation.clone());
    }

    let mut updated = 0;
    let mut queue: VecDeque<EventId> = parents.into();
    while let Some(ancestor_id) = queue.pop_front() {
        let Some(ancestor) = store.get_mut(&ancestor_id) else {
            continue;
        };
        if ledger.is_cheater(ancestor.creator()) {
            continue;
        }
        if !ancestor
            .lowest_observing
            .set_if_absent(&creator, observation.clone())
        {
            continue;
        }
        updated += 1;
        queue.extend(ancestor.parents().iter().cloned());
    }

    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: &str, seq: Seq) -> Observation {
        Observation::new(EventId::from(id), seq)
    }

    #[test]
    fn test_raise_keeps_highest() {
        let a = ValidatorId::from("A");
        let mut vector = ObservationVector::new();
        vector.raise(&a, &obs("a2", 2));
        vector.raise(&a, &obs("a1", 1));
        assert_eq!(vector.seq(&a), Some(2));

        vector.raise(&a, &obs("a3", 3));
        assert_eq!(vector.get(&a).unwrap().event, EventId::from("a3"));
    }

    #[test]
    fn test_raise_tie_prefers_lower_id() {
        let a = ValidatorId::from("A");
        let mut vector = ObservationVector::new();
        vector.raise(&a, &obs("a5-y", 5));
        vector.raise(&a, &obs("a5-x", 5));
        assert_eq!(vector.get(&a).unwrap().event, EventId::from("a5-x"));
    }

    #[test]
    fn test_set_if_absent_keeps_earliest() {
        let b = ValidatorId::from("B");
        let mut vector = ObservationVector::new();
        assert!(vector.set_if_absent(&b, obs("b2", 2)));
        assert!(!vector.set_if_absent(&b, obs("b3", 3)));
        assert_eq!(vector.seq(&b), Some(2));
    }

    #[test]
    fn test_dominates() {
        let a = ValidatorId::from("A");
        let b = ValidatorId::from("B");

        let mut low = ObservationVector::new();
        low.raise(&a, &obs("a1", 1));

        let mut high = ObservationVector::new();
        high.raise(&a, &obs("a2", 2));
        high.raise(&b, &obs("b1", 1));

        assert!(high.dominates(&low));
        assert!(!low.dominates(&high));
        assert!(high.dominates(&high));
    }
}
