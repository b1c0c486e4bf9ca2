//! Validator set, stake ledger and quorum computation

use crate::{ConsensusError, ConsensusResult};
use lachesis_core::{Frame, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Validator set known at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorSet {
    validators: BTreeMap<ValidatorId, Weight>,
}

impl ValidatorSet {
    /// Create an empty validator set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator, replacing its weight if already present
    pub fn insert(&mut self, id: impl Into<ValidatorId>, weight: Weight) {
        self.validators.insert(id.into(), weight);
    }

    /// Builder-style insert
    pub fn with(mut self, id: impl Into<ValidatorId>, weight: Weight) -> Self {
        self.insert(id, weight);
        self
    }

    /// Get a validator's weight
    pub fn weight(&self, id: &ValidatorId) -> Option<Weight> {
        self.validators.get(id).copied()
    }

    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.validators.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Get total weight
    pub fn total_weight(&self) -> Weight {
        self.validators
            .values()
            .fold(0, |total, weight| total.saturating_add(*weight))
    }

    /// Iterate validators in id order
    pub fn iter(&self) -> impl Iterator<Item = (&ValidatorId, Weight)> {
        self.validators.iter().map(|(id, w)| (id, *w))
    }

    /// Reject zero-weight validators and a total stake that overflows
    pub fn validate(&self) -> ConsensusResult<()> {
        let mut total: Weight = 0;
        for (id, weight) in &self.validators {
            if *weight == 0 {
                return Err(ConsensusError::InvalidValidator(format!(
                    "validator {} weight must be greater than 0",
                    id
                )));
            }
            total = total.checked_add(*weight).ok_or_else(|| {
                ConsensusError::InvalidValidator(format!(
                    "validator {} weight {} overflows the total stake",
                    id, weight
                ))
            })?;
        }
        Ok(())
    }
}

impl From<BTreeMap<ValidatorId, Weight>> for ValidatorSet {
    fn from(validators: BTreeMap<ValidatorId, Weight>) -> Self {
        Self { validators }
    }
}

impl FromIterator<(ValidatorId, Weight)> for ValidatorSet {
    fn from_iter<I: IntoIterator<Item = (ValidatorId, Weight)>>(iter: I) -> Self {
        Self {
            validators: iter.into_iter().collect(),
        }
    }
}

/// Membership state of a validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorState {
    /// Contributes its weight from its activation frame onwards
    Active,
    /// Late joiner waiting for the minimum frame to reach its activation frame
    Pending,
    /// Confirmed equivocator; weight is zero forever
    Cheater,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    weight: Weight,
    activation_frame: Frame,
    state: ValidatorState,
}

/// Live stake weights after fork suppression and late-joiner activation
///
/// Weights only ever move downward: once a validator is confirmed a
/// cheater its weight is zero and it never leaves that state.
#[derive(Debug, Clone, Default)]
pub struct ValidatorLedger {
    entries: BTreeMap<ValidatorId, LedgerEntry>,
    quorum_cache: BTreeMap<Frame, Weight>,
}

impl ValidatorLedger {
    /// Seed the ledger with the validators known at startup
    pub fn from_set(set: &ValidatorSet) -> Self {
        let entries = set
            .iter()
            .map(|(id, weight)| {
                (
                    id.clone(),
                    LedgerEntry {
                        weight,
                        activation_frame: 1,
                        state: ValidatorState::Active,
                    },
                )
            })
            .collect();

        Self {
            entries,
            quorum_cache: BTreeMap::new(),
        }
    }

    /// Admit an unknown validator as active from frame 1. Returns false if
    /// already known or if its weight does not fit the total stake.
    pub fn admit(&mut self, id: &ValidatorId, weight: Weight) -> bool {
        if self.entries.contains_key(id) || !self.fits(weight) {
            return false;
        }
        self.entries.insert(
            id.clone(),
            LedgerEntry {
                weight,
                activation_frame: 1,
                state: ValidatorState::Active,
            },
        );
        self.quorum_cache.clear();
        true
    }

    /// Queue an unknown validator for activation. Returns false if already
    /// known or if its weight does not fit the total stake.
    pub fn queue(&mut self, id: &ValidatorId, activation_frame: Frame, weight: Weight) -> bool {
        if self.entries.contains_key(id) || !self.fits(weight) {
            return false;
        }
        self.entries.insert(
            id.clone(),
            LedgerEntry {
                weight,
                activation_frame,
                state: ValidatorState::Pending,
            },
        );
        true
    }

    /// Whether another validator of this weight keeps the total stake of
    /// active and pending validators within `Weight`
    pub fn fits(&self, weight: Weight) -> bool {
        self.entries
            .values()
            .filter(|e| e.state != ValidatorState::Cheater)
            .try_fold(weight, |total, e| total.checked_add(e.weight))
            .is_some()
    }

    /// Pending validators whose activation frame has been reached, in id order
    pub fn ready_for_activation(&self, minimum_frame: Frame) -> Vec<ValidatorId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == ValidatorState::Pending && e.activation_frame <= minimum_frame)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Splice a pending validator into the active set
    pub fn activate(&mut self, id: &ValidatorId) -> Option<Frame> {
        let entry = self.entries.get_mut(id)?;
        if entry.state != ValidatorState::Pending {
            return None;
        }
        entry.state = ValidatorState::Active;
        self.quorum_cache.clear();
        debug!("Validator {} active from frame {}", id, entry.activation_frame);
        Some(entry.activation_frame)
    }

    /// Zero a validator's stake. Returns true if it was not already a cheater.
    pub fn mark_cheater(&mut self, id: &ValidatorId) -> bool {
        let newly = match self.entries.get_mut(id) {
            Some(entry) => {
                let was_honest = entry.state != ValidatorState::Cheater;
                entry.state = ValidatorState::Cheater;
                entry.weight = 0;
                was_honest
            }
            None => {
                self.entries.insert(
                    id.clone(),
                    LedgerEntry {
                        weight: 0,
                        activation_frame: 1,
                        state: ValidatorState::Cheater,
                    },
                );
                true
            }
        };
        if newly {
            self.quorum_cache.clear();
        }
        newly
    }

    pub fn state(&self, id: &ValidatorId) -> Option<ValidatorState> {
        self.entries.get(id).map(|e| e.state)
    }

    pub fn is_known(&self, id: &ValidatorId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_active(&self, id: &ValidatorId) -> bool {
        self.state(id) == Some(ValidatorState::Active)
    }

    pub fn is_pending(&self, id: &ValidatorId) -> bool {
        self.state(id) == Some(ValidatorState::Pending)
    }

    pub fn is_cheater(&self, id: &ValidatorId) -> bool {
        self.state(id) == Some(ValidatorState::Cheater)
    }

    /// Live weight: zero for cheaters, pending and unknown validators
    pub fn weight(&self, id: &ValidatorId) -> Weight {
        match self.entries.get(id) {
            Some(e) if e.state == ValidatorState::Active => e.weight,
            _ => 0,
        }
    }

    pub fn activation_frame(&self, id: &ValidatorId) -> Option<Frame> {
        self.entries.get(id).map(|e| e.activation_frame)
    }

    /// Active validators, in id order
    pub fn active(&self) -> impl Iterator<Item = &ValidatorId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == ValidatorState::Active)
            .map(|(id, _)| id)
    }

    /// Active validators that take part in the given frame
    pub fn participants(&self, frame: Frame) -> Vec<ValidatorId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == ValidatorState::Active && e.activation_frame <= frame)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Confirmed cheaters
    pub fn cheaters(&self) -> BTreeSet<ValidatorId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == ValidatorState::Cheater)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Weight of the validators taking part in a frame
    pub fn total_weight(&self, frame: Frame) -> Weight {
        self.entries
            .values()
            .filter(|e| e.state == ValidatorState::Active && e.activation_frame <= frame)
            .fold(0, |total: Weight, e| total.saturating_add(e.weight))
    }

    /// `floor(2W/3) + 1` without touching the memo
    pub fn compute_quorum(&self, frame: Frame) -> Weight {
        quorum_of(self.total_weight(frame))
    }

    /// Memoized quorum for a frame
    pub fn quorum(&mut self, frame: Frame) -> Weight {
        if let Some(q) = self.quorum_cache.get(&frame) {
            return *q;
        }
        let q = self.compute_quorum(frame);
        self.quorum_cache.insert(frame, q);
        q
    }

    /// Snapshot of the memoized quorums
    pub fn quorums(&self) -> &BTreeMap<Frame, Weight> {
        &self.quorum_cache
    }
}

/// `floor(2 * total / 3) + 1`
pub fn quorum_of(total: Weight) -> Weight {
    (2 * u128::from(total) / 3 + 1) as Weight
}

/// Counts weights, each validator at most once
#[derive(Debug, Clone)]
pub struct WeightCounter {
    counted: HashSet<ValidatorId>,
    quorum: Weight,
    sum: Weight,
}

impl WeightCounter {
    pub fn new(quorum: Weight) -> Self {
        Self {
            counted: HashSet::new(),
            quorum,
            sum: 0,
        }
    }

    /// Count a validator; returns true if it had not been counted before
    pub fn count(&mut self, id: &ValidatorId, weight: Weight) -> bool {
        if !self.counted.insert(id.clone()) {
            return false;
        }
        self.sum += weight;
        true
    }

    pub fn sum(&self) -> Weight {
        self.sum
    }

    pub fn has_quorum(&self) -> bool {
        self.sum >= self.quorum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(id: &str) -> ValidatorId {
        ValidatorId::from(id)
    }

    fn three_equal() -> ValidatorLedger {
        ValidatorLedger::from_set(&ValidatorSet::new().with("A", 1).with("B", 1).with("C", 1))
    }

    #[test]
    fn test_quorum_three_equal_validators() {
        let mut ledger = three_equal();
        assert_eq!(ledger.total_weight(1), 3);
        assert_eq!(ledger.quorum(1), 3);
        assert_eq!(ledger.quorums().get(&1), Some(&3));
    }

    #[test]
    fn test_cheater_weight_zeroed() {
        let mut ledger = three_equal();
        assert_eq!(ledger.quorum(1), 3);

        assert!(ledger.mark_cheater(&v("A")));
        assert!(!ledger.mark_cheater(&v("A")));
        assert_eq!(ledger.weight(&v("A")), 0);
        assert!(ledger.quorums().is_empty());
        assert_eq!(ledger.quorum(1), 2);
        assert_eq!(ledger.cheaters().len(), 1);
    }

    #[test]
    fn test_late_joiner_counts_from_activation_frame() {
        let mut ledger = three_equal();
        assert!(ledger.queue(&v("D"), 3, 3));
        assert_eq!(ledger.weight(&v("D")), 0);
        assert!(ledger.ready_for_activation(2).is_empty());

        let ready = ledger.ready_for_activation(3);
        assert_eq!(ready, vec![v("D")]);
        assert_eq!(ledger.activate(&v("D")), Some(3));

        assert_eq!(ledger.total_weight(2), 3);
        assert_eq!(ledger.total_weight(3), 6);
        assert_eq!(ledger.quorum(3), 5);
        assert_eq!(ledger.participants(2).len(), 3);
        assert_eq!(ledger.participants(3).len(), 4);
    }

    #[test]
    fn test_weight_counter_counts_once() {
        let mut counter = WeightCounter::new(3);
        assert!(counter.count(&v("A"), 2));
        assert!(!counter.count(&v("A"), 2));
        assert!(!counter.has_quorum());
        counter.count(&v("B"), 1);
        assert_eq!(counter.sum(), 3);
        assert!(counter.has_quorum());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let set = ValidatorSet::new().with("A", 0);
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_quorum_of_large_stake() {
        let half = Weight::MAX / 2;
        let set = ValidatorSet::new().with("A", half).with("B", half);
        assert!(set.validate().is_ok());

        let mut ledger = ValidatorLedger::from_set(&set);
        assert_eq!(ledger.quorum(1), 12_297_829_382_473_034_410);
        assert_eq!(quorum_of(Weight::MAX), 12_297_829_382_473_034_411);
    }

    #[test]
    fn test_overflowing_stake_rejected() {
        let set = ValidatorSet::new().with("A", Weight::MAX).with("B", 1);
        assert!(set.validate().is_err());

        let mut ledger = ValidatorLedger::from_set(&ValidatorSet::new().with("A", Weight::MAX));
        assert!(!ledger.fits(1));
        assert!(!ledger.admit(&v("B"), 1));
        assert!(!ledger.queue(&v("C"), 2, 1));
        assert!(!ledger.is_known(&v("B")));

        // A cheater's stake no longer counts
        ledger.mark_cheater(&v("A"));
        assert!(ledger.admit(&v("B"), 1));
    }

    proptest! {
        #[test]
        fn prop_quorum_formula(weights in proptest::collection::vec(1u64..1_000, 1..20)) {
            let set: ValidatorSet = weights
                .iter()
                .enumerate()
                .map(|(i, w)| (ValidatorId::new(format!("V{}", i)), *w))
                .collect();
            let mut ledger = ValidatorLedger::from_set(&set);
            let total: u64 = weights.iter().sum();
            prop_assert_eq!(ledger.quorum(1), total * 2 / 3 + 1);
            // More than two thirds, and never more than the total.
            prop_assert!(3 * ledger.quorum(1) > 2 * total);
            prop_assert!(ledger.quorum(1) <= total);
        }
    }
}
