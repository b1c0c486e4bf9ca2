//! Single-validator Lachesis engine
//!
//! Composes the fork detector, observation vectors, root election and the
//! Atropos election into one sequential pipeline. Events are expected in
//! non-decreasing timestamp order; the first event of a later round closes
//! the previous one and triggers late-joiner activation.

use crate::config::EngineConfig;
use crate::election::{elect_root, AtroposDecision, Election, RootSets};
use crate::fork::{ForkDetector, ForkEvidence};
use crate::output::ConsensusOutput;
use crate::store::{Event, EventStore};
use crate::traits::{Engine, EngineUpdate, ProcessedEvent};
use crate::validators::{ValidatorLedger, ValidatorSet};
use crate::vector::{highest_observed, propagate_lowest_observing};
use crate::{ConsensusError, ConsensusResult};
use lachesis_core::{EventId, EventRecord, Frame, Timestamp, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consensus events
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// Unknown creator admitted as an initial validator
    ValidatorAdmitted { validator: ValidatorId, weight: Weight },
    /// Late joiner queued for activation
    ValidatorQueued {
        validator: ValidatorId,
        activation_frame: Frame,
        weight: Weight,
    },
    /// Late joiner spliced into the active set
    ValidatorActivated { validator: ValidatorId, frame: Frame },
    /// Equivocation confirmed
    ForkDetected { evidence: ForkEvidence },
    /// First root of a new frame
    FrameOpened { frame: Frame },
    /// Event elected as a root
    RootElected {
        event: EventId,
        validator: ValidatorId,
        frame: Frame,
    },
    /// Frame finalized
    AtroposDecided { decision: AtroposDecision },
    /// Too many frames above the one under election
    LivenessStall { frame_to_decide: Frame, frame: Frame },
}

/// Engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub events_processed: u64,
    pub roots_elected: u64,
    pub frames_decided: u64,
    pub forks_detected: u64,
    pub events_buffered: u64,
    pub parents_pruned: u64,
    pub duplicates: u64,
    pub liveness_stalls: u64,
}

impl EngineStats {
    pub fn record_processed(&mut self, is_root: bool) {
        self.events_processed += 1;
        if is_root {
            self.roots_elected += 1;
        }
    }

    pub fn record_decision(&mut self) {
        self.frames_decided += 1;
    }

    pub fn record_fork(&mut self) {
        self.forks_detected += 1;
    }

    pub fn record_buffered(&mut self) {
        self.events_buffered += 1;
    }

    pub fn record_pruned(&mut self, count: usize) {
        self.parents_pruned += count as u64;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn record_stall(&mut self) {
        self.liveness_stalls += 1;
    }
}

/// Lachesis consensus engine for one validator's view of the DAG
pub struct Lachesis {
    /// Configuration
    config: EngineConfig,
    /// Every admitted event
    store: EventStore,
    /// Live stake weights
    ledger: ValidatorLedger,
    /// Sequence monitor
    forks: ForkDetector,
    /// Root sets by frame
    roots: RootSets,
    /// Atropos election state
    election: Election,
    /// Highest frame opened
    frame: Frame,
    /// Lowest latest frame over active validators; never decreases
    minimum_frame: Frame,
    /// Timestamp of the round being ingested
    current_round: Option<Timestamp>,
    /// Records of pending validators
    buffered: BTreeMap<ValidatorId, Vec<EventRecord>>,
    buffered_ids: HashSet<EventId>,
    /// Counters
    stats: EngineStats,
    /// Whether a liveness stall is being reported
    stalled: bool,
    /// Event sender for notifications
    event_sender: Option<mpsc::UnboundedSender<ConsensusEvent>>,
}

impl Lachesis {
    /// Create a new engine seeded with the validators known at startup
    pub fn new(config: EngineConfig, validators: ValidatorSet) -> ConsensusResult<Self> {
        config.validate()?;
        validators.validate()?;

        info!(
            "Starting Lachesis with {} validators (total weight {})",
            validators.len(),
            validators.total_weight()
        );

        Ok(Self {
            config,
            store: EventStore::new(),
            ledger: ValidatorLedger::from_set(&validators),
            forks: ForkDetector::new(),
            roots: RootSets::new(),
            election: Election::new(),
            frame: 1,
            minimum_frame: 1,
            current_round: None,
            buffered: BTreeMap::new(),
            buffered_ids: HashSet::new(),
            stats: EngineStats::default(),
            stalled: false,
            event_sender: None,
        })
    }

    /// Set event sender for notifications
    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<ConsensusEvent>) {
        self.event_sender = Some(sender);
    }

    /// Send event notification
    fn send_event(&self, event: ConsensusEvent) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event) {
                warn!("Failed to send consensus event: {}", e);
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pre-announce a late joiner. Returns false if the validator is already known.
    pub fn queue_validator(
        &mut self,
        validator: &ValidatorId,
        activation_frame: Frame,
        weight: Weight,
    ) -> bool {
        if !self.ledger.queue(validator, activation_frame, weight) {
            return false;
        }
        info!(
            "Validator {} queued for activation at frame {}",
            validator, activation_frame
        );
        self.send_event(ConsensusEvent::ValidatorQueued {
            validator: validator.clone(),
            activation_frame,
            weight,
        });
        true
    }

    /// Feed one record through the pipeline
    pub fn ingest(&mut self, record: EventRecord) -> ConsensusResult<EngineUpdate> {
        record.validate()?;

        let mut update = EngineUpdate::default();
        if self.store.contains(&record.id) || self.buffered_ids.contains(&record.id) {
            debug!("Ignoring duplicate event {}", record.id);
            self.stats.record_duplicate();
            update.duplicate = true;
            return Ok(update);
        }

        // Nothing below may fail on this record's account
        self.check_parents(&record)?;
        if !self.ledger.is_known(&record.creator) && !self.ledger.fits(record.weight) {
            return Err(ConsensusError::InvalidValidator(format!(
                "weight {} of validator {} overflows the total stake",
                record.weight, record.creator
            )));
        }

        if self
            .current_round
            .is_some_and(|round| record.timestamp > round)
        {
            self.activate_ready(&mut update)?;
        }
        self.current_round = Some(
            self.current_round
                .map_or(record.timestamp, |round| round.max(record.timestamp)),
        );

        if !self.ledger.is_known(&record.creator) {
            if record.timestamp <= self.config.field_of_view {
                self.ledger.admit(&record.creator, record.weight);
                info!(
                    "Validator {} admitted with weight {}",
                    record.creator, record.weight
                );
                self.send_event(ConsensusEvent::ValidatorAdmitted {
                    validator: record.creator.clone(),
                    weight: record.weight,
                });
            } else {
                let creator = record.creator.clone();
                self.queue_validator(&creator, self.frame + 1, record.weight);
            }
        }

        if self.ledger.is_pending(&record.creator) {
            self.buffer(record, &mut update);
        } else {
            self.process(record, &mut update)?;
        }

        Ok(update)
    }

    /// Feed a sequence of records, stopping at the first hard error
    pub fn ingest_all<I>(&mut self, records: I) -> ConsensusResult<EngineUpdate>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let mut update = EngineUpdate::default();
        for record in records {
            update.merge(self.ingest(record)?);
        }
        Ok(update)
    }

    /// Reject a record citing a parent that is neither stored nor buffered
    fn check_parents(&self, record: &EventRecord) -> ConsensusResult<()> {
        match record
            .parents
            .iter()
            .find(|p| !self.store.contains(p) && !self.buffered_ids.contains(*p))
        {
            Some(parent) => Err(ConsensusError::UnknownParent {
                event: record.id.clone(),
                parent: parent.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Hold a pending validator's record until activation
    fn buffer(&mut self, record: EventRecord, update: &mut EngineUpdate) {
        debug!(
            "Buffering event {} of pending validator {}",
            record.id, record.creator
        );
        self.stats.record_buffered();
        update.buffered.push(record.id.clone());
        self.buffered_ids.insert(record.id.clone());
        self.buffered
            .entry(record.creator.clone())
            .or_default()
            .push(record);
    }

    /// Drop parents held in the buffer; reject parents never seen
    fn prune_parents(&mut self, mut record: EventRecord) -> ConsensusResult<EventRecord> {
        self.check_parents(&record)?;

        let before = record.parents.len();
        record.parents.retain(|p| !self.buffered_ids.contains(p));
        let pruned = before - record.parents.len();
        if pruned > 0 {
            debug!("Pruned {} buffered parents of {}", pruned, record.id);
            self.stats.record_pruned(pruned);
        }
        Ok(record)
    }

    /// Run one record through fork detection, vectors, root and Atropos election
    fn process(&mut self, record: EventRecord, update: &mut EngineUpdate) -> ConsensusResult<()> {
        let record = self.prune_parents(record)?;
        let id = record.id.clone();
        let creator = record.creator.clone();

        if let Some(evidence) =
            self.forks
                .observe(&creator, &id, record.seq, record.timestamp)
        {
            self.handle_fork(evidence, update);
        }

        let vector = highest_observed(
            &self.store,
            &self.ledger,
            &id,
            &creator,
            record.seq,
            &record.parents,
        );
        self.store.insert(Event::new(record, vector));
        propagate_lowest_observing(&mut self.store, &self.ledger, &id);

        let Some(decision) = elect_root(&self.store, &mut self.ledger, &self.roots, &id) else {
            return Ok(());
        };
        if let Some(event) = self.store.get_mut(&id) {
            event.assign_frame(decision.frame, decision.is_root);
        }

        if decision.is_root {
            self.roots.insert(decision.frame, &creator, &id);
            debug!("Event {} is a root of frame {}", id, decision.frame);
            self.send_event(ConsensusEvent::RootElected {
                event: id.clone(),
                validator: creator.clone(),
                frame: decision.frame,
            });
            if decision.frame > self.frame {
                self.frame = decision.frame;
                info!("Frame {} opened by {}", self.frame, id);
                self.send_event(ConsensusEvent::FrameOpened { frame: self.frame });
            }
        }

        self.stats.record_processed(decision.is_root);
        update.processed.push(ProcessedEvent {
            id,
            creator,
            frame: decision.frame,
            is_root: decision.is_root,
        });

        let decisions =
            self.election
                .sweep(&mut self.store, &mut self.ledger, &self.roots, self.frame);
        for decision in decisions {
            self.stats.record_decision();
            self.send_event(ConsensusEvent::AtroposDecided {
                decision: decision.clone(),
            });
            update.decisions.push(decision);
        }

        self.check_liveness();
        Ok(())
    }

    /// Zero the equivocator's stake and excise its roots
    fn handle_fork(&mut self, evidence: ForkEvidence, update: &mut EngineUpdate) {
        warn!(
            "Validator {} equivocated: event {} reuses seq {} (highest {})",
            evidence.validator, evidence.event, evidence.seq, evidence.highest_seen
        );
        if self.ledger.mark_cheater(&evidence.validator) {
            let excised = self.roots.excise(&evidence.validator);
            if !excised.is_empty() {
                debug!(
                    "Excised {} roots of cheater {}",
                    excised.len(),
                    evidence.validator
                );
            }
            self.election.drop_validator(&evidence.validator);
            self.buffered.remove(&evidence.validator);
        }
        self.stats.record_fork();
        self.send_event(ConsensusEvent::ForkDetected {
            evidence: evidence.clone(),
        });
        update.forks.push(evidence);
    }

    fn check_liveness(&mut self) {
        let behind = self.frame.saturating_sub(self.election.frame_to_decide());
        if behind > self.config.liveness_threshold {
            if !self.stalled {
                self.stalled = true;
                self.stats.record_stall();
                warn!(
                    "Liveness stall: frame {} still undecided at frame {}",
                    self.election.frame_to_decide(),
                    self.frame
                );
                self.send_event(ConsensusEvent::LivenessStall {
                    frame_to_decide: self.election.frame_to_decide(),
                    frame: self.frame,
                });
            }
        } else {
            self.stalled = false;
        }
    }

    /// Raise the minimum frame over active validators
    fn refresh_minimum_frame(&mut self) -> Frame {
        let minimum = self
            .ledger
            .active()
            .map(|v| {
                self.store
                    .latest_of(v)
                    .and_then(|e| e.frame())
                    .or_else(|| self.ledger.activation_frame(v))
                    .unwrap_or(1)
            })
            .min();
        if let Some(minimum) = minimum {
            self.minimum_frame = self.minimum_frame.max(minimum);
        }
        self.minimum_frame
    }

    /// Activate every pending validator whose activation frame is reached
    fn activate_ready(&mut self, update: &mut EngineUpdate) -> ConsensusResult<()> {
        let minimum = self.refresh_minimum_frame();
        let ready = self.ledger.ready_for_activation(minimum);
        if ready.is_empty() {
            return Ok(());
        }

        let mut released = Vec::new();
        for validator in &ready {
            if let Some(frame) = self.ledger.activate(validator) {
                info!("Validator {} activated at frame {}", validator, frame);
                self.send_event(ConsensusEvent::ValidatorActivated {
                    validator: validator.clone(),
                    frame,
                });
                update.activated.push(validator.clone());
            }
            released.extend(self.buffered.remove(validator).unwrap_or_default());
        }

        released.sort_by(|a, b| (a.timestamp, a.seq, &a.id).cmp(&(b.timestamp, b.seq, &b.id)));
        for record in &released {
            self.buffered_ids.remove(&record.id);
        }
        for record in released {
            self.process(record, update)?;
        }
        Ok(())
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn block(&self) -> u64 {
        self.election.block()
    }

    pub fn frame_to_decide(&self) -> Frame {
        self.election.frame_to_decide()
    }

    pub fn minimum_frame(&self) -> Frame {
        self.minimum_frame
    }

    /// Root events of a frame
    pub fn root_set_events(&self, frame: Frame) -> BTreeSet<EventId> {
        self.roots.events(frame)
    }

    /// Validators that rooted a frame
    pub fn root_set_validators(&self, frame: Frame) -> BTreeSet<ValidatorId> {
        self.roots.validators(frame)
    }

    pub fn atropos(&self, frame: Frame) -> Option<&EventId> {
        self.election.atropos(frame)
    }

    pub fn cheaters(&self) -> BTreeSet<ValidatorId> {
        self.ledger.cheaters()
    }

    pub fn event(&self, id: &EventId) -> Option<&Event> {
        self.store.get(id)
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.store.contains(id)
    }

    pub fn is_buffered(&self, id: &EventId) -> bool {
        self.buffered_ids.contains(id)
    }

    /// A record held back until its creator is activated
    pub fn buffered_record(&self, id: &EventId) -> Option<&EventRecord> {
        if !self.buffered_ids.contains(id) {
            return None;
        }
        self.buffered
            .values()
            .flat_map(|records| records.iter())
            .find(|r| &r.id == id)
    }

    /// Frame of a validator's latest admitted event
    pub fn highest_frame_of(&self, validator: &ValidatorId) -> Option<Frame> {
        self.store.latest_of(validator).and_then(|e| e.frame())
    }

    /// Memoized quorum of a frame
    pub fn quorum(&mut self, frame: Frame) -> Weight {
        self.ledger.quorum(frame)
    }

    pub fn ledger(&self) -> &ValidatorLedger {
        &self.ledger
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn election(&self) -> &Election {
        &self.election
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Snapshot of the consensus state
    pub fn output(&self) -> ConsensusOutput {
        let frames: Vec<Frame> = self.roots.frames().collect();
        ConsensusOutput {
            frame: self.frame,
            block: self.election.block(),
            frame_to_decide: self.election.frame_to_decide(),
            root_set_validators: frames
                .iter()
                .map(|f| (*f, self.roots.validators(*f)))
                .collect(),
            root_set_events: frames
                .iter()
                .map(|f| (*f, self.roots.events(*f)))
                .collect(),
            roots: frames
                .iter()
                .filter_map(|f| self.roots.get(*f).map(|roots| (*f, roots.clone())))
                .collect(),
            atropos_roots: self.election.atropos_roots().clone(),
            election_votes: self.election.votes().clone(),
            active_validators: self
                .ledger
                .active()
                .map(|v| (v.clone(), self.ledger.activation_frame(v).unwrap_or(1)))
                .collect(),
            cheaters: self.ledger.cheaters(),
            events: self.store.iter().map(|e| e.id().clone()).collect(),
            quorums: self.ledger.quorums().clone(),
        }
    }
}

impl Engine for Lachesis {
    fn ingest(&mut self, record: EventRecord) -> ConsensusResult<EngineUpdate> {
        Lachesis::ingest(self, record)
    }

    fn output(&self) -> ConsensusOutput {
        Lachesis::output(self)
    }

    fn frame(&self) -> Frame {
        self.frame
    }

    fn block(&self) -> u64 {
        self.election.block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(validators: &[(&str, Weight)]) -> Lachesis {
        let set = validators
            .iter()
            .map(|(id, w)| (ValidatorId::from(*id), *w))
            .collect();
        Lachesis::new(EngineConfig::default(), set).unwrap()
    }

    #[test]
    fn test_genesis_events_are_roots() {
        let mut lachesis = engine(&[("A", 1), ("B", 1), ("C", 1)]);
        for (id, creator) in [("a1", "A"), ("b1", "B"), ("c1", "C")] {
            let update = lachesis
                .ingest(EventRecord::new(id, creator, 1, 1, 1))
                .unwrap();
            assert_eq!(update.processed.len(), 1);
            assert!(update.processed[0].is_root);
        }

        assert_eq!(lachesis.frame(), 1);
        assert_eq!(lachesis.quorum(1), 3);
        assert_eq!(lachesis.root_set_events(1).len(), 3);
        assert_eq!(lachesis.stats().roots_elected, 3);
    }

    #[test]
    fn test_unknown_parent_is_hard_error() {
        let mut lachesis = engine(&[("A", 1)]);
        let result = lachesis.ingest(EventRecord::new("a2", "A", 2, 2, 1).with_parents(["a1"]));
        assert!(matches!(result, Err(ConsensusError::UnknownParent { .. })));
        assert!(!lachesis.contains(&EventId::from("a2")));
    }

    #[test]
    fn test_rejected_record_leaves_ledger_untouched() {
        let mut lachesis = engine(&[("A", 1), ("B", 1), ("C", 1)]);
        assert_eq!(lachesis.quorum(1), 3);

        let result = lachesis.ingest(EventRecord::new("z2", "Z", 2, 2, 100).with_parents(["z1"]));
        assert!(matches!(result, Err(ConsensusError::UnknownParent { .. })));

        let z = ValidatorId::from("Z");
        assert!(!lachesis.ledger().is_known(&z));
        assert_eq!(lachesis.ledger().weight(&z), 0);
        assert_eq!(lachesis.quorum(1), 3);
        assert!(!lachesis.is_buffered(&EventId::from("z2")));
    }

    #[test]
    fn test_oversized_stake_rejected() {
        let mut lachesis = engine(&[("A", Weight::MAX)]);
        let result = lachesis.ingest(EventRecord::new("b1", "B", 1, 1, 1));
        assert!(matches!(result, Err(ConsensusError::InvalidValidator(_))));
        assert!(!lachesis.ledger().is_known(&ValidatorId::from("B")));
        assert!(!lachesis.contains(&EventId::from("b1")));
    }

    #[test]
    fn test_decided_frames_are_not_revisited() {
        let mut lachesis = engine(&[("A", 1), ("B", 1), ("C", 1), ("D", 1)]);
        for round in 1..=5u64 {
            for creator in ["A", "B", "C", "D"] {
                let parents: Vec<String> = if round == 1 {
                    Vec::new()
                } else {
                    ["a", "b", "c", "d"]
                        .iter()
                        .map(|p| format!("{}{}", p, round - 1))
                        .collect()
                };
                let id = format!("{}{}", creator.to_lowercase(), round);
                lachesis
                    .ingest(EventRecord::new(id, creator, round, round, 1).with_parents(parents))
                    .unwrap();
            }
        }
        assert_eq!(lachesis.atropos(1), Some(&EventId::from("a1")));
        let atropos = lachesis.election().atropos_roots().clone();
        let votes = lachesis.election().votes()[&1].clone();
        let block = lachesis.block();

        let frame = lachesis.frame();
        let decisions =
            lachesis
                .election
                .sweep(&mut lachesis.store, &mut lachesis.ledger, &lachesis.roots, frame);
        assert!(decisions.is_empty());
        assert_eq!(lachesis.election().atropos_roots(), &atropos);
        assert_eq!(lachesis.election().votes()[&1], votes);
        assert_eq!(lachesis.block(), block);
        assert_eq!(lachesis.stats().frames_decided, 1);
    }

    #[test]
    fn test_malformed_record_rejected() {
        let mut lachesis = engine(&[("A", 1)]);
        let result = lachesis.ingest(EventRecord::new("a0", "A", 1, 0, 1));
        assert!(matches!(result, Err(ConsensusError::MalformedEvent(_))));
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut lachesis = engine(&[("A", 1)]);
        lachesis.ingest(EventRecord::new("a1", "A", 1, 1, 1)).unwrap();
        let update = lachesis.ingest(EventRecord::new("a1", "A", 1, 1, 1)).unwrap();
        assert!(update.duplicate);
        assert!(update.is_empty());
        assert!(lachesis.cheaters().is_empty());
        assert_eq!(lachesis.stats().duplicates, 1);
    }

    #[test]
    fn test_creators_admitted_within_field_of_view() {
        let mut lachesis = Lachesis::new(EngineConfig::new(2), ValidatorSet::new()).unwrap();
        lachesis.ingest(EventRecord::new("a1", "A", 1, 1, 4)).unwrap();
        assert!(lachesis.ledger().is_active(&ValidatorId::from("A")));
        assert_eq!(lachesis.ledger().weight(&ValidatorId::from("A")), 4);

        let update = lachesis.ingest(EventRecord::new("z1", "Z", 3, 1, 1)).unwrap();
        assert_eq!(update.buffered, vec![EventId::from("z1")]);
        assert!(lachesis.is_buffered(&EventId::from("z1")));
        assert!(lachesis.ledger().is_pending(&ValidatorId::from("Z")));
    }

    #[test]
    fn test_notifications_sent() {
        let mut lachesis = engine(&[("A", 1)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        lachesis.set_event_sender(tx);

        lachesis.ingest(EventRecord::new("a1", "A", 1, 1, 1)).unwrap();

        match rx.try_recv() {
            Ok(ConsensusEvent::RootElected { event, frame, .. }) => {
                assert_eq!(event, EventId::from("a1"));
                assert_eq!(frame, 1);
            }
            other => panic!("Unexpected notification: {:?}", other),
        }
    }

    #[test]
    fn test_closed_receiver_is_not_an_error() {
        let mut lachesis = engine(&[("A", 1)]);
        let (tx, rx) = mpsc::unbounded_channel();
        lachesis.set_event_sender(tx);
        drop(rx);

        assert!(lachesis.ingest(EventRecord::new("a1", "A", 1, 1, 1)).is_ok());
    }
}
