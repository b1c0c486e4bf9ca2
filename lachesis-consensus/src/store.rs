//! Event store: an append-only arena of events indexed by id

use crate::vector::ObservationVector;
use lachesis_core::{EventId, EventRecord, Frame, Seq, Timestamp, ValidatorId, Weight};
use std::collections::{HashMap, HashSet, VecDeque};

/// A stored event: the admitted record plus its derived consensus state
#[derive(Debug, Clone)]
pub struct Event {
    record: EventRecord,
    pub(crate) highest_observed: ObservationVector,
    pub(crate) lowest_observing: ObservationVector,
    frame: Option<Frame>,
    is_root: bool,
    is_atropos: bool,
}

impl Event {
    /// Wrap an admitted record with its highest-observed vector
    pub(crate) fn new(record: EventRecord, highest_observed: ObservationVector) -> Self {
        Self {
            record,
            highest_observed,
            lowest_observing: ObservationVector::new(),
            frame: None,
            is_root: false,
            is_atropos: false,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.record.id
    }

    pub fn creator(&self) -> &ValidatorId {
        &self.record.creator
    }

    pub fn timestamp(&self) -> Timestamp {
        self.record.timestamp
    }

    pub fn seq(&self) -> Seq {
        self.record.seq
    }

    pub fn weight(&self) -> Weight {
        self.record.weight
    }

    /// Genesis event of its creator
    pub fn is_first(&self) -> bool {
        self.record.is_first()
    }

    /// Parents as admitted
    pub fn parents(&self) -> &[EventId] {
        &self.record.parents
    }

    pub fn highest_observed(&self) -> &ObservationVector {
        &self.highest_observed
    }

    pub fn lowest_observing(&self) -> &ObservationVector {
        &self.lowest_observing
    }

    /// Frame assigned during processing
    pub fn frame(&self) -> Option<Frame> {
        self.frame
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_atropos(&self) -> bool {
        self.is_atropos
    }

    /// Assign the frame; a second assignment is ignored
    pub(crate) fn assign_frame(&mut self, frame: Frame, is_root: bool) -> bool {
        if self.frame.is_some() {
            return false;
        }
        self.frame = Some(frame);
        self.is_root = is_root;
        true
    }

    pub(crate) fn mark_atropos(&mut self) {
        self.is_atropos = true;
    }

    /// The record as admitted
    pub fn to_record(&self) -> EventRecord {
        self.record.clone()
    }
}

/// Append-only event arena
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: Vec<Event>,
    index: HashMap<EventId, usize>,
    /// Admission positions per creator
    chains: HashMap<ValidatorId, Vec<usize>>,
}

impl EventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Returns false if the id is already stored.
    pub(crate) fn insert(&mut self, event: Event) -> bool {
        if self.index.contains_key(event.id()) {
            return false;
        }
        let position = self.events.len();
        self.index.insert(event.id().clone(), position);
        self.chains
            .entry(event.creator().clone())
            .or_default()
            .push(position);
        self.events.push(event);
        true
    }

    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.index.get(id).map(|i| &self.events[*i])
    }

    pub(crate) fn get_mut(&mut self, id: &EventId) -> Option<&mut Event> {
        match self.index.get(id) {
            Some(i) => self.events.get_mut(*i),
            None => None,
        }
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in admission order
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Most recently admitted event of a creator
    pub fn latest_of(&self, creator: &ValidatorId) -> Option<&Event> {
        self.chains
            .get(creator)
            .and_then(|chain| chain.last())
            .map(|i| &self.events[*i])
    }

    /// The creator's event admitted just before this one
    pub fn previous_of(&self, event: &Event) -> Option<&Event> {
        let position = *self.index.get(event.id())?;
        self.chains
            .get(event.creator())?
            .iter()
            .rev()
            .find(|i| **i < position)
            .map(|i| &self.events[*i])
    }

    /// The direct self-parent: same creator, sequence one lower
    pub fn self_parent(&self, event: &Event) -> Option<&Event> {
        event
            .parents()
            .iter()
            .filter_map(|p| self.get(p))
            .find(|p| p.creator() == event.creator() && p.seq() + 1 == event.seq())
    }

    /// The event and its stored ancestors that `known` rejects, in admission order
    ///
    /// Traversal does not descend past an event that `known` accepts.
    pub fn missing_ancestry<F>(&self, id: &EventId, known: F) -> Vec<&Event>
    where
        F: Fn(&EventId) -> bool,
    {
        let mut visited = HashSet::new();
        let mut found = Vec::new();
        let mut queue = VecDeque::from([id.clone()]);

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next.clone()) || known(&next) {
                continue;
            }
            let Some(event) = self.get(&next) else {
                continue;
            };
            found.push(self.index[&next]);
            queue.extend(event.parents().iter().cloned());
        }

        found.sort_unstable();
        found.into_iter().map(|i| &self.events[i]).collect()
    }
}
