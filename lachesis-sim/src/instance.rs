//! One simulated validator: a private engine plus its defer queue and inbox

use crate::message::{EventRequest, EventResponse};
use crate::stats::SyncStats;
use crate::SimResult;
use lachesis_consensus::{ConsensusOutput, EngineUpdate, Lachesis};
use lachesis_core::{EventId, EventRecord, Frame, Seq, Timestamp, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

/// Processing order of deferred events
type DeferKey = (Timestamp, ValidatorId, Seq, EventId);

#[derive(Debug, Clone)]
struct Deferred {
    record: EventRecord,
    /// Round the event entered the queue
    since: u64,
    /// Whether the event has been reported stalled
    reported: bool,
}

/// A deferred event that outlived the defer bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalledEvent {
    /// Instance holding the event
    pub validator: ValidatorId,
    pub event: EventId,
    /// Round the event was deferred in
    pub since: u64,
    /// Round the stall was reported in
    pub round: u64,
}

/// A validator with a partial, asynchronously updated view of the DAG
pub struct ValidatorInstance {
    id: ValidatorId,
    engine: Lachesis,
    deferred: BTreeMap<DeferKey, Deferred>,
    deferred_ids: HashSet<EventId>,
    /// Requests addressed to this instance
    inbox: Vec<EventRequest>,
    /// Events this instance has asked for and not yet received
    outstanding: HashSet<EventId>,
    stats: SyncStats,
}

impl ValidatorInstance {
    pub fn new(id: ValidatorId, engine: Lachesis) -> Self {
        Self {
            id,
            engine,
            deferred: BTreeMap::new(),
            deferred_ids: HashSet::new(),
            inbox: Vec::new(),
            outstanding: HashSet::new(),
            stats: SyncStats::new(),
        }
    }

    pub fn id(&self) -> &ValidatorId {
        &self.id
    }

    pub fn engine(&self) -> &Lachesis {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Lachesis {
        &mut self.engine
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SyncStats {
        &mut self.stats
    }

    pub fn output(&self) -> ConsensusOutput {
        self.engine.output()
    }

    /// Whether the event is admitted, buffered or waiting in the defer queue
    pub fn knows(&self, id: &EventId) -> bool {
        self.holds(id) || self.deferred_ids.contains(id)
    }

    /// Whether the engine has the event and can hand it out
    pub fn holds(&self, id: &EventId) -> bool {
        self.engine.contains(id) || self.engine.is_buffered(id)
    }

    pub fn is_deferred(&self, id: &EventId) -> bool {
        self.deferred_ids.contains(id)
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Whether anything is still waiting on the request/defer protocol
    pub fn has_pending(&self) -> bool {
        !self.deferred.is_empty() || !self.inbox.is_empty()
    }

    /// Frame of this validator's own latest event, or its activation frame before that
    pub fn own_frame(&self) -> Frame {
        self.engine
            .highest_frame_of(&self.id)
            .or_else(|| self.engine.ledger().activation_frame(&self.id))
            .unwrap_or(1)
    }

    /// Highest frame among admitted events that precede `record` in
    /// processing order
    pub fn frame_before(&self, record: &EventRecord) -> Option<Frame> {
        let key = (record.timestamp, &record.creator, record.seq, &record.id);
        self.engine
            .store()
            .iter()
            .filter(|e| (e.timestamp(), e.creator(), e.seq(), e.id()) < key)
            .filter_map(|e| e.frame())
            .max()
    }

    /// Whether this instance has caught its own validator equivocating
    pub fn is_cheater(&self) -> bool {
        self.engine.ledger().is_cheater(&self.id)
    }

    /// The requested event and every stored ancestor `requester` does not know
    ///
    /// Returns `None` when this instance cannot answer yet.
    pub fn supply(&self, event: &EventId, requester: &ValidatorInstance) -> Option<Vec<EventRecord>> {
        if self.engine.contains(event) {
            let records = self
                .engine
                .store()
                .missing_ancestry(event, |id| requester.knows(id))
                .into_iter()
                .map(|e| e.to_record())
                .collect();
            return Some(records);
        }
        self.engine
            .buffered_record(event)
            .map(|record| vec![record.clone()])
    }

    /// Queue a record until its parents are known. Returns false if it is already known.
    pub fn defer(&mut self, record: EventRecord, round: u64) -> bool {
        self.outstanding.remove(&record.id);
        if self.knows(&record.id) {
            return false;
        }

        debug!("Instance {} deferring event {}", self.id, record.id);
        self.deferred_ids.insert(record.id.clone());
        let key = (
            record.timestamp,
            record.creator.clone(),
            record.seq,
            record.id.clone(),
        );
        self.deferred.insert(
            key,
            Deferred {
                record,
                since: round,
                reported: false,
            },
        );
        true
    }

    /// Take in the records of a response
    pub fn receive(&mut self, response: EventResponse, round: u64) {
        self.stats.record_events_received(response.len());
        for record in response.records {
            self.defer(record, round);
        }
    }

    /// Parents of deferred events that are neither known nor already requested
    pub fn missing_parents(&self) -> BTreeSet<EventId> {
        self.deferred
            .values()
            .flat_map(|d| d.record.parents.iter())
            .filter(|p| !self.knows(p) && !self.outstanding.contains(*p))
            .cloned()
            .collect()
    }

    /// Issue one request per missing parent
    pub fn request_missing(&mut self) -> Vec<EventRequest> {
        let missing = self.missing_parents();
        let mut requests = Vec::with_capacity(missing.len());
        for event in missing {
            self.stats.record_request_sent();
            self.outstanding.insert(event.clone());
            requests.push(EventRequest::new(self.id.clone(), event));
        }
        requests
    }

    /// Forget a request so the event can be asked for again
    pub fn release(&mut self, event: &EventId) {
        self.outstanding.remove(event);
    }

    pub fn push_request(&mut self, request: EventRequest) {
        self.inbox.push(request);
    }

    pub fn take_inbox(&mut self) -> Vec<EventRequest> {
        std::mem::take(&mut self.inbox)
    }

    /// Admit every deferred event whose parents are held, until no pass makes progress
    pub fn process_deferred(&mut self) -> SimResult<EngineUpdate> {
        let mut update = EngineUpdate::default();
        loop {
            let mut progress = false;
            // Timestamp of the earliest event still waiting; nothing later may overtake it
            let mut waiting: Option<Timestamp> = None;
            let keys: Vec<DeferKey> = self.deferred.keys().cloned().collect();
            for key in keys {
                if waiting.is_some_and(|timestamp| key.0 > timestamp) {
                    break;
                }
                let ready = self
                    .deferred
                    .get(&key)
                    .is_some_and(|d| d.record.parents.iter().all(|p| self.holds(p)));
                if !ready {
                    waiting.get_or_insert(key.0);
                    continue;
                }
                let Some(deferred) = self.deferred.remove(&key) else {
                    continue;
                };
                self.deferred_ids.remove(&deferred.record.id);

                let result = self.engine.ingest(deferred.record)?;
                if !result.duplicate {
                    self.stats.record_admitted();
                }
                update.merge(result);
                progress = true;
            }
            if !progress {
                break;
            }
        }
        Ok(update)
    }

    /// Report deferred events older than `max_defer_rounds`, once each
    pub fn age(&mut self, round: u64, max_defer_rounds: u64) -> Vec<StalledEvent> {
        let mut stalled = Vec::new();
        for deferred in self.deferred.values_mut() {
            if deferred.reported || round.saturating_sub(deferred.since) < max_defer_rounds {
                continue;
            }
            deferred.reported = true;
            self.stats.record_stalled();
            warn!(
                "Instance {}: event {} deferred since round {} is stalled",
                self.id, deferred.record.id, deferred.since
            );
            stalled.push(StalledEvent {
                validator: self.id.clone(),
                event: deferred.record.id.clone(),
                since: deferred.since,
                round,
            });
        }
        stalled
    }
}
