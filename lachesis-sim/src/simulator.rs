//! Multi-validator simulation driver
//!
//! Every validator runs its own engine and only ever receives the events it
//! created. Everything else reaches it through requests for missing parents,
//! answered by the author with the event and the ancestry the requester lacks.
//! After the run each instance is checked against a full-information
//! reference engine fed the whole log.

use crate::conformance::{check_conformance, ConformanceReport};
use crate::instance::{StalledEvent, ValidatorInstance};
use crate::message::{EventRequest, EventResponse};
use crate::stats::SyncStats;
use crate::{SimConfig, SimError, SimResult};
use lachesis_consensus::{ConsensusOutput, Lachesis, ValidatorSet};
use lachesis_core::{EventId, EventLog, EventRecord, Frame, Timestamp, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a simulation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Full-information result
    pub reference: ConsensusOutput,
    /// Result of every validator instance
    pub instances: BTreeMap<ValidatorId, ConsensusOutput>,
    /// Request/defer counters per instance
    pub stats: BTreeMap<ValidatorId, SyncStats>,
    /// Deferred events that outlived the defer bound
    pub stalled: Vec<StalledEvent>,
    pub conformance: ConformanceReport,
}

impl SimulationReport {
    /// Whether every instance conforms to the reference
    pub fn is_clean(&self) -> bool {
        self.conformance.is_clean()
    }

    pub fn instance(&self, validator: &ValidatorId) -> Option<&ConsensusOutput> {
        self.instances.get(validator)
    }

    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SimError::Serialization(format!("Failed to serialize report: {}", e)))
    }

    /// Save the report as JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SimResult<()> {
        fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

/// Runs one engine per validator over a partial view of the log
#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimConfig,
}

impl Simulator {
    pub fn new(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Feed the whole log to a single engine
    pub fn run_reference(&self, log: &EventLog) -> SimResult<ConsensusOutput> {
        Ok(self.reference(log)?.output())
    }

    fn reference(&self, log: &EventLog) -> SimResult<Lachesis> {
        let validators =
            ValidatorSet::from(log.initial_validators(self.config.engine.field_of_view));
        let mut engine = Lachesis::new(self.config.engine.clone(), validators)?;
        engine.ingest_all(log.ordered())?;
        Ok(engine)
    }

    /// Run every validator instance over the log and check it against the reference
    pub fn run(&self, log: &EventLog) -> SimResult<SimulationReport> {
        let reference = self.reference(log)?;
        info!(
            "Reference run reached frame {} with {} decided frames",
            reference.frame(),
            reference.election().atropos_roots().len()
        );

        let mut cluster = Cluster::new(&self.config, log)?;
        for (round, records) in log.by_round() {
            cluster.step(round, records)?;
        }
        cluster.settle()?;

        Ok(cluster.report(reference.output()))
    }
}

/// State of one simulation run
struct Cluster<'a> {
    config: &'a SimConfig,
    log: &'a EventLog,
    initial: ValidatorSet,
    authors: HashMap<EventId, ValidatorId>,
    instances: BTreeMap<ValidatorId, ValidatorInstance>,
    /// Announced late joiners: activation frame and declared weight
    joiners: BTreeMap<ValidatorId, (Frame, Weight)>,
    /// First record of each late joiner seen this round, announced once the round is processed
    arrivals: BTreeMap<ValidatorId, EventRecord>,
    /// Records of joiners that have no instance yet
    pending: HashMap<EventId, EventRecord>,
    /// Requests addressed to joiners that have no instance yet
    unrouted: Vec<(ValidatorId, EventRequest)>,
    stalled: Vec<StalledEvent>,
    round: Timestamp,
}

impl<'a> Cluster<'a> {
    fn new(config: &'a SimConfig, log: &'a EventLog) -> SimResult<Self> {
        let initial = ValidatorSet::from(log.initial_validators(config.engine.field_of_view));

        let mut instances = BTreeMap::new();
        for (id, _) in initial.iter() {
            let engine = Lachesis::new(config.engine.clone(), initial.clone())?;
            instances.insert(id.clone(), ValidatorInstance::new(id.clone(), engine));
        }

        info!("Simulating {} validator instances", instances.len());
        Ok(Self {
            config,
            log,
            initial,
            authors: log.authors(),
            instances,
            joiners: BTreeMap::new(),
            arrivals: BTreeMap::new(),
            pending: HashMap::new(),
            unrouted: Vec::new(),
            stalled: Vec::new(),
            round: 0,
        })
    }

    /// One logical timestep
    fn step(&mut self, round: Timestamp, records: Vec<&EventRecord>) -> SimResult<()> {
        debug!("Round {}: delivering {} events", round, records.len());
        self.round = round;
        self.activate_joiners()?;
        self.deliver(records);
        self.request_missing();
        self.exchange();
        self.process()?;
        self.announce_arrivals();
        self.request_missing();
        self.age();
        Ok(())
    }

    /// Keep exchanging after the last round while anything is pending
    fn settle(&mut self) -> SimResult<()> {
        for _ in 0..=self.config.max_request_retries {
            if !self.has_pending() {
                break;
            }
            self.round += 1;
            self.activate_joiners()?;
            self.exchange();
            self.process()?;
            self.request_missing();
            self.age();
        }
        Ok(())
    }

    fn has_pending(&self) -> bool {
        !self.unrouted.is_empty() || self.instances.values().any(|i| i.has_pending())
    }

    /// Hand each record to its creator, or hold it if the creator has no instance
    fn deliver(&mut self, records: Vec<&EventRecord>) {
        for record in records {
            if let Some(instance) = self.instances.get_mut(&record.creator) {
                instance.defer(record.clone(), self.round);
                continue;
            }
            if !self.joiners.contains_key(&record.creator) {
                self.arrivals
                    .entry(record.creator.clone())
                    .or_insert_with(|| record.clone());
            }
            self.pending.insert(record.id.clone(), record.clone());
        }
    }

    /// Queue every late joiner that arrived this round on every instance
    fn announce_arrivals(&mut self) {
        for (joiner, record) in std::mem::take(&mut self.arrivals) {
            self.announce(&joiner, &record);
        }
    }

    /// The activation frame is one above the highest frame any instance
    /// reached with the events that precede the joiner's first record
    fn announce(&mut self, joiner: &ValidatorId, first: &EventRecord) {
        let activation = self
            .instances
            .values()
            .filter_map(|i| i.frame_before(first))
            .max()
            .unwrap_or(1)
            + 1;
        info!(
            "Announcing late joiner {} for activation at frame {}",
            joiner, activation
        );
        self.joiners
            .insert(joiner.clone(), (activation, first.weight));
        for instance in self.instances.values_mut() {
            instance
                .engine_mut()
                .queue_validator(joiner, activation, first.weight);
        }
    }

    /// Create instances for joiners whose activation frame every honest instance has reached
    fn activate_joiners(&mut self) -> SimResult<()> {
        let minimum = self
            .instances
            .values()
            .filter(|i| !i.is_cheater())
            .map(|i| i.own_frame())
            .min()
            .unwrap_or(1);

        let ready: Vec<ValidatorId> = self
            .joiners
            .iter()
            .filter(|(id, (activation, _))| !self.instances.contains_key(*id) && *activation <= minimum)
            .map(|(id, _)| id.clone())
            .collect();

        for joiner in ready {
            let mut engine = Lachesis::new(self.config.engine.clone(), self.initial.clone())?;
            for (id, (activation, weight)) in &self.joiners {
                engine.queue_validator(id, *activation, *weight);
            }
            let seen: Vec<EventRecord> = self
                .log
                .ordered()
                .into_iter()
                .filter(|r| r.timestamp < self.round)
                .collect();
            engine.ingest_all(seen)?;

            self.pending.retain(|_, r| r.creator != joiner);
            info!(
                "Instance for {} created at round {} (frame {})",
                joiner,
                self.round,
                engine.frame()
            );
            self.instances
                .insert(joiner.clone(), ValidatorInstance::new(joiner, engine));
        }
        Ok(())
    }

    fn request_missing(&mut self) {
        let requests: Vec<EventRequest> = self
            .instances
            .values_mut()
            .flat_map(|i| i.request_missing())
            .collect();
        for request in requests {
            self.route(request);
        }
    }

    /// Address a request to the author of the event
    fn route(&mut self, request: EventRequest) {
        let Some(author) = self.authors.get(&request.event).cloned() else {
            warn!(
                "Request from {} for event {} has no author",
                request.requester, request.event
            );
            if let Some(requester) = self.instances.get_mut(&request.requester) {
                requester.stats_mut().record_request_dropped();
            }
            return;
        };
        match self.instances.get_mut(&author) {
            Some(instance) => instance.push_request(request),
            None => self.unrouted.push((author, request)),
        }
    }

    /// Drain every inbox, answering what can be answered and requeueing the rest
    fn exchange(&mut self) {
        let mut work: Vec<(ValidatorId, EventRequest)> = Vec::new();
        for (id, instance) in self.instances.iter_mut() {
            work.extend(instance.take_inbox().into_iter().map(|r| (id.clone(), r)));
        }
        work.append(&mut self.unrouted);

        let mut responses = Vec::new();
        let mut unanswered = Vec::new();
        for (author, request) in work {
            let Some(requester) = self.instances.get(&request.requester) else {
                continue;
            };
            let supplied = match self.instances.get(&author) {
                Some(responder) => responder.supply(&request.event, requester),
                None => self.pending.get(&request.event).map(|r| vec![r.clone()]),
            };
            match supplied {
                Some(records) => {
                    responses.push(EventResponse::new(request.requester, author, records))
                }
                None => unanswered.push(request),
            }
        }

        for response in responses {
            if let Some(responder) = self.instances.get_mut(&response.responder) {
                responder.stats_mut().record_request_answered(response.len());
            }
            if let Some(requester) = self.instances.get_mut(&response.requester) {
                requester.receive(response, self.round);
            }
        }

        for request in unanswered {
            let Some(requester) = self.instances.get_mut(&request.requester) else {
                continue;
            };
            if request.attempts >= self.config.max_request_retries {
                warn!(
                    "Dropping request from {} for event {} after {} attempts",
                    request.requester, request.event, request.attempts
                );
                requester.stats_mut().record_request_dropped();
                requester.release(&request.event);
            } else {
                requester.stats_mut().record_request_requeued();
                self.route(request.retry());
            }
        }
    }

    fn process(&mut self) -> SimResult<()> {
        for instance in self.instances.values_mut() {
            let update = instance.process_deferred()?;
            for decision in &update.decisions {
                debug!(
                    "Instance {} decided frame {} with Atropos {}",
                    instance.id(),
                    decision.frame,
                    decision.atropos
                );
            }
        }
        Ok(())
    }

    fn age(&mut self) {
        for instance in self.instances.values_mut() {
            self.stalled
                .extend(instance.age(self.round, self.config.max_defer_rounds));
        }
    }

    fn report(self, reference: ConsensusOutput) -> SimulationReport {
        let mut conformance = ConformanceReport::new();
        let mut instances = BTreeMap::new();
        let mut stats = BTreeMap::new();

        for (id, instance) in self.instances {
            let output = instance.output();
            conformance.record(id.clone(), check_conformance(&reference, &id, &output));
            stats.insert(id.clone(), instance.stats().clone());
            instances.insert(id, output);
        }

        if conformance.is_clean() {
            info!("All {} instances conform to the reference", instances.len());
        } else {
            warn!(
                "{} conformance violations across {} instances",
                conformance.len(),
                conformance.violations.len()
            );
        }

        SimulationReport {
            reference,
            instances,
            stats,
            stalled: self.stalled,
            conformance,
        }
    }
}
