//! Multi-validator simulation scenarios
//!
//! Every instance must lag or agree with the full-information reference,
//! never contradict it.

use lachesis_consensus::{EngineConfig, Lachesis, ValidatorSet};
use lachesis_core::{EventId, EventLog, EventRecord, Timestamp, ValidatorId, Weight};
use lachesis_sim::{SimConfig, SimError, SimulationReport, Simulator};
use std::collections::BTreeMap;
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

// ── Helpers ─────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn id(validator: &str, round: Timestamp) -> String {
    format!("{}{}", validator.to_lowercase(), round)
}

fn v(validator: &str) -> ValidatorId {
    ValidatorId::from(validator)
}

fn e(event: &str) -> EventId {
    EventId::from(event)
}

/// One event per validator per round, citing every event of the previous round
fn full_mesh(validators: &[(&str, Weight)], rounds: Timestamp) -> Vec<EventRecord> {
    let mut records = Vec::new();
    for round in 1..=rounds {
        for (validator, weight) in validators {
            let parents: Vec<String> = if round == 1 {
                Vec::new()
            } else {
                validators
                    .iter()
                    .map(|(other, _)| id(other, round - 1))
                    .collect()
            };
            records.push(
                EventRecord::new(id(validator, round), *validator, round, round, *weight)
                    .with_parents(parents),
            );
        }
    }
    records
}

fn simulate(config: SimConfig, records: Vec<EventRecord>) -> SimulationReport {
    init_tracing();
    let log = EventLog::new(records).unwrap();
    Simulator::new(config).unwrap().run(&log).unwrap()
}

const FOUR: [(&str, Weight); 4] = [("A", 1), ("B", 1), ("C", 1), ("D", 1)];

// ── Scenarios ───────────────────────────────────────────────────────────

#[test]
fn test_full_mesh_instances_agree_with_reference() {
    let report = simulate(SimConfig::default(), full_mesh(&FOUR, 9));

    assert!(report.is_clean(), "{:?}", report.conformance);
    assert!(report.stalled.is_empty());
    assert_eq!(report.reference.frame, 5);
    assert_eq!(report.reference.decided_frames(), 3);

    assert_eq!(report.instances.len(), 4);
    for (validator, output) in &report.instances {
        // Each instance misses only the other validators' last events
        assert_eq!(output.events.len(), 33, "instance {}", validator);
        assert_eq!(output.frame, 5);
        assert_eq!(output.frame_to_decide, 4);
        assert_eq!(output.atropos_roots, report.reference.atropos_roots);
    }

    let stats = &report.stats[&v("A")];
    assert_eq!(stats.requests_sent, 24);
    assert_eq!(stats.requests_answered, 24);
    assert_eq!(stats.events_admitted, 33);
    assert_eq!(stats.requests_dropped, 0);
}

#[test]
fn test_reference_matches_single_engine() {
    let records = full_mesh(&FOUR, 6);
    let log = EventLog::new(records.clone()).unwrap();
    let simulator = Simulator::new(SimConfig::default()).unwrap();

    let set: ValidatorSet = FOUR.iter().map(|(id, w)| (v(id), *w)).collect();
    let mut lachesis = Lachesis::new(EngineConfig::default(), set).unwrap();
    lachesis.ingest_all(log.ordered()).unwrap();

    assert_eq!(simulator.run_reference(&log).unwrap(), lachesis.output());
}

#[test]
fn test_equivocator_detected_by_every_instance() {
    let mut records = full_mesh(&FOUR, 4);
    let round_four = ["a4", "b4", "c4", "d4"];
    records.push(EventRecord::new("a5", "A", 5, 5, 1).with_parents(round_four));
    records.push(EventRecord::new("a5x", "A", 5, 5, 1).with_parents(round_four));
    for other in ["B", "C", "D"] {
        records.push(EventRecord::new(id(other, 5), other, 5, 5, 1).with_parents(round_four));
    }

    // Honest validators cite both variants once, then carry on without A
    let honest = ["B", "C", "D"];
    for round in 6..=9 {
        for validator in honest {
            let mut parents: Vec<String> = honest.iter().map(|o| id(o, round - 1)).collect();
            if round == 6 {
                parents.extend(["a5".to_string(), "a5x".to_string()]);
            }
            records.push(
                EventRecord::new(id(validator, round), validator, round, round, 1)
                    .with_parents(parents),
            );
        }
    }

    let report = simulate(SimConfig::default(), records);

    assert!(report.is_clean(), "{:?}", report.conformance);
    assert!(report.reference.cheaters.contains(&v("A")));
    assert_eq!(report.reference.atropos(1), Some(&e("a1")));
    for output in report.instances.values() {
        assert!(output.cheaters.contains(&v("A")));
        assert!(output
            .root_set_validators
            .values()
            .all(|validators| !validators.contains(&v("A"))));
    }
}

#[test]
fn test_late_joiner_gets_an_instance() {
    let validators = [("A", 2), ("B", 2), ("C", 2)];
    let mut records = full_mesh(&validators, 9);
    records.push(EventRecord::new("d1", "D", 3, 1, 2).with_parents(["a2", "b2", "c2"]));
    for seq in 2..=7 {
        let round = seq + 2;
        let mut parents = vec![id("D", seq - 1)];
        parents.extend(["A", "B", "C"].iter().map(|o| id(o, round - 1)));
        records.push(
            EventRecord::new(id("D", seq), "D", round, seq, 2).with_parents(parents),
        );
    }

    let config = SimConfig::new(EngineConfig::new(2));
    let report = simulate(config, records);

    assert!(report.is_clean(), "{:?}", report.conformance);
    assert!(report.stalled.is_empty());
    assert_eq!(report.reference.active_validators.get(&v("D")), Some(&3));

    let joiner = report.instance(&v("D")).unwrap();
    assert!(joiner.events.contains(&e("d1")));
    assert!(joiner.events.contains(&e("d7")));
    assert_eq!(joiner.root_of(3, &v("D")), Some(&e("d1")));
    assert_eq!(report.reference.root_of(3, &v("D")), Some(&e("d1")));

    for validator in ["A", "B", "C"] {
        let output = report.instance(&v(validator)).unwrap();
        assert_eq!(output.active_validators.get(&v("D")), Some(&3));
        assert!(!output.events.contains(&e("d1")));
    }
}

#[test]
fn test_request_for_pending_joiner_answered_from_buffer() {
    let records = vec![
        EventRecord::new("a1", "A", 1, 1, 1),
        EventRecord::new("b1", "B", 1, 1, 1),
        EventRecord::new("d1", "D", 2, 1, 1).with_parents(["a1"]),
        EventRecord::new("a2", "A", 3, 2, 1).with_parents(["a1", "d1"]),
    ];
    let report = simulate(SimConfig::new(EngineConfig::new(1)), records);

    assert!(report.is_clean(), "{:?}", report.conformance);
    assert_eq!(
        report.instances.keys().cloned().collect::<Vec<_>>(),
        vec![v("A"), v("B")]
    );

    let a = &report.instances[&v("A")];
    assert!(a.events.contains(&e("a2")));
    // d1 stays buffered until D is activated
    assert!(!a.events.contains(&e("d1")));

    let stats = &report.stats[&v("A")];
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.events_received, 1);
    assert_eq!(stats.requests_dropped, 0);
    assert!(report.stalled.is_empty());
}

#[test]
fn test_unknown_parent_rejected() {
    let records = vec![
        EventRecord::new("a1", "A", 1, 1, 1),
        EventRecord::new("a2", "A", 2, 2, 1).with_parents(["a1", "x1"]),
    ];
    let log = EventLog::new(records).unwrap();
    let result = Simulator::new(SimConfig::default()).unwrap().run(&log);
    assert!(matches!(result, Err(SimError::Consensus(_))));
}

#[test]
fn test_report_saved_as_json() {
    let report = simulate(SimConfig::default(), full_mesh(&FOUR, 3));

    let dir = tempdir().unwrap();
    let path = dir.path().join("report.json");
    report.save_to_file(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let decoded: SimulationReport = serde_json::from_str(&content).unwrap();
    assert_eq!(decoded, report);

    let frames: BTreeMap<_, _> = decoded
        .instances
        .iter()
        .map(|(id, output)| (id.clone(), output.frame))
        .collect();
    assert!(frames.values().all(|frame| *frame == 2));
}
