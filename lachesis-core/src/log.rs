//! Event log: the ordered input collection handed to the engines

use crate::{CoreError, CoreResult, EventId, EventRecord, Timestamp, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

/// An ordered collection of parsed event records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    /// Build a log, rejecting malformed records and duplicate ids
    pub fn new(records: Vec<EventRecord>) -> CoreResult<Self> {
        let mut ids = HashSet::with_capacity(records.len());
        for record in &records {
            record.validate()?;
            if !ids.insert(&record.id) {
                return Err(CoreError::DuplicateEvent(record.id.to_string()));
            }
        }
        Ok(Self { records })
    }

    /// Parse a log from a JSON array of records
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let records: Vec<EventRecord> = serde_json::from_str(json)?;
        Self::new(records)
    }

    /// Load a log from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Save the log to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let content = serde_json::to_string_pretty(&self.records)?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// All records in input order
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records grouped by timestamp, each round ordered by (creator, seq, id)
    pub fn by_round(&self) -> BTreeMap<Timestamp, Vec<&EventRecord>> {
        let mut rounds: BTreeMap<Timestamp, Vec<&EventRecord>> = BTreeMap::new();
        for record in &self.records {
            rounds.entry(record.timestamp).or_default().push(record);
        }
        for round in rounds.values_mut() {
            round.sort_by(|a, b| {
                (&a.creator, a.seq, &a.id).cmp(&(&b.creator, b.seq, &b.id))
            });
        }
        rounds
    }

    /// Records in processing order: by round, then by validator id
    pub fn ordered(&self) -> Vec<EventRecord> {
        self.by_round()
            .into_values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Validators visible within the field of view, with their declared weight
    ///
    /// The first record seen for a validator (in processing order) fixes its weight.
    pub fn initial_validators(&self, field_of_view: Timestamp) -> BTreeMap<ValidatorId, Weight> {
        let mut validators = BTreeMap::new();
        for record in self.ordered() {
            if record.timestamp <= field_of_view {
                validators.entry(record.creator).or_insert(record.weight);
            }
        }
        validators
    }

    /// Map from event id to the validator which authored it
    pub fn authors(&self) -> HashMap<EventId, ValidatorId> {
        self.records
            .iter()
            .map(|r| (r.id.clone(), r.creator.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_log() -> EventLog {
        EventLog::new(vec![
            EventRecord::new("b1", "B", 1, 1, 2),
            EventRecord::new("a1", "A", 1, 1, 1),
            EventRecord::new("a2", "A", 2, 2, 1).with_parents(["a1", "b1"]),
            EventRecord::new("c1", "C", 7, 1, 3).with_parents(["a2"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_rounds_are_sorted_by_validator() {
        let log = sample_log();
        let rounds = log.by_round();
        assert_eq!(rounds.len(), 3);

        let first: Vec<_> = rounds[&1].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(first, vec!["a1", "b1"]);
    }

    #[test]
    fn test_initial_validators_respect_field_of_view() {
        let log = sample_log();
        let validators = log.initial_validators(5);
        assert_eq!(validators.len(), 2);
        assert_eq!(validators[&ValidatorId::from("B")], 2);
        assert!(!validators.contains_key(&ValidatorId::from("C")));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = EventLog::new(vec![
            EventRecord::new("a1", "A", 1, 1, 1),
            EventRecord::new("a1", "A", 2, 2, 1),
        ]);
        assert!(matches!(result, Err(CoreError::DuplicateEvent(_))));
    }

    #[test]
    fn test_file_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");

        let log = sample_log();
        log.save_to_file(&path).unwrap();

        let loaded = EventLog::load_from_file(&path).unwrap();
        assert_eq!(loaded, log);
        assert_eq!(loaded.authors()[&EventId::from("c1")], ValidatorId::from("C"));
    }
}
