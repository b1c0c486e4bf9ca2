//! Request/response messages exchanged between simulated validators

use lachesis_core::{EventId, EventRecord, ValidatorId};
use serde::{Deserialize, Serialize};

/// Ask the author of an event for it and the ancestry the requester lacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRequest {
    /// Instance that needs the event
    pub requester: ValidatorId,
    /// Missing event
    pub event: EventId,
    /// Times this request has already gone unanswered
    pub attempts: u32,
}

impl EventRequest {
    pub fn new(requester: ValidatorId, event: EventId) -> Self {
        Self {
            requester,
            event,
            attempts: 0,
        }
    }

    /// The same request, requeued after going unanswered
    pub fn retry(mut self) -> Self {
        self.attempts += 1;
        self
    }
}

/// Records supplied in answer to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResponse {
    /// Instance the records are for
    pub requester: ValidatorId,
    /// Instance that answered
    pub responder: ValidatorId,
    /// Requested event and its missing ancestors, in admission order
    pub records: Vec<EventRecord>,
}

impl EventResponse {
    pub fn new(requester: ValidatorId, responder: ValidatorId, records: Vec<EventRecord>) -> Self {
        Self {
            requester,
            responder,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
