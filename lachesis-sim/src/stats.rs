//! Per-instance synchronization counters

use serde::{Deserialize, Serialize};

/// Request/defer statistics of one simulated validator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Number of requests sent for missing parents
    pub requests_sent: u64,
    /// Number of requests this instance answered
    pub requests_answered: u64,
    /// Number of requests requeued because the author could not answer yet
    pub requests_requeued: u64,
    /// Number of requests abandoned after the retry budget
    pub requests_dropped: u64,
    /// Number of records supplied to other instances
    pub events_supplied: u64,
    /// Number of records received from other instances
    pub events_received: u64,
    /// Number of events admitted by the local engine
    pub events_admitted: u64,
    /// Number of deferred events reported stalled
    pub stalled_defers: u64,
}

impl SyncStats {
    /// Create new sync statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sent request
    pub fn record_request_sent(&mut self) {
        self.requests_sent += 1;
    }

    /// Record an answered request and the records it carried
    pub fn record_request_answered(&mut self, supplied: usize) {
        self.requests_answered += 1;
        self.events_supplied += supplied as u64;
    }

    pub fn record_request_requeued(&mut self) {
        self.requests_requeued += 1;
    }

    pub fn record_request_dropped(&mut self) {
        self.requests_dropped += 1;
    }

    /// Record records received in a response
    pub fn record_events_received(&mut self, count: usize) {
        self.events_received += count as u64;
    }

    pub fn record_admitted(&mut self) {
        self.events_admitted += 1;
    }

    pub fn record_stalled(&mut self) {
        self.stalled_defers += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_stats() {
        let mut stats = SyncStats::new();

        stats.record_request_sent();
        stats.record_request_answered(3);
        stats.record_events_received(2);
        stats.record_admitted();

        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.requests_answered, 1);
        assert_eq!(stats.events_supplied, 3);
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.events_admitted, 1);
        assert_eq!(stats.requests_dropped, 0);
    }
}
