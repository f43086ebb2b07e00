//! Mutation events and the append-ordered event log.
//!
//! Every committed write against the optimistic replica becomes a
//! [`MutationEvent`] stamped by the session's [`LogicalClock`]. The log is
//! the input a future peer reconciliation layer would consume; it only
//! guarantees that append order matches logical timestamp order.

use crate::{error::Result, LogicalClock, LogicalTimestamp, SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Unique identifier for an event.
pub type EventId = String;

/// Discriminator carried in the serialized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Mutation,
}

/// A stamped record of one committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    /// Event ID (uuid v4)
    pub id: EventId,
    /// Always [`EventKind::Mutation`]
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Assigned by the logical clock at commit time
    pub logical_timestamp: LogicalTimestamp,
    /// Wall clock in milliseconds since epoch, advisory only
    pub physical_timestamp: Timestamp,
    /// Session whose clock stamped the event
    pub session_id: SessionId,
    /// Serialized effect of the statement or transaction
    pub payload: String,
}

impl MutationEvent {
    /// Create an event with an explicit stamp.
    pub fn new(
        logical_timestamp: LogicalTimestamp,
        physical_timestamp: Timestamp,
        session_id: impl Into<SessionId>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: EventKind::Mutation,
            logical_timestamp,
            physical_timestamp,
            session_id: session_id.into(),
            payload: payload.into(),
        }
    }
}

/// Ordered, prunable log of mutation events for one session.
#[derive(Debug, Clone)]
pub struct EventLog {
    clock: LogicalClock,
    events: VecDeque<MutationEvent>,
    capacity: Option<usize>,
}

impl EventLog {
    /// Create an empty, unbounded log with a fresh clock.
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self::with_clock(LogicalClock::new(session_id))
    }

    /// Create an empty log stamping with an existing clock.
    pub fn with_clock(clock: LogicalClock) -> Self {
        Self {
            clock,
            events: VecDeque::new(),
            capacity: None,
        }
    }

    /// Keep at most `capacity` events; the oldest are pruned first.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    /// Stamp and append a new event.
    pub fn record(&mut self, payload: impl Into<String>) -> MutationEvent {
        let logical_timestamp = self.clock.next_timestamp();
        let physical_timestamp = chrono::Utc::now().timestamp_millis().max(0) as Timestamp;
        let event = MutationEvent::new(
            logical_timestamp,
            physical_timestamp,
            self.clock.session_id.clone(),
            payload,
        );

        self.events.push_back(event.clone());
        if let Some(capacity) = self.capacity {
            while self.events.len() > capacity {
                self.events.pop_front();
            }
        }

        tracing::trace!(
            logical_timestamp,
            session_id = %event.session_id,
            "Recorded mutation event"
        );

        event
    }

    /// Advance the log's clock past a timestamp observed from a peer.
    pub fn sync_clock(&mut self, remote: i64) -> Result<()> {
        self.clock.sync_timestamp(remote)
    }

    /// The clock used for stamping.
    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    /// All retained events in append order.
    pub fn events(&self) -> impl Iterator<Item = &MutationEvent> {
        self.events.iter()
    }

    /// Events with a logical timestamp strictly greater than `after`.
    pub fn since(&self, after: LogicalTimestamp) -> Vec<MutationEvent> {
        // Append order equals timestamp order, so binary search is valid.
        let start = self
            .events
            .partition_point(|event| event.logical_timestamp <= after);
        self.events.range(start..).cloned().collect()
    }

    /// Drop every event with a logical timestamp `<= through`.
    ///
    /// Returns the number of events removed.
    pub fn prune_through(&mut self, through: LogicalTimestamp) -> usize {
        let cut = self
            .events
            .partition_point(|event| event.logical_timestamp <= through);
        self.events.drain(..cut).count()
    }

    /// Remove and return all retained events.
    pub fn drain(&mut self) -> Vec<MutationEvent> {
        self.events.drain(..).collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stamps_in_append_order() {
        let mut log = EventLog::new("session-1");
        let first = log.record("a");
        let second = log.record("b");

        assert_eq!(first.logical_timestamp, 0);
        assert_eq!(second.logical_timestamp, 1);
        assert_eq!(first.session_id, "session-1");
        assert_ne!(first.id, second.id);

        let stamps: Vec<_> = log.events().map(|e| e.logical_timestamp).collect();
        assert_eq!(stamps, vec![0, 1]);
    }

    #[test]
    fn sync_clock_moves_future_stamps_forward() {
        let mut log = EventLog::new("session-1");
        log.record("a");
        log.sync_clock(41).unwrap();
        assert_eq!(log.record("b").logical_timestamp, 42);
        assert!(log.sync_clock(-1).is_err());
    }

    #[test]
    fn since_and_prune() {
        let mut log = EventLog::new("session-1");
        for i in 0..5 {
            log.record(format!("payload-{i}"));
        }

        let tail = log.since(2);
        assert_eq!(
            tail.iter().map(|e| e.logical_timestamp).collect::<Vec<_>>(),
            vec![3, 4]
        );

        assert_eq!(log.prune_through(1), 2);
        assert_eq!(log.len(), 3);
        assert_eq!(log.events().next().unwrap().logical_timestamp, 2);

        assert_eq!(log.drain().len(), 3);
        assert!(log.is_empty());
    }

    #[test]
    fn capacity_prunes_oldest() {
        let mut log = EventLog::new("session-1").with_capacity(2);
        log.record("a");
        log.record("b");
        log.record("c");

        let payloads: Vec<_> = log.events().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, vec!["b", "c"]);
    }

    #[test]
    fn serialization_format() {
        let event = MutationEvent::new(7, 1706745600000, "session-1", "{}");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "mutation");
        assert_eq!(json["logicalTimestamp"], 7);
        assert_eq!(json["physicalTimestamp"], 1706745600000u64);
        assert_eq!(json["sessionId"], "session-1");
        assert_eq!(json["payload"], "{}");
        assert!(json["id"].is_string());

        let parsed: MutationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
