//! Logical clock for causal ordering of mutation events.
//!
//! Each session owns its own clock. Clocks of different sessions are only
//! brought together through [`LogicalClock::sync_timestamp`], never by
//! sharing a counter.

use crate::{error::Result, Error, LogicalTimestamp, SessionId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A Lamport-style logical clock.
///
/// Ordering rules:
/// 1. Higher counter wins
/// 2. If counters equal, lexicographically higher session_id wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClock {
    /// Session that owns this clock
    pub session_id: SessionId,
    /// Next value handed out by [`LogicalClock::next_timestamp`]
    pub counter: LogicalTimestamp,
}

impl LogicalClock {
    /// Create a new clock for a session, starting at counter 0.
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            counter: 0,
        }
    }

    /// Create a clock with a specific counter value.
    pub fn with_counter(session_id: impl Into<SessionId>, counter: LogicalTimestamp) -> Self {
        Self {
            session_id: session_id.into(),
            counter,
        }
    }

    /// Return the current value and advance the counter.
    ///
    /// No two calls on one clock ever return the same value.
    pub fn next_timestamp(&mut self) -> LogicalTimestamp {
        let timestamp = self.counter;
        self.counter += 1;
        timestamp
    }

    /// Move the counter past a timestamp observed from elsewhere.
    ///
    /// The counter becomes `max(counter, other) + 1`, so it advances even
    /// when `other` is behind. Negative timestamps are rejected.
    pub fn sync_timestamp(&mut self, other: i64) -> Result<()> {
        if other < 0 {
            return Err(Error::ClockRegression(other));
        }
        self.counter = self.counter.max(other as LogicalTimestamp) + 1;
        Ok(())
    }

    /// The value the next call to [`LogicalClock::next_timestamp`] returns.
    pub fn peek(&self) -> LogicalTimestamp {
        self.counter
    }

    /// Check if this clock happened before another (strict causal ordering).
    pub fn happened_before(&self, other: &LogicalClock) -> bool {
        self.counter < other.counter
    }
}

impl Ord for LogicalClock {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => self.session_id.cmp(&other.session_id),
            other => other,
        }
    }
}

impl PartialOrd for LogicalClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
