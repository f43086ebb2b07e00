//! Engine configuration.

use crate::SessionId;
use std::path::PathBuf;
use std::time::Duration;

/// Default capacity of the query timing ring buffer.
pub const DEFAULT_TIMER_CAPACITY: usize = 1000;

/// Default threshold above which a query is logged as slow.
pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(100);

/// How the durable store is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableConfig {
    /// Database file; `None` keeps the durable store in memory
    pub path: Option<PathBuf>,
    /// Enforce foreign keys (also applied to replicas)
    pub foreign_keys: bool,
    /// How long SQLite waits on a locked database file
    pub busy_timeout: Duration,
    /// Bound of the worker's request queue
    pub queue_capacity: usize,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            path: None,
            foreign_keys: true,
            busy_timeout: Duration::from_secs(5),
            queue_capacity: 64,
        }
    }
}

impl DurableConfig {
    /// File-backed durable store at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Configuration for a [`LocalDb`](crate::LocalDb).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub durable: DurableConfig,
    /// Session that stamps mutation events
    pub session_id: SessionId,
    pub timer_capacity: usize,
    pub slow_query_threshold: Duration,
    /// Oldest snapshots are discarded beyond this many
    pub max_snapshots: Option<usize>,
    /// Oldest events are pruned beyond this many
    pub event_log_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            durable: DurableConfig::default(),
            session_id: uuid::Uuid::new_v4().to_string(),
            timer_capacity: DEFAULT_TIMER_CAPACITY,
            slow_query_threshold: DEFAULT_SLOW_QUERY_THRESHOLD,
            max_snapshots: None,
            event_log_capacity: None,
        }
    }
}

impl EngineConfig {
    /// In-memory durable store with defaults.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.durable.path = Some(path.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.durable.foreign_keys = enabled;
        self
    }

    pub fn with_timer_capacity(mut self, capacity: usize) -> Self {
        self.timer_capacity = capacity;
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = Some(max.max(1));
        self
    }

    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = Some(capacity);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert!(config.durable.path.is_none());
        assert!(config.durable.foreign_keys);
        assert_eq!(config.timer_capacity, 1000);
        assert_eq!(config.slow_query_threshold, Duration::from_millis(100));
        assert!(config.max_snapshots.is_none());
        assert!(!config.session_id.is_empty());
        assert_ne!(config.session_id, EngineConfig::default().session_id);
    }

    #[test]
    fn builders() {
        let config = EngineConfig::in_memory()
            .with_path("/tmp/tandem.db")
            .with_session_id("session-1")
            .with_max_snapshots(0)
            .with_event_log_capacity(10);

        assert_eq!(config.durable.path, Some(PathBuf::from("/tmp/tandem.db")));
        assert_eq!(config.session_id, "session-1");
        assert_eq!(config.max_snapshots, Some(1));
        assert_eq!(config.event_log_capacity, Some(10));
    }
}
