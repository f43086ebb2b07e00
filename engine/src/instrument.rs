//! Query timing.
//!
//! A [`QueryTimer`] is constructed explicitly and shared by `Arc`; nothing in
//! the engine reaches for a global. Timings are kept in bounded ring buffers
//! so a long-running process never grows without limit.

use crate::{config, value::Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Which store a query ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryTarget {
    Durable,
    Replica,
}

/// One timed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTiming {
    pub sql: String,
    pub params: Vec<Value>,
    pub target: QueryTarget,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    /// Whether the statement succeeded
    pub ok: bool,
}

/// One timed internal phase (export, replica load, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTiming {
    pub name: String,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

/// Aggregate over the retained query timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub total: usize,
    pub total_time: Duration,
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
    pub slowest_query: Option<String>,
    pub fastest_query: Option<String>,
}

#[derive(Debug, Default)]
struct Buffers {
    queries: VecDeque<QueryTiming>,
    phases: VecDeque<PhaseTiming>,
}

/// Bounded recorder of query and phase timings.
#[derive(Debug)]
pub struct QueryTimer {
    capacity: usize,
    slow_threshold: Duration,
    buffers: Mutex<Buffers>,
}

impl Default for QueryTimer {
    fn default() -> Self {
        Self::new(
            config::DEFAULT_TIMER_CAPACITY,
            config::DEFAULT_SLOW_QUERY_THRESHOLD,
        )
    }
}

impl QueryTimer {
    pub fn new(capacity: usize, slow_threshold: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            slow_threshold,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    /// Run `f` and record how long it took.
    pub fn time<T, E>(
        &self,
        target: QueryTarget,
        sql: &str,
        params: &[Value],
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let started_at = Utc::now();
        let start = Instant::now();
        let result = f();
        self.record(target, sql, params, start.elapsed(), started_at, result.is_ok());
        result
    }

    /// Await `fut` and record how long it took.
    pub async fn time_async<T, E>(
        &self,
        target: QueryTarget,
        sql: &str,
        params: &[Value],
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let started_at = Utc::now();
        let start = Instant::now();
        let result = fut.await;
        self.record(target, sql, params, start.elapsed(), started_at, result.is_ok());
        result
    }

    /// Await `fut` and record it as a named phase.
    pub async fn measure<T>(&self, name: &str, fut: impl Future<Output = T>) -> T {
        let started_at = Utc::now();
        let start = Instant::now();
        let output = fut.await;
        let duration = start.elapsed();

        tracing::debug!(phase = name, ?duration, "Phase finished");
        if let Ok(mut buffers) = self.buffers.lock() {
            push_bounded(
                &mut buffers.phases,
                self.capacity,
                PhaseTiming {
                    name: name.to_string(),
                    duration,
                    started_at,
                },
            );
        }
        output
    }

    fn record(
        &self,
        target: QueryTarget,
        sql: &str,
        params: &[Value],
        duration: Duration,
        started_at: DateTime<Utc>,
        ok: bool,
    ) {
        if duration > self.slow_threshold {
            tracing::warn!(sql, ?target, ?duration, "Slow query");
        }

        // A poisoned buffer only loses timings.
        if let Ok(mut buffers) = self.buffers.lock() {
            push_bounded(
                &mut buffers.queries,
                self.capacity,
                QueryTiming {
                    sql: sql.to_string(),
                    params: params.to_vec(),
                    target,
                    duration,
                    started_at,
                    ok,
                },
            );
        }
    }

    /// Aggregate statistics over the retained timings.
    pub fn stats(&self) -> QueryStats {
        let Ok(buffers) = self.buffers.lock() else {
            return QueryStats::default();
        };
        let queries = &buffers.queries;
        if queries.is_empty() {
            return QueryStats::default();
        }

        let total_time: Duration = queries.iter().map(|q| q.duration).sum();
        let slowest = queries.iter().max_by_key(|q| q.duration);
        let fastest = queries.iter().min_by_key(|q| q.duration);

        QueryStats {
            total: queries.len(),
            total_time,
            average: total_time / queries.len() as u32,
            min: fastest.map(|q| q.duration).unwrap_or_default(),
            max: slowest.map(|q| q.duration).unwrap_or_default(),
            slowest_query: slowest.map(|q| q.sql.clone()),
            fastest_query: fastest.map(|q| q.sql.clone()),
        }
    }

    /// The `count` most recent timings, newest first.
    pub fn recent(&self, count: usize) -> Vec<QueryTiming> {
        self.buffers
            .lock()
            .map(|b| b.queries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default()
    }

    /// Timings slower than `threshold`, slowest first.
    pub fn slow_queries(&self, threshold: Duration) -> Vec<QueryTiming> {
        let mut slow: Vec<_> = self
            .buffers
            .lock()
            .map(|b| {
                b.queries
                    .iter()
                    .filter(|q| q.duration > threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        slow.sort_by(|a, b| b.duration.cmp(&a.duration));
        slow
    }

    /// Recorded phases, oldest first.
    pub fn phases(&self) -> Vec<PhaseTiming> {
        self.buffers
            .lock()
            .map(|b| b.phases.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.queries.clear();
            buffers.phases.clear();
        }
    }

    /// Log the current aggregate at info level.
    pub fn log_summary(&self) {
        let stats = self.stats();
        tracing::info!(
            total = stats.total,
            total_time = ?stats.total_time,
            average = ?stats.average,
            min = ?stats.min,
            max = ?stats.max,
            slowest = stats.slowest_query.as_deref().unwrap_or("-"),
            "Query timing summary"
        );
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, capacity: usize, item: T) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_fixed(timer: &QueryTimer, sql: &str, millis: u64) {
        timer.record(
            QueryTarget::Replica,
            sql,
            &[],
            Duration::from_millis(millis),
            Utc::now(),
            true,
        );
    }

    #[test]
    fn stats_over_recorded_timings() {
        let timer = QueryTimer::default();
        assert_eq!(timer.stats(), QueryStats::default());

        record_fixed(&timer, "fast", 1);
        record_fixed(&timer, "slow", 9);
        record_fixed(&timer, "mid", 5);

        let stats = timer.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.total_time, Duration::from_millis(15));
        assert_eq!(stats.average, Duration::from_millis(5));
        assert_eq!(stats.min, Duration::from_millis(1));
        assert_eq!(stats.max, Duration::from_millis(9));
        assert_eq!(stats.slowest_query.as_deref(), Some("slow"));
        assert_eq!(stats.fastest_query.as_deref(), Some("fast"));
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let timer = QueryTimer::new(2, Duration::from_secs(1));
        record_fixed(&timer, "a", 1);
        record_fixed(&timer, "b", 1);
        record_fixed(&timer, "c", 1);

        let recent: Vec<_> = timer.recent(10).into_iter().map(|q| q.sql).collect();
        assert_eq!(recent, vec!["c", "b"]);
    }

    #[test]
    fn slow_queries_sorted_slowest_first() {
        let timer = QueryTimer::default();
        record_fixed(&timer, "a", 150);
        record_fixed(&timer, "b", 20);
        record_fixed(&timer, "c", 300);

        let slow: Vec<_> = timer
            .slow_queries(Duration::from_millis(100))
            .into_iter()
            .map(|q| q.sql)
            .collect();
        assert_eq!(slow, vec!["c", "a"]);

        timer.clear();
        assert!(timer.recent(10).is_empty());
    }

    #[test]
    fn time_records_outcome() {
        let timer = QueryTimer::default();
        let ok: Result<i32, ()> = timer.time(QueryTarget::Durable, "SELECT 1", &[], || Ok(1));
        let err: Result<i32, ()> = timer.time(QueryTarget::Durable, "SELECT x", &[], || Err(()));
        assert_eq!(ok, Ok(1));
        assert!(err.is_err());

        let recent = timer.recent(2);
        assert!(!recent[0].ok);
        assert!(recent[1].ok);
        assert_eq!(recent[1].target, QueryTarget::Durable);
    }

    #[tokio::test]
    async fn measure_records_phase() {
        let timer = QueryTimer::default();
        let value = timer.measure("export-state", async { 7 }).await;
        assert_eq!(value, 7);

        let result: Result<(), ()> = timer
            .time_async(QueryTarget::Replica, "SELECT 1", &[], async { Ok(()) })
            .await;
        assert!(result.is_ok());

        let phases = timer.phases();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].name, "export-state");
        assert_eq!(timer.stats().total, 1);
    }
}
