//! [`LocalDb`]: the durable store, the active replica, live queries,
//! snapshots and the event log behind one handle.
//!
//! Lock order is swap lock, then foreground lock, then the active pointer,
//! then a replica's handle, then the event log. Reads take only the active
//! pointer and the replica handle.

use crate::{
    config::EngineConfig,
    durable::DurableStore,
    error::{Error, Result},
    event::{EventLog, MutationEvent},
    handle::{HandleState, Transaction},
    instrument::{QueryTarget, QueryTimer},
    live::{ChannelSubscriber, FnSubscriber, LiveQuery, LiveQueryEngine, LiveUpdate, Subscriber, SubscriptionId},
    replica::{ActiveReplica, OptimisticReplica, ReplicaBuilder, ReplicaId, ReplicaSource},
    rows::RowSet,
    snapshot::{Snapshot, SnapshotId, SnapshotInfo, SnapshotManager},
    sql::{self, Statement, StatementKind},
    value::Value,
    LogicalClock, LogicalTimestamp,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// State serialized by the foreground lock.
#[derive(Debug, Default)]
struct Foreground {
    live: LiveQueryEngine,
    /// Writes inside an explicit `BEGIN` on the replica, not yet committed
    pending: Vec<Statement>,
}

/// Result of a restore: the installed replica and the snapshot it came
/// from, `None` when it was rebuilt from the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub replica: ReplicaId,
    pub snapshot: Option<SnapshotId>,
}

/// A local-first database session.
#[derive(Debug)]
pub struct LocalDb {
    config: EngineConfig,
    durable: DurableStore,
    builder: ReplicaBuilder,
    active: ActiveReplica,
    foreground: tokio::sync::Mutex<Foreground>,
    events: Mutex<EventLog>,
    snapshots: Mutex<SnapshotManager>,
    swap_lock: tokio::sync::Mutex<()>,
    timer: Arc<QueryTimer>,
}

impl LocalDb {
    /// Open the durable store and build the initial replica from it.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let timer = Arc::new(QueryTimer::new(
            config.timer_capacity,
            config.slow_query_threshold,
        ));
        Self::open_with(config, timer).await
    }

    /// Like [`LocalDb::open`], recording timings into a caller-owned timer.
    pub async fn open_with(config: EngineConfig, timer: Arc<QueryTimer>) -> Result<Self> {
        let durable = DurableStore::open(config.durable.clone())?;
        durable.wait_ready().await?;

        let builder = ReplicaBuilder::new(Arc::clone(&timer), config.durable.foreign_keys);
        let initial = builder.build(ReplicaSource::Durable(&durable)).await?;

        let mut events = EventLog::new(config.session_id.clone());
        if let Some(capacity) = config.event_log_capacity {
            events = events.with_capacity(capacity);
        }

        tracing::info!(
            session_id = %config.session_id,
            replica = %initial.id(),
            path = ?config.durable.path,
            "Local database opened"
        );

        Ok(Self {
            snapshots: Mutex::new(SnapshotManager::new(config.max_snapshots)),
            config,
            durable,
            builder,
            active: ActiveReplica::new(initial),
            foreground: tokio::sync::Mutex::new(Foreground::default()),
            events: Mutex::new(events),
            swap_lock: tokio::sync::Mutex::new(()),
            timer,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn timer(&self) -> &Arc<QueryTimer> {
        &self.timer
    }

    /// The durable store, for direct access.
    pub fn durable(&self) -> &DurableStore {
        &self.durable
    }

    pub fn durable_state(&self) -> HandleState {
        self.durable.state()
    }

    /// The replica active right now.
    pub fn active_replica(&self) -> Arc<OptimisticReplica> {
        self.active.load()
    }

    pub fn active_replica_id(&self) -> ReplicaId {
        self.active.load().id()
    }

    // ------------------------------------------------------------------
    // Replica statements
    // ------------------------------------------------------------------

    /// Run a statement against the active replica.
    ///
    /// Reads go straight to the replica. Anything else is serialized with
    /// other writes and re-evaluates live queries once committed.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        match sql::classify(sql) {
            StatementKind::Read => {
                let replica = self.active.load();
                self.timer
                    .time(QueryTarget::Replica, sql, params, || replica.query(sql, params))
            }
            kind => self.write(sql, params, kind).await,
        }
    }

    /// Run a statement against the active replica, returning the number of
    /// rows it changed.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.query(sql, params)
            .await
            .map(|rows| rows.rows_affected)
    }

    /// Run a batch of statements against the active replica. Batches are
    /// serialized with writes; only transaction control is left out of the
    /// event log.
    ///
    /// Statements before a failing one stay applied, so a failed batch that
    /// changed rows is still recorded and still invalidates live queries.
    pub async fn exec(&self, sql: &str) -> Result<()> {
        let mut foreground = self.foreground.lock().await;
        let replica = self.active.load();
        let changes_before = replica.total_changes()?;
        let result = self
            .timer
            .time(QueryTarget::Replica, sql, &[], || replica.exec(sql));
        let applied = match &result {
            Ok(()) => true,
            Err(_) => replica.total_changes()? > changes_before,
        };
        if result.is_err() && applied {
            tracing::warn!(sql, "batch failed after changing rows");
        }
        let single_control = sql::classify(sql) == StatementKind::Control
            && !sql.trim().trim_end_matches(';').contains(';');
        let is_write = !single_control;
        self.settle(
            &mut foreground,
            &replica,
            Statement::bare(sql),
            is_write,
            applied,
        )?;
        result
    }

    /// Run `f` inside one transaction on the active replica.
    pub async fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut foreground = self.foreground.lock().await;
        let replica = self.active.load();
        let (value, statements) = self
            .timer
            .time(QueryTarget::Replica, "TRANSACTION", &[], || {
                replica.transaction_recorded(f)
            })?;

        if !statements.is_empty() {
            self.record_event(&statements);
            foreground.live.invalidate(&replica);
        }
        Ok(value)
    }

    async fn write(&self, sql: &str, params: &[Value], kind: StatementKind) -> Result<RowSet> {
        let mut foreground = self.foreground.lock().await;
        let replica = self.active.load();
        let result = self
            .timer
            .time(QueryTarget::Replica, sql, params, || replica.query(sql, params));
        let statement = Statement::new(sql, params.to_vec());
        self.settle(
            &mut foreground,
            &replica,
            statement,
            kind == StatementKind::Write,
            result.is_ok(),
        )?;
        result
    }

    /// Record and invalidate after a statement, unless the replica is still
    /// inside an explicit transaction.
    fn settle(
        &self,
        foreground: &mut Foreground,
        replica: &OptimisticReplica,
        statement: Statement,
        is_write: bool,
        applied: bool,
    ) -> Result<()> {
        let in_transaction = replica.in_transaction()?;
        let rolled_back = sql::keyword(&statement.sql) == "ROLLBACK";

        if applied && is_write {
            foreground.pending.push(statement);
        }
        if in_transaction {
            return Ok(());
        }

        let committed = std::mem::take(&mut foreground.pending);
        if !applied && committed.is_empty() {
            return Ok(());
        }
        if !rolled_back && !committed.is_empty() {
            self.record_event(&committed);
        }
        foreground.live.invalidate(replica);
        Ok(())
    }

    fn record_event(&self, statements: &[Statement]) -> MutationEvent {
        let payload = match statements {
            [single] => serde_json::to_string(single),
            many => serde_json::to_string(many),
        }
        .unwrap_or_default();
        self.events().record(payload)
    }

    // ------------------------------------------------------------------
    // Durable statements
    // ------------------------------------------------------------------

    /// Run a statement directly against the durable store.
    ///
    /// Durable writes do not touch the active replica or live queries;
    /// they become visible there after the next restore or resync.
    pub async fn durable_query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        self.timer
            .time_async(
                QueryTarget::Durable,
                sql,
                params,
                self.durable.query(sql, params),
            )
            .await
    }

    pub async fn durable_execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.durable_query(sql, params)
            .await
            .map(|rows| rows.rows_affected)
    }

    pub async fn durable_exec(&self, sql: &str) -> Result<()> {
        self.timer
            .time_async(QueryTarget::Durable, sql, &[], self.durable.exec(sql))
            .await
    }

    /// Run `f` inside one transaction on the durable store's worker.
    pub async fn durable_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send + 'static,
    {
        self.timer
            .time_async(
                QueryTarget::Durable,
                "TRANSACTION",
                &[],
                self.durable.transaction(f),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Live queries
    // ------------------------------------------------------------------

    /// Register a live query delivering to a closure.
    pub async fn subscribe<F>(
        &self,
        sql: &str,
        params: &[Value],
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut(&LiveUpdate) + Send + 'static,
    {
        self.subscribe_with(sql, params, FnSubscriber(callback))
            .await
    }

    /// Register a live query delivering to any [`Subscriber`].
    pub async fn subscribe_with(
        &self,
        sql: &str,
        params: &[Value],
        subscriber: impl Subscriber + 'static,
    ) -> Result<SubscriptionId> {
        let mut foreground = self.foreground.lock().await;
        let replica = self.active.load();
        foreground
            .live
            .register(&replica, sql, params, Box::new(subscriber))
    }

    /// Register a live query as a stream of updates.
    pub async fn live_query(&self, sql: &str, params: &[Value]) -> Result<LiveQuery> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .subscribe_with(sql, params, ChannelSubscriber(tx))
            .await?;
        Ok(LiveQuery::new(id, rx))
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.foreground.lock().await.live.unregister(id)
    }

    pub async fn subscription_count(&self) -> usize {
        self.foreground.lock().await.live.len()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Capture the durable store's current state as a snapshot.
    ///
    /// The active replica is not changed.
    pub async fn create_snapshot(&self) -> Result<SnapshotId> {
        self.create_snapshot_info().await.map(|info| info.id)
    }

    /// Like [`LocalDb::create_snapshot`], returning the new snapshot's
    /// description as it was when inserted.
    pub async fn create_snapshot_info(&self) -> Result<SnapshotInfo> {
        let export = self
            .timer
            .measure("export-state", self.durable.export_state())
            .await
            .map_err(Error::replica_build)?;
        let export = Arc::new(export);
        let replica = self
            .builder
            .build(ReplicaSource::Export(Arc::clone(&export)))
            .await?;

        let snapshot = Snapshot::new(export, replica);
        let info = snapshot.info();
        self.snapshots().insert(snapshot);

        tracing::info!(snapshot = %info.id, "Snapshot created");
        Ok(info)
    }

    /// Make a fresh copy of a snapshot the active replica.
    ///
    /// `None` restores the most recent snapshot, or resynchronizes from the
    /// durable store when there is none. On failure the previously active
    /// replica stays active.
    pub async fn restore_snapshot(&self, id: Option<SnapshotId>) -> Result<ReplicaId> {
        self.restore_snapshot_outcome(id)
            .await
            .map(|outcome| outcome.replica)
    }

    /// Like [`LocalDb::restore_snapshot`], also reporting which snapshot was
    /// resolved under the swap lock.
    pub async fn restore_snapshot_outcome(
        &self,
        id: Option<SnapshotId>,
    ) -> Result<RestoreOutcome> {
        let _swap = self.swap_lock.lock().await;

        let target = match id {
            Some(id) => Some(self.snapshots().get(id)?),
            None => self.snapshots().latest(),
        };

        let replica = match &target {
            Some(snapshot) => {
                self.builder
                    .build(ReplicaSource::Export(Arc::clone(snapshot.export())))
                    .await?
            }
            None => {
                tracing::info!("No snapshot retained, resynchronizing from the durable store");
                self.builder
                    .build(ReplicaSource::Durable(&self.durable))
                    .await?
            }
        };

        let installed = self.install(replica).await;
        let snapshot = target.map(|snapshot| snapshot.id());
        if let Some(snapshot) = snapshot {
            tracing::info!(snapshot = %snapshot, replica = %installed, "Snapshot restored");
        }
        Ok(RestoreOutcome {
            replica: installed,
            snapshot,
        })
    }

    /// Rebuild the active replica from the durable store's current state.
    pub async fn resync(&self) -> Result<ReplicaId> {
        let _swap = self.swap_lock.lock().await;
        let replica = self
            .builder
            .build(ReplicaSource::Durable(&self.durable))
            .await?;
        Ok(self.install(replica).await)
    }

    async fn install(&self, replica: Arc<OptimisticReplica>) -> ReplicaId {
        let mut foreground = self.foreground.lock().await;
        let previous = self.active.swap(Arc::clone(&replica));
        // A transaction left open on the old replica is abandoned with it.
        foreground.pending.clear();
        let evaluated = foreground.live.invalidate(&replica);

        tracing::info!(
            previous = %previous.id(),
            installed = %replica.id(),
            subscriptions = evaluated,
            "Replica installed"
        );
        replica.id()
    }

    pub fn discard_snapshot(&self, id: SnapshotId) -> Result<()> {
        self.snapshots().discard(id)?;
        tracing::info!(snapshot = %id, "Snapshot discarded");
        Ok(())
    }

    pub fn list_snapshots(&self) -> Vec<SnapshotInfo> {
        self.snapshots().list()
    }

    /// A retained snapshot, for read access to its replica.
    pub fn snapshot(&self, id: SnapshotId) -> Result<Arc<Snapshot>> {
        self.snapshots().get(id)
    }

    fn snapshots(&self) -> MutexGuard<'_, SnapshotManager> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Events and clock
    // ------------------------------------------------------------------

    /// Retained events with a logical timestamp greater than `after`, or all
    /// of them.
    pub fn events_since(&self, after: Option<LogicalTimestamp>) -> Vec<MutationEvent> {
        let events = self.events();
        match after {
            Some(after) => events.since(after),
            None => events.events().cloned().collect(),
        }
    }

    /// Drop events up to and including `through`.
    pub fn prune_events(&self, through: LogicalTimestamp) -> usize {
        self.events().prune_through(through)
    }

    /// Advance this session's clock past a timestamp seen elsewhere.
    pub fn sync_clock(&self, remote: i64) -> Result<()> {
        self.events().sync_clock(remote)
    }

    pub fn clock(&self) -> LogicalClock {
        self.events().clock().clone()
    }

    fn events(&self) -> MutexGuard<'_, EventLog> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the durable worker. The replica stays readable.
    pub async fn shutdown(&self) -> Result<()> {
        self.timer.log_summary();
        self.durable.shutdown().await?;
        tracing::info!(session_id = %self.config.session_id, "Local database shut down");
        Ok(())
    }
}
