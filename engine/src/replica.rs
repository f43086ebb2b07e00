//! Optimistic replicas: in-memory copies of a store built from an export.

use crate::{
    durable::DurableStore,
    error::{Error, Result},
    export::{ExportMetadata, StateExport},
    handle::{HandleState, StoreHandle, Transaction},
    instrument::QueryTimer,
    rows::RowSet,
    sql::Statement,
    value::Value,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Generation number of a replica, unique within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}

/// An in-memory store loaded from a [`StateExport`].
///
/// Statements run synchronously; the handle is guarded by a mutex so a
/// replica can be shared by `Arc` between readers and the single writer.
#[derive(Debug)]
pub struct OptimisticReplica {
    id: ReplicaId,
    built_at: DateTime<Utc>,
    source: ExportMetadata,
    handle: Mutex<StoreHandle>,
}

impl OptimisticReplica {
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Metadata of the export this replica was loaded from.
    pub fn source(&self) -> &ExportMetadata {
        &self.source
    }

    pub fn state(&self) -> HandleState {
        self.lock().map(|h| h.state()).unwrap_or(HandleState::Failed)
    }

    /// True while an explicit `BEGIN` is open on this replica.
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.lock()?.in_transaction())
    }

    pub fn total_changes(&self) -> Result<u64> {
        self.lock()?.total_changes()
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        self.lock()?.query(sql, params)
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.lock()?.execute(sql, params)
    }

    pub fn exec(&self, sql: &str) -> Result<()> {
        self.lock()?.exec(sql)
    }

    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        self.lock()?.transaction(f)
    }

    /// Run a transaction, also returning its non-read statements.
    pub fn transaction_recorded<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<(T, Vec<Statement>)> {
        self.lock()?.transaction_recorded(f)
    }

    /// Capture this replica's full committed state.
    pub fn export_state(&self) -> Result<StateExport> {
        self.lock()?.export_state()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreHandle>> {
        self.handle
            .lock()
            .map_err(|_| Error::StoreUnavailable(format!("{} is poisoned", self.id)))
    }
}

/// Where a replica's state comes from.
pub enum ReplicaSource<'a> {
    /// Export the durable store now
    Durable(&'a DurableStore),
    /// Load an export captured earlier
    Export(Arc<StateExport>),
}

/// Builds replicas and assigns their ids.
#[derive(Debug)]
pub struct ReplicaBuilder {
    timer: Arc<QueryTimer>,
    foreign_keys: bool,
    next_id: AtomicU64,
}

impl ReplicaBuilder {
    pub fn new(timer: Arc<QueryTimer>, foreign_keys: bool) -> Self {
        Self {
            timer,
            foreign_keys,
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a fresh replica. Never touches the source or any active
    /// replica.
    pub async fn build(&self, source: ReplicaSource<'_>) -> Result<Arc<OptimisticReplica>> {
        let export = match source {
            ReplicaSource::Durable(store) => Arc::new(
                self.timer
                    .measure("export-state", store.export_state())
                    .await
                    .map_err(Error::replica_build)?,
            ),
            ReplicaSource::Export(export) => export,
        };
        self.build_from(export).await
    }

    async fn build_from(&self, export: Arc<StateExport>) -> Result<Arc<OptimisticReplica>> {
        let id = ReplicaId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let foreign_keys = self.foreign_keys;

        let load = tokio::task::spawn_blocking(move || -> Result<OptimisticReplica> {
            let mut handle = StoreHandle::open_in_memory(foreign_keys)
                .map_err(|e| Error::ReplicaLoadFailed(e.to_string()))?;
            handle.load_state(&export).map_err(|e| match e {
                Error::ReplicaLoadFailed(_) => e,
                other => Error::ReplicaLoadFailed(other.to_string()),
            })?;
            Ok(OptimisticReplica {
                id,
                built_at: Utc::now(),
                source: ExportMetadata::from(export.as_ref()),
                handle: Mutex::new(handle),
            })
        });

        let replica = self
            .timer
            .measure("load-replica", load)
            .await
            .map_err(|e| Error::ReplicaLoadFailed(format!("load task failed: {e}")))??;

        tracing::info!(
            replica = %replica.id,
            tables = replica.source.table_count,
            rows = replica.source.row_count,
            "Replica built"
        );
        Ok(Arc::new(replica))
    }
}

/// The pointer to the currently active replica.
///
/// Readers always observe a whole replica, either the old one or the new.
#[derive(Debug)]
pub struct ActiveReplica {
    current: RwLock<Arc<OptimisticReplica>>,
}

impl ActiveReplica {
    pub fn new(initial: Arc<OptimisticReplica>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// The replica active right now.
    pub fn load(&self) -> Arc<OptimisticReplica> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install `next`, returning the replica it replaced.
    pub fn swap(&self, next: Arc<OptimisticReplica>) -> Arc<OptimisticReplica> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurableConfig;

    async fn durable_with_users() -> DurableStore {
        let store = DurableStore::open(DurableConfig::default()).unwrap();
        store.wait_ready().await.unwrap();
        store
            .exec(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
                 INSERT INTO users (name) VALUES ('Alice'), ('Bob');",
            )
            .await
            .unwrap();
        store
    }

    fn builder() -> ReplicaBuilder {
        ReplicaBuilder::new(Arc::new(QueryTimer::default()), true)
    }

    #[tokio::test]
    async fn build_from_durable_copies_state() {
        let store = durable_with_users().await;
        let builder = builder();
        let replica = builder.build(ReplicaSource::Durable(&store)).await.unwrap();

        assert_eq!(replica.state(), HandleState::Ready);
        assert_eq!(replica.source().row_count, 2);
        let rows = replica.query("SELECT name FROM users ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 2);

        // the replica is independent of the durable store
        replica
            .execute("INSERT INTO users (name) VALUES ('Carol')", &[])
            .unwrap();
        let durable = store.query("SELECT count(*) FROM users", &[]).await.unwrap();
        assert_eq!(durable.row(0).unwrap().get::<i64>(0).unwrap(), 2);

        let phases: Vec<_> = builder.timer.phases().into_iter().map(|p| p.name).collect();
        assert_eq!(phases, vec!["export-state", "load-replica"]);
    }

    #[tokio::test]
    async fn ids_increase() {
        let store = durable_with_users().await;
        let builder = builder();
        let export = Arc::new(store.export_state().await.unwrap());

        let first = builder.build(ReplicaSource::Export(Arc::clone(&export))).await.unwrap();
        let second = builder.build(ReplicaSource::Export(export)).await.unwrap();
        assert!(first.id() < second.id());
    }

    #[tokio::test]
    async fn export_failure_is_build_failure() {
        let store = durable_with_users().await;
        store.shutdown().await.unwrap();

        match builder().build(ReplicaSource::Durable(&store)).await {
            Err(Error::ReplicaBuildFailed { source }) => {
                assert!(matches!(*source, Error::StoreUnavailable(_)))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrupt_export_is_load_failure() {
        let store = durable_with_users().await;
        let mut export = store.export_state().await.unwrap();
        export.checksum = "bad".into();

        let err = builder()
            .build(ReplicaSource::Export(Arc::new(export)))
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::ReplicaLoadFailed(msg) if msg.contains("checksum")));
        assert!(err.needs_fresh_export());
    }

    #[tokio::test]
    async fn swap_replaces_pointer() {
        let store = durable_with_users().await;
        let builder = builder();
        let first = builder.build(ReplicaSource::Durable(&store)).await.unwrap();
        let second = builder.build(ReplicaSource::Durable(&store)).await.unwrap();

        let active = ActiveReplica::new(Arc::clone(&first));
        let held = active.load();
        let previous = active.swap(Arc::clone(&second));

        assert_eq!(previous.id(), first.id());
        assert_eq!(active.load().id(), second.id());
        // readers holding the old replica keep a working handle
        assert!(held.query("SELECT 1", &[]).is_ok());
    }
}
