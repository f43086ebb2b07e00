//! Pinned point-in-time snapshots.
//!
//! A snapshot keeps the export it was captured from alongside a replica
//! loaded from it. Restoring always rebuilds from the pinned export, so the
//! retained replica stays exactly as captured.

use crate::{
    error::{Error, Result},
    export::{ExportMetadata, StateExport},
    replica::{OptimisticReplica, ReplicaId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use ulid::Ulid;

/// Unique, time-ordered snapshot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Ulid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// A retained snapshot.
#[derive(Debug)]
pub struct Snapshot {
    id: SnapshotId,
    created_at: DateTime<Utc>,
    export: Arc<StateExport>,
    replica: Arc<OptimisticReplica>,
}

impl Snapshot {
    pub fn new(export: Arc<StateExport>, replica: Arc<OptimisticReplica>) -> Self {
        Self {
            id: SnapshotId::new(),
            created_at: Utc::now(),
            export,
            replica,
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The export pinned at creation.
    pub fn export(&self) -> &Arc<StateExport> {
        &self.export
    }

    /// Read access to the replica captured with the snapshot.
    pub fn replica(&self) -> &Arc<OptimisticReplica> {
        &self.replica
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            id: self.id,
            created_at: self.created_at,
            replica: self.replica.id(),
            export: self.replica.source().clone(),
        }
    }
}

/// Summary of a snapshot for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub replica: ReplicaId,
    pub export: ExportMetadata,
}

/// Retained snapshots in creation order.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    snapshots: Vec<Arc<Snapshot>>,
    max_snapshots: Option<usize>,
}

impl SnapshotManager {
    pub fn new(max_snapshots: Option<usize>) -> Self {
        Self {
            snapshots: Vec::new(),
            max_snapshots,
        }
    }

    /// Retain a snapshot, discarding the oldest ones beyond the limit.
    ///
    /// Returns the discarded snapshots.
    pub fn insert(&mut self, snapshot: Snapshot) -> Vec<Arc<Snapshot>> {
        self.snapshots.push(Arc::new(snapshot));

        let excess = self
            .max_snapshots
            .map_or(0, |max| self.snapshots.len().saturating_sub(max.max(1)));
        let discarded: Vec<_> = self.snapshots.drain(..excess).collect();
        for snapshot in &discarded {
            tracing::info!(snapshot = %snapshot.id, "Discarded oldest snapshot");
        }
        discarded
    }

    pub fn get(&self, id: SnapshotId) -> Result<Arc<Snapshot>> {
        self.snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(Error::SnapshotNotFound(id))
    }

    /// Most recently created snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.last().cloned()
    }

    /// Stop retaining a snapshot.
    pub fn discard(&mut self, id: SnapshotId) -> Result<Arc<Snapshot>> {
        let position = self
            .snapshots
            .iter()
            .position(|s| s.id == id)
            .ok_or(Error::SnapshotNotFound(id))?;
        Ok(self.snapshots.remove(position))
    }

    pub fn list(&self) -> Vec<SnapshotInfo> {
        self.snapshots.iter().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DurableConfig,
        durable::DurableStore,
        instrument::QueryTimer,
        replica::{ReplicaBuilder, ReplicaSource},
    };

    async fn snapshot(store: &DurableStore, builder: &ReplicaBuilder) -> Snapshot {
        let export = Arc::new(store.export_state().await.unwrap());
        let replica = builder
            .build(ReplicaSource::Export(Arc::clone(&export)))
            .await
            .unwrap();
        Snapshot::new(export, replica)
    }

    async fn store() -> DurableStore {
        let store = DurableStore::open(DurableConfig::default()).unwrap();
        store.wait_ready().await.unwrap();
        store
    }

    #[test]
    fn id_parses_from_display() {
        let id = SnapshotId::new();
        let parsed: SnapshotId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-ulid".parse::<SnapshotId>().is_err());
    }

    #[tokio::test]
    async fn get_latest_and_discard() {
        let store = store().await;
        let builder = ReplicaBuilder::new(Arc::new(QueryTimer::default()), true);
        let mut manager = SnapshotManager::new(None);
        assert!(manager.latest().is_none());

        let first = snapshot(&store, &builder).await;
        let first_id = first.id();
        manager.insert(first);
        let second = snapshot(&store, &builder).await;
        let second_id = second.id();
        manager.insert(second);

        assert_eq!(manager.latest().unwrap().id(), second_id);
        assert_eq!(manager.get(first_id).unwrap().id(), first_id);

        manager.discard(first_id).unwrap();
        assert_eq!(
            manager.get(first_id).unwrap_err(),
            Error::SnapshotNotFound(first_id)
        );
        assert!(matches!(
            manager.discard(first_id),
            Err(Error::SnapshotNotFound(_))
        ));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn limit_discards_oldest() {
        let store = store().await;
        let builder = ReplicaBuilder::new(Arc::new(QueryTimer::default()), true);
        let mut manager = SnapshotManager::new(Some(2));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let snapshot = snapshot(&store, &builder).await;
            ids.push(snapshot.id());
            manager.insert(snapshot);
        }

        let listed: Vec<_> = manager.list().into_iter().map(|info| info.id).collect();
        assert_eq!(listed, vec![ids[1], ids[2]]);
    }
}
