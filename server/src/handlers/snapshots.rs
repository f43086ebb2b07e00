//! Snapshot handlers - create, restore and discard pinned snapshots.
//!
//! Every handler that installs a new replica tells connected WebSocket
//! clients about it.

use crate::error::Result;
use crate::websocket::{ConnectionManager, ServerMessage};
use serde::{Deserialize, Serialize};
use tandem_engine::{LocalDb, ReplicaId, SnapshotId, SnapshotInfo};

/// Request body for a restore.
#[derive(Debug, Default, Deserialize)]
pub struct RestoreRequest {
    /// Snapshot to restore; the most recent one when omitted
    #[serde(default)]
    pub id: Option<SnapshotId>,
}

/// Response after a replica was installed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaResponse {
    pub replica: ReplicaId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotId>,
}

/// Capture the durable store as a new snapshot.
pub async fn handle_create(db: &LocalDb) -> Result<SnapshotInfo> {
    Ok(db.create_snapshot_info().await?)
}

/// Restore a snapshot and announce the new replica.
pub async fn handle_restore(
    db: &LocalDb,
    conn_manager: &ConnectionManager,
    request: RestoreRequest,
) -> Result<ReplicaResponse> {
    let outcome = db.restore_snapshot_outcome(request.id).await?;
    Ok(announce(conn_manager, outcome.replica, outcome.snapshot))
}

/// Rebuild the replica from the durable store and announce it.
pub async fn handle_resync(
    db: &LocalDb,
    conn_manager: &ConnectionManager,
) -> Result<ReplicaResponse> {
    let replica = db.resync().await?;
    Ok(announce(conn_manager, replica, None))
}

fn announce(
    conn_manager: &ConnectionManager,
    replica: ReplicaId,
    snapshot: Option<SnapshotId>,
) -> ReplicaResponse {
    let sent = conn_manager.broadcast_all(ServerMessage::ReplicaSwapped { replica, snapshot });
    tracing::debug!(replica = %replica, sent_to = sent, "Announced replica swap");
    ReplicaResponse { replica, snapshot }
}
