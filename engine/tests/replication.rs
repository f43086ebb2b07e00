//! Durable store, replica and snapshot behavior through [`LocalDb`].

use std::sync::Arc;
use tandem_engine::{
    EngineConfig, Error, LocalDb, QueryTimer, ReplicaBuilder, ReplicaSource, RowSet, StateExport,
    Value,
};

async fn open_with_users() -> LocalDb {
    let db = LocalDb::open(EngineConfig::in_memory()).await.unwrap();
    db.durable_exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    db.resync().await.unwrap();
    db
}

fn names(rows: &RowSet) -> Vec<String> {
    rows.iter().map(|r| r.get("name").unwrap()).collect()
}

async fn replica_names(db: &LocalDb) -> Vec<String> {
    names(&db.query("SELECT name FROM users ORDER BY id", &[]).await.unwrap())
}

// ============================================================================
// Export Round Trip
// ============================================================================

#[tokio::test]
async fn generated_columns_survive_resync_and_snapshot() {
    let db = LocalDb::open(EngineConfig::in_memory()).await.unwrap();
    db.durable_exec(
        "CREATE TABLE prices (net INTEGER, gross INTEGER GENERATED ALWAYS AS (net * 2) STORED);
         INSERT INTO prices (net) VALUES (5);",
    )
    .await
    .unwrap();

    db.resync().await.unwrap();
    let snapshot = db.create_snapshot().await.unwrap();
    db.restore_snapshot(Some(snapshot)).await.unwrap();

    let rows = db.query("SELECT gross FROM prices", &[]).await.unwrap();
    assert_eq!(rows.row(0).unwrap().get::<i64>(0).unwrap(), 10);
}

#[tokio::test]
async fn replica_matches_durable_state() {
    let db = open_with_users().await;
    db.durable_transaction(|tx| {
        for name in ["Alice", "Bob", "Carol"] {
            tx.execute("INSERT INTO users (name) VALUES ($1)", &[Value::from(name)])?;
        }
        Ok(())
    })
    .await
    .unwrap();
    db.resync().await.unwrap();

    let durable = db
        .durable_query("SELECT name FROM users ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(replica_names(&db).await, names(&durable));

    // exporting the replica reproduces the durable export
    let durable_export = db.durable().export_state().await.unwrap();
    let replica_export = db.active_replica().export_state().unwrap();
    assert_eq!(replica_export.schema, durable_export.schema);
    assert_eq!(replica_export.tables, durable_export.tables);
    assert_eq!(replica_export.checksum, durable_export.checksum);
}

#[tokio::test]
async fn export_serialized_and_rebuilt() {
    let db = open_with_users().await;
    db.durable_execute("INSERT INTO users (name) VALUES ('Alice')", &[])
        .await
        .unwrap();
    db.resync().await.unwrap();

    let json = db.active_replica().export_state().unwrap().to_json().unwrap();
    let export = StateExport::from_json(&json).unwrap();

    let builder = ReplicaBuilder::new(Arc::new(QueryTimer::default()), true);
    let replica = builder
        .build(ReplicaSource::Export(Arc::new(export)))
        .await
        .unwrap();
    let rows = replica.query("SELECT name FROM users", &[]).unwrap();
    assert_eq!(names(&rows), vec!["Alice"]);
}

// ============================================================================
// Snapshot Scenarios
// ============================================================================

#[tokio::test]
async fn three_users_snapshot_scenario() {
    let db = open_with_users().await;
    for name in ["Alice", "Bob", "Carol"] {
        db.durable_execute("INSERT INTO users (name) VALUES ($1)", &[name.into()])
            .await
            .unwrap();
    }
    db.resync().await.unwrap();
    let snapshot = db.create_snapshot().await.unwrap();

    // optimistic writes diverge from the durable store
    db.execute("INSERT INTO users (name) VALUES ('Dave')", &[])
        .await
        .unwrap();
    db.execute("DELETE FROM users WHERE name = 'Alice'", &[])
        .await
        .unwrap();
    assert_eq!(replica_names(&db).await, vec!["Bob", "Carol", "Dave"]);

    db.restore_snapshot(Some(snapshot)).await.unwrap();
    assert_eq!(replica_names(&db).await, vec!["Alice", "Bob", "Carol"]);
}

#[tokio::test]
async fn snapshot_does_not_change_active_replica() {
    let db = open_with_users().await;
    db.execute("INSERT INTO users (name) VALUES ('local')", &[])
        .await
        .unwrap();
    let active = db.active_replica_id();

    let id = db.create_snapshot().await.unwrap();
    assert_eq!(db.active_replica_id(), active);
    assert_eq!(replica_names(&db).await, vec!["local"]);

    // the snapshot captured the durable store, which never saw the write
    let snapshot = db.snapshot(id).unwrap();
    let rows = snapshot
        .replica()
        .query("SELECT count(*) FROM users", &[])
        .unwrap();
    assert_eq!(rows.row(0).unwrap().get::<i64>(0).unwrap(), 0);
}

#[tokio::test]
async fn restore_is_idempotent() {
    let db = open_with_users().await;
    db.durable_execute("INSERT INTO users (name) VALUES ('Alice')", &[])
        .await
        .unwrap();
    let snapshot = db.create_snapshot().await.unwrap();

    let first = db.restore_snapshot(Some(snapshot)).await.unwrap();
    let after_first = db.active_replica().export_state().unwrap();

    db.execute("INSERT INTO users (name) VALUES ('scratch')", &[])
        .await
        .unwrap();

    let second = db.restore_snapshot(Some(snapshot)).await.unwrap();
    let after_second = db.active_replica().export_state().unwrap();

    assert_ne!(first, second);
    assert_eq!(after_first.checksum, after_second.checksum);
    assert_eq!(after_first.tables, after_second.tables);
}

#[tokio::test]
async fn restore_latest_by_default() {
    let db = open_with_users().await;
    db.durable_execute("INSERT INTO users (name) VALUES ('one')", &[])
        .await
        .unwrap();
    db.create_snapshot().await.unwrap();
    db.durable_execute("INSERT INTO users (name) VALUES ('two')", &[])
        .await
        .unwrap();
    db.create_snapshot().await.unwrap();

    db.restore_snapshot(None).await.unwrap();
    assert_eq!(replica_names(&db).await, vec!["one", "two"]);
    assert_eq!(db.list_snapshots().len(), 2);
}

#[tokio::test]
async fn unknown_or_discarded_snapshot() {
    let db = open_with_users().await;
    let id = db.create_snapshot().await.unwrap();
    db.discard_snapshot(id).unwrap();

    let before = db.active_replica_id();
    assert_eq!(
        db.restore_snapshot(Some(id)).await.unwrap_err(),
        Error::SnapshotNotFound(id)
    );
    assert_eq!(db.active_replica_id(), before);
    assert!(matches!(
        db.discard_snapshot(id),
        Err(Error::SnapshotNotFound(_))
    ));
}

#[tokio::test]
async fn failed_restore_leaves_active_replica_untouched() {
    let db = open_with_users().await;
    db.execute("INSERT INTO users (name) VALUES ('kept')", &[])
        .await
        .unwrap();
    let before = db.active_replica_id();

    db.shutdown().await.unwrap();
    let err = db.restore_snapshot(None).await.unwrap_err();
    assert!(matches!(err, Error::ReplicaBuildFailed { .. }));
    assert!(!err.needs_fresh_export());

    assert_eq!(db.active_replica_id(), before);
    assert_eq!(replica_names(&db).await, vec!["kept"]);
}

#[tokio::test]
async fn snapshot_limit_discards_oldest() {
    let db = LocalDb::open(EngineConfig::in_memory().with_max_snapshots(2))
        .await
        .unwrap();
    let first = db.create_snapshot().await.unwrap();
    let second = db.create_snapshot().await.unwrap();
    let third = db.create_snapshot().await.unwrap();

    let ids: Vec<_> = db.list_snapshots().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![second, third]);
    assert!(db.snapshot(first).is_err());
}

// ============================================================================
// File-backed Durable Store
// ============================================================================

#[tokio::test]
async fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tandem.db");

    {
        let db = LocalDb::open(EngineConfig::in_memory().with_path(&path))
            .await
            .unwrap();
        db.durable_exec(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO notes (body) VALUES ('persisted');",
        )
        .await
        .unwrap();
        // replica-only writes are not persisted
        db.resync().await.unwrap();
        db.execute("INSERT INTO notes (body) VALUES ('optimistic')", &[])
            .await
            .unwrap();
        db.shutdown().await.unwrap();
    }

    let db = LocalDb::open(EngineConfig::in_memory().with_path(&path))
        .await
        .unwrap();
    let rows = db.query("SELECT body FROM notes", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows.row(0).unwrap().get::<String>("body").unwrap(),
        "persisted"
    );
}
