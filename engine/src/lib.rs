//! # Tandem Engine
//!
//! A local-first data layer: a durable SQLite store paired with an in-memory
//! optimistic replica that application code reads and writes with low
//! latency.
//!
//! ## Design Principles
//!
//! - **One owner per connection**: the durable store lives on its own worker
//!   thread and is only reached through messages
//! - **Replicas are copies**: a replica is built from a full state export and
//!   never writes through to the durable store
//! - **Atomic switching**: exactly one replica is active; restores swap it in
//!   whole and re-run every live query against it before the next write
//! - **Explicit wiring**: timers, subscribers and clocks are constructed and
//!   passed in, never global
//!
//! ## Core Concepts
//!
//! ### Durable store and replicas
//!
//! [`DurableStore`] owns the persistent database. [`StateExport`] captures
//! its full committed state; [`ReplicaBuilder`] loads an export into a fresh
//! [`OptimisticReplica`].
//!
//! ### Live queries
//!
//! [`LiveQueryEngine`] re-executes registered queries after every committed
//! write against the active replica and delivers a [`LiveUpdate`] to each
//! [`Subscriber`]. [`LiveQuery`] is the stream form.
//!
//! ### Snapshots
//!
//! A [`Snapshot`] pins the export taken when it was created. Restoring
//! rebuilds a replica from it and makes that replica active.
//!
//! ### Logical clock and events
//!
//! Every committed replica write is recorded as a [`MutationEvent`] stamped
//! by the session's [`LogicalClock`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_engine::{EngineConfig, LocalDb, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tandem_engine::Result<()> {
//! let db = LocalDb::open(EngineConfig::in_memory()).await?;
//! db.durable_exec("CREATE TABLE todos (id INTEGER PRIMARY KEY, title TEXT NOT NULL)")
//!     .await?;
//! db.resync().await?;
//!
//! // 1. Watch a query
//! let mut live = db.live_query("SELECT count(*) FROM todos", &[]).await?;
//! let initial = live.next().await.unwrap();
//! assert_eq!(initial.result?.row(0).unwrap().get::<i64>(0)?, 0);
//!
//! // 2. Write optimistically
//! db.execute(
//!     "INSERT INTO todos (title) VALUES ($1)",
//!     &[Value::from("write docs")],
//! )
//! .await?;
//! let update = live.next().await.unwrap();
//! assert_eq!(update.result?.row(0).unwrap().get::<i64>(0)?, 1);
//!
//! // 3. Roll the replica back to the durable state
//! let snapshot = db.create_snapshot().await?;
//! db.restore_snapshot(Some(snapshot)).await?;
//! let restored = live.next().await.unwrap();
//! assert_eq!(restored.result?.row(0).unwrap().get::<i64>(0)?, 0);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod durable;
pub mod error;
pub mod event;
pub mod export;
pub mod handle;
pub mod instrument;
pub mod live;
pub mod replica;
pub mod rows;
pub mod snapshot;
pub mod sql;
pub mod value;

// Re-export main types at crate root
pub use clock::LogicalClock;
pub use config::{DurableConfig, EngineConfig};
pub use db::{LocalDb, RestoreOutcome};
pub use durable::DurableStore;
pub use error::{Error, Result};
pub use event::{EventKind, EventLog, MutationEvent};
pub use export::{ExportMetadata, SchemaObject, StateExport, TableData, EXPORT_FORMAT_VERSION};
pub use handle::{HandleState, StoreHandle, Transaction};
pub use instrument::{PhaseTiming, QueryStats, QueryTarget, QueryTimer, QueryTiming};
pub use live::{
    ChannelSubscriber, Delivery, FnSubscriber, LiveQuery, LiveQueryEngine, LiveUpdate,
    Subscriber, SubscriptionId,
};
pub use replica::{ActiveReplica, OptimisticReplica, ReplicaBuilder, ReplicaId, ReplicaSource};
pub use rows::{Column, Row, RowIndex, RowSet};
pub use snapshot::{Snapshot, SnapshotId, SnapshotInfo, SnapshotManager};
pub use sql::{Statement, StatementKind};
pub use value::{FromValue, ScalarType, Value};

/// Type aliases for clarity
pub type SessionId = String;
pub type Timestamp = u64;
pub type LogicalTimestamp = u64;
