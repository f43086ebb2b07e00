//! The durable store: a SQLite connection owned by a dedicated worker thread.
//!
//! Callers never touch the connection. Every operation is a [`Request`] sent
//! over a bounded channel and answered through a oneshot reply, so the
//! worker executes requests strictly in arrival order. An export therefore
//! sees every write queued before it and none queued after it.

use crate::{
    config::DurableConfig,
    error::{Error, Result},
    export::StateExport,
    handle::{HandleState, StoreHandle, Transaction},
    rows::RowSet,
    value::Value,
};
use tokio::sync::{mpsc, oneshot, watch};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Work run on the worker against its handle.
type Job = Box<dyn FnOnce(&mut StoreHandle) + Send>;

/// Messages understood by the worker.
enum Request {
    Query {
        sql: String,
        params: Vec<Value>,
        reply: Reply<RowSet>,
    },
    Exec {
        sql: String,
        reply: Reply<()>,
    },
    Transaction(Job),
    Export {
        reply: Reply<StateExport>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Readiness reported by the worker, with the failure reason if any.
type Status = (HandleState, Option<String>);

/// Handle to the durable store's worker.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct DurableStore {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<Status>,
}

impl DurableStore {
    /// Spawn the worker and start opening the database.
    ///
    /// Returns immediately; use [`DurableStore::wait_ready`] to wait for the
    /// worker to report the outcome.
    pub fn open(config: DurableConfig) -> Result<Self> {
        let (requests, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (status_tx, status) = watch::channel((HandleState::Initializing, None));

        std::thread::Builder::new()
            .name("tandem-durable".into())
            .spawn(move || run_worker(config, rx, status_tx))
            .map_err(|e| Error::StoreUnavailable(format!("failed to spawn worker: {e}")))?;

        Ok(Self { requests, status })
    }

    /// Current readiness of the underlying handle.
    pub fn state(&self) -> HandleState {
        self.status.borrow().0
    }

    /// Wait until the worker has opened the database.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut status = self.status.clone();
        let outcome = status
            .wait_for(|(state, _)| *state != HandleState::Initializing)
            .await
            .map(|status| status.clone())
            .map_err(|_| Error::StoreUnavailable("worker exited during startup".into()))?;

        match outcome {
            (HandleState::Ready, _) => Ok(()),
            (_, reason) => Err(Error::StoreUnavailable(
                reason.unwrap_or_else(|| "durable store failed to open".into()),
            )),
        }
    }

    /// Run one statement and collect its rows.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        self.request(|reply| Request::Query { sql, params, reply })
            .await
    }

    /// Run one statement, returning the number of rows it changed.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.query(sql, params).await.map(|rows| rows.rows_affected)
    }

    /// Run a batch of statements without parameters.
    pub async fn exec(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.request(|reply| Request::Exec { sql, reply }).await
    }

    /// Run `f` on the worker inside one transaction.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send + 'static,
    {
        self.request(|reply| {
            Request::Transaction(Box::new(move |handle: &mut StoreHandle| {
                let _ = reply.send(handle.transaction(f));
            }))
        })
        .await
    }

    /// Capture the store's full committed state.
    pub async fn export_state(&self) -> Result<StateExport> {
        self.request(|reply| Request::Export { reply }).await
    }

    /// Stop the worker after the requests already queued. Later requests
    /// fail with [`Error::StoreUnavailable`].
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> Error {
    Error::StoreUnavailable("durable worker has stopped".into())
}

fn run_worker(
    config: DurableConfig,
    mut requests: mpsc::Receiver<Request>,
    status: watch::Sender<Status>,
) {
    let mut handle = match StoreHandle::open(&config) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, path = ?config.path, "Durable store failed to open");
            let _ = status.send((HandleState::Failed, Some(err.to_string())));
            return;
        }
    };
    handle.mark_ready();
    let _ = status.send((HandleState::Ready, None));
    tracing::info!(path = ?config.path, "Durable worker started");

    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::Query { sql, params, reply } => {
                let _ = reply.send(handle.query(&sql, &params));
            }
            Request::Exec { sql, reply } => {
                let _ = reply.send(handle.exec(&sql));
            }
            Request::Transaction(job) => job(&mut handle),
            Request::Export { reply } => {
                let _ = reply.send(handle.export_state());
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }

    tracing::info!("Durable worker stopped");
}
