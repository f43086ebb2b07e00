//! Tandem Server - HTTP and WebSocket surface for a local-first database.
//!
//! Exposes a [`LocalDb`] to local application code: SQL against the
//! optimistic replica or the durable store, snapshot control, the mutation
//! event log, query timings, and live queries over WebSocket.

mod auth;
mod config;
mod error;
mod handlers;
mod routes;
mod websocket;

use crate::config::Config;
use crate::websocket::ConnectionManager;
use std::sync::Arc;
use tandem_engine::LocalDb;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<LocalDb>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(db: Arc<LocalDb>, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tandem_server=debug,tandem_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tandem Server on {}:{}", config.host, config.port);

    let engine_config = config.engine_config();
    match &engine_config.durable.path {
        Some(path) => tracing::info!("Opening durable store at {}", path.display()),
        None => tracing::warn!("TANDEM_DB_PATH not set, durable store is in memory"),
    }
    let db = Arc::new(LocalDb::open(engine_config).await?);

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(Arc::clone(&db), config);
    let app = routes::create_app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
