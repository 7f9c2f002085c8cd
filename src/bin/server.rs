//! Grocr Realtime Server
//!
//! Hosts the shared grocery-list tree for `grocr` clients: the account API
//! and the realtime WebSocket the stores talk to.
//!
//! # Configuration
//!
//! Environment variables:
//! - `GROCR_PORT`: Port to listen on (default: 8080)
//! - `GROCR_DATA_DIR`: Directory for `tree.json` and `accounts.json`
//!   (default: ~/.local/share/grocr-server)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check
//! - `POST /accounts`: Create an account
//! - `POST /sessions`: Sign in
//! - `GET /realtime`: Realtime WebSocket

use std::net::SocketAddr;
use std::path::PathBuf;

use grocr::server::{self, AppState, ServerStorage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory for persisted state
    data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("GROCR_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("GROCR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("grocr-server")
            });

        Self { port, data_dir }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grocr=info,grocr_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    // Ensure data directory exists
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Data directory: {}", config.data_dir.display());

    let storage = ServerStorage::new(&config.data_dir);
    let state = match AppState::load(storage.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to load persisted state: {}", e);
            std::process::exit(1);
        }
    };

    let store = state.store.clone();
    let persist = server::persist_changes(store.clone(), storage.clone());
    let app = server::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    // Last save; presence records end with the process.
    persist.abort();
    match storage.save_tree(&store.durable_tree()) {
        Ok(()) => tracing::info!("Saved tree"),
        Err(e) => tracing::error!("Failed to save tree on shutdown: {}", e),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
