//! # parley-server
//!
//! Realtime core of the Parley chat backend.
//!
//! This binary provides:
//! - **Websocket hub** (tokio-tungstenite) carrying the command/event
//!   protocol: sends, read acknowledgements, recall, typing, history
//! - **Connection registry** tracking every live device per user
//! - **Message lifecycle engine** with compare-and-swap status transitions
//! - **REST API** (axum) for health checks, history, unread counters, the
//!   offline sync pull, and group roster maintenance

mod api;
mod config;
mod dispatch;
mod error;
mod history;
mod hub;
mod lifecycle;
mod registry;
mod router;
mod state;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::config::ServerConfig;
use crate::state::CoreState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let state = CoreState::new(db, config);

    // -----------------------------------------------------------------------
    // 4. Spawn the websocket hub (runs in background tokio task)
    // -----------------------------------------------------------------------
    let hub_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = hub::run(hub_state).await {
            tracing::error!(error = %e, "Websocket hub failed");
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = state.config.http_addr;
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
