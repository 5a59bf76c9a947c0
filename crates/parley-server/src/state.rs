//! Shared server state handed to the hub, the router and the HTTP API.

use std::sync::Arc;

use tokio::sync::Mutex;

use parley_store::Database;

use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;

/// Everything a request handler needs: the store, the live connection
/// registry, and configuration.
///
/// The database connection is serialized behind a `tokio::sync::Mutex`;
/// gateway calls are short synchronous statements, and funneling them
/// through one connection gives read-your-own-write semantics to the
/// counter queries that follow a transition.
#[derive(Clone)]
pub struct CoreState {
    pub db: Arc<Mutex<Database>>,
    pub registry: Arc<ConnectionRegistry>,
    pub config: Arc<ServerConfig>,
}

impl CoreState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            registry: Arc::new(ConnectionRegistry::new()),
            config: Arc::new(config),
        }
    }
}
