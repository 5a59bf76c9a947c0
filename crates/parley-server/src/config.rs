//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the websocket hub.
    /// Env: `WS_ADDR`
    /// Default: `0.0.0.0:4010`
    pub ws_addr: SocketAddr,

    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database. Empty means the platform
    /// data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// How long an accepted socket may stay silent before the hub drops it
    /// for not identifying itself, in milliseconds.
    /// Env: `AUTH_DEADLINE_MS`
    /// Default: `5000`
    pub auth_deadline_ms: u64,

    /// Maximum accepted message content size in bytes.
    /// Env: `MAX_CONTENT_SIZE`
    /// Default: [`parley_shared::constants::MAX_CONTENT_SIZE`]
    pub max_content_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: ([0, 0, 0, 0], parley_shared::constants::DEFAULT_WS_PORT).into(),
            http_addr: ([0, 0, 0, 0], parley_shared::constants::DEFAULT_HTTP_PORT).into(),
            database_path: None,
            auth_deadline_ms: parley_shared::constants::AUTH_DEADLINE.as_millis() as u64,
            max_content_size: parley_shared::constants::MAX_CONTENT_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WS_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.ws_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid WS_ADDR, using default");
            }
        }

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("AUTH_DEADLINE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.auth_deadline_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("MAX_CONTENT_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_content_size = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
