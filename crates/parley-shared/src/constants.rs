use std::time::Duration;

/// Protocol version advertised in the hello exchange
pub const PROTOCOL_VERSION: &str = "/parley/1.0.0";

/// Application name
pub const APP_NAME: &str = "Parley";

/// How long after `send_time` the sender may still recall a message
pub const RECALL_WINDOW: Duration = Duration::from_secs(120);

/// Default history page size when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound on a single history page
pub const MAX_PAGE_SIZE: u32 = 100;

/// Maximum message content size in bytes (64 KiB)
pub const MAX_CONTENT_SIZE: usize = 65_536;

/// How long a fresh connection may stay anonymous before the hub closes it
pub const AUTH_DEADLINE: Duration = Duration::from_secs(5);

/// Default websocket listen port
pub const DEFAULT_WS_PORT: u16 = 4010;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
