//! # parley-store
//!
//! Persistence boundary for the Parley chat backend, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides the typed gateway operations the
//! realtime core calls through: append message, compare-and-swap status
//! transitions, keyset history queries, read receipts, unread counters,
//! group rosters, visibility exclusions, and the offline-sync pull.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod receipts;
pub mod unread;

mod error;

pub use database::Database;
pub use error::StoreError;
