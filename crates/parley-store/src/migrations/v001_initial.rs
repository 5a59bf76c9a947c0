//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `messages`, `read_receipts`,
//! `group_members`, and `hidden_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- Exactly one of recipient_id / group_id is set; the CHECK makes the
-- private-vs-group exclusivity a hard schema invariant.
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    sender_id      TEXT NOT NULL,              -- UUID v4
    recipient_id   TEXT,                       -- UUID v4, private only
    group_id       TEXT,                       -- UUID v4, group only
    message_type   TEXT NOT NULL,
    content        TEXT NOT NULL,
    reply_to       TEXT,                       -- nullable FK -> messages(id)
    status         TEXT NOT NULL,
    send_time      TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    delivered_time TEXT,
    read_time      TEXT,
    extended_data  TEXT,

    CHECK ((recipient_id IS NULL) != (group_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_messages_group_ts
    ON messages(group_id, send_time DESC);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, recipient_id, send_time DESC);

CREATE INDEX IF NOT EXISTS idx_messages_recipient_status
    ON messages(recipient_id, status);

-- ----------------------------------------------------------------
-- Read receipts (group conversations only)
-- ----------------------------------------------------------------
-- One row per (message, reader); the primary key makes duplicate reads
-- a no-op via INSERT OR IGNORE.
CREATE TABLE IF NOT EXISTS read_receipts (
    message_id TEXT NOT NULL,
    reader_id  TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, reader_id),
    FOREIGN KEY (message_id) REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_receipts_reader ON read_receipts(reader_id);

-- ----------------------------------------------------------------
-- Group rosters
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_members (
    group_id  TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Per-user visibility exclusions ("delete for me")
-- ----------------------------------------------------------------
-- Messages are never physically deleted; hiding is a separate record.
CREATE TABLE IF NOT EXISTS hidden_messages (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    hidden_at  TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
