//! Schema migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Opening a
//! database applies every migration past the recorded version in order, so a
//! freshly created file and an upgraded one land on the same schema before
//! any gateway call runs.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Version the code expects. Grows by one with each migration module.
const CURRENT_VERSION: u32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if applied >= CURRENT_VERSION {
        return Ok(());
    }

    tracing::info!(
        applied,
        target_version = CURRENT_VERSION,
        "Applying schema migrations"
    );

    if applied < 1 {
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_recorded_and_rerun_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);

        // Running again against an up-to-date database changes nothing.
        run_migrations(&conn).unwrap();
    }
}
