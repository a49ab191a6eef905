//! Schema versions of the durable store.
//!
//! The schema version lives in `PRAGMA user_version`. Each step below is
//! applied in order inside its own transaction, which also bumps the
//! version, so a crash mid-step leaves the previous version intact and
//! reopening the store resumes from there.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

/// `(summary, sql)`; the step at index `i` produces version `i + 1`.
const STEPS: &[(&str, &str)] = &[(
    "applications, chats and messages with per-parent numbering",
    include_str!("v001_schema.sql"),
)];

/// Bring `conn` up to [`latest_version`]. Returns how many steps ran.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let from = current_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(StoreError::Migration {
            message: format!("store is at schema v{from}, newer than this build (v{latest})"),
        });
    }

    for (version, (summary, sql)) in (1..).zip(STEPS).skip(from as usize) {
        info!(version, summary, "upgrading store schema");
        apply(conn, version, sql).map_err(|e| StoreError::Migration {
            message: format!("v{version} ({summary}): {e}"),
        })?;
    }

    let ran = latest - from;
    if ran == 0 {
        debug!(version = from, "store schema up to date");
    }
    Ok(ran)
}

/// Version recorded in the store; 0 for a new database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Version this build upgrades to.
pub fn latest_version() -> u32 {
    STEPS.len() as u32
}

fn apply(conn: &Connection, version: u32, sql: &str) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()
}
