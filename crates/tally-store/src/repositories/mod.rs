//! Repository implementations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`.

pub mod application;
pub mod chat;
pub mod message;

pub use application::ApplicationRepo;
pub use chat::ChatRepo;
pub use message::MessageRepo;

use rusqlite::{Connection, params};

use crate::errors::Result;

/// Write `(id, count)` pairs with one `UPDATE` per row inside a single
/// transaction. Rows that no longer exist are left alone. Returns the
/// number of rows updated.
fn update_counts(conn: &Connection, sql: &str, updates: &[(i64, i64)], now: &str) -> Result<usize> {
    if updates.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let mut updated = 0;
    {
        let mut stmt = tx.prepare_cached(sql)?;
        for (id, count) in updates {
            updated += stmt.execute(params![count, now, id])?;
        }
    }
    tx.commit()?;
    Ok(updated)
}
