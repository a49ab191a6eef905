//! `SQLite`-backed counter cache.
//!
//! A single `counters` table keyed by the cache-key string. Increments and
//! decrements are one `UPSERT … RETURNING` statement each, so they stay
//! atomic across every process sharing the file.

use rusqlite::{OptionalExtension, params};
use tally_core::{CounterError, CounterStore};

use crate::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::errors::Result;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS counters (
  key    TEXT    PRIMARY KEY,
  value  INTEGER NOT NULL
) WITHOUT ROWID;";

/// Counter store persisted in its own `SQLite` database.
#[derive(Clone, Debug)]
pub struct SqliteCounterStore {
    pool: ConnectionPool,
}

impl SqliteCounterStore {
    /// Open (creating if needed) a counter database at `path`.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        Self::from_pool(connection::new_file(path, config)?)
    }

    /// Counter database that lives only as long as the store.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    /// Wrap an existing pool, creating the `counters` table if missing.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> std::result::Result<PooledConnection, CounterError> {
        self.pool.get().map_err(unavailable)
    }

    fn add(&self, key: &str, delta: i64) -> std::result::Result<i64, CounterError> {
        self.conn()?
            .query_row(
                "INSERT INTO counters (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = value + excluded.value
                 RETURNING value",
                params![key, delta],
                |row| row.get(0),
            )
            .map_err(unavailable)
    }
}

fn unavailable(err: impl std::fmt::Display) -> CounterError {
    CounterError::Unavailable(err.to_string())
}

impl CounterStore for SqliteCounterStore {
    fn get(&self, key: &str) -> std::result::Result<Option<i64>, CounterError> {
        self.conn()?
            .query_row("SELECT value FROM counters WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(unavailable)
    }

    fn set(&self, key: &str, value: i64) -> std::result::Result<(), CounterError> {
        let _ = self
            .conn()?
            .execute(
                "INSERT INTO counters (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn incr(&self, key: &str) -> std::result::Result<i64, CounterError> {
        self.add(key, 1)
    }

    fn decr(&self, key: &str) -> std::result::Result<i64, CounterError> {
        self.add(key, -1)
    }

    fn delete(&self, key: &str) -> std::result::Result<bool, CounterError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM counters WHERE key = ?1", params![key])
            .map_err(unavailable)?;
        Ok(changed > 0)
    }

    fn get_many(&self, keys: &[String]) -> std::result::Result<Vec<Option<i64>>, CounterError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT value FROM counters WHERE key = ?1")
            .map_err(unavailable)?;
        keys.iter()
            .map(|key| {
                stmt.query_row(params![key], |row| row.get(0))
                    .optional()
                    .map_err(unavailable)
            })
            .collect()
    }
}
