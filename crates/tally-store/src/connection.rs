//! Pools of `SQLite` connections shared by the creation workers, the
//! reconciliation loops and the lifecycle commands.
//!
//! Every connection is opened with foreign keys on, so deleting an
//! application or chat cascades to its children, and in WAL mode, so the
//! reconciler's page reads do not block worker inserts.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Pool of store connections.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// A connection checked out of a [`ConnectionPool`].
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// How long a checkout waits for a free connection.
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool sizing and lock waiting.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Connections held open at most. The default covers four chat and four
    /// message workers, both reconciliation loops and two lifecycle callers.
    pub pool_size: u32,
    /// How long a statement waits on a locked database before failing.
    /// A creation job that fails this way is retried by its queue.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 12,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug)]
struct StorePragmas {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for StorePragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(u64::from(self.busy_timeout_ms)))
    }
}

fn pool(
    manager: SqliteConnectionManager,
    size: u32,
    busy_timeout_ms: u32,
) -> Result<ConnectionPool> {
    Ok(Pool::builder()
        .max_size(size.max(1))
        .connection_timeout(CHECKOUT_TIMEOUT)
        .connection_customizer(Box::new(StorePragmas { busy_timeout_ms }))
        .build(manager)?)
}

/// Pool over a private in-memory database.
///
/// Each `:memory:` connection would be a separate database, so the pool
/// holds exactly one connection whatever `config.pool_size` says. Callers
/// must drop a checked-out connection before asking for the next.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    pool(SqliteConnectionManager::memory(), 1, config.busy_timeout_ms)
}

/// Pool over the database file at `path`, created if missing.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    pool(SqliteConnectionManager::file(path), config.pool_size, config.busy_timeout_ms)
}

/// Settings a live connection reports.
#[derive(Debug, PartialEq, Eq)]
pub struct PragmaState {
    /// `wal` for files; in-memory databases report `memory`.
    pub journal_mode: String,
    /// Whether cascades fire.
    pub foreign_keys_enabled: bool,
}

/// Read back the settings of `conn`.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    let foreign_keys: bool = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        foreign_keys_enabled: foreign_keys,
    })
}
