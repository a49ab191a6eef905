//! Migrated connection pool handle shared by workers, lifecycle and reconciliation.

use tracing::info;

use crate::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::errors::Result;
use crate::migrations::run_migrations;

/// The durable store: a pool whose schema is up to date.
#[derive(Clone, Debug)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open a file-backed database and apply pending migrations.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let db = Self::from_pool(connection::new_file(path, config)?)?;
        info!(path, pool_size = config.pool_size, "database opened");
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    /// Wrap a pool and migrate it.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let _ = run_migrations(&*pool.get()?)?;
        Ok(Self { pool })
    }

    /// Check out a connection.
    pub fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}
