//! Error types for the durable store.
//!
//! [`StoreError`] is returned by every store operation. Constraint failures
//! reported by `SQLite` are classified from the extended result code into
//! dedicated variants so callers can tell a duplicate number apart from a
//! missing parent or a rejected value.

use rusqlite::ffi;
use tally_core::CounterError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error that is not a constraint failure.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A `UNIQUE` or `PRIMARY KEY` constraint rejected the write.
    #[error("{entity} already exists: {detail}")]
    UniqueViolation {
        /// Entity kind (`application`, `chat`, `message`).
        entity: &'static str,
        /// Constraint message from the database.
        detail: String,
    },

    /// A `FOREIGN KEY` constraint rejected the write.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A `CHECK` or `NOT NULL` constraint rejected the write.
    #[error("check constraint violation: {0}")]
    CheckViolation(String),

    /// Input rejected before reaching the database.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// Counter cache failure during a lifecycle operation.
    #[error(transparent)]
    Counter(#[from] CounterError),
}

impl StoreError {
    /// Classify a `rusqlite` error, attributing uniqueness failures to `entity`.
    pub fn classify(err: rusqlite::Error, entity: &'static str) -> Self {
        let rusqlite::Error::SqliteFailure(failure, message) = &err else {
            return Self::Sqlite(err);
        };
        let code = failure.extended_code;
        let detail = message.clone().unwrap_or_else(|| failure.to_string());
        match code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                Self::UniqueViolation { entity, detail }
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Self::ForeignKeyViolation(detail),
            ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => {
                Self::CheckViolation(detail)
            }
            _ => Self::Sqlite(err),
        }
    }

    /// Whether this is a uniqueness failure.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::classify(err, "row")
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
