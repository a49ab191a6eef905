//! Application repository: token issuance, lookup and count persistence.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tally_core::ApplicationToken;
use tracing::{debug, instrument, warn};

use crate::errors::{Result, StoreError};
use crate::row_types::{ApplicationRow, db_timestamp};

/// Upper bound on token regenerations before creation gives up.
pub const MAX_TOKEN_ATTEMPTS: usize = 16;

const COLUMNS: &str = "id, token, name, chats_count, created_at, updated_at";

/// Application repository. Stateless; every method takes `&Connection`.
pub struct ApplicationRepo;

impl ApplicationRepo {
    /// Create an application with a freshly issued token and `chats_count = 0`.
    pub fn create(conn: &Connection, name: &str) -> Result<ApplicationRow> {
        Self::create_with_tokens(conn, name, ApplicationToken::generate)
    }

    /// Create an application drawing candidate tokens from `next_token`.
    ///
    /// A candidate already in use is discarded and another drawn. The
    /// `UNIQUE` constraint on `token` stays the final authority: losing an
    /// insert race also draws again.
    #[instrument(skip_all, fields(name = %name))]
    pub fn create_with_tokens(
        conn: &Connection,
        name: &str,
        mut next_token: impl FnMut() -> ApplicationToken,
    ) -> Result<ApplicationRow> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("application name must not be blank".into()));
        }
        let now = db_timestamp(Utc::now());

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = next_token();
            if Self::token_exists(conn, &token)? {
                debug!(attempt, "token collision, regenerating");
                continue;
            }
            let inserted = conn.execute(
                "INSERT INTO applications (token, name, chats_count, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)",
                params![token.as_str(), name, now],
            );
            match inserted.map_err(|e| StoreError::classify(e, "application")) {
                Ok(_) => {
                    return Ok(ApplicationRow {
                        id: conn.last_insert_rowid(),
                        token,
                        name: name.to_string(),
                        chats_count: 0,
                        created_at: now.clone(),
                        updated_at: now,
                    });
                }
                Err(e) if e.is_unique_violation() => {
                    debug!(attempt, "token taken concurrently, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(attempts = MAX_TOKEN_ATTEMPTS, "could not issue a unique application token");
        Err(StoreError::UniqueViolation {
            entity: "application",
            detail: format!("no unique token after {MAX_TOKEN_ATTEMPTS} attempts"),
        })
    }

    /// Whether any application already uses `token`.
    pub fn token_exists(conn: &Connection, token: &ApplicationToken) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM applications WHERE token = ?1)",
            params![token.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Look up an application by token.
    pub fn find_by_token(
        conn: &Connection,
        token: &ApplicationToken,
    ) -> Result<Option<ApplicationRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM applications WHERE token = ?1"),
                params![token.as_str()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Up to `limit` applications with `id > after_id`, in id order.
    pub fn page_after(
        conn: &Connection,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ApplicationRow>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM applications WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![after_id, limit as i64], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Overwrite `chats_count` for each `(id, count)` pair in one transaction.
    pub fn update_chats_counts(conn: &Connection, updates: &[(i64, i64)]) -> Result<usize> {
        super::update_counts(
            conn,
            "UPDATE applications SET chats_count = ?1, updated_at = ?2 WHERE id = ?3",
            updates,
            &db_timestamp(Utc::now()),
        )
    }

    /// Delete an application; chats and messages go with it.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let changed = conn.execute("DELETE FROM applications WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ApplicationRow> {
        Ok(ApplicationRow {
            id: row.get(0)?,
            token: ApplicationToken::from_raw(row.get::<_, String>(1)?),
            name: row.get(2)?,
            chats_count: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}
