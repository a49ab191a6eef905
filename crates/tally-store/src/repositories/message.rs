//! Message repository.

use rusqlite::{Connection, OptionalExtension, Row, params};
use tally_core::ApplicationToken;

use crate::errors::{Result, StoreError};
use crate::row_types::{InsertOutcome, MessageRow};

const COLUMNS: &str = "id, chat_id, number, body, created_at, updated_at";

/// Message repository. Stateless; every method takes `&Connection`.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert a message. A duplicate number raises [`StoreError::UniqueViolation`].
    pub fn insert(
        conn: &Connection,
        chat_id: i64,
        number: i64,
        body: &str,
        at: &str,
    ) -> Result<MessageRow> {
        validate_body(body)?;
        let _ = conn
            .execute(
                "INSERT INTO messages (chat_id, number, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![chat_id, number, body, at],
            )
            .map_err(|e| StoreError::classify(e, "message"))?;
        Ok(row(conn.last_insert_rowid(), chat_id, number, body, at))
    }

    /// Insert a message unless one with the same number exists, in which
    /// case the stored row is returned. The caller compares bodies.
    pub fn insert_or_get(
        conn: &Connection,
        chat_id: i64,
        number: i64,
        body: &str,
        at: &str,
    ) -> Result<InsertOutcome<MessageRow>> {
        validate_body(body)?;
        let changed = conn
            .execute(
                "INSERT INTO messages (chat_id, number, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (chat_id, number) DO NOTHING",
                params![chat_id, number, body, at],
            )
            .map_err(|e| StoreError::classify(e, "message"))?;
        if changed > 0 {
            let id = conn.last_insert_rowid();
            return Ok(InsertOutcome::Inserted(row(id, chat_id, number, body, at)));
        }
        Self::find(conn, chat_id, number)?
            .map(InsertOutcome::Existing)
            .ok_or_else(|| {
                StoreError::NotFound(format!("message {number} vanished after conflict"))
            })
    }

    /// Look up a message by its number within a chat.
    pub fn find(conn: &Connection, chat_id: i64, number: i64) -> Result<Option<MessageRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE chat_id = ?1 AND number = ?2"),
                params![chat_id, number],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Look up a message by application token, chat number and message number.
    pub fn find_by_token(
        conn: &Connection,
        token: &ApplicationToken,
        chat_number: i64,
        number: i64,
    ) -> Result<Option<MessageRow>> {
        let row = conn
            .query_row(
                "SELECT m.id, m.chat_id, m.number, m.body, m.created_at, m.updated_at
                 FROM messages m
                 JOIN chats c ON c.id = m.chat_id
                 JOIN applications a ON a.id = c.application_id
                 WHERE a.token = ?1 AND c.number = ?2 AND m.number = ?3",
                params![token.as_str(), chat_number, number],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Number of messages stored for a chat.
    pub fn count_for_chat(conn: &Connection, chat_id: i64) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete by id. Returns `false` when no row matched.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let changed = conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            number: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(StoreError::Validation("message body must not be blank".into()));
    }
    Ok(())
}

fn row(id: i64, chat_id: i64, number: i64, body: &str, at: &str) -> MessageRow {
    MessageRow {
        id,
        chat_id,
        number,
        body: body.to_string(),
        created_at: at.to_string(),
        updated_at: at.to_string(),
    }
}
