//! Chat repository.
//!
//! Chat numbers are assigned by the producer. Uniqueness per application is
//! enforced only by the `UNIQUE (application_id, number)` constraint; nothing
//! here checks for an existing number before writing.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tally_core::ApplicationToken;

use crate::errors::{Result, StoreError};
use crate::row_types::{ChatKeyRow, ChatRow, InsertOutcome, db_timestamp};

const COLUMNS: &str = "id, application_id, number, messages_count, created_at, updated_at";

/// Chat repository. Stateless; every method takes `&Connection`.
pub struct ChatRepo;

impl ChatRepo {
    /// Insert a chat. A duplicate number raises [`StoreError::UniqueViolation`].
    pub fn insert(
        conn: &Connection,
        application_id: i64,
        number: i64,
        at: &str,
    ) -> Result<ChatRow> {
        let _ = conn
            .execute(
                "INSERT INTO chats (application_id, number, messages_count, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)",
                params![application_id, number, at],
            )
            .map_err(|e| StoreError::classify(e, "chat"))?;
        Ok(ChatRow {
            id: conn.last_insert_rowid(),
            application_id,
            number,
            messages_count: 0,
            created_at: at.to_string(),
            updated_at: at.to_string(),
        })
    }

    /// Insert a chat unless one with the same number exists, in which case
    /// the stored row is returned untouched.
    pub fn insert_or_get(
        conn: &Connection,
        application_id: i64,
        number: i64,
        at: &str,
    ) -> Result<InsertOutcome<ChatRow>> {
        let changed = conn
            .execute(
                "INSERT INTO chats (application_id, number, messages_count, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)
                 ON CONFLICT (application_id, number) DO NOTHING",
                params![application_id, number, at],
            )
            .map_err(|e| StoreError::classify(e, "chat"))?;
        if changed > 0 {
            return Ok(InsertOutcome::Inserted(ChatRow {
                id: conn.last_insert_rowid(),
                application_id,
                number,
                messages_count: 0,
                created_at: at.to_string(),
                updated_at: at.to_string(),
            }));
        }
        Self::find(conn, application_id, number)?
            .map(InsertOutcome::Existing)
            .ok_or_else(|| StoreError::NotFound(format!("chat {number} vanished after conflict")))
    }

    /// Look up a chat by its number within an application.
    pub fn find(conn: &Connection, application_id: i64, number: i64) -> Result<Option<ChatRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM chats WHERE application_id = ?1 AND number = ?2"),
                params![application_id, number],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Look up a chat by its application's token and its number.
    pub fn find_by_token(
        conn: &Connection,
        token: &ApplicationToken,
        number: i64,
    ) -> Result<Option<ChatRow>> {
        let row = conn
            .query_row(
                "SELECT c.id, c.application_id, c.number, c.messages_count,
                        c.created_at, c.updated_at
                 FROM chats c JOIN applications a ON a.id = c.application_id
                 WHERE a.token = ?1 AND c.number = ?2",
                params![token.as_str(), number],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Numbers of every chat in an application, ascending.
    pub fn numbers_for_application(conn: &Connection, application_id: i64) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare_cached(
            "SELECT number FROM chats WHERE application_id = ?1 ORDER BY number",
        )?;
        let numbers = stmt
            .query_map(params![application_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(numbers)
    }

    /// Up to `limit` chats with `id > after_id`, joined with their token.
    pub fn page_with_token_after(
        conn: &Connection,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatKeyRow>> {
        let mut stmt = conn.prepare_cached(
            "SELECT c.id, a.token, c.number, c.messages_count
             FROM chats c JOIN applications a ON a.id = c.application_id
             WHERE c.id > ?1 ORDER BY c.id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![after_id, limit as i64], |row| {
                Ok(ChatKeyRow {
                    id: row.get(0)?,
                    token: ApplicationToken::from_raw(row.get::<_, String>(1)?),
                    number: row.get(2)?,
                    messages_count: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Overwrite `messages_count` for each `(id, count)` pair in one transaction.
    pub fn update_messages_counts(conn: &Connection, updates: &[(i64, i64)]) -> Result<usize> {
        super::update_counts(
            conn,
            "UPDATE chats SET messages_count = ?1, updated_at = ?2 WHERE id = ?3",
            updates,
            &db_timestamp(Utc::now()),
        )
    }

    /// Delete a chat; its messages go with it.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let changed = conn.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
        Ok(ChatRow {
            id: row.get(0)?,
            application_id: row.get(1)?,
            number: row.get(2)?,
            messages_count: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::migrations::run_migrations;
    use crate::repositories::ApplicationRepo;

    const AT: &str = "2025-11-08T00:15:15.000000Z";

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn insert_uses_supplied_timestamp() {
        let conn = setup();
        let app = ApplicationRepo::create(&conn, "a").unwrap();
        let chat = ChatRepo::insert(&conn, app.id, 7, AT).unwrap();
        assert_eq!(chat.created_at, AT);
        assert_eq!(ChatRepo::find(&conn, app.id, 7).unwrap(), Some(chat));
    }

    #[test]
    fn duplicate_number_is_a_unique_violation() {
        let conn = setup();
        let app = ApplicationRepo::create(&conn, "a").unwrap();
        let _ = ChatRepo::insert(&conn, app.id, 1, AT).unwrap();
        assert_matches!(
            ChatRepo::insert(&conn, app.id, 1, AT),
            Err(StoreError::UniqueViolation { entity: "chat", .. })
        );
    }

    #[test]
    fn same_number_under_two_applications() {
        let conn = setup();
        let a = ApplicationRepo::create(&conn, "a").unwrap();
        let b = ApplicationRepo::create(&conn, "b").unwrap();
        let _ = ChatRepo::insert(&conn, a.id, 1, AT).unwrap();
        let _ = ChatRepo::insert(&conn, b.id, 1, AT).unwrap();
        assert!(ChatRepo::find_by_token(&conn, &a.token, 1).unwrap().is_some());
        assert!(ChatRepo::find_by_token(&conn, &b.token, 1).unwrap().is_some());
    }

    #[test]
    fn missing_parent_is_a_foreign_key_violation() {
        let conn = setup();
        assert_matches!(
            ChatRepo::insert(&conn, 999, 1, AT),
            Err(StoreError::ForeignKeyViolation(_))
        );
    }

    #[test]
    fn insert_or_get_returns_existing_row() {
        let conn = setup();
        let app = ApplicationRepo::create(&conn, "a").unwrap();
        let first = ChatRepo::insert_or_get(&conn, app.id, 3, AT).unwrap();
        assert!(first.is_inserted());
        let second =
            ChatRepo::insert_or_get(&conn, app.id, 3, "2030-01-01T00:00:00.000000Z").unwrap();
        assert_matches!(second, InsertOutcome::Existing(ref row) if row.created_at == AT);
        assert_eq!(ChatRepo::numbers_for_application(&conn, app.id).unwrap(), vec![3]);
    }

    #[test]
    fn pages_carry_token() {
        let conn = setup();
        let app = ApplicationRepo::create(&conn, "a").unwrap();
        for n in 1..=3 {
            let _ = ChatRepo::insert(&conn, app.id, n, AT).unwrap();
        }
        let page = ChatRepo::page_with_token_after(&conn, 0, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|c| c.token == app.token));
        let rest = ChatRepo::page_with_token_after(&conn, page[1].id, 2).unwrap();
        assert_eq!(rest.iter().map(|c| c.number).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn delete_cascades_from_application() {
        let conn = setup();
        let app = ApplicationRepo::create(&conn, "a").unwrap();
        let _ = ChatRepo::insert(&conn, app.id, 1, AT).unwrap();
        assert!(ApplicationRepo::delete(&conn, app.id).unwrap());
        assert!(ChatRepo::find(&conn, app.id, 1).unwrap().is_none());
    }

    #[test]
    fn update_messages_counts_overwrites() {
        let conn = setup();
        let app = ApplicationRepo::create(&conn, "a").unwrap();
        let chat = ChatRepo::insert(&conn, app.id, 1, AT).unwrap();
        assert_eq!(ChatRepo::update_messages_counts(&conn, &[(chat.id, 12)]).unwrap(), 1);
        let chat = ChatRepo::find(&conn, app.id, 1).unwrap().unwrap();
        assert_eq!(chat.messages_count, 12);
        assert_ne!(chat.updated_at, AT);
    }
}
