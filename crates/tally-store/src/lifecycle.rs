//! Entity lifecycle: creation and deletion with their counter-cache effects.
//!
//! | operation            | durable store   | counter cache                              |
//! |----------------------|-----------------|--------------------------------------------|
//! | `create_application` | insert          | `SET application:<t> 0`                    |
//! | `delete_application` | cascade delete  | `DEL` every chat's keys, then the app's    |
//! | `delete_chat`        | cascade delete  | `DECR application:<t>`, `DEL` chat's keys  |
//! | `delete_message`     | delete          | `DECR application:<t>:chat:<c>`            |
//!
//! An application's keys are its count and `last_chat_number`; a chat's are
//! its count and `last_message_number`. The cache is touched only after the
//! durable change commits, and only when a row was actually removed.

use std::sync::Arc;

use tally_core::keys::{application_key, chat_key, last_chat_number_key, last_message_number_key};
use tally_core::{ApplicationToken, CounterStore};
use tracing::{info, instrument};

use crate::database::Database;
use crate::errors::{Result, StoreError};
use crate::repositories::{ApplicationRepo, ChatRepo, MessageRepo};
use crate::row_types::{ApplicationRow, ChatRow, MessageRow};

/// Creation and deletion entry points for the synchronous API layer.
#[derive(Clone)]
pub struct Lifecycle {
    db: Database,
    counters: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").field("db", &self.db).finish_non_exhaustive()
    }
}

impl Lifecycle {
    /// Create a lifecycle over a migrated database and a counter store.
    pub fn new(db: Database, counters: Arc<dyn CounterStore>) -> Self {
        Self { db, counters }
    }

    /// Create an application and initialise its cache key to zero.
    #[instrument(skip(self))]
    pub fn create_application(&self, name: &str) -> Result<ApplicationRow> {
        let app = ApplicationRepo::create(&*self.db.conn()?, name)?;
        self.counters.set(&application_key(&app.token), 0)?;
        info!(token = %app.token, id = app.id, "application created");
        Ok(app)
    }

    /// Delete an application with all its chats and messages.
    ///
    /// Returns the number of chats removed. Their keys are evicted
    /// individually; the application key is not decremented per chat.
    #[instrument(skip_all, fields(token = %token))]
    pub fn delete_application(&self, token: &ApplicationToken) -> Result<usize> {
        let app = ApplicationRepo::find_by_token(&*self.db.conn()?, token)?
            .ok_or_else(|| StoreError::NotFound(format!("application {token}")))?;
        self.remove_application(&app)
    }

    /// Delete a chat and its messages.
    #[instrument(skip_all, fields(token = %token, number = number))]
    pub fn delete_chat(&self, token: &ApplicationToken, number: i64) -> Result<ChatRow> {
        let chat = ChatRepo::find_by_token(&*self.db.conn()?, token, number)?.ok_or_else(|| {
            StoreError::NotFound(format!("chat {number} in application {token}"))
        })?;
        self.remove_chat(token, chat)
    }

    /// Delete a single message.
    #[instrument(skip_all, fields(token = %token, chat_number = chat_number, number = number))]
    pub fn delete_message(
        &self,
        token: &ApplicationToken,
        chat_number: i64,
        number: i64,
    ) -> Result<MessageRow> {
        let message = MessageRepo::find_by_token(&*self.db.conn()?, token, chat_number, number)?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "message {number} in chat {chat_number} of application {token}"
                ))
            })?;
        self.remove_message(token, chat_number, message)
    }

    /// The durable store this lifecycle writes to.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn remove_application(&self, app: &ApplicationRow) -> Result<usize> {
        let numbers = {
            let conn = self.db.conn()?;
            let tx = conn.unchecked_transaction()?;
            let numbers = ChatRepo::numbers_for_application(&tx, app.id)?;
            if !ApplicationRepo::delete(&tx, app.id)? {
                return Err(StoreError::NotFound(format!("application {}", app.token)));
            }
            tx.commit()?;
            numbers
        };

        for number in &numbers {
            self.evict_chat_keys(&app.token, *number)?;
        }
        let _ = self.counters.delete(&last_chat_number_key(&app.token))?;
        let _ = self.counters.delete(&application_key(&app.token))?;
        info!(chats = numbers.len(), "application deleted");
        Ok(numbers.len())
    }

    fn remove_chat(&self, token: &ApplicationToken, chat: ChatRow) -> Result<ChatRow> {
        if !ChatRepo::delete(&*self.db.conn()?, chat.id)? {
            return Err(StoreError::NotFound(format!(
                "chat {} in application {token}",
                chat.number
            )));
        }

        let _ = self.counters.decr(&application_key(token))?;
        self.evict_chat_keys(token, chat.number)?;
        info!(chat_number = chat.number, "chat deleted");
        Ok(chat)
    }

    fn remove_message(
        &self,
        token: &ApplicationToken,
        chat_number: i64,
        message: MessageRow,
    ) -> Result<MessageRow> {
        if !MessageRepo::delete(&*self.db.conn()?, message.id)? {
            return Err(StoreError::NotFound(format!(
                "message {} in chat {chat_number} of application {token}",
                message.number
            )));
        }

        let _ = self.counters.decr(&chat_key(token, chat_number))?;
        info!(chat_number, number = message.number, "message deleted");
        Ok(message)
    }

    fn evict_chat_keys(&self, token: &ApplicationToken, number: i64) -> Result<()> {
        let _ = self.counters.delete(&chat_key(token, number))?;
        let _ = self.counters.delete(&last_message_number_key(token, number))?;
        Ok(())
    }
}
