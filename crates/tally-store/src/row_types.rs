//! Database row types.
//!
//! Timestamps are kept as the RFC 3339 text stored in the row.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tally_core::ApplicationToken;

/// Format a timestamp the way it is stored: RFC 3339 UTC, microseconds.
pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Row from the `applications` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRow {
    /// Primary key.
    pub id: i64,
    /// Public 36-character token.
    pub token: ApplicationToken,
    /// Display name.
    pub name: String,
    /// Chat count as of the last reconciliation.
    pub chats_count: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Row from the `chats` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRow {
    /// Primary key.
    pub id: i64,
    /// Owning application.
    pub application_id: i64,
    /// Number, unique within the application.
    pub number: i64,
    /// Message count as of the last reconciliation.
    pub messages_count: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Row from the `messages` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    /// Primary key.
    pub id: i64,
    /// Owning chat.
    pub chat_id: i64,
    /// Number, unique within the chat.
    pub number: i64,
    /// Message text.
    pub body: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// A chat joined with its application's token, enough to derive its cache key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatKeyRow {
    /// Chat primary key.
    pub id: i64,
    /// Owning application's token.
    pub token: ApplicationToken,
    /// Chat number.
    pub number: i64,
    /// Persisted message count.
    pub messages_count: i64,
}

/// Result of an insert that tolerates an existing row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    /// The row was written.
    Inserted(T),
    /// A row with the same identity was already present; it is returned as stored.
    Existing(T),
}

impl<T> InsertOutcome<T> {
    /// The inserted or existing row.
    pub fn into_row(self) -> T {
        match self {
            Self::Inserted(row) | Self::Existing(row) => row,
        }
    }

    /// Whether this call wrote the row.
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}
