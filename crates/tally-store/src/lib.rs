//! # tally-store
//!
//! Durable store for applications, chats and messages on `SQLite`.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and foreign keys on every connection
//! - **[`migrations`]**: Version-tracked schema, embedded at compile time
//! - **[`database`]**: Migrated pool handle
//! - **[`repositories`]**: Stateless repositories taking `&Connection`
//! - **[`counters`]**: `SQLite`-backed [`CounterStore`](tally_core::CounterStore)
//! - **[`lifecycle`]**: Create/delete operations with their cache effects

#![deny(unsafe_code)]

pub mod connection;
pub mod counters;
pub mod database;
pub mod errors;
pub mod lifecycle;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use counters::SqliteCounterStore;
pub use database::Database;
pub use errors::{Result, StoreError};
pub use lifecycle::Lifecycle;
pub use repositories::{ApplicationRepo, ChatRepo, MessageRepo};
pub use row_types::{ApplicationRow, ChatKeyRow, ChatRow, InsertOutcome, MessageRow};
