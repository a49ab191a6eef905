//! # tally-core
//!
//! Shared building blocks for the chat/message ingestion pipeline:
//!
//! - **[`token`]**: 36-character application tokens (the token authority)
//! - **[`keys`]**: Counter-cache key scheme shared with external producers
//! - **[`counter`]**: The [`CounterStore`] capability and an in-memory store
//! - **[`events`]**: Queued creation events and their job envelopes
//! - **[`timestamp`]**: Producer timestamp parsing with a processing-time fallback
//! - **[`batch`]**: Bounded flush-on-full-or-end buffer used by reconciliation
//! - **[`retry`]**: Bounded retry policy for queued jobs
//! - **[`policy`]**: How creation workers treat duplicate deliveries

#![deny(unsafe_code)]

pub mod batch;
pub mod counter;
pub mod errors;
pub mod events;
pub mod keys;
pub mod policy;
pub mod retry;
pub mod timestamp;
pub mod token;

pub use batch::BatchBuffer;
pub use counter::{CounterError, CounterStore, MemoryCounterStore};
pub use errors::{CoreError, Result};
pub use events::{ChatCreated, JobEnvelope, JobKind, MessageCreated};
pub use policy::DuplicatePolicy;
pub use retry::RetryPolicy;
pub use token::ApplicationToken;
