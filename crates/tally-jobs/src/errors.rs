//! Error types for jobs, the queue and the producer.

use tally_core::{ApplicationToken, CoreError, CounterError};
use tally_store::StoreError;
use thiserror::Error;

/// A failed job attempt. Every variant is retried by the queue.
#[derive(Debug, Error)]
pub enum JobError {
    /// The durable store rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The counter cache failed.
    #[error(transparent)]
    Counter(#[from] CounterError),

    /// A job envelope could not be decoded.
    #[error(transparent)]
    Decode(#[from] CoreError),

    /// A row with the same identity exists with a different payload.
    #[error("{entity} conflicts with stored row: {detail}")]
    Conflict {
        /// Entity kind.
        entity: &'static str,
        /// What differs.
        detail: String,
    },

    /// The blocking task running the job panicked or was cancelled.
    #[error("job task failed: {0}")]
    Join(String),

    /// The queue no longer accepts jobs.
    #[error("queue {0} is closed")]
    QueueClosed(&'static str),

    /// No queue serves the envelope's job class.
    #[error("no queue for job class {0}")]
    UnroutableJob(String),
}

impl From<tokio::task::JoinError> for JobError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

/// Convenience type alias for job results.
pub type Result<T> = std::result::Result<T, JobError>;

/// Why the producer refused to emit an event.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The application has no cache key.
    #[error("Application with token {0} not found")]
    ApplicationNotFound(ApplicationToken),

    /// The chat has no cache key.
    #[error("Chat {chat_number} not found for application {token}")]
    ChatNotFound {
        /// Application token.
        token: ApplicationToken,
        /// Chat number.
        chat_number: i64,
    },

    /// A message body was blank.
    #[error("body is required")]
    MissingBody,

    /// The counter cache failed.
    #[error(transparent)]
    Counter(#[from] CounterError),

    /// The envelope could not be built.
    #[error(transparent)]
    Envelope(#[from] CoreError),
}
