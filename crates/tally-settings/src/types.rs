//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields keep their compiled default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tally_core::{DuplicatePolicy, RetryPolicy};

/// Root settings.
///
/// ```json
/// {
///   "database": { "path": "/var/lib/tally/tally.db" },
///   "workers": { "duplicatePolicy": "reject", "retry": { "maxRetries": 5 } },
///   "reconcile": { "batchSize": 500 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TallySettings {
    /// Durable store.
    pub database: DatabaseSettings,
    /// Counter cache.
    pub counters: CounterSettings,
    /// Creation workers and their queues.
    pub workers: WorkerSettings,
    /// Reconciliation jobs.
    pub reconcile: ReconcileSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Durable store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// `SQLite` file path. `:memory:` opens a private in-memory database.
    pub path: String,
    /// Connections shared by workers, reconciliation and lifecycle calls.
    pub pool_size: u32,
    /// Wait on a locked database before a statement fails, in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: crate::tally_dir().join("tally.db").to_string_lossy().into_owned(),
            pool_size: 12,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Counter cache backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CounterBackend {
    /// Shared `SQLite` file.
    #[default]
    Sqlite,
    /// Process-local map; lost on exit.
    Memory,
}

/// Counter cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CounterSettings {
    /// Where counters live.
    pub backend: CounterBackend,
    /// `SQLite` file for the `sqlite` backend.
    pub path: String,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            backend: CounterBackend::Sqlite,
            path: crate::tally_dir().join("counters.db").to_string_lossy().into_owned(),
        }
    }
}

/// Creation worker settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Concurrent workers draining the chat-creation queue.
    pub chats_concurrency: usize,
    /// Concurrent workers draining the message-creation queue.
    pub messages_concurrency: usize,
    /// Bound of each in-process queue.
    pub queue_capacity: usize,
    /// Retry schedule for failed jobs.
    pub retry: RetryPolicy,
    /// Treatment of redelivered events.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            chats_concurrency: 4,
            messages_concurrency: 4,
            queue_capacity: 1024,
            retry: RetryPolicy::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Reconciliation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileSettings {
    /// Rows read (and at most flushed) per batch.
    pub batch_size: usize,
    /// Period of the application `chats_count` job.
    pub applications_interval_secs: u64,
    /// Period of the chat `messages_count` job.
    pub chats_interval_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            applications_interval_secs: 60,
            chats_interval_secs: 60,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"tally_jobs": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
