//! Opens the durable store and the counter cache from settings.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::{CounterStore, MemoryCounterStore};
use tally_settings::{CounterBackend, TallySettings};
use tally_store::{ConnectionConfig, Database, SqliteCounterStore};
use tracing::info;

/// Path value that selects a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Everything a command needs to touch state.
pub struct Stores {
    pub db: Database,
    pub counters: Arc<dyn CounterStore>,
}

impl Stores {
    pub fn open(settings: &TallySettings) -> Result<Self> {
        let config = ConnectionConfig {
            pool_size: settings.database.pool_size,
            busy_timeout_ms: settings.database.busy_timeout_ms,
        };

        let db_path = settings.database.path.as_str();
        let db = if db_path == MEMORY_PATH {
            Database::in_memory()
        } else {
            ensure_parent_dir(Path::new(db_path))?;
            Database::open(db_path, &config)
        }
        .with_context(|| format!("Failed to open database: {db_path}"))?;

        let counters: Arc<dyn CounterStore> = match settings.counters.backend {
            CounterBackend::Memory => Arc::new(MemoryCounterStore::new()),
            CounterBackend::Sqlite => {
                let path = settings.counters.path.as_str();
                let store = if path == MEMORY_PATH {
                    SqliteCounterStore::in_memory()
                } else {
                    ensure_parent_dir(Path::new(path))?;
                    SqliteCounterStore::open(path, &config)
                }
                .with_context(|| format!("Failed to open counter store: {path}"))?;
                Arc::new(store)
            }
        };
        info!(backend = ?settings.counters.backend, "counter store ready");

        Ok(Self { db, counters })
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
