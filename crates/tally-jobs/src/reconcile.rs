//! Count reconciliation.
//!
//! Overwrites durable count columns with whatever the counter cache holds.
//! Rows are paged by primary key; every cache hit is staged in a
//! [`BatchBuffer`] and flushed as one transaction when the buffer fills and
//! again at the end of each page. Cache misses leave the row untouched.
//!
//! A run that hits an error stops where it is. Batches already flushed stay
//! committed and the next scheduled run starts over from the first row.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use tally_core::{keys, BatchBuffer, CounterStore};
use tally_store::{ApplicationRepo, ChatRepo, Database};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::Result;

/// Which count column a run reconciles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountKind {
    /// `applications.chats_count` from `application:<token>`.
    Applications,
    /// `chats.messages_count` from `application:<token>:chat:<n>`.
    Chats,
}

impl CountKind {
    /// Name used in logs, metrics and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applications => "applications",
            Self::Chats => "chats",
        }
    }
}

impl fmt::Display for CountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised [`CountKind`] name.
#[derive(Debug, Error)]
#[error("unknown count kind {0:?} (expected applications or chats)")]
pub struct UnknownCountKind(String);

impl FromStr for CountKind {
    type Err = UnknownCountKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "applications" | "application" | "apps" => Ok(Self::Applications),
            "chats" | "chat" => Ok(Self::Chats),
            _ => Err(UnknownCountKind(s.to_string())),
        }
    }
}

/// What a run did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Column reconciled.
    pub kind: CountKind,
    /// Rows read from the store.
    pub scanned: usize,
    /// Cache hits staged for writing.
    pub staged: usize,
    /// Rows whose count was overwritten.
    pub updated: usize,
    /// Rows with no cache key.
    pub skipped_missing: usize,
    /// Rows whose cached value was negative.
    pub skipped_invalid: usize,
    /// Bulk writes performed.
    pub flushes: usize,
    /// Error that ended the run early.
    pub aborted: Option<String>,
}

impl ReconcileReport {
    fn new(kind: CountKind) -> Self {
        Self {
            kind,
            scanned: 0,
            staged: 0,
            updated: 0,
            skipped_missing: 0,
            skipped_invalid: 0,
            flushes: 0,
            aborted: None,
        }
    }

    /// Whether the run stopped on an error.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

/// Runs reconciliation passes against one store and one cache.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
    counters: Arc<dyn CounterStore>,
    batch_size: usize,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Default page and flush size.
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    /// Create a reconciler. A `batch_size` of zero is treated as one.
    pub fn new(db: Database, counters: Arc<dyn CounterStore>, batch_size: usize) -> Self {
        Self {
            db,
            counters,
            batch_size: batch_size.max(1),
        }
    }

    /// One full pass. Never fails: errors end the run and are reported.
    #[instrument(skip_all, fields(kind = %kind))]
    pub fn run(&self, kind: CountKind) -> ReconcileReport {
        let started = Instant::now();
        let mut report = ReconcileReport::new(kind);

        let status = match self.pass(kind, &mut report) {
            Ok(()) => "ok",
            Err(err) => {
                error!(
                    error = %err,
                    scanned = report.scanned,
                    updated = report.updated,
                    "reconciliation aborted"
                );
                counter!("reconcile_runs_aborted_total", "kind" => kind.as_str()).increment(1);
                report.aborted = Some(err.to_string());
                "aborted"
            }
        };
        counter!("reconcile_runs_total", "kind" => kind.as_str(), "status" => status).increment(1);
        counter!("reconcile_rows_updated_total", "kind" => kind.as_str())
            .increment(report.updated as u64);

        info!(
            scanned = report.scanned,
            updated = report.updated,
            skipped_missing = report.skipped_missing,
            skipped_invalid = report.skipped_invalid,
            flushes = report.flushes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            status,
            "reconciliation finished"
        );
        report
    }

    fn pass(&self, kind: CountKind, report: &mut ReconcileReport) -> Result<()> {
        let mut buffer = BatchBuffer::new(self.batch_size);
        let mut after_id = 0;

        loop {
            let page = self.page(kind, after_id)?;
            let Some(&(last_id, _)) = page.last() else {
                break;
            };
            let full_page = page.len() >= self.batch_size;
            after_id = last_id;
            report.scanned += page.len();

            let cache_keys: Vec<String> = page.iter().map(|(_, key)| key.clone()).collect();
            let values = self.counters.get_many(&cache_keys)?;

            for ((id, key), value) in page.into_iter().zip(values) {
                match value {
                    None => report.skipped_missing += 1,
                    Some(count) if count < 0 => {
                        warn!(%key, count, "negative cached count, skipping");
                        report.skipped_invalid += 1;
                    }
                    Some(count) => {
                        report.staged += 1;
                        if let Some(batch) = buffer.push((id, count)) {
                            self.flush(kind, &batch, report)?;
                        }
                    }
                }
            }
            if let Some(batch) = buffer.flush() {
                self.flush(kind, &batch, report)?;
            }

            if !full_page {
                break;
            }
        }
        Ok(())
    }

    /// `(row id, cache key)` pairs for the page after `after_id`.
    fn page(&self, kind: CountKind, after_id: i64) -> Result<Vec<(i64, String)>> {
        let conn = self.db.conn()?;
        let page = match kind {
            CountKind::Applications => {
                ApplicationRepo::page_after(&conn, after_id, self.batch_size)?
                    .into_iter()
                    .map(|app| (app.id, keys::application_key(&app.token)))
                    .collect()
            }
            CountKind::Chats => ChatRepo::page_with_token_after(&conn, after_id, self.batch_size)?
                .into_iter()
                .map(|chat| (chat.id, keys::chat_key(&chat.token, chat.number)))
                .collect(),
        };
        Ok(page)
    }

    fn flush(
        &self,
        kind: CountKind,
        batch: &[(i64, i64)],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        let updated = match kind {
            CountKind::Applications => ApplicationRepo::update_chats_counts(&conn, batch)?,
            CountKind::Chats => ChatRepo::update_messages_counts(&conn, batch)?,
        };
        debug!(staged = batch.len(), updated, "flushed batch");
        report.flushes += 1;
        report.updated += updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tally_core::{ApplicationToken, CounterError, MemoryCounterStore};
    use tally_store::{ApplicationRow, Lifecycle};

    use super::*;

    const AT: &str = "2025-11-08T00:00:00.000000Z";

    struct Fixture {
        db: Database,
        counters: Arc<MemoryCounterStore>,
        lifecycle: Lifecycle,
    }

    fn setup() -> Fixture {
        let db = Database::in_memory().unwrap();
        let counters = Arc::new(MemoryCounterStore::new());
        let lifecycle = Lifecycle::new(db.clone(), counters.clone());
        Fixture {
            db,
            counters,
            lifecycle,
        }
    }

    impl Fixture {
        fn reconciler(&self, batch_size: usize) -> Reconciler {
            Reconciler::new(self.db.clone(), self.counters.clone(), batch_size)
        }

        fn app(&self, name: &str) -> ApplicationRow {
            self.lifecycle.create_application(name).unwrap()
        }

        fn chats_count(&self, token: &ApplicationToken) -> i64 {
            ApplicationRepo::find_by_token(&self.db.conn().unwrap(), token)
                .unwrap()
                .unwrap()
                .chats_count
        }
    }

    #[test]
    fn overwrites_with_cached_value_not_row_count() {
        let f = setup();
        let app = f.app("A");
        ChatRepo::insert(&f.db.conn().unwrap(), app.id, 7, AT).unwrap();
        f.counters.set(&keys::application_key(&app.token), 3).unwrap();

        let report = f.reconciler(1000).run(CountKind::Applications);
        assert_eq!(report.updated, 1);
        assert!(!report.is_aborted());
        assert_eq!(f.chats_count(&app.token), 3);
    }

    #[test]
    fn cache_miss_leaves_count_untouched() {
        let f = setup();
        let hit = f.app("hit");
        let miss = f.app("miss");
        f.counters.set(&keys::application_key(&hit.token), 2).unwrap();
        f.counters.delete(&keys::application_key(&miss.token)).unwrap();
        ApplicationRepo::update_chats_counts(&f.db.conn().unwrap(), &[(miss.id, 9)]).unwrap();

        let report = f.reconciler(1000).run(CountKind::Applications);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.staged, 1);
        assert_eq!(report.skipped_missing, 1);
        assert_eq!(f.chats_count(&hit.token), 2);
        assert_eq!(f.chats_count(&miss.token), 9);
    }

    #[test]
    fn negative_cached_value_is_skipped() {
        let f = setup();
        let app = f.app("neg");
        f.counters.set(&keys::application_key(&app.token), -1).unwrap();
        let report = f.reconciler(10).run(CountKind::Applications);
        assert_eq!(report.skipped_invalid, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(f.chats_count(&app.token), 0);
    }

    #[test]
    fn pages_and_flushes_per_batch() {
        let f = setup();
        let apps: Vec<_> = (0..5).map(|i| f.app(&format!("app-{i}"))).collect();
        for (i, app) in apps.iter().enumerate() {
            f.counters.set(&keys::application_key(&app.token), i as i64 + 10).unwrap();
        }

        let report = f.reconciler(2).run(CountKind::Applications);
        assert_eq!(report.scanned, 5);
        assert_eq!(report.updated, 5);
        assert_eq!(report.flushes, 3);
        for (i, app) in apps.iter().enumerate() {
            assert_eq!(f.chats_count(&app.token), i as i64 + 10);
        }
    }

    #[test]
    fn empty_page_never_flushes() {
        let f = setup();
        let report = f.reconciler(10).run(CountKind::Chats);
        assert_eq!(report.scanned, 0);
        assert_eq!(report.flushes, 0);
    }

    #[test]
    fn chats_use_composed_keys() {
        let f = setup();
        let a = f.app("a");
        let b = f.app("b");
        let conn = f.db.conn().unwrap();
        ChatRepo::insert(&conn, a.id, 1, AT).unwrap();
        ChatRepo::insert(&conn, b.id, 1, AT).unwrap();
        drop(conn);
        f.counters.set(&keys::chat_key(&a.token, 1), 4).unwrap();

        let report = f.reconciler(1000).run(CountKind::Chats);
        assert_eq!(report.skipped_missing, 1);
        assert_eq!(report.updated, 1);

        let conn = f.db.conn().unwrap();
        assert_eq!(ChatRepo::find_by_token(&conn, &a.token, 1).unwrap().unwrap().messages_count, 4);
        assert_eq!(ChatRepo::find_by_token(&conn, &b.token, 1).unwrap().unwrap().messages_count, 0);
    }

    /// Serves reads until `fail_after` calls, then reports the cache as down.
    struct FailingAfter {
        inner: MemoryCounterStore,
        fail_after: usize,
        calls: parking_lot::Mutex<usize>,
    }

    impl CounterStore for FailingAfter {
        fn get(&self, key: &str) -> std::result::Result<Option<i64>, CounterError> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: i64) -> std::result::Result<(), CounterError> {
            self.inner.set(key, value)
        }
        fn incr(&self, key: &str) -> std::result::Result<i64, CounterError> {
            self.inner.incr(key)
        }
        fn decr(&self, key: &str) -> std::result::Result<i64, CounterError> {
            self.inner.decr(key)
        }
        fn delete(&self, key: &str) -> std::result::Result<bool, CounterError> {
            self.inner.delete(key)
        }
        fn get_many(&self, keys: &[String]) -> std::result::Result<Vec<Option<i64>>, CounterError> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls > self.fail_after {
                return Err(CounterError::Unavailable("connection refused".into()));
            }
            self.inner.get_many(keys)
        }
    }

    #[test]
    fn abort_keeps_committed_batches() {
        let f = setup();
        let store = Arc::new(FailingAfter {
            inner: MemoryCounterStore::new(),
            fail_after: 1,
            calls: parking_lot::Mutex::new(0),
        });
        let apps: Vec<_> = (0..4).map(|i| f.app(&format!("app-{i}"))).collect();
        for app in &apps {
            store.set(&keys::application_key(&app.token), 1).unwrap();
        }

        let report = Reconciler::new(f.db.clone(), store, 2).run(CountKind::Applications);
        assert!(report.is_aborted());
        assert!(report.aborted.as_deref().unwrap().contains("connection refused"));
        assert_eq!(report.updated, 2);
        assert_eq!(f.chats_count(&apps[0].token), 1);
        assert_eq!(f.chats_count(&apps[1].token), 1);
        assert_eq!(f.chats_count(&apps[2].token), 0);
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("applications".parse::<CountKind>().unwrap(), CountKind::Applications);
        assert_eq!("Chats".parse::<CountKind>().unwrap(), CountKind::Chats);
        assert!("messages".parse::<CountKind>().is_err());
        assert_eq!(CountKind::Chats.to_string(), "chats");
    }
}
