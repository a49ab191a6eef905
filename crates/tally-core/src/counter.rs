//! The counter-cache capability.
//!
//! Counters are shared state: an external producer increments them when it
//! accepts a chat or message, the entity lifecycle decrements and evicts
//! them on deletion, and reconciliation reads them. Every component that
//! touches the cache receives a [`CounterStore`] explicitly; there is no
//! global handle.
//!
//! Mutations must be atomic primitives of the store. Callers never read a
//! value and write it back.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Errors surfaced by a counter store backend.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The backend could not be reached or failed the operation.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// A key holds something that is not an integer.
    #[error("counter {key} is not an integer: {value}")]
    NotAnInteger {
        /// Offending key.
        key: String,
        /// Raw stored value.
        value: String,
    },
}

/// Atomic integer key-value store used as the fast count cache.
///
/// Semantics follow the usual cache-server conventions: incrementing or
/// decrementing a missing key treats it as `0` first.
pub trait CounterStore: Send + Sync {
    /// Read a counter. `None` is a cache miss.
    fn get(&self, key: &str) -> Result<Option<i64>, CounterError>;

    /// Overwrite a counter.
    fn set(&self, key: &str, value: i64) -> Result<(), CounterError>;

    /// Atomically add one and return the new value.
    fn incr(&self, key: &str) -> Result<i64, CounterError>;

    /// Atomically subtract one and return the new value.
    fn decr(&self, key: &str) -> Result<i64, CounterError>;

    /// Remove a counter. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, CounterError>;

    /// Read several counters at once, in key order.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<i64>>, CounterError> {
        keys.iter().map(|k| self.get(k)).collect()
    }
}

impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<i64>, CounterError> {
        (**self).get(key)
    }
    fn set(&self, key: &str, value: i64) -> Result<(), CounterError> {
        (**self).set(key, value)
    }
    fn incr(&self, key: &str) -> Result<i64, CounterError> {
        (**self).incr(key)
    }
    fn decr(&self, key: &str) -> Result<i64, CounterError> {
        (**self).decr(key)
    }
    fn delete(&self, key: &str) -> Result<bool, CounterError> {
        (**self).delete(key)
    }
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<i64>>, CounterError> {
        (**self).get_many(keys)
    }
}

/// In-process counter store.
///
/// Each mutation holds the shard lock for its key, so `incr`/`decr` are
/// atomic with respect to each other.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, i64>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no key is held.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.counters.contains_key(key)
    }

    fn add(&self, key: &str, delta: i64) -> i64 {
        let mut entry = self.counters.entry(key.to_owned()).or_insert(0);
        *entry += delta;
        *entry
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &str) -> Result<Option<i64>, CounterError> {
        Ok(self.counters.get(key).map(|v| *v))
    }

    fn set(&self, key: &str, value: i64) -> Result<(), CounterError> {
        let _ = self.counters.insert(key.to_owned(), value);
        Ok(())
    }

    fn incr(&self, key: &str) -> Result<i64, CounterError> {
        Ok(self.add(key, 1))
    }

    fn decr(&self, key: &str) -> Result<i64, CounterError> {
        Ok(self.add(key, -1))
    }

    fn delete(&self, key: &str) -> Result<bool, CounterError> {
        Ok(self.counters.remove(key).is_some())
    }
}
