//! How often, and how patiently, a failing creation job is re-run.
//!
//! A job runs once and is then re-run up to `max_retries` times, waiting
//! between runs. The wait doubles from `first_backoff_ms` up to
//! `max_backoff_ms` and is spread by `jitter` so that a burst of jobs that
//! failed together does not retry in lockstep. An envelope sent with
//! `retry: false` gets its single run and no more.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-queue retry settings, read from `workers.retry`.
///
/// ```json
/// { "maxRetries": 5, "firstBackoffMs": 500, "maxBackoffMs": 30000, "jitter": 0.25 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Re-runs after the first failure.
    pub max_retries: u32,
    /// Wait before the first re-run.
    pub first_backoff_ms: u64,
    /// Ceiling on any single wait.
    pub max_backoff_ms: u64,
    /// Fraction of the wait added or removed at random, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            first_backoff_ms: 500,
            max_backoff_ms: 30_000,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Runs a job gets before it is declared dead.
    ///
    /// `retry_enabled` is the envelope's `retry` flag.
    pub fn attempts(&self, retry_enabled: bool) -> u32 {
        if retry_enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Wait before re-run number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff(retry, rand::rng().random())
    }

    /// Wait before re-run number `retry`, with `random` in `[0.0, 1.0)`
    /// choosing where in the jitter window it lands.
    pub fn backoff(&self, retry: u32, random: f64) -> Duration {
        let doubled = self.first_backoff_ms.saturating_mul(1u64 << retry.min(31));
        let wait = doubled.min(self.max_backoff_ms) as f64;
        let spread = self.jitter.clamp(0.0, 1.0) * (random * 2.0 - 1.0);
        Duration::from_millis((wait * (1.0 + spread)).round().max(0.0) as u64)
    }
}
