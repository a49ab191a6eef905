//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TallySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TALLY_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tally_core::DuplicatePolicy;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{CounterBackend, TallySettings};

/// Default settings file, `~/.tally/settings.json`.
pub fn settings_path() -> PathBuf {
    crate::tally_dir().join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<TallySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides.
///
/// A missing file yields defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TallySettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<TallySettings> {
    let defaults = serde_json::to_value(TallySettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TALLY_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TallySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are ignored with a warning.
pub fn apply_overrides(settings: &mut TallySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = env.string("TALLY_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = env.parsed("TALLY_DB_POOL_SIZE", |s| parse_range(s, 1u32, 256)) {
        settings.database.pool_size = v;
    }

    // ── Counters ────────────────────────────────────────────────────
    if let Some(v) = env.parsed("TALLY_COUNTERS_BACKEND", parse_backend) {
        settings.counters.backend = v;
    }
    if let Some(v) = env.string("TALLY_COUNTERS_PATH") {
        settings.counters.path = v;
    }

    // ── Workers ─────────────────────────────────────────────────────
    if let Some(v) = env.parsed("TALLY_CHATS_CONCURRENCY", |s| parse_range(s, 1usize, 1024)) {
        settings.workers.chats_concurrency = v;
    }
    if let Some(v) = env.parsed("TALLY_MESSAGES_CONCURRENCY", |s| parse_range(s, 1usize, 1024)) {
        settings.workers.messages_concurrency = v;
    }
    if let Some(v) = env.parsed("TALLY_MAX_RETRIES", |s| parse_range(s, 0u32, 100)) {
        settings.workers.retry.max_retries = v;
    }
    if let Some(v) = env.parsed("TALLY_DUPLICATE_POLICY", |s| s.parse::<DuplicatePolicy>().ok()) {
        settings.workers.duplicate_policy = v;
    }

    // ── Reconciliation ──────────────────────────────────────────────
    if let Some(v) = env.parsed("TALLY_RECONCILE_BATCH_SIZE", |s| parse_range(s, 1usize, 100_000)) {
        settings.reconcile.batch_size = v;
    }
    if let Some(v) =
        env.parsed("TALLY_RECONCILE_APPLICATIONS_SECS", |s| parse_range(s, 1u64, 86_400))
    {
        settings.reconcile.applications_interval_secs = v;
    }
    if let Some(v) = env.parsed("TALLY_RECONCILE_CHATS_SECS", |s| parse_range(s, 1u64, 86_400)) {
        settings.reconcile.chats_interval_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TALLY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("TALLY_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

/// Reject settings the runtime cannot work with.
pub fn validate(settings: &TallySettings) -> Result<()> {
    let checks = [
        (settings.database.pool_size == 0, "database.poolSize must be at least 1"),
        (settings.workers.chats_concurrency == 0, "workers.chatsConcurrency must be at least 1"),
        (
            settings.workers.messages_concurrency == 0,
            "workers.messagesConcurrency must be at least 1",
        ),
        (settings.workers.queue_capacity == 0, "workers.queueCapacity must be at least 1"),
        (settings.reconcile.batch_size == 0, "reconcile.batchSize must be at least 1"),
        (
            settings.reconcile.applications_interval_secs == 0,
            "reconcile.applicationsIntervalSecs must be at least 1",
        ),
        (
            settings.reconcile.chats_interval_secs == 0,
            "reconcile.chatsIntervalSecs must be at least 1",
        ),
        (
            !(0.0..=1.0).contains(&settings.workers.retry.jitter),
            "workers.retry.jitter must be within 0.0..=1.0",
        ),
    ];
    match checks.into_iter().find(|(failed, _)| *failed) {
        Some((_, message)) => Err(SettingsError::InvalidValue(message.to_string())),
        None => Ok(()),
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number within an inclusive range.
pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_backend(val: &str) -> Option<CounterBackend> {
    match val.to_lowercase().as_str() {
        "sqlite" => Some(CounterBackend::Sqlite),
        "memory" => Some(CounterBackend::Memory),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
