//! # tally-logging
//!
//! Installs the process-wide `tracing` subscriber: an [`EnvFilter`] built
//! from the configured level and per-module overrides (`RUST_LOG` wins when
//! set) in front of a JSON or human-readable `fmt` layer on stderr.

#![deny(unsafe_code)]

use std::fmt::Write;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging subscriber.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level directive (`info`, `debug`, ...).
    pub level: String,
    /// Emit JSON lines.
    pub json: bool,
    /// Per-module overrides, e.g. `("tally_jobs", "debug")`.
    pub module_levels: Vec<(String, String)>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: Vec::new(),
        }
    }
}

/// Errors from subscriber installation.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Compose the filter directive string, e.g. `info,tally_jobs=debug`.
pub fn build_filter(config: &LoggingConfig) -> String {
    let mut filter = config.level.to_lowercase();
    for (module, level) in &config.module_levels {
        let _ = write!(filter, ",{module}={}", level.to_lowercase());
    }
    filter
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()?;
    tracing::debug!(%filter, json = config.json, "logging initialized");
    Ok(())
}
