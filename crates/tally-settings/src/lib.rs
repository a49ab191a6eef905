//! # tally-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TallySettings::default()`]
//! 2. **Settings file**: `~/.tally/settings.json` or an explicit path (deep-merged)
//! 3. **Environment variables**: `TALLY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

use std::path::PathBuf;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

/// `~/.tally`, falling back to `/tmp/.tally` without a home directory.
pub fn tally_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".tally")
}
