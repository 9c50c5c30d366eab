//! Configuration for the player store.
//!
//! Loadable from TOML; every field has a serde default so a partial (or
//! empty) config file is valid.

use serde::{Deserialize, Serialize};

/// Store configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
    /// How long a cached unjust-kill count with **zero** kills in its
    /// window stays valid before it is re-queried, in seconds.
    ///
    /// A window with kills expires exactly when the oldest counted kill
    /// ages out; a window with no kills has no such boundary, so this
    /// minimum re-query interval applies instead. Clamped at use site to
    /// the window length.
    #[serde(default = "default_60")]
    pub zero_kill_recheck_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: 5000,
            zero_kill_recheck_secs: 60,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`crate::StoreError::Config`] if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::StoreError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

fn default_true() -> bool {
    true
}
fn default_5000() -> u64 {
    5000
}
fn default_60() -> i64 {
    60
}
