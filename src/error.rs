//! Error types for the playerstore library.
//!
//! "Does not exist" is deliberately **not** an error: lookups for unknown
//! names, identifiers, guilds or towns return `Ok(None)` / `Ok(false)`.
//! The variants here cover genuine store faults and caller mistakes.

use thiserror::Error;

/// Top-level error type for all playerstore operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite persistence error (connectivity, constraint, malformed result).
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure (item attribute blobs).
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A `PlayerRecord` was passed to an operation that requires it to have
    /// been loaded (or created) first, so it carries no identifier yet.
    #[error("Player record has no identifier; load or create it first")]
    UnloadedRecord,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, StoreError>;
