//! Audit engine error types.

use safeguard_core::CoreError;

/// Unified error type for the audit engine.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Keychain, crypto or configuration failure from `safeguard-core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization of an export failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Audit database schema setup failed.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// Signing key generation, parsing or signing failed.
    #[error("signing failed: {reason}")]
    Signing { reason: String },

    /// An audit mutex was poisoned by a panicking thread.
    #[error("audit lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias used throughout the audit crate.
pub type Result<T> = std::result::Result<T, AuditError>;
