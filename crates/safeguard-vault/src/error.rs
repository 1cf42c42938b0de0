//! Secure store error types.
//!
//! Absence is never an error in this crate: missing records come back as
//! `None` and failed integrity checks as `false`. [`VaultError`] is reserved
//! for genuine storage and crypto faults.

use safeguard_core::CoreError;

/// Unified error type for the secure store.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Crypto, keychain or configuration failure from `safeguard-core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database schema setup failed.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// A record references a data-key version that no longer exists.
    #[error("data key version {version} not found")]
    DataKeyMissing { version: u32 },

    /// Persisted metadata (salt, timestamps, versions) could not be parsed.
    #[error("corrupt metadata {key}: {reason}")]
    CorruptMetadata { key: &'static str, reason: String },

    /// The store holds data keys but the keychain has no master key to
    /// unwrap them.
    #[error("master key {entry} is missing from the keychain")]
    MasterKeyMissing { entry: &'static str },

    /// A decrypted record is not valid UTF-8.
    #[error("record {name} does not hold valid UTF-8")]
    CorruptRecord { name: String },

    /// A store mutex was poisoned by a panicking thread.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
