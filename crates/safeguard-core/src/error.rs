//! Core error types.
//!
//! Every capability in this crate (crypto, keychain, configuration) reports
//! failures through [`CoreError`]. The vault and audit crates wrap it in their
//! own error enums.

/// Unified error type for the shared safeguard capabilities.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. invalid key length, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Decryption failed (e.g. wrong key, corrupted ciphertext, bad nonce).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Key derivation failed (e.g. zero iterations).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    /// The system CSPRNG could not produce bytes.
    #[error("random generation failed")]
    RandomFailed,

    // -- Keychain errors ----------------------------------------------------
    /// The named secret is not present in the keychain.
    #[error("secret not found in keychain: {name}")]
    SecretNotFound { name: String },

    /// Writing a secret to the keychain failed.
    #[error("failed to store secret {name}: {reason}")]
    SecretStoreFailed { name: String, reason: String },

    /// The keychain backend is unavailable or unsupported on this platform.
    #[error("keychain unavailable: {reason}")]
    KeychainUnavailable { reason: String },

    // -- Configuration ------------------------------------------------------
    /// The configuration file could not be parsed or holds invalid values.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// I/O error from the filesystem (keychain files, config files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
