//! Secure store for the safeguard data-protection subsystem.
//!
//! Values are encrypted at rest with AES-256-GCM under a versioned data key,
//! and each carries an HMAC-SHA256 integrity tag keyed by a PBKDF2-derived
//! key. Every read and write is recorded in a bounded access log.
//!
//! # Modules
//!
//! - [`store`] — [`SecureStore`]: records, rotation, wipe, reporting.
//! - [`keys`] — install salt, integrity key, wrapped data-key versions.
//! - [`access_log`] — capacity-bounded access log.
//! - [`anonymize`](mod@anonymize) — digit and word masking.
//! - [`status`] — protection status snapshot.
//! - [`error`] — Unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use safeguard_core::{SafeguardConfig, SystemClock, platform_keychain};
//! use safeguard_vault::{SecureStore, category};
//!
//! # fn example() -> safeguard_vault::Result<()> {
//! let config = SafeguardConfig::load("config/safeguard.toml")?;
//! let keychain = Arc::from(platform_keychain("data".as_ref()));
//! let store = SecureStore::open("data", config.vault, keychain, Arc::new(SystemClock))?;
//!
//! store.log_access(category::APPLICATION, "App started")?;
//! store.store("phone", "+1 555 0100")?;
//! if !store.verify_integrity("phone")? {
//!     // tampered: caller decides what to do
//! }
//! # Ok(())
//! # }
//! ```

pub mod access_log;
pub mod anonymize;
pub mod error;
pub mod keys;
pub mod status;
pub mod store;

pub use access_log::{AccessLog, AccessLogEntry, category};
pub use anonymize::anonymize;
pub use error::{Result, VaultError};
pub use status::ProtectionStatus;
pub use store::SecureStore;
