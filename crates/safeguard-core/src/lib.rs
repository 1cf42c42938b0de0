//! Shared capabilities for the safeguard data-protection subsystem.
//!
//! Both the secure store (`safeguard-vault`) and the audit engine
//! (`safeguard-audit`) build on the seams defined here, and on nothing else
//! from each other.
//!
//! # Modules
//!
//! - [`crypto`] — AES-256-GCM, PBKDF2-HMAC-SHA256, HMAC-SHA256, CSPRNG.
//! - [`keychain`] — named secret storage (OS keychain or sealed files).
//! - [`clock`] — wall and monotonic time, with a manual clock for tests.
//! - [`config`] — TOML configuration for both components.
//! - [`error`] — Unified error types.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keychain;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuditConfig, SafeguardConfig, VaultConfig};
pub use error::{CoreError, Result};
pub use keychain::{FileKeychain, KeychainProvider, MemoryKeychain, platform_keychain};
