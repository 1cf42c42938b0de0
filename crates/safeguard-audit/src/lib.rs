//! Audit engine for the safeguard data-protection subsystem.
//!
//! Sensitive actions are passed through [`AuditEngine::register_sensitive_action`],
//! which rate-limits rapid repeats, raises alerts on bursts and records every
//! decision in a persistent audit log. The log can be exported as a JSON
//! document signed with an Ed25519 key held in the keychain.
//!
//! # Modules
//!
//! - [`engine`] — [`AuditEngine`].
//! - [`limiter`] — per-action sliding-window limiter.
//! - [`log`] — audit and alert tables with independent retention.
//! - [`signing`] — Ed25519 signing key and its keychain-backed provider.
//! - [`export`] — signed export document and its verification.
//! - [`error`] — Unified error types.

pub mod engine;
pub mod error;
pub mod export;
pub mod limiter;
pub mod log;
pub mod signing;

pub use engine::AuditEngine;
pub use error::{AuditError, Result};
pub use export::{SignedExport, verify_signed_export};
pub use limiter::{Observation, SlidingWindowLimiter};
pub use log::{AlertEntry, AuditEntry, AuditStatus};
pub use signing::{KeychainSigningKeyProvider, SigningKey, SigningKeyProvider};
