//! The audit engine.
//!
//! [`AuditEngine`] ties together the rate limiter, the persistent audit and
//! alert logs, and the signing key used for exports.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use safeguard_core::{AuditConfig, Clock, KeychainProvider};

use crate::error::Result;
use crate::export::{self, SignedExport};
use crate::limiter::SlidingWindowLimiter;
use crate::log::{AlertEntry, AuditEntry, AuditLog, AuditStatus};
use crate::signing::{KeychainSigningKeyProvider, SigningKey, SigningKeyProvider};

/// File name used by [`AuditEngine::open`].
pub const AUDIT_DB: &str = "audit.db";

/// Rate limiting, abuse alerts and tamper-evident export for sensitive
/// actions.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use safeguard_core::{AuditConfig, MemoryKeychain, SystemClock};
/// # use safeguard_audit::AuditEngine;
/// # fn example() -> safeguard_audit::Result<()> {
/// let engine = AuditEngine::open(
///     "data",
///     AuditConfig::default(),
///     Arc::new(MemoryKeychain::new()),
///     Arc::new(SystemClock),
/// )?;
///
/// if engine.register_sensitive_action("export_data") {
///     // proceed
/// }
/// let document = engine.export_signed_logs()?;
/// assert!(engine.verify_export(&document)?);
/// # Ok(())
/// # }
/// ```
pub struct AuditEngine {
    log: AuditLog,
    limiter: SlidingWindowLimiter,
    /// Held from the limiter decision until its audit entry is written, so
    /// log order matches decision order.
    decisions: Mutex<()>,
    signer: Box<dyn SigningKeyProvider>,
    signing_key: OnceLock<SigningKey>,
    clock: Arc<dyn Clock>,
}

impl AuditEngine {
    /// Open (or create) the audit database under `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        config: AuditConfig,
        keychain: Arc<dyn KeychainProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!(dir = %dir.display(), "opening audit engine");
        std::fs::create_dir_all(dir).map_err(safeguard_core::CoreError::from)?;

        let log = AuditLog::open(dir.join(AUDIT_DB), &config, clock.clone())?;
        Ok(Self::assemble(log, &config, keychain, clock))
    }

    /// Open an engine backed by an in-memory database (useful for testing).
    pub fn open_in_memory(
        config: AuditConfig,
        keychain: Arc<dyn KeychainProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let log = AuditLog::open_in_memory(&config, clock.clone())?;
        Ok(Self::assemble(log, &config, keychain, clock))
    }

    fn assemble(
        log: AuditLog,
        config: &AuditConfig,
        keychain: Arc<dyn KeychainProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log,
            limiter: SlidingWindowLimiter::from_config(config),
            decisions: Mutex::new(()),
            signer: Box::new(KeychainSigningKeyProvider::new(keychain)),
            signing_key: OnceLock::new(),
            clock,
        }
    }

    /// Replace the source of the export signing key.
    pub fn with_signing_key_provider(mut self, provider: Box<dyn SigningKeyProvider>) -> Self {
        self.signer = provider;
        self.signing_key = OnceLock::new();
        self
    }

    // -- Sensitive actions --------------------------------------------------

    /// Record an invocation of `action` and decide whether it may proceed.
    ///
    /// Raises an alert when the action has been invoked more than the alert
    /// threshold within the alert window. Independently, returns `false` and
    /// logs `RATE_LIMITED` when the previous invocation was less than the
    /// minimum spacing ago; otherwise logs `SUCCESS` and returns `true`.
    ///
    /// Rate-limited invocations still count toward the alert window. A
    /// failure to persist the audit entry is logged and does not change the
    /// decision. Concurrent callers are serialized, so audit entries appear
    /// in the order the decisions were made.
    pub fn register_sensitive_action(&self, action: &str) -> bool {
        let Ok(_decision) = self.decisions.lock() else {
            tracing::error!(action = action, "decision lock poisoned, denying action");
            return false;
        };

        let observation = match self.limiter.observe(action, self.clock.monotonic()) {
            Ok(obs) => obs,
            Err(e) => {
                tracing::error!(action = action, error = %e, "rate limiter unavailable, denying action");
                return false;
            }
        };

        if observation.burst {
            self.raise_alert(&format!("Suspected abuse of action: {action}"));
        }

        if observation.rate_limited {
            self.log_event(action, AuditStatus::RateLimited);
            return false;
        }

        self.log_event(action, AuditStatus::Success);
        true
    }

    fn log_event(&self, action: &str, status: AuditStatus) {
        if let Err(e) = self.log.record(action, status) {
            tracing::warn!(action = action, status = %status, error = %e, "failed to persist audit entry");
        }
    }

    fn raise_alert(&self, message: &str) {
        tracing::warn!(alert = message, "security alert");
        if let Err(e) = self.log.record_alert(message) {
            tracing::warn!(error = %e, "failed to persist security alert");
        }
    }

    /// Forget rate-limiter history for every action.
    pub fn reset_rate_limits(&self) -> Result<()> {
        self.limiter.reset()
    }

    // -- Export -------------------------------------------------------------

    /// Export the full audit log as a signed JSON document.
    pub fn export_signed_logs(&self) -> Result<String> {
        let entries = self.log.entries()?;
        let count = entries.len();
        let document = SignedExport::sign(entries, self.signing_key()?)?.to_pretty_json()?;

        tracing::info!(entries = count, "exported signed audit log");
        Ok(document)
    }

    /// Check a document produced by [`export_signed_logs`](Self::export_signed_logs)
    /// against this engine's public key.
    pub fn verify_export(&self, document: &str) -> Result<bool> {
        export::verify_signed_export(document, &self.public_key()?)
    }

    /// Raw Ed25519 public key for verifying exports.
    pub fn public_key(&self) -> Result<Vec<u8>> {
        Ok(self.signing_key()?.public_key())
    }

    fn signing_key(&self) -> Result<&SigningKey> {
        if let Some(key) = self.signing_key.get() {
            return Ok(key);
        }
        let key = self.signer.get_or_create()?;
        Ok(self.signing_key.get_or_init(|| key))
    }

    // -- Logs ---------------------------------------------------------------

    /// Wipe the audit log. Alerts are kept.
    pub fn clear_audit_logs(&self) -> Result<()> {
        self.log.clear_entries()
    }

    /// Audit entries in storage order.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        self.log.entries()
    }

    /// Alert messages in storage order.
    pub fn alerts(&self) -> Result<Vec<String>> {
        Ok(self
            .log
            .alert_entries()?
            .into_iter()
            .map(|alert| alert.message)
            .collect())
    }

    pub fn alert_entries(&self) -> Result<Vec<AlertEntry>> {
        self.log.alert_entries()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use safeguard_core::{ManualClock, MemoryKeychain, SafeguardConfig};

    use super::*;
    use crate::error::AuditError;

    fn test_engine() -> (AuditEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = AuditEngine::open_in_memory(
            AuditConfig::default(),
            Arc::new(MemoryKeychain::new()),
            clock.clone(),
        )
        .unwrap();
        (engine, clock)
    }

    fn statuses(engine: &AuditEngine) -> Vec<AuditStatus> {
        engine
            .audit_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect()
    }

    #[test]
    fn rapid_repeat_is_rate_limited() {
        let (engine, clock) = test_engine();

        assert!(engine.register_sensitive_action("export_data"));
        clock.advance(Duration::from_millis(500));
        assert!(!engine.register_sensitive_action("export_data"));

        assert_eq!(
            statuses(&engine),
            vec![AuditStatus::Success, AuditStatus::RateLimited]
        );
    }

    #[test]
    fn spaced_calls_pass() {
        let (engine, clock) = test_engine();

        assert!(engine.register_sensitive_action("view"));
        clock.advance(Duration::from_secs(3));
        assert!(engine.register_sensitive_action("view"));
    }

    #[test]
    fn burst_raises_one_alert_per_excess_call() {
        let (engine, clock) = test_engine();
        for _ in 0..5 {
            engine.register_sensitive_action("delete");
            clock.advance(Duration::from_millis(100));
        }
        assert!(engine.alerts().unwrap().is_empty());

        engine.register_sensitive_action("delete");
        engine.register_sensitive_action("delete");

        let alerts = engine.alerts().unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0], "Suspected abuse of action: delete");
        assert_eq!(engine.alert_entries().unwrap()[0].kind, "ALERT");
    }

    #[test]
    fn zero_alert_threshold_keeps_rate_limiting() {
        let config = SafeguardConfig::from_toml("[audit]\nalert_threshold = 0\n")
            .unwrap()
            .audit;
        let clock = Arc::new(ManualClock::starting_now());
        let engine =
            AuditEngine::open_in_memory(config, Arc::new(MemoryKeychain::new()), clock.clone())
                .unwrap();

        assert!(engine.register_sensitive_action("export_data"));
        clock.advance(Duration::from_millis(100));
        assert!(!engine.register_sensitive_action("export_data"));

        assert_eq!(engine.alerts().unwrap().len(), 2);
        assert_eq!(
            statuses(&engine),
            vec![AuditStatus::Success, AuditStatus::RateLimited]
        );
    }

    #[test]
    fn rate_limited_calls_are_still_logged() {
        let (engine, _) = test_engine();
        for _ in 0..3 {
            engine.register_sensitive_action("a");
        }
        assert_eq!(engine.audit_entries().unwrap().len(), 3);
    }

    #[test]
    fn export_verifies_with_public_key() {
        let (engine, _) = test_engine();
        engine.register_sensitive_action("a");
        engine.register_sensitive_action("a");

        let doc = engine.export_signed_logs().unwrap();
        assert!(engine.verify_export(&doc).unwrap());
        assert!(export::verify_signed_export(&doc, &engine.public_key().unwrap()).unwrap());
    }

    #[test]
    fn export_is_deterministic() {
        let (engine, _) = test_engine();
        engine.register_sensitive_action("a");

        assert_eq!(
            engine.export_signed_logs().unwrap(),
            engine.export_signed_logs().unwrap()
        );
    }

    #[test]
    fn clear_keeps_alerts() {
        let (engine, _) = test_engine();
        for _ in 0..6 {
            engine.register_sensitive_action("a");
        }

        engine.clear_audit_logs().unwrap();

        assert!(engine.audit_entries().unwrap().is_empty());
        assert_eq!(engine.alerts().unwrap().len(), 1);
    }

    #[test]
    fn reset_rate_limits_forgets_history() {
        let (engine, _) = test_engine();
        assert!(engine.register_sensitive_action("a"));
        engine.reset_rate_limits().unwrap();
        assert!(engine.register_sensitive_action("a"));
    }

    struct FailingProvider;

    impl SigningKeyProvider for FailingProvider {
        fn get_or_create(&self) -> Result<SigningKey> {
            Err(AuditError::Signing {
                reason: "no key".into(),
            })
        }
    }

    #[test]
    fn export_fails_without_signing_key() {
        let (engine, _) = test_engine();
        let engine = engine.with_signing_key_provider(Box::new(FailingProvider));
        engine.register_sensitive_action("a");

        assert!(matches!(
            engine.export_signed_logs(),
            Err(AuditError::Signing { .. })
        ));
    }
}
