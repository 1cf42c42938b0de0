//! Configuration for the secure store and the audit engine.
//!
//! Settings are read from a TOML file with a `[vault]` and an `[audit]`
//! section. Every field has a default, so an empty or missing file yields
//! [`SafeguardConfig::default`].
//!
//! ```toml
//! [vault]
//! access_log_capacity = 100
//! rotation_interval_days = 30
//! kdf_iterations = 10000
//! integrity_probe_key = "example_key"
//!
//! [audit]
//! min_spacing_ms = 3000
//! alert_window_ms = 10000
//! alert_threshold = 5
//! audit_log_max_entries = 10000
//! alert_log_max_entries = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeguardConfig {
    pub vault: VaultConfig,
    pub audit: AuditConfig,
}

impl SafeguardConfig {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults. A file that exists but cannot be
    /// parsed, or that holds out-of-range values, is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CoreError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(CoreError::Config {
                reason: reason.to_string(),
            })
        };

        if self.vault.access_log_capacity == 0 {
            return invalid("vault.access_log_capacity must be at least 1");
        }
        if self.vault.kdf_iterations == 0 {
            return invalid("vault.kdf_iterations must be at least 1");
        }
        if self.audit.alert_window_ms == 0 {
            return invalid("audit.alert_window_ms must be at least 1");
        }
        if self.audit.audit_log_max_entries == Some(0) || self.audit.alert_log_max_entries == Some(0)
        {
            return invalid("audit retention limits must be at least 1 when set");
        }
        Ok(())
    }
}

/// Secure store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Maximum number of access-log entries kept; oldest are dropped first.
    pub access_log_capacity: usize,
    /// Days after which the data key is rotated on initialization.
    pub rotation_interval_days: u32,
    /// PBKDF2 rounds used to derive the integrity key.
    pub kdf_iterations: u32,
    /// Record name checked by the protection status report.
    pub integrity_probe_key: String,
}

impl VaultConfig {
    pub fn rotation_interval(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.rotation_interval_days))
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            access_log_capacity: 100,
            rotation_interval_days: 30,
            kdf_iterations: 10_000,
            integrity_probe_key: "example_key".to_string(),
        }
    }
}

/// Audit engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Minimum gap between two invocations of the same action.
    pub min_spacing_ms: u64,
    /// Width of the abuse-detection window.
    pub alert_window_ms: u64,
    /// An alert fires when more than this many invocations fall in the window.
    pub alert_threshold: usize,
    /// Audit-log retention; `None` keeps everything.
    pub audit_log_max_entries: Option<usize>,
    /// Alert-log retention; `None` keeps everything.
    pub alert_log_max_entries: Option<usize>,
}

impl AuditConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_millis(self.alert_window_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: 3_000,
            alert_window_ms: 10_000,
            alert_threshold: 5,
            audit_log_max_entries: Some(10_000),
            alert_log_max_entries: Some(1_000),
        }
    }
}
