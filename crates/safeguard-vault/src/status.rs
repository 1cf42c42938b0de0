//! Protection status report.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A snapshot of how the secure store protects data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectionStatus {
    pub cipher: &'static str,
    pub integrity: &'static str,
    pub storage: &'static str,
    pub access_log_entries: usize,
    pub last_rotation: Option<DateTime<Utc>>,
    pub key_version: u32,
    /// Record name used for the sample integrity check.
    pub probe_key: String,
    pub probe_intact: bool,
    pub active: bool,
}

impl ProtectionStatus {
    /// Label/value pairs in display order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Encryption", self.cipher.to_string()),
            ("Integrity", self.integrity.to_string()),
            ("Storage", self.storage.to_string()),
            (
                "Access logs",
                format!("{} entries", self.access_log_entries),
            ),
            (
                "Key rotation",
                self.last_rotation
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "never".to_string()),
            ),
            ("Key version", self.key_version.to_string()),
            (
                "Integrity OK (sample)",
                format!("{} ({})", self.probe_intact, self.probe_key),
            ),
            (
                "Security status",
                if self.active { "Active" } else { "Inactive" }.to_string(),
            ),
        ]
    }
}
