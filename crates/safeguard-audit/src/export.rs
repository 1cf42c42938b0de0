//! Signed audit-log export.
//!
//! The signed payload is the audit log serialized as a compact JSON array.
//! The document wraps it as
//!
//! ```json
//! {
//!     "logs": [ { "timestamp": "...", "action": "...", "status": "SUCCESS" } ],
//!     "signature": "<base64 Ed25519 signature>"
//! }
//! ```
//!
//! pretty-printed with four-space indentation. Verification re-serializes
//! `logs` compactly, so formatting changes to the document do not matter but
//! any change to the entries does.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::error::Result;
use crate::log::AuditEntry;
use crate::signing::{self, SigningKey};

/// An exported, signed audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedExport {
    pub logs: Vec<AuditEntry>,
    pub signature: String,
}

impl SignedExport {
    /// Sign `logs` with `key`.
    pub fn sign(logs: Vec<AuditEntry>, key: &SigningKey) -> Result<Self> {
        let payload = serde_json::to_vec(&logs)?;
        let signature = B64.encode(key.sign(&payload));
        Ok(Self { logs, signature })
    }

    /// Render the document with four-space indentation.
    pub fn to_pretty_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Whether the signature matches the entries under `public_key`.
    pub fn verify(&self, public_key: &[u8]) -> Result<bool> {
        let Ok(sig) = B64.decode(self.signature.as_bytes()) else {
            return Ok(false);
        };
        let payload = serde_json::to_vec(&self.logs)?;
        Ok(signing::verify(public_key, &payload, &sig))
    }
}

/// Parse an exported document and check its signature.
///
/// Returns `Ok(false)` for a well-formed document whose signature does not
/// match, and an error when `document` is not an export at all.
pub fn verify_signed_export(document: &str, public_key: &[u8]) -> Result<bool> {
    let export: SignedExport = serde_json::from_str(document)?;
    export.verify(public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::AuditStatus;

    fn entries() -> Vec<AuditEntry> {
        vec![
            AuditEntry {
                timestamp: "2024-03-01 12:00:00".into(),
                action: "export_data".into(),
                status: AuditStatus::Success,
            },
            AuditEntry {
                timestamp: "2024-03-01 12:00:01".into(),
                action: "export_data".into(),
                status: AuditStatus::RateLimited,
            },
        ]
    }

    #[test]
    fn document_layout() {
        let (key, _) = SigningKey::generate().unwrap();
        let doc = SignedExport::sign(entries(), &key)
            .unwrap()
            .to_pretty_json()
            .unwrap();

        assert!(doc.starts_with("{\n    \"logs\": [\n        {\n"));
        assert!(doc.contains("\n    \"signature\": \""));
        let logs_at = doc.find("\"logs\"").unwrap();
        let sig_at = doc.find("\"signature\"").unwrap();
        assert!(logs_at < sig_at);
    }

    #[test]
    fn signature_covers_compact_array() {
        let (key, _) = SigningKey::generate().unwrap();
        let export = SignedExport::sign(entries(), &key).unwrap();

        let compact = serde_json::to_vec(&entries()).unwrap();
        let sig = B64.decode(&export.signature).unwrap();
        assert!(signing::verify(&key.public_key(), &compact, &sig));
    }

    #[test]
    fn verifies_and_detects_mutation() {
        let (key, _) = SigningKey::generate().unwrap();
        let doc = SignedExport::sign(entries(), &key)
            .unwrap()
            .to_pretty_json()
            .unwrap();

        assert!(verify_signed_export(&doc, &key.public_key()).unwrap());

        let tampered = doc.replacen("RATE_LIMITED", "SUCCESS", 1);
        assert!(!verify_signed_export(&tampered, &key.public_key()).unwrap());
    }

    #[test]
    fn wrong_key_does_not_verify() {
        let (key, _) = SigningKey::generate().unwrap();
        let (other, _) = SigningKey::generate().unwrap();
        let doc = SignedExport::sign(entries(), &key)
            .unwrap()
            .to_pretty_json()
            .unwrap();

        assert!(!verify_signed_export(&doc, &other.public_key()).unwrap());
    }

    #[test]
    fn empty_log_exports_and_verifies() {
        let (key, _) = SigningKey::generate().unwrap();
        let doc = SignedExport::sign(Vec::new(), &key)
            .unwrap()
            .to_pretty_json()
            .unwrap();

        assert!(doc.contains("\"logs\": []"));
        assert!(verify_signed_export(&doc, &key.public_key()).unwrap());
    }

    #[test]
    fn garbage_is_an_error() {
        let (key, _) = SigningKey::generate().unwrap();
        assert!(verify_signed_export("not json", &key.public_key()).is_err());
    }

    #[test]
    fn bad_base64_signature_is_false() {
        let (key, _) = SigningKey::generate().unwrap();
        let doc = r#"{"logs": [], "signature": "%%%"}"#;
        assert!(!verify_signed_export(doc, &key.public_key()).unwrap());
    }
}
