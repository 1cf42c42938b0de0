//! Ed25519 signing key for audit exports.
//!
//! The private key is a PKCS#8 document kept in the keychain under
//! [`SIGNING_KEY_ENTRY`]. It is generated on first use and never written
//! anywhere else. Ed25519 signatures are deterministic, so identical log
//! content always exports to identical bytes.

use std::sync::{Arc, Mutex};

use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use safeguard_core::{CoreError, KeychainProvider};

use crate::error::{AuditError, Result};

/// Keychain entry holding the PKCS#8-encoded signing key.
pub const SIGNING_KEY_ENTRY: &str = "safeguard-audit-signing";

/// A loaded Ed25519 key pair.
pub struct SigningKey {
    pair: Ed25519KeyPair,
}

impl SigningKey {
    /// Parse a PKCS#8 v2 document as produced by [`SigningKey::generate`].
    pub fn from_pkcs8(der: &[u8]) -> Result<Self> {
        let pair = Ed25519KeyPair::from_pkcs8(der).map_err(|e| AuditError::Signing {
            reason: format!("stored signing key rejected: {e}"),
        })?;
        Ok(Self { pair })
    }

    /// Generate a fresh key, returning it with its PKCS#8 encoding.
    pub fn generate() -> Result<(Self, Vec<u8>)> {
        let rng = SystemRandom::new();
        let der = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| AuditError::Signing {
                reason: "key generation failed".into(),
            })?
            .as_ref()
            .to_vec();
        Ok((Self::from_pkcs8(&der)?, der))
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.pair.sign(message).as_ref().to_vec()
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.pair.public_key().as_ref().to_vec()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Check an Ed25519 signature `sig` over `message` against `public_key`.
pub fn verify(public_key: &[u8], message: &[u8], sig: &[u8]) -> bool {
    UnparsedPublicKey::new(&signature::ED25519, public_key)
        .verify(message, sig)
        .is_ok()
}

/// Source of the audit signing key.
pub trait SigningKeyProvider: Send + Sync {
    /// Return the persisted key, generating and persisting one first if
    /// none exists.
    fn get_or_create(&self) -> Result<SigningKey>;
}

/// Keeps the signing key in a [`KeychainProvider`].
pub struct KeychainSigningKeyProvider {
    keychain: Arc<dyn KeychainProvider>,
    entry: String,
    // Serializes get-or-create so two callers cannot both generate.
    create_lock: Mutex<()>,
}

impl KeychainSigningKeyProvider {
    pub fn new(keychain: Arc<dyn KeychainProvider>) -> Self {
        Self::with_entry(keychain, SIGNING_KEY_ENTRY)
    }

    pub fn with_entry(keychain: Arc<dyn KeychainProvider>, entry: &str) -> Self {
        Self {
            keychain,
            entry: entry.to_string(),
            create_lock: Mutex::new(()),
        }
    }
}

impl SigningKeyProvider for KeychainSigningKeyProvider {
    fn get_or_create(&self) -> Result<SigningKey> {
        let _guard = self
            .create_lock
            .lock()
            .map_err(|e| AuditError::LockPoisoned(format!("signing key: {e}")))?;

        match self.keychain.get_secret(&self.entry) {
            Ok(der) => SigningKey::from_pkcs8(&der),
            Err(CoreError::SecretNotFound { .. }) => {
                let (key, der) = SigningKey::generate()?;
                self.keychain.set_secret(&self.entry, &der)?;
                tracing::info!(entry = %self.entry, "generated audit signing key");
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }
}
