//! Symmetric cryptographic primitives built on `ring`.
//!
//! - **Encryption/decryption**: AES-256-GCM with a fresh random 96-bit nonce
//!   per call. Callers may bind associated data (e.g. a record name) so a
//!   ciphertext cannot be replayed under a different label.
//! - **Key derivation**: PBKDF2-HMAC-SHA256 with a caller-chosen iteration
//!   count.
//! - **Integrity tags**: HMAC-SHA256 with constant-time verification.
//! - **Random generation**: `ring::rand::SystemRandom`.

use std::num::NonZeroU32;

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::hmac;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{CoreError, Result};

/// Length of an AES-256-GCM / HMAC-SHA256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the AES-256-GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// Yields exactly one nonce, then errors. Each sealing/opening key built from
/// it is therefore single-use.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` with AES-256-GCM under `key`, authenticating `aad`.
///
/// Returns `(nonce, ciphertext)`; the ciphertext carries the 128-bit tag.
///
/// # Errors
///
/// Returns [`CoreError::EncryptionFailed`] if the key length is wrong or
/// `ring` reports a failure.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    if key.len() != KEY_LEN {
        return Err(CoreError::EncryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let nonce_bytes: [u8; NONCE_LEN_BYTES] =
        random_array().map_err(|_| CoreError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| CoreError::EncryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;

    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::from(aad), &mut in_out)
        .map_err(|_| CoreError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "encrypted data"
    );

    Ok((nonce_bytes, in_out))
}

/// Decrypt `ciphertext` (tag appended) with `nonce`, `key` and the same `aad`
/// that was passed to [`encrypt`].
///
/// # Errors
///
/// Returns [`CoreError::DecryptionFailed`] if the key is wrong, the
/// ciphertext or associated data was tampered with, or the nonce differs.
pub fn decrypt(
    nonce: &[u8; NONCE_LEN_BYTES],
    ciphertext: &[u8],
    key: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(CoreError::DecryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| CoreError::DecryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;

    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(*nonce));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::from(aad), &mut in_out)
        .map_err(|_| CoreError::DecryptionFailed {
            reason: "authentication failed, wrong key or corrupted data".into(),
        })?;

    let result = plaintext.to_vec();

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len = result.len(),
        "decrypted data"
    );

    Ok(result)
}

/// Split a `[nonce][ciphertext+tag]` blob and decrypt it.
pub fn open_sealed(blob: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN_BYTES + TAG_LEN {
        return Err(CoreError::DecryptionFailed {
            reason: format!("sealed blob is {} bytes, too small", blob.len()),
        });
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN_BYTES);
    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(nonce_bytes);
    decrypt(&nonce, ciphertext, key, aad)
}

/// Encrypt and return a single `[nonce][ciphertext+tag]` blob.
pub fn seal(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = encrypt(plaintext, key, aad)?;
    let mut blob = Vec::with_capacity(NONCE_LEN_BYTES + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 256-bit key from `secret` and `salt` with PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same inputs always yield the same key.
///
/// # Errors
///
/// Returns [`CoreError::KeyDerivationFailed`] if `iterations` is zero.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; KEY_LEN]> {
    let iterations = NonZeroU32::new(iterations).ok_or_else(|| CoreError::KeyDerivationFailed {
        reason: "iteration count must be non-zero".into(),
    })?;

    let mut out = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, secret, &mut out);

    tracing::trace!(iterations = iterations.get(), "derived key via PBKDF2");
    Ok(out)
}

// ---------------------------------------------------------------------------
// Integrity tags
// ---------------------------------------------------------------------------

/// Compute HMAC-SHA256 of `data` under `key`.
pub fn hmac_sign(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// Check an HMAC-SHA256 `tag` over `data` in constant time.
pub fn hmac_verify(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, data, tag).is_ok()
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`CoreError::RandomFailed`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf).map_err(|_| CoreError::RandomFailed)?;
    Ok(buf)
}

/// Generate a fixed-size array of cryptographically secure random bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; N];
    rng.fill(&mut buf).map_err(|_| CoreError::RandomFailed)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let plaintext = b"hello, safeguard!";

        let (nonce, ciphertext) = encrypt(plaintext, &key, b"label").unwrap();
        let decrypted = decrypt(&nonce, &ciphertext, &key, b"label").unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key1 = random_bytes(KEY_LEN).unwrap();
        let key2 = random_bytes(KEY_LEN).unwrap();

        let (nonce, ciphertext) = encrypt(b"secret data", &key1, b"").unwrap();
        assert!(decrypt(&nonce, &ciphertext, &key2, b"").is_err());
    }

    #[test]
    fn decrypt_with_other_aad_fails() {
        let key = random_bytes(KEY_LEN).unwrap();

        let (nonce, ciphertext) = encrypt(b"secret data", &key, b"record:a").unwrap();
        assert!(decrypt(&nonce, &ciphertext, &key, b"record:b").is_err());
    }

    #[test]
    fn decrypt_with_tampered_ciphertext_fails() {
        let key = random_bytes(KEY_LEN).unwrap();

        let (nonce, mut ciphertext) = encrypt(b"secret data", &key, b"").unwrap();
        if let Some(byte) = ciphertext.first_mut() {
            *byte ^= 0x01;
        }

        assert!(decrypt(&nonce, &ciphertext, &key, b"").is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = vec![0u8; 16];
        assert!(encrypt(b"test", &short_key, b"").is_err());
    }

    #[test]
    fn sealed_blob_roundtrip_and_truncation() {
        let key = random_bytes(KEY_LEN).unwrap();
        let blob = seal(b"wrapped", &key, b"entry").unwrap();

        assert_eq!(open_sealed(&blob, &key, b"entry").unwrap(), b"wrapped");
        assert!(open_sealed(&blob[..10], &key, b"entry").is_err());
    }

    #[test]
    fn pbkdf2_is_deterministic_per_salt() {
        let k1 = derive_key(b"app-secret", b"salt-one", 1_000).unwrap();
        let k2 = derive_key(b"app-secret", b"salt-one", 1_000).unwrap();
        let k3 = derive_key(b"app-secret", b"salt-two", 1_000).unwrap();

        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn pbkdf2_rejects_zero_iterations() {
        let result = derive_key(b"secret", b"salt", 0);
        assert!(matches!(result, Err(CoreError::KeyDerivationFailed { .. })));
    }

    #[test]
    fn hmac_verifies_only_matching_data() {
        let key = random_bytes(KEY_LEN).unwrap();
        let tag = hmac_sign(&key, b"value");

        assert_eq!(tag.len(), 32);
        assert!(hmac_verify(&key, b"value", &tag));
        assert!(!hmac_verify(&key, b"value2", &tag));
        assert!(!hmac_verify(&key, b"value", &tag[..31]));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();

        let (nonce, ciphertext) = encrypt(b"", &key, b"").unwrap();
        assert_eq!(decrypt(&nonce, &ciphertext, &key, b"").unwrap(), b"");
    }
}
