//! Key material and rotation bookkeeping.
//!
//! Two independent keys protect a record:
//!
//! - The **integrity key**, derived with PBKDF2 from a fixed application
//!   secret and the per-install salt. It is recomputed on demand and never
//!   written anywhere. The salt is generated once and never changes.
//! - A versioned **data key** that encrypts record values. Each version is
//!   stored wrapped under the master key held in the keychain. Rotation adds a
//!   new version; older versions stay until no record references them.
//!
//! All functions here take a `&Connection` so callers can run them inside a
//! transaction while holding the store lock.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use safeguard_core::crypto;

use crate::error::{Result, VaultError};

/// Secret mixed with the install salt to derive the integrity key.
const APP_SECRET: &[u8] = b"safeguard-app-integrity-secret";

/// Install salt length in bytes.
pub const SALT_LEN: usize = 16;

const META_SALT: &str = "user_salt";
const META_LAST_ROTATION: &str = "last_rotation";
const META_CURRENT_VERSION: &str = "current_key_version";

/// Per-install salt plus the rounds used to stretch it into the integrity key.
#[derive(Clone)]
pub struct KeyMaterial {
    salt: Vec<u8>,
    iterations: u32,
}

impl KeyMaterial {
    pub fn new(salt: Vec<u8>, iterations: u32) -> Self {
        Self { salt, iterations }
    }

    /// Derive the integrity key. Deliberately slow.
    pub fn integrity_key(&self) -> Result<[u8; crypto::KEY_LEN]> {
        Ok(crypto::derive_key(APP_SECRET, &self.salt, self.iterations)?)
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("salt", &"<redacted>")
            .field("iterations", &self.iterations)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Load the install salt, generating and persisting it on first use.
pub fn load_or_create_salt(conn: &Connection) -> Result<Vec<u8>> {
    if let Some(encoded) = get_meta(conn, META_SALT)? {
        return B64
            .decode(encoded.as_bytes())
            .map_err(|e| VaultError::CorruptMetadata {
                key: META_SALT,
                reason: e.to_string(),
            });
    }

    let salt = crypto::random_bytes(SALT_LEN)?;
    set_meta(conn, META_SALT, &B64.encode(&salt))?;
    tracing::info!("generated install salt");
    Ok(salt)
}

/// Time of the last successful rotation, if any.
pub fn last_rotation(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = get_meta(conn, META_LAST_ROTATION)? else {
        return Ok(None);
    };
    let millis: i64 = raw.parse().map_err(|e: std::num::ParseIntError| {
        VaultError::CorruptMetadata {
            key: META_LAST_ROTATION,
            reason: e.to_string(),
        }
    })?;
    Ok(DateTime::from_timestamp_millis(millis))
}

pub fn set_last_rotation(conn: &Connection, at: DateTime<Utc>) -> Result<()> {
    set_meta(conn, META_LAST_ROTATION, &at.timestamp_millis().to_string())
}

/// The data-key version new writes use; `None` before initialization.
pub fn current_version(conn: &Connection) -> Result<Option<u32>> {
    let Some(raw) = get_meta(conn, META_CURRENT_VERSION)? else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|e: std::num::ParseIntError| VaultError::CorruptMetadata {
            key: META_CURRENT_VERSION,
            reason: e.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Data keys
// ---------------------------------------------------------------------------

fn wrap_aad(version: u32) -> String {
    format!("safeguard-data-key:{version}")
}

/// Generate a new data key version, store it wrapped under `master_key`, and
/// return `(version, key)`. Does not change the current version.
pub fn create_data_key(
    conn: &Connection,
    master_key: &[u8],
    now: DateTime<Utc>,
) -> Result<(u32, Vec<u8>)> {
    let latest: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM data_keys", [], |row| row.get(0))?;
    let version = latest.unwrap_or(0) + 1;

    let key = crypto::random_bytes(crypto::KEY_LEN)?;
    let wrapped = crypto::seal(&key, master_key, wrap_aad(version).as_bytes())?;

    conn.execute(
        "INSERT INTO data_keys (version, wrapped, created_at) VALUES (?1, ?2, ?3)",
        params![version, wrapped, now.timestamp_millis()],
    )?;

    tracing::debug!(version = version, "created data key");
    Ok((version, key))
}

/// Unwrap the data key for `version`.
pub fn data_key(conn: &Connection, master_key: &[u8], version: u32) -> Result<Vec<u8>> {
    let wrapped: Vec<u8> = conn
        .query_row(
            "SELECT wrapped FROM data_keys WHERE version = ?1",
            params![version],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(VaultError::DataKeyMissing { version })?;

    Ok(crypto::open_sealed(
        &wrapped,
        master_key,
        wrap_aad(version).as_bytes(),
    )?)
}

/// Make `version` the one used for new writes.
pub fn set_current_version(conn: &Connection, version: u32) -> Result<()> {
    set_meta(conn, META_CURRENT_VERSION, &version.to_string())
}

/// Create the first data key if none exists yet. Returns `true` when a key
/// was created.
pub fn ensure_initial_data_key(
    conn: &Connection,
    master_key: &[u8],
    now: DateTime<Utc>,
) -> Result<bool> {
    if current_version(conn)?.is_some() {
        return Ok(false);
    }
    let (version, _) = create_data_key(conn, master_key, now)?;
    set_current_version(conn, version)?;
    set_last_rotation(conn, now)?;
    Ok(true)
}

/// Delete data-key versions other than `keep` that no record references.
pub fn retire_unused(conn: &Connection, keep: u32) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM data_keys
         WHERE version != ?1
           AND version NOT IN (SELECT DISTINCT key_version FROM records)",
        params![keep],
    )?;
    if removed > 0 {
        tracing::debug!(removed = removed, "retired unused data keys");
    }
    Ok(removed)
}

/// Number of data-key versions currently held.
pub fn data_key_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM data_keys", [], |row| row.get(0))?;
    Ok(count as usize)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
