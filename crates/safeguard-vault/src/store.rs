//! SQLite-backed encrypted record store.
//!
//! [`SecureStore`] owns two databases, each behind its own mutex:
//!
//! - `secure_store.db` — encrypted records, wrapped data keys, metadata.
//! - `access_log.db` — the bounded [`AccessLog`].
//!
//! # Schema
//!
//! - `records` — one row per name: AES-256-GCM ciphertext, nonce, the
//!   data-key version it was sealed with, and the base64 HMAC tag of the
//!   plaintext. Value and tag are always written by the same statement.
//! - `data_keys` — data-key versions wrapped under the keychain master key.
//! - `metadata` — install salt, last rotation time, current key version.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use safeguard_core::keychain::{self, KeychainProvider};
use safeguard_core::{Clock, CoreError, VaultConfig, crypto};

use crate::access_log::{AccessLog, category};
use crate::error::{Result, VaultError};
use crate::keys::{self, KeyMaterial};
use crate::status::ProtectionStatus;

/// Keychain entry holding the master key that wraps data keys.
pub const MASTER_KEY_ENTRY: &str = "safeguard-vault-master";

/// File names used by [`SecureStore::open`].
pub const STORE_DB: &str = "secure_store.db";
pub const ACCESS_LOG_DB: &str = "access_log.db";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    tracing::debug!("running secure store schema migrations");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS data_keys (
            version    INTEGER PRIMARY KEY,
            wrapped    BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            name        TEXT PRIMARY KEY,
            ciphertext  BLOB NOT NULL,
            nonce       BLOB NOT NULL,
            key_version INTEGER NOT NULL REFERENCES data_keys(version),
            tag         TEXT,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_key_version ON records(key_version);",
    )
    .map_err(|e| VaultError::MigrationFailed {
        reason: e.to_string(),
    })?;

    tracing::debug!("secure store schema migrations complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// SecureStore
// ---------------------------------------------------------------------------

/// Encrypted, integrity-tagged key/value store with a bounded access log.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use safeguard_core::{MemoryKeychain, SystemClock, VaultConfig};
/// # use safeguard_vault::SecureStore;
/// # fn example() -> safeguard_vault::Result<()> {
/// let store = SecureStore::open(
///     "data",
///     VaultConfig::default(),
///     Arc::new(MemoryKeychain::new()),
///     Arc::new(SystemClock),
/// )?;
///
/// store.store("email", "ada@example.com")?;
/// assert_eq!(store.get("email")?.as_deref(), Some("ada@example.com"));
/// assert!(store.verify_integrity("email")?);
/// # Ok(())
/// # }
/// ```
pub struct SecureStore {
    records: Mutex<Connection>,
    access_log: AccessLog,
    keychain: Arc<dyn KeychainProvider>,
    clock: Arc<dyn Clock>,
    config: VaultConfig,
    material: OnceLock<KeyMaterial>,
}

impl SecureStore {
    /// Open (or create) a store under `dir` and initialize it.
    pub fn open(
        dir: impl AsRef<Path>,
        config: VaultConfig,
        keychain: Arc<dyn KeychainProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!(dir = %dir.display(), "opening secure store");
        std::fs::create_dir_all(dir).map_err(CoreError::from)?;

        let conn = Connection::open(dir.join(STORE_DB))?;
        let access_log = AccessLog::open(
            dir.join(ACCESS_LOG_DB),
            config.access_log_capacity,
            clock.clone(),
        )?;
        Self::assemble(conn, access_log, config, keychain, clock)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory(
        config: VaultConfig,
        keychain: Arc<dyn KeychainProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let access_log = AccessLog::open_in_memory(config.access_log_capacity, clock.clone())?;
        Self::assemble(conn, access_log, config, keychain, clock)
    }

    fn assemble(
        conn: Connection,
        access_log: AccessLog,
        config: VaultConfig,
        keychain: Arc<dyn KeychainProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        configure_connection(&conn)?;
        run_migrations(&conn)?;

        let store = Self {
            records: Mutex::new(conn),
            access_log,
            keychain,
            clock,
            config,
            material: OnceLock::new(),
        };
        store.initialize()?;

        tracing::info!("secure store ready");
        Ok(store)
    }

    /// Load or create the install salt and the first data key, then rotate
    /// the data key if the rotation interval has elapsed.
    ///
    /// Safe to call repeatedly; only the first call on a fresh store creates
    /// anything.
    ///
    /// The master key is only generated while the store holds no data keys.
    /// Once data keys exist, a missing master key fails with
    /// [`VaultError::MasterKeyMissing`] and one that cannot unwrap the current
    /// data key fails with the unwrap error.
    pub fn initialize(&self) -> Result<()> {
        let created = {
            let conn = self.lock_records()?;
            let salt = keys::load_or_create_salt(&conn)?;
            self.material
                .get_or_init(|| KeyMaterial::new(salt, self.config.kdf_iterations));

            if keys::data_key_count(&conn)? == 0 {
                let master_key = keychain::get_or_create_secret(
                    self.keychain.as_ref(),
                    MASTER_KEY_ENTRY,
                    crypto::KEY_LEN,
                )?;
                keys::ensure_initial_data_key(&conn, &master_key, self.clock.now())?
            } else {
                let master_key = self.master_key()?;
                let version = self.current_version(&conn)?;
                keys::data_key(&conn, &master_key, version)?;
                false
            }
        };

        if created {
            self.log_access(category::KEY_ROTATION, "Initial data key generated")?;
        } else if self.rotation_due()? {
            tracing::info!("data key rotation due");
            self.rotate_key();
        }
        Ok(())
    }

    // -- Records ------------------------------------------------------------

    /// Encrypt and store `value` under `key`, replacing any previous value.
    ///
    /// The integrity tag is recomputed and written in the same statement.
    pub fn store(&self, key: &str, value: &str) -> Result<()> {
        let integrity_key = self.key_material()?.integrity_key()?;
        let tag = B64.encode(crypto::hmac_sign(&integrity_key, value.as_bytes()));
        let master_key = self.master_key()?;

        {
            let conn = self.lock_records()?;
            let version = self.current_version(&conn)?;
            let data_key = keys::data_key(&conn, &master_key, version)?;
            let (nonce, ciphertext) = crypto::encrypt(value.as_bytes(), &data_key, key.as_bytes())?;

            conn.execute(
                "INSERT INTO records (name, ciphertext, nonce, key_version, tag, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    ciphertext = excluded.ciphertext,
                    nonce = excluded.nonce,
                    key_version = excluded.key_version,
                    tag = excluded.tag,
                    updated_at = excluded.updated_at",
                params![
                    key,
                    ciphertext,
                    nonce.as_slice(),
                    version,
                    tag,
                    self.clock.now().timestamp_millis()
                ],
            )?;
        }

        tracing::debug!(key = key, "stored secure record");
        self.log_access(
            category::DATA_STORAGE,
            &format!("Stored secure value: {key}"),
        )
    }

    /// Decrypt the value stored under `key`. Absence is `Ok(None)`.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let master_key = self.master_key()?;
        let value = {
            let conn = self.lock_records()?;
            match load_record(&conn, key)? {
                Some(row) => Some(self.open_record(&conn, &master_key, &row)?),
                None => None,
            }
        };

        let Some(plaintext) = value else {
            return Ok(None);
        };
        let value = String::from_utf8(plaintext).map_err(|_| VaultError::CorruptRecord {
            name: key.to_string(),
        })?;

        self.log_access(category::DATA_ACCESS, &format!("Accessed value: {key}"))?;
        Ok(Some(value))
    }

    /// Recompute the tag over the stored value and compare it to the stored
    /// tag.
    ///
    /// Returns `Ok(false)` when the value or tag is missing, the value no
    /// longer decrypts, or the tags differ. Only storage faults are errors.
    pub fn verify_integrity(&self, key: &str) -> Result<bool> {
        let master_key = self.master_key()?;
        let conn = self.lock_records()?;

        let Some(row) = load_record(&conn, key)? else {
            return Ok(false);
        };
        let Some(stored_tag) = row.tag.as_deref() else {
            tracing::warn!(key = key, "record has no integrity tag");
            return Ok(false);
        };
        let Ok(stored_tag) = B64.decode(stored_tag) else {
            tracing::warn!(key = key, "record integrity tag is not valid base64");
            return Ok(false);
        };
        let plaintext = match self.open_record(&conn, &master_key, &row) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key = key, error = %e, "record failed to decrypt during verification");
                return Ok(false);
            }
        };
        drop(conn);

        let integrity_key = self.key_material()?.integrity_key()?;
        let intact = crypto::hmac_verify(&integrity_key, &plaintext, &stored_tag);
        if !intact {
            tracing::warn!(key = key, "integrity tag mismatch");
        }
        Ok(intact)
    }

    /// Delete the record under `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = {
            let conn = self.lock_records()?;
            conn.execute("DELETE FROM records WHERE name = ?1", params![key])? > 0
        };
        if removed {
            tracing::info!(key = key, "removed secure record");
            self.log_access(category::DATA_MANAGEMENT, &format!("Removed value: {key}"))?;
        }
        Ok(removed)
    }

    /// Wipe every record and the entire access log, then record the wipe.
    pub fn clear(&self) -> Result<()> {
        let removed = {
            let conn = self.lock_records()?;
            conn.execute("DELETE FROM records", [])?
        };
        self.access_log.clear()?;

        tracing::info!(records = removed, "wiped secure store");
        self.log_access(category::DATA_MANAGEMENT, "All data securely wiped")
    }

    // -- Rotation -----------------------------------------------------------

    /// Whether the rotation interval has elapsed since the last rotation.
    pub fn rotation_due(&self) -> Result<bool> {
        let last = self.last_rotation()?;
        let now = self.clock.now();
        let elapsed = now - last.unwrap_or(DateTime::UNIX_EPOCH);
        Ok(elapsed > self.config.rotation_interval())
    }

    pub fn last_rotation(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock_records()?;
        keys::last_rotation(&conn)
    }

    /// Data-key version used for new writes.
    pub fn key_version(&self) -> Result<u32> {
        let conn = self.lock_records()?;
        self.current_version(&conn)
    }

    /// Rotate to a fresh data key and re-encrypt every record under it.
    ///
    /// Best effort: any failure is written to the access log as
    /// `KEY_ROTATION_ERROR` and reported as `false`; nothing is propagated.
    /// A failed rotation leaves the store exactly as it was.
    pub fn rotate_key(&self) -> bool {
        match self.try_rotate() {
            Ok(outcome) => {
                tracing::info!(
                    version = outcome.version,
                    migrated = outcome.migrated,
                    skipped = outcome.skipped,
                    "rotated data key"
                );
                if let Err(e) = self.log_access(
                    category::KEY_ROTATION,
                    &format!(
                        "Data key rotated to version {} ({} records re-encrypted)",
                        outcome.version, outcome.migrated
                    ),
                ) {
                    tracing::warn!(error = %e, "failed to log key rotation");
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "data key rotation failed");
                if let Err(log_err) = self.log_access(
                    category::KEY_ROTATION_ERROR,
                    &format!("Key rotation failed: {e}"),
                ) {
                    tracing::warn!(error = %log_err, "failed to log key rotation failure");
                }
                false
            }
        }
    }

    fn try_rotate(&self) -> Result<RotationOutcome> {
        let master_key = self.master_key()?;
        let now = self.clock.now();

        let mut conn = self.lock_records()?;
        let tx = conn.transaction()?;

        let (version, new_key) = keys::create_data_key(&tx, &master_key, now)?;

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT name, ciphertext, nonce, key_version, tag
                 FROM records WHERE key_version != ?1",
            )?;
            let rows: Vec<RecordRow> = stmt
                .query_map(params![version], map_record_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut old_keys: HashMap<u32, Vec<u8>> = HashMap::new();
        let mut outcome = RotationOutcome {
            version,
            migrated: 0,
            skipped: 0,
        };

        for row in rows {
            let old_key = match old_keys.entry(row.key_version) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(keys::data_key(&tx, &master_key, row.key_version)?),
            };

            // Undecryptable records stay under their old version, which
            // therefore is not retired below.
            let plaintext = match open_with(old_key, &row) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(key = %row.name, error = %e, "record not re-encrypted");
                    outcome.skipped += 1;
                    continue;
                }
            };

            let (nonce, ciphertext) = crypto::encrypt(&plaintext, &new_key, row.name.as_bytes())?;
            tx.execute(
                "UPDATE records SET ciphertext = ?1, nonce = ?2, key_version = ?3
                 WHERE name = ?4",
                params![ciphertext, nonce.as_slice(), version, row.name],
            )?;
            outcome.migrated += 1;
        }

        keys::set_current_version(&tx, version)?;
        keys::retire_unused(&tx, version)?;
        keys::set_last_rotation(&tx, now)?;
        tx.commit()?;

        Ok(outcome)
    }

    // -- Access log ---------------------------------------------------------

    /// Append a timestamped entry to the access log.
    pub fn log_access(&self, category: &str, action: &str) -> Result<()> {
        self.access_log.append(category, action)
    }

    /// Rendered access-log lines, most recent first.
    pub fn access_logs(&self) -> Result<Vec<String>> {
        self.access_log.lines()
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    // -- Reporting ----------------------------------------------------------

    /// Snapshot of the store's protection settings and state.
    pub fn describe_protection_status(&self) -> Result<ProtectionStatus> {
        Ok(ProtectionStatus {
            cipher: "AES-256-GCM",
            integrity: "HMAC-SHA256 (PBKDF2-derived key)",
            storage: "Local encrypted (SQLite)",
            access_log_entries: self.access_log.len()?,
            last_rotation: self.last_rotation()?,
            key_version: self.key_version()?,
            probe_key: self.config.integrity_probe_key.clone(),
            probe_intact: self.verify_integrity(&self.config.integrity_probe_key)?,
            active: true,
        })
    }

    /// Mask digits and long words in `text`. See [`crate::anonymize()`].
    pub fn anonymize(&self, text: &str) -> String {
        crate::anonymize::anonymize(text)
    }

    // -- Internal helpers ---------------------------------------------------

    fn lock_records(&self) -> Result<MutexGuard<'_, Connection>> {
        self.records
            .lock()
            .map_err(|e| VaultError::LockPoisoned(format!("records: {e}")))
    }

    fn master_key(&self) -> Result<Vec<u8>> {
        match self.keychain.get_secret(MASTER_KEY_ENTRY) {
            Ok(key) => Ok(key),
            Err(CoreError::SecretNotFound { .. }) => Err(VaultError::MasterKeyMissing {
                entry: MASTER_KEY_ENTRY,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn key_material(&self) -> Result<&KeyMaterial> {
        if let Some(material) = self.material.get() {
            return Ok(material);
        }
        let conn = self.lock_records()?;
        let salt = keys::load_or_create_salt(&conn)?;
        Ok(self
            .material
            .get_or_init(|| KeyMaterial::new(salt, self.config.kdf_iterations)))
    }

    fn current_version(&self, conn: &Connection) -> Result<u32> {
        keys::current_version(conn)?.ok_or(VaultError::CorruptMetadata {
            key: "current_key_version",
            reason: "store has no data key".into(),
        })
    }

    fn open_record(&self, conn: &Connection, master_key: &[u8], row: &RecordRow) -> Result<Vec<u8>> {
        let data_key = keys::data_key(conn, master_key, row.key_version)?;
        open_with(&data_key, row)
    }

    #[cfg(test)]
    pub(crate) fn with_records<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.lock_records().unwrap();
        f(&conn)
    }
}

struct RotationOutcome {
    version: u32,
    migrated: usize,
    skipped: usize,
}

// ---------------------------------------------------------------------------
// Internal row types (avoid leaking rusqlite details)
// ---------------------------------------------------------------------------

struct RecordRow {
    name: String,
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    key_version: u32,
    tag: Option<String>,
}

fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        name: row.get(0)?,
        ciphertext: row.get(1)?,
        nonce: row.get(2)?,
        key_version: row.get(3)?,
        tag: row.get(4)?,
    })
}

fn load_record(conn: &Connection, name: &str) -> Result<Option<RecordRow>> {
    Ok(conn
        .query_row(
            "SELECT name, ciphertext, nonce, key_version, tag FROM records WHERE name = ?1",
            params![name],
            map_record_row,
        )
        .optional()?)
}

fn open_with(data_key: &[u8], row: &RecordRow) -> Result<Vec<u8>> {
    let nonce: [u8; crypto::NONCE_LEN_BYTES] =
        row.nonce
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::DecryptionFailed {
                reason: format!(
                    "stored nonce is {} bytes, expected {}",
                    row.nonce.len(),
                    crypto::NONCE_LEN_BYTES
                ),
            })?;
    Ok(crypto::decrypt(
        &nonce,
        &row.ciphertext,
        data_key,
        row.name.as_bytes(),
    )?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
