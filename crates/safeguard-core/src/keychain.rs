//! Secure storage for raw key bytes.
//!
//! Master keys and signing keys must never be persisted as plaintext. The
//! [`KeychainProvider`] trait abstracts over platform-specific secret stores,
//! with entries addressed by name:
//!
//! - **macOS**: Keychain Services via `security-framework`
//! - **Fallback**: [`FileKeychain`], one file per entry, each sealed with a
//!   device-derived key
//! - **Tests**: [`MemoryKeychain`]
//!
//! # Security Notes
//!
//! - The file-based fallback is a compromise. The device-derived key can be
//!   reconstructed by anyone with access to the same machine and account.
//! - Entry files are created with mode 0600 on Unix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::crypto;
use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over platform-specific secure key storage.
///
/// Implementations must be `Send + Sync` so one provider can back both the
/// secure store and the audit engine.
pub trait KeychainProvider: Send + Sync {
    /// Retrieve the secret stored under `name`.
    ///
    /// Returns [`CoreError::SecretNotFound`] if nothing has been stored yet.
    fn get_secret(&self, name: &str) -> Result<Vec<u8>>;

    /// Store (or overwrite) the secret under `name`.
    fn set_secret(&self, name: &str, secret: &[u8]) -> Result<()>;

    /// Check whether a secret exists under `name`.
    fn has_secret(&self, name: &str) -> Result<bool>;

    /// Delete the secret stored under `name`. Missing entries are not an error.
    fn delete_secret(&self, name: &str) -> Result<()>;
}

/// Return the secret under `name`, generating and storing `len` random bytes
/// first if it does not exist yet.
pub fn get_or_create_secret(
    keychain: &dyn KeychainProvider,
    name: &str,
    len: usize,
) -> Result<Vec<u8>> {
    match keychain.get_secret(name) {
        Ok(secret) => Ok(secret),
        Err(CoreError::SecretNotFound { .. }) => {
            let secret = crypto::random_bytes(len)?;
            keychain.set_secret(name, &secret)?;
            tracing::info!(name = name, "generated new keychain secret");
            Ok(secret)
        }
        Err(e) => Err(e),
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(CoreError::SecretStoreFailed {
            name: name.to_string(),
            reason: "entry names may only contain [A-Za-z0-9._-]".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// File-based fallback
// ---------------------------------------------------------------------------

/// Application salt mixed into the device-derived key. Changing this
/// invalidates every previously stored entry.
const APP_SALT: &[u8; 32] = b"safeguard-keychain-device-key-v1";

/// PBKDF2 rounds for the device key. Computed once per [`FileKeychain`].
const DEVICE_KDF_ITERATIONS: u32 = 100_000;

/// File-based keychain storing each entry sealed with a device-derived key.
///
/// Entry file layout (binary), at `<dir>/<name>.key`:
/// ```text
/// [12 bytes: AES-256-GCM nonce]
/// [remaining: AES-256-GCM ciphertext + 16-byte tag]
/// ```
/// The entry name is bound as associated data, so renaming a file breaks it.
pub struct FileKeychain {
    dir: PathBuf,
    device_key: OnceLock<[u8; crypto::KEY_LEN]>,
}

impl FileKeychain {
    /// Create a keychain that stores entries under `dir`.
    ///
    /// The directory is created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            device_key: OnceLock::new(),
        }
    }

    /// Default keychain location: `<data_dir>/keychain`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("keychain")
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.key")))
    }

    /// Derive (once) an encryption key from machine-specific data.
    fn device_key(&self) -> Result<&[u8; crypto::KEY_LEN]> {
        if let Some(key) = self.device_key.get() {
            return Ok(key);
        }

        let hostname = Self::get_hostname();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".into());

        let mut material = Vec::with_capacity(hostname.len() + username.len() + APP_SALT.len());
        material.extend_from_slice(hostname.as_bytes());
        material.extend_from_slice(username.as_bytes());
        material.extend_from_slice(APP_SALT);

        let key = crypto::derive_key(&material, APP_SALT, DEVICE_KDF_ITERATIONS)?;
        Ok(self.device_key.get_or_init(|| key))
    }

    fn get_hostname() -> String {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/etc/hostname")
                .map(|s| s.trim().to_string())
                .or_else(|_| std::env::var("HOSTNAME"))
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown-host".into())
        }

        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "unknown-host".into())
        }
    }
}

impl KeychainProvider for FileKeychain {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(name)?;
        if !path.exists() {
            return Err(CoreError::SecretNotFound {
                name: name.to_string(),
            });
        }

        let data = std::fs::read(&path)?;
        let secret = crypto::open_sealed(&data, self.device_key()?, name.as_bytes())?;

        tracing::debug!(name = name, "retrieved secret from file keychain");
        Ok(secret)
    }

    fn set_secret(&self, name: &str, secret: &[u8]) -> Result<()> {
        let path = self.entry_path(name)?;
        let data = crypto::seal(secret, self.device_key()?, name.as_bytes())?;

        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, &data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(path = %path.display(), "stored secret in file keychain");
        Ok(())
    }

    fn has_secret(&self, name: &str) -> Result<bool> {
        Ok(self.entry_path(name)?.exists())
    }

    fn delete_secret(&self, name: &str) -> Result<()> {
        let path = self.entry_path(name)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "deleted secret from file keychain");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory keychain
// ---------------------------------------------------------------------------

/// Process-local keychain. Nothing survives the process; meant for tests and
/// ephemeral sessions.
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries.lock().map_err(|e| CoreError::KeychainUnavailable {
            reason: format!("mutex poisoned: {e}"),
        })
    }
}

impl KeychainProvider for MemoryKeychain {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::SecretNotFound {
                name: name.to_string(),
            })
    }

    fn set_secret(&self, name: &str, secret: &[u8]) -> Result<()> {
        validate_name(name)?;
        self.lock()?.insert(name.to_string(), secret.to_vec());
        Ok(())
    }

    fn has_secret(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(name))
    }

    fn delete_secret(&self, name: &str) -> Result<()> {
        self.lock()?.remove(name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// macOS Keychain Services
// ---------------------------------------------------------------------------

/// `errSecItemNotFound`.
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// macOS Keychain Services integration via the `security-framework` crate.
///
/// Each entry is a generic password with the configured service name and the
/// entry name as account.
#[cfg(target_os = "macos")]
pub struct MacOSKeychain {
    service_name: String,
}

#[cfg(target_os = "macos")]
impl MacOSKeychain {
    const DEFAULT_SERVICE: &'static str = "dev.safeguard.keychain";

    pub fn new() -> Self {
        Self::with_service(Self::DEFAULT_SERVICE)
    }

    /// Use a custom service name, e.g. to isolate test runs.
    pub fn with_service(service: &str) -> Self {
        Self {
            service_name: service.to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
impl Default for MacOSKeychain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
impl KeychainProvider for MacOSKeychain {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(&self.service_name, name) {
            Ok(data) => {
                tracing::debug!(service = %self.service_name, name = name, "retrieved secret from macOS keychain");
                Ok(data.to_vec())
            }
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Err(CoreError::SecretNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(CoreError::KeychainUnavailable {
                reason: format!("macOS keychain read failed: {e}"),
            }),
        }
    }

    fn set_secret(&self, name: &str, secret: &[u8]) -> Result<()> {
        use security_framework::passwords::set_generic_password;

        validate_name(name)?;
        set_generic_password(&self.service_name, name, secret).map_err(|e| {
            CoreError::SecretStoreFailed {
                name: name.to_string(),
                reason: format!("macOS keychain write failed: {e}"),
            }
        })?;

        tracing::info!(service = %self.service_name, name = name, "stored secret in macOS keychain");
        Ok(())
    }

    fn has_secret(&self, name: &str) -> Result<bool> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(&self.service_name, name) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(false),
            Err(e) => Err(CoreError::KeychainUnavailable {
                reason: format!("macOS keychain check failed: {e}"),
            }),
        }
    }

    fn delete_secret(&self, name: &str) -> Result<()> {
        use security_framework::passwords::delete_generic_password;

        match delete_generic_password(&self.service_name, name) {
            Ok(()) => Ok(()),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            Err(e) => Err(CoreError::KeychainUnavailable {
                reason: format!("macOS keychain delete failed: {e}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Returns the best available keychain provider for the current platform.
///
/// On macOS this is Keychain Services and `data_dir` is unused; elsewhere it
/// is a [`FileKeychain`] under [`FileKeychain::default_path`].
#[cfg_attr(target_os = "macos", allow(unused_variables))]
pub fn platform_keychain(data_dir: &Path) -> Box<dyn KeychainProvider> {
    #[cfg(target_os = "macos")]
    {
        tracing::info!("using macOS Keychain Services for key storage");
        Box::new(MacOSKeychain::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        let path = FileKeychain::default_path(data_dir);
        tracing::info!(path = %path.display(), "using file-based keychain for key storage");
        Box::new(FileKeychain::new(path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
