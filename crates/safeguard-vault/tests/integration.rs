//! Integration tests for the safeguard-vault crate.
//!
//! These exercise the store lifecycle end to end: on-disk persistence,
//! keychain-held master keys, rotation, access logging and wipes.

use std::sync::Arc;
use std::time::Duration;

use safeguard_core::{FileKeychain, KeychainProvider, ManualClock, MemoryKeychain, VaultConfig};
use safeguard_vault::store::MASTER_KEY_ENTRY;
use safeguard_vault::{SecureStore, VaultError, anonymize, category};

fn fast_config() -> VaultConfig {
    VaultConfig {
        kdf_iterations: 1_000,
        ..VaultConfig::default()
    }
}

fn memory_store() -> (SecureStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let store = SecureStore::open_in_memory(
        fast_config(),
        Arc::new(MemoryKeychain::new()),
        clock.clone(),
    )
    .unwrap();
    (store, clock)
}

// ═══════════════════════════════════════════════════════════════════════
//  Records
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn roundtrip_many_values() {
    let (store, _) = memory_store();
    let cases = [
        ("empty", ""),
        ("ascii", "plain text"),
        ("unicode", "contraseña ✓ 密码"),
        ("long", &"x".repeat(10_000)),
    ];

    for (key, value) in cases {
        store.store(key, value).unwrap();
    }
    for (key, value) in cases {
        assert_eq!(store.get(key).unwrap().as_deref(), Some(value));
        assert!(store.verify_integrity(key).unwrap(), "integrity for {key}");
    }
}

#[test]
fn store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let keychain: Arc<dyn KeychainProvider> =
        Arc::new(FileKeychain::new(FileKeychain::default_path(dir.path())));
    let clock = Arc::new(ManualClock::starting_now());

    {
        let store =
            SecureStore::open(dir.path(), fast_config(), keychain.clone(), clock.clone()).unwrap();
        store.store("dni", "12345678Z").unwrap();
    }

    let store = SecureStore::open(dir.path(), fast_config(), keychain, clock).unwrap();
    assert_eq!(store.get("dni").unwrap().as_deref(), Some("12345678Z"));
    assert!(store.verify_integrity("dni").unwrap());
    assert_eq!(store.key_version().unwrap(), 1);

    let logs = store.access_logs().unwrap();
    assert!(logs[0].contains("DATA_ACCESS"));
    assert!(logs[1].contains("DATA_STORAGE"));
}

#[test]
fn reopen_with_different_master_key_cannot_read() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());

    {
        let store = SecureStore::open(
            dir.path(),
            fast_config(),
            Arc::new(MemoryKeychain::new()),
            clock.clone(),
        )
        .unwrap();
        store.store("secret", "value").unwrap();
    }

    let other = MemoryKeychain::new();
    other.set_secret(MASTER_KEY_ENTRY, &[7u8; 32]).unwrap();
    let result = SecureStore::open(dir.path(), fast_config(), Arc::new(other), clock);
    assert!(matches!(result, Err(VaultError::Core(_))));
}

#[test]
fn reopen_with_empty_keychain_keeps_store_intact() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let keychain = Arc::new(MemoryKeychain::new());

    {
        let store =
            SecureStore::open(dir.path(), fast_config(), keychain.clone(), clock.clone()).unwrap();
        store.store("secret", "value").unwrap();
    }
    let master = keychain.get_secret(MASTER_KEY_ENTRY).unwrap();

    let empty = Arc::new(MemoryKeychain::new());
    let result = SecureStore::open(dir.path(), fast_config(), empty.clone(), clock.clone());
    assert!(matches!(result, Err(VaultError::MasterKeyMissing { .. })));
    assert!(!empty.has_secret(MASTER_KEY_ENTRY).unwrap());

    // Restoring the original key brings the data back.
    let restored = MemoryKeychain::new();
    restored.set_secret(MASTER_KEY_ENTRY, &master).unwrap();
    let store = SecureStore::open(dir.path(), fast_config(), Arc::new(restored), clock).unwrap();
    assert_eq!(store.get("secret").unwrap().as_deref(), Some("value"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Rotation
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn reopen_after_interval_rotates_and_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let keychain: Arc<dyn KeychainProvider> = Arc::new(MemoryKeychain::new());
    let clock = Arc::new(ManualClock::starting_now());

    {
        let store =
            SecureStore::open(dir.path(), fast_config(), keychain.clone(), clock.clone()).unwrap();
        store.store("a", "alpha").unwrap();
    }

    clock.advance(Duration::from_secs(31 * 24 * 60 * 60));

    let store = SecureStore::open(dir.path(), fast_config(), keychain, clock.clone()).unwrap();
    assert_eq!(store.key_version().unwrap(), 2);
    assert!(!store.rotation_due().unwrap());
    assert_eq!(store.get("a").unwrap().as_deref(), Some("alpha"));
    assert!(
        store
            .access_logs()
            .unwrap()
            .iter()
            .any(|line| line.contains("KEY_ROTATION: Data key rotated to version 2"))
    );
}

#[test]
fn repeated_rotation_keeps_single_key_version() {
    let (store, _) = memory_store();
    store.store("a", "alpha").unwrap();

    for expected in 2..=5 {
        assert!(store.rotate_key());
        assert_eq!(store.key_version().unwrap(), expected);
    }

    assert_eq!(store.get("a").unwrap().as_deref(), Some("alpha"));
    assert!(store.verify_integrity("a").unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Access log and wipe
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn access_log_keeps_hundred_newest() {
    let (store, _) = memory_store();
    for i in 0..150 {
        store.log_access(category::NAVIGATION, &format!("screen {i}")).unwrap();
    }

    let logs = store.access_logs().unwrap();
    assert_eq!(logs.len(), 100);
    assert!(logs.first().unwrap().ends_with("NAVIGATION: screen 149"));
    assert!(logs.last().unwrap().ends_with("NAVIGATION: screen 50"));

    let chronological = store.access_log().entries().unwrap();
    assert_eq!(chronological.first().unwrap().action, "screen 50");
}

#[test]
fn clear_wipes_records_and_log() {
    let (store, _) = memory_store();
    store.store("a", "1").unwrap();
    store.store("b", "2").unwrap();
    store.log_access(category::APPLICATION, "App started").unwrap();

    store.clear().unwrap();

    let logs = store.access_logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].ends_with("DATA_MANAGEMENT: All data securely wiped"));
    assert_eq!(store.get("a").unwrap(), None);
    assert_eq!(store.get("b").unwrap(), None);

    // The store stays usable after a wipe.
    store.store("c", "3").unwrap();
    assert!(store.verify_integrity("c").unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Reporting and anonymization
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn protection_status_counts_log_entries() {
    let (store, _) = memory_store();
    store.log_access(category::DATA_PROTECTION, "Status shown").unwrap();

    let status = store.describe_protection_status().unwrap();
    assert_eq!(status.access_log_entries, store.access_logs().unwrap().len());
    assert!(status.last_rotation.is_some());
    assert!(status.active);
}

#[test]
fn anonymize_masks_digits_and_words() {
    let (store, _) = memory_store();
    let before = store.access_logs().unwrap().len();

    assert_eq!(
        anonymize("John123 lives at 42 Main Street"),
        "****** *** at ** *** ***"
    );
    assert_eq!(store.anonymize("ID 7 ok"), "ID * ok");
    assert_eq!(store.access_logs().unwrap().len(), before);
}
