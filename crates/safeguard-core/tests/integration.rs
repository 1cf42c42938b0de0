//! Integration tests for the safeguard-core crate.

use std::time::Duration;

use safeguard_core::keychain::get_or_create_secret;
use safeguard_core::{
    Clock, CoreError, FileKeychain, KeychainProvider, ManualClock, MemoryKeychain,
    SafeguardConfig, crypto,
};

#[test]
fn keychain_secret_seals_data_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = FileKeychain::default_path(dir.path());

    let (blob, master) = {
        let keychain = FileKeychain::new(&path);
        let master = get_or_create_secret(&keychain, "master", crypto::KEY_LEN).unwrap();
        (crypto::seal(b"payload", &master, b"record").unwrap(), master)
    };

    let keychain = FileKeychain::new(&path);
    let reloaded = get_or_create_secret(&keychain, "master", crypto::KEY_LEN).unwrap();
    assert_eq!(reloaded, master);
    assert_eq!(
        crypto::open_sealed(&blob, &reloaded, b"record").unwrap(),
        b"payload"
    );
}

#[test]
fn keychain_entries_are_independent() {
    let keychain = MemoryKeychain::new();
    let a = get_or_create_secret(&keychain, "vault-master", 32).unwrap();
    let b = get_or_create_secret(&keychain, "audit-signing", 32).unwrap();
    assert_ne!(a, b);

    keychain.delete_secret("vault-master").unwrap();
    assert!(matches!(
        keychain.get_secret("vault-master"),
        Err(CoreError::SecretNotFound { .. })
    ));
    assert!(keychain.has_secret("audit-signing").unwrap());
}

#[test]
fn integrity_tag_detects_modified_value() {
    let salt = crypto::random_bytes(16).unwrap();
    let key = crypto::derive_key(b"app-secret", &salt, 1_000).unwrap();
    let tag = crypto::hmac_sign(&key, b"original");

    assert!(crypto::hmac_verify(&key, b"original", &tag));
    assert!(!crypto::hmac_verify(&key, b"modified", &tag));
}

#[test]
fn manual_clock_drives_both_readings() {
    let clock = ManualClock::starting_now();
    let (wall, mono) = (clock.now(), clock.monotonic());

    clock.advance(Duration::from_secs(90));

    assert_eq!((clock.now() - wall).num_seconds(), 90);
    assert_eq!(clock.monotonic() - mono, Duration::from_secs(90));
}

#[test]
fn config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safeguard.toml");
    std::fs::write(
        &path,
        "[vault]\nrotation_interval_days = 7\n\n[audit]\nalert_threshold = 10\n",
    )
    .unwrap();

    let config = SafeguardConfig::load(&path).unwrap();
    assert_eq!(config.vault.rotation_interval(), chrono::Duration::days(7));
    assert_eq!(config.audit.alert_threshold, 10);
    assert_eq!(config.audit.min_spacing(), Duration::from_secs(3));
}
