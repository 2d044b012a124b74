//! Backends built from configuration, as the CLI builds them.

use pqvol_core::config::{KeyWrapBackend, KeyWrapConfig};
use pqvol_keywrap::{from_config, KeyWrapError};

fn software_config(dir: &std::path::Path, handle: &str) -> KeyWrapConfig {
    KeyWrapConfig {
        backend: KeyWrapBackend::Software,
        handle: handle.into(),
        key_file: dir.join("wrap.key"),
    }
}

#[test]
fn software_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = software_config(dir.path(), "vol-a");

    let wrapped = {
        let wrap = from_config(&config).unwrap();
        assert_eq!(wrap.handle().as_str(), "vol-a");
        wrap.wrap_key(b"kem secret key bytes").unwrap()
    };

    // A fresh backend reads the same key file
    let wrap = from_config(&config).unwrap();
    assert_eq!(&wrap.unwrap_key(&wrapped).unwrap()[..], b"kem secret key bytes");
}

#[test]
fn software_backend_handles_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let a = from_config(&software_config(dir.path(), "vol-a")).unwrap();
    let b = from_config(&software_config(dir.path(), "vol-b")).unwrap();

    // Same key file, different handle: the blob is bound to its handle
    let wrapped = a.wrap_key(b"secret").unwrap();
    assert!(matches!(b.unwrap_key(&wrapped), Err(KeyWrapError::Failure)));
}

#[test]
fn keychain_backend_roundtrip_with_mock_store() {
    keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
    let config = KeyWrapConfig {
        backend: KeyWrapBackend::Keychain,
        handle: "vol-keychain".into(),
        ..Default::default()
    };

    let wrap = from_config(&config).unwrap();
    let wrapped = wrap.wrap_key(&[7u8; 3168]).unwrap();
    assert_eq!(&wrap.unwrap_key(&wrapped).unwrap()[..], &[7u8; 3168][..]);
}
