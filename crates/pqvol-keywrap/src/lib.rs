//! pqvol-keywrap: protects the volume's KEM secret key with a wrapping key the
//! engine never sees.
//!
//! Backends, in order of preference:
//! - [`KeychainKeyWrap`]: wrapping key held by the platform keychain
//!   (macOS Keychain, Secret Service, Windows Credential Manager)
//! - [`SoftwareKeyWrap`]: wrapping key in a local `0600` key file, or
//!   ephemeral in memory
//!
//! Wrapped blob format: `[24-byte nonce][ciphertext][16-byte tag]`, sealed
//! with XChaCha20-Poly1305 under AAD = `"pqvol-keywrap-v1" || handle`, so a
//! blob only unwraps under the handle it was wrapped for.

use std::fmt;

use pqvol_core::config::{expand_tilde, KeyWrapBackend, KeyWrapConfig};
use pqvol_crypto::{Aead, XChaCha20Poly1305Aead, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

pub mod keychain;
pub mod software;

pub use keychain::KeychainKeyWrap;
pub use software::SoftwareKeyWrap;

const AAD_DOMAIN: &[u8] = b"pqvol-keywrap-v1";

#[derive(Debug, Error)]
pub enum KeyWrapError {
    /// Wrong handle, missing or revoked key, tampered blob, backend refusal.
    /// All of these report the same variant.
    #[error("key unwrap failed")]
    Failure,

    #[error("key-wrap backend unavailable: {0}")]
    Unavailable(String),
}

/// Stable name of a wrapping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle(String);

impl KeyHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque wrapped-key blob as stored in the container's key region.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    bytes: Vec<u8>,
}

impl WrappedKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappedKey({} bytes)", self.bytes.len())
    }
}

/// Hardware-backed key wrapping capability.
pub trait KeyWrap: Send + Sync {
    fn handle(&self) -> &KeyHandle;

    fn wrap_key(&self, plaintext_key: &[u8]) -> Result<WrappedKey, KeyWrapError>;

    fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, KeyWrapError>;
}

/// Build the backend named in configuration.
pub fn from_config(config: &KeyWrapConfig) -> Result<Box<dyn KeyWrap>, KeyWrapError> {
    let handle = KeyHandle::new(config.handle.clone());
    match config.backend {
        KeyWrapBackend::Keychain => Ok(Box::new(KeychainKeyWrap::new(handle)?)),
        KeyWrapBackend::Software => {
            let path = expand_tilde(&config.key_file);
            Ok(Box::new(SoftwareKeyWrap::from_key_file(handle, &path)?))
        }
    }
}

fn handle_aad(handle: &KeyHandle) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_DOMAIN.len() + handle.as_str().len());
    aad.extend_from_slice(AAD_DOMAIN);
    aad.extend_from_slice(handle.as_str().as_bytes());
    aad
}

pub(crate) fn seal_under(
    wrapping_key: &[u8; KEY_SIZE],
    handle: &KeyHandle,
    plaintext: &[u8],
) -> Result<WrappedKey, KeyWrapError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let sealed = XChaCha20Poly1305Aead
        .seal(wrapping_key, &nonce, &handle_aad(handle), plaintext)
        .map_err(|e| KeyWrapError::Unavailable(e.to_string()))?;

    let mut bytes = Vec::with_capacity(NONCE_SIZE + sealed.ciphertext.len() + TAG_SIZE);
    bytes.extend_from_slice(&nonce);
    bytes.extend_from_slice(&sealed.ciphertext);
    bytes.extend_from_slice(&sealed.tag);
    Ok(WrappedKey::from_bytes(bytes))
}

pub(crate) fn open_under(
    wrapping_key: &[u8; KEY_SIZE],
    handle: &KeyHandle,
    wrapped: &WrappedKey,
) -> Result<Zeroizing<Vec<u8>>, KeyWrapError> {
    let bytes = wrapped.as_bytes();
    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(KeyWrapError::Failure);
    }
    let (nonce, rest) = bytes.split_at(NONCE_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

    let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| KeyWrapError::Failure)?;
    let tag: [u8; TAG_SIZE] = tag.try_into().map_err(|_| KeyWrapError::Failure)?;

    XChaCha20Poly1305Aead
        .open(wrapping_key, &nonce, &handle_aad(handle), ciphertext, &tag)
        .map_err(|_| KeyWrapError::Failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [3u8; KEY_SIZE];
        let handle = KeyHandle::new("h");
        let wrapped = seal_under(&key, &handle, b"secret key material").unwrap();
        assert_eq!(wrapped.len(), NONCE_SIZE + 19 + TAG_SIZE);
        let opened = open_under(&key, &handle, &wrapped).unwrap();
        assert_eq!(opened.as_slice(), b"secret key material");
    }

    #[test]
    fn test_handle_bound_into_blob() {
        let key = [3u8; KEY_SIZE];
        let wrapped = seal_under(&key, &KeyHandle::new("laptop"), b"sk").unwrap();
        let err = open_under(&key, &KeyHandle::new("desktop"), &wrapped).unwrap_err();
        assert!(matches!(err, KeyWrapError::Failure));
    }

    #[test]
    fn test_short_blob_is_failure() {
        let err = open_under(
            &[0u8; KEY_SIZE],
            &KeyHandle::new("h"),
            &WrappedKey::from_bytes(vec![0u8; 10]),
        )
        .unwrap_err();
        assert!(matches!(err, KeyWrapError::Failure));
    }

    #[test]
    fn test_wrapped_key_debug_hides_bytes() {
        let w = WrappedKey::from_bytes(vec![0xAA; 4]);
        assert_eq!(format!("{w:?}"), "WrappedKey(4 bytes)");
    }

    #[test]
    fn test_from_config_software() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeyWrapConfig {
            backend: KeyWrapBackend::Software,
            handle: "cfg".into(),
            key_file: dir.path().join("wrap.key"),
        };
        let kw = from_config(&config).unwrap();
        assert_eq!(kw.handle().as_str(), "cfg");
        let wrapped = kw.wrap_key(b"abc").unwrap();
        assert_eq!(kw.unwrap_key(&wrapped).unwrap().as_slice(), b"abc");
    }
}
