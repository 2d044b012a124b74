//! Platform keychain backend.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)
//!
//! The wrapping key is stored base64-encoded under service `pqvol`, user =
//! key handle, and is generated on the first wrap.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use pqvol_crypto::KEY_SIZE;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::{open_under, seal_under, KeyHandle, KeyWrap, KeyWrapError, WrappedKey};

const SERVICE_NAME: &str = "pqvol";

pub struct KeychainKeyWrap {
    handle: KeyHandle,
    entry: keyring::Entry,
}

impl KeychainKeyWrap {
    pub fn new(handle: KeyHandle) -> Result<Self, KeyWrapError> {
        let entry = keyring::Entry::new(SERVICE_NAME, handle.as_str())
            .map_err(|e| KeyWrapError::Unavailable(format!("keychain entry creation: {e}")))?;
        Ok(Self { handle, entry })
    }

    fn load_key(&self) -> Result<Option<Zeroizing<[u8; KEY_SIZE]>>, KeyWrapError> {
        let mut encoded = match self.entry.get_password() {
            Ok(encoded) => encoded,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(KeyWrapError::Unavailable(format!("keychain get: {e}"))),
        };
        let decoded = B64.decode(encoded.trim()).map(Zeroizing::new);
        encoded.zeroize();
        decoded
            .ok()
            .and_then(|d| <[u8; KEY_SIZE]>::try_from(d.as_slice()).ok())
            .map(|key| Some(Zeroizing::new(key)))
            .ok_or_else(|| {
                KeyWrapError::Unavailable(format!(
                    "keychain entry '{}' is not a wrapping key",
                    self.handle
                ))
            })
    }

    fn load_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyWrapError> {
        if let Some(key) = self.load_key()? {
            return Ok(key);
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(key.as_mut_slice());
        let encoded = Zeroizing::new(B64.encode(key.as_slice()));
        self.entry
            .set_password(&encoded)
            .map_err(|e| KeyWrapError::Unavailable(format!("keychain store: {e}")))?;
        tracing::info!(handle = %self.handle, "generated wrapping key in platform keychain");
        Ok(key)
    }

    /// Remove the wrapping key. Every volume wrapped under it becomes
    /// unmountable.
    pub fn revoke(&self) -> Result<(), KeyWrapError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                tracing::info!(handle = %self.handle, "revoked keychain wrapping key");
                Ok(())
            }
            Err(e) => Err(KeyWrapError::Unavailable(format!("keychain delete: {e}"))),
        }
    }
}

impl KeyWrap for KeychainKeyWrap {
    fn handle(&self) -> &KeyHandle {
        &self.handle
    }

    fn wrap_key(&self, plaintext_key: &[u8]) -> Result<WrappedKey, KeyWrapError> {
        let key = self.load_or_create_key()?;
        seal_under(&key, &self.handle, plaintext_key)
    }

    fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, KeyWrapError> {
        // Missing, revoked or unreadable keys all look the same to the caller
        let key = match self.load_key() {
            Ok(Some(key)) => key,
            _ => return Err(KeyWrapError::Failure),
        };
        open_under(&key, &self.handle, wrapped)
    }
}

impl std::fmt::Debug for KeychainKeyWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainKeyWrap")
            .field("service", &SERVICE_NAME)
            .field("handle", &self.handle)
            .finish()
    }
}
