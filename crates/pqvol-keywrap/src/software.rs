//! Software fallback: wrapping key held in process memory.
//!
//! The key is either ephemeral (tests, throwaway volumes) or persisted as
//! base64 in a key file readable only by the owner.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use pqvol_crypto::KEY_SIZE;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::{open_under, seal_under, KeyHandle, KeyWrap, KeyWrapError, WrappedKey};

pub struct SoftwareKeyWrap {
    handle: KeyHandle,
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl SoftwareKeyWrap {
    pub fn with_key(handle: KeyHandle, key: [u8; KEY_SIZE]) -> Self {
        Self {
            handle,
            key: Zeroizing::new(key),
        }
    }

    /// Fresh random wrapping key that dies with the process.
    pub fn ephemeral(handle: KeyHandle) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        let kw = Self::with_key(handle, key);
        key.zeroize();
        kw
    }

    /// Load the wrapping key from `path`, generating it on first use.
    pub fn from_key_file(handle: KeyHandle, path: &Path) -> Result<Self, KeyWrapError> {
        if path.exists() {
            let mut encoded = std::fs::read_to_string(path)
                .map_err(|e| KeyWrapError::Unavailable(format!("reading key file: {e}")))?;
            let decoded = B64.decode(encoded.trim());
            encoded.zeroize();
            let decoded = Zeroizing::new(decoded.map_err(|_| {
                KeyWrapError::Unavailable(format!("key file {} is not valid base64", path.display()))
            })?);
            let key: [u8; KEY_SIZE] = decoded.as_slice().try_into().map_err(|_| {
                KeyWrapError::Unavailable(format!("key file {} has wrong length", path.display()))
            })?;
            tracing::debug!(path = %path.display(), handle = %handle, "loaded software wrapping key");
            return Ok(Self::with_key(handle, key));
        }

        let kw = Self::ephemeral(handle);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KeyWrapError::Unavailable(format!("creating key dir: {e}")))?;
        }
        let encoded = Zeroizing::new(B64.encode(kw.key.as_slice()));
        write_private(path, encoded.as_bytes())
            .map_err(|e| KeyWrapError::Unavailable(format!("writing key file: {e}")))?;
        tracing::info!(path = %path.display(), handle = %kw.handle, "generated software wrapping key");
        Ok(kw)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

impl KeyWrap for SoftwareKeyWrap {
    fn handle(&self) -> &KeyHandle {
        &self.handle
    }

    fn wrap_key(&self, plaintext_key: &[u8]) -> Result<WrappedKey, KeyWrapError> {
        seal_under(&self.key, &self.handle, plaintext_key)
    }

    fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, KeyWrapError> {
        open_under(&self.key, &self.handle, wrapped)
    }
}

impl std::fmt::Debug for SoftwareKeyWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKeyWrap")
            .field("handle", &self.handle)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let kw = SoftwareKeyWrap::ephemeral(KeyHandle::new("test"));
        let wrapped = kw.wrap_key(&[7u8; 3168]).unwrap();
        assert_eq!(kw.unwrap_key(&wrapped).unwrap().as_slice(), &[7u8; 3168][..]);
    }

    #[test]
    fn test_other_key_fails() {
        let a = SoftwareKeyWrap::ephemeral(KeyHandle::new("same"));
        let b = SoftwareKeyWrap::ephemeral(KeyHandle::new("same"));
        let wrapped = a.wrap_key(b"sk").unwrap();
        assert!(matches!(b.unwrap_key(&wrapped), Err(KeyWrapError::Failure)));
    }

    #[test]
    fn test_tampered_blob_fails() {
        let kw = SoftwareKeyWrap::ephemeral(KeyHandle::new("test"));
        let mut bytes = kw.wrap_key(b"secret key").unwrap().as_bytes().to_vec();
        bytes[30] ^= 0x80;
        let err = kw.unwrap_key(&WrappedKey::from_bytes(bytes)).unwrap_err();
        assert!(matches!(err, KeyWrapError::Failure));
    }

    #[test]
    fn test_key_file_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("wrap.key");

        let first = SoftwareKeyWrap::from_key_file(KeyHandle::new("h"), &path).unwrap();
        let wrapped = first.wrap_key(b"kem secret").unwrap();

        let second = SoftwareKeyWrap::from_key_file(KeyHandle::new("h"), &path).unwrap();
        assert_eq!(second.unwrap_key(&wrapped).unwrap().as_slice(), b"kem secret");
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrap.key");
        SoftwareKeyWrap::from_key_file(KeyHandle::new("h"), &path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_key_file_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrap.key");
        std::fs::write(&path, "not base64 !!").unwrap();
        let err = SoftwareKeyWrap::from_key_file(KeyHandle::new("h"), &path).unwrap_err();
        assert!(matches!(err, KeyWrapError::Unavailable(_)));
    }

    #[test]
    fn test_debug_redacted() {
        let kw = SoftwareKeyWrap::with_key(KeyHandle::new("h"), [0x5A; KEY_SIZE]);
        assert!(format!("{kw:?}").contains("REDACTED"));
    }
}
