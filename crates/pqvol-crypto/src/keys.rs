//! Key types and the master-key derivation chain
//!
//! Every secret here zeroizes itself on drop and redacts itself in `Debug`,
//! so intermediate keys are wiped on every exit path of mount and create.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE, SHARED_SECRET_SIZE};

const MASTER_KEY_INFO: &[u8] = b"pqvol-master-key-v1";
const KEY_CHECK_INFO: &[u8] = b"pqvol-key-check-v1";

macro_rules! secret_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        pub struct $name {
            bytes: [u8; $len],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self { bytes }
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.bytes
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_bytes!(
    /// Volume master key: encrypts every data block. Lives only inside a
    /// mounted session.
    MasterKey,
    KEY_SIZE
);

secret_bytes!(
    /// Argon2id output; seals the volume secret.
    PasswordKey,
    KEY_SIZE
);

secret_bytes!(
    /// ML-KEM shared secret.
    SharedSecret,
    SHARED_SECRET_SIZE
);

secret_bytes!(
    /// Random per-volume secret, stored sealed under the password key.
    VolumeSecret,
    KEY_SIZE
);

impl VolumeSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }
}

/// Fresh random KDF salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Combine the KEM shared secret and the password-protected volume secret
/// into the master key. Neither input alone determines the output.
///
/// Salted with the volume id, which is fixed at creation: the password salt
/// rotates on every password change and must not reach the master key.
pub fn derive_master_key(
    shared: &SharedSecret,
    volume_secret: &VolumeSecret,
    volume_id: &[u8; 16],
) -> CryptoResult<MasterKey> {
    let mut ikm = Zeroizing::new([0u8; SHARED_SECRET_SIZE + KEY_SIZE]);
    ikm[..SHARED_SECRET_SIZE].copy_from_slice(shared.as_bytes());
    ikm[SHARED_SECRET_SIZE..].copy_from_slice(volume_secret.as_bytes());

    let okm = hkdf_derive(Some(volume_id), ikm.as_slice(), MASTER_KEY_INFO)?;
    Ok(MasterKey::from_bytes(*okm))
}

/// Public check value stored in the header to confirm a derived master key.
pub fn derive_key_check(master: &MasterKey, volume_id: &[u8; 16]) -> CryptoResult<[u8; KEY_SIZE]> {
    let okm = hkdf_derive(Some(volume_id), master.as_bytes(), KEY_CHECK_INFO)?;
    Ok(*okm)
}

/// Constant-time comparison of a master key against a stored check value.
pub fn verify_key_check(
    master: &MasterKey,
    volume_id: &[u8; 16],
    expected: &[u8; KEY_SIZE],
) -> CryptoResult<bool> {
    let actual = derive_key_check(master, volume_id)?;
    Ok(bool::from(actual.ct_eq(expected)))
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, okm.as_mut_slice())
        .map_err(|_| CryptoError::Primitive("HKDF expand"))?;
    Ok(okm)
}
