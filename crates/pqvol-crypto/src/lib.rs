//! pqvol-crypto: primitive adapters and key hierarchy for post-quantum volumes
//!
//! Every primitive sits behind an object-safe capability trait so the volume
//! engine can be driven with instrumented or alternative adapters:
//!
//! | trait  | production adapter        |
//! |--------|---------------------------|
//! | `Kem`  | ML-KEM-1024 (FIPS 203)    |
//! | `Kdf`  | Argon2id v1.3             |
//! | `Aead` | XChaCha20-Poly1305        |
//! | `Hash` | BLAKE3                    |
//!
//! Key hierarchy:
//! ```text
//! Password ──Argon2id(salt, profile)──► Password Key
//!   └── seals Volume Secret (random, 256-bit) in the volume header
//! ML-KEM-1024 encapsulation ──► Shared Secret
//!   (KEM secret key is held under the hardware key-wrap)
//! Master Key = HKDF-SHA256(volume_id, Shared Secret || Volume Secret, "pqvol-master-key-v1")
//!   ├── Block AEAD: XChaCha20-Poly1305 (nonce=random_192bit, AAD=volume_id||block_idx)
//!   └── Key Check = HKDF-SHA256(volume_id, Master Key, "pqvol-key-check-v1")
//! ```

use std::sync::Arc;

pub mod aead;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod kem;
pub mod keys;
pub mod nonce;
pub mod profile;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use aead::{Aead, Sealed, XChaCha20Poly1305Aead};
pub use error::{CryptoError, CryptoResult};
pub use hash::{Blake3Hash, Hash};
pub use kdf::{Argon2idKdf, Kdf, KdfParams};
pub use kem::{Kem, KemCiphertext, KemKeyPair, KemPublicKey, KemSecretKey, MlKem1024};
pub use keys::{
    derive_key_check, derive_master_key, generate_salt, verify_key_check, MasterKey, PasswordKey,
    SharedSecret, VolumeSecret,
};
pub use nonce::NonceSource;
pub use profile::ProfileCatalog;

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the per-volume KDF salt
pub const SALT_SIZE: usize = 32;

/// Size of a BLAKE3 digest
pub const DIGEST_SIZE: usize = 32;

/// ML-KEM-1024 encapsulation (public) key size
pub const KEM_PUBLIC_KEY_SIZE: usize = 1568;

/// ML-KEM-1024 decapsulation (secret) key size
pub const KEM_SECRET_KEY_SIZE: usize = 3168;

/// ML-KEM-1024 ciphertext size
pub const KEM_CIPHERTEXT_SIZE: usize = 1568;

/// ML-KEM shared secret size
pub const SHARED_SECRET_SIZE: usize = 32;

/// One adapter per primitive, shared across threads.
#[derive(Clone)]
pub struct Primitives {
    pub kem: Arc<dyn Kem>,
    pub kdf: Arc<dyn Kdf>,
    pub aead: Arc<dyn Aead>,
    pub hash: Arc<dyn Hash>,
}

impl Default for Primitives {
    fn default() -> Self {
        Self {
            kem: Arc::new(MlKem1024),
            kdf: Arc::new(Argon2idKdf),
            aead: Arc::new(XChaCha20Poly1305Aead),
            hash: Arc::new(Blake3Hash),
        }
    }
}

impl std::fmt::Debug for Primitives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Primitives")
            .field("kem", &self.kem.algorithm())
            .field("kdf", &self.kdf.algorithm())
            .field("aead", &self.aead.algorithm())
            .field("hash", &self.hash.algorithm())
            .finish()
    }
}
