//! Key encapsulation: ML-KEM-1024 (FIPS 203)
//!
//! The volume engine stores the ciphertext in the header and hands the secret
//! key to the hardware key-wrap; only the 32-byte shared secret feeds the key
//! hierarchy.

use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{EncodedSizeUser, KemCore};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::SharedSecret;
use crate::{KEM_CIPHERTEXT_SIZE, KEM_PUBLIC_KEY_SIZE, KEM_SECRET_KEY_SIZE, SHARED_SECRET_SIZE};

type EK = <ml_kem::MlKem1024 as KemCore>::EncapsulationKey;
type DK = <ml_kem::MlKem1024 as KemCore>::DecapsulationKey;

/// Key encapsulation capability.
pub trait Kem: Send + Sync {
    fn algorithm(&self) -> &'static str;

    fn generate_keypair(&self) -> CryptoResult<KemKeyPair>;

    fn encapsulate(&self, public_key: &KemPublicKey)
        -> CryptoResult<(KemCiphertext, SharedSecret)>;

    fn decapsulate(
        &self,
        secret_key: &KemSecretKey,
        ciphertext: &KemCiphertext,
    ) -> CryptoResult<SharedSecret>;
}

/// ML-KEM-1024 encapsulation key.
#[derive(Clone, PartialEq, Eq)]
pub struct KemPublicKey {
    bytes: Box<[u8; KEM_PUBLIC_KEY_SIZE]>,
}

impl KemPublicKey {
    pub fn from_bytes(bytes: [u8; KEM_PUBLIC_KEY_SIZE]) -> Self {
        Self {
            bytes: Box::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEM_PUBLIC_KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemPublicKey({} bytes)", KEM_PUBLIC_KEY_SIZE)
    }
}

/// ML-KEM-1024 decapsulation key. Zeroized on drop.
///
/// The only variable-length key input in the crate: its length is checked
/// on construction because it arrives from the key-wrap backend.
pub struct KemSecretKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl KemSecretKey {
    pub fn from_bytes(bytes: Zeroizing<Vec<u8>>) -> CryptoResult<Self> {
        if bytes.len() != KEM_SECRET_KEY_SIZE {
            return Err(CryptoError::InvalidLength {
                what: "KEM secret key",
                expected: KEM_SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for KemSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemSecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// ML-KEM-1024 ciphertext as stored in the volume header.
#[derive(Clone, PartialEq, Eq)]
pub struct KemCiphertext {
    bytes: Box<[u8; KEM_CIPHERTEXT_SIZE]>,
}

impl KemCiphertext {
    pub fn from_bytes(bytes: [u8; KEM_CIPHERTEXT_SIZE]) -> Self {
        Self {
            bytes: Box::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEM_CIPHERTEXT_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for KemCiphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemCiphertext({} bytes)", KEM_CIPHERTEXT_SIZE)
    }
}

#[derive(Debug)]
pub struct KemKeyPair {
    pub public_key: KemPublicKey,
    pub secret_key: KemSecretKey,
}

/// Production ML-KEM-1024 adapter backed by the RustCrypto `ml-kem` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlKem1024;

impl Kem for MlKem1024 {
    fn algorithm(&self) -> &'static str {
        "ML-KEM-1024"
    }

    fn generate_keypair(&self) -> CryptoResult<KemKeyPair> {
        let mut rng = rand::rngs::OsRng;
        let (dk, ek) = ml_kem::MlKem1024::generate(&mut rng);

        let mut public = [0u8; KEM_PUBLIC_KEY_SIZE];
        public.copy_from_slice(ek.as_bytes().as_ref());

        let mut dk_encoded = dk.as_bytes();
        drop(dk);
        let dk_bytes: &mut [u8] = dk_encoded.as_mut();
        let secret = Zeroizing::new(dk_bytes.to_vec());
        dk_bytes.zeroize();

        Ok(KemKeyPair {
            public_key: KemPublicKey::from_bytes(public),
            secret_key: KemSecretKey::from_bytes(secret)?,
        })
    }

    fn encapsulate(
        &self,
        public_key: &KemPublicKey,
    ) -> CryptoResult<(KemCiphertext, SharedSecret)> {
        let ek_array: ml_kem::Encoded<EK> = public_key.as_bytes()[..]
            .try_into()
            .map_err(|_| CryptoError::Primitive("ML-KEM public key decoding"))?;
        let ek = EK::from_bytes(&ek_array);

        let mut rng = rand::rngs::OsRng;
        let (ct, mut ss) = ek
            .encapsulate(&mut rng)
            .map_err(|_| CryptoError::Primitive("ML-KEM encapsulation"))?;

        let mut ciphertext = [0u8; KEM_CIPHERTEXT_SIZE];
        ciphertext.copy_from_slice(ct.as_ref());

        Ok((
            KemCiphertext::from_bytes(ciphertext),
            take_shared_secret(ss.as_mut()),
        ))
    }

    fn decapsulate(
        &self,
        secret_key: &KemSecretKey,
        ciphertext: &KemCiphertext,
    ) -> CryptoResult<SharedSecret> {
        let mut dk_array: ml_kem::Encoded<DK> = secret_key
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::Primitive("ML-KEM secret key decoding"))?;
        let dk = DK::from_bytes(&dk_array);
        let dk_bytes: &mut [u8] = dk_array.as_mut();
        dk_bytes.zeroize();

        let ct: ml_kem::Ciphertext<ml_kem::MlKem1024> = ciphertext.as_bytes()[..]
            .try_into()
            .map_err(|_| CryptoError::Primitive("ML-KEM ciphertext decoding"))?;

        let mut ss = dk
            .decapsulate(&ct)
            .map_err(|_| CryptoError::Primitive("ML-KEM decapsulation"))?;
        drop(dk);

        Ok(take_shared_secret(ss.as_mut()))
    }
}

/// Move the crate's shared key into a `SharedSecret`, wiping the source and
/// the intermediate copy.
fn take_shared_secret(ss: &mut [u8]) -> SharedSecret {
    let mut shared = Zeroizing::new([0u8; SHARED_SECRET_SIZE]);
    shared.copy_from_slice(ss);
    ss.zeroize();
    SharedSecret::from_bytes(*shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encapsulate_decapsulate_agree() {
        let kem = MlKem1024;
        let pair = kem.generate_keypair().unwrap();
        let (ct, ss_sender) = kem.encapsulate(&pair.public_key).unwrap();
        let ss_recipient = kem.decapsulate(&pair.secret_key, &ct).unwrap();
        assert_eq!(ss_sender.as_bytes(), ss_recipient.as_bytes());
    }

    #[test]
    fn test_key_sizes() {
        let pair = MlKem1024.generate_keypair().unwrap();
        assert_eq!(pair.public_key.as_bytes().len(), KEM_PUBLIC_KEY_SIZE);
        assert_eq!(pair.secret_key.as_bytes().len(), KEM_SECRET_KEY_SIZE);
    }

    #[test]
    fn test_wrong_secret_key_yields_different_secret() {
        let kem = MlKem1024;
        let alice = kem.generate_keypair().unwrap();
        let mallory = kem.generate_keypair().unwrap();
        let (ct, ss) = kem.encapsulate(&alice.public_key).unwrap();
        // Implicit rejection: decapsulation "succeeds" with an unrelated secret
        let other = kem.decapsulate(&mallory.secret_key, &ct).unwrap();
        assert_ne!(ss.as_bytes(), other.as_bytes());
    }

    #[test]
    fn test_tampered_ciphertext_yields_different_secret() {
        let kem = MlKem1024;
        let pair = kem.generate_keypair().unwrap();
        let (ct, ss) = kem.encapsulate(&pair.public_key).unwrap();
        let mut bytes = *ct.as_bytes();
        bytes[100] ^= 0x01;
        let other = kem
            .decapsulate(&pair.secret_key, &KemCiphertext::from_bytes(bytes))
            .unwrap();
        assert_ne!(ss.as_bytes(), other.as_bytes());
    }

    #[test]
    fn test_shared_secret_source_is_wiped() {
        let mut raw = [0x5Cu8; SHARED_SECRET_SIZE];
        let ss = take_shared_secret(&mut raw);
        assert_eq!(ss.as_bytes(), &[0x5Cu8; SHARED_SECRET_SIZE]);
        assert_eq!(raw, [0u8; SHARED_SECRET_SIZE]);
    }

    #[test]
    fn test_secret_key_copied_before_wipe() {
        let kem = MlKem1024;
        let pair = kem.generate_keypair().unwrap();
        assert!(pair.secret_key.as_bytes().iter().any(|&b| b != 0));
        let (ct, ss) = kem.encapsulate(&pair.public_key).unwrap();
        assert_eq!(
            kem.decapsulate(&pair.secret_key, &ct).unwrap().as_bytes(),
            ss.as_bytes()
        );
    }

    #[test]
    fn test_secret_key_length_checked() {
        let err = KemSecretKey::from_bytes(Zeroizing::new(vec![0u8; 100])).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidLength {
                expected: KEM_SECRET_KEY_SIZE,
                actual: 100,
                ..
            }
        ));
    }

    #[test]
    fn test_secret_key_debug_redacted() {
        let pair = MlKem1024.generate_keypair().unwrap();
        let dbg = format!("{:?}", pair.secret_key);
        assert!(dbg.contains("REDACTED"));
    }
}
