//! Authenticated encryption: XChaCha20-Poly1305 with detached tags
//!
//! Volume blocks and the wrapped volume secret are stored as
//! `[24-byte nonce][ciphertext][16-byte tag]`; the adapter works on the
//! separated parts so callers can lay them out in fixed-width fields.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Ciphertext with its detached authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// AEAD capability. `open` fails with a single opaque
/// [`CryptoError::AuthenticationFailure`] and never returns partial plaintext.
pub trait Aead: Send + Sync {
    fn algorithm(&self) -> &'static str;

    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Sealed>;

    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
    ) -> CryptoResult<Zeroizing<Vec<u8>>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XChaCha20Poly1305Aead;

impl Aead for XChaCha20Poly1305Aead {
    fn algorithm(&self) -> &'static str {
        "XChaCha20-Poly1305"
    }

    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Sealed> {
        let cipher = XChaCha20Poly1305::new(key.into());
        let mut buffer = plaintext.to_vec();

        let tag = cipher
            .encrypt_in_place_detached(XNonce::from_slice(nonce), aad, &mut buffer)
            .map_err(|_| CryptoError::Primitive("XChaCha20-Poly1305 encryption"))?;

        Ok(Sealed {
            ciphertext: buffer,
            tag: tag.into(),
        })
    }

    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let cipher = XChaCha20Poly1305::new(key.into());
        let mut buffer = Zeroizing::new(ciphertext.to_vec());

        // Poly1305 verification inside the crate is constant time
        if cipher
            .decrypt_in_place_detached(
                XNonce::from_slice(nonce),
                aad,
                &mut buffer,
                Tag::from_slice(tag),
            )
            .is_err()
        {
            buffer.zeroize();
            return Err(CryptoError::AuthenticationFailure);
        }

        Ok(buffer)
    }
}
