//! Cheap primitives for tests that drive whole volumes.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for dependents' dev-builds. Never part of a release binary.

use std::sync::Arc;

use secrecy::SecretString;

use crate::error::CryptoResult;
use crate::kdf::{Argon2idKdf, Kdf, KdfParams};
use crate::keys::PasswordKey;
use crate::{Primitives, SALT_SIZE};

/// Cost actually spent by [`FastKdf`].
pub const FAST_PARAMS: KdfParams = KdfParams::new(1024, 1, 1);

/// Argon2id at [`FAST_PARAMS`] whatever the caller asks for.
///
/// Output still depends on password and salt, so wrong-password paths fail
/// exactly as in production. The requested cost is accepted but not spent.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastKdf;

impl Kdf for FastKdf {
    fn algorithm(&self) -> &'static str {
        "Argon2id (fast)"
    }

    fn derive(
        &self,
        password: &SecretString,
        salt: &[u8; SALT_SIZE],
        _params: &KdfParams,
    ) -> CryptoResult<PasswordKey> {
        Argon2idKdf.derive(password, salt, &FAST_PARAMS)
    }
}

/// Production primitives with the KDF swapped for [`FastKdf`].
pub fn fast_primitives() -> Primitives {
    Primitives {
        kdf: Arc::new(FastKdf),
        ..Default::default()
    }
}
