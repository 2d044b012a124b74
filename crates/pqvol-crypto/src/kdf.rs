//! Key derivation: Argon2id password → password key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::PasswordKey;
use crate::{KEY_SIZE, SALT_SIZE};

/// Password-based key derivation capability.
pub trait Kdf: Send + Sync {
    fn algorithm(&self) -> &'static str;

    fn derive(
        &self,
        password: &SecretString,
        salt: &[u8; SALT_SIZE],
        params: &KdfParams,
    ) -> CryptoResult<PasswordKey>;
}

/// PIM values above this are accepted with a warning.
pub const PIM_WARN_ABOVE: u32 = 20;

/// Argon2id cost parameters, recorded in every volume header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost_kib: u32,
    /// Time cost / iterations
    pub time_cost: u32,
    /// Lanes
    pub parallelism: u32,
}

impl KdfParams {
    pub const fn new(memory_cost_kib: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost_kib,
            time_cost,
            parallelism,
        }
    }

    /// Apply a personal iterations multiplier: the time cost is multiplied by
    /// `pim`, memory and lanes are unchanged. `pim` must be at least 1.
    pub fn with_pim(self, pim: u32) -> CryptoResult<Self> {
        if pim == 0 {
            return Err(CryptoError::InvalidKdfParams("PIM must be at least 1".into()));
        }
        if pim > PIM_WARN_ABOVE {
            tracing::warn!(pim, "large PIM, every mount will be slow");
        }
        let time_cost = self.time_cost.checked_mul(pim).ok_or_else(|| {
            CryptoError::InvalidKdfParams(format!("time cost {} x PIM {pim} overflows", self.time_cost))
        })?;
        Ok(Self { time_cost, ..self })
    }

    /// True when every cost is at least the corresponding cost of `floor`.
    pub fn meets(&self, floor: &KdfParams) -> bool {
        self.memory_cost_kib >= floor.memory_cost_kib
            && self.time_cost >= floor.time_cost
            && self.parallelism >= floor.parallelism
    }
}

impl std::fmt::Display for KdfParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "m={} KiB, t={}, p={}",
            self.memory_cost_kib, self.time_cost, self.parallelism
        )
    }
}

/// Production Argon2id (v1.3) adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2idKdf;

impl Kdf for Argon2idKdf {
    fn algorithm(&self) -> &'static str {
        "Argon2id"
    }

    fn derive(
        &self,
        password: &SecretString,
        salt: &[u8; SALT_SIZE],
        params: &KdfParams,
    ) -> CryptoResult<PasswordKey> {
        let argon2_params = Params::new(
            params.memory_cost_kib,
            params.time_cost,
            params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::InvalidKdfParams(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(password.expose_secret().as_bytes(), salt, key.as_mut_slice())
            .map_err(|_| CryptoError::Primitive("Argon2id"))?;

        Ok(PasswordKey::from_bytes(*key))
    }
}
