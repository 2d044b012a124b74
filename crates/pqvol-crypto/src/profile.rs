//! Named Argon2id cost profiles
//!
//! `low` is the floor: nothing weaker may be used to create a volume.
//! There is no global profile state; callers resolve a name to explicit
//! [`KdfParams`] and pass them to `create`.

use std::collections::BTreeMap;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::KdfParams;

pub const LOW: KdfParams = KdfParams::new(256 * 1024, 3, 4);
pub const MEDIUM: KdfParams = KdfParams::new(512 * 1024, 5, 4);
pub const HIGH: KdfParams = KdfParams::new(1024 * 1024, 10, 4);
pub const PARANOID: KdfParams = KdfParams::new(2048 * 1024, 20, 4);

#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: BTreeMap<String, KdfParams>,
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        let profiles = [
            ("low", LOW),
            ("medium", MEDIUM),
            ("high", HIGH),
            ("paranoid", PARANOID),
        ]
        .into_iter()
        .map(|(name, params)| (name.to_string(), params))
        .collect();
        Self { profiles }
    }
}

impl ProfileCatalog {
    /// The built-in profiles.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Minimum acceptable parameters.
    pub fn floor() -> KdfParams {
        LOW
    }

    pub fn check_floor(params: &KdfParams) -> CryptoResult<()> {
        if params.meets(&LOW) {
            Ok(())
        } else {
            Err(CryptoError::WeakKdfParams(format!(
                "{params} is below the minimum ({LOW})"
            )))
        }
    }

    /// Register a custom profile. Replaces a profile of the same name.
    pub fn with_profile(mut self, name: &str, params: KdfParams) -> CryptoResult<Self> {
        Self::check_floor(&params)?;
        tracing::debug!(profile = name, %params, "registered KDF profile");
        self.profiles.insert(name.to_string(), params);
        Ok(self)
    }

    /// Look up a profile by name. Unknown names fail closed.
    pub fn resolve(&self, name: &str) -> CryptoResult<KdfParams> {
        self.profiles
            .get(name)
            .copied()
            .ok_or_else(|| CryptoError::UnknownProfile(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KdfParams)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_resolve() {
        let catalog = ProfileCatalog::builtin();
        assert_eq!(catalog.resolve("low").unwrap(), LOW);
        assert_eq!(LOW.memory_cost_kib, 262144);
        assert_eq!(catalog.resolve("medium").unwrap().memory_cost_kib, 524288);
        assert_eq!(catalog.resolve("high").unwrap().time_cost, 10);
        assert_eq!(catalog.resolve("paranoid").unwrap().memory_cost_kib, 2097152);
    }

    #[test]
    fn test_unknown_profile_fails_closed() {
        let err = ProfileCatalog::builtin().resolve("ultra").unwrap_err();
        assert!(matches!(err, CryptoError::UnknownProfile(ref n) if n == "ultra"));
    }

    #[test]
    fn test_profiles_strengthen_monotonically() {
        let catalog = ProfileCatalog::builtin();
        let order = ["low", "medium", "high", "paranoid"];
        for pair in order.windows(2) {
            let weaker = catalog.resolve(pair[0]).unwrap();
            let stronger = catalog.resolve(pair[1]).unwrap();
            assert!(stronger.meets(&weaker), "{} < {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_every_builtin_meets_floor() {
        for (name, params) in ProfileCatalog::builtin().iter() {
            assert!(ProfileCatalog::check_floor(params).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_custom_profile_registered() {
        let archive = KdfParams::new(1024 * 1024, 6, 4);
        let catalog = ProfileCatalog::builtin()
            .with_profile("archive", archive)
            .unwrap();
        assert_eq!(catalog.resolve("archive").unwrap(), archive);
        assert!(catalog.names().any(|n| n == "archive"));
    }

    #[test]
    fn test_floor_rejects_64mib_memory() {
        let err = ProfileCatalog::check_floor(&KdfParams::new(64 * 1024, 3, 4)).unwrap_err();
        assert!(matches!(err, CryptoError::WeakKdfParams(_)));
    }

    #[test]
    fn test_weak_custom_profile_rejected() {
        let err = ProfileCatalog::builtin()
            .with_profile("quick", KdfParams::new(1024, 1, 1))
            .unwrap_err();
        assert!(matches!(err, CryptoError::WeakKdfParams(_)));
    }
}
