use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration (loaded from pqvol.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PqvolConfig {
    pub volume: VolumeConfig,
    pub keywrap: KeyWrapConfig,
    pub log: LogConfig,
    /// Custom KDF profiles, keyed by name. Checked against the floor when
    /// registered with the profile catalog.
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Profile used by `create` when none is given (default: medium)
    pub default_profile: String,
    /// Allow `create` to replace an existing container (default: false)
    pub allow_overwrite: bool,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            default_profile: "medium".into(),
            allow_overwrite: false,
        }
    }
}

/// Which key-wrap backend protects the KEM secret key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyWrapBackend {
    /// Platform keychain (Secret Service, macOS Keychain, Windows Credential Manager)
    Keychain,
    /// Wrapping key held in a local key file
    Software,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyWrapConfig {
    pub backend: KeyWrapBackend,
    /// Stable handle naming the wrapping key
    pub handle: String,
    /// Wrapping key file for the software backend
    pub key_file: PathBuf,
}

impl Default for KeyWrapConfig {
    fn default() -> Self {
        Self {
            backend: KeyWrapBackend::Keychain,
            handle: "pqvol-default".into(),
            key_file: PathBuf::from("~/.config/pqvol/wrap.key"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Argon2id cost parameters for a named profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl PqvolConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[volume]
default_profile = "high"
allow_overwrite = true

[keywrap]
backend = "software"
handle = "lab-key"
key_file = "/etc/pqvol/wrap.key"

[log]
level = "debug"
format = "json"

[profiles.archive]
memory_cost_kib = 1048576
time_cost = 6
parallelism = 4
"#;
        let config = PqvolConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.volume.default_profile, "high");
        assert!(config.volume.allow_overwrite);
        assert_eq!(config.keywrap.backend, KeyWrapBackend::Software);
        assert_eq!(config.keywrap.handle, "lab-key");
        assert_eq!(config.keywrap.key_file, PathBuf::from("/etc/pqvol/wrap.key"));
        assert_eq!(config.log.format, "json");
        let archive = config.profiles["archive"];
        assert_eq!(archive.memory_cost_kib, 1048576);
        assert_eq!(archive.time_cost, 6);
    }

    #[test]
    fn test_parse_defaults() {
        let config = PqvolConfig::from_toml("").unwrap();

        assert_eq!(config.volume.default_profile, "medium");
        assert!(!config.volume.allow_overwrite);
        assert_eq!(config.keywrap.backend, KeyWrapBackend::Keychain);
        assert_eq!(config.keywrap.handle, "pqvol-default");
        assert_eq!(config.log.level, "info");
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[keywrap]
handle = "laptop"
"#;
        let config = PqvolConfig::from_toml(toml_str).unwrap();

        // Overridden
        assert_eq!(config.keywrap.handle, "laptop");
        // Defaults
        assert_eq!(config.keywrap.backend, KeyWrapBackend::Keychain);
        assert_eq!(config.volume.default_profile, "medium");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = PqvolConfig::from_toml("[keywrap]\nbackend = \"tpm\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut config = PqvolConfig::default();
        config.profiles.insert(
            "fast".into(),
            ProfileConfig {
                memory_cost_kib: 131072,
                time_cost: 3,
                parallelism: 2,
            },
        );
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = PqvolConfig::from_toml(&toml_str).unwrap();

        assert_eq!(config.keywrap.handle, parsed.keywrap.handle);
        assert_eq!(config.profiles, parsed.profiles);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PqvolConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.volume.default_profile, "medium");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pqvol.toml");
        std::fs::write(&path, "[log]\nlevel = \"warn\"\n").unwrap();
        let config = PqvolConfig::load(&path).unwrap();
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        let p = Path::new("/var/lib/pqvol/wrap.key");
        assert_eq!(expand_tilde(p), p);
    }
}
