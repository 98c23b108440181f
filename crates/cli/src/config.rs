//! Persistent defaults for the `lora-adapters` tool.
//!
//! Values are resolved with the following priority:
//! 1. CLI arguments (highest priority)
//! 2. Config file (~/.config/lora-adapters/config.toml)
//! 3. Built-in defaults (lowest priority)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Persistent configuration stored in TOML format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Target device: `cpu`, `cuda[:N]` or `metal[:N]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Directory adapter paths are resolved against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    /// JSON adapter list used by `load` when `--config` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapters_config: Option<PathBuf>,

    /// Log level filter when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl CliConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("lora-adapters").join("config.toml"))
    }

    /// Load from the default path, falling back to defaults.
    pub fn load() -> Self {
        Self::default_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }

        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// Merge with another config, preferring values from `other`.
    pub fn merge(&mut self, other: &CliConfig) {
        if other.device.is_some() {
            self.device = other.device.clone();
        }
        if other.base_dir.is_some() {
            self.base_dir = other.base_dir.clone();
        }
        if other.adapters_config.is_some() {
            self.adapters_config = other.adapters_config.clone();
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level.clone();
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = CliConfig {
            device: Some("cuda:1".to_string()),
            base_dir: Some(PathBuf::from("/models/llama")),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.log_level.is_none());
    }

    #[test]
    fn test_merge() {
        let mut base = CliConfig {
            device: Some("cpu".to_string()),
            log_level: Some("info".to_string()),
            ..Default::default()
        };

        let overrides = CliConfig {
            device: Some("metal".to_string()),
            adapters_config: Some(PathBuf::from("adapters.json")),
            ..Default::default()
        };

        base.merge(&overrides);

        assert_eq!(base.device.as_deref(), Some("metal"));
        assert_eq!(base.log_level.as_deref(), Some("info"));
        assert_eq!(base.adapters_config, Some(PathBuf::from("adapters.json")));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "device = [").unwrap();
        let err = CliConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("Parse error"));
    }
}
