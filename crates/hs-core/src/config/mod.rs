//! Configuration management for hoststream

mod host;
pub mod serde_utils;

pub use host::{AuthConfig, HostConfig, StatusConfig, TransportConfig, VideoConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hoststream")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("host.toml")
}

/// Get the default persisted-state file path
pub fn default_state_path() -> PathBuf {
    default_config_dir().join("state.toml")
}

/// Load a TOML document from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save a TOML document to a file, creating parent directories
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write {}: {}", path.display(), e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let result: Result<HostConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(p)) if p == path));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("host.toml");

        save_config(&path, &HostConfig::default()).unwrap();
        let loaded: HostConfig = load_config(&path).unwrap();
        assert_eq!(loaded.listen_address, HostConfig::default().listen_address);
    }

    #[test]
    fn test_default_paths_share_directory() {
        assert_eq!(default_config_path().parent(), default_state_path().parent());
    }
}
