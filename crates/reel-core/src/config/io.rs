//! YAML configuration loading and saving
//!
//! Works with any serde configuration type; the engine uses it for
//! [`EngineConfig`](super::EngineConfig) and the CLI for overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load configuration from a YAML file
///
/// A missing file yields `T::default()`. A file that cannot be read or parsed
/// is logged and also yields the default, so a broken config never keeps the
/// engine from starting.
///
/// ```ignore
/// let config: EngineConfig = load_config(&default_config_path());
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }

    match try_load_config(path) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            T::default()
        }
    }
}

/// Load configuration, reporting read and parse failures
pub fn try_load_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/path/reel.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reel.yaml");
        std::fs::write(&path, "driver: [not, a, map").unwrap();

        let config: EngineConfig = load_config(&path);
        assert_eq!(config, EngineConfig::default());
        assert!(try_load_config::<EngineConfig>(&path).is_err());
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("reel.yaml");

        let mut config = EngineConfig::default();
        config.storm.threshold = 9;
        save_config(&config, &path).unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded.storm.threshold, 9);
    }
}
