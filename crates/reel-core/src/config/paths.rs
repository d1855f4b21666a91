//! Standard locations for configuration and recordings

use std::path::PathBuf;

/// Name of the engine configuration file
pub const CONFIG_FILE_NAME: &str = "reel.yaml";

/// Per-user configuration directory
///
/// Returns: `~/.config/reel` on Linux (platform equivalent elsewhere)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reel")
}

/// Default engine config file: `{config_dir}/reel.yaml`
pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Default directory for recorded takes
///
/// Returns: `~/Music/reel-takes`
pub fn default_takes_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reel-takes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_ends_with_file_name() {
        let path = default_config_path();
        assert!(path.ends_with("reel/reel.yaml"));
    }

    #[test]
    fn test_takes_dir_name() {
        assert!(default_takes_dir().ends_with("reel-takes"));
    }
}
