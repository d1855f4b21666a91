//! Engine configuration
//!
//! - Generic YAML config loading/saving
//! - Standard paths (config file, takes directory)
//! - [`EngineConfig`]: driver, disk streaming, storm detection and recording
//!
//! # Usage
//!
//! ```ignore
//! use reel_core::config::{default_config_path, load_config, save_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path());
//! save_config(&config, &default_config_path())?;
//! ```

mod io;
mod paths;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::DriverConfig;
use crate::codec::{DitherMode, SampleFormat};
use crate::engine::MAX_STORM_THRESHOLD;

pub use io::{load_config, save_config, try_load_config};
pub use paths::{config_dir, default_config_path, default_takes_dir, CONFIG_FILE_NAME};

/// Disk streaming parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Playback prebuffer depth in seconds
    pub prebuffer_secs: f32,
    /// Capture buffer depth in seconds
    pub capture_buffer_secs: f32,
    /// Disk thread idle poll interval
    pub poll_interval_ms: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            prebuffer_secs: 1.0,
            capture_buffer_secs: 2.0,
            poll_interval_ms: 5,
        }
    }
}

impl DiskConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Underrun storm detection
///
/// `threshold` underruns on one bus within `window_secs` of session time
/// fail the device over to the Null driver. A threshold of 0 disables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StormConfig {
    pub threshold: u32,
    pub window_secs: f32,
}

impl StormConfig {
    /// Reject settings the detector cannot honour exactly
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold as usize > MAX_STORM_THRESHOLD {
            return Err(format!(
                "storm threshold {} exceeds the maximum of {}",
                self.threshold, MAX_STORM_THRESHOLD
            ));
        }
        if !(self.window_secs.is_finite() && self.window_secs > 0.0) {
            return Err(format!("storm window must be a positive number of seconds, got {}", self.window_secs));
        }
        Ok(())
    }
}

impl Default for StormConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window_secs: 2.0,
        }
    }
}

/// Format of recorded takes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub format: SampleFormat,
    pub dither: DitherMode,
    /// Where takes go when no path is given (None = `~/Music/reel-takes`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl RecordingConfig {
    pub fn takes_dir(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_takes_dir)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub driver: DriverConfig,
    pub disk: DiskConfig,
    pub storm: StormConfig,
    pub recording: RecordingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BackendKind;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.storm.threshold, 5);
        assert_eq!(config.storm.window_secs, 2.0);
        assert_eq!(config.disk.prebuffer_secs, 1.0);
        assert_eq!(config.recording.format, SampleFormat::Float32);
    }

    #[test]
    fn test_storm_validation() {
        assert!(StormConfig::default().validate().is_ok());
        let disabled = StormConfig {
            threshold: 0,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());

        let too_many = StormConfig {
            threshold: 100,
            ..Default::default()
        };
        assert!(too_many.validate().unwrap_err().contains("100"));
        for window_secs in [f32::NAN, 0.0, -1.0, f32::INFINITY] {
            let config = StormConfig {
                window_secs,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "driver:\n  backend: Null\nstorm:\n  threshold: 3\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.driver.backend, BackendKind::Null);
        assert_eq!(config.storm.threshold, 3);
        assert_eq!(config.storm.window_secs, 2.0);
        assert_eq!(config.disk, DiskConfig::default());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = EngineConfig::default();
        config.recording.format = SampleFormat::Int24;
        config.recording.dither = DitherMode::Triangular;
        config.driver.sample_rate = 44100;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
