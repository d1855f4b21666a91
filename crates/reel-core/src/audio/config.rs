//! Driver configuration
//!
//! Backend selection, device, sample rate, period geometry and duplex mode
//! for one driver session.

use serde::{Deserialize, Serialize};

use crate::codec::DitherMode;
use crate::types::MAX_PERIOD_FRAMES;

/// Default period size (frames). 512 frames is a safe default on most systems.
pub const DEFAULT_PERIOD_SIZE: u32 = 512;

/// Default number of periods in the hardware buffer
pub const DEFAULT_PERIOD_COUNT: u32 = 2;

/// Default session sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Smallest period the drivers accept (frames)
pub const MIN_PERIOD_SIZE: u32 = 16;

/// Audio backend a session can run on
///
/// Every kind except `Null` and (with the `jack-backend` feature) `Jack` is
/// served by the matching cpal host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// No hardware I/O; a timer thread drives the process callback
    Null,
    /// Platform default cpal host
    SystemDefault,
    Alsa,
    Jack,
    CoreAudio,
    Wasapi,
    Asio,
}

impl BackendKind {
    /// Normalised cpal host name for this backend, if it maps to one
    pub fn host_name(&self) -> Option<&'static str> {
        match self {
            BackendKind::Null | BackendKind::SystemDefault => None,
            BackendKind::Alsa => Some("ALSA"),
            BackendKind::Jack => Some("JACK"),
            BackendKind::CoreAudio => Some("CoreAudio"),
            BackendKind::Wasapi => Some("WASAPI"),
            BackendKind::Asio => Some("ASIO"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Null => "Null",
            BackendKind::SystemDefault => "System default",
            BackendKind::Alsa => "ALSA",
            BackendKind::Jack => "JACK",
            BackendKind::CoreAudio => "CoreAudio",
            BackendKind::Wasapi => "WASAPI",
            BackendKind::Asio => "ASIO",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which directions a session opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplexMode {
    #[default]
    Full,
    PlaybackOnly,
    CaptureOnly,
}

impl DuplexMode {
    pub fn has_capture(&self) -> bool {
        matches!(self, DuplexMode::Full | DuplexMode::CaptureOnly)
    }

    pub fn has_playback(&self) -> bool {
        matches!(self, DuplexMode::Full | DuplexMode::PlaybackOnly)
    }
}

/// Audio device identifier
///
/// Includes both the device name and the host backend (JACK, ALSA, etc.)
/// so devices from different hosts can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "JACK", "ALSA", "CoreAudio")
    /// If None, the backend's host is searched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for one driver session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Preferred backend
    pub backend: BackendKind,

    /// Backends tried in order when the preferred one cannot open
    pub fallback_backends: Vec<BackendKind>,

    /// Device to open (None = backend default)
    pub device: Option<DeviceId>,

    pub sample_rate: u32,

    /// Frames per period
    pub period_size: u32,

    /// Periods in the hardware buffer
    pub period_count: u32,

    pub duplex: DuplexMode,

    /// Hardware capture channels to open
    pub capture_channels: u16,

    /// Hardware playback channels to open
    pub playback_channels: u16,

    /// Applied when the device only takes integer samples
    pub dither: DitherMode,

    /// JACK client name
    pub client_name: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::SystemDefault,
            fallback_backends: vec![BackendKind::Null],
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            period_size: DEFAULT_PERIOD_SIZE,
            period_count: DEFAULT_PERIOD_COUNT,
            duplex: DuplexMode::Full,
            capture_channels: 2,
            playback_channels: 2,
            dither: DitherMode::None,
            client_name: "reel".to_string(),
        }
    }
}

impl DriverConfig {
    /// Config for the Null backend with no fallbacks
    pub fn null() -> Self {
        Self {
            backend: BackendKind::Null,
            fallback_backends: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<BackendKind>) -> Self {
        self.fallback_backends = fallbacks;
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_period_size(mut self, frames: u32) -> Self {
        self.period_size = frames;
        self
    }

    pub fn with_duplex(mut self, duplex: DuplexMode) -> Self {
        self.duplex = duplex;
        self
    }

    pub fn with_channels(mut self, capture: u16, playback: u16) -> Self {
        self.capture_channels = capture;
        self.playback_channels = playback;
        self
    }

    /// Candidate backends in the order `open` tries them, without duplicates
    pub fn candidates(&self) -> Vec<BackendKind> {
        let mut out = vec![self.backend];
        for kind in &self.fallback_backends {
            if !out.contains(kind) {
                out.push(*kind);
            }
        }
        out
    }

    /// Period length in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.period_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Period size clamped to what the drivers pre-allocate for
    pub fn clamped_period(&self) -> usize {
        (self.period_size.max(MIN_PERIOD_SIZE) as usize).min(MAX_PERIOD_FRAMES)
    }
}
