//! Driver layer: one contract over every audio backend
//!
//! - **Null**: timer-driven, no hardware (fallback and failover target)
//! - **cpal**: ALSA, CoreAudio, WASAPI, ASIO and cpal's JACK host
//! - **JACK**: native client with per-channel ports (Linux, `jack-backend` feature)
//!
//! # Architecture
//!
//! Backends differ only in who owns the realtime thread. All of them call the
//! same [`ProcessHandler`] through a [`CallbackGate`], so the engine above sees
//! one lifecycle: `open → start → stop → close`.
//!
//! - **Caller thread**: negotiates the session in `open`, reports typed
//!   [`DriverError`]s
//! - **Realtime thread**: gate → handler → device buffers, nothing else
//! - **Notices**: disconnects and xruns arrive on a [`DriverNotifier`] channel
//!
//! # Example Usage
//!
//! ```ignore
//! use reel_core::audio::{handler_cell, Driver, DriverConfig, DriverNotifier, SilenceHandler};
//!
//! let config = DriverConfig::null().with_sample_rate(44100);
//! let (notifier, notices) = DriverNotifier::channel();
//! let mut driver = Driver::open(config.backend, &config, notifier)?;
//! driver.start(handler_cell(SilenceHandler))?;
//! driver.stop();
//! driver.close();
//! ```

mod config;
mod cpal_driver;
mod device;
mod driver;
mod error;
mod null_driver;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_driver;

pub use config::{
    BackendKind, DeviceId, DriverConfig, DuplexMode, DEFAULT_PERIOD_COUNT, DEFAULT_PERIOD_SIZE, DEFAULT_SAMPLE_RATE,
    MIN_PERIOD_SIZE,
};

pub use driver::{
    handler_cell, CallbackGate, Driver, DriverNotice, DriverNotifier, HandlerCell, ProcessHandler, SessionInfo,
    SessionState, SilenceHandler,
};

// Re-export device types for the CLI
pub use device::{available_backends, enumerate_devices, DeviceInfo};

pub use error::{DriverError, DriverResult, ErrorClass};
