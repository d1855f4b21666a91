//! Audio device hub
//!
//! [`AudioDevice`] owns the driver session and everything the realtime
//! callback touches:
//!
//! - **Buses**: named capture or playback endpoints bound to hardware ports,
//!   each optionally carrying a disk source or a take
//! - **Process dispatch**: one [`ProcessHandler`](crate::audio::ProcessHandler)
//!   walks the published bus table every period
//! - **Diagnostics**: underruns are counted per bus; a burst of them (a
//!   storm) or a disconnect moves the session onto the silent Null driver
//!
//! # Example
//!
//! ```no_run
//! use reel_core::config::EngineConfig;
//! use reel_core::engine::AudioDevice;
//! use reel_core::BusRole;
//!
//! let device = AudioDevice::new(EngineConfig::default())?;
//! let report = device.open_default()?;
//! println!("running on {}", report.active);
//!
//! let bus = device.create_bus("mix", BusRole::Playback, 2)?;
//! device.bind_bus(bus, vec![0, 1])?;
//! device.attach_file(bus, std::path::Path::new("song.wav"))?;
//! device.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bus;
mod device;
mod error;
mod events;
mod gc;
mod processor;
mod storm;

pub use bus::{BusInfo, MAX_BUS_CHANNELS};
pub use device::{AudioDevice, OpenReport};
pub use error::{DeviceError, DeviceResult, OpenAttempt};
pub use events::DeviceEvent;
pub use gc::gc_handle;
pub use storm::{StormDetector, MAX_STORM_THRESHOLD};
