//! Reel Core - real-time audio I/O engine for a multitrack recorder
//!
//! Moves samples between audio hardware, files on disk and the mix graph:
//!
//! - [`audio`]: uniform driver contract over Null, cpal and native JACK backends
//! - [`engine`]: the [`engine::AudioDevice`] hub (buses, process dispatch, failover)
//! - [`stream`]: disk-backed playback and recording sources fed by one I/O thread
//! - [`render`]: offline export with optional two-pass normalization
//! - [`codec`]: audio file readers and writers

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod render;
pub mod ring;
pub mod stream;
pub mod types;

pub use types::*;
