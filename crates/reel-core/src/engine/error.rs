//! Device error types

use thiserror::Error;

use crate::audio::{BackendKind, DriverError, ErrorClass};
use crate::stream::StreamError;
use crate::types::{BusId, BusRole};

/// One failed backend during `open`
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAttempt {
    pub backend: BackendKind,
    pub error: DriverError,
}

/// Errors returned by [`AudioDevice`](super::AudioDevice) operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Operation not allowed while the session is running
    #[error("Audio device is running; stop it first")]
    Busy,

    /// Operation needs an open session
    #[error("No audio session is open")]
    NotOpen,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown bus {0}")]
    UnknownBus(BusId),

    #[error("{bus} is a {actual:?} bus, {expected:?} required")]
    WrongRole {
        bus: BusId,
        expected: BusRole,
        actual: BusRole,
    },

    #[error("{bus}: source has {found} channels, bus has {expected}")]
    ChannelMismatch { bus: BusId, expected: usize, found: usize },

    #[error("{bus}: port {port} out of range ({available} available)")]
    InvalidPort { bus: BusId, port: usize, available: usize },

    #[error("{0} is already recording")]
    AlreadyRecording(BusId),

    /// Every candidate backend failed
    #[error("No audio backend could be opened ({} tried)", .attempts.len())]
    AllBackendsFailed { attempts: Vec<OpenAttempt> },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Background thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl DeviceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DeviceError::Busy
            | DeviceError::NotOpen
            | DeviceError::InvalidConfig(_)
            | DeviceError::UnknownBus(_)
            | DeviceError::WrongRole { .. }
            | DeviceError::ChannelMismatch { .. }
            | DeviceError::InvalidPort { .. }
            | DeviceError::AlreadyRecording(_) => ErrorClass::Configuration,
            DeviceError::AllBackendsFailed { attempts } => {
                if attempts.iter().any(|a| a.error.class() == ErrorClass::Runtime) {
                    ErrorClass::Runtime
                } else {
                    ErrorClass::Contention
                }
            }
            DeviceError::Driver(e) => e.class(),
            DeviceError::Stream(e) => e.class(),
            DeviceError::Spawn { .. } => ErrorClass::Fatal,
        }
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
