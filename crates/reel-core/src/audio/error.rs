//! Driver error types
//!
//! Every backend translates its native errors into [`DriverError`] inside its
//! own module; nothing backend-specific crosses this boundary.

use thiserror::Error;

use super::config::BackendKind;

/// Broad class of a failure, deciding how the engine reacts to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before anything ran; the session stays Closed
    Configuration,
    /// Another client holds the device or access was denied; not retried
    Contention,
    /// The session failed while running (disconnect, storm)
    Runtime,
    /// File-level failure scoped to one bus
    Io,
    /// Broken engine invariant; aborts the affected session only
    Fatal,
}

/// Errors that can occur opening or running a driver session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Device is held by another client
    #[error("{backend}: device busy ({detail})")]
    DeviceBusy { backend: BackendKind, detail: String },

    /// Operating system refused access to the device
    #[error("{backend}: permission denied ({detail})")]
    PermissionDenied { backend: BackendKind, detail: String },

    /// Rate, period or channel layout the backend cannot honour
    #[error("{backend}: unsupported configuration: {detail}")]
    UnsupportedConfig { backend: BackendKind, detail: String },

    /// Backend is not compiled in, not installed or its server is not running
    #[error("{backend}: backend unavailable ({detail})")]
    BackendUnavailable { backend: BackendKind, detail: String },

    /// Requested device does not exist on this backend
    #[error("{backend}: device not found: {name}")]
    DeviceNotFound { backend: BackendKind, name: String },

    /// Device went away while open
    #[error("{backend}: device disconnected ({detail})")]
    Disconnected { backend: BackendKind, detail: String },

    /// Operation not valid in the current session state
    #[error("invalid driver state: {0}")]
    InvalidState(String),
}

impl DriverError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DriverError::UnsupportedConfig { .. } | DriverError::DeviceNotFound { .. } => {
                ErrorClass::Configuration
            }
            DriverError::DeviceBusy { .. } | DriverError::PermissionDenied { .. } => ErrorClass::Contention,
            DriverError::BackendUnavailable { .. } | DriverError::Disconnected { .. } => ErrorClass::Runtime,
            DriverError::InvalidState(_) => ErrorClass::Fatal,
        }
    }

    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            DriverError::DeviceBusy { backend, .. }
            | DriverError::PermissionDenied { backend, .. }
            | DriverError::UnsupportedConfig { backend, .. }
            | DriverError::BackendUnavailable { backend, .. }
            | DriverError::DeviceNotFound { backend, .. }
            | DriverError::Disconnected { backend, .. } => Some(*backend),
            DriverError::InvalidState(_) => None,
        }
    }

    /// Sort a free-form native error message into the taxonomy
    ///
    /// Backends that only report text (ALSA through cpal, JACK status strings)
    /// go through here so the mapping lives in one place.
    pub fn from_native_message(backend: BackendKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let lower = detail.to_lowercase();
        if lower.contains("busy") || lower.contains("in use") || lower.contains("exclusive") {
            DriverError::DeviceBusy { backend, detail }
        } else if lower.contains("permission")
            || lower.contains("access denied")
            || lower.contains("not permitted")
        {
            DriverError::PermissionDenied { backend, detail }
        } else if lower.contains("no longer available")
            || lower.contains("unplugged")
            || lower.contains("no such device")
            || lower.contains("disconnected")
        {
            DriverError::Disconnected { backend, detail }
        } else if lower.contains("not supported") || lower.contains("invalid argument") {
            DriverError::UnsupportedConfig { backend, detail }
        } else {
            DriverError::BackendUnavailable { backend, detail }
        }
    }
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_messages_classify() {
        let busy = DriverError::from_native_message(BackendKind::Alsa, "Device or resource busy");
        assert!(matches!(busy, DriverError::DeviceBusy { .. }));
        assert_eq!(busy.class(), ErrorClass::Contention);

        let perm = DriverError::from_native_message(BackendKind::Alsa, "Permission denied");
        assert_eq!(perm.class(), ErrorClass::Contention);

        let gone = DriverError::from_native_message(BackendKind::Wasapi, "The requested device is no longer available");
        assert!(matches!(gone, DriverError::Disconnected { .. }));

        let other = DriverError::from_native_message(BackendKind::Jack, "server not running");
        assert!(matches!(other, DriverError::BackendUnavailable { .. }));
        assert_eq!(other.backend(), Some(BackendKind::Jack));
    }

    #[test]
    fn test_unsupported_config_is_configuration_class() {
        let err = DriverError::UnsupportedConfig {
            backend: BackendKind::Null,
            detail: "192000Hz".into(),
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}
