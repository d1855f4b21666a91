//! Device status events
//!
//! Everything the engine wants the application to know arrives as a
//! [`DeviceEvent`] on one crossbeam channel: lifecycle, diagnostics and
//! scoped I/O failures. The realtime thread never sends these directly; it
//! pushes [`RtEvent`]s that the supervisor thread translates.

use std::path::PathBuf;

use crate::audio::{BackendKind, DriverError};
use crate::types::BusId;

/// Event raised by the audio device or its background threads
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    DriverOpened { backend: BackendKind, device: String },
    DriverOpenFailed { backend: BackendKind, error: DriverError },
    /// Full duplex requested, capture unavailable
    DuplexDowngraded { backend: BackendKind, detail: String },
    Underrun { bus: BusId, count: u64 },
    StormDetected { bus: BusId },
    /// Session replaced by the silent Null driver
    FailedOver { from: BackendKind, reason: String },
    Disconnected { backend: BackendKind, detail: String },
    SourceError { bus: BusId, name: String, error: String },
    RecordingFailed { bus: BusId, path: PathBuf, error: String },
    Xrun { backend: BackendKind },
}

impl DeviceEvent {
    /// Text suitable for showing to the user
    pub fn description(&self) -> String {
        match self {
            DeviceEvent::DriverOpened { backend, device } => {
                format!("Audio running on {} ({})", backend, device)
            }
            DeviceEvent::DriverOpenFailed { backend, error } => {
                format!("Could not open {}: {}", backend, error)
            }
            DeviceEvent::DuplexDowngraded { backend, detail } => format!(
                "{}: recording input unavailable ({}); playback only",
                backend, detail
            ),
            DeviceEvent::Underrun { bus, count } => {
                format!("{}: disk could not keep up ({} dropouts so far)", bus, count)
            }
            DeviceEvent::StormDetected { bus } => {
                format!("{}: repeated dropouts, the audio system is overloaded", bus)
            }
            DeviceEvent::FailedOver { from, reason } => format!(
                "{} stopped ({}); audio is muted until the device is reopened",
                from, reason
            ),
            DeviceEvent::Disconnected { backend, detail } => {
                format!("{}: audio device disconnected ({})", backend, detail)
            }
            DeviceEvent::SourceError { bus, name, error } => {
                format!("{}: playback of {} stopped: {}", bus, name, error)
            }
            DeviceEvent::RecordingFailed { bus, path, error } => format!(
                "{}: recording to {} stopped: {}",
                bus,
                path.display(),
                error
            ),
            DeviceEvent::Xrun { backend } => format!("{}: xrun", backend),
        }
    }
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

/// Fixed-size notification from the realtime thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RtEvent {
    Underrun { bus: BusId, count: u64 },
    Storm { bus: BusId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions_name_the_scope() {
        let event = DeviceEvent::RecordingFailed {
            bus: BusId(3),
            path: PathBuf::from("/takes/drums.wav"),
            error: "disk full".into(),
        };
        let text = event.description();
        assert!(text.contains("bus#3"));
        assert!(text.contains("drums.wav"));

        let failover = DeviceEvent::FailedOver {
            from: BackendKind::Alsa,
            reason: "underrun storm on bus#1".into(),
        };
        assert!(failover.to_string().starts_with("ALSA"));
    }
}
