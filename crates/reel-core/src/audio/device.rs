//! Audio device enumeration and lookup
//!
//! Enumerates devices from ALL available cpal hosts (ALSA, JACK, CoreAudio,
//! WASAPI, ASIO) so a device can be picked from any of them, and resolves a
//! configured [`DeviceId`] back to a cpal device for a given backend.
//!
//! On Linux with JACK running, JACK typically shows only one "device" (the JACK
//! server itself) while ALSA shows individual hardware devices.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::{BackendKind, DeviceId};
use super::error::{DriverError, DriverResult};
use crate::types::SUPPORTED_SAMPLE_RATES;

/// Stream direction when resolving a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Get a human-readable name for a host ID
pub(crate) fn host_name(host_id: HostId) -> String {
    // Use the debug representation which gives us the variant name
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        "Asio" => "ASIO".to_string(),
        _ => name,
    }
}

/// Get a host by its normalised name
fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// The cpal host serving `backend`
pub(crate) fn host_for(backend: BackendKind) -> DriverResult<Host> {
    match backend.host_name() {
        None => Ok(cpal::default_host()),
        Some(name) => get_host_by_name(name).ok_or_else(|| DriverError::BackendUnavailable {
            backend,
            detail: format!("{} host not available on this system", name),
        }),
    }
}

/// Resolve the configured device (or the host default) for one direction
pub(crate) fn resolve_device(
    host: &Host,
    backend: BackendKind,
    id: Option<&DeviceId>,
    direction: Direction,
) -> DriverResult<cpal::Device> {
    let Some(id) = id else {
        let default = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return default.ok_or_else(|| DriverError::DeviceNotFound {
            backend,
            name: format!("default {:?} device", direction).to_lowercase(),
        });
    };

    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| DriverError::from_native_message(backend, e.to_string()))?;

    devices
        .filter(|d: &cpal::Device| d.name().ok().as_deref() == Some(id.name.as_str()))
        .next()
        .ok_or_else(|| DriverError::DeviceNotFound {
            backend,
            name: id.name.clone(),
        })
}

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device identifier for configuration (includes host info)
    pub id: DeviceId,
    /// Human-readable device name
    pub name: String,
    /// Host backend name (e.g., "ALSA", "JACK")
    pub host: String,
    /// Default output device of its host
    pub is_default: bool,
    /// Supported rates the engine can run at
    pub sample_rates: Vec<u32>,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} (in: {}, out: {}, rates: {:?}){}",
            self.host,
            self.name,
            self.max_input_channels,
            self.max_output_channels,
            self.sample_rates,
            if self.is_default { " *" } else { "" }
        )
    }
}

fn merge_ranges<'a>(
    ranges: impl Iterator<Item = &'a cpal::SupportedStreamConfigRange>,
    rates: &mut Vec<u32>,
) -> u16 {
    let mut max_channels = 0;
    for config in ranges {
        max_channels = max_channels.max(config.channels());
        for rate in SUPPORTED_SAMPLE_RATES {
            if rate >= config.min_sample_rate().0 && rate <= config.max_sample_rate().0 && !rates.contains(&rate) {
                rates.push(rate);
            }
        }
    }
    max_channels
}

/// Get all available audio devices from ALL hosts
///
/// Input and output capabilities of a device with the same name on the same
/// host are merged into one entry.
pub fn enumerate_devices() -> Vec<DeviceInfo> {
    let mut all_devices: Vec<DeviceInfo> = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_name_str = host_name(host_id);
        let default_output = host
            .default_output_device()
            .and_then(|d: cpal::Device| d.name().ok());

        let devices = match host.devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };

            let inputs: Vec<_> = device
                .supported_input_configs()
                .map(|c| c.collect())
                .unwrap_or_default();
            let outputs: Vec<_> = device
                .supported_output_configs()
                .map(|c| c.collect())
                .unwrap_or_default();
            if inputs.is_empty() && outputs.is_empty() {
                continue;
            }

            let mut sample_rates = Vec::new();
            let max_input_channels = merge_ranges(inputs.iter(), &mut sample_rates);
            let max_output_channels = merge_ranges(outputs.iter(), &mut sample_rates);
            sample_rates.sort();

            all_devices.push(DeviceInfo {
                id: DeviceId::with_host(&name, &host_name_str),
                is_default: default_output.as_ref() == Some(&name),
                name,
                host: host_name_str.clone(),
                sample_rates,
                max_input_channels,
                max_output_channels,
            });
        }
    }

    // Sort: default devices first, then by host, then by name
    all_devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });

    log::info!(
        "Enumerated {} audio devices from {} hosts",
        all_devices.len(),
        cpal::available_hosts().len()
    );
    all_devices
}

/// Backends usable on this build and machine, Null always last
pub fn available_backends() -> Vec<BackendKind> {
    let mut backends = vec![BackendKind::SystemDefault];
    for host_id in cpal::available_hosts() {
        let kind = match host_name(host_id).as_str() {
            "ALSA" => BackendKind::Alsa,
            "JACK" => BackendKind::Jack,
            "CoreAudio" => BackendKind::CoreAudio,
            "WASAPI" => BackendKind::Wasapi,
            "ASIO" => BackendKind::Asio,
            _ => continue,
        };
        if !backends.contains(&kind) {
            backends.push(kind);
        }
    }
    #[cfg(all(target_os = "linux", feature = "jack-backend"))]
    if !backends.contains(&BackendKind::Jack) {
        backends.push(BackendKind::Jack);
    }
    backends.push(BackendKind::Null);
    backends
}
