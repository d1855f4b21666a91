//! Native JACK backend for Linux
//!
//! Registers `capture_N` / `playback_N` ports on a JACK client and runs the
//! process handler from the JACK realtime thread. Used when the
//! `jack-backend` feature is enabled; also works against PipeWire's JACK
//! compatibility layer.
//!
//! The server owns the clock: its sample rate must match the configured one
//! and its buffer size becomes the period size.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  as_slice()   ┌─────────────────────┐  as_mut_slice()
//! │ capture_N ports  │──────────────►│   JACK RT thread    │──────────────►  playback_N ports
//! └──────────────────┘               │ gate → handler      │
//!                                    └─────────────────────┘
//! ```
//!
//! `stop` deactivates the client but keeps it and its ports registered, so a
//! later `start` does not have to renegotiate.

use std::sync::Arc;

use jack::{AudioIn, AudioOut, Client, ClientOptions, ClientStatus, Control, Port, PortFlags, ProcessScope};

use super::config::{BackendKind, DriverConfig, DuplexMode};
use super::driver::{run_cycle, CallbackGate, DriverNotice, DriverNotifier, HandlerCell, SessionInfo};
use super::error::{DriverError, DriverResult};
use crate::types::{PortBuffers, MAX_PERIOD_FRAMES};

/// JACK's default audio port type
const AUDIO_PORT_TYPE: &str = "32 bit float mono audio";

/// Client, ports and state kept between activations
struct IdleClient {
    client: Client,
    capture: Vec<Port<AudioIn>>,
    playback: Vec<Port<AudioOut>>,
}

pub struct JackDriver {
    info: SessionInfo,
    gate: Arc<CallbackGate>,
    notifier: DriverNotifier,
    client_name: String,
    idle: Option<IdleClient>,
    active: Option<jack::AsyncClient<JackNotifications, JackProcessor>>,
}

impl JackDriver {
    pub fn open(config: &DriverConfig, notifier: DriverNotifier) -> DriverResult<Self> {
        let (client, _status) =
            Client::new(&config.client_name, ClientOptions::NO_START_SERVER).map_err(map_jack_error)?;
        // JACK may rename the client if another one has the same name
        let client_name = client.name().to_string();

        let sample_rate = client.sample_rate() as u32;
        if sample_rate != config.sample_rate {
            return Err(DriverError::UnsupportedConfig {
                backend: BackendKind::Jack,
                detail: format!(
                    "JACK server runs at {}Hz, {}Hz requested",
                    sample_rate, config.sample_rate
                ),
            });
        }

        let buffer_size = client.buffer_size();
        if buffer_size as usize > MAX_PERIOD_FRAMES {
            return Err(DriverError::UnsupportedConfig {
                backend: BackendKind::Jack,
                detail: format!("JACK buffer of {} frames exceeds {}", buffer_size, MAX_PERIOD_FRAMES),
            });
        }

        let capture_count = if config.duplex.has_capture() {
            config.capture_channels as usize
        } else {
            0
        };
        let playback_count = if config.duplex.has_playback() {
            config.playback_channels as usize
        } else {
            0
        };

        let capture = (0..capture_count)
            .map(|i| client.register_port(&format!("capture_{}", i + 1), AudioIn::default()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_jack_error)?;
        let playback = (0..playback_count)
            .map(|i| client.register_port(&format!("playback_{}", i + 1), AudioOut::default()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_jack_error)?;

        let info = SessionInfo {
            backend: BackendKind::Jack,
            device_name: client_name.clone(),
            sample_rate,
            period_size: buffer_size,
            period_count: config.period_count,
            duplex: config.duplex,
            requested_duplex: config.duplex,
            capture_channels: capture.len(),
            playback_channels: playback.len(),
        };

        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
            client_name,
            sample_rate,
            buffer_size,
            info.latency_ms()
        );

        Ok(Self {
            info,
            gate: Arc::new(CallbackGate::new()),
            notifier,
            client_name,
            idle: Some(IdleClient {
                client,
                capture,
                playback,
            }),
            active: None,
        })
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn gate(&self) -> &Arc<CallbackGate> {
        &self.gate
    }

    pub fn start(&mut self, handler: HandlerCell) -> DriverResult<()> {
        let Some(idle) = self.idle.take() else {
            return Err(DriverError::InvalidState("JACK client already active".into()));
        };

        let processor = JackProcessor {
            capture_buffers: PortBuffers::new(idle.capture.len(), MAX_PERIOD_FRAMES),
            playback_buffers: PortBuffers::new(idle.playback.len(), MAX_PERIOD_FRAMES),
            capture: idle.capture,
            playback: idle.playback,
            gate: self.gate.clone(),
            handler,
        };
        let notifications = JackNotifications {
            notifier: self.notifier.clone(),
            sample_rate: self.info.sample_rate,
        };

        self.gate.open();
        let async_client = match idle.client.activate_async(notifications, processor) {
            Ok(c) => c,
            Err(e) => {
                // The client was consumed; this session cannot be restarted
                self.gate.close();
                return Err(map_jack_error(e));
            }
        };
        log::info!("JACK client activated");

        connect_physical(async_client.as_client(), &self.client_name, &self.info);
        self.active = Some(async_client);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.gate.close();
        let Some(active) = self.active.take() else {
            return;
        };
        match active.deactivate() {
            Ok((client, _notifications, processor)) => {
                self.idle = Some(IdleClient {
                    client,
                    capture: processor.capture,
                    playback: processor.playback,
                });
                log::debug!("JACK client deactivated");
            }
            Err(e) => log::warn!("Failed to deactivate JACK client: {}", e),
        }
    }
}

impl Drop for JackDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// JACK process handler
///
/// Copies the capture ports into pre-allocated port buffers, runs the
/// handler and copies playback out. No allocation on this path.
struct JackProcessor {
    capture: Vec<Port<AudioIn>>,
    playback: Vec<Port<AudioOut>>,
    capture_buffers: PortBuffers,
    playback_buffers: PortBuffers,
    gate: Arc<CallbackGate>,
    handler: HandlerCell,
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let n_frames = (ps.n_frames() as usize).min(MAX_PERIOD_FRAMES);

        self.capture_buffers.set_frames(n_frames);
        self.playback_buffers.set_frames(n_frames);

        for (ch, port) in self.capture.iter().enumerate() {
            let input = port.as_slice(ps);
            self.capture_buffers
                .channel_mut(ch)
                .copy_from_slice(&input[..n_frames]);
        }

        run_cycle(&self.gate, &self.handler, &self.capture_buffers, &mut self.playback_buffers);

        for (ch, port) in self.playback.iter_mut().enumerate() {
            let output = port.as_mut_slice(ps);
            output[..n_frames].copy_from_slice(self.playback_buffers.channel(ch));
            output[n_frames..].fill(0.0);
        }

        Control::Continue
    }
}

/// JACK notification handler
struct JackNotifications {
    notifier: DriverNotifier,
    sample_rate: u32,
}

impl jack::NotificationHandler for JackNotifications {
    fn shutdown(&mut self, _status: ClientStatus, reason: &str) {
        log::error!("JACK server shut down: {}", reason);
        self.notifier.notify(DriverNotice::Disconnected {
            backend: BackendKind::Jack,
            detail: reason.to_string(),
        });
    }

    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        if srate != self.sample_rate {
            self.notifier.notify(DriverNotice::StreamError {
                backend: BackendKind::Jack,
                detail: format!("server rate changed to {}Hz", srate),
            });
        }
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        self.notifier.notify(DriverNotice::Xrun {
            backend: BackendKind::Jack,
        });
        Control::Continue
    }
}

/// Connect our ports to the physical system ports, first to first
fn connect_physical(client: &Client, client_name: &str, info: &SessionInfo) {
    if info.duplex != DuplexMode::PlaybackOnly {
        let sources = client.ports(None, Some(AUDIO_PORT_TYPE), PortFlags::IS_OUTPUT | PortFlags::IS_PHYSICAL);
        for (i, source) in sources.iter().take(info.capture_channels).enumerate() {
            let ours = format!("{}:capture_{}", client_name, i + 1);
            if let Err(e) = client.connect_ports_by_name(source, &ours) {
                log::warn!("Could not connect {} to {}: {}", source, ours, e);
            }
        }
    }

    let sinks = client.ports(None, Some(AUDIO_PORT_TYPE), PortFlags::IS_INPUT | PortFlags::IS_PHYSICAL);
    if sinks.is_empty() && info.playback_channels > 0 {
        log::warn!("No JACK playback ports found for connection");
    }
    for (i, sink) in sinks.iter().take(info.playback_channels).enumerate() {
        let ours = format!("{}:playback_{}", client_name, i + 1);
        if let Err(e) = client.connect_ports_by_name(&ours, sink) {
            log::warn!("Could not connect {} to {}: {}", ours, sink, e);
        }
    }
}

fn map_jack_error(err: jack::Error) -> DriverError {
    match err {
        jack::Error::ClientError(status) if status.contains(ClientStatus::SERVER_FAILED) => {
            DriverError::BackendUnavailable {
                backend: BackendKind::Jack,
                detail: "JACK server not running".to_string(),
            }
        }
        jack::Error::ClientError(status) if status.contains(ClientStatus::NAME_NOT_UNIQUE) => DriverError::DeviceBusy {
            backend: BackendKind::Jack,
            detail: "client name already in use".to_string(),
        },
        other => DriverError::from_native_message(BackendKind::Jack, other.to_string()),
    }
}
