//! cpal backend (ALSA, JACK host, CoreAudio, WASAPI, ASIO)
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────┐   interleaved f32    ┌──────────────────────┐
//!  │  Input stream  │───write()───────────►│  Capture ring (SPSC) │
//!  │ (cpal thread)  │   drop on full       └──────────┬───────────┘
//!  └────────────────┘                                 │ read()
//!                                                     ▼
//!                                          ┌──────────────────────┐
//!                                          │    Output stream     │
//!                                          │  gate → handler →    │
//!                                          │  interleave → device │
//!                                          └──────────────────────┘
//! ```
//!
//! The output callback drives `process` in Full and PlaybackOnly mode; in
//! CaptureOnly mode the input callback drives it and playback is discarded.
//!
//! cpal streams are not `Send`, so they are built, played and dropped on a
//! dedicated owner thread; the driver itself only holds channels to it.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BuildStreamError, PlayStreamError, SampleFormat, SizedSample, Stream, StreamConfig, StreamError};

use super::config::{BackendKind, DeviceId, DriverConfig, DuplexMode};
use super::device::{host_for, resolve_device, Direction};
use super::driver::{run_cycle, CallbackGate, DriverNotice, DriverNotifier, HandlerCell, SessionInfo};
use super::error::{DriverError, DriverResult};
use crate::codec::{DitherMode, Ditherer};
use crate::ring::{Consumer, Producer, RingBuffer};
use crate::types::{PortBuffers, MAX_PERIOD_FRAMES};

/// Capture ring depth in periods (Full duplex only)
const CAPTURE_RING_PERIODS: usize = 8;

/// Negotiated stream parameters for one direction
#[derive(Debug, Clone)]
struct StreamPlan {
    device_name: String,
    config: StreamConfig,
    format: SampleFormat,
    /// Engine-side ports (≤ stream channels)
    ports: usize,
}

/// Everything the owner thread needs to rebuild the streams
#[derive(Debug, Clone)]
struct SessionPlan {
    backend: BackendKind,
    device: Option<DeviceId>,
    output: Option<StreamPlan>,
    input: Option<StreamPlan>,
    period: usize,
    dither: DitherMode,
}

struct StreamThread {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct CpalDriver {
    info: SessionInfo,
    plan: SessionPlan,
    gate: Arc<CallbackGate>,
    notifier: DriverNotifier,
    streams: Option<StreamThread>,
}

impl CpalDriver {
    pub fn open(backend: BackendKind, config: &DriverConfig, notifier: DriverNotifier) -> DriverResult<Self> {
        let host = host_for(backend)?;
        let mut duplex = config.duplex;

        let output = if duplex.has_playback() {
            let device = resolve_device(&host, backend, config.device.as_ref(), Direction::Output)?;
            Some(negotiate(&device, Direction::Output, backend, config, config.playback_channels)?)
        } else {
            None
        };

        let input = if duplex.has_capture() {
            let negotiated = resolve_device(&host, backend, config.device.as_ref(), Direction::Input)
                .and_then(|device| negotiate(&device, Direction::Input, backend, config, config.capture_channels));
            match negotiated {
                Ok(plan) => Some(plan),
                Err(e) if duplex == DuplexMode::Full => {
                    log::warn!("{}: capture unavailable ({}), continuing playback-only", backend, e);
                    duplex = DuplexMode::PlaybackOnly;
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let device_name = output
            .as_ref()
            .or(input.as_ref())
            .map(|p| p.device_name.clone())
            .unwrap_or_default();

        let info = SessionInfo {
            backend,
            device_name,
            sample_rate: config.sample_rate,
            period_size: config.clamped_period() as u32,
            period_count: config.period_count,
            duplex,
            requested_duplex: config.duplex,
            capture_channels: input.as_ref().map(|p| p.ports).unwrap_or(0),
            playback_channels: output.as_ref().map(|p| p.ports).unwrap_or(0),
        };

        log::info!(
            "{} driver opened on '{}' ({}Hz, {} frames, {:.1}ms, {:?})",
            backend,
            info.device_name,
            info.sample_rate,
            info.period_size,
            info.latency_ms(),
            info.duplex
        );

        Ok(Self {
            info,
            plan: SessionPlan {
                backend,
                device: config.device.clone(),
                output,
                input,
                period: config.clamped_period(),
                dither: config.dither,
            },
            gate: Arc::new(CallbackGate::new()),
            notifier,
            streams: None,
        })
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn gate(&self) -> &Arc<CallbackGate> {
        &self.gate
    }

    pub fn start(&mut self, handler: HandlerCell) -> DriverResult<()> {
        if self.streams.is_some() {
            return Err(DriverError::InvalidState("cpal streams already running".into()));
        }

        let (ready_tx, ready_rx) = mpsc::channel::<DriverResult<bool>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let plan = self.plan.clone();
        let gate = self.gate.clone();
        let notifier = self.notifier.clone();

        self.gate.open();
        let handle = thread::Builder::new()
            .name("cpal-streams".to_string())
            .spawn(move || {
                let (streams, capture_dropped) = match build_streams(&plan, gate, handler, notifier) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                for stream in &streams {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(map_play_error(plan.backend, e)));
                        return;
                    }
                }
                let _ = ready_tx.send(Ok(capture_dropped));

                // Park until stop() (or the driver is dropped)
                let _ = stop_rx.recv();
                for stream in &streams {
                    let _ = stream.pause();
                }
            })
            .map_err(|e| DriverError::InvalidState(format!("failed to spawn stream thread: {}", e)))?;

        let result = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DriverError::InvalidState("stream thread exited".into())));

        match result {
            Ok(capture_dropped) => {
                if capture_dropped {
                    self.drop_capture();
                }
                self.streams = Some(StreamThread { stop_tx, handle });
                log::info!("{} streams started", self.info.backend);
                Ok(())
            }
            Err(e) => {
                self.gate.close();
                let _ = handle.join();
                Err(e)
            }
        }
    }

    /// Continue playback-only after the capture stream could not be built.
    /// Later starts skip capture too, so the session info stays accurate.
    fn drop_capture(&mut self) {
        self.plan.input = None;
        if self.info.duplex == DuplexMode::Full {
            self.info.duplex = DuplexMode::PlaybackOnly;
        }
        self.info.capture_channels = 0;
    }

    pub fn stop(&mut self) {
        self.gate.close();
        if let Some(streams) = self.streams.take() {
            let _ = streams.stop_tx.send(());
            let _ = streams.handle.join();
            log::debug!("{} streams stopped", self.info.backend);
        }
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Negotiation
// ═══════════════════════════════════════════════════════════════════════════

/// Pick a stream config at exactly the requested rate
///
/// f32 is preferred; i16 is accepted (quantised with the configured dither).
/// A device that cannot run at the rate is a configuration error, never a
/// silent rate change.
fn negotiate(
    device: &cpal::Device,
    direction: Direction,
    backend: BackendKind,
    config: &DriverConfig,
    wanted_channels: u16,
) -> DriverResult<StreamPlan> {
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let ranges: Vec<_> = match direction {
        Direction::Input => device.supported_input_configs().map(|c| c.collect()),
        Direction::Output => device.supported_output_configs().map(|c| c.collect()),
    }
    .map_err(|e| DriverError::from_native_message(backend, e.to_string()))?;

    let rate = config.sample_rate;
    let at_rate = |c: &&cpal::SupportedStreamConfigRange| rate >= c.min_sample_rate().0 && rate <= c.max_sample_rate().0;
    let score = |c: &cpal::SupportedStreamConfigRange| {
        let format_rank = match c.sample_format() {
            SampleFormat::F32 => 0,
            SampleFormat::I16 => 1,
            _ => 2,
        };
        // Enough channels first, then the fewest channels that satisfy the request
        let short = c.channels() < wanted_channels;
        (format_rank, short, if short { u16::MAX - c.channels() } else { c.channels() })
    };

    let best = ranges
        .iter()
        .filter(at_rate)
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .min_by_key(|c| score(*c))
        .ok_or_else(|| DriverError::UnsupportedConfig {
            backend,
            detail: format!("'{}' has no f32/i16 {:?} config at {}Hz", device_name, direction, rate),
        })?;

    let period = config.clamped_period() as u32;
    let buffer_size = match best.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } if period >= *min && period <= *max => {
            cpal::BufferSize::Fixed(period)
        }
        _ => {
            log::debug!("'{}' cannot use {} frame periods, using device default", device_name, period);
            cpal::BufferSize::Default
        }
    };

    let format = best.sample_format();
    let stream_config = StreamConfig {
        channels: best.channels(),
        sample_rate: cpal::SampleRate(rate),
        buffer_size,
    };
    let ports = (wanted_channels as usize).min(best.channels() as usize);

    log::debug!(
        "'{}' {:?}: {} ch ({} ports), {:?}, {:?}",
        device_name,
        direction,
        stream_config.channels,
        ports,
        format,
        stream_config.buffer_size
    );

    Ok(StreamPlan {
        device_name,
        config: stream_config,
        format,
        ports,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Stream construction (owner thread)
// ═══════════════════════════════════════════════════════════════════════════

/// Per-stream state of the callback that drives `process`
struct CycleState {
    gate: Arc<CallbackGate>,
    handler: HandlerCell,
    capture: PortBuffers,
    playback: PortBuffers,
    /// Interleaved capture as delivered by the device
    input_scratch: Vec<f32>,
    /// Interleaved playback for the device
    output_scratch: Vec<f32>,
    input_channels: usize,
    output_channels: usize,
    capture_rx: Option<Consumer<f32>>,
    ditherer: Ditherer,
}

impl CycleState {
    fn new(plan: &SessionPlan, gate: Arc<CallbackGate>, handler: HandlerCell) -> Self {
        let input_channels = plan.input.as_ref().map(|p| p.config.channels as usize).unwrap_or(0);
        let output_channels = plan.output.as_ref().map(|p| p.config.channels as usize).unwrap_or(0);
        Self {
            gate,
            handler,
            capture: PortBuffers::new(plan.input.as_ref().map(|p| p.ports).unwrap_or(0), MAX_PERIOD_FRAMES),
            playback: PortBuffers::new(plan.output.as_ref().map(|p| p.ports).unwrap_or(0), MAX_PERIOD_FRAMES),
            input_scratch: vec![0.0; MAX_PERIOD_FRAMES * input_channels],
            output_scratch: vec![0.0; MAX_PERIOD_FRAMES * output_channels],
            input_channels,
            output_channels,
            capture_rx: None,
            ditherer: Ditherer::new(plan.dither, 0x0dd5),
        }
    }

    /// Run one chunk of ≤ MAX_PERIOD_FRAMES. `input` is interleaved device
    /// capture when the input callback drives the cycle.
    fn cycle(&mut self, frames: usize, input: Option<&[f32]>) {
        self.capture.set_frames(frames);
        self.playback.set_frames(frames);

        let wanted = frames * self.input_channels;
        match (input, self.capture_rx.as_mut()) {
            (Some(input), _) => self.capture.deinterleave_from(input, self.input_channels),
            (None, Some(rx)) => {
                let got = rx.read(&mut self.input_scratch[..wanted]);
                self.input_scratch[got..wanted].fill(0.0);
                self.capture.deinterleave_from(&self.input_scratch[..wanted], self.input_channels);
            }
            (None, None) => self.capture.silence(),
        }

        run_cycle(&self.gate, &self.handler, &self.capture, &mut self.playback);

        if self.output_channels > 0 {
            self.playback
                .interleave_into(&mut self.output_scratch[..frames * self.output_channels], self.output_channels);
        }
    }

    /// Output callback body: render `data` in chunks the port buffers can hold
    fn render<S: Copy>(&mut self, data: &mut [S], convert: fn(f32, &mut Ditherer) -> S) {
        let channels = self.output_channels;
        let total = data.len() / channels;
        let mut done = 0;
        while done < total {
            let frames = (total - done).min(MAX_PERIOD_FRAMES);
            self.cycle(frames, None);
            let out = &mut data[done * channels..(done + frames) * channels];
            for (dst, src) in out.iter_mut().zip(&self.output_scratch) {
                *dst = convert(*src, &mut self.ditherer);
            }
            done += frames;
        }
    }

    /// Input callback body in CaptureOnly mode
    fn consume<S: Copy>(&mut self, data: &[S], convert: fn(S) -> f32) {
        let channels = self.input_channels;
        for chunk in data.chunks(MAX_PERIOD_FRAMES * channels) {
            let frames = chunk.len() / channels;
            for (dst, src) in self.input_scratch.iter_mut().zip(chunk) {
                *dst = convert(*src);
            }
            let input = std::mem::take(&mut self.input_scratch);
            self.cycle(frames, Some(&input[..frames * channels]));
            self.input_scratch = input;
        }
    }
}

/// Input callback state in Full duplex: convert and push into the capture ring
struct CaptureFeed {
    tx: Producer<f32>,
    scratch: Vec<f32>,
}

impl CaptureFeed {
    fn push<S: Copy>(&mut self, data: &[S], convert: fn(S) -> f32) {
        for chunk in data.chunks(self.scratch.len()) {
            for (dst, src) in self.scratch.iter_mut().zip(chunk) {
                *dst = convert(*src);
            }
            // Overflow drops the newest capture; the output side will see a short read
            self.tx.write(&self.scratch[..chunk.len()]);
        }
    }
}

fn f32_out(s: f32, _: &mut Ditherer) -> f32 {
    s
}

fn i16_out(s: f32, ditherer: &mut Ditherer) -> i16 {
    ditherer.quantize_i16(s)
}

fn f32_in(s: f32) -> f32 {
    s
}

fn i16_in(s: i16) -> f32 {
    s as f32 / 32768.0
}

fn error_callback(backend: BackendKind, notifier: DriverNotifier) -> impl FnMut(StreamError) + Send + 'static {
    move |err| {
        let notice = match err {
            StreamError::DeviceNotAvailable => DriverNotice::Disconnected {
                backend,
                detail: err.to_string(),
            },
            StreamError::BackendSpecific { err } => {
                match DriverError::from_native_message(backend, err.description) {
                    DriverError::Disconnected { detail, .. } => DriverNotice::Disconnected { backend, detail },
                    other => DriverNotice::StreamError {
                        backend,
                        detail: other.to_string(),
                    },
                }
            }
        };
        notifier.notify(notice);
    }
}

fn build_output<S: SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut state: CycleState,
    convert: fn(f32, &mut Ditherer) -> S,
    backend: BackendKind,
    notifier: DriverNotifier,
) -> Result<Stream, BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [S], _info: &cpal::OutputCallbackInfo| state.render(data, convert),
        error_callback(backend, notifier),
        None,
    )
}

fn build_input_feed<S: SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut feed: CaptureFeed,
    convert: fn(S) -> f32,
    backend: BackendKind,
    notifier: DriverNotifier,
) -> Result<Stream, BuildStreamError> {
    device.build_input_stream(
        config,
        move |data: &[S], _info: &cpal::InputCallbackInfo| feed.push(data, convert),
        error_callback(backend, notifier),
        None,
    )
}

fn build_input_driven<S: SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut state: CycleState,
    convert: fn(S) -> f32,
    backend: BackendKind,
    notifier: DriverNotifier,
) -> Result<Stream, BuildStreamError> {
    device.build_input_stream(
        config,
        move |data: &[S], _info: &cpal::InputCallbackInfo| state.consume(data, convert),
        error_callback(backend, notifier),
        None,
    )
}

fn build_streams(
    plan: &SessionPlan,
    gate: Arc<CallbackGate>,
    handler: HandlerCell,
    notifier: DriverNotifier,
) -> DriverResult<(Vec<Stream>, bool)> {
    let backend = plan.backend;
    let host = host_for(backend)?;
    let mut streams = Vec::new();
    let mut capture_dropped = false;
    let mut state = CycleState::new(plan, gate, handler);

    let Some(output) = plan.output.as_ref() else {
        // CaptureOnly: the input stream drives the cycle
        let Some(input) = plan.input.as_ref() else {
            return Err(DriverError::InvalidState("session has neither capture nor playback".into()));
        };
        let device = resolve_device(&host, backend, plan.device.as_ref(), Direction::Input)?;
        let stream = match input.format {
            SampleFormat::I16 => build_input_driven(&device, &input.config, state, i16_in, backend, notifier),
            _ => build_input_driven(&device, &input.config, state, f32_in, backend, notifier),
        }
        .map_err(|e| map_build_error(backend, e))?;
        streams.push(stream);
        return Ok((streams, false));
    };

    if let Some(input) = plan.input.as_ref() {
        let capacity = plan.period.max(1) * CAPTURE_RING_PERIODS * input.config.channels as usize;
        let (tx, rx) = RingBuffer::<f32>::new(capacity);
        let feed = CaptureFeed {
            tx,
            scratch: vec![0.0; MAX_PERIOD_FRAMES * input.config.channels as usize],
        };

        let built = resolve_device(&host, backend, plan.device.as_ref(), Direction::Input).and_then(|device| {
            let stream = match input.format {
                SampleFormat::I16 => build_input_feed(&device, &input.config, feed, i16_in, backend, notifier.clone()),
                _ => build_input_feed(&device, &input.config, feed, f32_in, backend, notifier.clone()),
            };
            stream.map_err(|e| map_build_error(backend, e))
        });

        match built {
            Ok(stream) => {
                state.capture_rx = Some(rx);
                streams.push(stream);
            }
            Err(e) => {
                log::warn!("{}: capture stream failed ({}), running playback-only", backend, e);
                capture_dropped = true;
                notifier.notify(DriverNotice::DuplexDowngraded {
                    backend,
                    detail: e.to_string(),
                });
            }
        }
    }

    let device = resolve_device(&host, backend, plan.device.as_ref(), Direction::Output)?;
    let stream = match output.format {
        SampleFormat::I16 => build_output(&device, &output.config, state, i16_out, backend, notifier),
        _ => build_output(&device, &output.config, state, f32_out, backend, notifier),
    }
    .map_err(|e| map_build_error(backend, e))?;
    streams.push(stream);

    Ok((streams, capture_dropped))
}

// ═══════════════════════════════════════════════════════════════════════════
// Error translation
// ═══════════════════════════════════════════════════════════════════════════

fn map_build_error(backend: BackendKind, err: BuildStreamError) -> DriverError {
    match err {
        BuildStreamError::DeviceNotAvailable => DriverError::Disconnected {
            backend,
            detail: err.to_string(),
        },
        BuildStreamError::StreamConfigNotSupported | BuildStreamError::InvalidArgument => {
            DriverError::UnsupportedConfig {
                backend,
                detail: err.to_string(),
            }
        }
        BuildStreamError::StreamIdOverflow => DriverError::BackendUnavailable {
            backend,
            detail: err.to_string(),
        },
        BuildStreamError::BackendSpecific { err } => DriverError::from_native_message(backend, err.description),
    }
}

fn map_play_error(backend: BackendKind, err: PlayStreamError) -> DriverError {
    match err {
        PlayStreamError::DeviceNotAvailable => DriverError::Disconnected {
            backend,
            detail: err.to_string(),
        },
        PlayStreamError::BackendSpecific { err } => DriverError::from_native_message(backend, err.description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::driver::{handler_cell, SilenceHandler};

    fn plan(input: Option<usize>, output: Option<usize>) -> SessionPlan {
        let stream = |channels: usize| StreamPlan {
            device_name: "test".into(),
            config: StreamConfig {
                channels: channels as u16,
                sample_rate: cpal::SampleRate(48000),
                buffer_size: cpal::BufferSize::Default,
            },
            format: SampleFormat::F32,
            ports: channels.min(2),
        };
        SessionPlan {
            backend: BackendKind::Alsa,
            device: None,
            output: output.map(stream),
            input: input.map(stream),
            period: 256,
            dither: DitherMode::None,
        }
    }

    struct Loopback;

    impl crate::audio::driver::ProcessHandler for Loopback {
        fn process(&mut self, capture: &PortBuffers, playback: &mut PortBuffers) {
            for ch in 0..playback.channels().min(capture.channels()) {
                playback.channel_mut(ch).copy_from_slice(capture.channel(ch));
            }
        }
    }

    #[test]
    fn test_render_pads_extra_device_channels() {
        let gate = Arc::new(CallbackGate::new());
        gate.open();
        let mut state = CycleState::new(&plan(Some(2), Some(4)), gate, handler_cell(Loopback));
        let (mut tx, rx) = RingBuffer::<f32>::new(64);
        state.capture_rx = Some(rx);
        tx.write(&[0.1, 0.2, 0.3, 0.4]);

        let mut data = [9.0f32; 12];
        state.render(&mut data, f32_out);
        assert_eq!(
            data,
            [0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_render_is_silent_when_gate_closed() {
        let gate = Arc::new(CallbackGate::new());
        let mut state = CycleState::new(&plan(None, Some(2)), gate, handler_cell(SilenceHandler));
        let mut data = [5i16; 8];
        state.render(&mut data, i16_out);
        assert_eq!(data, [0; 8]);
    }

    #[test]
    fn test_dropped_capture_updates_session_info() {
        let (notifier, _rx) = DriverNotifier::channel();
        let mut driver = CpalDriver {
            info: SessionInfo {
                backend: BackendKind::Alsa,
                device_name: "test".into(),
                sample_rate: 48000,
                period_size: 256,
                period_count: 2,
                duplex: DuplexMode::Full,
                requested_duplex: DuplexMode::Full,
                capture_channels: 2,
                playback_channels: 2,
            },
            plan: plan(Some(2), Some(2)),
            gate: Arc::new(CallbackGate::new()),
            notifier,
            streams: None,
        };

        driver.drop_capture();
        assert_eq!(driver.info().duplex, DuplexMode::PlaybackOnly);
        assert_eq!(driver.info().capture_channels, 0);
        assert!(driver.info().duplex_downgraded());
        assert!(driver.plan.input.is_none());
        assert!(driver.plan.output.is_some());
    }

    #[test]
    fn test_build_error_translation() {
        assert!(matches!(
            map_build_error(BackendKind::Alsa, BuildStreamError::StreamConfigNotSupported),
            DriverError::UnsupportedConfig { .. }
        ));
        assert!(matches!(
            map_build_error(BackendKind::Alsa, BuildStreamError::DeviceNotAvailable),
            DriverError::Disconnected { .. }
        ));
        let busy = BuildStreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "Device or resource busy".into(),
            },
        };
        assert!(matches!(map_build_error(BackendKind::Alsa, busy), DriverError::DeviceBusy { .. }));
    }
}
