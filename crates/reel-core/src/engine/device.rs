//! The audio device: one owner for the driver session, buses and streams
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ create/bind/attach ┌──────────────┐  SharedCell   ┌────────────────┐
//! │  App thread  │───────────────────►│ Bus registry │──────────────►│ DeviceProcessor│
//! │ (AudioDevice)│                    └──────────────┘   (BusTable)  │   (RT thread)  │
//! └──────┬───────┘                                                   └───────┬────────┘
//!        │ open/start/stop                                                   │ rtrb
//!        ▼                                                                   ▼
//! ┌──────────────┐   DriverNotice   ┌──────────────────┐   DeviceEvent   ┌────────────┐
//! │ SessionSlot  │─────────────────►│ audio-supervisor │────────────────►│  events()  │
//! │ (Mutex)      │◄── failover ─────│                  │                 └────────────┘
//! └──────────────┘                  └──────────────────┘                       ▲
//!                                   ┌──────────────────┐  SourceError /        │
//!                                   │     disk-io      │──RecordingFailed──────┘
//!                                   └──────────────────┘
//! ```
//!
//! The session mutex serializes open/close/start/stop and failover; the
//! realtime thread never touches it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::bus::{BusInfo, BusRegistry, MAX_BUS_CHANNELS};
use super::error::{DeviceError, DeviceResult, OpenAttempt};
use super::events::{DeviceEvent, RtEvent};
use super::processor::{DeviceProcessor, RT_EVENT_CAPACITY};
use super::storm::StormDetector;
use crate::audio::{
    handler_cell, BackendKind, Driver, DriverConfig, DriverError, DriverNotice, DriverNotifier, ErrorClass,
    HandlerCell, SessionInfo, SessionState, SilenceHandler,
};
use crate::codec::{SampleFormat, WriteSpec};
use crate::config::EngineConfig;
use crate::stream::{DiskIo, ReadSource, StreamError, TakeInfo, WriteSource};
use crate::types::{is_supported_rate, BusId, BusRole, SUPPORTED_SAMPLE_RATES};

/// How often the supervisor checks the realtime event queue
const SUPERVISOR_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of a successful [`AudioDevice::open`]
#[derive(Debug, Clone, PartialEq)]
pub struct OpenReport {
    /// Backends that failed before one opened, in order
    pub attempts: Vec<OpenAttempt>,
    /// Backend now serving the session
    pub active: BackendKind,
    pub info: SessionInfo,
}

impl OpenReport {
    /// A fallback (not the configured backend) is serving the session
    pub fn used_fallback(&self) -> bool {
        !self.attempts.is_empty()
    }
}

struct SessionSlot {
    driver: Option<Driver>,
    state: SessionState,
    config: DriverConfig,
    /// Running on the silent Null driver after a storm or disconnect
    degraded: bool,
}

struct DeviceShared {
    slot: Mutex<SessionSlot>,
    events: Sender<DeviceEvent>,
    notifier: DriverNotifier,
    processor: HandlerCell,
    silence: HandlerCell,
}

impl DeviceShared {
    fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        // A panic while holding the lock leaves the slot consistent enough to close
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    /// Replace the running session with the silent Null driver
    fn fail_over(&self, reason: String) {
        let mut slot = self.lock_slot();
        if slot.degraded || slot.state != SessionState::Running {
            return;
        }
        let Some(driver) = slot.driver.take() else {
            return;
        };
        let from = driver.backend();
        log::warn!("{} failing over to silent Null driver: {}", from, reason);
        driver.close();

        let config = slot.config.clone();
        let opened = Driver::open(BackendKind::Null, &config, self.notifier.clone())
            .and_then(|mut null| null.start(self.silence.clone()).map(|()| null));

        match opened {
            Ok(null) => {
                slot.driver = Some(null);
                slot.degraded = true;
                slot.state = SessionState::Running;
                self.emit(DeviceEvent::FailedOver { from, reason });
            }
            Err(e) => {
                log::error!("Failover to Null driver failed: {}", e);
                slot.state = SessionState::Failed;
            }
        }
    }
}

/// The engine's audio device
///
/// Owns the driver session, the bus registry, the disk thread and the
/// supervisor. Dropping it closes the session and finalizes open takes.
pub struct AudioDevice {
    shared: Arc<DeviceShared>,
    registry: Mutex<BusRegistry>,
    config: EngineConfig,
    disk: DiskIo,
    events_rx: Receiver<DeviceEvent>,
    stop_supervisor: Arc<AtomicBool>,
    supervisor: Option<JoinHandle<()>>,
}

impl AudioDevice {
    /// Create a device with no session open
    pub fn new(config: EngineConfig) -> DeviceResult<Self> {
        config.storm.validate().map_err(DeviceError::InvalidConfig)?;

        let (events, events_rx) = channel::unbounded();
        let (notifier, notices) = DriverNotifier::channel();
        let (rt_tx, rt_rx) = rtrb::RingBuffer::new(RT_EVENT_CAPACITY);

        let registry = BusRegistry::new();
        let processor = DeviceProcessor::new(registry.table(), rt_tx, config.storm.clone());

        let shared = Arc::new(DeviceShared {
            slot: Mutex::new(SessionSlot {
                driver: None,
                state: SessionState::Closed,
                config: config.driver.clone(),
                degraded: false,
            }),
            events: events.clone(),
            notifier,
            processor: handler_cell(processor),
            silence: handler_cell(SilenceHandler),
        });

        let disk = DiskIo::spawn(config.disk.poll_interval(), events)
            .map_err(|source| DeviceError::Spawn { name: "disk-io", source })?;

        let stop_supervisor = Arc::new(AtomicBool::new(false));
        let supervisor = {
            let shared = shared.clone();
            let stop = stop_supervisor.clone();
            thread::Builder::new()
                .name("audio-supervisor".to_string())
                .spawn(move || supervise(shared, rt_rx, notices, stop))
                .map_err(|source| DeviceError::Spawn {
                    name: "audio-supervisor",
                    source,
                })?
        };

        Ok(Self {
            shared,
            registry: Mutex::new(registry),
            config,
            disk,
            events_rx,
            stop_supervisor,
            supervisor: Some(supervisor),
        })
    }

    /// Receiver for device events. Clones share one queue.
    pub fn events(&self) -> Receiver<DeviceEvent> {
        self.events_rx.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Open a session, trying the configured backend then each fallback
    ///
    /// A configuration error (unsupported rate, unknown device) stops the
    /// search at once and leaves the session Closed. If every backend fails,
    /// the session is Failed when any failure was a runtime one and Closed
    /// otherwise.
    pub fn open(&self, config: DriverConfig) -> DeviceResult<OpenReport> {
        let mut slot = self.shared.lock_slot();
        if slot.state == SessionState::Running {
            return Err(DeviceError::Busy);
        }
        if let Some(driver) = slot.driver.take() {
            driver.close();
        }
        slot.state = SessionState::Closed;
        slot.degraded = false;

        validate(&config)?;
        slot.config = config.clone();
        slot.state = SessionState::Opening;

        let mut attempts = Vec::new();
        for backend in config.candidates() {
            match Driver::open(backend, &config, self.shared.notifier.clone()) {
                Ok(driver) => {
                    let info = driver.info().clone();
                    self.shared.emit(DeviceEvent::DriverOpened {
                        backend,
                        device: info.device_name.clone(),
                    });
                    if info.duplex_downgraded() {
                        self.shared.emit(DeviceEvent::DuplexDowngraded {
                            backend,
                            detail: "capture could not be opened".to_string(),
                        });
                    }
                    if !attempts.is_empty() {
                        log::warn!("Using fallback backend {} after {} failed", backend, attempts.len());
                    }

                    slot.driver = Some(driver);
                    slot.state = SessionState::Open;
                    return Ok(OpenReport {
                        attempts,
                        active: backend,
                        info,
                    });
                }
                Err(error) => {
                    log::warn!("{}", error);
                    self.shared.emit(DeviceEvent::DriverOpenFailed {
                        backend,
                        error: error.clone(),
                    });
                    if error.class() == ErrorClass::Configuration {
                        slot.state = SessionState::Closed;
                        return Err(DeviceError::Driver(error));
                    }
                    attempts.push(OpenAttempt { backend, error });
                }
            }
        }

        let runtime = attempts.iter().any(|a| a.error.class() == ErrorClass::Runtime);
        slot.state = if runtime {
            SessionState::Failed
        } else {
            SessionState::Closed
        };
        Err(DeviceError::AllBackendsFailed { attempts })
    }

    /// Open with the driver section of the engine config
    pub fn open_default(&self) -> DeviceResult<OpenReport> {
        self.open(self.config.driver.clone())
    }

    /// Begin processing buses
    pub fn start(&self) -> DeviceResult<()> {
        let mut guard = self.shared.lock_slot();
        let slot = &mut *guard;
        match slot.state {
            SessionState::Running => return Ok(()),
            SessionState::Open => {}
            _ => return Err(DeviceError::NotOpen),
        }

        let handler = if slot.degraded {
            self.shared.silence.clone()
        } else {
            self.shared.processor.clone()
        };
        let Some(driver) = slot.driver.as_mut() else {
            return Err(DeviceError::NotOpen);
        };

        // No driver is running, so the handler is free
        handler.borrow_mut_blocking().prepare(driver.info());

        if let Err(e) = driver.start(handler) {
            if e.class() == ErrorClass::Runtime {
                slot.state = SessionState::Failed;
            }
            return Err(e.into());
        }
        log::info!("{} session running", driver.backend());
        slot.state = SessionState::Running;
        Ok(())
    }

    /// Stop processing. No callback is in flight when this returns.
    pub fn stop(&self) {
        let mut slot = self.shared.lock_slot();
        if slot.state != SessionState::Running {
            return;
        }
        if let Some(driver) = slot.driver.as_mut() {
            driver.stop();
        }
        slot.state = SessionState::Open;
    }

    /// Stop and release the device
    pub fn close(&self) {
        let mut slot = self.shared.lock_slot();
        if let Some(driver) = slot.driver.take() {
            driver.close();
        }
        slot.state = SessionState::Closed;
        slot.degraded = false;
    }

    /// Replace the session configuration. Rejected while running.
    pub fn reconfigure(&self, config: DriverConfig) -> DeviceResult<OpenReport> {
        if self.state() == SessionState::Running {
            return Err(DeviceError::Busy);
        }
        self.open(config)
    }

    /// Change the sample rate. Rejected while running; reopens an open session.
    pub fn set_sample_rate(&self, rate: u32) -> DeviceResult<()> {
        let (state, config) = {
            let slot = self.shared.lock_slot();
            (slot.state, slot.config.clone().with_sample_rate(rate))
        };
        match state {
            SessionState::Running => Err(DeviceError::Busy),
            SessionState::Open => self.open(config).map(|_| ()),
            _ => {
                validate(&config)?;
                self.shared.lock_slot().config = config;
                Ok(())
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_slot().state
    }

    /// What the current session opened, if any
    pub fn session(&self) -> Option<SessionInfo> {
        self.shared.lock_slot().driver.as_ref().map(|d| d.info().clone())
    }

    /// Running on the silent Null driver after a failover
    pub fn is_degraded(&self) -> bool {
        self.shared.lock_slot().degraded
    }

    /// Rate new sources and takes must use
    fn session_rate(&self) -> u32 {
        let slot = self.shared.lock_slot();
        slot.driver
            .as_ref()
            .map(|d| d.info().sample_rate)
            .unwrap_or(slot.config.sample_rate)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Buses
    // ═══════════════════════════════════════════════════════════════════════

    fn registry(&self) -> MutexGuard<'_, BusRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_bus(&self, name: &str, role: BusRole, channels: usize) -> DeviceResult<BusId> {
        if channels == 0 || channels > MAX_BUS_CHANNELS {
            return Err(DeviceError::InvalidConfig(format!(
                "bus '{}' needs 1..={} channels, got {}",
                name, MAX_BUS_CHANNELS, channels
            )));
        }
        let storm = StormDetector::new(
            self.config.storm.threshold,
            self.config.storm.window_secs,
            self.session_rate(),
        );
        let id = self.registry().create(name, role, channels, storm);
        log::debug!("Created {:?} {} '{}' ({} ch)", role, id, name, channels);
        Ok(id)
    }

    /// Remove a bus, stopping its source and finalizing its take
    pub fn destroy_bus(&self, id: BusId) -> DeviceResult<Option<TakeInfo>> {
        let (role, recording) = {
            let mut registry = self.registry();
            let recording = registry.is_recording(id);
            let role = registry.remove(id).ok_or(DeviceError::UnknownBus(id))?;
            (role, recording)
        };
        match role {
            BusRole::Playback => {
                self.disk.remove_reader(id)?;
                Ok(None)
            }
            BusRole::Capture if recording => Ok(Some(self.disk.finish_writer(id)?)),
            BusRole::Capture => Ok(None),
        }
    }

    /// Route a bus to hardware channels (capture inputs or playback outputs)
    pub fn bind_bus(&self, id: BusId, ports: Vec<usize>) -> DeviceResult<()> {
        let mut registry = self.registry();
        let role = registry.role(id).ok_or(DeviceError::UnknownBus(id))?;

        if let Some(info) = self.session() {
            let available = match role {
                BusRole::Capture => info.capture_channels,
                BusRole::Playback => info.playback_channels,
            };
            if let Some(&port) = ports.iter().find(|p| **p >= available) {
                return Err(DeviceError::InvalidPort { bus: id, port, available });
            }
        }
        registry.set_ports(id, ports);
        Ok(())
    }

    /// Attach a playback source, prefilled before it becomes audible
    pub fn attach_playback(&self, id: BusId, mut source: ReadSource) -> DeviceResult<()> {
        let channels = self.expect_role(id, BusRole::Playback)?;
        if source.channels() != channels {
            return Err(DeviceError::ChannelMismatch {
                bus: id,
                expected: channels,
                found: source.channels(),
            });
        }
        let rate = self.session_rate();
        if source.sample_rate() != rate {
            return Err(StreamError::RateMismatch {
                name: source.name().to_string(),
                file_rate: source.sample_rate(),
                session_rate: rate,
            }
            .into());
        }

        source.prefill()?;
        self.registry().set_playback(
            id,
            Some((source.stream(), source.seek_handle(), source.name().to_string())),
        );
        self.disk.add_reader(id, source)?;
        Ok(())
    }

    /// Open `path` at the session rate and attach it
    pub fn attach_file(&self, id: BusId, path: &Path) -> DeviceResult<()> {
        let source = ReadSource::open(path, self.config.disk.prebuffer_secs, self.session_rate())?;
        self.attach_playback(id, source)
    }

    /// Stop playback on a bus
    pub fn detach_playback(&self, id: BusId) -> DeviceResult<()> {
        self.expect_role(id, BusRole::Playback)?;
        self.registry().set_playback(id, None);
        self.disk.remove_reader(id)?;
        Ok(())
    }

    /// Reposition a playback bus. Output is silent until the new position is buffered.
    pub fn seek(&self, id: BusId, frame: u64) -> DeviceResult<()> {
        self.expect_role(id, BusRole::Playback)?;
        match self.registry().seek_handle(id) {
            Some(handle) => {
                handle.seek(frame);
                Ok(())
            }
            None => Err(DeviceError::InvalidConfig(format!("{} has no source attached", id))),
        }
    }

    /// Start recording a capture bus to `path`
    ///
    /// The file is created here, so an unwritable destination fails now
    /// rather than after audio has been lost.
    pub fn arm_capture(&self, id: BusId, path: &Path, format: SampleFormat) -> DeviceResult<()> {
        let channels = self.expect_role(id, BusRole::Capture)?;
        if self.registry().is_recording(id) {
            return Err(DeviceError::AlreadyRecording(id));
        }

        let spec = WriteSpec {
            channels: channels as u16,
            sample_rate: self.session_rate(),
            format,
            dither: self.config.recording.dither,
        };
        let source = WriteSource::create(path, spec, self.config.disk.capture_buffer_secs)?;
        let stream = source.stream();
        self.disk.add_writer(id, source)?;
        self.registry().set_capture(id, Some((stream, path.to_path_buf())));
        log::info!("{} recording to {}", id, path.display());
        Ok(())
    }

    /// Arm with the configured format, naming the take after the bus
    pub fn arm_capture_default(&self, id: BusId) -> DeviceResult<PathBuf> {
        let dir = self.config.recording.takes_dir();
        let name = self
            .registry()
            .info(id)
            .map(|b| b.name)
            .ok_or(DeviceError::UnknownBus(id))?;
        let path = dir.join(format!("{}-{}.wav", name, id.0));
        self.arm_capture(id, &path, self.config.recording.format)?;
        Ok(path)
    }

    /// Stop recording and finalize the take
    pub fn disarm_capture(&self, id: BusId) -> DeviceResult<TakeInfo> {
        self.expect_role(id, BusRole::Capture)?;
        self.registry().set_capture(id, None);
        Ok(self.disk.finish_writer(id)?)
    }

    pub fn underruns(&self, id: BusId) -> DeviceResult<u64> {
        self.registry().underruns(id).ok_or(DeviceError::UnknownBus(id))
    }

    pub fn bus(&self, id: BusId) -> DeviceResult<BusInfo> {
        self.registry().info(id).ok_or(DeviceError::UnknownBus(id))
    }

    pub fn buses(&self) -> Vec<BusInfo> {
        let registry = self.registry();
        registry.ids().into_iter().filter_map(|id| registry.info(id)).collect()
    }

    /// Channel count of `id`, if it has `role`
    fn expect_role(&self, id: BusId, role: BusRole) -> DeviceResult<usize> {
        let registry = self.registry();
        let actual = registry.role(id).ok_or(DeviceError::UnknownBus(id))?;
        if actual != role {
            return Err(DeviceError::WrongRole {
                bus: id,
                expected: role,
                actual,
            });
        }
        Ok(registry.channels(id).unwrap_or(0))
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.close();
        self.stop_supervisor.store(true, Ordering::Release);
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }
}

fn validate(config: &DriverConfig) -> DeviceResult<()> {
    if !is_supported_rate(config.sample_rate) {
        return Err(DriverError::UnsupportedConfig {
            backend: config.backend,
            detail: format!("{}Hz is not one of {:?}", config.sample_rate, SUPPORTED_SAMPLE_RATES),
        }
        .into());
    }
    let channels = if config.duplex.has_capture() {
        config.capture_channels
    } else {
        0
    } + if config.duplex.has_playback() {
        config.playback_channels
    } else {
        0
    };
    if channels == 0 {
        return Err(DeviceError::InvalidConfig(format!(
            "{:?} session with no channels",
            config.duplex
        )));
    }
    Ok(())
}

/// Supervisor thread body: forward diagnostics, fail over on storms and disconnects
fn supervise(
    shared: Arc<DeviceShared>,
    mut rt_events: rtrb::Consumer<RtEvent>,
    notices: Receiver<DriverNotice>,
    stop: Arc<AtomicBool>,
) {
    log::debug!("Audio supervisor started");
    while !stop.load(Ordering::Acquire) {
        match notices.recv_timeout(SUPERVISOR_INTERVAL) {
            Ok(notice) => handle_notice(&shared, notice),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(SUPERVISOR_INTERVAL),
        }

        while let Ok(event) = rt_events.pop() {
            match event {
                RtEvent::Underrun { bus, count } => shared.emit(DeviceEvent::Underrun { bus, count }),
                RtEvent::Storm { bus } => {
                    log::warn!("{}: underrun storm", bus);
                    shared.emit(DeviceEvent::StormDetected { bus });
                    shared.fail_over(format!("underrun storm on {}", bus));
                }
            }
        }
    }
    log::debug!("Audio supervisor stopped");
}

fn handle_notice(shared: &DeviceShared, notice: DriverNotice) {
    match notice {
        DriverNotice::Disconnected { backend, detail } => {
            log::error!("{} disconnected: {}", backend, detail);
            shared.emit(DeviceEvent::Disconnected {
                backend,
                detail: detail.clone(),
            });
            shared.fail_over(format!("device disconnected: {}", detail));
        }
        DriverNotice::Xrun { backend } => shared.emit(DeviceEvent::Xrun { backend }),
        DriverNotice::DuplexDowngraded { backend, detail } => {
            shared.emit(DeviceEvent::DuplexDowngraded { backend, detail })
        }
        DriverNotice::StreamError { backend, detail } => log::warn!("{} stream error: {}", backend, detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MemoryReader;
    use crate::config::{DiskConfig, StormConfig};
    use std::time::Instant;
    use tempfile::TempDir;

    fn null_config() -> EngineConfig {
        EngineConfig {
            driver: DriverConfig::null().with_period_size(256),
            disk: DiskConfig {
                poll_interval_ms: 1,
                ..Default::default()
            },
            storm: StormConfig::default(),
            ..Default::default()
        }
    }

    fn wait_for_event(rx: &Receiver<DeviceEvent>, mut pred: impl FnMut(&DeviceEvent) -> bool) -> Vec<DeviceEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(10)) {
                let done = pred(&event);
                seen.push(event);
                if done {
                    break;
                }
            }
        }
        seen
    }

    #[test]
    fn test_invalid_storm_settings_rejected() {
        let mut config = null_config();
        config.storm.threshold = 100;
        assert!(matches!(AudioDevice::new(config), Err(DeviceError::InvalidConfig(_))));

        let mut config = null_config();
        config.storm.window_secs = f32::NAN;
        assert!(matches!(AudioDevice::new(config), Err(DeviceError::InvalidConfig(_))));
    }

    #[test]
    fn test_unsupported_rate_leaves_session_closed() {
        let device = AudioDevice::new(null_config()).unwrap();
        let err = device.open(DriverConfig::null().with_sample_rate(192000)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(device.state(), SessionState::Closed);
        assert!(device.session().is_none());
    }

    #[test]
    fn test_lifecycle_and_reconfigure_rules() {
        let device = AudioDevice::new(null_config()).unwrap();
        assert!(matches!(device.start(), Err(DeviceError::NotOpen)));

        device.open_default().unwrap();
        assert_eq!(device.state(), SessionState::Open);
        device.start().unwrap();
        assert_eq!(device.state(), SessionState::Running);

        assert!(matches!(device.set_sample_rate(44100), Err(DeviceError::Busy)));
        assert!(matches!(
            device.reconfigure(DriverConfig::null().with_sample_rate(44100)),
            Err(DeviceError::Busy)
        ));
        assert_eq!(device.session().unwrap().sample_rate, 48000);

        device.stop();
        assert_eq!(device.state(), SessionState::Open);
        device.set_sample_rate(44100).unwrap();
        assert_eq!(device.session().unwrap().sample_rate, 44100);

        device.close();
        assert_eq!(device.state(), SessionState::Closed);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_fallback_is_recorded() {
        let device = AudioDevice::new(null_config()).unwrap();
        let events = device.events();
        let config = DriverConfig::null()
            .with_backend(BackendKind::Asio)
            .with_fallbacks(vec![BackendKind::Null]);

        let report = device.open(config).unwrap();
        assert_eq!(report.active, BackendKind::Null);
        assert!(report.used_fallback());
        assert_eq!(report.attempts[0].backend, BackendKind::Asio);
        assert!(matches!(report.attempts[0].error, DriverError::BackendUnavailable { .. }));

        let seen = wait_for_event(&events, |e| matches!(e, DeviceEvent::DriverOpened { .. }));
        assert!(matches!(seen[0], DeviceEvent::DriverOpenFailed { backend: BackendKind::Asio, .. }));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_all_runtime_failures_mark_session_failed() {
        let device = AudioDevice::new(null_config()).unwrap();
        let config = DriverConfig::null().with_backend(BackendKind::Asio);
        let err = device.open(config).unwrap_err();
        assert!(matches!(err, DeviceError::AllBackendsFailed { .. }));
        assert_eq!(device.state(), SessionState::Failed);
    }

    #[test]
    fn test_starved_bus_triggers_single_storm_and_failover() {
        let device = AudioDevice::new(null_config()).unwrap();
        let events = device.events();
        device.open_default().unwrap();

        // Playback source that is never filled: the disk thread only services attached sources
        let bus = device.create_bus("starved", BusRole::Playback, 1).unwrap();
        device.bind_bus(bus, vec![0]).unwrap();
        let reader = MemoryReader::new(vec![0.0; 10], 1, 48000).unwrap();
        let source = ReadSource::new("starved", Box::new(reader), 1.0, 48000).unwrap();
        device
            .registry()
            .set_playback(bus, Some((source.stream(), source.seek_handle(), "starved".into())));

        device.start().unwrap();
        let seen = wait_for_event(&events, |e| matches!(e, DeviceEvent::FailedOver { .. }));

        let storms = seen
            .iter()
            .filter(|e| matches!(e, DeviceEvent::StormDetected { .. }))
            .count();
        assert_eq!(storms, 1);
        assert!(matches!(seen.last(), Some(DeviceEvent::FailedOver { .. })));
        assert!(device.is_degraded());
        assert_eq!(device.state(), SessionState::Running);
        assert!(device.underruns(bus).unwrap() >= 5);

        // Silent failover: the bus is no longer processed
        thread::sleep(Duration::from_millis(50));
        let frozen = device.underruns(bus).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(device.underruns(bus).unwrap(), frozen);
        drop(source);
    }

    #[test]
    fn test_playback_and_capture_buses() {
        let temp = TempDir::new().unwrap();
        let device = AudioDevice::new(null_config()).unwrap();
        device.open_default().unwrap();

        let play = device.create_bus("tone", BusRole::Playback, 2).unwrap();
        device.bind_bus(play, vec![0, 1]).unwrap();
        assert!(matches!(
            device.bind_bus(play, vec![5]),
            Err(DeviceError::InvalidPort { port: 5, .. })
        ));

        let mono = ReadSource::new("mono", Box::new(MemoryReader::sine(440.0, 0.5, 1.0, 48000, 1)), 1.0, 48000)
            .unwrap();
        assert!(matches!(
            device.attach_playback(play, mono),
            Err(DeviceError::ChannelMismatch { expected: 2, found: 1, .. })
        ));
        let stereo =
            ReadSource::new("stereo", Box::new(MemoryReader::sine(440.0, 0.5, 1.0, 48000, 2)), 1.0, 48000).unwrap();
        device.attach_playback(play, stereo).unwrap();
        assert_eq!(device.bus(play).unwrap().source.as_deref(), Some("stereo"));

        let rec = device.create_bus("mic", BusRole::Capture, 1).unwrap();
        device.bind_bus(rec, vec![0]).unwrap();
        let missing = temp.path().join("missing").join("mic.wav");
        assert!(device.arm_capture(rec, &missing, SampleFormat::Int16).is_err());

        let path = temp.path().join("mic.wav");
        device.arm_capture(rec, &path, SampleFormat::Int16).unwrap();
        assert!(matches!(
            device.arm_capture(rec, &path, SampleFormat::Int16),
            Err(DeviceError::AlreadyRecording(_))
        ));
        assert!(matches!(device.seek(rec, 0), Err(DeviceError::WrongRole { .. })));

        device.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        device.seek(play, 1000).unwrap();
        device.stop();

        let take = device.disarm_capture(rec).unwrap();
        assert!(take.frames > 0);
        assert_eq!(take.path, path);
        assert_eq!(hound::WavReader::open(&path).unwrap().spec().bits_per_sample, 16);
        assert_eq!(device.underruns(rec).unwrap(), 0);

        assert_eq!(device.destroy_bus(play).unwrap(), None);
        assert!(matches!(device.underruns(play), Err(DeviceError::UnknownBus(_))));
    }
}
