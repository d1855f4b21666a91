//! Uniform driver contract over every backend
//!
//! A [`Driver`] is a closed set of backend variants behind one small
//! interface: `open` negotiates a session, `start` begins invoking a
//! [`ProcessHandler`] once per period on the backend's realtime thread, `stop`
//! halts invocation synchronously and `close` releases the device.
//!
//! # Stop guarantee
//!
//! Every backend routes its callback through a shared [`CallbackGate`]. The
//! gate counts callbacks in flight; `stop` closes it and waits for the count
//! to reach zero, so once `stop` returns no callback is running and none will
//! begin.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, TrySendError};

use super::config::{BackendKind, DriverConfig, DuplexMode};
use super::cpal_driver::CpalDriver;
use super::error::{DriverError, DriverResult};
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
use super::jack_driver::JackDriver;
use super::null_driver::NullDriver;
use crate::ring::RtCell;
use crate::types::{is_supported_rate, PortBuffers, SUPPORTED_SAMPLE_RATES};

/// Capacity of the driver notice channel
const NOTICE_CAPACITY: usize = 64;

/// Lifecycle of a driver session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Running,
    Failed,
}

/// Periodic callback invoked by the active driver
///
/// Runs on the realtime thread: implementations must not allocate, lock,
/// log or touch files.
pub trait ProcessHandler: Send {
    /// Consume one period of `capture` input and fill `playback`
    fn process(&mut self, capture: &PortBuffers, playback: &mut PortBuffers);

    /// Session geometry changed. Only called while no driver is running.
    fn prepare(&mut self, _info: &SessionInfo) {}
}

/// Handler shared between the owner and the backend callback
///
/// The callback claims the cell without waiting; if the owner holds it, that
/// period is rendered as silence.
pub type HandlerCell = Arc<RtCell<Box<dyn ProcessHandler>>>;

/// Wrap a handler for [`Driver::start`]
pub fn handler_cell(handler: impl ProcessHandler + 'static) -> HandlerCell {
    Arc::new(RtCell::new(Box::new(handler)))
}

/// Handler that outputs silence and ignores capture
pub struct SilenceHandler;

impl ProcessHandler for SilenceHandler {
    fn process(&mut self, _capture: &PortBuffers, playback: &mut PortBuffers) {
        playback.silence();
    }
}

/// What a driver actually opened
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub backend: BackendKind,
    pub device_name: String,
    pub sample_rate: u32,
    pub period_size: u32,
    pub period_count: u32,
    /// Duplex mode in effect (may be narrower than requested)
    pub duplex: DuplexMode,
    /// Duplex mode the config asked for
    pub requested_duplex: DuplexMode,
    pub capture_channels: usize,
    pub playback_channels: usize,
}

impl SessionInfo {
    /// Full duplex was requested but capture could not be opened
    pub fn duplex_downgraded(&self) -> bool {
        self.duplex != self.requested_duplex
    }

    /// Period length in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.period_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Callback gate
// ═══════════════════════════════════════════════════════════════════════════

/// Admission control for backend callbacks
#[derive(Debug, Default)]
pub struct CallbackGate {
    open: AtomicBool,
    active: AtomicUsize,
    cycles: AtomicU64,
}

/// Held by a callback while it runs
pub struct GateGuard<'a> {
    gate: &'a CallbackGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.cycles.fetch_add(1, Ordering::Relaxed);
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CallbackGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a callback, or `None` once the gate is closed
    pub fn enter(&self) -> Option<GateGuard<'_>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        if !self.open.load(Ordering::SeqCst) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(GateGuard { gate: self })
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Refuse new callbacks and wait for in-flight ones to finish
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        while self.active.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Completed callbacks since the gate was created
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

/// Run one period through the gate and the handler
///
/// Returns false when the gate refused the callback; playback is silenced in
/// that case and when the handler is claimed elsewhere.
pub(crate) fn run_cycle(
    gate: &CallbackGate,
    handler: &HandlerCell,
    capture: &PortBuffers,
    playback: &mut PortBuffers,
) -> bool {
    let Some(_guard) = gate.enter() else {
        playback.silence();
        return false;
    };
    match handler.try_borrow_mut() {
        Some(mut handler) => handler.process(capture, playback),
        None => playback.silence(),
    }
    true
}

// ═══════════════════════════════════════════════════════════════════════════
// Notices
// ═══════════════════════════════════════════════════════════════════════════

/// Asynchronous conditions reported by a backend outside the process callback
#[derive(Debug, Clone, PartialEq)]
pub enum DriverNotice {
    /// Device or server went away
    Disconnected { backend: BackendKind, detail: String },
    /// Backend-reported xrun
    Xrun { backend: BackendKind },
    /// Capture could not be started; running playback-only
    DuplexDowngraded { backend: BackendKind, detail: String },
    /// Non-fatal stream error
    StreamError { backend: BackendKind, detail: String },
}

/// Sending side of the notice channel, handed to backends
///
/// Never blocks: when the channel is full the notice is dropped.
#[derive(Debug, Clone)]
pub struct DriverNotifier {
    tx: Sender<DriverNotice>,
}

impl DriverNotifier {
    pub fn channel() -> (DriverNotifier, Receiver<DriverNotice>) {
        let (tx, rx) = crossbeam::channel::bounded(NOTICE_CAPACITY);
        (DriverNotifier { tx }, rx)
    }

    pub fn notify(&self, notice: DriverNotice) {
        match self.tx.try_send(notice) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════════

/// Active driver session
pub enum Driver {
    Null(NullDriver),
    Cpal(CpalDriver),
    #[cfg(all(target_os = "linux", feature = "jack-backend"))]
    Jack(JackDriver),
}

impl Driver {
    /// Open a session on `backend` with `config`
    ///
    /// Rates outside [`SUPPORTED_SAMPLE_RATES`] are rejected before any
    /// backend is touched.
    pub fn open(backend: BackendKind, config: &DriverConfig, notifier: DriverNotifier) -> DriverResult<Driver> {
        if !is_supported_rate(config.sample_rate) {
            return Err(DriverError::UnsupportedConfig {
                backend,
                detail: format!(
                    "{}Hz is not one of {:?}",
                    config.sample_rate, SUPPORTED_SAMPLE_RATES
                ),
            });
        }

        match backend {
            BackendKind::Null => Ok(Driver::Null(NullDriver::open(config))),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            BackendKind::Jack => JackDriver::open(config, notifier).map(Driver::Jack),
            _ => CpalDriver::open(backend, config, notifier).map(Driver::Cpal),
        }
    }

    pub fn info(&self) -> &SessionInfo {
        match self {
            Driver::Null(d) => d.info(),
            Driver::Cpal(d) => d.info(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Driver::Jack(d) => d.info(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.info().backend
    }

    /// Begin invoking `handler` once per period
    pub fn start(&mut self, handler: HandlerCell) -> DriverResult<()> {
        match self {
            Driver::Null(d) => d.start(handler),
            Driver::Cpal(d) => d.start(handler),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Driver::Jack(d) => d.start(handler),
        }
    }

    /// Halt invocation; no callback is in flight when this returns
    pub fn stop(&mut self) {
        match self {
            Driver::Null(d) => d.stop(),
            Driver::Cpal(d) => d.stop(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Driver::Jack(d) => d.stop(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.gate().is_open()
    }

    pub fn gate(&self) -> &Arc<CallbackGate> {
        match self {
            Driver::Null(d) => d.gate(),
            Driver::Cpal(d) => d.gate(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Driver::Jack(d) => d.gate(),
        }
    }

    /// Release the device, stopping first if needed
    pub fn close(mut self) {
        self.stop();
        log::info!("{} driver closed", self.backend());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_gate_refuses_after_close() {
        let gate = CallbackGate::new();
        assert!(gate.enter().is_none());
        gate.open();
        {
            let _guard = gate.enter().unwrap();
        }
        assert_eq!(gate.cycles(), 1);
        gate.close();
        assert!(gate.enter().is_none());
        assert_eq!(gate.cycles(), 1);
    }

    #[test]
    fn test_gate_close_waits_for_in_flight_callback() {
        let gate = Arc::new(CallbackGate::new());
        gate.open();

        let worker_gate = gate.clone();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let worker = thread::spawn(move || {
            let _guard = worker_gate.enter().unwrap();
            entered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        });

        entered_rx.recv().unwrap();
        gate.close();
        // close returned, so the callback has finished
        assert_eq!(gate.cycles(), 1);
        worker.join().unwrap();
    }

    #[test]
    fn test_unsupported_rate_rejected_before_backend() {
        let (notifier, _rx) = DriverNotifier::channel();
        let config = DriverConfig::null().with_sample_rate(192000);
        let err = Driver::open(BackendKind::Null, &config, notifier).err().unwrap();
        assert!(matches!(err, DriverError::UnsupportedConfig { .. }));
    }

    #[test]
    fn test_run_cycle_silences_when_handler_claimed() {
        struct Ones;
        impl ProcessHandler for Ones {
            fn process(&mut self, _capture: &PortBuffers, playback: &mut PortBuffers) {
                for ch in 0..playback.channels() {
                    playback.channel_mut(ch).fill(1.0);
                }
            }
        }

        let gate = CallbackGate::new();
        gate.open();
        let handler = handler_cell(Ones);
        let capture = PortBuffers::new(1, 8);
        let mut playback = PortBuffers::new(1, 8);
        playback.set_frames(4);

        assert!(run_cycle(&gate, &handler, &capture, &mut playback));
        assert_eq!(playback.channel(0), &[1.0; 4]);

        let _claim = handler.try_borrow_mut().unwrap();
        assert!(run_cycle(&gate, &handler, &capture, &mut playback));
        assert_eq!(playback.channel(0), &[0.0; 4]);
    }
}
