//! Null backend: no hardware, a timer thread drives the callback
//!
//! Capture buffers are always silent and playback is discarded. Used as the
//! last-resort fallback, as the failover target after a storm or disconnect,
//! and to exercise the engine in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::config::{BackendKind, DriverConfig};
use super::driver::{run_cycle, CallbackGate, HandlerCell, SessionInfo};
use super::error::{DriverError, DriverResult};
use crate::types::{PortBuffers, MAX_PERIOD_FRAMES};

pub struct NullDriver {
    info: SessionInfo,
    gate: Arc<CallbackGate>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullDriver {
    pub fn open(config: &DriverConfig) -> Self {
        let info = SessionInfo {
            backend: BackendKind::Null,
            device_name: "null".to_string(),
            sample_rate: config.sample_rate,
            period_size: config.clamped_period() as u32,
            period_count: config.period_count,
            duplex: config.duplex,
            requested_duplex: config.duplex,
            capture_channels: if config.duplex.has_capture() {
                config.capture_channels as usize
            } else {
                0
            },
            playback_channels: if config.duplex.has_playback() {
                config.playback_channels as usize
            } else {
                0
            },
        };
        log::info!(
            "Null driver opened ({}Hz, {} frames/period)",
            info.sample_rate,
            info.period_size
        );
        Self {
            info,
            gate: Arc::new(CallbackGate::new()),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn gate(&self) -> &Arc<CallbackGate> {
        &self.gate
    }

    pub fn start(&mut self, handler: HandlerCell) -> DriverResult<()> {
        if self.thread.is_some() {
            return Err(DriverError::InvalidState("null driver already running".into()));
        }

        let frames = self.info.period_size as usize;
        let period = Duration::from_secs_f64(frames as f64 / self.info.sample_rate as f64);
        let mut capture = PortBuffers::new(self.info.capture_channels, MAX_PERIOD_FRAMES);
        let mut playback = PortBuffers::new(self.info.playback_channels, MAX_PERIOD_FRAMES);
        capture.set_frames(frames);
        playback.set_frames(frames);

        self.gate.open();
        self.running.store(true, Ordering::Release);

        let gate = self.gate.clone();
        let running = self.running.clone();
        let thread = thread::Builder::new()
            .name("audio-null".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    run_cycle(&gate, &handler, &capture, &mut playback);

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        // Fell behind; don't try to catch up with a burst
                        next = now;
                    }
                }
            })
            .map_err(|e| DriverError::InvalidState(format!("failed to spawn null driver thread: {}", e)))?;

        self.thread = Some(thread);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.gate.close();
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for NullDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::driver::{handler_cell, ProcessHandler};
    use std::sync::atomic::AtomicU64;

    struct Counter {
        calls: Arc<AtomicU64>,
        frames_seen: Arc<AtomicU64>,
    }

    impl ProcessHandler for Counter {
        fn process(&mut self, capture: &PortBuffers, playback: &mut PortBuffers) {
            assert!(capture.channel(0).iter().all(|s| *s == 0.0));
            self.frames_seen.store(playback.frames() as u64, Ordering::Relaxed);
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_no_callbacks_after_stop() {
        let calls = Arc::new(AtomicU64::new(0));
        let frames_seen = Arc::new(AtomicU64::new(0));
        let config = DriverConfig::null().with_period_size(256);
        let mut driver = NullDriver::open(&config);
        driver
            .start(handler_cell(Counter {
                calls: calls.clone(),
                frames_seen: frames_seen.clone(),
            }))
            .unwrap();

        thread::sleep(Duration::from_millis(60));
        driver.stop();
        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        assert_eq!(frames_seen.load(Ordering::Relaxed), 256);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
        assert_eq!(driver.gate().cycles(), after_stop);
    }

    #[test]
    fn test_restart_after_stop() {
        let calls = Arc::new(AtomicU64::new(0));
        let config = DriverConfig::null();
        let mut driver = NullDriver::open(&config);
        let handler = handler_cell(Counter {
            calls: calls.clone(),
            frames_seen: Arc::new(AtomicU64::new(0)),
        });

        driver.start(handler.clone()).unwrap();
        assert!(driver.start(handler.clone()).is_err());
        driver.stop();
        let first = calls.load(Ordering::SeqCst);

        driver.start(handler).unwrap();
        thread::sleep(Duration::from_millis(40));
        driver.stop();
        assert!(calls.load(Ordering::SeqCst) > first);
    }
}
