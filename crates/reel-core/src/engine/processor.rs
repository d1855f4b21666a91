//! Realtime process step
//!
//! Per period:
//!
//! 1. zero the playback ports
//! 2. capture buses: interleave bound capture ports into scratch, push to the
//!    take's ring; frames that do not fit are dropped and counted
//! 3. playback buses: pull from the source ring, zero-fill a short read and
//!    count it, mix into the bound playback ports (mono feeds every port)
//!
//! A playback bus that is seeking outputs silence without counting an
//! underrun. Diagnostics leave through an rtrb queue; nothing here allocates,
//! waits on a lock or logs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use basedrop::SharedCell;

use super::bus::{BusTable, RtBus, MAX_BUS_CHANNELS};
use super::events::RtEvent;
use crate::audio::{ProcessHandler, SessionInfo};
use crate::config::StormConfig;
use crate::stream::ReadStatus;
use crate::types::{BusRole, PortBuffers, MAX_PERIOD_FRAMES};

/// Depth of the realtime event queue
pub(crate) const RT_EVENT_CAPACITY: usize = 1024;

pub(crate) struct DeviceProcessor {
    table: Arc<SharedCell<BusTable>>,
    scratch: Vec<f32>,
    events: rtrb::Producer<RtEvent>,
    storm: StormConfig,
    /// Session clock in frames
    clock: u64,
    /// At most one storm is reported per session
    storm_latched: bool,
}

impl DeviceProcessor {
    pub fn new(table: Arc<SharedCell<BusTable>>, events: rtrb::Producer<RtEvent>, storm: StormConfig) -> Self {
        Self {
            table,
            scratch: vec![0.0; MAX_PERIOD_FRAMES * MAX_BUS_CHANNELS],
            events,
            storm,
            clock: 0,
            storm_latched: false,
        }
    }

    fn underrun(&mut self, bus: &RtBus) {
        let count = bus.counters.underruns.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.events.push(RtEvent::Underrun { bus: bus.id, count });

        let storm = match bus.storm.try_borrow_mut() {
            Some(mut detector) => detector.record(self.clock),
            None => false,
        };
        if storm && !self.storm_latched {
            self.storm_latched = true;
            let _ = self.events.push(RtEvent::Storm { bus: bus.id });
        }
    }

    fn capture(&mut self, bus: &RtBus, capture: &PortBuffers, frames: usize) {
        let Some(cell) = bus.capture.as_ref() else {
            return;
        };
        let Some(mut stream) = cell.try_borrow_mut() else {
            return;
        };
        if stream.is_failed() {
            return;
        }

        let channels = bus.channels;
        let scratch = &mut self.scratch[..frames * channels];
        for c in 0..channels {
            match bus.ports.get(c).filter(|p| **p < capture.channels()) {
                Some(&port) => {
                    // A short capture period leaves the tail silent
                    let input = capture.channel(port);
                    for i in 0..frames {
                        scratch[i * channels + c] = input.get(i).copied().unwrap_or(0.0);
                    }
                }
                None => {
                    for i in 0..frames {
                        scratch[i * channels + c] = 0.0;
                    }
                }
            }
        }

        let written = stream.write(scratch);
        drop(stream);
        if written < frames {
            self.underrun(bus);
        }
    }

    fn playback(&mut self, bus: &RtBus, playback: &mut PortBuffers, frames: usize) {
        let Some(cell) = bus.playback.as_ref() else {
            return;
        };
        let Some(mut stream) = cell.try_borrow_mut() else {
            return;
        };

        let channels = bus.channels;
        let scratch = &mut self.scratch[..frames * channels];
        let result = stream.read(scratch);
        drop(stream);
        scratch[result.frames * channels..].fill(0.0);

        for (c, &port) in bus.ports.iter().enumerate() {
            if port >= playback.channels() {
                continue;
            }
            // Mono feeds every bound port; otherwise channel c goes to port c
            let src = if channels == 1 {
                0
            } else if c < channels {
                c
            } else {
                continue;
            };
            let out = playback.channel_mut(port);
            for (i, o) in out.iter_mut().take(frames).enumerate() {
                *o += scratch[i * channels + src];
            }
        }

        if result.status == ReadStatus::Streaming && result.frames < frames {
            self.underrun(bus);
        }
    }
}

impl ProcessHandler for DeviceProcessor {
    fn process(&mut self, capture: &PortBuffers, playback: &mut PortBuffers) {
        let frames = playback.frames().max(capture.frames()).min(MAX_PERIOD_FRAMES);
        playback.silence();

        let table = self.table.get();
        for bus in table.buses.iter() {
            match bus.role {
                BusRole::Capture => self.capture(bus, capture, frames),
                BusRole::Playback => self.playback(bus, playback, frames),
            }
        }

        self.clock += frames as u64;
    }

    fn prepare(&mut self, info: &SessionInfo) {
        self.clock = 0;
        self.storm_latched = false;
        for bus in self.table.get().buses.iter() {
            bus.storm
                .borrow_mut_blocking()
                .configure(self.storm.threshold, self.storm.window_secs, info.sample_rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BackendKind, DuplexMode};
    use crate::codec::MemoryReader;
    use crate::engine::bus::BusRegistry;
    use crate::engine::storm::StormDetector;
    use crate::stream::{ReadSource, WriteSource};
    use crate::types::BusId;

    fn info(rate: u32) -> SessionInfo {
        SessionInfo {
            backend: BackendKind::Null,
            device_name: "test".into(),
            sample_rate: rate,
            period_size: 4,
            period_count: 2,
            duplex: DuplexMode::Full,
            requested_duplex: DuplexMode::Full,
            capture_channels: 2,
            playback_channels: 2,
        }
    }

    fn setup(rate: u32) -> (BusRegistry, DeviceProcessor, rtrb::Consumer<RtEvent>) {
        let registry = BusRegistry::new();
        let (tx, rx) = rtrb::RingBuffer::new(RT_EVENT_CAPACITY);
        let mut processor = DeviceProcessor::new(registry.table(), tx, StormConfig::default());
        processor.prepare(&info(rate));
        (registry, processor, rx)
    }

    fn buffers(frames: usize) -> (PortBuffers, PortBuffers) {
        let mut capture = PortBuffers::new(2, MAX_PERIOD_FRAMES);
        let mut playback = PortBuffers::new(2, MAX_PERIOD_FRAMES);
        capture.set_frames(frames);
        playback.set_frames(frames);
        (capture, playback)
    }

    #[test]
    fn test_mono_playback_feeds_every_port() {
        let (mut registry, mut processor, _rx) = setup(1000);
        let id = registry.create("click", BusRole::Playback, 1, StormDetector::new(5, 2.0, 1000));
        registry.set_ports(id, vec![0, 1]);

        let reader = MemoryReader::new(vec![0.25; 100], 1, 1000).unwrap();
        let mut source = ReadSource::new("click", Box::new(reader), 1.0, 1000).unwrap();
        source.prefill().unwrap();
        registry.set_playback(id, Some((source.stream(), source.seek_handle(), "click".into())));

        let (capture, mut playback) = buffers(4);
        processor.process(&capture, &mut playback);
        assert_eq!(playback.channel(0), &[0.25; 4]);
        assert_eq!(playback.channel(1), &[0.25; 4]);
        assert_eq!(registry.underruns(id), Some(0));
    }

    #[test]
    fn test_empty_playback_counts_underrun() {
        let (mut registry, mut processor, mut rx) = setup(1000);
        let id = registry.create("empty", BusRole::Playback, 2, StormDetector::new(5, 2.0, 1000));
        registry.set_ports(id, vec![0, 1]);

        // Never filled: streaming but nothing buffered
        let reader = MemoryReader::new(vec![0.5; 200], 2, 1000).unwrap();
        let source = ReadSource::new("empty", Box::new(reader), 1.0, 1000).unwrap();
        registry.set_playback(id, Some((source.stream(), source.seek_handle(), "empty".into())));

        let (capture, mut playback) = buffers(4);
        processor.process(&capture, &mut playback);
        assert_eq!(playback.channel(0), &[0.0; 4]);
        assert_eq!(registry.underruns(id), Some(1));
        assert_eq!(rx.pop().ok(), Some(RtEvent::Underrun { bus: id, count: 1 }));
    }

    #[test]
    fn test_storm_reported_once_per_session() {
        let (mut registry, mut processor, mut rx) = setup(1000);
        let id = registry.create("empty", BusRole::Playback, 1, StormDetector::new(5, 2.0, 1000));
        let reader = MemoryReader::new(vec![0.0; 10], 1, 1000).unwrap();
        let source = ReadSource::new("empty", Box::new(reader), 1.0, 1000).unwrap();
        registry.set_playback(id, Some((source.stream(), source.seek_handle(), "empty".into())));

        let (capture, mut playback) = buffers(4);
        for _ in 0..20 {
            processor.process(&capture, &mut playback);
        }

        let mut storms = 0;
        let mut underruns = 0;
        while let Ok(event) = rx.pop() {
            match event {
                RtEvent::Storm { bus } => {
                    assert_eq!(bus, id);
                    storms += 1;
                }
                RtEvent::Underrun { .. } => underruns += 1,
            }
        }
        assert_eq!(storms, 1);
        assert_eq!(underruns, 20);
    }

    #[test]
    fn test_seeking_a_playing_bus_is_not_an_underrun() {
        let (mut registry, mut processor, mut rx) = setup(1000);
        let id = registry.create("ramp", BusRole::Playback, 1, StormDetector::new(5, 2.0, 1000));
        registry.set_ports(id, vec![0]);

        let samples = (0..5000).map(|i| i as f32).collect();
        let reader = MemoryReader::new(samples, 1, 1000).unwrap();
        let mut source = ReadSource::new("ramp", Box::new(reader), 1.0, 1000).unwrap();
        source.prefill().unwrap();
        registry.set_playback(id, Some((source.stream(), source.seek_handle(), "ramp".into())));

        let (capture, mut playback) = buffers(4);
        for round in 0..8u64 {
            processor.process(&capture, &mut playback);
            source.prefill().unwrap();
            source.seek(round * 500);
            // Disk side handles the seek while the ring is still full
            source.fill_step().unwrap();
            processor.process(&capture, &mut playback);
            assert_eq!(playback.channel(0), &[0.0; 4]);
            processor.process(&capture, &mut playback);
        }
        assert_eq!(registry.underruns(id), Some(0));

        source.prefill().unwrap();
        processor.process(&capture, &mut playback);
        assert_eq!(playback.channel(0), &[3500.0, 3501.0, 3502.0, 3503.0]);
        assert_eq!(registry.underruns(id), Some(0));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_short_capture_period_zero_fills_take() {
        use std::sync::Mutex;

        struct Recorder(Arc<Mutex<Vec<f32>>>);
        impl crate::codec::AudioFileWriter for Recorder {
            fn channels(&self) -> usize {
                1
            }
            fn write(&mut self, interleaved: &[f32]) -> crate::codec::CodecResult<()> {
                self.0.lock().unwrap().extend_from_slice(interleaved);
                Ok(())
            }
            fn finalize(self: Box<Self>) -> crate::codec::CodecResult<()> {
                Ok(())
            }
        }

        let (mut registry, mut processor, _rx) = setup(1000);
        let input = registry.create("in", BusRole::Capture, 1, StormDetector::new(5, 2.0, 1000));
        registry.set_ports(input, vec![0]);
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let mut take = WriteSource::with_writer("/takes/in.wav", Box::new(Recorder(recorded.clone())), 1000, 1.0);
        registry.set_capture(input, Some((take.stream(), take.path().to_path_buf())));

        // Leaves loud playback samples behind in the shared scratch
        let tone = registry.create("tone", BusRole::Playback, 1, StormDetector::new(5, 2.0, 1000));
        let reader = MemoryReader::new(vec![0.75; 100], 1, 1000).unwrap();
        let mut source = ReadSource::new("tone", Box::new(reader), 1.0, 1000).unwrap();
        source.prefill().unwrap();
        registry.set_playback(tone, Some((source.stream(), source.seek_handle(), "tone".into())));

        let (mut capture, mut playback) = buffers(4);
        capture.channel_mut(0).fill(0.1);
        processor.process(&capture, &mut playback);
        capture.set_frames(2);
        processor.process(&capture, &mut playback);

        while take.drain_step().unwrap() > 0 {}
        assert_eq!(*recorded.lock().unwrap(), vec![0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.0, 0.0]);
    }

    #[test]
    fn test_capture_overflow_drops_and_counts() {
        let (mut registry, mut processor, _rx) = setup(1000);
        let id = registry.create("in", BusRole::Capture, 1, StormDetector::new(5, 2.0, 1000));
        registry.set_ports(id, vec![1]);

        struct Sink;
        impl crate::codec::AudioFileWriter for Sink {
            fn channels(&self) -> usize {
                1
            }
            fn write(&mut self, _interleaved: &[f32]) -> crate::codec::CodecResult<()> {
                Ok(())
            }
            fn finalize(self: Box<Self>) -> crate::codec::CodecResult<()> {
                Ok(())
            }
        }
        // 8 frames of buffer, never drained
        let take = WriteSource::with_writer("/takes/in.wav", Box::new(Sink), 1000, 0.0078125);
        registry.set_capture(id, Some((take.stream(), take.path().to_path_buf())));

        let (mut capture, mut playback) = buffers(4);
        capture.channel_mut(1).copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);
        processor.process(&capture, &mut playback);
        processor.process(&capture, &mut playback);
        assert_eq!(registry.underruns(id), Some(0));
        processor.process(&capture, &mut playback);
        assert_eq!(registry.underruns(id), Some(1));
        assert_eq!(registry.underruns(BusId(999)), None);
    }
}
