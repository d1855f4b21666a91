//! Disk I/O thread
//!
//! One background thread services every registered source: it tops up the
//! prebuffer of each [`ReadSource`] and drains each [`WriteSource`] to its
//! encoder. Sources are handed over by command; after that the thread owns
//! them and the realtime side only sees their ring buffers.
//!
//! Errors never reach the realtime thread. They are scoped to the bus that
//! owns the source and reported as [`DeviceEvent`]s.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::error::{StreamError, StreamResult};
use super::read_source::{FillStatus, ReadSource};
use super::write_source::{TakeInfo, WriteSource};
use crate::engine::DeviceEvent;
use crate::types::BusId;

/// Fill steps per reader per pass, so one source cannot starve the others
const FILL_STEPS_PER_PASS: usize = 4;

/// Wait between passes while a seeked source waits for its fence to be applied
const REFILL_POLL: Duration = Duration::from_micros(500);

/// Outcome of one pass over the sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Frames moved; go again at once
    Busy,
    /// A seeked source has nothing queued yet; come back soon
    Refilling,
    Idle,
}

enum DiskCommand {
    AddReader { bus: BusId, source: ReadSource },
    RemoveReader { bus: BusId },
    AddWriter { bus: BusId, source: WriteSource },
    FinishWriter {
        bus: BusId,
        reply: Sender<StreamResult<TakeInfo>>,
    },
    Shutdown,
}

/// Handle to the disk thread
pub struct DiskIo {
    commands: Sender<DiskCommand>,
    handle: Option<JoinHandle<()>>,
}

impl DiskIo {
    /// Spawn the thread, idling `poll_interval` between passes with no work
    pub fn spawn(poll_interval: Duration, events: Sender<DeviceEvent>) -> std::io::Result<Self> {
        let (commands, rx) = channel::unbounded();
        let handle = thread::Builder::new()
            .name("disk-io".to_string())
            .spawn(move || DiskWorker::new(events).run(rx, poll_interval))?;
        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    /// Service `source` for `bus`, replacing any previous one
    pub fn add_reader(&self, bus: BusId, source: ReadSource) -> StreamResult<()> {
        self.send(DiskCommand::AddReader { bus, source })
    }

    pub fn remove_reader(&self, bus: BusId) -> StreamResult<()> {
        self.send(DiskCommand::RemoveReader { bus })
    }

    pub fn add_writer(&self, bus: BusId, source: WriteSource) -> StreamResult<()> {
        self.send(DiskCommand::AddWriter { bus, source })
    }

    /// Flush and finalize the take on `bus`, waiting for the result
    pub fn finish_writer(&self, bus: BusId) -> StreamResult<TakeInfo> {
        let (reply, result) = channel::bounded(1);
        self.send(DiskCommand::FinishWriter { bus, reply })?;
        result.recv().map_err(|_| StreamError::DiskThreadGone)?
    }

    fn send(&self, command: DiskCommand) -> StreamResult<()> {
        self.commands.send(command).map_err(|_| StreamError::DiskThreadGone)
    }
}

impl Drop for DiskIo {
    fn drop(&mut self) {
        let _ = self.commands.send(DiskCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct DiskWorker {
    readers: BTreeMap<BusId, ReadSource>,
    writers: BTreeMap<BusId, WriteSource>,
    events: Sender<DeviceEvent>,
}

impl DiskWorker {
    fn new(events: Sender<DeviceEvent>) -> Self {
        Self {
            readers: BTreeMap::new(),
            writers: BTreeMap::new(),
            events,
        }
    }

    fn run(mut self, rx: Receiver<DiskCommand>, poll_interval: Duration) {
        log::debug!("Disk I/O thread started");
        loop {
            // Drain pending commands without waiting
            loop {
                match rx.try_recv() {
                    Ok(DiskCommand::Shutdown) => return self.shutdown(),
                    Ok(command) => self.handle(command),
                    Err(channel::TryRecvError::Empty) => break,
                    Err(channel::TryRecvError::Disconnected) => return self.shutdown(),
                }
            }

            let wait = match self.service() {
                Pass::Busy => continue,
                Pass::Refilling => poll_interval.min(REFILL_POLL),
                Pass::Idle => poll_interval,
            };

            match rx.recv_timeout(wait) {
                Ok(DiskCommand::Shutdown) => return self.shutdown(),
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return self.shutdown(),
            }
        }
    }

    fn handle(&mut self, command: DiskCommand) {
        match command {
            DiskCommand::AddReader { bus, source } => {
                log::debug!("{}: streaming {}", bus, source.name());
                self.readers.insert(bus, source);
            }
            DiskCommand::RemoveReader { bus } => {
                self.readers.remove(&bus);
            }
            DiskCommand::AddWriter { bus, source } => {
                log::debug!("{}: recording to {}", bus, source.path().display());
                if let Some(previous) = self.writers.insert(bus, source) {
                    self.finish_logged(bus, previous);
                }
            }
            DiskCommand::FinishWriter { bus, reply } => {
                let result = match self.writers.remove(&bus) {
                    Some(source) => source.finish(),
                    None => Err(StreamError::NoWriter(bus)),
                };
                let _ = reply.send(result);
            }
            DiskCommand::Shutdown => {}
        }
    }

    /// One pass over every source
    fn service(&mut self) -> Pass {
        let mut busy = false;
        let mut refilling = false;

        let mut failed_readers = Vec::new();
        for (bus, source) in self.readers.iter_mut() {
            for _ in 0..FILL_STEPS_PER_PASS {
                match source.fill_step() {
                    Ok(FillStatus::Filled(_)) => busy = true,
                    Ok(FillStatus::Full) | Ok(FillStatus::EndOfFile) => {
                        refilling |= source.is_refilling();
                        break;
                    }
                    Err(e) => {
                        log::warn!("{}: {}", bus, e);
                        let _ = self.events.send(DeviceEvent::SourceError {
                            bus: *bus,
                            name: source.name().to_string(),
                            error: e.to_string(),
                        });
                        failed_readers.push(*bus);
                        break;
                    }
                }
            }
        }
        for bus in failed_readers {
            self.readers.remove(&bus);
        }

        for (bus, source) in self.writers.iter_mut() {
            if source.is_failed() {
                continue;
            }
            match source.drain_step() {
                Ok(0) => {}
                Ok(_) => busy = true,
                Err(e) => {
                    log::error!("{}: {}", bus, e);
                    let _ = self.events.send(DeviceEvent::RecordingFailed {
                        bus: *bus,
                        path: source.path().to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if busy {
            Pass::Busy
        } else if refilling {
            Pass::Refilling
        } else {
            Pass::Idle
        }
    }

    fn finish_logged(&self, bus: BusId, source: WriteSource) {
        if let Err(e) = source.finish() {
            log::error!("{}: {}", bus, e);
        }
    }

    fn shutdown(mut self) {
        let writers = std::mem::take(&mut self.writers);
        for (bus, source) in writers {
            self.finish_logged(bus, source);
        }
        log::debug!("Disk I/O thread stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MemoryReader, WriteSpec};
    use crate::stream::ReadStatus;
    use std::time::Instant;
    use tempfile::TempDir;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_reader_is_refilled_in_background() {
        let (events, _rx) = channel::unbounded();
        let disk = DiskIo::spawn(Duration::from_millis(1), events).unwrap();

        let reader = MemoryReader::sine(440.0, 0.5, 2.0, 1000, 1);
        let source = ReadSource::new("tone", Box::new(reader), 0.5, 1000).unwrap();
        let stream = source.stream();
        disk.add_reader(BusId(1), source).unwrap();

        let mut out = vec![0.0; 100];
        let mut frames = 0;
        assert!(wait_for(|| {
            let mut stream = stream.try_borrow_mut().unwrap();
            let result = stream.read(&mut out);
            frames += result.frames;
            result.status == ReadStatus::Ended
        }));
        assert_eq!(frames, 2000);
    }

    #[test]
    fn test_seeked_source_refills_without_underrun() {
        let (events, _rx) = channel::unbounded();
        let disk = DiskIo::spawn(Duration::from_millis(20), events).unwrap();

        let samples = (0..5000).map(|i| i as f32).collect();
        let reader = MemoryReader::new(samples, 1, 1000).unwrap();
        let source = ReadSource::new("ramp", Box::new(reader), 1.0, 1000).unwrap();
        let stream = source.stream();
        let seek = source.seek_handle();
        disk.add_reader(BusId(3), source).unwrap();
        assert!(wait_for(|| stream.try_borrow_mut().unwrap().buffered_frames() == 1000));

        seek.seek(4000);
        let mut out = vec![0.0; 10];
        let mut statuses = Vec::new();
        assert!(wait_for(|| {
            let result = stream.try_borrow_mut().unwrap().read(&mut out);
            statuses.push(result.status);
            result.frames > 0
        }));
        assert_eq!(out[0], 4000.0);
        let (last, waiting) = statuses.split_last().unwrap();
        assert_eq!(*last, ReadStatus::Streaming);
        assert!(waiting.iter().all(|s| *s == ReadStatus::Seeking));
    }

    #[test]
    fn test_finish_writer_returns_take() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("take.wav");
        let (events, _rx) = channel::unbounded();
        let disk = DiskIo::spawn(Duration::from_millis(1), events).unwrap();

        let source = WriteSource::create(&path, WriteSpec::float(1, 1000), 1.0).unwrap();
        let stream = source.stream();
        disk.add_writer(BusId(2), source).unwrap();
        assert_eq!(stream.try_borrow_mut().unwrap().write(&[0.5; 300]), 300);

        let take = disk.finish_writer(BusId(2)).unwrap();
        assert_eq!(take.frames, 300);
        assert!(matches!(disk.finish_writer(BusId(2)), Err(StreamError::NoWriter(_))));
    }

    #[test]
    fn test_write_failure_reported_as_event() {
        struct Broken;
        impl crate::codec::AudioFileWriter for Broken {
            fn channels(&self) -> usize {
                1
            }
            fn write(&mut self, _interleaved: &[f32]) -> crate::codec::CodecResult<()> {
                Err(crate::codec::CodecError::Unsupported("disk full".into()))
            }
            fn finalize(self: Box<Self>) -> crate::codec::CodecResult<()> {
                Ok(())
            }
        }

        let (events, rx) = channel::unbounded();
        let disk = DiskIo::spawn(Duration::from_millis(1), events).unwrap();
        let source = WriteSource::with_writer("/takes/vox.wav", Box::new(Broken), 1000, 1.0);
        let stream = source.stream();
        disk.add_writer(BusId(7), source).unwrap();
        stream.try_borrow_mut().unwrap().write(&[0.1; 10]);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            DeviceEvent::RecordingFailed { bus, path, .. } => {
                assert_eq!(bus, BusId(7));
                assert!(path.ends_with("vox.wav"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
