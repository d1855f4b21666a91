//! Streaming playback source
//!
//! A [`ReadSource`] is split in two:
//!
//! - the fill side (`ReadSource`), owned by the disk thread, decodes ahead of
//!   the play position into an interleaved ring buffer
//! - the realtime side ([`PlaybackStream`]), owned by the bus table, reads
//!   whole frames out of the ring without blocking
//!
//! # Seeking
//!
//! A seek bumps the requested generation. The fill side repositions the
//! decoder and publishes a fence `(generation, write position)`; until the
//! fence for the newest generation is visible, the realtime side returns
//! nothing, and once it is, everything written before the fence position is
//! skipped. Frames decoded before the seek are never played.
//!
//! The read stays [`ReadStatus::Seeking`] until frames from the new position
//! are buffered (or the file has ended), so a seek is never reported as an
//! underrun.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::error::{StreamError, StreamResult};
use crate::codec::{open_reader_at_rate, AudioFileReader};
use crate::ring::{Consumer, Producer, RingBuffer, RtCell};

/// Frames decoded per fill step at most
const FILL_CHUNK_FRAMES: usize = 4096;

/// State shared by both halves of a source
#[derive(Debug, Default)]
struct SourceShared {
    requested_gen: AtomicU64,
    target_frame: AtomicU64,
    fence_gen: AtomicU64,
    fence_pos: AtomicU64,
    eof: AtomicBool,
    /// Decode position in frames
    position: AtomicU64,
}

/// Outcome of one fill step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// Ring is at the prebuffer depth
    Full,
    /// Frames decoded and queued
    Filled(usize),
    /// Decoder reached the end; nothing more until a seek
    EndOfFile,
}

/// What the realtime side got from a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Normal playback; a short read is an underrun
    Streaming,
    /// A seek is pending; output is silence until the new position is buffered
    Seeking,
    /// Source is exhausted
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    pub frames: usize,
    pub status: ReadStatus,
}

/// Realtime half of a [`ReadSource`]
pub struct PlaybackStream {
    consumer: Consumer<f32>,
    shared: Arc<SourceShared>,
    channels: usize,
    seen_gen: u64,
    /// Fence applied, first frames from the new position not yet buffered
    awaiting_fill: bool,
}

impl PlaybackStream {
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Read up to `out.len() / channels` whole frames. Never blocks.
    pub fn read(&mut self, out: &mut [f32]) -> ReadResult {
        let requested = self.shared.requested_gen.load(Ordering::Acquire);
        if requested != self.seen_gen {
            let fence_gen = self.shared.fence_gen.load(Ordering::Acquire);
            if fence_gen != requested {
                return ReadResult {
                    frames: 0,
                    status: ReadStatus::Seeking,
                };
            }
            let fence_pos = self.shared.fence_pos.load(Ordering::Acquire);
            // A newer fence may have landed between the two loads
            if self.shared.fence_gen.load(Ordering::Acquire) != fence_gen {
                return ReadResult {
                    frames: 0,
                    status: ReadStatus::Seeking,
                };
            }
            self.consumer.skip_to(fence_pos);
            self.seen_gen = requested;
            self.awaiting_fill = true;
        }

        let wanted = out.len() - out.len() % self.channels;
        if self.awaiting_fill {
            let ready = self.consumer.available() >= wanted.min(self.consumer.capacity()).max(1);
            if !ready && !self.shared.eof.load(Ordering::Acquire) {
                return ReadResult {
                    frames: 0,
                    status: ReadStatus::Seeking,
                };
            }
            self.awaiting_fill = false;
        }
        let got = self.consumer.read(&mut out[..wanted]);
        let frames = got / self.channels;

        let status = if frames * self.channels < wanted && self.shared.eof.load(Ordering::Acquire) {
            // The fill side may have queued the tail after our read
            if self.consumer.available() == 0 {
                ReadStatus::Ended
            } else {
                ReadStatus::Streaming
            }
        } else {
            ReadStatus::Streaming
        };

        ReadResult { frames, status }
    }

    /// Frames ready to play
    pub fn buffered_frames(&self) -> usize {
        self.consumer.available() / self.channels
    }
}

/// Control-side handle for repositioning a source
#[derive(Clone)]
pub struct SeekHandle {
    shared: Arc<SourceShared>,
}

impl SeekHandle {
    /// Request playback from `frame`. Takes effect after the next fill step.
    pub fn seek(&self, frame: u64) {
        self.shared.target_frame.store(frame, Ordering::Release);
        self.shared.requested_gen.fetch_add(1, Ordering::AcqRel);
    }
}

/// Fill side of a streaming playback source
pub struct ReadSource {
    name: String,
    reader: Box<dyn AudioFileReader>,
    producer: Producer<f32>,
    shared: Arc<SourceShared>,
    stream: Arc<RtCell<PlaybackStream>>,
    handled_gen: u64,
    /// A seek was handled and nothing from the new position is queued yet
    refill_pending: bool,
    scratch: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    prebuffer_frames: usize,
}

impl ReadSource {
    /// Wrap `reader` with a prebuffer of `prebuffer_secs` at `sample_rate`
    ///
    /// The reader must already produce `sample_rate` audio.
    pub fn new(
        name: impl Into<String>,
        reader: Box<dyn AudioFileReader>,
        prebuffer_secs: f32,
        sample_rate: u32,
    ) -> StreamResult<Self> {
        let name = name.into();
        if reader.sample_rate() != sample_rate {
            return Err(StreamError::RateMismatch {
                name,
                file_rate: reader.sample_rate(),
                session_rate: sample_rate,
            });
        }

        let channels = reader.channels().max(1);
        let prebuffer_frames = ((prebuffer_secs.max(0.0) as f64 * sample_rate as f64).ceil() as usize).max(1);
        let (producer, consumer) = RingBuffer::<f32>::new(prebuffer_frames * channels);
        let shared = Arc::new(SourceShared::default());

        let stream = Arc::new(RtCell::new(PlaybackStream {
            consumer,
            shared: shared.clone(),
            channels,
            seen_gen: 0,
            awaiting_fill: false,
        }));

        Ok(Self {
            name,
            reader,
            producer,
            shared,
            stream,
            handled_gen: 0,
            refill_pending: false,
            scratch: vec![0.0; FILL_CHUNK_FRAMES * channels],
            channels,
            sample_rate,
            prebuffer_frames,
        })
    }

    /// Open `path`, resampling to `sample_rate` if needed
    pub fn open(path: &Path, prebuffer_secs: f32, sample_rate: u32) -> StreamResult<Self> {
        let name = path.display().to_string();
        let reader = open_reader_at_rate(path, sample_rate).map_err(|source| StreamError::Decode {
            name: name.clone(),
            source,
        })?;
        Self::new(name, reader, prebuffer_secs, sample_rate)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length of the file in frames, if known
    pub fn frames(&self) -> Option<u64> {
        self.reader.frames()
    }

    /// Decode position in frames
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Relaxed)
    }

    pub fn prebuffer_frames(&self) -> usize {
        self.prebuffer_frames
    }

    pub fn is_eof(&self) -> bool {
        self.shared.eof.load(Ordering::Acquire)
    }

    /// True between handling a seek and queueing the first frames after it
    ///
    /// The ring may still be full of pre-seek frames until the realtime side
    /// applies the fence, so the fill side should come back soon.
    pub fn is_refilling(&self) -> bool {
        self.refill_pending
    }

    /// Realtime half, for the bus table
    pub fn stream(&self) -> Arc<RtCell<PlaybackStream>> {
        self.stream.clone()
    }

    pub fn seek_handle(&self) -> SeekHandle {
        SeekHandle {
            shared: self.shared.clone(),
        }
    }

    /// Convenience for `seek_handle().seek(frame)`
    pub fn seek(&self, frame: u64) {
        self.seek_handle().seek(frame);
    }

    /// Handle a pending seek, then decode into free ring space
    pub fn fill_step(&mut self) -> StreamResult<FillStatus> {
        let requested = self.shared.requested_gen.load(Ordering::Acquire);
        if requested != self.handled_gen {
            let target = self.shared.target_frame.load(Ordering::Acquire);
            self.reader.seek(target).map_err(|source| StreamError::Decode {
                name: self.name.clone(),
                source,
            })?;
            self.shared.position.store(target, Ordering::Relaxed);
            self.shared.eof.store(false, Ordering::Release);
            self.shared
                .fence_pos
                .store(self.producer.write_position(), Ordering::Release);
            self.shared.fence_gen.store(requested, Ordering::Release);
            self.handled_gen = requested;
            self.refill_pending = true;
        }

        if self.shared.eof.load(Ordering::Acquire) {
            return Ok(FillStatus::EndOfFile);
        }

        let free_frames = self.producer.free() / self.channels;
        if free_frames == 0 {
            return Ok(FillStatus::Full);
        }

        let want = free_frames.min(FILL_CHUNK_FRAMES);
        let frames = self
            .reader
            .read(&mut self.scratch[..want * self.channels])
            .map_err(|source| StreamError::Decode {
                name: self.name.clone(),
                source,
            })?;

        if frames == 0 {
            self.shared.eof.store(true, Ordering::Release);
            self.refill_pending = false;
            return Ok(FillStatus::EndOfFile);
        }

        // Seek arrived while decoding: this chunk belongs to the old position
        if self.shared.requested_gen.load(Ordering::Acquire) != self.handled_gen {
            return Ok(FillStatus::Filled(0));
        }

        self.producer.write(&self.scratch[..frames * self.channels]);
        self.shared.position.fetch_add(frames as u64, Ordering::Relaxed);
        self.refill_pending = false;
        Ok(FillStatus::Filled(frames))
    }

    /// Fill synchronously to the prebuffer depth (or end of file)
    pub fn prefill(&mut self) -> StreamResult<()> {
        loop {
            match self.fill_step()? {
                FillStatus::Full | FillStatus::EndOfFile => return Ok(()),
                FillStatus::Filled(_) => {}
            }
        }
    }
}

impl std::fmt::Debug for ReadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSource")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MemoryReader;

    /// Mono source whose sample values are their frame index
    fn ramp(frames: usize, rate: u32) -> Box<dyn AudioFileReader> {
        let samples = (0..frames).map(|i| i as f32).collect();
        Box::new(MemoryReader::new(samples, 1, rate).unwrap())
    }

    #[test]
    fn test_prefill_guarantees_depth() {
        let mut source = ReadSource::new("ramp", ramp(48000 * 3, 48000), 1.0, 48000).unwrap();
        source.prefill().unwrap();
        assert_eq!(source.prebuffer_frames(), 48000);

        let stream = source.stream();
        let mut stream = stream.try_borrow_mut().unwrap();
        let mut out = vec![0.0; 512];
        let mut total = 0;
        // A full second of periods with no refill in between never starves
        while total + 512 <= 48000 {
            let result = stream.read(&mut out);
            assert_eq!(result.frames, 512);
            assert_eq!(result.status, ReadStatus::Streaming);
            assert_eq!(out[0], total as f32);
            total += 512;
        }
    }

    #[test]
    fn test_seek_never_delivers_stale_frames() {
        let mut source = ReadSource::new("ramp", ramp(20000, 1000), 1.0, 1000).unwrap();
        source.prefill().unwrap();
        let cell = source.stream();
        let mut out = vec![0.0; 100];

        {
            let mut stream = cell.try_borrow_mut().unwrap();
            assert_eq!(stream.read(&mut out).frames, 100);
            assert_eq!(out[0], 0.0);
        }

        source.seek(15000);
        {
            let mut stream = cell.try_borrow_mut().unwrap();
            let result = stream.read(&mut out);
            assert_eq!(result.status, ReadStatus::Seeking);
            assert_eq!(result.frames, 0);
        }

        source.fill_step().unwrap();
        source.prefill().unwrap();
        let mut stream = cell.try_borrow_mut().unwrap();
        let result = stream.read(&mut out);
        assert_eq!(result.status, ReadStatus::Streaming);
        assert_eq!(result.frames, 100);
        assert_eq!(out[0], 15000.0);
        assert_eq!(out[99], 15099.0);
    }

    #[test]
    fn test_seek_with_full_ring_waits_for_new_frames() {
        let mut source = ReadSource::new("ramp", ramp(5000, 1000), 1.0, 1000).unwrap();
        source.prefill().unwrap();
        source.seek(3000);
        // Ring still holds old frames: the fence is out but nothing new is queued
        assert_eq!(source.fill_step().unwrap(), FillStatus::Full);
        assert!(source.is_refilling());

        let cell = source.stream();
        let mut out = vec![0.0; 64];
        {
            let mut stream = cell.try_borrow_mut().unwrap();
            for _ in 0..3 {
                let result = stream.read(&mut out);
                assert_eq!(result.frames, 0);
                assert_eq!(result.status, ReadStatus::Seeking);
            }
        }

        assert!(matches!(source.fill_step().unwrap(), FillStatus::Filled(_)));
        assert!(!source.is_refilling());
        let mut stream = cell.try_borrow_mut().unwrap();
        let result = stream.read(&mut out);
        assert_eq!(result.status, ReadStatus::Streaming);
        assert_eq!(result.frames, 64);
        assert_eq!(out[0], 3000.0);
    }

    #[test]
    fn test_end_of_file_is_terminal_not_error() {
        let mut source = ReadSource::new("short", ramp(300, 1000), 1.0, 1000).unwrap();
        source.prefill().unwrap();
        assert!(source.is_eof());
        assert_eq!(source.fill_step().unwrap(), FillStatus::EndOfFile);

        let cell = source.stream();
        let mut stream = cell.try_borrow_mut().unwrap();
        let mut out = vec![0.0; 256];
        assert_eq!(stream.read(&mut out).frames, 256);
        let tail = stream.read(&mut out);
        assert_eq!(tail.frames, 44);
        assert_eq!(tail.status, ReadStatus::Ended);
        assert_eq!(stream.read(&mut out).frames, 0);
    }

    #[test]
    fn test_seek_after_end_restarts() {
        let mut source = ReadSource::new("short", ramp(100, 1000), 0.5, 1000).unwrap();
        source.prefill().unwrap();
        source.seek(10);
        assert_eq!(source.fill_step().unwrap(), FillStatus::Filled(90));
        assert_eq!(source.position(), 100);

        let cell = source.stream();
        let mut stream = cell.try_borrow_mut().unwrap();
        let mut out = vec![0.0; 4];
        stream.read(&mut out);
        assert_eq!(out, vec![10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_rate_mismatch_rejected() {
        let err = ReadSource::new("ramp", ramp(10, 44100), 1.0, 48000).unwrap_err();
        assert!(matches!(err, StreamError::RateMismatch { .. }));
    }

    #[test]
    fn test_stereo_reads_whole_frames() {
        let reader = MemoryReader::new(vec![0.5; 2 * 64], 2, 1000).unwrap();
        let mut source = ReadSource::new("stereo", Box::new(reader), 1.0, 1000).unwrap();
        source.prefill().unwrap();
        let cell = source.stream();
        let mut stream = cell.try_borrow_mut().unwrap();
        // Odd-length buffer: only whole frames are read
        let mut out = vec![0.0; 9];
        assert_eq!(stream.read(&mut out).frames, 4);
        assert_eq!(out[8], 0.0);
    }
}
