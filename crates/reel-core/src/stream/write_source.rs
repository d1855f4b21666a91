//! Streaming recording destination
//!
//! The realtime side ([`CaptureStream`]) pushes captured frames into a ring;
//! the disk thread drains the ring into the encoder with
//! [`WriteSource::drain_step`]. The file is created when the source is, so a
//! missing directory or a permission problem fails the start of recording
//! rather than the first drain.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{StreamError, StreamResult};
use crate::codec::{open_writer, AudioFileWriter, WriteSpec};
use crate::ring::{Consumer, Producer, RingBuffer, RtCell};

/// Samples moved to the encoder per drain step at most
const DRAIN_CHUNK_FRAMES: usize = 4096;

#[derive(Debug)]
struct WriteShared {
    accepting: AtomicBool,
    failed: AtomicBool,
}

/// Realtime half of a [`WriteSource`]
pub struct CaptureStream {
    producer: Producer<f32>,
    shared: Arc<WriteShared>,
    channels: usize,
}

impl CaptureStream {
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Queue whole interleaved frames. Never blocks.
    ///
    /// Returns the frames accepted; frames that do not fit are dropped by the
    /// caller. Nothing is accepted once the take has failed or is finishing.
    pub fn write(&mut self, interleaved: &[f32]) -> usize {
        if !self.shared.accepting.load(Ordering::Acquire) || self.shared.failed.load(Ordering::Acquire) {
            return 0;
        }
        let frames = (interleaved.len() / self.channels).min(self.producer.free() / self.channels);
        self.producer.write(&interleaved[..frames * self.channels]);
        frames
    }

    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }
}

/// A finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct TakeInfo {
    pub path: PathBuf,
    pub frames: u64,
    pub channels: usize,
    pub sample_rate: u32,
}

impl TakeInfo {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Drain side of a recording take
pub struct WriteSource {
    path: PathBuf,
    writer: Option<Box<dyn AudioFileWriter>>,
    consumer: Consumer<f32>,
    shared: Arc<WriteShared>,
    stream: Arc<RtCell<CaptureStream>>,
    scratch: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    frames_written: u64,
}

impl WriteSource {
    /// Create the file at `path` and buffer `buffer_secs` of capture
    pub fn create(path: &Path, spec: WriteSpec, buffer_secs: f32) -> StreamResult<Self> {
        let writer = open_writer(path, spec).map_err(|source| StreamError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::with_writer(path, writer, spec.sample_rate, buffer_secs))
    }

    /// Wrap an already-open encoder
    pub fn with_writer(
        path: impl Into<PathBuf>,
        writer: Box<dyn AudioFileWriter>,
        sample_rate: u32,
        buffer_secs: f32,
    ) -> Self {
        let channels = writer.channels().max(1);
        let frames = ((buffer_secs.max(0.0) as f64 * sample_rate as f64).ceil() as usize).max(1);
        let (producer, consumer) = RingBuffer::<f32>::new(frames * channels);
        let shared = Arc::new(WriteShared {
            accepting: AtomicBool::new(true),
            failed: AtomicBool::new(false),
        });
        let stream = Arc::new(RtCell::new(CaptureStream {
            producer,
            shared: shared.clone(),
            channels,
        }));

        Self {
            path: path.into(),
            writer: Some(writer),
            consumer,
            shared,
            stream,
            scratch: vec![0.0; DRAIN_CHUNK_FRAMES * channels],
            channels,
            sample_rate,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames handed to the encoder so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Realtime half, for the bus table
    pub fn stream(&self) -> Arc<RtCell<CaptureStream>> {
        self.stream.clone()
    }

    /// Move one chunk of queued frames to the encoder
    ///
    /// Returns the frames written (0 when the ring was empty). On error the
    /// take is marked failed and the realtime side stops accepting frames.
    pub fn drain_step(&mut self) -> StreamResult<usize> {
        if self.is_failed() {
            return Err(StreamError::Failed {
                path: self.path.clone(),
            });
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(0);
        };

        let samples = self.consumer.read(&mut self.scratch);
        if samples == 0 {
            return Ok(0);
        }

        if let Err(source) = writer.write(&self.scratch[..samples]) {
            self.shared.failed.store(true, Ordering::Release);
            return Err(StreamError::Write {
                path: self.path.clone(),
                source,
            });
        }

        let frames = samples / self.channels;
        self.frames_written += frames as u64;
        Ok(frames)
    }

    /// Stop accepting frames, flush everything queued and finalize the file
    pub fn finish(mut self) -> StreamResult<TakeInfo> {
        self.shared.accepting.store(false, Ordering::Release);
        {
            // Wait out a realtime write in progress; later ones see `accepting`
            let _fence = self.stream.borrow_mut_blocking();
        }

        while self.drain_step()? > 0 {}

        let Some(writer) = self.writer.take() else {
            return Err(StreamError::Failed { path: self.path.clone() });
        };
        writer.finalize().map_err(|source| StreamError::Finalize {
            path: self.path.clone(),
            source,
        })?;

        log::info!(
            "Take {} finalized ({} frames, {:.2}s)",
            self.path.display(),
            self.frames_written,
            self.frames_written as f64 / self.sample_rate as f64
        );

        Ok(TakeInfo {
            path: self.path.clone(),
            frames: self.frames_written,
            channels: self.channels,
            sample_rate: self.sample_rate,
        })
    }
}

impl Drop for WriteSource {
    fn drop(&mut self) {
        // Abandoned take: keep what reached the encoder readable
        if let Some(writer) = self.writer.take() {
            log::warn!("Take {} dropped without finish, finalizing", self.path.display());
            if let Err(e) = writer.finalize() {
                log::warn!("Could not finalize {}: {}", self.path.display(), e);
            }
        }
    }
}

impl std::fmt::Debug for WriteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSource")
            .field("path", &self.path)
            .field("channels", &self.channels)
            .field("frames_written", &self.frames_written)
            .field("failed", &self.is_failed())
            .finish()
    }
}
