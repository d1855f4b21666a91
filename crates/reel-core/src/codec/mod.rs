//! Audio file access for streaming sources and exports
//!
//! The engine only sees the [`AudioFileReader`] / [`AudioFileWriter`] traits;
//! concrete formats live behind them:
//!
//! - [`WavReader`] / [`WavWriter`]: hound, sample-accurate seeking
//! - [`DecodedReader`]: symphonia (FLAC, Ogg Vorbis, MP3, AIFF)
//! - [`ResamplingReader`]: rubato adapter for files at a foreign rate
//! - [`MemoryReader`]: interleaved samples held in memory (tones, tests)
//!
//! All readers produce interleaved `f32` frames.

mod decoded;
mod dither;
mod error;
mod memory;
mod resample;
mod wav;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use decoded::DecodedReader;
pub use dither::{DitherMode, Ditherer};
pub use error::{CodecError, CodecResult};
pub use memory::MemoryReader;
pub use resample::ResamplingReader;
pub use wav::{WavReader, WavWriter};

/// Decode cursor over an audio file
pub trait AudioFileReader: Send {
    fn channels(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Total length in frames, when the container reports it
    fn frames(&self) -> Option<u64>;

    /// Reposition the cursor to `frame`
    fn seek(&mut self, frame: u64) -> CodecResult<()>;

    /// Decode interleaved frames into `out` (length is a multiple of `channels()`).
    ///
    /// Returns the number of frames written; 0 means end of file.
    fn read(&mut self, out: &mut [f32]) -> CodecResult<usize>;
}

/// Encode cursor for a file being written
pub trait AudioFileWriter: Send {
    fn channels(&self) -> usize;

    /// Append interleaved frames
    fn write(&mut self, interleaved: &[f32]) -> CodecResult<()>;

    /// Flush and patch the header. A failed flush is an error, never ignored.
    fn finalize(self: Box<Self>) -> CodecResult<()>;
}

/// On-disk sample encoding for takes and exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    Float32,
    Int16,
    Int24,
}

impl SampleFormat {
    pub fn bits(&self) -> u16 {
        match self {
            SampleFormat::Float32 => 32,
            SampleFormat::Int16 => 16,
            SampleFormat::Int24 => 24,
        }
    }
}

/// Parameters for opening a file for writing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteSpec {
    pub channels: u16,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub dither: DitherMode,
}

impl WriteSpec {
    pub fn float(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            format: SampleFormat::Float32,
            dither: DitherMode::None,
        }
    }
}

/// Open a file for reading, choosing the decoder by extension
pub fn open_reader(path: &Path) -> CodecResult<Box<dyn AudioFileReader>> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);

    if is_wav {
        Ok(Box::new(WavReader::open(path)?))
    } else {
        Ok(Box::new(DecodedReader::open(path)?))
    }
}

/// Open a file for reading at `sample_rate`, resampling if the file differs
pub fn open_reader_at_rate(path: &Path, sample_rate: u32) -> CodecResult<Box<dyn AudioFileReader>> {
    let reader = open_reader(path)?;
    if reader.sample_rate() == sample_rate {
        return Ok(reader);
    }

    log::info!(
        "{}: resampling {}Hz -> {}Hz",
        path.display(),
        reader.sample_rate(),
        sample_rate
    );
    Ok(Box::new(ResamplingReader::new(reader, sample_rate)?))
}

/// Open a WAV file for writing. The file is created immediately.
pub fn open_writer(path: &Path, spec: WriteSpec) -> CodecResult<Box<dyn AudioFileWriter>> {
    Ok(Box::new(WavWriter::create(path, spec)?))
}
