//! Export parameters and render inputs

use std::ops::Range;
use std::path::{Path, PathBuf};

use super::error::{RenderError, RenderResult};
use crate::codec::{open_reader_at_rate, AudioFileReader, DitherMode, SampleFormat, WriteSpec};
use crate::stream::StreamError;

/// Frames mixed per render block unless configured otherwise
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Where and how to write an export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpec {
    pub path: PathBuf,
    pub channels: usize,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub dither: DitherMode,
    pub block_size: usize,
    /// Peak level to normalize to, in dBFS. Enables the measuring pass.
    pub normalize: Option<f32>,
    /// Timeline frames to export; defaults to the end of the longest input
    pub range: Option<Range<u64>>,
}

impl ExportSpec {
    pub fn new(path: impl Into<PathBuf>, channels: usize, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            channels,
            sample_rate,
            format: SampleFormat::Float32,
            dither: DitherMode::None,
            block_size: DEFAULT_BLOCK_SIZE,
            normalize: None,
            range: None,
        }
    }

    pub fn with_format(mut self, format: SampleFormat, dither: DitherMode) -> Self {
        self.format = format;
        self.dither = dither;
        self
    }

    pub fn with_normalize(mut self, target_dbfs: f32) -> Self {
        self.normalize = Some(target_dbfs);
        self
    }

    pub fn with_range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_block_size(mut self, frames: usize) -> Self {
        self.block_size = frames;
        self
    }

    /// Linear peak the measuring pass normalizes to
    pub fn normalize_peak(&self) -> Option<f32> {
        self.normalize.map(|db| 10f32.powf(db / 20.0))
    }

    /// 1 pass, or 2 with normalization
    pub fn passes(&self) -> u8 {
        if self.normalize.is_some() {
            2
        } else {
            1
        }
    }

    pub(crate) fn write_spec(&self) -> WriteSpec {
        WriteSpec {
            channels: self.channels as u16,
            sample_rate: self.sample_rate,
            format: self.format,
            dither: self.dither,
        }
    }

    pub(crate) fn validate(&self) -> RenderResult<()> {
        if self.channels == 0 {
            return Err(RenderError::NoChannels);
        }
        if self.block_size == 0 {
            return Err(RenderError::InvalidBlockSize);
        }
        if let Some(db) = self.normalize {
            if !(db.is_finite() && db <= 0.0) {
                return Err(RenderError::NormalizeAboveFullScale { db });
            }
        }
        if let Some(range) = &self.range {
            if range.start > range.end {
                return Err(RenderError::StartBeyondEnd {
                    start: range.start,
                    end: range.end,
                });
            }
        }
        Ok(())
    }
}

/// One file placed on the export timeline
pub struct RenderInput {
    pub name: String,
    pub reader: Box<dyn AudioFileReader>,
    /// Timeline frame where the input starts
    pub offset: u64,
    pub gain: f32,
}

impl RenderInput {
    pub fn new(name: impl Into<String>, reader: Box<dyn AudioFileReader>) -> Self {
        Self {
            name: name.into(),
            reader,
            offset: 0,
            gain: 1.0,
        }
    }

    /// Open `path`, resampling to `sample_rate` if needed
    pub fn open(path: &Path, sample_rate: u32) -> RenderResult<Self> {
        let name = path.display().to_string();
        let reader = open_reader_at_rate(path, sample_rate).map_err(|source| StreamError::Decode {
            name: name.clone(),
            source,
        })?;
        Ok(Self::new(name, reader))
    }

    pub fn at(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }
}

impl std::fmt::Debug for RenderInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderInput")
            .field("name", &self.name)
            .field("channels", &self.reader.channels())
            .field("offset", &self.offset)
            .field("gain", &self.gain)
            .finish()
    }
}
