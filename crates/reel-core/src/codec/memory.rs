//! In-memory reader

use std::sync::Arc;

use super::error::{CodecError, CodecResult};
use super::AudioFileReader;

/// Reader over interleaved samples held in memory
///
/// Sample data is shared, so cloning a reader is cheap.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    samples: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
    position: u64,
}

impl MemoryReader {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> CodecResult<Self> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(CodecError::Unsupported(format!(
                "{} samples do not form whole {}-channel frames",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples: samples.into(),
            channels,
            sample_rate,
            position: 0,
        })
    }

    /// Sine tone of `amplitude`, identical on every channel
    pub fn sine(freq: f32, amplitude: f32, seconds: f32, sample_rate: u32, channels: usize) -> Self {
        let frames = (seconds * sample_rate as f32) as usize;
        let step = std::f32::consts::TAU * freq / sample_rate as f32;
        let samples = (0..frames)
            .flat_map(|i| std::iter::repeat((i as f32 * step).sin() * amplitude).take(channels))
            .collect::<Vec<f32>>();
        Self {
            samples: samples.into(),
            channels,
            sample_rate,
            position: 0,
        }
    }

    /// Silence of the given length
    pub fn silence(frames: usize, sample_rate: u32, channels: usize) -> Self {
        Self {
            samples: vec![0.0; frames * channels].into(),
            channels,
            sample_rate,
            position: 0,
        }
    }

    fn total_frames(&self) -> u64 {
        (self.samples.len() / self.channels) as u64
    }
}

impl AudioFileReader for MemoryReader {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frames(&self) -> Option<u64> {
        Some(self.total_frames())
    }

    fn seek(&mut self, frame: u64) -> CodecResult<()> {
        self.position = frame.min(self.total_frames());
        Ok(())
    }

    fn read(&mut self, out: &mut [f32]) -> CodecResult<usize> {
        let frames = ((out.len() / self.channels) as u64).min(self.total_frames() - self.position) as usize;
        let start = self.position as usize * self.channels;
        let count = frames * self.channels;
        out[..count].copy_from_slice(&self.samples[start..start + count]);
        self.position += frames as u64;
        Ok(frames)
    }
}
