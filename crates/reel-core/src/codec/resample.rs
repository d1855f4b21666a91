//! Sample rate conversion for sources recorded at a foreign rate

use rubato::{FftFixedIn, Resampler};

use super::error::{CodecError, CodecResult};
use super::AudioFileReader;

/// Input chunk fed to the resampler per step (frames)
const CHUNK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Wraps a reader and presents it at `target_rate`
///
/// Seeking maps the target-rate frame back to the source rate and resets the
/// resampler, discarding its filter delay again.
pub struct ResamplingReader {
    inner: Box<dyn AudioFileReader>,
    resampler: FftFixedIn<f32>,
    target_rate: u32,
    channels: usize,
    /// Interleaved scratch for reading from `inner`
    interleaved_in: Vec<f32>,
    /// Planar input handed to the resampler
    planar_in: Vec<Vec<f32>>,
    /// Interleaved output not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    /// Output frames still to drop (filter delay)
    delay_frames: usize,
    /// Output position in target-rate frames
    position: u64,
    total_frames: Option<u64>,
    inner_eof: bool,
}

impl ResamplingReader {
    pub fn new(inner: Box<dyn AudioFileReader>, target_rate: u32) -> CodecResult<Self> {
        let channels = inner.channels();
        let source_rate = inner.sample_rate();
        let resampler = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            CHUNK_FRAMES,
            SUB_CHUNKS,
            channels,
        )
        .map_err(|e| CodecError::Resample(e.to_string()))?;

        let total_frames = inner
            .frames()
            .map(|f| (f as f64 * target_rate as f64 / source_rate as f64).ceil() as u64);
        let delay_frames = resampler.output_delay();

        Ok(Self {
            inner,
            resampler,
            target_rate,
            channels,
            interleaved_in: vec![0.0; CHUNK_FRAMES * channels],
            planar_in: vec![vec![0.0; CHUNK_FRAMES]; channels],
            pending: Vec::new(),
            pending_pos: 0,
            delay_frames,
            position: 0,
            total_frames,
            inner_eof: false,
        })
    }

    fn source_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    /// Run one resampler step, zero-padding past the end of the source
    fn refill(&mut self) -> CodecResult<()> {
        let needed = self.resampler.input_frames_next();
        self.interleaved_in.resize(needed * self.channels, 0.0);
        let got = if self.inner_eof {
            0
        } else {
            self.inner.read(&mut self.interleaved_in)?
        };
        if got < needed {
            self.inner_eof = true;
            self.interleaved_in[got * self.channels..].fill(0.0);
        }

        for (ch, planar) in self.planar_in.iter_mut().enumerate() {
            planar.resize(needed, 0.0);
            for (i, s) in planar.iter_mut().enumerate() {
                *s = self.interleaved_in[i * self.channels + ch];
            }
        }

        let output = self
            .resampler
            .process(&self.planar_in, None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;

        let out_frames = output.first().map(|c| c.len()).unwrap_or(0);
        let skip = self.delay_frames.min(out_frames);
        self.delay_frames -= skip;

        self.pending.clear();
        self.pending_pos = 0;
        for i in skip..out_frames {
            for channel in &output {
                self.pending.push(channel[i]);
            }
        }
        Ok(())
    }
}

impl AudioFileReader for ResamplingReader {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn seek(&mut self, frame: u64) -> CodecResult<()> {
        let source_frame = (frame as f64 * self.source_rate() as f64 / self.target_rate as f64) as u64;
        self.inner.seek(source_frame)?;
        self.resampler.reset();
        self.delay_frames = self.resampler.output_delay();
        self.pending.clear();
        self.pending_pos = 0;
        self.position = frame;
        self.inner_eof = false;
        Ok(())
    }

    fn read(&mut self, out: &mut [f32]) -> CodecResult<usize> {
        let mut wanted = out.len() / self.channels;
        if let Some(total) = self.total_frames {
            wanted = wanted.min(total.saturating_sub(self.position) as usize);
        }

        let mut filled = 0;
        while filled < wanted {
            if self.pending_pos >= self.pending.len() {
                // Without a known length the filter tail is dropped at source EOF
                if self.inner_eof && self.total_frames.is_none() {
                    break;
                }
                self.refill()?;
                continue;
            }
            let frames = (wanted - filled).min((self.pending.len() - self.pending_pos) / self.channels);
            let count = frames * self.channels;
            let dst = filled * self.channels;
            out[dst..dst + count].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + count]);
            self.pending_pos += count;
            filled += frames;
        }

        self.position += filled as u64;
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MemoryReader;

    #[test]
    fn test_length_scales_with_rate() {
        let source = MemoryReader::sine(440.0, 0.5, 1.0, 44100, 2);
        let mut reader = ResamplingReader::new(Box::new(source), 48000).unwrap();
        assert_eq!(reader.sample_rate(), 48000);
        assert_eq!(reader.frames(), Some(48000));

        let mut out = vec![0.0; 4096 * 2];
        let mut total = 0;
        loop {
            let n = reader.read(&mut out).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 48000);
    }

    #[test]
    fn test_amplitude_is_preserved() {
        let source = MemoryReader::sine(440.0, 0.5, 0.5, 44100, 1);
        let mut reader = ResamplingReader::new(Box::new(source), 48000).unwrap();
        let mut out = vec![0.0; 24000];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(n, 24000);
        // Skip the edges where the filter ramps in and out
        let peak = out[2000..22000].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.02, "peak={peak}");
    }
}
