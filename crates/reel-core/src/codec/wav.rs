//! WAV reading and writing via hound

use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::dither::Ditherer;
use super::error::{CodecError, CodecResult};
use super::{AudioFileReader, AudioFileWriter, SampleFormat, WriteSpec};

/// Seekable WAV reader (float or integer PCM)
pub struct WavReader {
    reader: hound::WavReader<BufReader<File>>,
    spec: hound::WavSpec,
    frames: u64,
    position: u64,
}

impl WavReader {
    pub fn open(path: &Path) -> CodecResult<Self> {
        let file = File::open(path).map_err(|source| CodecError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = hound::WavReader::new(BufReader::new(file))?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(CodecError::Unsupported(format!(
                "{}: no channels",
                path.display()
            )));
        }
        let frames = reader.duration() as u64;
        Ok(Self {
            reader,
            spec,
            frames,
            position: 0,
        })
    }
}

impl AudioFileReader for WavReader {
    fn channels(&self) -> usize {
        self.spec.channels as usize
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn frames(&self) -> Option<u64> {
        Some(self.frames)
    }

    fn seek(&mut self, frame: u64) -> CodecResult<()> {
        let frame = frame.min(self.frames);
        self.reader
            .seek(frame as u32)
            .map_err(hound::Error::from)?;
        self.position = frame;
        Ok(())
    }

    fn read(&mut self, out: &mut [f32]) -> CodecResult<usize> {
        let channels = self.channels();
        let wanted = (out.len() / channels) as u64;
        let frames = wanted.min(self.frames - self.position) as usize;
        let count = frames * channels;

        match self.spec.sample_format {
            hound::SampleFormat::Float => {
                for (slot, sample) in out[..count].iter_mut().zip(self.reader.samples::<f32>()) {
                    *slot = sample?;
                }
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (self.spec.bits_per_sample - 1)) as f32;
                for (slot, sample) in out[..count].iter_mut().zip(self.reader.samples::<i32>()) {
                    *slot = sample? as f32 * scale;
                }
            }
        }

        self.position += frames as u64;
        Ok(frames)
    }
}

/// WAV writer for takes and exports
///
/// Float32 samples are written as-is; integer formats go through the
/// configured dither.
pub struct WavWriter {
    writer: hound::WavWriter<BufWriter<File>>,
    path: PathBuf,
    channels: usize,
    format: SampleFormat,
    ditherer: Ditherer,
}

impl WavWriter {
    /// Create the file now, so permission or path problems surface immediately
    pub fn create(path: &Path, spec: WriteSpec) -> CodecResult<Self> {
        if spec.channels == 0 {
            return Err(CodecError::Unsupported("0 channels".to_string()));
        }

        let wav_spec = hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.format.bits(),
            sample_format: match spec.format {
                SampleFormat::Float32 => hound::SampleFormat::Float,
                SampleFormat::Int16 | SampleFormat::Int24 => hound::SampleFormat::Int,
            },
        };

        let file = File::create(path).map_err(|source| CodecError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = hound::WavWriter::new(BufWriter::new(file), wav_spec)?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            channels: spec.channels as usize,
            format: spec.format,
            ditherer: Ditherer::new(spec.dither, 0x5eed),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioFileWriter for WavWriter {
    fn channels(&self) -> usize {
        self.channels
    }

    fn write(&mut self, interleaved: &[f32]) -> CodecResult<()> {
        match self.format {
            SampleFormat::Float32 => {
                for &s in interleaved {
                    self.writer.write_sample(s)?;
                }
            }
            SampleFormat::Int16 => {
                for &s in interleaved {
                    self.writer.write_sample(self.ditherer.quantize_i16(s))?;
                }
            }
            SampleFormat::Int24 => {
                for &s in interleaved {
                    self.writer.write_sample(self.ditherer.quantize(s, 24))?;
                }
            }
        }
        Ok(())
    }

    fn finalize(self: Box<Self>) -> CodecResult<()> {
        let this = *self;
        this.writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DitherMode;
    use tempfile::tempdir;

    fn ramp(frames: usize, channels: usize) -> Vec<f32> {
        (0..frames * channels)
            .map(|i| (i / channels) as f32 / frames as f32)
            .collect()
    }

    #[test]
    fn test_float_write_then_seek_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let data = ramp(1000, 2);

        let mut writer = Box::new(WavWriter::create(&path, WriteSpec::float(2, 48000)).unwrap());
        writer.write(&data).unwrap();
        writer.finalize().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.sample_rate(), 48000);
        assert_eq!(reader.frames(), Some(1000));

        reader.seek(500).unwrap();
        let mut out = vec![0.0; 20];
        assert_eq!(reader.read(&mut out).unwrap(), 10);
        assert_eq!(&out[..], &data[1000..1020]);
    }

    #[test]
    fn test_read_stops_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.wav");
        let mut writer = Box::new(WavWriter::create(&path, WriteSpec::float(1, 44100)).unwrap());
        writer.write(&[0.5; 10]).unwrap();
        writer.finalize().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let mut out = vec![0.0; 64];
        assert_eq!(reader.read(&mut out).unwrap(), 10);
        assert_eq!(reader.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_int16_quantisation_is_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("int16.wav");
        let spec = WriteSpec {
            channels: 1,
            sample_rate: 48000,
            format: SampleFormat::Int16,
            dither: DitherMode::Triangular,
        };
        let mut writer = Box::new(WavWriter::create(&path, spec).unwrap());
        writer.write(&[0.5, -0.25, 0.0]).unwrap();
        writer.finalize().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let mut out = vec![0.0; 3];
        reader.read(&mut out).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-3);
        assert!((out[1] + 0.25).abs() < 1e-3);
        assert!(out[2].abs() < 1e-3);
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("take.wav");
        let err = WavWriter::create(&path, WriteSpec::float(2, 48000)).err().unwrap();
        assert!(err.is_io());
    }
}
