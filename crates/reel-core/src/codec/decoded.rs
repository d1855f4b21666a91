//! Compressed format reader via symphonia

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::{CodecError, CodecResult};
use super::AudioFileReader;

/// Packet-by-packet decoder for FLAC, Ogg Vorbis, MP3 and AIFF files
pub struct DecodedReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    frames: Option<u64>,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Decoded samples not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames to drop after an approximate seek
    skip_frames: u64,
    eof: bool,
}

impl DecodedReader {
    pub fn open(path: &Path) -> CodecResult<Self> {
        let file = File::open(path).map_err(|source| CodecError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| CodecError::Unsupported(format!("{}: {}", path.display(), e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| CodecError::Unsupported(format!("{}: no audio track", path.display())))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| CodecError::Unsupported(format!("{}: unknown sample rate", path.display())))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| CodecError::Unsupported(format!("{}: unknown channel layout", path.display())))?;
        let frames = track.codec_params.n_frames;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| CodecError::Unsupported(e.to_string()))?;

        log::debug!(
            "Opened {} ({} ch, {}Hz, {:?} frames)",
            path.display(),
            channels,
            sample_rate,
            frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            frames,
            sample_buf: None,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            eof: false,
        })
    }

    /// Decode the next packet of our track into `pending`. Returns false at end of stream.
    fn decode_next(&mut self) -> CodecResult<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(e) => return Err(CodecError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(CodecError::Decode(e.to_string())),
            };

            let needed = decoded.capacity();
            let too_small = self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| buf.capacity() < needed * self.channels);
            if too_small {
                self.sample_buf = Some(SampleBuffer::new(needed as u64, *decoded.spec()));
            }

            self.pending.clear();
            self.pending_pos = 0;
            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                self.pending.extend_from_slice(buf.samples());
            }

            if self.skip_frames > 0 {
                let available = (self.pending.len() / self.channels) as u64;
                let skip = self.skip_frames.min(available);
                self.pending_pos = skip as usize * self.channels;
                self.skip_frames -= skip;
            }
            return Ok(true);
        }
    }
}

impl AudioFileReader for DecodedReader {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frames(&self) -> Option<u64> {
        self.frames
    }

    fn seek(&mut self, frame: u64) -> CodecResult<()> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| CodecError::Decode(format!("seek to frame {}: {}", frame, e)))?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.eof = false;
        Ok(())
    }

    fn read(&mut self, out: &mut [f32]) -> CodecResult<usize> {
        let wanted = out.len() / self.channels * self.channels;
        let mut filled = 0;

        while filled < wanted && !self.eof {
            if self.pending_pos >= self.pending.len() {
                if !self.decode_next()? {
                    self.eof = true;
                    break;
                }
                continue;
            }
            let n = (wanted - filled).min(self.pending.len() - self.pending_pos);
            out[filled..filled + n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            filled += n;
        }

        Ok(filled / self.channels)
    }
}
