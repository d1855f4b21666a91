//! Offline render loop
//!
//! The same pull/push path as the realtime engine without a hardware clock:
//! each block pulls from every input's [`ReadSource`] (filled synchronously),
//! mixes onto the master bus and pushes to the export [`WriteSource`].
//!
//! With normalization enabled, pass one only measures; pass two re-renders
//! with gain `target / peak`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::Sender;

use super::error::{RenderError, RenderResult};
use super::events::{percent, RenderEvent, RenderSummary};
use super::spec::{ExportSpec, RenderInput};
use crate::ring::RtCell;
use crate::stream::{FillStatus, PlaybackStream, ReadSource, StreamError, WriteSource};

/// Source prebuffer, in blocks
const PREBUFFER_BLOCKS: usize = 4;
/// Export ring, in blocks
const WRITE_BUFFER_BLOCKS: usize = 2;

struct Track {
    source: ReadSource,
    stream: Arc<RtCell<PlaybackStream>>,
    offset: u64,
    gain: f32,
    channels: usize,
}

impl Track {
    /// Position at timeline frame `timeline` and drop anything buffered
    fn rewind(&mut self, timeline: u64) -> RenderResult<()> {
        self.source.seek(timeline.saturating_sub(self.offset));
        self.source.fill_step()?;
        // Empty read applies the seek fence
        self.stream.borrow_mut_blocking().read(&mut []);
        Ok(())
    }

    /// Fill until `out` can be satisfied (or the file ends), then read
    fn pull(&mut self, out: &mut [f32]) -> RenderResult<usize> {
        let wanted = out.len() / self.channels;
        let mut stream = self.stream.borrow_mut_blocking();
        while stream.buffered_frames() < wanted {
            match self.source.fill_step()? {
                FillStatus::Filled(_) => {}
                FillStatus::Full | FillStatus::EndOfFile => break,
            }
        }
        Ok(stream.read(out).frames)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PassStats {
    peak: f32,
    sum_squares: f64,
    samples: u64,
}

impl PassStats {
    fn measure(&mut self, block: &[f32]) {
        for s in block {
            self.peak = self.peak.max(s.abs());
            self.sum_squares += (*s as f64) * (*s as f64);
        }
        self.samples += block.len() as u64;
    }

    fn rms(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            (self.sum_squares / self.samples as f64).sqrt() as f32
        }
    }
}

/// One export job
pub struct Renderer {
    spec: ExportSpec,
    tracks: Vec<Track>,
    start: u64,
    end: u64,
    mix: Vec<f32>,
    scratch: Vec<f32>,
    cancel: Arc<AtomicBool>,
}

impl Renderer {
    /// Validate `spec` against `inputs` and prepare the sources
    pub fn new(spec: ExportSpec, inputs: Vec<RenderInput>) -> RenderResult<Self> {
        spec.validate()?;
        if inputs.is_empty() {
            return Err(RenderError::NothingToExport);
        }

        let prebuffer_secs = (spec.block_size * PREBUFFER_BLOCKS) as f32 / spec.sample_rate as f32;
        let mut tracks = Vec::with_capacity(inputs.len());
        let mut longest = 0u64;
        let mut unknown = None;
        for input in inputs {
            let source = ReadSource::new(input.name, input.reader, prebuffer_secs, spec.sample_rate)?;
            match source.frames() {
                Some(frames) => longest = longest.max(input.offset + frames),
                None => {
                    unknown.get_or_insert_with(|| source.name().to_string());
                }
            }
            tracks.push(Track {
                stream: source.stream(),
                channels: source.channels(),
                source,
                offset: input.offset,
                gain: input.gain,
            });
        }

        let range = match spec.range.clone() {
            Some(range) => range,
            None => match unknown {
                Some(name) => return Err(RenderError::UnknownLength { name }),
                None => 0..longest,
            },
        };
        if range.start >= range.end {
            return Err(RenderError::NothingToExport);
        }

        let widest = tracks.iter().map(|t| t.channels).max().unwrap_or(1);
        Ok(Self {
            mix: vec![0.0; spec.block_size * spec.channels],
            scratch: vec![0.0; spec.block_size * widest],
            start: range.start,
            end: range.end,
            spec,
            tracks,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share an external cancel flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Setting the flag stops the render at the next block
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn total_frames(&self) -> u64 {
        self.end - self.start
    }

    /// Render to completion, reporting on `events`
    ///
    /// The terminal event (Complete, Cancelled or Failed) is always sent.
    /// A cancelled or failed export leaves the partial file in place.
    pub fn run(mut self, events: &Sender<RenderEvent>) -> RenderResult<RenderSummary> {
        let started = Instant::now();
        let _ = events.send(RenderEvent::Started {
            path: self.spec.path.clone(),
            total_frames: self.total_frames(),
            passes: self.spec.passes(),
        });

        let result = self.render(events);
        match &result {
            Ok(summary) => {
                log::info!(
                    "Exported {} ({} frames, gain {:.3}) in {:.1}s",
                    summary.path.display(),
                    summary.frames,
                    summary.gain,
                    started.elapsed().as_secs_f64()
                );
                let _ = events.send(RenderEvent::Complete {
                    summary: summary.clone(),
                    duration: started.elapsed(),
                });
            }
            Err(RenderError::Cancelled) => {
                log::info!("Export of {} cancelled", self.spec.path.display());
                let _ = events.send(RenderEvent::Cancelled);
            }
            Err(e) => {
                log::error!("Export of {} failed: {}", self.spec.path.display(), e);
                let _ = events.send(RenderEvent::Failed { error: e.to_string() });
            }
        }
        result
    }

    fn render(&mut self, events: &Sender<RenderEvent>) -> RenderResult<RenderSummary> {
        // Created first so an unwritable destination fails before the measuring pass
        let buffer_secs = (self.spec.block_size * WRITE_BUFFER_BLOCKS) as f32 / self.spec.sample_rate as f32;
        let mut writer = WriteSource::create(&self.spec.path, self.spec.write_spec(), buffer_secs)?;

        let mut clipped = false;
        let mut gain = 1.0;
        if let Some(target) = self.spec.normalize_peak() {
            let stats = self.run_pass(1, 1.0, None, events)?;
            clipped |= report_pass(1, &stats, events);
            if stats.peak > 0.0 {
                gain = target / stats.peak;
            }
            log::debug!("Normalization: peak {:.4}, gain {:.4}", stats.peak, gain);
        }

        let pass = self.spec.passes();
        let stats = self.run_pass(pass, gain, Some(&mut writer), events)?;
        clipped |= report_pass(pass, &stats, events);

        let take = writer.finish()?;
        Ok(RenderSummary {
            path: take.path,
            frames: take.frames,
            channels: take.channels,
            sample_rate: take.sample_rate,
            peak: stats.peak,
            gain,
            clipped,
        })
    }

    fn run_pass(
        &mut self,
        pass: u8,
        gain: f32,
        mut writer: Option<&mut WriteSource>,
        events: &Sender<RenderEvent>,
    ) -> RenderResult<PassStats> {
        let start = self.start;
        for track in self.tracks.iter_mut() {
            track.rewind(start)?;
        }

        let total = self.total_frames();
        let channels = self.spec.channels;
        let mut stats = PassStats::default();
        let mut last_percent = 0;
        let mut pos = self.start;

        while pos < self.end {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(RenderError::Cancelled);
            }

            let frames = (self.end - pos).min(self.spec.block_size as u64) as usize;
            self.mix_block(pos, frames)?;

            let block = &mut self.mix[..frames * channels];
            if gain != 1.0 {
                block.iter_mut().for_each(|s| *s *= gain);
            }
            stats.measure(block);
            if let Some(writer) = writer.as_deref_mut() {
                push(writer, block)?;
            }

            pos += frames as u64;
            let rendered = pos - self.start;
            let pct = percent(rendered, total);
            if pct > last_percent {
                last_percent = pct;
                let _ = events.send(RenderEvent::Progress {
                    frames_rendered: rendered,
                    total_frames: total,
                    pass,
                });
            }
        }
        Ok(stats)
    }

    /// Sum every input covering `pos..pos + frames` into the mix buffer
    fn mix_block(&mut self, pos: u64, frames: usize) -> RenderResult<()> {
        let outputs = self.spec.channels;
        let mix = &mut self.mix[..frames * outputs];
        mix.fill(0.0);

        for track in self.tracks.iter_mut() {
            if pos + frames as u64 <= track.offset {
                continue;
            }
            // Silence until the input starts
            let lead = track.offset.saturating_sub(pos) as usize;
            let inputs = track.channels;
            let input = &mut self.scratch[..(frames - lead) * inputs];
            let got = track.pull(input)?;

            for (i, frame) in input[..got * inputs].chunks_exact(inputs).enumerate() {
                let at = (lead + i) * outputs;
                let out = &mut mix[at..at + outputs];
                if inputs == 1 {
                    let s = frame[0] * track.gain;
                    out.iter_mut().for_each(|o| *o += s);
                } else {
                    // Surplus input channels fold onto the available outputs
                    for (c, s) in frame.iter().enumerate() {
                        out[c % outputs] += s * track.gain;
                    }
                }
            }
        }
        Ok(())
    }
}

fn report_pass(pass: u8, stats: &PassStats, events: &Sender<RenderEvent>) -> bool {
    let clipped = stats.peak > 1.0;
    if clipped {
        log::warn!("Render pass {} clipped, peak {:.3}", pass, stats.peak);
        let _ = events.send(RenderEvent::Clipped { peak: stats.peak, pass });
    }
    let _ = events.send(RenderEvent::PassComplete {
        pass,
        peak: stats.peak,
        rms: stats.rms(),
    });
    clipped
}

/// Queue `block` on the export ring, draining to the encoder as it fills
fn push(writer: &mut WriteSource, block: &[f32]) -> RenderResult<()> {
    let stream = writer.stream();
    let channels = writer.channels();
    let mut offset = 0;
    while offset < block.len() {
        let frames = stream.borrow_mut_blocking().write(&block[offset..]);
        offset += frames * channels;
        let drained = writer.drain_step()?;
        if frames == 0 && drained == 0 {
            return Err(StreamError::Failed {
                path: writer.path().to_path_buf(),
            }
            .into());
        }
    }
    Ok(())
}
