//! Core types shared across the engine

use serde::{Deserialize, Serialize};

/// Sample type used everywhere inside an open session
pub type Sample = f32;

/// Sample rates the engine accepts. Anything else is a configuration error.
pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [22050, 32000, 44100, 48000, 88200, 96000];

/// Largest period the drivers pre-allocate port buffers for (frames)
pub const MAX_PERIOD_FRAMES: usize = 8192;

/// Check a rate against [`SUPPORTED_SAMPLE_RATES`]
pub fn is_supported_rate(rate: u32) -> bool {
    SUPPORTED_SAMPLE_RATES.contains(&rate)
}

/// Identifier of a bus in the device's registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusId(pub u32);

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bus#{}", self.0)
    }
}

/// Direction of a bus relative to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusRole {
    /// Hardware inputs → recording
    Capture,
    /// File playback → hardware outputs
    Playback,
}

/// Per-channel (non-interleaved) port buffers handed to the process callback
///
/// Storage is allocated once for `MAX_PERIOD_FRAMES` per channel; each period
/// only changes the visible length.
#[derive(Debug, Clone)]
pub struct PortBuffers {
    data: Vec<Sample>,
    channels: usize,
    frames: usize,
    capacity: usize,
}

impl PortBuffers {
    pub fn new(channels: usize, max_frames: usize) -> Self {
        Self {
            data: vec![0.0; channels * max_frames],
            channels,
            frames: 0,
            capacity: max_frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames in the current period
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Set the visible period length (RT-safe, no allocation). Clamped to capacity.
    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity);
    }

    pub fn channel(&self, channel: usize) -> &[Sample] {
        let start = channel * self.capacity;
        &self.data[start..start + self.frames]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [Sample] {
        let start = channel * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    /// Zero the visible part of every channel
    pub fn silence(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Scatter an interleaved block with `src_channels` channels into the ports.
    /// Ports without a source channel are zeroed.
    pub fn deinterleave_from(&mut self, interleaved: &[Sample], src_channels: usize) {
        let frames = self.frames;
        for ch in 0..self.channels {
            let out = self.channel_mut(ch);
            if ch < src_channels {
                for (i, s) in out.iter_mut().enumerate().take(frames) {
                    *s = interleaved.get(i * src_channels + ch).copied().unwrap_or(0.0);
                }
            } else {
                out.fill(0.0);
            }
        }
    }

    /// Gather the ports into an interleaved block with `dst_channels` channels.
    /// Destination channels without a port are zeroed.
    pub fn interleave_into(&self, interleaved: &mut [Sample], dst_channels: usize) {
        for (i, frame) in interleaved
            .chunks_mut(dst_channels)
            .take(self.frames)
            .enumerate()
        {
            for (ch, s) in frame.iter_mut().enumerate() {
                *s = if ch < self.channels {
                    self.data[ch * self.capacity + i]
                } else {
                    0.0
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_rates() {
        assert!(is_supported_rate(48000));
        assert!(is_supported_rate(22050));
        assert!(!is_supported_rate(192000));
        assert!(!is_supported_rate(0));
    }

    #[test]
    fn test_port_buffers_interleave() {
        let mut ports = PortBuffers::new(2, 16);
        ports.set_frames(3);
        ports.deinterleave_from(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2);
        assert_eq!(ports.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(ports.channel(1), &[-1.0, -2.0, -3.0]);

        let mut out = [9.0f32; 9];
        ports.interleave_into(&mut out, 3);
        assert_eq!(out, [1.0, -1.0, 0.0, 2.0, -2.0, 0.0, 3.0, -3.0, 0.0]);
    }

    #[test]
    fn test_port_buffers_clamp_to_capacity() {
        let mut ports = PortBuffers::new(1, 8);
        ports.set_frames(100);
        assert_eq!(ports.frames(), 8);
        assert_eq!(ports.channel(0).len(), 8);
    }
}
