//! Dither for bit-depth reduction

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Noise added before quantising float samples to integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DitherMode {
    /// Plain rounding
    #[default]
    None,
    /// Rectangular PDF noise, ±½ LSB
    Rectangular,
    /// Triangular PDF noise, ±1 LSB
    Triangular,
    /// Triangular noise with first-order error feedback
    Shaped,
}

/// Stateful quantiser applying a [`DitherMode`]
///
/// One instance per output stream; shaped dither keeps the previous error.
#[derive(Debug, Clone)]
pub struct Ditherer {
    mode: DitherMode,
    rng: StdRng,
    error: f32,
}

impl Ditherer {
    pub fn new(mode: DitherMode, seed: u64) -> Self {
        Self {
            mode,
            rng: StdRng::seed_from_u64(seed),
            error: 0.0,
        }
    }

    pub fn mode(&self) -> DitherMode {
        self.mode
    }

    fn tpdf(&mut self) -> f32 {
        let a: f32 = self.rng.gen();
        let b: f32 = self.rng.gen();
        a - b
    }

    /// Quantise `sample` (nominal ±1.0) to a signed integer of `bits` bits
    pub fn quantize(&mut self, sample: f32, bits: u32) -> i32 {
        let max = ((1i64 << (bits - 1)) - 1) as f32;
        let lsb = 1.0 / max;

        let value = match self.mode {
            DitherMode::None => sample,
            DitherMode::Rectangular => sample + (self.rng.gen::<f32>() - 0.5) * lsb,
            DitherMode::Triangular => sample + self.tpdf() * lsb,
            DitherMode::Shaped => {
                let target = sample - self.error;
                let noisy = target + self.tpdf() * lsb;
                let q = (noisy * max).round().clamp(-max, max);
                self.error = q / max - target;
                return q as i32;
            }
        };

        (value * max).round().clamp(-max, max) as i32
    }

    pub fn quantize_i16(&mut self, sample: f32) -> i16 {
        self.quantize(sample, 16) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_dither_is_plain_rounding() {
        let mut d = Ditherer::new(DitherMode::None, 1);
        assert_eq!(d.quantize(0.0, 16), 0);
        assert_eq!(d.quantize(1.0, 16), 32767);
        assert_eq!(d.quantize(-1.0, 16), -32767);
        assert_eq!(d.quantize(2.0, 16), 32767);
    }

    #[test]
    fn test_triangular_stays_within_one_lsb() {
        let mut d = Ditherer::new(DitherMode::Triangular, 7);
        let exact = 0.25f32 * 32767.0;
        for _ in 0..1000 {
            let q = d.quantize(0.25, 16) as f32;
            assert!((q - exact).abs() <= 2.0, "q={q}");
        }
    }

    #[test]
    fn test_shaped_dither_tracks_signal_mean() {
        let mut d = Ditherer::new(DitherMode::Shaped, 3);
        let n = 10_000;
        let sum: i64 = (0..n).map(|_| d.quantize(0.1, 16) as i64).sum();
        let mean = sum as f32 / n as f32;
        assert!((mean - 0.1 * 32767.0).abs() < 1.0, "mean={mean}");
    }
}
