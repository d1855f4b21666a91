//! Underrun storm detection
//!
//! Each bus keeps the timestamps of its most recent underruns on the session
//! sample clock. A storm is `threshold` underruns within `window` frames.
//! Fixed-size storage: safe to update from the realtime thread.

/// Largest threshold the detector can track
pub const MAX_STORM_THRESHOLD: usize = 64;

#[derive(Debug, Clone)]
pub struct StormDetector {
    history: [u64; MAX_STORM_THRESHOLD],
    /// Next slot to overwrite (oldest entry once full)
    head: usize,
    len: usize,
    threshold: usize,
    window_frames: u64,
}

impl StormDetector {
    /// `threshold` of 0 disables detection
    pub fn new(threshold: u32, window_secs: f32, sample_rate: u32) -> Self {
        let mut detector = Self {
            history: [0; MAX_STORM_THRESHOLD],
            head: 0,
            len: 0,
            threshold: 0,
            window_frames: 0,
        };
        detector.configure(threshold, window_secs, sample_rate);
        detector
    }

    /// Change parameters and forget history
    pub fn configure(&mut self, threshold: u32, window_secs: f32, sample_rate: u32) {
        self.threshold = (threshold as usize).min(MAX_STORM_THRESHOLD);
        self.window_frames = (window_secs.max(0.0) as f64 * sample_rate as f64) as u64;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Record an underrun at session frame `now`; true if it completes a storm
    pub fn record(&mut self, now: u64) -> bool {
        if self.threshold == 0 {
            return false;
        }

        self.history[self.head] = now;
        self.head = (self.head + 1) % self.threshold;
        self.len = (self.len + 1).min(self.threshold);

        if self.len < self.threshold {
            return false;
        }
        // Full: the slot at `head` holds the oldest of the last `threshold`
        let oldest = self.history[self.head];
        now.saturating_sub(oldest) <= self.window_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48000;

    #[test]
    fn test_threshold_within_window_triggers() {
        let mut detector = StormDetector::new(5, 2.0, RATE);
        let period = 512;
        for i in 0..4 {
            assert!(!detector.record(i * period));
        }
        assert!(detector.record(4 * period));
    }

    #[test]
    fn test_one_below_threshold_does_not_trigger() {
        let mut detector = StormDetector::new(5, 2.0, RATE);
        for i in 0..4 {
            assert!(!detector.record(i * 1000));
        }
    }

    #[test]
    fn test_spread_out_underruns_do_not_trigger() {
        let mut detector = StormDetector::new(5, 2.0, RATE);
        // One underrun per second: never five inside two seconds
        for i in 0..20u64 {
            assert!(!detector.record(i * RATE as u64));
        }
    }

    #[test]
    fn test_old_entries_age_out() {
        let mut detector = StormDetector::new(3, 1.0, 1000);
        assert!(!detector.record(0));
        assert!(!detector.record(100));
        assert!(!detector.record(5000));
        assert!(!detector.record(5100));
        assert!(detector.record(5200));
    }

    #[test]
    fn test_disabled_and_reset() {
        let mut disabled = StormDetector::new(0, 2.0, RATE);
        assert!((0..100).all(|i| !disabled.record(i)));

        let mut detector = StormDetector::new(2, 2.0, RATE);
        assert!(!detector.record(0));
        detector.reset();
        assert!(!detector.record(1));
        assert!(detector.record(2));
    }
}
