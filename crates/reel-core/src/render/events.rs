//! Render progress events
//!
//! Sent from the render thread over a crossbeam channel:
//!
//! Started → Progress… → [Clipped] → PassComplete → (second pass) → Complete / Cancelled / Failed

use std::path::PathBuf;
use std::time::Duration;

/// Result of a finished export
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub channels: usize,
    pub sample_rate: u32,
    /// Peak of the written output
    pub peak: f32,
    /// Normalization gain applied to the written pass
    pub gain: f32,
    /// Some pass went above full scale
    pub clipped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Started {
        path: PathBuf,
        total_frames: u64,
        passes: u8,
    },

    /// Sent only when the whole percentage grows
    Progress {
        frames_rendered: u64,
        total_frames: u64,
        pass: u8,
    },

    /// A pass produced samples above full scale. The render carries on.
    Clipped { peak: f32, pass: u8 },

    PassComplete { pass: u8, peak: f32, rms: f32 },

    Complete { summary: RenderSummary, duration: Duration },

    Cancelled,

    Failed { error: String },
}

impl RenderEvent {
    /// Get a human-readable description of this event
    pub fn description(&self) -> String {
        match self {
            Self::Started { path, passes, .. } => {
                if *passes > 1 {
                    format!("Exporting {} (normalizing, {} passes)", path.display(), passes)
                } else {
                    format!("Exporting {}", path.display())
                }
            }
            Self::Progress {
                frames_rendered,
                total_frames,
                pass,
            } => format!(
                "Pass {}: {}%",
                pass,
                percent(*frames_rendered, *total_frames)
            ),
            Self::Clipped { peak, pass } => format!(
                "Pass {} clipped (peak {:.1} dBFS); lower the input gain or normalize",
                pass,
                20.0 * peak.log10()
            ),
            Self::PassComplete { pass, peak, .. } => {
                format!("Pass {} done, peak {:.1} dBFS", pass, 20.0 * peak.max(1e-9).log10())
            }
            Self::Complete { summary, duration } => format!(
                "Export complete: {} ({:.1}s of audio in {:.1}s)",
                summary.path.display(),
                summary.frames as f64 / summary.sample_rate as f64,
                duration.as_secs_f64()
            ),
            Self::Cancelled => "Export cancelled".to_string(),
            Self::Failed { error } => format!("Export failed: {}", error),
        }
    }

    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Cancelled | Self::Failed { .. })
    }

    /// Progress of the current pass (0.0 to 1.0)
    pub fn progress_fraction(&self) -> Option<f32> {
        match self {
            Self::Started { .. } => Some(0.0),
            Self::Progress {
                frames_rendered,
                total_frames,
                ..
            } => Some(*frames_rendered as f32 / (*total_frames).max(1) as f32),
            Self::Complete { .. } => Some(1.0),
            _ => None,
        }
    }
}

pub(crate) fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        done.saturating_mul(100) / total
    }
}

impl std::fmt::Display for RenderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}
