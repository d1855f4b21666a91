//! Render error types

use thiserror::Error;

use crate::audio::ErrorClass;
use crate::stream::StreamError;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Empty range, or no input covers it
    #[error("No audio to export")]
    NothingToExport,

    #[error("Export start frame {start} is beyond the end frame {end}")]
    StartBeyondEnd { start: u64, end: u64 },

    #[error("Export needs at least one output channel")]
    NoChannels,

    #[error("Block size must be at least one frame")]
    InvalidBlockSize,

    /// Normalization can only bring the peak up to full scale
    #[error("Normalize target {db} dBFS is above full scale")]
    NormalizeAboveFullScale { db: f32 },

    /// Input length is not known and no explicit range was given
    #[error("{name}: length unknown; give an explicit export range")]
    UnknownLength { name: String },

    /// A render is already running on this service
    #[error("An export is already running")]
    Busy,

    #[error("Export cancelled")]
    Cancelled,

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl RenderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RenderError::NothingToExport
            | RenderError::StartBeyondEnd { .. }
            | RenderError::NoChannels
            | RenderError::InvalidBlockSize
            | RenderError::NormalizeAboveFullScale { .. }
            | RenderError::UnknownLength { .. } => ErrorClass::Configuration,
            RenderError::Busy => ErrorClass::Contention,
            RenderError::Cancelled => ErrorClass::Runtime,
            RenderError::Stream(e) => e.class(),
            RenderError::Spawn(_) => ErrorClass::Fatal,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
