//! Codec error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by file readers and writers
#[derive(Error, Debug)]
pub enum CodecError {
    /// File could not be opened or created
    #[error("Cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// WAV encode/decode failure
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Compressed format decode failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Format or layout the engine cannot handle
    #[error("Unsupported audio file: {0}")]
    Unsupported(String),

    /// Sample rate conversion failure
    #[error("Resampler error: {0}")]
    Resample(String),
}

impl CodecError {
    /// True for errors caused by the file system (permissions, missing directory)
    pub fn is_io(&self) -> bool {
        match self {
            CodecError::Open { .. } => true,
            CodecError::Wav(hound::Error::IoError(_)) => true,
            _ => false,
        }
    }
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
