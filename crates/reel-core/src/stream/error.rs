//! Stream error types

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::ErrorClass;
use crate::codec::CodecError;
use crate::types::BusId;

/// Errors from streaming sources and the disk thread
///
/// Every variant names the file it concerns so it can be shown to the user
/// as-is.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Destination could not be created (missing directory, permissions)
    #[error("Cannot record to {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// Decoder failed while filling a playback source
    #[error("Cannot read {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: CodecError,
    },

    /// Encoder failed while draining a take
    #[error("Write to {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// Header could not be finalized; the take may be truncated
    #[error("Could not finalize {}: {source}", path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// Take stopped accepting frames after an earlier write error
    #[error("Recording to {} failed earlier; take is incomplete", path.display())]
    Failed { path: PathBuf },

    /// Source rate differs from the session rate
    #[error("{name} is {file_rate}Hz but the session runs at {session_rate}Hz")]
    RateMismatch {
        name: String,
        file_rate: u32,
        session_rate: u32,
    },

    /// No take is being recorded on this bus
    #[error("No recording on {0}")]
    NoWriter(BusId),

    /// Disk thread has exited
    #[error("Disk I/O thread is not running")]
    DiskThreadGone,
}

impl StreamError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StreamError::RateMismatch { .. } | StreamError::NoWriter(_) => ErrorClass::Configuration,
            StreamError::DiskThreadGone => ErrorClass::Fatal,
            _ => ErrorClass::Io,
        }
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
