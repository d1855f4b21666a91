//! Disk-backed streaming sources
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  fill_step()  ┌──────────────┐  read()   ┌──────────────┐
//!  │  Decoder   │──────────────►│  Read ring   │──────────►│  RT thread   │
//!  └────────────┘               └──────────────┘           │ (bus table)  │
//!                                                          │              │
//!  ┌────────────┐  drain_step() ┌──────────────┐  write()  │              │
//!  │  Encoder   │◄──────────────│  Write ring  │◄──────────│              │
//!  └────────────┘               └──────────────┘           └──────────────┘
//!        ▲                             ▲
//!        └──────── disk-io thread ─────┘
//! ```
//!
//! Each source splits into a fill/drain side owned by the [`DiskIo`] thread
//! and a realtime side ([`PlaybackStream`] / [`CaptureStream`]) held by the
//! device's bus table.

mod disk_io;
mod error;
mod read_source;
mod write_source;

pub use disk_io::DiskIo;
pub use error::{StreamError, StreamResult};
pub use read_source::{FillStatus, PlaybackStream, ReadResult, ReadSource, ReadStatus, SeekHandle};
pub use write_source::{CaptureStream, TakeInfo, WriteSource};
