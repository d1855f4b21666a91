//! Offline render and export
//!
//! Mixes file inputs placed on a timeline into one export file without a
//! hardware clock. Optional two-pass normalization measures the peak first,
//! then re-renders at `target / peak`.
//!
//! ```no_run
//! use reel_core::render::{ExportSpec, RenderInput, RenderService};
//!
//! let mut service = RenderService::new();
//! let spec = ExportSpec::new("mixdown.wav", 2, 48000).with_normalize(-1.0);
//! let inputs = vec![RenderInput::open("drums.wav".as_ref(), 48000)?];
//! for event in service.start(spec, inputs)? {
//!     println!("{}", event);
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok::<(), reel_core::render::RenderError>(())
//! ```

mod error;
mod events;
mod renderer;
mod service;
mod spec;

pub use error::{RenderError, RenderResult};
pub use events::{RenderEvent, RenderSummary};
pub use renderer::Renderer;
pub use service::RenderService;
pub use spec::{ExportSpec, RenderInput, DEFAULT_BLOCK_SIZE};
