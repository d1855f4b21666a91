//! Background export service
//!
//! Runs one [`Renderer`] at a time on a named thread and streams its
//! [`RenderEvent`]s back over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use super::error::{RenderError, RenderResult};
use super::events::RenderEvent;
use super::renderer::Renderer;
use super::spec::{ExportSpec, RenderInput};

pub struct RenderService {
    /// Cancellation flag shared with the running job
    cancel_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RenderService {
    pub fn new() -> Self {
        Self {
            cancel_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Validate and start an export
    ///
    /// Validation errors are returned here; everything after that arrives on
    /// the returned receiver, ending with a terminal event.
    pub fn start(&mut self, spec: ExportSpec, inputs: Vec<RenderInput>) -> RenderResult<Receiver<RenderEvent>> {
        if self.is_running() {
            return Err(RenderError::Busy);
        }
        self.wait();

        // Reset cancellation flag
        self.cancel_flag.store(false, Ordering::SeqCst);
        let renderer = Renderer::new(spec, inputs)?.with_cancel_flag(self.cancel_flag.clone());

        let (tx, rx) = channel::unbounded();
        let handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                // Outcome is reported on the channel
                let _ = renderer.run(&tx);
            })
            .map_err(RenderError::Spawn)?;
        self.handle = Some(handle);
        Ok(rx)
    }

    /// Ask the running export to stop after the current block
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Block until the current export (if any) has finished
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Render thread panicked");
            }
        }
    }
}

impl Default for RenderService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RenderService {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MemoryReader;
    use std::time::Duration;
    use tempfile::TempDir;

    fn long_input() -> RenderInput {
        RenderInput::new("long", Box::new(MemoryReader::sine(220.0, 0.5, 30.0, 48000, 2)))
    }

    #[test]
    fn test_background_export_completes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bg.wav");
        let mut service = RenderService::new();

        let input = RenderInput::new("short", Box::new(MemoryReader::sine(220.0, 0.5, 0.5, 48000, 1)));
        let rx = service.start(ExportSpec::new(&path, 2, 48000), vec![input]).unwrap();

        let events: Vec<_> = rx.iter().take_while(|e| !e.is_terminal()).collect();
        assert!(matches!(events.first(), Some(RenderEvent::Started { passes: 1, .. })));
        service.wait();
        assert!(!service.is_running());
        assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 24000);
    }

    #[test]
    fn test_cancel_and_busy() {
        let temp = TempDir::new().unwrap();
        let mut service = RenderService::new();
        let spec = ExportSpec::new(temp.path().join("long.wav"), 2, 48000).with_block_size(64);
        let rx = service.start(spec, vec![long_input()]).unwrap();

        // Wait for the render to get going
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, RenderEvent::Started { .. }));
        if service.is_running() {
            let again = ExportSpec::new(temp.path().join("other.wav"), 2, 48000);
            assert!(matches!(service.start(again, vec![long_input()]), Err(RenderError::Busy)));
        }

        service.cancel();
        let last = rx.iter().find(|e| e.is_terminal()).unwrap();
        assert!(matches!(last, RenderEvent::Cancelled | RenderEvent::Complete { .. }));
    }

    #[test]
    fn test_validation_error_returned_synchronously() {
        let temp = TempDir::new().unwrap();
        let mut service = RenderService::new();
        let result = service.start(ExportSpec::new(temp.path().join("none.wav"), 2, 48000), Vec::new());
        assert!(matches!(result, Err(RenderError::NothingToExport)));
        assert!(!service.is_running());
    }
}
