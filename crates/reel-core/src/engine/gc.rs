//! RT-safe deferred deallocation
//!
//! A global `basedrop` collector lives on the "audio-gc" thread. Bus tables
//! are published to the realtime thread as `Shared<T>`; when the realtime
//! thread drops the last reference to an old table, the free is queued for
//! this thread instead of happening inside the callback.
//!
//! ## Usage
//!
//! ```ignore
//! use basedrop::{Shared, SharedCell};
//! use crate::engine::gc::gc_handle;
//!
//! let cell = SharedCell::new(Shared::new(&gc_handle(), BusTable::default()));
//! cell.set(Shared::new(&gc_handle(), next_table)); // old table freed on audio-gc
//! ```

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// Global handle for creating `Shared<T>` allocations
static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Collection interval. Bus tables are small; this only bounds memory lag.
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new().name("audio-gc".to_string()).spawn(move || {
        // Collector is !Sync, so it is created on the thread that runs it
        let mut collector = Collector::new();
        if tx.send(collector.handle()).is_err() {
            return;
        }
        log::info!("Audio GC thread started");

        loop {
            collector.collect();
            thread::sleep(COLLECT_INTERVAL);
        }
    });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            // No collector thread: deferred drops are leaked rather than freed on the RT thread
            log::error!("Could not start audio GC thread; retired bus tables will not be freed");
            let collector: &'static mut Collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for creating `Shared<T>` allocations. Cheap to clone.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
