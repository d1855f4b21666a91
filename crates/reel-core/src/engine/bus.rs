//! Bus registry and the realtime bus table
//!
//! The registry is mutated only from control threads. Every mutation builds a
//! fresh immutable [`BusTable`] and publishes it through a `SharedCell`; the
//! process callback takes a snapshot with `get()` each period and never sees
//! a half-edited table. Retired tables are freed on the audio-gc thread.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use basedrop::{Shared, SharedCell};

use super::gc::gc_handle;
use super::storm::StormDetector;
use crate::ring::RtCell;
use crate::stream::{CaptureStream, PlaybackStream, SeekHandle};
use crate::types::{BusId, BusRole};

/// Largest channel count a bus may have
pub const MAX_BUS_CHANNELS: usize = 32;

/// Per-bus counters readable from any thread
#[derive(Debug, Default)]
pub struct BusCounters {
    pub underruns: AtomicU64,
}

/// Realtime view of one bus
#[derive(Clone)]
pub(crate) struct RtBus {
    pub id: BusId,
    pub role: BusRole,
    pub channels: usize,
    pub ports: Vec<usize>,
    pub playback: Option<Arc<RtCell<PlaybackStream>>>,
    pub capture: Option<Arc<RtCell<CaptureStream>>>,
    pub counters: Arc<BusCounters>,
    pub storm: Arc<RtCell<StormDetector>>,
}

/// Immutable snapshot read by the process callback
#[derive(Clone, Default)]
pub(crate) struct BusTable {
    pub buses: Vec<RtBus>,
}

/// Registry record of a bus
struct Bus {
    rt: RtBus,
    name: String,
    seek: Option<SeekHandle>,
    source_name: Option<String>,
    recording: Option<PathBuf>,
}

/// Snapshot of a bus for callers
#[derive(Debug, Clone, PartialEq)]
pub struct BusInfo {
    pub id: BusId,
    pub name: String,
    pub role: BusRole,
    pub channels: usize,
    pub ports: Vec<usize>,
    /// Name of the attached playback source
    pub source: Option<String>,
    /// Path of the take being recorded
    pub recording: Option<PathBuf>,
    pub underruns: u64,
}

pub(crate) struct BusRegistry {
    buses: BTreeMap<BusId, Bus>,
    next_id: u32,
    table: Arc<SharedCell<BusTable>>,
}

impl BusRegistry {
    pub fn new() -> Self {
        Self {
            buses: BTreeMap::new(),
            next_id: 1,
            table: Arc::new(SharedCell::new(Shared::new(&gc_handle(), BusTable::default()))),
        }
    }

    /// Cell the process callback reads
    pub fn table(&self) -> Arc<SharedCell<BusTable>> {
        self.table.clone()
    }

    pub fn create(&mut self, name: &str, role: BusRole, channels: usize, storm: StormDetector) -> BusId {
        let id = BusId(self.next_id);
        self.next_id += 1;
        self.buses.insert(
            id,
            Bus {
                rt: RtBus {
                    id,
                    role,
                    channels,
                    ports: Vec::new(),
                    playback: None,
                    capture: None,
                    counters: Arc::new(BusCounters::default()),
                    storm: Arc::new(RtCell::new(storm)),
                },
                name: name.to_string(),
                seek: None,
                source_name: None,
                recording: None,
            },
        );
        self.publish();
        id
    }

    pub fn remove(&mut self, id: BusId) -> Option<BusRole> {
        let bus = self.buses.remove(&id)?;
        self.publish();
        Some(bus.rt.role)
    }

    pub fn role(&self, id: BusId) -> Option<BusRole> {
        self.buses.get(&id).map(|b| b.rt.role)
    }

    pub fn channels(&self, id: BusId) -> Option<usize> {
        self.buses.get(&id).map(|b| b.rt.channels)
    }

    pub fn is_recording(&self, id: BusId) -> bool {
        self.buses.get(&id).is_some_and(|b| b.rt.capture.is_some())
    }

    pub fn set_ports(&mut self, id: BusId, ports: Vec<usize>) {
        if let Some(bus) = self.buses.get_mut(&id) {
            bus.rt.ports = ports;
            self.publish();
        }
    }

    pub fn set_playback(
        &mut self,
        id: BusId,
        stream: Option<(Arc<RtCell<PlaybackStream>>, SeekHandle, String)>,
    ) {
        if let Some(bus) = self.buses.get_mut(&id) {
            match stream {
                Some((stream, seek, name)) => {
                    bus.rt.playback = Some(stream);
                    bus.seek = Some(seek);
                    bus.source_name = Some(name);
                }
                None => {
                    bus.rt.playback = None;
                    bus.seek = None;
                    bus.source_name = None;
                }
            }
            self.publish();
        }
    }

    pub fn set_capture(&mut self, id: BusId, stream: Option<(Arc<RtCell<CaptureStream>>, PathBuf)>) {
        if let Some(bus) = self.buses.get_mut(&id) {
            match stream {
                Some((stream, path)) => {
                    bus.rt.capture = Some(stream);
                    bus.recording = Some(path);
                }
                None => {
                    bus.rt.capture = None;
                    bus.recording = None;
                }
            }
            self.publish();
        }
    }

    pub fn seek_handle(&self, id: BusId) -> Option<&SeekHandle> {
        self.buses.get(&id).and_then(|b| b.seek.as_ref())
    }

    pub fn underruns(&self, id: BusId) -> Option<u64> {
        self.buses
            .get(&id)
            .map(|b| b.rt.counters.underruns.load(Ordering::Relaxed))
    }

    pub fn info(&self, id: BusId) -> Option<BusInfo> {
        self.buses.get(&id).map(|bus| BusInfo {
            id,
            name: bus.name.clone(),
            role: bus.rt.role,
            channels: bus.rt.channels,
            ports: bus.rt.ports.clone(),
            source: bus.source_name.clone(),
            recording: bus.recording.clone(),
            underruns: bus.rt.counters.underruns.load(Ordering::Relaxed),
        })
    }

    pub fn ids(&self) -> Vec<BusId> {
        self.buses.keys().copied().collect()
    }

    fn publish(&self) {
        let table = BusTable {
            buses: self.buses.values().map(|b| b.rt.clone()).collect(),
        };
        self.table.set(Shared::new(&gc_handle(), table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> StormDetector {
        StormDetector::new(5, 2.0, 48000)
    }

    #[test]
    fn test_mutations_publish_new_table() {
        let mut registry = BusRegistry::new();
        let table = registry.table();
        assert!(table.get().buses.is_empty());

        let a = registry.create("kick", BusRole::Capture, 1, detector());
        let b = registry.create("mix", BusRole::Playback, 2, detector());
        assert_ne!(a, b);

        // A snapshot taken before a mutation is unaffected by it
        let snapshot = table.get();
        registry.set_ports(b, vec![0, 1]);
        assert!(snapshot.buses[1].ports.is_empty());
        assert_eq!(table.get().buses[1].ports, vec![0, 1]);

        assert_eq!(registry.remove(a), Some(BusRole::Capture));
        assert_eq!(table.get().buses.len(), 1);
        assert_eq!(registry.remove(a), None);
    }

    #[test]
    fn test_info_reports_counters() {
        let mut registry = BusRegistry::new();
        let id = registry.create("vox", BusRole::Capture, 1, detector());
        registry.table().get().buses[0]
            .counters
            .underruns
            .fetch_add(3, Ordering::Relaxed);

        let info = registry.info(id).unwrap();
        assert_eq!(info.name, "vox");
        assert_eq!(info.underruns, 3);
        assert_eq!(registry.underruns(id), Some(3));
    }
}
