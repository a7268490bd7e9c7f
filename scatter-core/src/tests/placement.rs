use std::sync::Arc;

use crate::error::ScatterError;
use crate::placement::{BackendRoster, PlacementStrategy, RoundRobin};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::testutil::memory_roster;

#[test]
fn round_robin_is_index_mod_count() {
    let rr = RoundRobin;
    let slots: Vec<usize> = (0..7).map(|i| rr.choose(i, 3)).collect();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn roster_places_in_configured_order() {
    let (roster, _) = memory_roster(&["GoogleDrive", "Dropbox", "OneDrive"]);
    let names: Vec<&str> = (0..4)
        .map(|i| roster.backend_for(i, &RoundRobin).name())
        .collect();
    assert_eq!(names, vec!["GoogleDrive", "Dropbox", "OneDrive", "GoogleDrive"]);
    assert_eq!(roster.names(), vec!["GoogleDrive", "Dropbox", "OneDrive"]);
}

#[test]
fn roster_lookup_by_name() {
    let (roster, _) = memory_roster(&["a", "b"]);
    assert_eq!(roster.by_name("b").unwrap().name(), "b");
    assert!(roster.by_name("c").is_none());
}

#[test]
fn empty_roster_rejected() {
    assert!(matches!(
        BackendRoster::new(Vec::new()),
        Err(ScatterError::Config(_))
    ));
}

#[test]
fn duplicate_names_rejected() {
    let a: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new("x"));
    let b: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new("x"));
    assert!(matches!(
        BackendRoster::new(vec![a, b]),
        Err(ScatterError::Config(_))
    ));
}

struct Always(usize);

impl PlacementStrategy for Always {
    fn choose(&self, _index: u64, _backend_count: usize) -> usize {
        self.0
    }
}

#[test]
fn out_of_range_slot_clamps() {
    let (roster, _) = memory_roster(&["a", "b"]);
    assert_eq!(roster.backend_for(0, &Always(9)).name(), "b");
    assert_eq!(roster.backend_for(0, &Always(0)).name(), "a");
}
