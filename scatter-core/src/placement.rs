use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, ScatterError};
use crate::storage::StorageBackend;

/// Maps a chunk index onto a backend slot. Implementations must be pure in
/// `(index, backend_count)` so restore and repair tooling can recompute the
/// placement from the roster alone.
pub trait PlacementStrategy: Send + Sync {
    fn choose(&self, index: u64, backend_count: usize) -> usize;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobin;

impl PlacementStrategy for RoundRobin {
    fn choose(&self, index: u64, backend_count: usize) -> usize {
        if backend_count == 0 {
            return 0;
        }
        (index % backend_count as u64) as usize
    }
}

/// Fixed, ordered set of backends. Order comes from configuration and is
/// never mutated at runtime.
#[derive(Clone)]
pub struct BackendRoster {
    backends: Vec<Arc<dyn StorageBackend>>,
}

impl BackendRoster {
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>) -> Result<Self> {
        if backends.is_empty() {
            return Err(ScatterError::Config("backend roster is empty".into()));
        }
        let mut seen = HashSet::new();
        for b in &backends {
            if !seen.insert(b.name().to_string()) {
                return Err(ScatterError::Config(format!(
                    "duplicate backend name '{}' in roster",
                    b.name()
                )));
            }
        }
        Ok(Self { backends })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Arc<dyn StorageBackend>> {
        self.backends.get(slot)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn StorageBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn backend_for(&self, index: u64, strategy: &dyn PlacementStrategy) -> &Arc<dyn StorageBackend> {
        let slot = strategy.choose(index, self.backends.len());
        // out-of-range slots clamp to the last backend
        &self.backends[slot.min(self.backends.len() - 1)]
    }
}
