use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::placement::BackendRoster;
use crate::storage::{MemoryBackend, StorageBackend, StorageError, StorageResult};

/// Small sizes so multi-chunk files stay in the KiB range.
pub fn test_config() -> Config {
    Config {
        chunk_size_bytes: 1024,
        worker_count: 2,
        queue_capacity: 4,
        max_retries: 3,
        retry_delay_ms: 1,
        retry_max_delay_ms: 4,
        ..Config::default()
    }
}

/// Deterministic non-repeating-ish content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

pub fn memory_roster(names: &[&str]) -> (BackendRoster, Vec<Arc<MemoryBackend>>) {
    let mems: Vec<Arc<MemoryBackend>> = names.iter().map(|n| Arc::new(MemoryBackend::new(*n))).collect();
    let dyns: Vec<Arc<dyn StorageBackend>> = mems
        .iter()
        .map(|m| Arc::clone(m) as Arc<dyn StorageBackend>)
        .collect();
    (BackendRoster::new(dyns).unwrap(), mems)
}

/// Rejects every put and get; counts put attempts.
pub struct FailingBackend {
    name: String,
    puts: AtomicUsize,
}

impl FailingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn put_attempts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl StorageBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, _key: &str, _data: &[u8]) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("injected put failure".into()))
    }

    fn get(&self, _key: &str) -> StorageResult<Vec<u8>> {
        Err(StorageError::Unavailable("injected get failure".into()))
    }
}

/// Fails the first `failures` puts and gets, then behaves like memory.
pub struct FlakyBackend {
    inner: MemoryBackend,
    put_failures: AtomicUsize,
    get_failures: AtomicUsize,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(name: &str, put_failures: usize, get_failures: usize) -> Self {
        Self {
            inner: MemoryBackend::new(name),
            put_failures: AtomicUsize::new(put_failures),
            get_failures: AtomicUsize::new(get_failures),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Arm another round of get failures.
    pub fn fail_next_gets(&self, n: usize) {
        self.get_failures.store(n, Ordering::SeqCst);
    }
}

impl StorageBackend for FlakyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.put_failures) {
            return Err(StorageError::Unavailable("flaky put".into()));
        }
        self.inner.put(key, data)
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.get_failures) {
            return Err(StorageError::Unavailable("flaky get".into()));
        }
        self.inner.get(key)
    }
}

/// Stores a bit-flipped copy of every blob.
pub struct TamperingBackend {
    inner: MemoryBackend,
}

impl TamperingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryBackend::new(name),
        }
    }
}

impl StorageBackend for TamperingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let mut copy = data.to_vec();
        if let Some(b) = copy.first_mut() {
            *b ^= 0x80;
        }
        self.inner.put(key, &copy)
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get(key)
    }
}

/// Memory backend whose puts take at least `delay`.
pub struct SlowBackend {
    inner: MemoryBackend,
    delay: Duration,
}

impl SlowBackend {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            inner: MemoryBackend::new(name),
            delay,
        }
    }
}

impl StorageBackend for SlowBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        std::thread::sleep(self.delay);
        self.inner.put(key, data)
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get(key)
    }
}
