use std::collections::HashMap;
use std::sync::Mutex;

use super::{StorageBackend, StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryBackend {
    name: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("poisoned: {e}")))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flip one bit of a stored object. Returns false if the key is absent
    /// or the object is empty.
    pub fn corrupt(&self, key: &str, byte: usize) -> bool {
        let Ok(mut m) = self.lock() else {
            return false;
        };
        match m.get_mut(key) {
            Some(data) if !data.is_empty() => {
                let at = byte % data.len();
                data[at] ^= 0x01;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().map(|mut m| m.remove(key).is_some()).unwrap_or(false)
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.lock()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}
