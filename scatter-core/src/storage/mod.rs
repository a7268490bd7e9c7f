// scatter_core/src/storage/mod.rs
use thiserror::Error;

use crate::error::ScatterError;

pub mod factory;
pub mod local;
pub mod memory;

pub use factory::{open_backend, roster_from_config};
pub use local::LocalDirBackend;
pub use memory::MemoryBackend;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// `NotFound` is permanent; everything else may clear up on retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StorageError::NotFound(_))
    }

    pub fn into_chunk_error(self, backend: &str, index: u64) -> ScatterError {
        match self {
            StorageError::NotFound(_) => ScatterError::MissingChunk {
                index,
                backend: backend.to_string(),
            },
            StorageError::Io(e) => ScatterError::BackendUnavailable {
                backend: backend.to_string(),
                reason: e.to_string(),
            },
            StorageError::Unavailable(reason) => ScatterError::BackendUnavailable {
                backend: backend.to_string(),
                reason,
            },
        }
    }
}

/// Durable blob store addressed by name. Retries belong to the caller;
/// `put` must be safe to repeat under the same name.
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &str;

    fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    fn get(&self, key: &str) -> StorageResult<Vec<u8>>;
}
