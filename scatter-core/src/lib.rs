#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod report;

pub mod chunker;
pub mod crypto;
pub mod placement;
pub mod storage;

pub mod metadata;
pub mod scheduler;

pub mod backup;
pub mod restore;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;

// Re-exports: stable API surface
pub use backup::{BackupOrchestrator, CancelFlag};
pub use config::{BackendConfig, Config};
pub use domain::{ChunkRecord, ChunkStatus, FileId, FileRecord, FileStatus};
pub use error::{Result, ScatterError};
pub use metadata::MetadataStore;
pub use placement::{BackendRoster, PlacementStrategy, RoundRobin};
pub use report::{BackupReport, ChunkFailure, FailureKind, RestoreReport};
pub use restore::RestoreOrchestrator;
pub use scheduler::{UploadScheduler, UploadTask};
pub use storage::{StorageBackend, StorageError};
