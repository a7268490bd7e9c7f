use serde::Serialize;
use std::fmt;

use crate::domain::{FileId, FileStatus};
use crate::error::ScatterError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Io,
    Crypto,
    Integrity,
    MissingChunk,
    BackendUnavailable,
    Schema,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Io => "io",
            FailureKind::Crypto => "crypto",
            FailureKind::Integrity => "integrity",
            FailureKind::MissingChunk => "missing_chunk",
            FailureKind::BackendUnavailable => "backend_unavailable",
            FailureKind::Schema => "schema",
            FailureKind::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::Integrity => 2,
            FailureKind::MissingChunk => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk that did not reach a good terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub index: u64,
    pub kind: FailureKind,
    pub detail: String,
}

impl ChunkFailure {
    pub fn new(index: u64, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            detail: detail.into(),
        }
    }

    pub fn from_error(index: u64, err: &ScatterError) -> Self {
        let kind = match err {
            ScatterError::Io(_) => FailureKind::Io,
            ScatterError::Crypto(_) => FailureKind::Crypto,
            ScatterError::Integrity { .. } => FailureKind::Integrity,
            ScatterError::MissingChunk { .. } => FailureKind::MissingChunk,
            ScatterError::BackendUnavailable { .. } => FailureKind::BackendUnavailable,
            ScatterError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Schema,
        };
        Self::new(index, kind, err.to_string())
    }
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {}: {}: {}", self.index, self.kind, self.detail)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BackupReport {
    pub file_id: FileId,
    pub status: FileStatus,
    pub file_size: u64,
    pub chunk_count: u64,
    /// Sorted by chunk index.
    pub failures: Vec<ChunkFailure>,
}

impl BackupReport {
    pub fn failed_indices(&self) -> Vec<u64> {
        self.failures.iter().map(|f| f.index).collect()
    }

    pub fn is_completed(&self) -> bool {
        self.status == FileStatus::Completed
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RestoreReport {
    pub file_id: FileId,
    pub status: FileStatus,
    pub bytes_written: u64,
    pub chunks_restored: u64,
}
