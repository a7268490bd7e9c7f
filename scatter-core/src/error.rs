use thiserror::Error;

use crate::domain::{FileId, FileStatus};
use crate::report::ChunkFailure;

#[derive(Error, Debug)]
pub enum ScatterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("integrity check failed for chunk {index}: expected {expected}, got {actual}")]
    Integrity {
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("chunk {index} missing from backend '{backend}'")]
    MissingChunk { index: u64, backend: String },

    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("metadata schema error: {0}")]
    Schema(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("chunk ordering error: expected index {expected}, got {got:?}")]
    Ordering { expected: u64, got: Option<u64> },

    #[error("file {0} not found")]
    FileNotFound(FileId),

    #[error("file {file_id} cannot be restored from status '{status}'")]
    NotRestorable { file_id: FileId, status: FileStatus },

    #[error("deadline exceeded while waiting for file uploads")]
    DeadlineExceeded,

    #[error("{} chunk(s) of file {file_id} failed", failures.len())]
    ChunksFailed {
        file_id: FileId,
        failures: Vec<ChunkFailure>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata store error: {0}")]
    Metadata(#[from] rusqlite::Error),
}

impl ScatterError {
    /// Process exit status for the command surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScatterError::Integrity { .. } => 2,
            ScatterError::MissingChunk { .. } => 3,
            // integrity outranks missing chunks when both occur
            ScatterError::ChunksFailed { failures, .. } => failures
                .iter()
                .map(|f| f.kind.exit_code())
                .filter(|c| *c != 1)
                .min()
                .unwrap_or(1),
            _ => 1,
        }
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, ScatterError>;
