// scatter_core/src/domain.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScatterError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for FileId {
    type Err = ScatterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(FileId)
            .map_err(|e| ScatterError::Config(format!("invalid file id '{s}': {e}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Restoring,
    Restored,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Restoring => "restoring",
            FileStatus::Restored => "restored",
        }
    }

    /// Legal edges of the file lifecycle. `Restoring -> Completed` is the
    /// rollback taken when a restore attempt fails.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Uploading, Completed)
                | (Uploading, Failed)
                | (Completed, Restoring)
                | (Restored, Restoring)
                | (Restoring, Restored)
                | (Restoring, Completed)
        )
    }

    pub fn is_restorable(self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Restored)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = ScatterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => FileStatus::Pending,
            "uploading" => FileStatus::Uploading,
            "completed" => FileStatus::Completed,
            "failed" => FileStatus::Failed,
            "restoring" => FileStatus::Restoring,
            "restored" => FileStatus::Restored,
            other => return Err(ScatterError::Schema(format!("unknown file status '{other}'"))),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Queued,
    Uploaded,
    Verified,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Queued => "queued",
            ChunkStatus::Uploaded => "uploaded",
            ChunkStatus::Verified => "verified",
            ChunkStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: ChunkStatus) -> bool {
        use ChunkStatus::*;
        matches!(
            (self, next),
            (Queued, Uploaded) | (Queued, Failed) | (Uploaded, Verified) | (Uploaded, Failed)
        )
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = ScatterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => ChunkStatus::Queued,
            "uploaded" => ChunkStatus::Uploaded,
            "verified" => ChunkStatus::Verified,
            "failed" => ChunkStatus::Failed,
            other => {
                return Err(ScatterError::Schema(format!(
                    "unknown chunk status '{other}'"
                )));
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub original_path: String,
    pub file_size: u64,
    pub chunk_count: u64,
    /// Raw 32-byte key, or a wrapped blob when a master key is configured.
    #[serde(skip_serializing)]
    pub encryption_key: Vec<u8>,
    pub created_at: String,
    pub status: FileStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub chunk_id: i64,
    pub file_id: FileId,
    pub chunk_index: u64,
    pub chunk_size: u64,
    pub backend_name: String,
    pub remote_id: String,
    /// Hex BLAKE3 of the encrypted bytes.
    pub checksum: String,
    pub status: ChunkStatus,
}

/// Fields needed to queue a chunk; ids and status are assigned by the store.
#[derive(Clone, Debug)]
pub struct NewChunk {
    pub file_id: FileId,
    pub chunk_index: u64,
    pub chunk_size: u64,
    pub backend_name: String,
    pub remote_id: String,
    pub checksum: String,
}

pub fn remote_id_for(file_id: FileId, index: u64) -> String {
    format!("file_{}_chunk_{}.enc", file_id.0, index)
}
