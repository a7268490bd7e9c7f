//! Durable record of backed-up files and their chunks.
//!
//! A single SQLite connection sits behind a mutex; every public call holds
//! the lock for its whole duration and multi-statement calls run inside a
//! transaction, so each call is atomic with respect to other callers.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::domain::{ChunkRecord, ChunkStatus, FileId, FileRecord, FileStatus, NewChunk};
use crate::error::{Result, ScatterError};
use crate::report::ChunkFailure;
use crate::scheduler::CompletionSink;

mod schema;

use schema::{CHUNK_COLUMNS, FILE_COLUMNS, PRAGMAS, SCHEMA};

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ScatterError::Schema("metadata connection poisoned".into()))
    }

    /// Insert a new file in status `pending`.
    pub fn create_file(
        &self,
        original_path: &str,
        file_size: u64,
        chunk_count: u64,
        encryption_key: &[u8],
    ) -> Result<FileRecord> {
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| ScatterError::Schema(format!("timestamp: {e}")))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO files (original_path, file_size, chunk_count, encryption_key, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                original_path,
                to_i64(file_size)?,
                to_i64(chunk_count)?,
                encryption_key,
                created_at,
                FileStatus::Pending
            ],
        )?;
        let file_id = FileId(conn.last_insert_rowid());
        debug!(%file_id, original_path, file_size, chunk_count, "file record created");
        Ok(FileRecord {
            file_id,
            original_path: original_path.to_string(),
            file_size,
            chunk_count,
            encryption_key: encryption_key.to_vec(),
            created_at,
            status: FileStatus::Pending,
        })
    }

    pub fn get_file(&self, file_id: FileId) -> Result<FileRecord> {
        let conn = self.conn()?;
        fetch_file(&conn, file_id)?.ok_or(ScatterError::FileNotFound(file_id))
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files ORDER BY file_id"
        ))?;
        let rows = stmt.query_map([], file_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Move a file to `next`, rejecting edges outside the lifecycle.
    /// Returns the previous status.
    pub fn set_file_status(&self, file_id: FileId, next: FileStatus) -> Result<FileStatus> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current: FileStatus = tx
            .query_row(
                "SELECT status FROM files WHERE file_id = ?1",
                params![file_id.0],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(ScatterError::FileNotFound(file_id))?;
        if current == next {
            return Ok(current);
        }
        if !current.can_transition_to(next) {
            return Err(ScatterError::Schema(format!(
                "file {file_id}: illegal status transition {current} -> {next}"
            )));
        }
        tx.execute(
            "UPDATE files SET status = ?1 WHERE file_id = ?2",
            params![next, file_id.0],
        )?;
        tx.commit()?;
        debug!(%file_id, from = %current, to = %next, "file status");
        Ok(current)
    }

    /// Record a chunk in status `queued`. The owning file must still be in
    /// its backup phase and the index must lie inside `[0, chunk_count)`.
    pub fn queue_chunk(&self, chunk: &NewChunk) -> Result<ChunkRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let file = fetch_file(&tx, chunk.file_id)?.ok_or(ScatterError::FileNotFound(chunk.file_id))?;
        if !matches!(file.status, FileStatus::Pending | FileStatus::Uploading) {
            return Err(ScatterError::Schema(format!(
                "file {}: cannot queue chunks in status {}",
                file.file_id, file.status
            )));
        }
        if chunk.chunk_index >= file.chunk_count {
            return Err(ScatterError::Schema(format!(
                "file {}: chunk index {} outside [0, {})",
                file.file_id, chunk.chunk_index, file.chunk_count
            )));
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO chunks
                (file_id, chunk_index, chunk_size, backend_name, remote_id, checksum, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.file_id.0,
                to_i64(chunk.chunk_index)?,
                to_i64(chunk.chunk_size)?,
                chunk.backend_name,
                chunk.remote_id,
                chunk.checksum,
                ChunkStatus::Queued
            ],
        )?;
        if inserted == 0 {
            return Err(ScatterError::Schema(format!(
                "file {}: chunk {} already recorded",
                chunk.file_id, chunk.chunk_index
            )));
        }
        let chunk_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(ChunkRecord {
            chunk_id,
            file_id: chunk.file_id,
            chunk_index: chunk.chunk_index,
            chunk_size: chunk.chunk_size,
            backend_name: chunk.backend_name.clone(),
            remote_id: chunk.remote_id.clone(),
            checksum: chunk.checksum.clone(),
            status: ChunkStatus::Queued,
        })
    }

    /// Move a chunk to `next`. A chunk only moves forward while its file is
    /// still in the backup phase; `failed` is accepted at any time.
    pub fn set_chunk_status(&self, file_id: FileId, index: u64, next: ChunkStatus) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let (current, file_status): (ChunkStatus, FileStatus) = tx
            .query_row(
                "SELECT c.status, f.status FROM chunks c
                 JOIN files f ON f.file_id = c.file_id
                 WHERE c.file_id = ?1 AND c.chunk_index = ?2",
                params![file_id.0, to_i64(index)?],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| {
                ScatterError::Schema(format!("file {file_id}: no record for chunk {index}"))
            })?;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(ScatterError::Schema(format!(
                "file {file_id} chunk {index}: illegal status transition {current} -> {next}"
            )));
        }
        if next != ChunkStatus::Failed
            && !matches!(file_status, FileStatus::Pending | FileStatus::Uploading)
        {
            return Err(ScatterError::Schema(format!(
                "file {file_id} chunk {index}: cannot become {next} while file is {file_status}"
            )));
        }
        tx.execute(
            "UPDATE chunks SET status = ?1 WHERE file_id = ?2 AND chunk_index = ?3",
            params![next, file_id.0, to_i64(index)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Chunks of `file_id`, ordered by index.
    pub fn list_chunks(&self, file_id: FileId) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE file_id = ?1 ORDER BY chunk_index"
        ))?;
        let rows = stmt.query_map(params![file_id.0], chunk_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Chunk indices form exactly `[0, chunk_count)` and sizes sum to the
    /// file size.
    pub fn check_file_invariants(&self, file_id: FileId) -> Result<()> {
        let file = self.get_file(file_id)?;
        let chunks = self.list_chunks(file_id)?;
        check_chunk_layout(&file, &chunks)
    }
}

impl CompletionSink for MetadataStore {
    fn chunk_uploaded(&self, file_id: FileId, index: u64) -> Result<()> {
        self.set_chunk_status(file_id, index, ChunkStatus::Uploaded)
    }

    fn chunk_verified(&self, file_id: FileId, index: u64) -> Result<()> {
        self.set_chunk_status(file_id, index, ChunkStatus::Verified)
    }

    fn chunk_failed(&self, file_id: FileId, index: u64, failure: &ChunkFailure) -> Result<()> {
        debug!(%file_id, index, kind = %failure.kind, "chunk marked failed");
        self.set_chunk_status(file_id, index, ChunkStatus::Failed)
    }
}

pub fn check_chunk_layout(file: &FileRecord, chunks: &[ChunkRecord]) -> Result<()> {
    if chunks.len() as u64 != file.chunk_count {
        return Err(ScatterError::Schema(format!(
            "file {}: expected {} chunk records, found {}",
            file.file_id,
            file.chunk_count,
            chunks.len()
        )));
    }
    let mut total = 0u64;
    for (i, c) in chunks.iter().enumerate() {
        if c.chunk_index != i as u64 {
            return Err(ScatterError::Schema(format!(
                "file {}: chunk index gap, expected {i} found {}",
                file.file_id, c.chunk_index
            )));
        }
        total += c.chunk_size;
    }
    if total != file.file_size {
        return Err(ScatterError::Schema(format!(
            "file {}: chunk sizes sum to {total}, file size is {}",
            file.file_id, file.file_size
        )));
    }
    Ok(())
}

fn fetch_file(conn: &Connection, file_id: FileId) -> Result<Option<FileRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE file_id = ?1"),
            params![file_id.0],
            file_from_row,
        )
        .optional()?)
}

fn file_from_row(r: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: FileId(r.get(0)?),
        original_path: r.get(1)?,
        file_size: r.get::<_, i64>(2)? as u64,
        chunk_count: r.get::<_, i64>(3)? as u64,
        encryption_key: r.get(4)?,
        created_at: r.get(5)?,
        status: r.get(6)?,
    })
}

fn chunk_from_row(r: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        chunk_id: r.get(0)?,
        file_id: FileId(r.get(1)?),
        chunk_index: r.get::<_, i64>(2)? as u64,
        chunk_size: r.get::<_, i64>(3)? as u64,
        backend_name: r.get(4)?,
        remote_id: r.get(5)?,
        checksum: r.get(6)?,
        status: r.get(7)?,
    })
}

fn to_i64(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| ScatterError::Schema(format!("value {v} exceeds i64")))
}

impl ToSql for FileStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for FileStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ScatterError| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for ChunkStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ChunkStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ScatterError| FromSqlError::Other(Box::new(e)))
    }
}
