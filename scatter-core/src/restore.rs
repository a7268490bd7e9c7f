use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, info, info_span, warn};

use crate::backup::CancelFlag;
use crate::chunker::Joiner;
use crate::config::Config;
use crate::crypto::keywrap::{MasterKey, open_file_key};
use crate::crypto::{CipherEngine, FileKey, checksum};
use crate::domain::{ChunkRecord, ChunkStatus, FileId, FileRecord, FileStatus};
use crate::error::{Result, ScatterError};
use crate::metadata::{MetadataStore, check_chunk_layout};
use crate::placement::{BackendRoster, PlacementStrategy, RoundRobin};
use crate::report::{ChunkFailure, RestoreReport};
use crate::scheduler::RetryPolicy;
use crate::storage::{StorageBackend, StorageError};

pub struct RestoreOrchestrator {
    store: Arc<MetadataStore>,
    roster: BackendRoster,
    placement: Box<dyn PlacementStrategy>,
    master: Option<MasterKey>,
    cipher: CipherEngine,
    retry: RetryPolicy,
    window: usize,
    strict: bool,
    pool: ThreadPool,
}

impl RestoreOrchestrator {
    pub fn new(
        config: &Config,
        store: Arc<MetadataStore>,
        roster: BackendRoster,
        master: Option<MasterKey>,
    ) -> Result<Self> {
        config.validate_pipeline()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(|i| format!("scatter-restore-{i}"))
            .build()
            .map_err(|e| ScatterError::Config(format!("restore pool: {e}")))?;
        Ok(Self {
            store,
            roster,
            placement: Box::new(RoundRobin),
            master,
            cipher: CipherEngine,
            retry: RetryPolicy::from_config(config),
            window: config.queue_capacity,
            strict: config.restore_strict,
            pool,
        })
    }

    pub fn with_placement(mut self, placement: impl PlacementStrategy + 'static) -> Self {
        self.placement = Box::new(placement);
        self
    }

    pub fn restore(&self, file_id: FileId, output: &Path) -> Result<RestoreReport> {
        self.restore_cancellable(file_id, output, &CancelFlag::new())
    }

    /// Rebuild `file_id` at `output`. The output only appears once every
    /// chunk has been fetched, verified, and decrypted. On failure or
    /// cancellation the file returns to the status it had before the run and
    /// nothing is written. `cancel` is checked before each fetch window.
    pub fn restore_cancellable(
        &self,
        file_id: FileId,
        output: &Path,
        cancel: &CancelFlag,
    ) -> Result<RestoreReport> {
        let record = self.store.get_file(file_id)?;
        if !record.status.is_restorable() {
            return Err(ScatterError::NotRestorable {
                file_id,
                status: record.status,
            });
        }
        let chunks = self.store.list_chunks(file_id)?;
        check_chunk_layout(&record, &chunks)?;
        if let Some(c) = chunks.iter().find(|c| c.status != ChunkStatus::Verified) {
            return Err(ScatterError::Schema(format!(
                "file {file_id}: chunk {} is {}, not verified",
                c.chunk_index, c.status
            )));
        }
        let key = open_file_key(self.master.as_ref(), &record.encryption_key)?;

        let _span = info_span!("restore", %file_id).entered();
        info!(output = %output.display(), chunks = chunks.len(), "restore started");
        let previous = self.store.set_file_status(file_id, FileStatus::Restoring)?;

        match self.fetch_and_write(&record, &chunks, &key, output, cancel) {
            Ok(bytes_written) => {
                self.store.set_file_status(file_id, FileStatus::Restored)?;
                info!(bytes_written, "restore finished");
                Ok(RestoreReport {
                    file_id,
                    status: FileStatus::Restored,
                    bytes_written,
                    chunks_restored: chunks.len() as u64,
                })
            }
            Err(ScatterError::Cancelled) => {
                info!("restore cancelled");
                self.roll_back(file_id, previous);
                Err(ScatterError::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "restore failed");
                self.roll_back(file_id, previous);
                Err(e)
            }
        }
    }

    fn roll_back(&self, file_id: FileId, previous: FileStatus) {
        if let Err(rollback) = self.store.set_file_status(file_id, previous) {
            warn!(error = %rollback, "could not roll back file status");
        }
    }

    fn fetch_and_write(
        &self,
        record: &FileRecord,
        chunks: &[ChunkRecord],
        key: &FileKey,
        output: &Path,
        cancel: &CancelFlag,
    ) -> Result<u64> {
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        let mut failures = Vec::new();
        let written = {
            let mut joiner = Joiner::new(BufWriter::new(tmp.as_file_mut()));
            for window in chunks.chunks(self.window.max(1)) {
                if cancel.is_cancelled() {
                    return Err(ScatterError::Cancelled);
                }
                let fetched: Vec<Result<Vec<u8>>> = self.pool.install(|| {
                    window
                        .par_iter()
                        .map(|c| self.fetch_chunk(record.file_id, key, c))
                        .collect()
                });
                for (chunk, result) in window.iter().zip(fetched) {
                    match result {
                        Ok(plain) if failures.is_empty() => joiner.push(chunk.chunk_index, &plain)?,
                        Ok(_) => {}
                        Err(e) if self.strict => return Err(e),
                        Err(e) => failures.push(ChunkFailure::from_error(chunk.chunk_index, &e)),
                    }
                }
            }
            if !failures.is_empty() {
                return Err(ScatterError::ChunksFailed {
                    file_id: record.file_id,
                    failures,
                });
            }
            let written = joiner.bytes_written();
            joiner
                .finish(record.chunk_count)?
                .into_inner()
                .map_err(|e| ScatterError::Io(e.into_error()))?;
            written
        };
        tmp.as_file().sync_all()?;
        tmp.persist(output).map_err(|e| ScatterError::Io(e.error))?;
        Ok(written)
    }

    fn resolve_backend(&self, chunk: &ChunkRecord) -> &Arc<dyn StorageBackend> {
        match self.roster.by_name(&chunk.backend_name) {
            Some(b) => b,
            None => {
                let b = self.roster.backend_for(chunk.chunk_index, self.placement.as_ref());
                warn!(
                    index = chunk.chunk_index,
                    recorded = %chunk.backend_name,
                    backend = b.name(),
                    "recorded backend not in roster, using computed placement"
                );
                b
            }
        }
    }

    /// Fetch, verify, and decrypt one chunk.
    fn fetch_chunk(&self, file_id: FileId, key: &FileKey, chunk: &ChunkRecord) -> Result<Vec<u8>> {
        let index = chunk.chunk_index;
        let backend = self.resolve_backend(chunk);
        let data = self
            .retry
            .run(
                "chunk fetch",
                |_| backend.get(&chunk.remote_id),
                StorageError::is_transient,
            )
            .map_err(|e| e.into_chunk_error(backend.name(), index))?;

        let actual = checksum(&data);
        if actual != chunk.checksum {
            return Err(ScatterError::Integrity {
                index,
                expected: chunk.checksum.clone(),
                actual,
            });
        }

        let nonce = CipherEngine::derive_nonce(file_id, index);
        let plain = self.cipher.decrypt_chunk(key, &nonce, file_id, index, &data)?;
        if plain.len() as u64 != chunk.chunk_size {
            return Err(ScatterError::Integrity {
                index,
                expected: format!("{} bytes", chunk.chunk_size),
                actual: format!("{} bytes", plain.len()),
            });
        }
        debug!(index, backend = backend.name(), "chunk fetched");
        Ok(plain)
    }
}
