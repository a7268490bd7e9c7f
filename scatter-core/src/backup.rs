use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, info_span, warn};

use crate::chunker::{Chunker, chunk_count};
use crate::config::Config;
use crate::crypto::keywrap::{MasterKey, seal_file_key};
use crate::crypto::{CipherEngine, FileKey, checksum};
use crate::domain::{ChunkStatus, FileId, FileRecord, FileStatus, NewChunk, remote_id_for};
use crate::error::{Result, ScatterError};
use crate::metadata::{MetadataStore, check_chunk_layout};
use crate::placement::{BackendRoster, PlacementStrategy, RoundRobin};
use crate::report::{BackupReport, ChunkFailure, FailureKind};
use crate::scheduler::{CompletionSink, SchedulerConfig, UploadScheduler, UploadTask};

/// Shared stop signal for a backup or restore run. Backups check it between
/// chunks, restores between fetch windows.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the producer loop ended.
enum Produced {
    All,
    Cancelled,
    Failed(ScatterError),
}

pub struct BackupOrchestrator {
    config: Config,
    store: Arc<MetadataStore>,
    roster: BackendRoster,
    placement: Box<dyn PlacementStrategy>,
    master: Option<MasterKey>,
    cipher: CipherEngine,
    scheduler: UploadScheduler,
}

impl BackupOrchestrator {
    pub fn new(
        config: Config,
        store: Arc<MetadataStore>,
        roster: BackendRoster,
        master: Option<MasterKey>,
    ) -> Result<Self> {
        config.validate_pipeline()?;
        let sink: Arc<dyn CompletionSink> = store.clone();
        let scheduler = UploadScheduler::start(SchedulerConfig::from_config(&config), sink)?;
        Ok(Self {
            config,
            store,
            roster,
            placement: Box::new(RoundRobin),
            master,
            cipher: CipherEngine,
            scheduler,
        })
    }

    pub fn with_placement(mut self, placement: impl PlacementStrategy + 'static) -> Self {
        self.placement = Box::new(placement);
        self
    }

    pub fn scheduler(&self) -> &UploadScheduler {
        &self.scheduler
    }

    pub fn backup(&self, path: &Path) -> Result<BackupReport> {
        self.backup_cancellable(path, &CancelFlag::new())
    }

    /// Back up `path`. Chunk upload failures are reported in the returned
    /// report with status `failed`; local read errors and cancellation mark
    /// the file `failed` and return an error.
    pub fn backup_cancellable(&self, path: &Path, cancel: &CancelFlag) -> Result<BackupReport> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = self.config.chunk_size_bytes;
        let chunks = chunk_count(file_size, chunk_size);

        let key = CipherEngine::generate_key()?;
        let key_blob = seal_file_key(self.master.as_ref(), &key)?;
        let record = self.store.create_file(
            &path.display().to_string(),
            file_size,
            chunks,
            &key_blob,
        )?;
        let file_id = record.file_id;

        let _span = info_span!("backup", %file_id).entered();
        info!(path = %path.display(), file_size, chunks, "backup started");

        if chunks == 0 {
            self.store.set_file_status(file_id, FileStatus::Completed)?;
            info!("empty file, nothing to upload");
            return Ok(self.report(&record, FileStatus::Completed, Vec::new()));
        }

        let reader = BufReader::new(file);
        let produced = match Chunker::new(reader, chunk_size as usize) {
            Ok(chunker) => self.produce(&record, &key, chunker, cancel),
            Err(e) => Produced::Failed(e),
        };

        match produced {
            Produced::All => {}
            Produced::Cancelled => {
                self.drain(file_id);
                info!("backup cancelled");
                return Err(ScatterError::Cancelled);
            }
            Produced::Failed(e) => {
                self.drain(file_id);
                warn!(error = %e, "backup aborted");
                return Err(e);
            }
        }

        let outcome = match self
            .scheduler
            .wait_for_file(file_id, self.config.wait_deadline())
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.mark_failed(file_id);
                self.scheduler.abandon(file_id);
                return Err(e);
            }
        };

        let (status, failures) = self.finalize(&record, outcome.failures)?;
        self.store.set_file_status(file_id, status)?;
        info!(%status, failed = failures.len(), "backup finished");
        Ok(self.report(&record, status, failures))
    }

    /// Encrypt, record, and enqueue every chunk. Stops early on cancellation
    /// or the first local error.
    fn produce<R: std::io::Read>(
        &self,
        record: &FileRecord,
        key: &FileKey,
        chunker: Chunker<R>,
        cancel: &CancelFlag,
    ) -> Produced {
        let file_id = record.file_id;
        for item in chunker {
            if cancel.is_cancelled() {
                return Produced::Cancelled;
            }
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => return Produced::Failed(e),
            };
            match self.submit(file_id, key, chunk.index, &chunk.data) {
                Ok(()) => {}
                Err(ScatterError::Cancelled) => return Produced::Cancelled,
                Err(e) => return Produced::Failed(e),
            }
        }
        Produced::All
    }

    fn submit(&self, file_id: FileId, key: &FileKey, index: u64, plaintext: &[u8]) -> Result<()> {
        let (ciphertext, _nonce) = self.cipher.encrypt_chunk(key, file_id, index, plaintext)?;
        let sum = checksum(&ciphertext);
        let backend = self.roster.backend_for(index, self.placement.as_ref()).clone();
        let remote_id = remote_id_for(file_id, index);

        self.store.queue_chunk(&NewChunk {
            file_id,
            chunk_index: index,
            chunk_size: plaintext.len() as u64,
            backend_name: backend.name().to_string(),
            remote_id: remote_id.clone(),
            checksum: sum.clone(),
        })?;
        if index == 0 {
            self.store.set_file_status(file_id, FileStatus::Uploading)?;
        }
        debug!(index, backend = backend.name(), bytes = ciphertext.len(), "chunk queued");

        self.scheduler.enqueue(UploadTask {
            file_id,
            index,
            backend,
            remote_id,
            data: ciphertext,
            checksum: sum,
        })
    }

    /// Cancel outstanding work for `file_id`, wait for in-flight uploads to
    /// settle, and mark the file failed.
    fn drain(&self, file_id: FileId) {
        self.scheduler.cancel(file_id);
        if let Err(e) = self.scheduler.wait_for_file(file_id, self.config.wait_deadline()) {
            warn!(%file_id, error = %e, "uploads still running after cancel");
            self.mark_failed(file_id);
            self.scheduler.abandon(file_id);
            return;
        }
        self.mark_failed(file_id);
    }

    fn mark_failed(&self, file_id: FileId) {
        if let Err(e) = self.store.set_file_status(file_id, FileStatus::Failed) {
            warn!(%file_id, error = %e, "could not mark file failed");
        }
    }

    /// Stored chunk statuses decide the final file status; scheduler
    /// failures supply the detail.
    fn finalize(
        &self,
        record: &FileRecord,
        mut failures: Vec<ChunkFailure>,
    ) -> Result<(FileStatus, Vec<ChunkFailure>)> {
        let chunks = self.store.list_chunks(record.file_id)?;
        for c in &chunks {
            if c.status != ChunkStatus::Verified && !failures.iter().any(|f| f.index == c.chunk_index) {
                failures.push(ChunkFailure::new(
                    c.chunk_index,
                    FailureKind::Schema,
                    format!("chunk left in status {}", c.status),
                ));
            }
        }
        failures.sort_by_key(|f| f.index);

        if !failures.is_empty() {
            return Ok((FileStatus::Failed, failures));
        }
        if let Err(e) = check_chunk_layout(record, &chunks) {
            warn!(error = %e, "chunk layout check failed");
            return Ok((
                FileStatus::Failed,
                vec![ChunkFailure::new(0, FailureKind::Schema, e.to_string())],
            ));
        }
        Ok((FileStatus::Completed, failures))
    }

    fn report(&self, record: &FileRecord, status: FileStatus, failures: Vec<ChunkFailure>) -> BackupReport {
        BackupReport {
            file_id: record.file_id,
            status,
            file_size: record.file_size,
            chunk_count: record.chunk_count,
            failures,
        }
    }
}
