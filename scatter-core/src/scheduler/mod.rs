//! Bounded upload pipeline.
//!
//! Producers push [`UploadTask`]s into a fixed-capacity queue and block while
//! it is full. A fixed set of worker threads pops tasks, uploads them with
//! retry, optionally reads them back, and reports each outcome to a
//! [`CompletionSink`]. Every file carries a countdown of unfinished tasks;
//! [`UploadScheduler::wait_for_file`] blocks until it reaches zero.

use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, debug_span, warn};

use crate::config::Config;
use crate::crypto::checksum;
use crate::domain::FileId;
use crate::error::{Result, ScatterError};
use crate::report::{ChunkFailure, FailureKind};
use crate::storage::StorageBackend;

pub mod retry;

pub use retry::RetryPolicy;

/// One encrypted chunk bound for a specific backend.
pub struct UploadTask {
    pub file_id: FileId,
    pub index: u64,
    pub backend: Arc<dyn StorageBackend>,
    pub remote_id: String,
    pub data: Vec<u8>,
    /// Hex BLAKE3 of `data`.
    pub checksum: String,
}

/// Receives per-chunk outcomes. Calls for one task arrive in order
/// `uploaded` then `verified`, or `failed` alone.
pub trait CompletionSink: Send + Sync {
    fn chunk_uploaded(&self, file_id: FileId, index: u64) -> Result<()>;
    fn chunk_verified(&self, file_id: FileId, index: u64) -> Result<()>;
    fn chunk_failed(&self, file_id: FileId, index: u64, failure: &ChunkFailure) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub verify_uploads: bool,
}

impl SchedulerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            worker_count: cfg.worker_count.max(1),
            queue_capacity: cfg.queue_capacity.max(1),
            retry: RetryPolicy::from_config(cfg),
            verify_uploads: cfg.verify_uploads,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of waiting on a file: every chunk that did not end verified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileOutcome {
    /// Sorted by chunk index.
    pub failures: Vec<ChunkFailure>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
struct FileProgress {
    outstanding: usize,
    failures: Vec<ChunkFailure>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<UploadTask>,
    files: HashMap<FileId, FileProgress>,
    cancelled: HashSet<FileId>,
    /// Files nobody will wait on; their progress is dropped once settled.
    abandoned: HashSet<FileId>,
    shutting_down: bool,
    peak_depth: usize,
}

struct Shared {
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    settled: Condvar,
    config: SchedulerConfig,
    sink: Arc<dyn CompletionSink>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decrement the countdown for a finished task and wake waiters.
    fn settle(&self, file_id: FileId, failure: Option<ChunkFailure>) {
        let mut st = self.lock();
        let progress = st.files.entry(file_id).or_default();
        progress.outstanding = progress.outstanding.saturating_sub(1);
        if let Some(f) = failure {
            progress.failures.push(f);
        }
        if progress.outstanding == 0 && st.abandoned.remove(&file_id) {
            st.files.remove(&file_id);
            st.cancelled.remove(&file_id);
        }
        self.settled.notify_all();
    }

    fn report_failure(&self, file_id: FileId, failure: &ChunkFailure) {
        if let Err(e) = self.sink.chunk_failed(file_id, failure.index, failure) {
            warn!(%file_id, index = failure.index, error = %e, "failed to record chunk failure");
        }
    }
}

pub struct UploadScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl UploadScheduler {
    pub fn start(config: SchedulerConfig, sink: Arc<dyn CompletionSink>) -> Result<Self> {
        let worker_count = config.worker_count.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            settled: Condvar::new(),
            config,
            sink,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("scatter-upload-{i}"))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        debug!(
            worker_count,
            queue_capacity = shared.config.queue_capacity,
            "upload scheduler started"
        );
        Ok(Self { shared, workers })
    }

    /// Queue a task, blocking while the queue is full. Fails with
    /// `Cancelled` once the task's file is cancelled or the scheduler is
    /// shutting down.
    pub fn enqueue(&self, task: UploadTask) -> Result<()> {
        let capacity = self.shared.config.queue_capacity;
        let mut st = self.shared.lock();
        loop {
            if st.shutting_down || st.cancelled.contains(&task.file_id) {
                return Err(ScatterError::Cancelled);
            }
            if st.queue.len() < capacity {
                break;
            }
            st = self
                .shared
                .not_full
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
        st.files.entry(task.file_id).or_default().outstanding += 1;
        st.queue.push_back(task);
        st.peak_depth = st.peak_depth.max(st.queue.len());
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Block until every task queued for `file_id` has settled. With a
    /// deadline, gives up with `DeadlineExceeded` once it passes; the
    /// file's tasks keep running.
    pub fn wait_for_file(&self, file_id: FileId, deadline: Option<Duration>) -> Result<FileOutcome> {
        let until = deadline.map(|d| Instant::now() + d);
        let mut st = self.shared.lock();
        loop {
            let outstanding = st.files.get(&file_id).map_or(0, |p| p.outstanding);
            if outstanding == 0 {
                break;
            }
            st = match until {
                None => self
                    .shared
                    .settled
                    .wait(st)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(until) => {
                    let now = Instant::now();
                    if now >= until {
                        warn!(%file_id, outstanding, "deadline passed waiting for uploads");
                        return Err(ScatterError::DeadlineExceeded);
                    }
                    self.shared
                        .settled
                        .wait_timeout(st, until - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        st.cancelled.remove(&file_id);
        let mut failures = st
            .files
            .remove(&file_id)
            .map(|p| p.failures)
            .unwrap_or_default();
        failures.sort_by_key(|f| f.index);
        Ok(FileOutcome { failures })
    }

    /// Reject further tasks for `file_id` and resolve its queued tasks as
    /// cancelled without touching their backends. Tasks already running
    /// finish normally.
    pub fn cancel(&self, file_id: FileId) {
        let drained = {
            let mut st = self.shared.lock();
            st.cancelled.insert(file_id);
            let (drained, kept): (VecDeque<_>, VecDeque<_>) =
                mem::take(&mut st.queue).into_iter().partition(|t| t.file_id == file_id);
            st.queue = kept;
            self.shared.not_full.notify_all();
            drained
        };
        debug!(%file_id, drained = drained.len(), "file cancelled");
        for task in drained {
            let failure = cancelled_failure(task.index);
            self.shared.report_failure(file_id, &failure);
            self.shared.settle(file_id, Some(failure));
        }
    }

    /// Cancel `file_id` for a caller that will not wait on it again. Its
    /// bookkeeping is released as soon as the running tasks settle.
    pub fn abandon(&self, file_id: FileId) {
        self.cancel(file_id);
        let mut st = self.shared.lock();
        let outstanding = st.files.get(&file_id).map_or(0, |p| p.outstanding);
        if outstanding == 0 {
            st.files.remove(&file_id);
            st.cancelled.remove(&file_id);
        } else {
            st.abandoned.insert(file_id);
        }
        debug!(%file_id, outstanding, "file abandoned");
    }

    /// Highest queue length observed so far.
    pub fn peak_queue_depth(&self) -> usize {
        self.shared.lock().peak_depth
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.config.queue_capacity
    }

    /// Stop accepting work, let workers drain the queue, and join them.
    pub fn shutdown(&mut self) {
        {
            let mut st = self.shared.lock();
            st.shutting_down = true;
            self.shared.not_empty.notify_all();
            self.shared.not_full.notify_all();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("upload worker panicked");
            }
        }
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn cancelled_failure(index: u64) -> ChunkFailure {
    ChunkFailure::new(index, FailureKind::Cancelled, "file cancelled before upload started")
}

fn worker_loop(shared: &Shared) {
    loop {
        let (task, cancelled) = {
            let mut st = shared.lock();
            loop {
                if let Some(task) = st.queue.pop_front() {
                    shared.not_full.notify_one();
                    let cancelled = st.cancelled.contains(&task.file_id);
                    break (task, cancelled);
                }
                if st.shutting_down {
                    return;
                }
                st = shared
                    .not_empty
                    .wait(st)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let file_id = task.file_id;
        let failure = if cancelled {
            let failure = cancelled_failure(task.index);
            shared.report_failure(file_id, &failure);
            Some(failure)
        } else {
            run_task(shared, &task)
        };
        shared.settle(file_id, failure);
    }
}

fn run_task(shared: &Shared, task: &UploadTask) -> Option<ChunkFailure> {
    let backend = task.backend.name();
    let _span = debug_span!("upload", file_id = %task.file_id, index = task.index, backend)
        .entered();

    let uploaded = shared.config.retry.run(
        "chunk upload",
        |attempt| upload_once(task, shared.config.verify_uploads, attempt),
        |_| true,
    );

    let recorded = uploaded.and_then(|()| {
        shared.sink.chunk_uploaded(task.file_id, task.index)?;
        shared.sink.chunk_verified(task.file_id, task.index)
    });

    match recorded {
        Ok(()) => {
            debug!("chunk verified");
            None
        }
        Err(e) => {
            warn!(error = %e, "chunk upload failed");
            let failure = ChunkFailure::from_error(task.index, &e);
            shared.report_failure(task.file_id, &failure);
            Some(failure)
        }
    }
}

/// One put, plus a read-back comparison when `verify` is set.
fn upload_once(task: &UploadTask, verify: bool, attempt: usize) -> Result<()> {
    let backend = task.backend.name();
    debug!(attempt, bytes = task.data.len(), "put");
    task.backend
        .put(&task.remote_id, &task.data)
        .map_err(|e| e.into_chunk_error(backend, task.index))?;
    if !verify {
        return Ok(());
    }
    let stored = task
        .backend
        .get(&task.remote_id)
        .map_err(|e| e.into_chunk_error(backend, task.index))?;
    let actual = checksum(&stored);
    if actual != task.checksum {
        return Err(ScatterError::Integrity {
            index: task.index,
            expected: task.checksum.clone(),
            actual,
        });
    }
    Ok(())
}
