use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::crypto::checksum;
use crate::domain::{ChunkStatus, FileId};
use crate::error::{Result, ScatterError};
use crate::report::{ChunkFailure, FailureKind};
use crate::scheduler::{CompletionSink, RetryPolicy, SchedulerConfig, UploadScheduler, UploadTask};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::testutil::{FailingBackend, FlakyBackend, SlowBackend, TamperingBackend};

/// Records the last status reported per chunk.
#[derive(Default)]
struct RecordingSink {
    statuses: Mutex<HashMap<(FileId, u64), ChunkStatus>>,
}

impl RecordingSink {
    fn status(&self, file_id: FileId, index: u64) -> Option<ChunkStatus> {
        self.statuses.lock().unwrap().get(&(file_id, index)).copied()
    }

    fn set(&self, file_id: FileId, index: u64, status: ChunkStatus) {
        self.statuses.lock().unwrap().insert((file_id, index), status);
    }
}

impl CompletionSink for RecordingSink {
    fn chunk_uploaded(&self, file_id: FileId, index: u64) -> Result<()> {
        self.set(file_id, index, ChunkStatus::Uploaded);
        Ok(())
    }

    fn chunk_verified(&self, file_id: FileId, index: u64) -> Result<()> {
        assert_eq!(self.status(file_id, index), Some(ChunkStatus::Uploaded));
        self.set(file_id, index, ChunkStatus::Verified);
        Ok(())
    }

    fn chunk_failed(&self, file_id: FileId, index: u64, _failure: &ChunkFailure) -> Result<()> {
        self.set(file_id, index, ChunkStatus::Failed);
        Ok(())
    }
}

fn config(workers: usize, capacity: usize, attempts: usize) -> SchedulerConfig {
    SchedulerConfig {
        worker_count: workers,
        queue_capacity: capacity,
        retry: RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        verify_uploads: true,
    }
}

fn task(file_id: FileId, index: u64, backend: Arc<dyn StorageBackend>) -> UploadTask {
    let data = format!("chunk-{}-{index}", file_id.0).into_bytes();
    UploadTask {
        file_id,
        index,
        backend,
        remote_id: format!("file_{}_chunk_{index}.enc", file_id.0),
        checksum: checksum(&data),
        data,
    }
}

#[test]
fn all_tasks_settle_and_verify() {
    let sink = Arc::new(RecordingSink::default());
    let mem = Arc::new(MemoryBackend::new("mem"));
    let sched = UploadScheduler::start(config(3, 2, 3), sink.clone()).unwrap();

    let id = FileId(1);
    for i in 0..10 {
        sched.enqueue(task(id, i, mem.clone())).unwrap();
    }
    let outcome = sched.wait_for_file(id, None).unwrap();
    assert!(outcome.is_success());
    assert_eq!(mem.len(), 10);
    for i in 0..10 {
        assert_eq!(sink.status(id, i), Some(ChunkStatus::Verified));
    }
}

#[test]
fn wait_on_unknown_file_returns_immediately() {
    let sink = Arc::new(RecordingSink::default());
    let sched = UploadScheduler::start(config(1, 1, 1), sink).unwrap();
    let outcome = sched.wait_for_file(FileId(99), Some(Duration::from_millis(10))).unwrap();
    assert!(outcome.failures.is_empty());
}

#[test]
fn failing_backend_uses_exactly_max_attempts() {
    let sink = Arc::new(RecordingSink::default());
    let failing = Arc::new(FailingBackend::new("down"));
    let sched = UploadScheduler::start(config(2, 4, 3), sink.clone()).unwrap();

    let id = FileId(5);
    sched.enqueue(task(id, 0, failing.clone())).unwrap();
    sched.enqueue(task(id, 1, failing.clone())).unwrap();
    let outcome = sched.wait_for_file(id, None).unwrap();

    assert_eq!(failing.put_attempts(), 6);
    let indices: Vec<u64> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::BackendUnavailable));
    assert_eq!(sink.status(id, 0), Some(ChunkStatus::Failed));
}

#[test]
fn transient_failures_recovered_by_retry() {
    let sink = Arc::new(RecordingSink::default());
    let flaky = Arc::new(FlakyBackend::new("flaky", 2, 0));
    let sched = UploadScheduler::start(config(1, 1, 3), sink.clone()).unwrap();

    let id = FileId(2);
    sched.enqueue(task(id, 0, flaky.clone())).unwrap();
    let outcome = sched.wait_for_file(id, None).unwrap();
    assert!(outcome.is_success());
    assert_eq!(flaky.puts.load(Ordering::SeqCst), 3);
    assert_eq!(sink.status(id, 0), Some(ChunkStatus::Verified));
}

#[test]
fn read_back_mismatch_fails_chunk() {
    let sink = Arc::new(RecordingSink::default());
    let tampering = Arc::new(TamperingBackend::new("evil"));
    let sched = UploadScheduler::start(config(1, 1, 2), sink.clone()).unwrap();

    let id = FileId(3);
    sched.enqueue(task(id, 0, tampering)).unwrap();
    let outcome = sched.wait_for_file(id, None).unwrap();
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].kind, FailureKind::Integrity);
    assert_eq!(sink.status(id, 0), Some(ChunkStatus::Failed));
}

#[test]
fn read_back_skipped_when_disabled() {
    let sink = Arc::new(RecordingSink::default());
    let tampering = Arc::new(TamperingBackend::new("evil"));
    let mut cfg = config(1, 1, 1);
    cfg.verify_uploads = false;
    let sched = UploadScheduler::start(cfg, sink.clone()).unwrap();

    let id = FileId(3);
    sched.enqueue(task(id, 0, tampering)).unwrap();
    assert!(sched.wait_for_file(id, None).unwrap().is_success());
    assert_eq!(sink.status(id, 0), Some(ChunkStatus::Verified));
}

#[test]
fn queue_depth_never_exceeds_capacity() {
    let sink = Arc::new(RecordingSink::default());
    let slow = Arc::new(SlowBackend::new("slow", Duration::from_millis(5)));
    let sched = UploadScheduler::start(config(2, 3, 1), sink).unwrap();

    let id = FileId(4);
    for i in 0..40 {
        sched.enqueue(task(id, i, slow.clone())).unwrap();
        assert!(sched.peak_queue_depth() <= 3);
    }
    assert!(sched.wait_for_file(id, None).unwrap().is_success());
    assert!(sched.peak_queue_depth() <= sched.queue_capacity());
    assert!(sched.peak_queue_depth() >= 1);
}

#[test]
fn files_are_tracked_independently() {
    let sink = Arc::new(RecordingSink::default());
    let mem = Arc::new(MemoryBackend::new("mem"));
    let failing = Arc::new(FailingBackend::new("down"));
    let sched = UploadScheduler::start(config(2, 4, 1), sink).unwrap();

    for i in 0..3 {
        sched.enqueue(task(FileId(10), i, mem.clone())).unwrap();
        sched.enqueue(task(FileId(11), i, failing.clone())).unwrap();
    }
    assert!(sched.wait_for_file(FileId(10), None).unwrap().is_success());
    assert_eq!(sched.wait_for_file(FileId(11), None).unwrap().failures.len(), 3);
}

#[test]
fn cancel_rejects_new_work_and_resolves_queued_tasks() {
    let sink = Arc::new(RecordingSink::default());
    let slow = Arc::new(SlowBackend::new("slow", Duration::from_millis(30)));
    let sched = UploadScheduler::start(config(1, 8, 1), sink.clone()).unwrap();

    let id = FileId(6);
    for i in 0..6 {
        sched.enqueue(task(id, i, slow.clone())).unwrap();
    }
    sched.cancel(id);
    assert!(matches!(
        sched.enqueue(task(id, 6, slow.clone())),
        Err(ScatterError::Cancelled)
    ));

    let outcome = sched.wait_for_file(id, None).unwrap();
    let cancelled = outcome
        .failures
        .iter()
        .filter(|f| f.kind == FailureKind::Cancelled)
        .count();
    // at most one task was in flight when cancel ran
    assert!(cancelled >= 5, "only {cancelled} tasks cancelled");
    for f in &outcome.failures {
        assert_eq!(sink.status(id, f.index), Some(ChunkStatus::Failed));
    }
}

#[test]
fn deadline_expires_while_uploads_run() {
    let sink = Arc::new(RecordingSink::default());
    let slow = Arc::new(SlowBackend::new("slow", Duration::from_millis(200)));
    let sched = UploadScheduler::start(config(1, 2, 1), sink).unwrap();

    let id = FileId(7);
    sched.enqueue(task(id, 0, slow)).unwrap();
    let err = sched.wait_for_file(id, Some(Duration::from_millis(10))).unwrap_err();
    assert!(matches!(err, ScatterError::DeadlineExceeded));
    assert!(sched.wait_for_file(id, None).unwrap().is_success());
}

#[test]
fn abandoned_file_is_forgotten_once_settled() {
    let sink = Arc::new(RecordingSink::default());
    let slow = Arc::new(SlowBackend::new("slow", Duration::from_millis(100)));
    let sched = UploadScheduler::start(config(1, 4, 1), sink.clone()).unwrap();

    let id = FileId(9);
    for i in 0..3 {
        sched.enqueue(task(id, i, slow.clone())).unwrap();
    }
    sched.abandon(id);
    for i in 1..3 {
        assert_eq!(sink.status(id, i), Some(ChunkStatus::Failed));
    }

    // failures went with the released progress entry
    let outcome = sched.wait_for_file(id, None).unwrap();
    assert!(outcome.failures.is_empty());
    assert!(matches!(
        sink.status(id, 0),
        Some(ChunkStatus::Verified) | Some(ChunkStatus::Failed)
    ));
}

#[test]
fn shutdown_drains_queue() {
    let sink = Arc::new(RecordingSink::default());
    let mem = Arc::new(MemoryBackend::new("mem"));
    let mut sched = UploadScheduler::start(config(2, 8, 1), sink.clone()).unwrap();
    for i in 0..8 {
        sched.enqueue(task(FileId(8), i, mem.clone())).unwrap();
    }
    sched.shutdown();
    assert_eq!(mem.len(), 8);
    assert!(matches!(
        sched.enqueue(task(FileId(8), 8, mem.clone())),
        Err(ScatterError::Cancelled)
    ));
}

#[test]
fn backoff_doubles_and_caps() {
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(350),
    };
    assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for(2), Duration::from_millis(350));
    assert_eq!(policy.delay_for(30), Duration::from_millis(350));
}

#[test]
fn retry_stops_on_permanent_error() {
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
    };
    let mut calls = 0;
    let res: std::result::Result<(), String> = policy.run(
        "op",
        |_| {
            calls += 1;
            Err("permanent".to_string())
        },
        |e| e != "permanent",
    );
    assert!(res.is_err());
    assert_eq!(calls, 1);
}
