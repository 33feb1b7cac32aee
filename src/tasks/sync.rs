//! Deferred sync queue with at-least-once retry.
//!
//! Operations are serializable values executed by an injected
//! [`SyncHandler`], so the queue can be mirrored to the kv store. A drain
//! takes a snapshot of the current queue before running anything: jobs
//! enqueued while a drain is in flight wait for the next trigger.

use chrono::Utc;
use color_eyre::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::kv::KvStore;

const QUEUE_KEY: &str = "sync_queue";

/// A deferred operation. No remote endpoint exists yet, so these describe
/// the work rather than carrying a closure; that keeps the kv mirror honest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOp {
  PushTask { task_id: String },
  PushEvent { event_id: String },
  Custom { tag: String },
}

/// A queued operation with its enqueue timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
  pub id: String,
  pub op: SyncOp,
  /// Epoch milliseconds at enqueue time.
  pub timestamp: i64,
}

/// Executes a sync operation against whatever remote exists.
pub trait SyncHandler: Send + Sync {
  fn run(&self, op: &SyncOp) -> BoxFuture<'static, Result<()>>;
}

/// Handler used while no sync endpoint exists: every operation succeeds.
pub struct NoopSyncHandler;

impl SyncHandler for NoopSyncHandler {
  fn run(&self, _op: &SyncOp) -> BoxFuture<'static, Result<()>> {
    Box::pin(async { Ok(()) })
  }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub synced: usize,
  pub requeued: usize,
}

/// In-memory queue mirrored to the kv store.
pub struct SyncQueue {
  kv: Arc<KvStore>,
  jobs: Mutex<Vec<SyncJob>>,
}

impl SyncQueue {
  /// Create the queue, restoring any persisted mirror.
  pub fn new(kv: Arc<KvStore>) -> Self {
    let jobs: Vec<SyncJob> = kv.get(QUEUE_KEY, Vec::new());
    Self {
      kv,
      jobs: Mutex::new(jobs),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Vec<SyncJob>> {
    match self.jobs.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn persist(&self, jobs: &[SyncJob]) {
    if !self.kv.set(QUEUE_KEY, &jobs) {
      warn!("Failed to mirror sync queue ({} jobs)", jobs.len());
    }
  }

  /// Append an operation to the queue.
  pub fn enqueue(&self, op: SyncOp) -> SyncJob {
    let job = SyncJob {
      id: super::new_id(),
      op,
      timestamp: Utc::now().timestamp_millis(),
    };

    let mut jobs = self.lock();
    jobs.push(job.clone());
    self.persist(&jobs);
    job
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Drain a snapshot of the queue, re-enqueueing every job whose handler
  /// failed. A no-op while offline or empty. Retry is unordered: failed
  /// jobs run again on the next drain, not immediately.
  pub async fn drain(&self, handler: &dyn SyncHandler, online: bool) -> DrainReport {
    if !online {
      return DrainReport::default();
    }

    let snapshot = {
      let mut jobs = self.lock();
      if jobs.is_empty() {
        return DrainReport::default();
      }
      let snapshot = std::mem::take(&mut *jobs);
      self.persist(&jobs);
      snapshot
    };

    let mut report = DrainReport {
      attempted: snapshot.len(),
      ..DrainReport::default()
    };
    let mut failed = Vec::new();

    for job in snapshot {
      match handler.run(&job.op).await {
        Ok(()) => {
          debug!("Synced job {}", job.id);
          report.synced += 1;
        }
        Err(e) => {
          warn!("Sync job {} failed, re-queueing: {}", job.id, e);
          failed.push(job);
        }
      }
    }

    report.requeued = failed.len();

    let mut jobs = self.lock();
    jobs.extend(failed);
    self.persist(&jobs);

    report
  }
}
