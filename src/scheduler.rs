//! Temporal uploads: deferred deletion of persisted keys.
//!
//! The pipeline never deletes a temporal upload itself. It hands every key it
//! persisted to a [`DeletionScheduler`]; whoever owns the scheduler decides
//! when and how the deletion runs. [`DeletionQueue`] is an in-process
//! implementation that a host drains with [`DeletionQueue::run_due`].

use crate::storage::{StorageBackend, StorageError};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Deletion scheduling is not available")]
    Unavailable,
    #[error("Deletion queue is poisoned")]
    Poisoned,
}

/// Scheduling collaborator for temporal uploads.
pub trait DeletionScheduler: Send + Sync {
    /// Arrange for `key` to be deleted once `after` has elapsed.
    fn schedule_deletion(&self, key: &str, after: Duration) -> Result<(), ScheduleError>;
}

/// Scheduler for hosts without deferred work. Refuses every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScheduler;

impl DeletionScheduler for NoScheduler {
    fn schedule_deletion(&self, key: &str, _after: Duration) -> Result<(), ScheduleError> {
        warn!(key = %key, "No deletion scheduler configured");
        Err(ScheduleError::Unavailable)
    }
}

/// A deletion waiting for its due time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub key: String,
    pub due: SystemTime,
}

/// Summary of one [`DeletionQueue::run_due`] pass.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, StorageError)>,
}

/// In-memory deletion queue.
#[derive(Debug, Default)]
pub struct DeletionQueue {
    pending: Mutex<Vec<PendingDeletion>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the queued deletions, earliest first.
    pub fn pending(&self) -> Vec<PendingDeletion> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return Vec::new(),
        };
        pending.sort_by_key(|p| p.due);
        pending
    }

    /// Delete every key due at `now` from `storage`.
    ///
    /// Keys that are already gone count as deleted. Other failures are
    /// reported and dropped from the queue.
    pub fn run_due(&self, now: SystemTime, storage: &dyn StorageBackend) -> DeletionReport {
        let due: Vec<PendingDeletion> = match self.pending.lock() {
            Ok(mut guard) => {
                let (due, keep) = guard.drain(..).partition(|p| p.due <= now);
                *guard = keep;
                due
            }
            Err(_) => return DeletionReport::default(),
        };

        let mut report = DeletionReport::default();
        for item in due {
            match storage.delete(&item.key) {
                Ok(()) | Err(StorageError::NotFound(_)) => {
                    info!(key = %item.key, "Deleted expired upload");
                    report.deleted.push(item.key);
                }
                Err(e) => {
                    warn!(key = %item.key, error = %e, "Failed to delete expired upload");
                    report.failed.push((item.key, e));
                }
            }
        }
        report
    }
}

impl DeletionScheduler for DeletionQueue {
    fn schedule_deletion(&self, key: &str, after: Duration) -> Result<(), ScheduleError> {
        let due = SystemTime::now() + after;
        self.pending
            .lock()
            .map_err(|_| ScheduleError::Poisoned)?
            .push(PendingDeletion {
                key: key.to_string(),
                due,
            });
        debug!(key = %key, after_secs = after.as_secs(), "Scheduled deletion");
        Ok(())
    }
}
