//! In-process execution handles
//!
//! A [`Task`] is owned by the process that created it and tracks one job's
//! live state. Only [`JobRecord`] values ever leave the process, through the
//! store.

pub mod registry;

pub use registry::TaskRegistry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{engine::CANCELLED_MESSAGE, JobId, JobRecord, JobsError, JobsResult};

/// Live handle for a job tracked by this process
pub struct Task {
    id: JobId,
    record: RwLock<JobRecord>,
    executing: AtomicBool,
    cancellation: CancellationToken,
    done: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    /// Build a non-executing task from a stored record
    pub fn new(record: JobRecord) -> Self {
        let (done, _) = watch::channel(record.is_completed());
        Self {
            id: record.id,
            record: RwLock::new(record),
            executing: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
            done,
            handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Snapshot of the job record as last seen by this process
    pub fn record(&self) -> JobRecord {
        self.record.read().clone()
    }

    /// Check if this process is currently executing the job
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Check if the job has completed
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Request cancellation; the executor stops at the next batch boundary
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// How long ago the job completed, if it has
    pub fn completed_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let record = self.record.read();
        match (record.is_completed(), record.completed) {
            (true, Some(completed)) => Some(now - completed),
            _ => None,
        }
    }

    /// Wait for the job to complete, returning its final record
    ///
    /// A `None` timeout waits indefinitely. When the wait elapses the result
    /// is [`JobsError::Timeout`]; the job itself keeps running.
    pub async fn wait(&self, timeout: Option<Duration>) -> JobsResult<JobRecord> {
        let mut done = self.done.subscribe();
        let finished = async {
            done.wait_for(|d| *d)
                .await
                .map(|_| ())
                .map_err(|_| JobsError::Internal("Task completion signal dropped".to_string()))
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, finished)
                .await
                .map_err(|_| JobsError::Timeout(self.id))??,
            None => finished.await?,
        }

        Ok(self.record())
    }

    /// Wait for completion, turning an unsuccessful outcome into an error
    pub async fn wait_success(&self, timeout: Option<Duration>) -> JobsResult<JobRecord> {
        let record = self.wait(timeout).await?;
        match (record.success, record.message.as_deref()) {
            (Some(true), _) => Ok(record),
            (_, Some(CANCELLED_MESSAGE)) => Err(JobsError::Cancelled),
            (_, message) => Err(JobsError::ExecutionFailure(message.unwrap_or("unknown failure").to_string())),
        }
    }

    /// Stop the spawned execution body outright
    ///
    /// Unlike [`Task::cancel`] nothing is persisted: the stored job stays
    /// `Executing` until the stale task reaper resets it, exactly as if the
    /// process had died.
    pub fn abort(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        self.executing.store(false, Ordering::Release);
    }

    /// Claim the right to execute; false if already executing
    pub(crate) fn try_begin(&self) -> bool {
        self.executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the execution flag without completing
    pub(crate) fn release(&self) {
        self.executing.store(false, Ordering::Release);
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub(crate) fn set_handle(&self, handle: JoinHandle<()>) {
        *self.handle.lock() = Some(handle);
    }

    pub(crate) fn update_record(&self, f: impl FnOnce(&mut JobRecord)) {
        f(&mut self.record.write());
    }

    /// Replace the record snapshot, signalling waiters if it is now complete
    pub(crate) fn refresh(&self, record: JobRecord) {
        let completed = record.is_completed();
        *self.record.write() = record;
        if completed {
            self.done.send_replace(true);
        }
    }

    /// Mark the execution finished with its final record
    pub(crate) fn finish(&self, record: JobRecord) {
        *self.record.write() = record;
        self.executing.store(false, Ordering::Release);
        self.done.send_replace(true);
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.record.read();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &record.state)
            .field("percent_complete", &record.percent_complete)
            .field("executing", &self.is_executing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobState;
    use serde_json::json;

    fn record() -> JobRecord {
        JobRecord::new(JobId::new(7), "test_job", json!({}))
    }

    #[tokio::test]
    async fn test_wait_times_out_while_running() {
        let task = Task::new(record());
        assert!(task.try_begin());
        let err = task.wait(Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_wait_returns_final_record() {
        let task = std::sync::Arc::new(Task::new(record()));
        assert!(task.try_begin());
        assert!(!task.try_begin());

        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.wait(None).await })
        };

        let mut done = task.record();
        done.complete(true, Some("ok".to_string()), Utc::now());
        task.finish(done);

        let finished = waiter.await.unwrap().unwrap();
        assert_eq!(finished.state, JobState::Completed);
        assert!(!task.is_executing());
        assert!(task.is_done());
    }

    #[tokio::test]
    async fn test_wait_success_maps_failures() {
        let mut failed = record();
        failed.complete(false, Some("disk full".to_string()), Utc::now());
        let err = Task::new(failed).wait_success(None).await.unwrap_err();
        assert!(matches!(err, JobsError::ExecutionFailure(msg) if msg == "disk full"));

        let mut cancelled = record();
        cancelled.complete(false, Some(CANCELLED_MESSAGE.to_string()), Utc::now());
        let err = Task::new(cancelled).wait_success(None).await.unwrap_err();
        assert!(matches!(err, JobsError::Cancelled));
    }

    #[test]
    fn test_completed_record_is_done_immediately() {
        let mut r = record();
        r.complete(false, Some("boom".to_string()), Utc::now());
        let task = Task::new(r);
        assert!(task.is_done());
        assert!(task.completed_age(Utc::now()).is_some());
    }
}
