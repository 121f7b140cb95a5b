use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;

/// Live counters for one engine
#[derive(Debug, Default)]
pub struct JobMetrics {
    submitted: AtomicU64,
    claimed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    reset: AtomicU64,
    tasks_evicted: AtomicU64,
    jobs_purged: AtomicU64,
}

/// Point-in-time copy of [`JobMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Stale executing jobs returned to the queue
    pub reset: u64,
    pub tasks_evicted: u64,
    pub jobs_purged: u64,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claimed(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished job; cancelled jobs are counted apart from failures
    pub fn record_finished(&self, success: bool, cancelled: bool) {
        let counter = match (success, cancelled) {
            (true, _) => &self.succeeded,
            (false, true) => &self.cancelled,
            (false, false) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self, count: u64) {
        self.reset.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_tasks_evicted(&self, count: usize) {
        self.tasks_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_jobs_purged(&self, count: u64) {
        self.jobs_purged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            reset: self.reset.load(Ordering::Relaxed),
            tasks_evicted: self.tasks_evicted.load(Ordering::Relaxed),
            jobs_purged: self.jobs_purged.load(Ordering::Relaxed),
        }
    }
}
