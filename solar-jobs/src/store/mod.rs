#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{JobId, JobRecord, JobState, JobsResult};

/// Durable job storage primitives
///
/// Every cross-process coordination point goes through the conditional
/// updates here: at most one caller can move a given row out of a state.
/// Implementations must stamp `modified` on each transition and progress
/// update, and must never move a row out of `Completed`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically pick the oldest queued job, mark it claimed and return it
    async fn claim_oldest_queued(&self) -> JobsResult<Option<JobRecord>>;

    /// Set the state to `desired` only if the current state is in `expected`
    ///
    /// Entering `Executing` sets `started` if it is not yet set; entering
    /// `Completed` sets `completed`.
    async fn cas_state(&self, id: &JobId, desired: JobState, expected: &[JobState]) -> JobsResult<bool>;

    /// Complete the job with an outcome only if the current state is in `expected`
    async fn cas_complete(
        &self,
        id: &JobId,
        success: bool,
        message: Option<String>,
        expected: &[JobState],
    ) -> JobsResult<bool>;

    /// Move every job in `expected` whose last activity is before `older_than` to `new_state`
    async fn cas_stale_state(
        &self,
        expected: JobState,
        older_than: DateTime<Utc>,
        new_state: JobState,
    ) -> JobsResult<u64>;

    /// Persist progress of an executing job; values never decrease
    async fn update_progress(&self, id: &JobId, percent_complete: f64, result_count: i64) -> JobsResult<()>;

    /// Get a job record
    async fn get(&self, id: &JobId) -> JobsResult<Option<JobRecord>>;

    /// Insert or replace a job record
    async fn save(&self, record: &JobRecord) -> JobsResult<()>;

    /// Delete completed jobs that finished before `older_than`
    async fn purge_completed_older_than(&self, older_than: DateTime<Utc>) -> JobsResult<u64>;

    /// List an owner's jobs, oldest first, optionally filtered by state
    async fn find_for_owner(&self, owner_id: i64, state: Option<JobState>) -> JobsResult<Vec<JobRecord>>;
}
