use std::time::Duration;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::{config, store::JobStore, JobEngine, JobState, JobsResult};
use super::run_periodic;

/// Returns jobs abandoned in `Executing` to the queue
///
/// Only the store's last-activity timestamp is consulted, so `age` must
/// exceed the longest plausible single batch or live workers get pre-empted.
pub struct StaleTaskReaper<S: JobStore> {
    engine: JobEngine<S>,
    age: Duration,
    interval: Duration,
}

impl<S: JobStore + 'static> StaleTaskReaper<S> {
    pub fn new(engine: JobEngine<S>, age: Duration) -> Self {
        Self {
            engine,
            age,
            interval: Duration::from_secs(60 * 60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one reaper cycle, returning the number of jobs reset
    pub async fn reap(&self) -> JobsResult<u64> {
        let older_than = Utc::now() - config::to_chrono(self.age)?;
        self.engine
            .update_stale_tasks_state(JobState::Executing, older_than, JobState::Queued)
            .await
    }

    pub async fn run(self, shutdown: CancellationToken) {
        run_periodic("stale task reaper", self.interval, shutdown, || self.reap()).await
    }
}
