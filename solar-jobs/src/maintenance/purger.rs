use std::time::Duration;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::{config, store::JobStore, JobEngine, JobsResult};
use super::run_periodic;

/// Evicts completed tasks from the in-process registry
///
/// Retention comes from the engine configuration. Each cycle also brings idle
/// tasks up to date with the store.
pub struct RegistryPurger<S: JobStore> {
    engine: JobEngine<S>,
    interval: Duration,
}

impl<S: JobStore + 'static> RegistryPurger<S> {
    pub fn new(engine: JobEngine<S>) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(30 * 60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one purge cycle, returning the number of tasks evicted
    pub async fn purge(&self) -> JobsResult<usize> {
        self.engine.purge_completed_tasks().await
    }

    pub async fn run(self, shutdown: CancellationToken) {
        run_periodic("registry purger", self.interval, shutdown, || self.purge()).await
    }
}

/// Deletes durable records of jobs completed longer ago than `retention`
pub struct JobRecordPurger<S: JobStore> {
    engine: JobEngine<S>,
    retention: Duration,
    interval: Duration,
}

impl<S: JobStore + 'static> JobRecordPurger<S> {
    pub fn new(engine: JobEngine<S>, retention: Duration) -> Self {
        Self {
            engine,
            retention,
            interval: Duration::from_secs(60 * 60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn purge(&self) -> JobsResult<u64> {
        let older_than = Utc::now() - config::to_chrono(self.retention)?;
        self.engine.purge_old_jobs(older_than).await
    }

    pub async fn run(self, shutdown: CancellationToken) {
        run_periodic("job record purger", self.interval, shutdown, || self.purge()).await
    }
}
