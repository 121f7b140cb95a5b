use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::{
    config::{self, EngineConfig},
    events::{BoxStream, StatusPublisher},
    execution::BatchPolicy,
    job::{ExecutionContext, ExecutorRegistry, JobExecutor, ProgressSink},
    observability::{JobMetrics, MetricsSnapshot},
    store::JobStore,
    task::{Task, TaskRegistry},
    JobId, JobRecord, JobState, JobStatusEvent, JobsError, JobsResult,
};

/// Message recorded on jobs that were cancelled
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Claimable job execution engine
///
/// One engine per process. Clones share the store, the task registry, the
/// worker pool and the event channel.
pub struct JobEngine<S: JobStore> {
    store: Arc<S>,
    tasks: TaskRegistry,
    executors: Arc<RwLock<ExecutorRegistry>>,
    publisher: StatusPublisher,
    metrics: Arc<JobMetrics>,
    config: Arc<EngineConfig>,
    permits: Arc<Semaphore>,
}

impl<S: JobStore> Clone for JobEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tasks: self.tasks.clone(),
            executors: self.executors.clone(),
            publisher: self.publisher.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            permits: self.permits.clone(),
        }
    }
}

struct Outcome {
    success: bool,
    message: Option<String>,
    cancelled: bool,
}

impl Outcome {
    fn cancelled() -> Self {
        Self {
            success: false,
            message: Some(CANCELLED_MESSAGE.to_string()),
            cancelled: true,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
            cancelled: false,
        }
    }
}

impl<S: JobStore + 'static> JobEngine<S> {
    /// Create an engine with the default configuration
    pub fn new(store: S) -> Self {
        Self::build(Arc::new(store), EngineConfig::default())
    }

    /// Create an engine with a custom configuration
    pub fn with_config(store: S, config: EngineConfig) -> JobsResult<Self> {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create an engine over a store shared with other components
    pub fn with_shared_store(store: Arc<S>, config: EngineConfig) -> JobsResult<Self> {
        config.validate()?;
        Ok(Self::build(store, config))
    }

    fn build(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            tasks: TaskRegistry::new(),
            executors: Arc::new(RwLock::new(ExecutorRegistry::new())),
            publisher: StatusPublisher::new(config.event_capacity),
            metrics: Arc::new(JobMetrics::new()),
            permits: Arc::new(Semaphore::new(config.pool_size)),
            config: Arc::new(config),
        }
    }

    /// Register the executor for a job type
    pub fn register_executor(&self, job_type: impl Into<String>, executor: Arc<dyn JobExecutor>) -> JobsResult<()> {
        let job_type = job_type.into();
        self.executors.write().register(job_type.clone(), executor)?;
        info!("Registered job type: {}", job_type);
        Ok(())
    }

    /// Validate and persist a new queued job
    ///
    /// Nothing is stored when the job type is unknown or its configuration is rejected.
    #[instrument(skip(self, configuration))]
    pub async fn submit(&self, owner_id: i64, job_type: &str, configuration: Value) -> JobsResult<JobRecord> {
        let executor = self.executors.read().get(job_type)?;
        executor.validate(&configuration)?;

        let record = JobRecord::new(JobId::new(owner_id), job_type, configuration);
        self.store.save(&record).await?;

        self.metrics.record_submitted();
        self.publisher.publish(&record);
        info!(job_id = %record.id, "Submitted job");
        Ok(record)
    }

    /// Atomically claim the oldest queued job
    ///
    /// At most one caller across all processes sharing the store gets a given job.
    pub async fn claim_queued_job(&self) -> JobsResult<Option<JobRecord>> {
        let claimed = self.store.claim_oldest_queued().await?;
        if let Some(record) = &claimed {
            self.metrics.record_claimed();
            self.publisher.publish(record);
            debug!(job_id = %record.id, "Claimed job");
        }
        Ok(claimed)
    }

    /// Conditionally move a job to `desired` if its state is in `expected`
    ///
    /// Completion carries an outcome and goes through job execution or
    /// [`JobEngine::cancel`], so `Completed` is refused here.
    #[instrument(skip(self, id), fields(job_id = %id))]
    pub async fn update_job_state(&self, id: &JobId, desired: JobState, expected: &[JobState]) -> JobsResult<bool> {
        if desired == JobState::Completed {
            return Err(JobsError::validation("jobs complete with an outcome, not a state update"));
        }

        let applied = self.store.cas_state(id, desired, expected).await?;
        if applied {
            if let Some(record) = self.store.get(id).await? {
                self.publisher.publish(&record);
            }
        } else {
            debug!("State update not applied");
        }
        Ok(applied)
    }

    /// Move every job in `expected` idle since before `older_than` to `new_state`
    ///
    /// The store reports only how many rows moved, so bulk resets publish no
    /// per-job status events. They are logged and counted in
    /// [`MetricsSnapshot::reset`] instead.
    #[instrument(skip(self))]
    pub async fn update_stale_tasks_state(
        &self,
        expected: JobState,
        older_than: DateTime<Utc>,
        new_state: JobState,
    ) -> JobsResult<u64> {
        let count = self.store.cas_stale_state(expected, older_than, new_state).await?;
        if count > 0 {
            if expected == JobState::Executing && new_state == JobState::Queued {
                self.metrics.record_reset(count);
            }
            info!(count, "Reset stale jobs");
        }
        Ok(count)
    }

    /// Get the live task for a job, rehydrating it from the store if needed
    ///
    /// A task executing in this process is returned unchanged, so repeated
    /// calls hand back the same instance.
    #[instrument(skip(self, id), fields(job_id = %id))]
    pub async fn task_for_id(&self, id: &JobId) -> JobsResult<Arc<Task>> {
        if let Some(task) = self.tasks.get(id) {
            if task.is_executing() || task.is_done() {
                return Ok(task);
            }

            return match self.store.get(id).await? {
                Some(record) => {
                    if !task.is_executing() {
                        task.refresh(record);
                    }
                    Ok(task)
                }
                None => {
                    self.tasks.remove(id);
                    Err(JobsError::UnknownJob(*id))
                }
            };
        }

        let record = self.store.get(id).await?.ok_or(JobsError::UnknownJob(*id))?;
        Ok(self.tasks.put_if_absent(Arc::new(Task::new(record))))
    }

    /// Start executing a job on the worker pool
    ///
    /// A task that is already executing or completed is returned as is.
    #[instrument(skip(self, id), fields(job_id = %id))]
    pub async fn perform_job(&self, id: &JobId) -> JobsResult<Arc<Task>> {
        self.spawn_task(id, None).await
    }

    /// Claim the oldest queued job and start executing it
    ///
    /// Waits for a free worker slot before claiming. Once claimed, dispatch
    /// runs to the end even if the returned future is dropped, so a claimed
    /// job is never stranded in `Claimed`.
    pub async fn claim_and_perform(&self) -> JobsResult<Option<Arc<Task>>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobsError::Internal("Worker pool closed".to_string()))?;

        let engine = self.clone();
        tokio::spawn(async move {
            let Some(record) = engine.claim_queued_job().await? else {
                return Ok(None);
            };
            match engine.spawn_task(&record.id, Some(permit)).await {
                Ok(task) => Ok(Some(task)),
                Err(e) => {
                    engine.requeue(&record.id).await;
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| JobsError::Internal(format!("Claim dispatch failed: {}", e)))?
    }

    /// Cancel a job
    ///
    /// A job executing in this process stops at its next batch boundary. A
    /// queued or claimed job is completed as cancelled. Returns false when
    /// the job already completed or is executing in another process.
    #[instrument(skip(self, id), fields(job_id = %id))]
    pub async fn cancel(&self, id: &JobId) -> JobsResult<bool> {
        if let Some(task) = self.tasks.get(id) {
            if task.is_executing() {
                task.cancel();
                info!("Cancellation requested");
                return Ok(true);
            }
        }

        let applied = self
            .store
            .cas_complete(id, false, Some(CANCELLED_MESSAGE.to_string()), &[JobState::Queued, JobState::Claimed])
            .await?;

        let record = self.store.get(id).await?.ok_or(JobsError::UnknownJob(*id))?;
        if applied {
            self.metrics.record_finished(false, true);
            self.publisher.publish(&record);
            if let Some(task) = self.tasks.get(id) {
                task.refresh(record);
            }
            info!("Cancelled job before execution");
        }
        Ok(applied)
    }

    /// Current record of a job, from the live task when this process runs it
    pub async fn job(&self, id: &JobId) -> JobsResult<JobRecord> {
        if let Some(task) = self.tasks.get(id) {
            if task.is_executing() {
                return Ok(task.record());
            }
        }
        self.store.get(id).await?.ok_or(JobsError::UnknownJob(*id))
    }

    /// An owner's jobs, oldest first
    pub async fn jobs_for_owner(&self, owner_id: i64, state: Option<JobState>) -> JobsResult<Vec<JobRecord>> {
        self.store.find_for_owner(owner_id, state).await
    }

    /// Delete completed job records that finished before `older_than`
    #[instrument(skip(self))]
    pub async fn purge_old_jobs(&self, older_than: DateTime<Utc>) -> JobsResult<u64> {
        let count = self.store.purge_completed_older_than(older_than).await?;
        self.metrics.record_jobs_purged(count);
        if count > 0 {
            info!(count, "Purged completed jobs");
        } else {
            debug!("No completed jobs to purge");
        }
        Ok(count)
    }

    /// Evict completed tasks older than the configured retention from the registry
    ///
    /// Idle tasks are first refreshed from the store, so a job finished by
    /// another process completes here too and its waiters wake up. Tasks whose
    /// record no longer exists are dropped.
    pub async fn purge_completed_tasks(&self) -> JobsResult<usize> {
        let retention = config::to_chrono(self.config.task_retention)?;

        let mut evicted = 0;
        for task in self.tasks.idle() {
            match self.store.get(task.id()).await? {
                Some(record) => {
                    if !task.is_executing() {
                        task.refresh(record);
                    }
                }
                None => {
                    if !task.is_executing() && self.tasks.remove(task.id()).is_some() {
                        evicted += 1;
                    }
                }
            }
        }

        evicted += self.tasks.purge_completed(retention, Utc::now());
        self.metrics.record_tasks_evicted(evicted);
        if evicted > 0 {
            debug!(evicted, "Evicted completed tasks");
        }
        Ok(evicted)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusEvent> {
        self.publisher.subscribe()
    }

    pub fn event_stream(&self) -> BoxStream<JobStatusEvent> {
        self.publisher.stream()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Batch sizing rules derived from the engine configuration
    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy::from(self.config.as_ref())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Free worker slots
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn spawn_task(&self, id: &JobId, permit: Option<OwnedSemaphorePermit>) -> JobsResult<Arc<Task>> {
        let task = self.task_for_id(id).await?;
        if task.is_done() || !task.try_begin() {
            return Ok(task);
        }

        let engine = self.clone();
        let running = task.clone();
        let span = info_span!("job", job_id = %id);
        let handle = tokio::spawn(async move { engine.run_task(running, permit).await }.instrument(span));
        task.set_handle(handle);

        Ok(task)
    }

    async fn run_task(&self, task: Arc<Task>, permit: Option<OwnedSemaphorePermit>) {
        let id = *task.id();
        let _permit = match permit {
            Some(permit) => permit,
            None => match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    self.requeue(&id).await;
                    task.release();
                    return;
                }
            },
        };

        match self
            .store
            .cas_state(&id, JobState::Executing, &[JobState::Queued, JobState::Claimed])
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(reason = %JobsError::StaleClaimConflict(id), "Not executing job");
                self.release(&task).await;
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to begin job");
                self.requeue(&id).await;
                task.release();
                return;
            }
        }

        let record = match self.store.get(&id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Job disappeared before execution");
                task.release();
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load job");
                self.complete(&task, Outcome::failed(format!("Failed to load job: {}", e)))
                    .await;
                return;
            }
        };

        task.refresh(record.clone());
        self.publisher.publish(&record);
        info!(job_type = %record.job_type, resumed = record.percent_complete > 0.0, "Executing job");

        let outcome = if task.is_cancelled() {
            Outcome::cancelled()
        } else {
            self.execute(&task, record).await
        };

        self.complete(&task, outcome).await;
    }

    async fn execute(&self, task: &Arc<Task>, record: JobRecord) -> Outcome {
        let lookup = self.executors.read().get(&record.job_type);
        let executor = match lookup {
            Ok(executor) => executor,
            Err(e) => {
                error!(error = %e, "No executor for job");
                return Outcome::failed(e.to_string());
            }
        };

        let progress = Arc::new(TaskProgress {
            store: self.store.clone(),
            task: task.clone(),
            publisher: self.publisher.clone(),
        });
        let ctx = ExecutionContext::new(record, task.cancellation_token(), progress);

        match AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await {
            Ok(Ok(message)) => Outcome {
                success: true,
                message,
                cancelled: false,
            },
            Ok(Err(err)) => {
                let cancelled =
                    task.is_cancelled() || matches!(err.downcast_ref::<JobsError>(), Some(JobsError::Cancelled));
                if cancelled {
                    info!("Job cancelled");
                    Outcome::cancelled()
                } else {
                    error!("Job failed: {:#}", err);
                    Outcome::failed(err.root_cause().to_string())
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "Job panicked");
                Outcome::failed(message)
            }
        }
    }

    async fn complete(&self, task: &Arc<Task>, outcome: Outcome) {
        let id = *task.id();
        let applied = match self
            .store
            .cas_complete(&id, outcome.success, outcome.message.clone(), &[JobState::Executing])
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                error!(error = %e, "Failed to record job outcome");
                task.release();
                return;
            }
        };

        if !applied {
            warn!("Job left Executing while running; outcome discarded");
            self.release(task).await;
            return;
        }

        self.metrics.record_finished(outcome.success, outcome.cancelled);
        let record = match self.store.get(&id).await {
            Ok(Some(record)) => record,
            _ => {
                let mut record = task.record();
                record.complete(outcome.success, outcome.message, Utc::now());
                record
            }
        };

        self.publisher.publish(&record);
        info!(success = outcome.success, message = ?record.message, "Job completed");
        task.finish(record);
    }

    /// Return a job that could not be started from `Claimed` to the queue
    ///
    /// The reaper only sweeps `Executing`, so nothing else would recover it.
    async fn requeue(&self, id: &JobId) {
        match self.store.cas_state(id, JobState::Queued, &[JobState::Claimed]).await {
            Ok(true) => {
                warn!(job_id = %id, "Returned claimed job to the queue");
                if let Ok(Some(record)) = self.store.get(id).await {
                    self.publisher.publish(&record);
                }
            }
            Ok(false) => {}
            Err(e) => error!(job_id = %id, error = %e, "Failed to requeue claimed job"),
        }
    }

    /// Stop executing locally and pick up whatever the store now says
    async fn release(&self, task: &Arc<Task>) {
        task.release();
        if let Ok(Some(record)) = self.store.get(task.id()).await {
            task.refresh(record);
        }
    }
}

/// Progress sink that persists, mirrors into the task and publishes
struct TaskProgress<S> {
    store: Arc<S>,
    task: Arc<Task>,
    publisher: StatusPublisher,
}

#[async_trait]
impl<S: JobStore + 'static> ProgressSink for TaskProgress<S> {
    async fn report(&self, percent_complete: f64, result_count: i64) -> JobsResult<()> {
        let percent_complete = if percent_complete.is_finite() {
            percent_complete.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let current = self.task.record();
        let percent_complete = percent_complete.max(current.percent_complete);
        let result_count = result_count.max(current.result_count);

        self.store
            .update_progress(self.task.id(), percent_complete, result_count)
            .await?;
        self.task
            .update_record(|r| r.record_progress(percent_complete, result_count, Utc::now()));
        self.publisher.publish(&self.task.record());
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("Job panicked: {}", detail)
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::job::executor_fn;
    use crate::store::memory::MemoryJobStore;
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> JobEngine<MemoryJobStore> {
        let engine = JobEngine::new(MemoryJobStore::new());
        engine
            .register_executor(
                "echo",
                Arc::new(executor_fn(|ctx: ExecutionContext| async move {
                    ctx.report_progress(1.0, 3).await?;
                    Ok(Some("done".to_string()))
                })),
            )
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_submit_unknown_type_creates_nothing() {
        let engine = engine();
        let err = engine.submit(1, "missing", json!({})).await.unwrap_err();
        assert!(matches!(err, JobsError::UnknownJobType(_)));
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_perform_job_completes() {
        let engine = engine();
        let record = engine.submit(1, "echo", json!({})).await.unwrap();

        let task = engine.perform_job(&record.id).await.unwrap();
        let done = task.wait(Some(Duration::from_secs(5))).await.unwrap();

        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.success, Some(true));
        assert_eq!(done.message.as_deref(), Some("done"));
        assert_eq!(done.result_count, 3);
        assert!(done.started.is_some());
        assert_eq!(engine.metrics().succeeded, 1);
    }

    #[tokio::test]
    async fn test_update_job_state_refuses_completed() {
        let engine = engine();
        let record = engine.submit(1, "echo", json!({})).await.unwrap();
        assert!(engine
            .update_job_state(&record.id, JobState::Completed, &[JobState::Queued])
            .await
            .is_err());
        assert!(engine
            .update_job_state(&record.id, JobState::Claimed, &[JobState::Queued])
            .await
            .unwrap());
        assert!(!engine
            .update_job_state(&record.id, JobState::Claimed, &[JobState::Queued])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_task_for_unknown_job() {
        let engine = engine();
        let err = engine.task_for_id(&JobId::new(1)).await.unwrap_err();
        assert!(matches!(err, JobsError::UnknownJob(_)));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let engine = engine();
        let record = engine.submit(1, "echo", json!({})).await.unwrap();

        assert!(engine.cancel(&record.id).await.unwrap());
        let cancelled = engine.job(&record.id).await.unwrap();
        assert_eq!(cancelled.state, JobState::Completed);
        assert_eq!(cancelled.success, Some(false));
        assert_eq!(cancelled.message.as_deref(), Some(CANCELLED_MESSAGE));

        // Completed jobs are never revived
        assert!(!engine.cancel(&record.id).await.unwrap());
        let task = engine.perform_job(&record.id).await.unwrap();
        assert!(task.is_done());
        assert!(!task.is_executing());
    }

    /// Memory store that can be told to fail selected operations
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryJobStore,
        fail_get: std::sync::atomic::AtomicBool,
        fail_get_while_executing: std::sync::atomic::AtomicBool,
        fail_begin: std::sync::atomic::AtomicBool,
    }

    impl FaultyStore {
        fn fault(flag: &std::sync::atomic::AtomicBool) -> bool {
            flag.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStore for FaultyStore {
        async fn claim_oldest_queued(&self) -> JobsResult<Option<JobRecord>> {
            self.inner.claim_oldest_queued().await
        }

        async fn cas_state(&self, id: &JobId, desired: JobState, expected: &[JobState]) -> JobsResult<bool> {
            if desired == JobState::Executing && Self::fault(&self.fail_begin) {
                return Err(JobsError::store("connection lost"));
            }
            self.inner.cas_state(id, desired, expected).await
        }

        async fn cas_complete(
            &self,
            id: &JobId,
            success: bool,
            message: Option<String>,
            expected: &[JobState],
        ) -> JobsResult<bool> {
            self.inner.cas_complete(id, success, message, expected).await
        }

        async fn cas_stale_state(
            &self,
            expected: JobState,
            older_than: DateTime<Utc>,
            new_state: JobState,
        ) -> JobsResult<u64> {
            self.inner.cas_stale_state(expected, older_than, new_state).await
        }

        async fn update_progress(&self, id: &JobId, percent_complete: f64, result_count: i64) -> JobsResult<()> {
            self.inner.update_progress(id, percent_complete, result_count).await
        }

        async fn get(&self, id: &JobId) -> JobsResult<Option<JobRecord>> {
            let record = self.inner.get(id).await?;
            let executing = record.as_ref().is_some_and(|r| r.state == JobState::Executing);
            if Self::fault(&self.fail_get) || (executing && Self::fault(&self.fail_get_while_executing)) {
                return Err(JobsError::store("connection lost"));
            }
            Ok(record)
        }

        async fn save(&self, record: &JobRecord) -> JobsResult<()> {
            self.inner.save(record).await
        }

        async fn purge_completed_older_than(&self, older_than: DateTime<Utc>) -> JobsResult<u64> {
            self.inner.purge_completed_older_than(older_than).await
        }

        async fn find_for_owner(&self, owner_id: i64, state: Option<JobState>) -> JobsResult<Vec<JobRecord>> {
            self.inner.find_for_owner(owner_id, state).await
        }
    }

    fn faulty_engine() -> (JobEngine<FaultyStore>, MemoryJobStore) {
        let store = FaultyStore::default();
        let inner = store.inner.clone();
        let engine = JobEngine::new(store);
        engine
            .register_executor("echo", Arc::new(executor_fn(|_ctx: ExecutionContext| async { Ok(None) })))
            .unwrap();
        (engine, inner)
    }

    fn trip(flag: &std::sync::atomic::AtomicBool, on: bool) {
        flag.store(on, std::sync::atomic::Ordering::SeqCst);
    }

    async fn state_of(store: &MemoryJobStore, id: &JobId) -> JobState {
        store.get(id).await.unwrap().unwrap().state
    }

    #[tokio::test]
    async fn test_claim_requeued_when_dispatch_fails() {
        let (engine, inner) = faulty_engine();
        let record = engine.submit(1, "echo", json!({})).await.unwrap();

        trip(&engine.store().fail_get, true);
        assert!(engine.claim_and_perform().await.is_err());
        trip(&engine.store().fail_get, false);

        assert_eq!(state_of(&inner, &record.id).await, JobState::Queued);
        assert_eq!(engine.available_permits(), engine.config().pool_size);
    }

    #[tokio::test]
    async fn test_claim_requeued_when_begin_fails() {
        let (engine, inner) = faulty_engine();
        let record = engine.submit(1, "echo", json!({})).await.unwrap();

        trip(&engine.store().fail_begin, true);
        let task = engine.claim_and_perform().await.unwrap().unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while task.is_executing() || state_of(&inner, &record.id).await != JobState::Queued {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // the job runs normally once the store recovers
        trip(&engine.store().fail_begin, false);
        let rerun = engine.claim_and_perform().await.unwrap().unwrap();
        let done = rerun.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(done.success, Some(true));
    }

    #[tokio::test]
    async fn test_load_failure_after_begin_completes_job() {
        let (engine, inner) = faulty_engine();
        let record = engine.submit(1, "echo", json!({})).await.unwrap();

        trip(&engine.store().fail_get_while_executing, true);
        let task = engine.perform_job(&record.id).await.unwrap();
        let done = task.wait(Some(Duration::from_secs(5))).await.unwrap();

        assert_eq!(done.success, Some(false));
        assert!(done.message.unwrap().starts_with("Failed to load job"));
        let stored = inner.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.success, Some(false));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "Job panicked: boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bad"));
        assert_eq!(panic_message(owned.as_ref()), "Job panicked: bad");
    }
}
