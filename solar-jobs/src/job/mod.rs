pub mod registry;

pub use registry::ExecutorRegistry;

use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{JobId, JobRecord, JobsError, JobsResult};

/// Domain logic for one job family (datum export, datum delete, instruction run, ...)
///
/// The engine never interprets a job's configuration; it hands the record to
/// the executor registered for the job's type.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Reject malformed configuration before a job is persisted
    fn validate(&self, _configuration: &Value) -> JobsResult<()> {
        Ok(())
    }

    /// Run the job, returning an optional completion message
    ///
    /// Any error fails the job; its root cause becomes the job's message.
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<Option<String>>;
}

/// Receives progress from a running job
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, percent_complete: f64, result_count: i64) -> JobsResult<()>;
}

/// Everything an executor can see of the job it is running
#[derive(Clone)]
pub struct ExecutionContext {
    record: JobRecord,
    cancellation: CancellationToken,
    progress: Arc<dyn ProgressSink>,
}

impl ExecutionContext {
    pub fn new(record: JobRecord, cancellation: CancellationToken, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            record,
            cancellation,
            progress,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.record.id
    }

    /// The job record as it stood when execution began
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn configuration(&self) -> &Value {
        &self.record.configuration
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail with [`JobsError::Cancelled`] if cancellation was requested
    pub fn check_cancelled(&self) -> JobsResult<()> {
        if self.is_cancelled() {
            Err(JobsError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Persist progress and publish it to subscribers
    pub async fn report_progress(&self, percent_complete: f64, result_count: i64) -> JobsResult<()> {
        self.progress.report(percent_complete, result_count).await
    }
}

/// Executor backed by a caller-supplied async closure
pub struct FnExecutor<F> {
    f: F,
}

/// Wrap an async closure as a [`JobExecutor`]
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> JobExecutor for FnExecutor<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send,
{
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<Option<String>> {
        (self.f)(ctx).await
    }
}
