//! # solar-jobs: Claimable Job Execution Engine
//!
//! Long-running, resumable, cancellable jobs executed at most once at a time
//! across many cooperating processes that share one job store, with no broker.
//!
//! - **Claim protocol**: a queued job leaves `Queued` through a single atomic
//!   conditional update, so at most one process ever owns it
//! - **Task registry**: one live [`Task`] per job in each process, reachable
//!   for progress, cancellation and joining on completion
//! - **Batch executor**: date ranges run as bounded windows with progress
//!   committed after each one; a reclaimed job resumes after its last window
//! - **Maintenance**: a stale task reaper returns abandoned jobs to the queue,
//!   purgers evict completed tasks and old job records
//! - **Status events**: every transition and progress update is published on
//!   an in-process channel
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use solar_jobs::prelude::*;
//! use solar_jobs::execution::{Batch, BatchExecutor, BatchHandler, RangeConfig};
//!
//! struct DeleteDatum;
//!
//! #[async_trait]
//! impl BatchHandler for DeleteDatum {
//!     async fn run_batch(&self, _job: &JobRecord, batch: &Batch) -> anyhow::Result<u64> {
//!         // delete the rows covered by `batch`, returning how many went
//!         Ok(0)
//!     }
//! }
//!
//! # async fn demo() -> JobsResult<()> {
//! let engine = JobEngine::new(MemoryJobStore::new());
//! let policy = engine.batch_policy();
//! engine.register_executor("datum_delete", Arc::new(BatchExecutor::new(DeleteDatum, policy)))?;
//!
//! let range = RangeConfig::date_range(
//!     "2024-01-01T00:00:00Z".parse().unwrap(),
//!     "2024-03-01T00:00:00Z".parse().unwrap(),
//! );
//! let job = engine.submit(42, "datum_delete", range.to_value()?).await?;
//!
//! let workers = start_workers(&engine);
//! let maintenance = spawn_maintenance(&engine);
//!
//! let task = engine.task_for_id(&job.id).await?;
//! let finished = task.wait(None).await?;
//! println!("{:?}: {:?}", finished.state, finished.message);
//!
//! workers.shutdown().await?;
//! maintenance.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod job;
pub mod maintenance;
pub mod observability;
pub mod store;
pub mod task;
pub mod types;
pub mod worker;

// Core API exports
pub use engine::{JobEngine, CANCELLED_MESSAGE};
pub use types::{JobId, JobRecord, JobState, JobStatusEvent};
pub use error::{JobsError, JobsResult};
pub use config::{EngineConfig, JobSettings};
pub use job::{executor_fn, ExecutionContext, ExecutorRegistry, JobExecutor};
pub use task::{Task, TaskRegistry};
pub use store::JobStore;
pub use events::StatusPublisher;
pub use auth::{Actor, AuthorizedJobs};
pub use worker::{start_workers, WorkerHandle};
pub use maintenance::{spawn_maintenance, MaintenanceHandle};

// Store implementations
#[cfg(feature = "memory")]
pub use store::memory::MemoryJobStore;

#[cfg(feature = "postgres")]
pub use store::postgres::PostgresJobStore;

/// Common imports for defining and running jobs
pub mod prelude {
    pub use crate::{
        Actor, AuthorizedJobs, EngineConfig, ExecutionContext, JobEngine, JobExecutor, JobId, JobRecord,
        JobState, JobStatusEvent, JobStore, JobsError, JobsResult, Task,
    };

    pub use crate::{executor_fn, spawn_maintenance, start_workers};

    #[cfg(feature = "memory")]
    pub use crate::MemoryJobStore;

    pub use async_trait::async_trait;
}
