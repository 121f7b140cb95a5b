use thiserror::Error;

use crate::JobId;

/// Result type for job engine operations
pub type JobsResult<T> = Result<T, JobsError>;

/// Errors surfaced by the job engine
#[derive(Error, Debug, Clone)]
pub enum JobsError {
    /// The job id is not present in the store
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    /// Malformed job configuration, rejected before any row is created
    #[error("Invalid job configuration: {0}")]
    Validation(String),

    /// No executor is registered for the job type
    #[error("Job type not registered: {0}")]
    UnknownJobType(String),

    /// The domain executor failed; carries the root cause message
    #[error("Job execution failed: {0}")]
    ExecutionFailure(String),

    /// A caller-side wait elapsed; the job itself keeps executing
    #[error("Timed out waiting for job {0}")]
    Timeout(JobId),

    /// A conditional state update found the row already transitioned
    #[error("Job {0} was already claimed or transitioned")]
    StaleClaimConflict(JobId),

    /// The job was cancelled before it finished
    #[error("Job cancelled")]
    Cancelled,

    /// The caller may not act on the job's owner
    #[error("Access denied to jobs of owner {0}")]
    Forbidden(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobsError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Check if this error is a caller-side timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this error reports a lost claim race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StaleClaimConflict(_))
    }
}

impl From<serde_json::Error> for JobsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for JobsError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}
