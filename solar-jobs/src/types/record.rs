use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

/// Job state lifecycle
///
/// ```text
/// Queued ──claim──▶ Claimed ──begin──▶ Executing ──▶ Completed
/// Executing ──(stale reset)──▶ Queued
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting to be claimed by a worker
    Queued,

    /// Claimed by a worker that has not started executing yet
    Claimed,

    /// Currently executing in exactly one process
    Executing,

    /// Finished, successfully or not; never revived
    Completed,
}

impl JobState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Get the state name as stored
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Claimed => "Claimed",
            Self::Executing => "Executing",
            Self::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(Self::Queued),
            "Claimed" => Ok(Self::Claimed),
            "Executing" => Ok(Self::Executing),
            "Completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

/// Durable job record, owned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,

    /// Executor family used to run the job
    pub job_type: String,

    /// Current job state
    pub state: JobState,

    /// Opaque configuration handed to the executor
    pub configuration: Value,

    /// Progress in the range `[0, 1]`
    pub percent_complete: f64,

    /// Units of work processed so far; never decreases
    pub result_count: i64,

    /// Outcome, set on completion
    pub success: Option<bool>,

    /// Last human-readable status
    pub message: Option<String>,

    /// When the job was submitted
    pub created: DateTime<Utc>,

    /// Last state transition or progress update
    pub modified: DateTime<Utc>,

    /// First transition into `Executing`
    pub started: Option<DateTime<Utc>>,

    /// Set iff the state is `Completed`
    pub completed: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new queued job record
    pub fn new(id: JobId, job_type: impl Into<String>, configuration: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type: job_type.into(),
            state: JobState::Queued,
            configuration,
            percent_complete: 0.0,
            result_count: 0,
            success: None,
            message: None,
            created: now,
            modified: now,
            started: None,
            completed: None,
        }
    }

    /// Owner (tenant) of the job
    pub fn owner_id(&self) -> i64 {
        self.id.owner_id
    }

    /// Check if the job finished
    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Check if the job finished successfully
    pub fn is_success(&self) -> bool {
        self.is_completed() && self.success == Some(true)
    }

    /// Apply a state transition, keeping the timestamp invariants
    pub fn transition(&mut self, state: JobState, at: DateTime<Utc>) {
        if state == JobState::Executing && self.started.is_none() {
            self.started = Some(at);
        }
        self.completed = if state == JobState::Completed { Some(at) } else { None };
        self.state = state;
        self.modified = at;
    }

    /// Mark the job completed with an outcome
    pub fn complete(&mut self, success: bool, message: Option<String>, at: DateTime<Utc>) {
        self.transition(JobState::Completed, at);
        self.success = Some(success);
        self.message = message;
    }

    /// Record progress; values never move backwards
    pub fn record_progress(&mut self, percent_complete: f64, result_count: i64, at: DateTime<Utc>) {
        self.percent_complete = self.percent_complete.max(percent_complete.clamp(0.0, 1.0));
        self.result_count = self.result_count.max(result_count);
        self.modified = at;
    }
}
