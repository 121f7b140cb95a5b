use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobRecord, JobState};

/// Status change notification, published on every transition and progress update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusEvent {
    pub job_id: JobId,
    pub owner_id: i64,
    pub state: JobState,
    pub success: Option<bool>,
    pub message: Option<String>,
    pub percent_complete: f64,
    pub result_count: i64,
    pub timestamp: DateTime<Utc>,
}

impl JobStatusEvent {
    /// Build an event from the current record
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            owner_id: record.owner_id(),
            state: record.state,
            success: record.success,
            message: record.message.clone(),
            percent_complete: record.percent_complete,
            result_count: record.result_count,
            timestamp: Utc::now(),
        }
    }

    /// Check if the event reports a successful completion
    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed && self.success == Some(true)
    }
}
