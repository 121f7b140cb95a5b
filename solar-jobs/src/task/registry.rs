use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::JobId;
use super::Task;

/// Process-local map of live tasks
///
/// All mutation goes through atomic map operations, so concurrent callers
/// in one process always agree on a single [`Task`] per job.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<JobId, Arc<Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the task tracked for a job
    pub fn get(&self, id: &JobId) -> Option<Arc<Task>> {
        self.tasks.get(id).map(|t| t.value().clone())
    }

    /// Install a task unless one is already tracked, returning whichever is tracked
    pub fn put_if_absent(&self, task: Arc<Task>) -> Arc<Task> {
        self.tasks.entry(*task.id()).or_insert(task).value().clone()
    }

    /// Stop tracking a job
    pub fn remove(&self, id: &JobId) -> Option<Arc<Task>> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks executing in this process
    pub fn executing_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_executing()).count()
    }

    /// Tasks neither executing here nor known to be complete
    ///
    /// Their snapshots can fall behind the store when another process runs the job.
    pub fn idle(&self) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .filter(|t| !t.is_executing() && !t.is_done())
            .map(|t| t.value().clone())
            .collect()
    }

    /// Evict completed tasks whose completion is older than `min_age`
    pub fn purge_completed(&self, min_age: chrono::Duration, now: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| {
            task.is_executing() || !task.completed_age(now).is_some_and(|age| age > min_age)
        });
        before.saturating_sub(self.tasks.len())
    }
}
