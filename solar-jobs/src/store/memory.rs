use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{JobId, JobRecord, JobState, JobsResult, store::JobStore};

/// In-memory job store for testing and development
///
/// Clones share the same table, so several engines built over clones of one
/// store behave like separate processes sharing a database.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    /// Job records indexed by id
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Backdate a job's last activity (test helper)
    pub fn force_last_activity(&self, id: &JobId, at: DateTime<Utc>) -> bool {
        match self.jobs.write().get_mut(id) {
            Some(record) => {
                record.modified = at;
                true
            }
            None => false,
        }
    }

    /// Backdate a job's completion time (test helper)
    pub fn force_completed_at(&self, id: &JobId, at: DateTime<Utc>) -> bool {
        match self.jobs.write().get_mut(id) {
            Some(record) if record.completed.is_some() => {
                record.completed = Some(at);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn claim_oldest_queued(&self) -> JobsResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();

        let oldest = jobs
            .values()
            .filter(|r| r.state == JobState::Queued)
            .min_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)))
            .map(|r| r.id);

        Ok(oldest.and_then(|id| {
            jobs.get_mut(&id).map(|record| {
                record.transition(JobState::Claimed, now);
                record.clone()
            })
        }))
    }

    async fn cas_state(&self, id: &JobId, desired: JobState, expected: &[JobState]) -> JobsResult<bool> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(record) if !record.state.is_terminal() && expected.contains(&record.state) => {
                record.transition(desired, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_complete(
        &self,
        id: &JobId,
        success: bool,
        message: Option<String>,
        expected: &[JobState],
    ) -> JobsResult<bool> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(record) if !record.state.is_terminal() && expected.contains(&record.state) => {
                record.complete(success, message, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_stale_state(
        &self,
        expected: JobState,
        older_than: DateTime<Utc>,
        new_state: JobState,
    ) -> JobsResult<u64> {
        if expected.is_terminal() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut count = 0;
        for record in self.jobs.write().values_mut() {
            if record.state == expected && record.modified < older_than {
                record.transition(new_state, now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn update_progress(&self, id: &JobId, percent_complete: f64, result_count: i64) -> JobsResult<()> {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(id) {
            if record.state == JobState::Executing {
                record.record_progress(percent_complete, result_count, Utc::now());
            }
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> JobsResult<Option<JobRecord>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    async fn save(&self, record: &JobRecord) -> JobsResult<()> {
        self.jobs.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn purge_completed_older_than(&self, older_than: DateTime<Utc>) -> JobsResult<u64> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, r| !(r.state == JobState::Completed && r.completed.is_some_and(|c| c < older_than)));
        Ok((before - jobs.len()) as u64)
    }

    async fn find_for_owner(&self, owner_id: i64, state: Option<JobState>) -> JobsResult<Vec<JobRecord>> {
        let jobs = self.jobs.read();
        let mut found: Vec<JobRecord> = jobs
            .values()
            .filter(|r| r.owner_id() == owner_id && state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued(owner_id: i64) -> JobRecord {
        JobRecord::new(JobId::new(owner_id), "test_job", json!({}))
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let store = MemoryJobStore::new();
        let mut older = queued(1);
        older.created = Utc::now() - chrono::Duration::minutes(5);
        let newer = queued(1);
        store.save(&newer).await.unwrap();
        store.save(&older).await.unwrap();

        let claimed = store.claim_oldest_queued().await.unwrap().unwrap();
        assert_eq!(claimed.id, older.id);
        assert_eq!(claimed.state, JobState::Claimed);

        let next = store.claim_oldest_queued().await.unwrap().unwrap();
        assert_eq!(next.id, newer.id);
        assert!(store.claim_oldest_queued().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cas_requires_expected_state() {
        let store = MemoryJobStore::new();
        let record = queued(1);
        store.save(&record).await.unwrap();

        assert!(!store.cas_state(&record.id, JobState::Executing, &[JobState::Claimed]).await.unwrap());
        assert!(store.cas_state(&record.id, JobState::Executing, &[JobState::Queued]).await.unwrap());

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Executing);
        assert!(stored.started.is_some());
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let store = MemoryJobStore::new();
        let record = queued(1);
        store.save(&record).await.unwrap();
        assert!(store.cas_complete(&record.id, true, None, &[JobState::Queued]).await.unwrap());

        assert!(!store.cas_state(&record.id, JobState::Queued, &[JobState::Completed]).await.unwrap());
        assert!(!store.cas_complete(&record.id, false, None, &[JobState::Completed]).await.unwrap());
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.success, Some(true));
        assert!(stored.completed.is_some());
    }

    #[tokio::test]
    async fn test_cas_into_completed_stamps_completion() {
        let store = MemoryJobStore::new();
        let record = queued(1);
        store.save(&record).await.unwrap();

        assert!(store.cas_state(&record.id, JobState::Completed, &[JobState::Queued]).await.unwrap());
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert!(stored.completed.is_some());

        // completion timestamps make the row eligible for purging
        assert_eq!(store.purge_completed_older_than(Utc::now() + chrono::Duration::seconds(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_progress_only_while_executing() {
        let store = MemoryJobStore::new();
        let record = queued(1);
        store.save(&record).await.unwrap();

        store.update_progress(&record.id, 0.5, 5).await.unwrap();
        assert_eq!(store.get(&record.id).await.unwrap().unwrap().result_count, 0);

        store.cas_state(&record.id, JobState::Executing, &[JobState::Queued]).await.unwrap();
        store.update_progress(&record.id, 0.5, 5).await.unwrap();
        store.update_progress(&record.id, 0.4, 3).await.unwrap();
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.percent_complete, 0.5);
        assert_eq!(stored.result_count, 5);
    }

    #[tokio::test]
    async fn test_find_for_owner_filters() {
        let store = MemoryJobStore::new();
        let a = queued(1);
        let b = queued(1);
        let other = queued(2);
        for r in [&a, &b, &other] {
            store.save(r).await.unwrap();
        }
        store.cas_state(&b.id, JobState::Claimed, &[JobState::Queued]).await.unwrap();

        assert_eq!(store.find_for_owner(1, None).await.unwrap().len(), 2);
        let queued_only = store.find_for_owner(1, Some(JobState::Queued)).await.unwrap();
        assert_eq!(queued_only.len(), 1);
        assert_eq!(queued_only[0].id, a.id);
    }
}
