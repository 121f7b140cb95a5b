//! Authorization wrapper around the engine's entry points
//!
//! Non-admin actors may only touch jobs of their own owner id.

use std::sync::Arc;
use serde_json::Value;
use tracing::warn;

use crate::{store::JobStore, task::Task, JobEngine, JobId, JobRecord, JobState, JobsError, JobsResult};

/// Identity of the caller, passed explicitly to every authorized call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub admin: bool,
}

impl Actor {
    pub fn user(user_id: i64) -> Self {
        Self { user_id, admin: false }
    }

    /// An operator allowed to act on any owner's jobs
    pub fn admin(user_id: i64) -> Self {
        Self { user_id, admin: true }
    }

    pub fn can_access(&self, owner_id: i64) -> bool {
        self.admin || self.user_id == owner_id
    }
}

/// Job engine facade that checks the actor against each job's owner
pub struct AuthorizedJobs<S: JobStore> {
    engine: JobEngine<S>,
}

impl<S: JobStore> Clone for AuthorizedJobs<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S: JobStore + 'static> AuthorizedJobs<S> {
    pub fn new(engine: JobEngine<S>) -> Self {
        Self { engine }
    }

    /// The unchecked engine underneath
    pub fn engine(&self) -> &JobEngine<S> {
        &self.engine
    }

    pub fn authorize(&self, actor: &Actor, owner_id: i64) -> JobsResult<()> {
        if actor.can_access(owner_id) {
            Ok(())
        } else {
            warn!(user_id = actor.user_id, owner_id, "Denied access to jobs");
            Err(JobsError::Forbidden(owner_id))
        }
    }

    pub async fn submit(
        &self,
        actor: &Actor,
        owner_id: i64,
        job_type: &str,
        configuration: Value,
    ) -> JobsResult<JobRecord> {
        self.authorize(actor, owner_id)?;
        self.engine.submit(owner_id, job_type, configuration).await
    }

    pub async fn job(&self, actor: &Actor, id: &JobId) -> JobsResult<JobRecord> {
        self.authorize(actor, id.owner_id)?;
        self.engine.job(id).await
    }

    pub async fn task(&self, actor: &Actor, id: &JobId) -> JobsResult<Arc<Task>> {
        self.authorize(actor, id.owner_id)?;
        self.engine.task_for_id(id).await
    }

    pub async fn perform_job(&self, actor: &Actor, id: &JobId) -> JobsResult<Arc<Task>> {
        self.authorize(actor, id.owner_id)?;
        self.engine.perform_job(id).await
    }

    pub async fn cancel(&self, actor: &Actor, id: &JobId) -> JobsResult<bool> {
        self.authorize(actor, id.owner_id)?;
        self.engine.cancel(id).await
    }

    pub async fn jobs_for_owner(
        &self,
        actor: &Actor,
        owner_id: i64,
        state: Option<JobState>,
    ) -> JobsResult<Vec<JobRecord>> {
        self.authorize(actor, owner_id)?;
        self.engine.jobs_for_owner(owner_id, state).await
    }
}
