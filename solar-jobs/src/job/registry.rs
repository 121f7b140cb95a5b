use std::collections::HashMap;
use std::sync::Arc;

use crate::{JobsError, JobsResult};
use super::JobExecutor;

/// Registry mapping job types to their executors
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor for a job type
    pub fn register(&mut self, job_type: impl Into<String>, executor: Arc<dyn JobExecutor>) -> JobsResult<()> {
        let job_type = job_type.into();
        if self.executors.contains_key(&job_type) {
            return Err(JobsError::Internal(format!("Job type '{}' already registered", job_type)));
        }

        self.executors.insert(job_type, executor);
        Ok(())
    }

    /// Look up the executor for a job type
    pub fn get(&self, job_type: &str) -> JobsResult<Arc<dyn JobExecutor>> {
        self.executors
            .get(job_type)
            .cloned()
            .ok_or_else(|| JobsError::UnknownJobType(job_type.to_string()))
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.executors.contains_key(job_type)
    }

    /// Get all registered job types
    pub fn registered_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{executor_fn, ExecutionContext};

    fn noop() -> Arc<dyn JobExecutor> {
        Arc::new(executor_fn(|_ctx: ExecutionContext| async { Ok(None) }))
    }

    #[test]
    fn test_executor_registry() {
        let mut registry = ExecutorRegistry::new();
        registry.register("datum_delete", noop()).unwrap();

        assert!(registry.is_registered("datum_delete"));
        assert_eq!(registry.registered_types(), vec!["datum_delete"]);
        assert!(registry.get("datum_delete").is_ok());
    }

    #[test]
    fn test_duplicate_and_unknown_types() {
        let mut registry = ExecutorRegistry::new();
        registry.register("datum_export", noop()).unwrap();

        assert!(registry.register("datum_export", noop()).is_err());
        assert!(matches!(registry.get("nope"), Err(JobsError::UnknownJobType(t)) if t == "nope"));
    }
}
