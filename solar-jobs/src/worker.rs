use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{store::JobStore, JobEngine, JobsError, JobsResult};

/// Handle for managing the claim loop
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<JobsResult<()>>,
}

impl WorkerHandle {
    /// Stop claiming new jobs and wait for the loop to exit
    ///
    /// Jobs already executing keep running on the pool.
    pub async fn shutdown(self) -> JobsResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| JobsError::Internal(format!("Worker join error: {}", e)))?
    }
}

/// Start a loop that claims and performs queued jobs whenever a pool slot is free
pub fn start_workers<S: JobStore + 'static>(engine: &JobEngine<S>) -> WorkerHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let worker = Worker {
        engine: engine.clone(),
        poll_interval: engine.config().poll_interval,
    };

    let join_handle = tokio::spawn(worker.run(shutdown_rx));
    info!(pool_size = engine.config().pool_size, "Started job worker");

    WorkerHandle {
        shutdown_tx,
        join_handle,
    }
}

struct Worker<S: JobStore> {
    engine: JobEngine<S>,
    poll_interval: Duration,
}

impl<S: JobStore + 'static> Worker<S> {
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) -> JobsResult<()> {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Worker shutdown requested");
                    break;
                }

                result = self.engine.claim_and_perform() => {
                    match result {
                        Ok(Some(task)) => {
                            debug!(job_id = %task.id(), "Dispatched job");
                        }
                        Ok(None) => {
                            // Nothing queued, wait a bit
                            tokio::time::sleep(self.poll_interval).await;
                        }
                        Err(e) => {
                            error!("Error claiming job: {}", e);
                            tokio::time::sleep(self.poll_interval).await;
                        }
                    }
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }
}
