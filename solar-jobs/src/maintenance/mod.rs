//! Periodic sweeps that keep the store and the task registry tidy
//!
//! Each sweep has a single-pass method for direct use and a `run` loop that
//! repeats it on a fixed period until shut down.

pub mod purger;
pub mod reaper;

pub use purger::{JobRecordPurger, RegistryPurger};
pub use reaper::StaleTaskReaper;

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{store::JobStore, JobEngine, JobsResult};

/// Handle for the maintenance loops started by [`spawn_maintenance`]
pub struct MaintenanceHandle {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Number of loops running
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every loop and wait for them to exit
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Maintenance loop ended abnormally: {}", e);
            }
        }
    }
}

/// Start every maintenance loop the engine configuration enables
///
/// The registry purger always runs. The stale task reaper needs
/// `stale_task_age` and the record purger needs `completed_job_retention`.
pub fn spawn_maintenance<S: JobStore + 'static>(engine: &JobEngine<S>) -> MaintenanceHandle {
    let config = engine.config();
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    if let Some(age) = config.stale_task_age {
        let reaper = StaleTaskReaper::new(engine.clone(), age).with_interval(config.reaper_interval);
        handles.push(tokio::spawn(reaper.run(shutdown.child_token())));
    }

    let purger = RegistryPurger::new(engine.clone()).with_interval(config.purger_interval);
    handles.push(tokio::spawn(purger.run(shutdown.child_token())));

    if let Some(retention) = config.completed_job_retention {
        let purger = JobRecordPurger::new(engine.clone(), retention).with_interval(config.job_purge_interval);
        handles.push(tokio::spawn(purger.run(shutdown.child_token())));
    }

    MaintenanceHandle { shutdown, handles }
}

/// Repeat `sweep` every `period` until `shutdown` fires
async fn run_periodic<F, Fut, T>(name: &'static str, period: Duration, shutdown: CancellationToken, mut sweep: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = JobsResult<T>>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Starting {} with interval: {:?}", name, period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sweep().await {
                    warn!("Error during {}: {}", name, e);
                }
            }
        }
    }

    info!("{} stopped", name);
}
