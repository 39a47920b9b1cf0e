//! Background maintenance loops.
//!
//! Each job runs on its own interval in its own task. A tick executes
//! inline in the loop, so a job can never overlap itself; failures are
//! logged per tick and never stop future ticks.

pub mod jobs;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A periodic maintenance job.
#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    /// Unique identifier, used in log lines.
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// One tick. Returns a short outcome line for the log.
    async fn run(&self) -> Result<String>;
}

/// Spawn one loop task per job. Jobs run once immediately, then on their
/// interval, until the token is cancelled.
pub fn spawn_maintenance(
    jobs: Vec<Arc<dyn MaintenanceJob>>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .map(|job| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!(
                    "Maintenance job '{}' scheduled every {:?}: {}",
                    job.id(),
                    job.interval(),
                    job.description()
                );
                let mut interval = tokio::time::interval(job.interval());
                // A tick that comes due while the previous run is still in
                // progress is delayed, not stacked.
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match job.run().await {
                                Ok(outcome) => {
                                    info!("Maintenance job '{}': {}", job.id(), outcome);
                                }
                                Err(err) => {
                                    error!("Maintenance job '{}' failed: {:#}", job.id(), err);
                                }
                            }
                        }
                        _ = shutdown.cancelled() => {
                            info!("Maintenance job '{}' stopped", job.id());
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}
