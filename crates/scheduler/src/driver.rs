//! Periodic entry point: find what is due and launch it.
//!
//! The driver holds no locking logic; at-most-once execution is enforced by
//! the single-thread strategy or by the queue's delivery semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use hourglass_core::WorkerDefinition;
use hourglass_storage::JobStore;

use crate::error::WorkerError;
use crate::launcher::{LaunchReport, Launcher};
use crate::targets::TargetRegistry;

/// Source of the runs that are due now.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn worker_definitions(&self) -> Result<Vec<WorkerDefinition>, WorkerError>;
}

/// Due jobs from the store, each paired with its worker's registered target.
pub struct PendingJobScheduler {
    store: Arc<dyn JobStore>,
    targets: Arc<TargetRegistry>,
}

impl PendingJobScheduler {
    pub fn new(store: Arc<dyn JobStore>, targets: Arc<TargetRegistry>) -> Self {
        Self { store, targets }
    }
}

#[async_trait]
impl JobScheduler for PendingJobScheduler {
    async fn worker_definitions(&self) -> Result<Vec<WorkerDefinition>, WorkerError> {
        let jobs = self.store.pending_jobs(Utc::now()).await?;
        debug!(count = jobs.len(), "pending jobs");

        let defs = jobs
            .iter()
            .filter_map(|job| match self.targets.get(&job.name) {
                Some(target) => Some(WorkerDefinition::from_job(job).with_target(target.clone())),
                None => {
                    warn!(worker = %job.name, job_id = job.id, "no dispatch target registered; skipping");
                    None
                }
            })
            .collect();
        Ok(defs)
    }
}

pub struct SchedulerDriver {
    scheduler: Arc<dyn JobScheduler>,
    launcher: Launcher,
}

impl SchedulerDriver {
    pub fn new(scheduler: Arc<dyn JobScheduler>, launcher: Launcher) -> Self {
        Self { scheduler, launcher }
    }

    /// One scheduling pass.
    pub async fn execute(&self) -> Result<LaunchReport, WorkerError> {
        let defs = self.scheduler.worker_definitions().await?;
        if defs.is_empty() {
            debug!("nothing due");
            return Ok(LaunchReport::default());
        }
        Ok(self.launcher.launch_workers(defs).await)
    }

    /// Tick every `interval` until `shutdown` is notified. Tick errors are
    /// logged and the loop carries on.
    pub async fn run(&self, interval: Duration, shutdown: Arc<Notify>) {
        info!(interval_secs = interval.as_secs(), "scheduler started");

        let stop = shutdown.notified();
        tokio::pin!(stop);
        stop.as_mut().enable();

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    match self.execute().await {
                        Ok(report) if !report.is_clean() => {
                            warn!(failed = report.failures.len(), "some dispatches failed");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "scheduler tick failed"),
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}
