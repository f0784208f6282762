//! At most one executor per job, across concurrent deliveries.
//!
//! `before` opens a store transaction, reads the job row under an exclusive
//! lock and, when eligible, flips it to `LOCKED` with `executor_count + 1`
//! before committing. Contending runs see the lock and stand down. A failed
//! run keeps the lock; it is taken over once `timeout` seconds have passed
//! since the holder's `last_run`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use hourglass_core::{ExecutionStatus, Job, JobKey, WorkerDefinition, TIMEOUT_EXCEEDED};
use hourglass_storage::{JobStore, JobTransaction};

use crate::alert::{Alert, AlertAction, AlertContext, AlertPolicy};
use crate::audit::{AuditEvent, AuditSink, RunStatus};
use crate::error::WorkerError;
use crate::lifecycle::{decode_params, persist_definition, WorkerStrategy};

/// Business logic for a mutually exclusive worker.
#[async_trait]
pub trait SingleThreadWorker: Send + Sync + 'static {
    type Params: DeserializeOwned + Send + Sync;
    type Input: DeserializeOwned + Send;

    /// `input` is the delivery body, absent for scheduler dispatches.
    async fn run_executor(
        &self,
        params: &Self::Params,
        input: Option<Self::Input>,
        def: &WorkerDefinition,
    ) -> anyhow::Result<()>;
}

/// Outcome of the eligibility check inside the lock transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eligibility {
    Free,
    StaleTakeover,
    Locked,
}

fn eligibility(job: &Job, now: chrono::DateTime<Utc>) -> Eligibility {
    if job.execution_status != ExecutionStatus::Locked && job.executor_count < 1 {
        Eligibility::Free
    } else if job.is_lock_stale(now) {
        Eligibility::StaleTakeover
    } else {
        Eligibility::Locked
    }
}

async fn rollback(tx: Box<dyn JobTransaction>, worker: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(worker, error = %e, "rollback failed");
    }
}

/// [`WorkerStrategy`] for one run of a [`SingleThreadWorker`].
pub struct SingleThreadStrategy<W: SingleThreadWorker> {
    worker: Arc<W>,
    store: Arc<dyn JobStore>,
    alerts: Arc<dyn AlertPolicy>,
    audit: Arc<dyn AuditSink>,
    should_run: bool,
}

impl<W: SingleThreadWorker> SingleThreadStrategy<W> {
    pub fn new(
        worker: Arc<W>,
        store: Arc<dyn JobStore>,
        alerts: Arc<dyn AlertPolicy>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            worker,
            store,
            alerts,
            audit,
            should_run: false,
        }
    }

    /// Whether this run holds the job lock.
    pub fn should_run(&self) -> bool {
        self.should_run
    }

    fn alert(&self, alert: Alert, def: &WorkerDefinition, key: JobKey, job: Option<Job>) -> AlertAction {
        let ctx = AlertContext {
            alert,
            worker_name: def.worker_name.clone(),
            key,
            job,
        };
        let action = self.alerts.decide(&ctx);
        self.audit.record(
            AuditEvent::new(RunStatus::Alert, &def.worker_name, alert.to_string())
                .data(serde_json::json!({ "key": ctx.key, "raise": action == AlertAction::Raise })),
        );
        action
    }

    /// Reload the row under lock and hand the slot back.
    async fn release(&self, def: &WorkerDefinition) -> Result<(), WorkerError> {
        let key = def.job_key();
        let mut tx = self.store.begin().await?;
        let Some(mut job) = tx.populate(&key, true).await? else {
            rollback(tx, &def.worker_name).await;
            warn!(worker = %def.worker_name, key = %key, "job vanished before lock release");
            return Ok(());
        };

        if job.execution_status == ExecutionStatus::Locked {
            job.execution_status = ExecutionStatus::Active;
        }
        job.executor_count = (job.executor_count - 1).max(0);
        tx.update(&job).await?;
        tx.commit().await?;

        debug!(worker = %def.worker_name, id = job.id, "lock released");
        Ok(())
    }
}

#[async_trait]
impl<W: SingleThreadWorker> WorkerStrategy for SingleThreadStrategy<W> {
    async fn before(&mut self, def: &WorkerDefinition, _data: Option<&Value>) -> Result<(), WorkerError> {
        self.should_run = false;
        let key = def.job_key();
        let mut tx = self.store.begin().await?;

        let Some(mut job) = tx.populate(&key, true).await? else {
            rollback(tx, &def.worker_name).await;
            return match self.alert(Alert::MissingJobDefinition, def, key.clone(), None) {
                AlertAction::Raise => Err(WorkerError::MissingJobDefinition(key)),
                AlertAction::Discard => {
                    warn!(worker = %def.worker_name, key = %key, "missing job definition; run discarded");
                    Ok(())
                }
            };
        };

        let now = Utc::now();
        match eligibility(&job, now) {
            Eligibility::Free => {}
            Eligibility::StaleTakeover => {
                warn!(
                    worker = %def.worker_name,
                    id = job.id,
                    last_run = ?job.last_run,
                    timeout = job.timeout,
                    "stale lock; taking over"
                );
                job.executor_count = 0;
                job.last_error = Some(TIMEOUT_EXCEEDED.to_string());
            }
            Eligibility::Locked => {
                rollback(tx, &def.worker_name).await;
                return match self.alert(Alert::JobLocked, def, key.clone(), Some(job)) {
                    AlertAction::Raise => Err(WorkerError::JobLocked(key)),
                    AlertAction::Discard => {
                        debug!(worker = %def.worker_name, key = %key, "job locked; run discarded");
                        Ok(())
                    }
                };
            }
        }

        job.executor_count += 1;
        job.execution_status = ExecutionStatus::Locked;
        // Stamp the lock start in the same write so contenders measure
        // staleness from this run, not the previous one.
        job.last_run = Some(now);
        tx.update(&job).await?;
        tx.commit().await?;

        self.should_run = true;
        info!(worker = %def.worker_name, id = job.id, "lock acquired");
        Ok(())
    }

    async fn execute(&mut self, def: &WorkerDefinition, data: Option<&str>) -> Result<Value, WorkerError> {
        if !self.should_run {
            return Ok(Value::Null);
        }

        let params: W::Params = match decode_params(&def.parameters) {
            Ok(params) => params,
            Err(e) => {
                error!(worker = %def.worker_name, error = %e, "invalid job parameters; skipping run");
                return Ok(Value::Null);
            }
        };
        let input = match data.map(serde_json::from_str::<W::Input>).transpose() {
            Ok(input) => input,
            Err(e) => {
                error!(worker = %def.worker_name, error = %e, "malformed executor payload; skipping run");
                return Ok(Value::Null);
            }
        };

        self.worker.run_executor(&params, input, def).await?;
        Ok(Value::Null)
    }

    async fn on_success(
        &mut self,
        def: &WorkerDefinition,
        _data: Option<&Value>,
        _result: &Value,
    ) -> Result<(), WorkerError> {
        if !self.should_run {
            debug!(worker = %def.worker_name, "not holding the lock; nothing to release");
            return Ok(());
        }
        self.release(def).await
    }

    async fn on_error(&mut self, def: &WorkerDefinition, error: &WorkerError) {
        error!(
            worker = %def.worker_name,
            error = %error,
            holding_lock = self.should_run,
            "single-thread worker failed"
        );
    }

    async fn on_update_definition(&mut self, def: &WorkerDefinition) -> Result<(), WorkerError> {
        if !self.should_run {
            return Ok(());
        }
        persist_definition(self.store.as_ref(), def).await
    }

    async fn on_auto_remove(&mut self, def: &WorkerDefinition) -> Result<(), WorkerError> {
        if !self.should_run {
            return Ok(());
        }
        let removed = self.store.remove(&def.job_key()).await?;
        info!(worker = %def.worker_name, removed, "auto-removed job");
        Ok(())
    }

    fn skipped(&self) -> bool {
        !self.should_run
    }
}
