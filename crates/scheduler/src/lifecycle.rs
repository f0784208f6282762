//! The run template every worker goes through.
//!
//! [`LifecycleRunner::run`] drives a [`WorkerStrategy`] strictly in order:
//!
//! 1. `before`
//! 2. mark started, `on_update_definition`
//! 3. `execute`
//! 4. `on_success`
//! 5. mark completed (`on_auto_remove` first when the job auto-removes),
//!    `on_update_definition`
//!
//! If any step fails: `on_error`, mark failed, `on_update_definition`, and the
//! original error is returned so the transport can decide on redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error};

use hourglass_core::WorkerDefinition;
use hourglass_queue::Delivery;
use hourglass_storage::{JobStore, StoreError};

use crate::audit::{AuditEvent, AuditSink, RunStatus, TracingAuditSink};
use crate::error::WorkerError;

/// Per-phase inputs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunData {
    pub before: Option<Value>,
    /// Executor input (the planner's serialized item).
    pub execute: Option<String>,
    pub after: Option<Value>,
}

impl RunData {
    pub fn execute(body: impl Into<String>) -> Self {
        Self {
            execute: Some(body.into()),
            ..Default::default()
        }
    }
}

impl From<&Delivery> for RunData {
    fn from(delivery: &Delivery) -> Self {
        Self {
            execute: delivery.body.clone(),
            ..Default::default()
        }
    }
}

/// Hooks a concrete worker flavor plugs into the run template.
#[async_trait]
pub trait WorkerStrategy: Send {
    async fn before(&mut self, def: &WorkerDefinition, data: Option<&Value>) -> Result<(), WorkerError>;

    async fn execute(&mut self, def: &WorkerDefinition, data: Option<&str>) -> Result<Value, WorkerError>;

    async fn on_success(
        &mut self,
        def: &WorkerDefinition,
        data: Option<&Value>,
        result: &Value,
    ) -> Result<(), WorkerError>;

    async fn on_error(&mut self, def: &WorkerDefinition, error: &WorkerError);

    /// Persist the definition's timing fields.
    async fn on_update_definition(&mut self, def: &WorkerDefinition) -> Result<(), WorkerError>;

    async fn on_auto_remove(&mut self, def: &WorkerDefinition) -> Result<(), WorkerError>;

    /// True when `before` decided this run must not proceed.
    fn skipped(&self) -> bool {
        false
    }
}

/// Drives strategies through the run template and reports to the audit sink.
#[derive(Clone)]
pub struct LifecycleRunner {
    audit: Arc<dyn AuditSink>,
}

impl Default for LifecycleRunner {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl LifecycleRunner {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub async fn run(
        &self,
        strategy: &mut dyn WorkerStrategy,
        def: &mut WorkerDefinition,
        data: RunData,
    ) -> Result<Value, WorkerError> {
        match self.attempt(strategy, def, &data).await {
            Ok(result) => Ok(result),
            Err(err) => {
                strategy.on_error(def, &err).await;
                self.audit.record(
                    AuditEvent::new(RunStatus::Failed, &def.worker_name, "run failed")
                        .data(json!({ "id": def.id, "retries": def.retries }))
                        .error(&err),
                );

                if let Err(e) = def.set_failed(&err.message()) {
                    error!(worker = %def.worker_name, error = %e, "could not reschedule failed run");
                }
                if let Err(e) = strategy.on_update_definition(def).await {
                    error!(worker = %def.worker_name, error = %e, "could not persist failed run");
                }
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        strategy: &mut dyn WorkerStrategy,
        def: &mut WorkerDefinition,
        data: &RunData,
    ) -> Result<Value, WorkerError> {
        strategy.before(def, data.before.as_ref()).await?;
        if strategy.skipped() {
            self.audit
                .record(AuditEvent::new(RunStatus::Skipped, &def.worker_name, "run skipped"));
            return Ok(Value::Null);
        }

        def.set_started();
        strategy.on_update_definition(def).await?;
        self.audit.record(
            AuditEvent::new(RunStatus::Started, &def.worker_name, "run started")
                .data(json!({ "id": def.id, "retries": def.retries })),
        );

        let result = strategy.execute(def, data.execute.as_deref()).await?;
        strategy.on_success(def, data.after.as_ref(), &result).await?;

        def.set_completed()?;
        if def.auto_remove {
            strategy.on_auto_remove(def).await?;
        }
        strategy.on_update_definition(def).await?;

        self.audit.record(
            AuditEvent::new(RunStatus::Completed, &def.worker_name, "run completed").data(json!({
                "id": def.id,
                "durationMs": def.last_duration,
                "nextRun": def.next_run,
            })),
        );
        Ok(result)
    }
}

/// Write the definition back to its job row. A row already removed by
/// `autoRemove` is not an error.
pub async fn persist_definition(store: &dyn JobStore, def: &WorkerDefinition) -> Result<(), WorkerError> {
    match store.update_worker_definition(def).await {
        Ok(()) => Ok(()),
        Err(StoreError::NotFound(key)) if def.auto_remove => {
            debug!(worker = %def.worker_name, key = %key, "job already removed");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Decode job parameters into a worker's typed params. A null value decodes
/// as an empty object.
pub fn decode_params<P: DeserializeOwned>(value: &Value) -> Result<P, serde_json::Error> {
    match value {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        other => P::deserialize(other),
    }
}
