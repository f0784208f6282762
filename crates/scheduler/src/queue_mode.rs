//! Planner/executor fan-out over a queue.
//!
//! A PLANNER run discovers work items and sends each one as its own queue
//! message; every message later arrives as an EXECUTOR run of the same worker.
//! Only the planner owns the job's schedule: executor runs never persist
//! timing and never auto-remove the row.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use hourglass_core::{ConnectionConfig, SendParams, ServiceDefinition, WorkerDefinition};
use hourglass_queue::{OutboundMessage, RunMode, Transports};
use hourglass_storage::JobStore;

use crate::audit::{AuditEvent, AuditSink, RunStatus};
use crate::error::WorkerError;
use crate::lifecycle::{decode_params, persist_definition, WorkerStrategy};

/// Business logic for a fan-out worker.
#[async_trait]
pub trait QueueWorker: Send + Sync + 'static {
    type Params: DeserializeOwned + Send + Sync;
    type Item: Serialize + DeserializeOwned + Send + Sync;

    /// Discover the items to process. An empty list is a no-op run.
    async fn run_planner(&self, params: &Self::Params, def: &WorkerDefinition) -> anyhow::Result<Vec<Self::Item>>;

    /// Process one item.
    async fn run_executor(
        &self,
        params: &Self::Params,
        item: Self::Item,
        def: &WorkerDefinition,
    ) -> anyhow::Result<()>;
}

/// Queue that planner items are sent to.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQueue {
    pub connection_config: ConnectionConfig,
    pub send_params: SendParams,
}

impl ItemQueue {
    /// The queue half of a dispatch target; function targets have none.
    pub fn from_target(target: &ServiceDefinition) -> Option<Self> {
        match target {
            ServiceDefinition::Queue {
                connection_config,
                send_params,
            } => Some(Self {
                connection_config: connection_config.clone(),
                send_params: send_params.clone(),
            }),
            ServiceDefinition::Function { .. } => None,
        }
    }
}

/// [`WorkerStrategy`] for one run of a [`QueueWorker`].
pub struct QueueStrategy<W: QueueWorker> {
    worker: Arc<W>,
    mode: RunMode,
    store: Arc<dyn JobStore>,
    transports: Arc<dyn Transports>,
    item_queue: Option<ItemQueue>,
    audit: Arc<dyn AuditSink>,
}

impl<W: QueueWorker> QueueStrategy<W> {
    pub fn new(
        worker: Arc<W>,
        mode: RunMode,
        store: Arc<dyn JobStore>,
        transports: Arc<dyn Transports>,
        item_queue: Option<ItemQueue>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            worker,
            mode,
            store,
            transports,
            item_queue,
            audit,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    fn params(&self, def: &WorkerDefinition) -> Option<W::Params> {
        match decode_params(&def.parameters) {
            Ok(params) => Some(params),
            Err(e) => {
                error!(worker = %def.worker_name, error = %e, "invalid job parameters; skipping run");
                None
            }
        }
    }

    async fn plan(&self, def: &WorkerDefinition) -> Result<Value, WorkerError> {
        let Some(params) = self.params(def) else {
            return Ok(Value::Null);
        };

        let items = self.worker.run_planner(&params, def).await?;
        if items.is_empty() {
            info!(worker = %def.worker_name, "planner found no items");
            return Ok(json!({ "planned": 0 }));
        }

        let queue = self.item_queue.as_ref().ok_or_else(|| {
            WorkerError::Config(format!("no queue target for {} planner items", def.worker_name))
        })?;

        let total = items.len();
        let sends = items.iter().enumerate().map(|(index, item)| async move {
            let body = serde_json::to_string(item)
                .map_err(|e| format!("item {index}: cannot serialize: {e}"))?;
            let message = OutboundMessage::item(queue.send_params.clone(), def, body);
            self.transports
                .send_message(&queue.connection_config, message)
                .await
                .map_err(|e| format!("item {index}: {e}"))
        });

        let failures: Vec<String> = join_all(sends)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        let sent = total - failures.len();
        if !failures.is_empty() {
            // Sent items are already in flight; the planner run still succeeds.
            error!(
                worker = %def.worker_name,
                sent,
                failed = failures.len(),
                errors = %failures.join("; "),
                "planner fan-out partially failed"
            );
        }

        self.audit.record(
            AuditEvent::new(RunStatus::Planned, &def.worker_name, format!("dispatched {sent} of {total} items"))
                .data(json!({ "sent": sent, "failed": failures.len() })),
        );
        Ok(json!({ "planned": total, "sent": sent }))
    }

    async fn execute_item(&self, def: &WorkerDefinition, data: Option<&str>) -> Result<Value, WorkerError> {
        let Some(raw) = data else {
            error!(worker = %def.worker_name, "executor run without item payload; skipping");
            return Ok(Value::Null);
        };
        let item: W::Item = match serde_json::from_str(raw) {
            Ok(item) => item,
            Err(e) => {
                error!(worker = %def.worker_name, error = %e, "malformed executor payload; skipping");
                return Ok(Value::Null);
            }
        };
        let Some(params) = self.params(def) else {
            return Ok(Value::Null);
        };

        self.worker.run_executor(&params, item, def).await?;
        Ok(Value::Null)
    }
}

#[async_trait]
impl<W: QueueWorker> WorkerStrategy for QueueStrategy<W> {
    async fn before(&mut self, def: &WorkerDefinition, _data: Option<&Value>) -> Result<(), WorkerError> {
        debug!(worker = %def.worker_name, mode = %self.mode, "queue worker run");
        Ok(())
    }

    async fn execute(&mut self, def: &WorkerDefinition, data: Option<&str>) -> Result<Value, WorkerError> {
        match self.mode {
            RunMode::Planner => self.plan(def).await,
            RunMode::Executor => self.execute_item(def, data).await,
        }
    }

    async fn on_success(
        &mut self,
        def: &WorkerDefinition,
        _data: Option<&Value>,
        result: &Value,
    ) -> Result<(), WorkerError> {
        debug!(worker = %def.worker_name, mode = %self.mode, result = %result, "queue worker succeeded");
        Ok(())
    }

    async fn on_error(&mut self, def: &WorkerDefinition, error: &WorkerError) {
        error!(worker = %def.worker_name, mode = %self.mode, error = %error, "queue worker failed");
    }

    async fn on_update_definition(&mut self, def: &WorkerDefinition) -> Result<(), WorkerError> {
        match self.mode {
            RunMode::Planner => persist_definition(self.store.as_ref(), def).await,
            RunMode::Executor => Ok(()),
        }
    }

    async fn on_auto_remove(&mut self, def: &WorkerDefinition) -> Result<(), WorkerError> {
        if self.mode == RunMode::Executor {
            return Ok(());
        }
        let removed = self.store.remove(&def.job_key()).await?;
        info!(worker = %def.worker_name, removed, "auto-removed job");
        Ok(())
    }
}
