//! Routes deliveries to registered workers and runs them through the lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use hourglass_core::{Config, WorkerDefinition};
use hourglass_queue::{Delivery, RunMode, SqsConsumer, Transports};
use hourglass_storage::JobStore;

use crate::alert::{AlertPolicy, DefaultAlertPolicy};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::error::WorkerError;
use crate::lifecycle::{LifecycleRunner, RunData, WorkerStrategy};
use crate::listener::{DeliveryHandler, QueueListener};
use crate::queue_mode::{ItemQueue, QueueStrategy, QueueWorker};
use crate::single_thread::{SingleThreadStrategy, SingleThreadWorker};
use crate::targets::TargetRegistry;

/// Collaborators handed to every strategy.
#[derive(Clone)]
pub struct HostContext {
    pub store: Arc<dyn JobStore>,
    pub transports: Arc<dyn Transports>,
    pub targets: Arc<TargetRegistry>,
    pub alerts: Arc<dyn AlertPolicy>,
    pub audit: Arc<dyn AuditSink>,
}

trait RegisteredWorker: Send + Sync {
    fn strategy(&self, delivery: &Delivery, ctx: &HostContext) -> Box<dyn WorkerStrategy>;

    /// Whether this run writes timing back to the job row.
    fn owns_schedule(&self, delivery: &Delivery) -> bool;

    /// Whether the strategy reports a missing job row itself.
    fn checks_row(&self) -> bool {
        false
    }
}

struct QueueEntry<W>(Arc<W>);

impl<W: QueueWorker> RegisteredWorker for QueueEntry<W> {
    fn strategy(&self, delivery: &Delivery, ctx: &HostContext) -> Box<dyn WorkerStrategy> {
        let item_queue = ctx
            .targets
            .get(delivery.worker_name())
            .or(delivery.definition.target.as_ref())
            .and_then(ItemQueue::from_target);

        Box::new(QueueStrategy::new(
            self.0.clone(),
            delivery.run_mode(),
            ctx.store.clone(),
            ctx.transports.clone(),
            item_queue,
            ctx.audit.clone(),
        ))
    }

    fn owns_schedule(&self, delivery: &Delivery) -> bool {
        delivery.run_mode() == RunMode::Planner
    }
}

struct SingleThreadEntry<W>(Arc<W>);

impl<W: SingleThreadWorker> RegisteredWorker for SingleThreadEntry<W> {
    fn strategy(&self, _delivery: &Delivery, ctx: &HostContext) -> Box<dyn WorkerStrategy> {
        Box::new(SingleThreadStrategy::new(
            self.0.clone(),
            ctx.store.clone(),
            ctx.alerts.clone(),
            ctx.audit.clone(),
        ))
    }

    fn owns_schedule(&self, _delivery: &Delivery) -> bool {
        true
    }

    fn checks_row(&self) -> bool {
        true
    }
}

/// Worker-side entry point for queue messages and function invocations.
pub struct WorkerHost {
    runner: LifecycleRunner,
    ctx: HostContext,
    workers: HashMap<String, Arc<dyn RegisteredWorker>>,
}

impl WorkerHost {
    pub fn new(store: Arc<dyn JobStore>, transports: Arc<dyn Transports>, targets: Arc<TargetRegistry>) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        Self {
            runner: LifecycleRunner::new(audit.clone()),
            ctx: HostContext {
                store,
                transports,
                targets,
                alerts: Arc::new(DefaultAlertPolicy),
                audit,
            },
            workers: HashMap::new(),
        }
    }

    pub fn with_alert_policy(mut self, alerts: Arc<dyn AlertPolicy>) -> Self {
        self.ctx.alerts = alerts;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.runner = LifecycleRunner::new(audit.clone());
        self.ctx.audit = audit;
        self
    }

    pub fn register_queue_worker<W: QueueWorker>(mut self, name: impl Into<String>, worker: W) -> Self {
        self.workers
            .insert(name.into(), Arc::new(QueueEntry(Arc::new(worker))));
        self
    }

    pub fn register_single_thread_worker<W: SingleThreadWorker>(
        mut self,
        name: impl Into<String>,
        worker: W,
    ) -> Self {
        self.workers
            .insert(name.into(), Arc::new(SingleThreadEntry(Arc::new(worker))));
        self
    }

    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    /// Consume the configured SQS queue (`QUEUE_URL`) until `shutdown` is notified.
    pub async fn serve(self: Arc<Self>, config: &Config, shutdown: Arc<Notify>) -> Result<(), WorkerError> {
        let consumer = SqsConsumer::new(&config.aws, &config.queue).await?;
        info!(
            queue_url = %consumer.queue_url(),
            workers = self.workers.len(),
            "worker host serving"
        );
        QueueListener::new(Arc::new(consumer), config.queue.max_messages)
            .run(self, shutdown)
            .await;
        Ok(())
    }

    /// Run one delivery to completion and return the strategy's result.
    pub async fn run_delivery(&self, delivery: Delivery) -> Result<Value, WorkerError> {
        let entry = self
            .workers
            .get(delivery.worker_name())
            .ok_or_else(|| WorkerError::UnknownWorker(delivery.worker_name().to_string()))?;

        debug!(worker = %delivery.worker_name(), mode = %delivery.run_mode(), "running delivery");
        let mut strategy = entry.strategy(&delivery, &self.ctx);
        let data = RunData::from(&delivery);
        let mut def = if delivery.routed && entry.owns_schedule(&delivery) {
            self.resolve_definition(entry.as_ref(), delivery.definition).await?
        } else {
            delivery.definition
        };
        self.runner.run(strategy.as_mut(), &mut def, data).await
    }

    /// Replace an attribute-built definition with one read from its job row,
    /// so the run persists the row's real schedule instead of defaults.
    async fn resolve_definition(
        &self,
        entry: &dyn RegisteredWorker,
        routed: WorkerDefinition,
    ) -> Result<WorkerDefinition, WorkerError> {
        let key = routed.job_key();
        match self.ctx.store.find(&key).await? {
            Some(job) => {
                debug!(worker = %routed.worker_name, id = job.id, "loaded job row for routed delivery");
                let mut def = WorkerDefinition::from_job(&job);
                def.target = routed.target;
                Ok(def)
            }
            None if entry.checks_row() => Ok(routed),
            None => {
                warn!(worker = %routed.worker_name, key = %key, "routed planner run without a job row");
                Err(WorkerError::MissingJobDefinition(key))
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for WorkerHost {
    async fn handle(&self, delivery: Delivery) -> Result<(), WorkerError> {
        self.run_delivery(delivery).await.map(|_| ())
    }
}
