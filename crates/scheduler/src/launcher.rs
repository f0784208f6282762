//! Concurrent dispatch of due runs to their targets.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use hourglass_core::{ServiceDefinition, WorkerDefinition};
use hourglass_queue::{OutboundMessage, QueueError, Transports};

use crate::audit::{AuditEvent, AuditSink, RunStatus, TracingAuditSink};

/// A definition that could not be handed to its transport.
#[derive(Debug)]
pub struct LaunchFailure {
    pub worker_name: String,
    pub job_id: Option<i64>,
    pub error: QueueError,
}

#[derive(Debug, Default)]
pub struct LaunchReport {
    /// Dispatches accepted by a transport.
    pub accepted: usize,
    pub failures: Vec<LaunchFailure>,
}

impl LaunchReport {
    pub fn total(&self) -> usize {
        self.accepted + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sends each definition to its queue or function target.
///
/// Resolves once every dispatch attempt has been accepted or rejected by its
/// transport, not when the dispatched work finishes.
#[derive(Clone)]
pub struct Launcher {
    transports: Arc<dyn Transports>,
    audit: Arc<dyn AuditSink>,
}

impl Launcher {
    pub fn new(transports: Arc<dyn Transports>) -> Self {
        Self::with_audit(transports, Arc::new(TracingAuditSink))
    }

    pub fn with_audit(transports: Arc<dyn Transports>, audit: Arc<dyn AuditSink>) -> Self {
        Self { transports, audit }
    }

    pub async fn launch_workers(&self, defs: Vec<WorkerDefinition>) -> LaunchReport {
        let results = join_all(defs.iter().map(|def| self.launch(def))).await;

        let mut report = LaunchReport::default();
        for (def, result) in defs.iter().zip(results) {
            match result {
                Ok(()) => {
                    report.accepted += 1;
                    self.audit.record(
                        AuditEvent::new(RunStatus::Dispatched, &def.worker_name, "dispatched")
                            .data(json!({ "id": def.id, "nextRun": def.next_run })),
                    );
                }
                Err(error) => {
                    warn!(worker = %def.worker_name, job_id = ?def.id, error = %error, "dispatch failed");
                    self.audit.record(
                        AuditEvent::new(RunStatus::Failed, &def.worker_name, "dispatch failed")
                            .data(json!({ "id": def.id }))
                            .error(&error),
                    );
                    report.failures.push(LaunchFailure {
                        worker_name: def.worker_name.clone(),
                        job_id: def.id,
                        error,
                    });
                }
            }
        }

        if report.total() > 0 {
            info!(
                accepted = report.accepted,
                failed = report.failures.len(),
                "workers launched"
            );
        }
        report
    }

    async fn launch(&self, def: &WorkerDefinition) -> Result<(), QueueError> {
        let target = def
            .target
            .as_ref()
            .ok_or_else(|| QueueError::NotFound(format!("no dispatch target for {}", def.worker_name)))?;

        match target {
            ServiceDefinition::Queue {
                connection_config,
                send_params,
            } => {
                let message = OutboundMessage::dispatch(send_params.clone(), def)?;
                self.transports.send_message(connection_config, message).await
            }
            ServiceDefinition::Function {
                connection_config,
                invoke_params,
            } => {
                let payload = def
                    .to_payload()
                    .map_err(|e| QueueError::Invoke(format!("cannot serialize {}: {e}", def.worker_name)))?;
                self.transports
                    .invoke_async(connection_config, invoke_params, payload)
                    .await
            }
        }
    }
}
