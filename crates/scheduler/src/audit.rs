//! Audit sink for worker runs.
//!
//! Every lifecycle phase reports `(status, worker_name, message, data?, error?)`
//! to an [`AuditSink`]. [`TracingAuditSink`] forwards to `tracing`;
//! [`AuditLog`] keeps a bounded per-worker history in memory with FIFO
//! eviction, queryable by minimum level, status, limit and time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Severity level for audit entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Numeric severity for comparison (higher = more severe).
    pub fn as_severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }
}

/// What happened to a worker run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Scheduler handed the run to a transport.
    Dispatched,
    Started,
    /// Planner fanned out items.
    Planned,
    Completed,
    Failed,
    /// Run skipped (lock held elsewhere, empty payload, ...).
    Skipped,
    Alert,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Dispatched => "dispatched",
            RunStatus::Started => "started",
            RunStatus::Planned => "planned",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
            RunStatus::Alert => "alert",
        }
    }

    pub fn level(&self) -> LogLevel {
        match self {
            RunStatus::Dispatched | RunStatus::Planned => LogLevel::Debug,
            RunStatus::Started | RunStatus::Completed => LogLevel::Info,
            RunStatus::Skipped | RunStatus::Alert => LogLevel::Warning,
            RunStatus::Failed => LogLevel::Error,
        }
    }
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub worker_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(status: RunStatus, worker_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            worker_name: worker_name.into(),
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn level(&self) -> LogLevel {
        self.status.level()
    }
}

/// Receives audit records from the lifecycle engine.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each record as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let status = event.status.as_str();
        let data = event.data.as_ref().map(|d| d.to_string());
        match event.level() {
            LogLevel::Debug => debug!(
                worker = %event.worker_name, status = %status, data = ?data, error = ?event.error,
                "{}", event.message
            ),
            LogLevel::Info => info!(
                worker = %event.worker_name, status = %status, data = ?data, error = ?event.error,
                "{}", event.message
            ),
            LogLevel::Warning => warn!(
                worker = %event.worker_name, status = %status, data = ?data, error = ?event.error,
                "{}", event.message
            ),
            LogLevel::Error => error!(
                worker = %event.worker_name, status = %status, data = ?data, error = ?event.error,
                "{}", event.message
            ),
        }
    }
}

/// Query parameters for filtering audit entries.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    /// Minimum log level (inclusive).
    pub level: Option<LogLevel>,
    pub status: Option<RunStatus>,
    /// Maximum number of entries to return (default 100).
    pub limit: Option<u32>,
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// In-memory per-worker audit history with FIFO eviction.
#[derive(Clone)]
pub struct AuditLog {
    entries: Arc<RwLock<HashMap<String, VecDeque<AuditEvent>>>>,
    max_entries_per_worker: usize,
}

impl AuditLog {
    /// Audit log with the default cap of 500 entries per worker.
    pub fn new() -> Self {
        Self::with_max_entries(500)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries_per_worker: max,
        }
    }

    /// Entries for a worker, newest first.
    pub fn query(&self, worker_name: &str, params: &AuditQuery) -> Vec<AuditEvent> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let Some(deque) = guard.get(worker_name) else {
            return Vec::new();
        };

        let min_severity = params.level.map(|l| l.as_severity()).unwrap_or(0);
        let limit = params.limit.unwrap_or(100) as usize;

        deque
            .iter()
            .rev()
            .filter(|e| e.level().as_severity() >= min_severity)
            .filter(|e| params.status.map_or(true, |s| e.status == s))
            .filter(|e| params.since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// All entries for a worker, oldest first.
    pub fn history(&self, worker_name: &str) -> Vec<AuditEvent> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(worker_name)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, worker_name: &str) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(worker_name);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: AuditEvent) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let deque = guard.entry(event.worker_name.clone()).or_default();
        deque.push_back(event);
        while deque.len() > self.max_entries_per_worker {
            deque.pop_front();
        }
    }
}

/// Forwards every record to each inner sink.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}
