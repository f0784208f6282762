//! Worker lifecycle engine and scheduling driver.
//!
//! - [`LifecycleRunner`] runs a [`WorkerStrategy`] through the ordered run template.
//! - [`QueueStrategy`] splits a worker into a planner that fans items out over a
//!   queue and executors that process one item each.
//! - [`SingleThreadStrategy`] guarantees at most one executor per job through a
//!   row-locked store transaction, with timeout-based takeover of stale locks.
//! - [`SchedulerDriver`] finds due jobs and hands them to the [`Launcher`].
//! - [`QueueListener`] and [`WorkerHost`] are the worker-side entry point.

pub mod alert;
pub mod audit;
pub mod driver;
pub mod error;
pub mod host;
pub mod launcher;
pub mod lifecycle;
pub mod listener;
pub mod queue_mode;
pub mod single_thread;
pub mod targets;

pub use alert::{Alert, AlertAction, AlertContext, AlertPolicy, DefaultAlertPolicy, FnAlertPolicy};
pub use audit::{AuditEvent, AuditLog, AuditQuery, AuditSink, FanoutAuditSink, LogLevel, RunStatus, TracingAuditSink};
pub use driver::{JobScheduler, PendingJobScheduler, SchedulerDriver};
pub use error::WorkerError;
pub use host::{HostContext, WorkerHost};
pub use launcher::{LaunchFailure, LaunchReport, Launcher};
pub use lifecycle::{decode_params, persist_definition, LifecycleRunner, RunData, WorkerStrategy};
pub use listener::{BatchOutcome, DeliveryHandler, QueueListener};
pub use queue_mode::{ItemQueue, QueueStrategy, QueueWorker};
pub use single_thread::{SingleThreadStrategy, SingleThreadWorker};
pub use targets::TargetRegistry;
