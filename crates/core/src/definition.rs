//! [`WorkerDefinition`]: ephemeral, serializable descriptor of one execution attempt.
//!
//! Built from a [`Job`] by the scheduler or decoded from an inbound dispatch
//! payload. The time math here drives the job's schedule: `next_run` doubles
//! as the lock expiry while a run is in flight.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::{Job, JobKey, DEFAULT_TIMEOUT_SECS};
use crate::schedule::next_occurrence;
use crate::service::ServiceDefinition;

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

/// One execution attempt. Serialized camelCase as the dispatch payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDefinition {
    pub worker_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Where to dispatch; never part of the payload.
    #[serde(skip)]
    pub target: Option<ServiceDefinition>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    #[serde(default)]
    pub retries: i32,
    #[serde(default)]
    pub auto_remove: bool,

    // Run results, flushed back to the job row at the end of a run.
    #[serde(skip)]
    pub last_completed: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_failed: Option<DateTime<Utc>>,
    /// Milliseconds.
    #[serde(skip)]
    pub last_duration: Option<i64>,
    #[serde(skip)]
    pub last_error: Option<String>,
}

impl WorkerDefinition {
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            id: None,
            target: None,
            parameters: serde_json::Value::Null,
            interval: String::new(),
            last_run: None,
            next_run: None,
            timeout: DEFAULT_TIMEOUT_SECS,
            retries: 0,
            auto_remove: false,
            last_completed: None,
            last_failed: None,
            last_duration: None,
            last_error: None,
        }
    }

    pub fn from_job(job: &Job) -> Self {
        Self {
            worker_name: job.name.clone(),
            id: Some(job.id),
            target: None,
            parameters: job.parameters.clone(),
            interval: job.interval.clone(),
            last_run: job.last_run,
            next_run: job.next_run,
            timeout: job.timeout,
            retries: job.retries,
            auto_remove: job.auto_remove,
            last_completed: job.last_completed,
            last_failed: job.last_failed,
            last_duration: job.last_duration,
            last_error: job.last_error.clone(),
        }
    }

    pub fn with_target(mut self, target: ServiceDefinition) -> Self {
        self.target = Some(target);
        self
    }

    /// Row this definition reads from and writes back to.
    pub fn job_key(&self) -> JobKey {
        JobKey::resolve(self.id, &self.worker_name)
    }

    pub fn to_payload(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Next cron occurrence strictly after `last_run` (or after now when unset);
    /// `None` for a one-shot job.
    pub fn set_next_run(&mut self) -> Result<(), CoreError> {
        self.set_next_run_at(Utc::now())
    }

    pub fn set_next_run_at(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.next_run = if self.interval.trim().is_empty() {
            None
        } else {
            next_occurrence(&self.interval, self.last_run.unwrap_or(now))?
        };
        Ok(())
    }

    pub fn set_started(&mut self) {
        self.set_started_at(Utc::now());
    }

    /// `next_run` becomes the lock expiry for the run that is starting.
    pub fn set_started_at(&mut self, now: DateTime<Utc>) {
        self.next_run = Some(now + Duration::seconds(self.timeout));
        self.last_run = Some(now);
        self.retries += 1;
    }

    pub fn set_completed(&mut self) -> Result<(), CoreError> {
        self.set_completed_at(Utc::now())
    }

    pub fn set_completed_at(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.last_completed = Some(now);
        self.last_duration = self.duration_until(now);
        self.retries = 0;
        self.last_error = None;
        self.set_next_run_at(now)
    }

    pub fn set_failed(&mut self, error: &str) -> Result<(), CoreError> {
        self.set_failed_at(error, Utc::now())
    }

    /// A failure still reschedules per cron rather than retrying immediately.
    pub fn set_failed_at(&mut self, error: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.last_error = Some(error.to_string());
        self.last_failed = Some(now);
        self.last_duration = self.duration_until(now);
        self.set_next_run_at(now)
    }

    fn duration_until(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_run.map(|started| (now - started).num_milliseconds())
    }
}
