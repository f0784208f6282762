//! Persistent job record and its identity/status types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::schedule::{next_occurrence, validate_interval};

/// Seconds a lock is honored before it is considered stale.
pub const DEFAULT_TIMEOUT_SECS: i64 = 900;

/// Error text recorded when a stale lock is taken over.
pub const TIMEOUT_EXCEEDED: &str = "TIMEOUT EXCEEDED";

/// Locking state used by single-thread workers.
///
/// Orthogonal to [`LifecycleStatus`]: a soft-deleted job keeps its last
/// execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Active,
    Locked,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Active => "ACTIVE",
            ExecutionStatus::Locked => "LOCKED",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ExecutionStatus::Active),
            "LOCKED" => Ok(ExecutionStatus::Locked),
            other => Err(CoreError::InvalidValue {
                field: "execution_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Generic soft-delete status of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    #[default]
    Active,
    Deleted,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Active => "active",
            LifecycleStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for LifecycleStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleStatus::Active),
            "deleted" => Ok(LifecycleStatus::Deleted),
            other => Err(CoreError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// How a job row is addressed: by id, or by its unique name when no id is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobKey {
    Id(i64),
    Name(String),
}

impl JobKey {
    /// Prefer the id, fall back to the name.
    pub fn resolve(id: Option<i64>, name: &str) -> Self {
        match id {
            Some(id) => JobKey::Id(id),
            None => JobKey::Name(name.to_string()),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Id(id) => write!(f, "id={}", id),
            JobKey::Name(name) => write!(f, "name={}", name),
        }
    }
}

/// Persistent schedule state for one recurring or on-demand unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Unique key; also the name of the worker that runs the job.
    pub name: String,
    pub channel: Option<String>,
    /// Cron expression, or empty for a one-shot job.
    pub interval: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Seconds.
    pub timeout: i64,
    pub input: Option<String>,
    pub retries: i32,
    /// Milliseconds.
    pub last_duration: Option<i64>,
    pub last_error: Option<String>,
    pub last_completed: Option<DateTime<Utc>>,
    pub last_failed: Option<DateTime<Utc>>,
    pub parameters: serde_json::Value,
    pub auto_remove: bool,
    pub executor_count: i32,
    pub execution_status: ExecutionStatus,
    pub status: LifecycleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey::Id(self.id)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::seconds(self.timeout)
    }

    pub fn is_locked(&self) -> bool {
        self.execution_status == ExecutionStatus::Locked
    }

    /// Whether the job should be picked up by the scheduler at `now`.
    ///
    /// Active, `next_run <= now`, and either never run, not running
    /// (`last_run <= next_run`), or past its timeout window.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != LifecycleStatus::Active {
            return false;
        }
        let Some(next_run) = self.next_run else {
            return false;
        };
        if next_run > now {
            return false;
        }
        match self.last_run {
            None => true,
            Some(last_run) => last_run <= next_run || now > last_run + self.timeout_duration(),
        }
    }

    /// A `LOCKED` job whose timeout window elapsed since `last_run`.
    pub fn is_lock_stale(&self, now: DateTime<Utc>) -> bool {
        if !self.is_locked() {
            return false;
        }
        match self.last_run {
            Some(last_run) => now - last_run >= self.timeout_duration(),
            // Locked without ever recording a start: nothing can still be holding it.
            None => true,
        }
    }
}

/// Input for creating a job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub channel: Option<String>,
    pub interval: String,
    pub timeout: i64,
    pub input: Option<String>,
    pub parameters: serde_json::Value,
    pub auto_remove: bool,
    /// Explicit first run; computed from the interval when absent.
    pub next_run: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: None,
            interval: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            input: None,
            parameters: serde_json::Value::Object(Default::default()),
            auto_remove: false,
            next_run: None,
        }
    }

    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn timeout(mut self, secs: i64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    pub fn next_run(mut self, at: DateTime<Utc>) -> Self {
        self.next_run = Some(at);
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidValue {
                field: "name",
                value: self.name.clone(),
            });
        }
        if self.timeout <= 0 {
            return Err(CoreError::InvalidValue {
                field: "timeout",
                value: self.timeout.to_string(),
            });
        }
        validate_interval(&self.interval)
    }

    /// First `next_run` for the new row: explicit value, else the next cron
    /// tick after `now`, else `now` for a one-shot job.
    pub fn initial_next_run(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CoreError> {
        if let Some(at) = self.next_run {
            return Ok(Some(at));
        }
        if self.interval.trim().is_empty() {
            return Ok(Some(now));
        }
        next_occurrence(&self.interval, now)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_job(now: DateTime<Utc>) -> Job {
        Job {
            id: 1,
            name: "digest".to_string(),
            channel: None,
            interval: "*/5 * * * *".to_string(),
            last_run: None,
            next_run: Some(now),
            timeout: DEFAULT_TIMEOUT_SECS,
            input: None,
            retries: 0,
            last_duration: None,
            last_error: None,
            last_completed: None,
            last_failed: None,
            parameters: serde_json::json!({}),
            auto_remove: false,
            executor_count: 0,
            execution_status: ExecutionStatus::Active,
            status: LifecycleStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn due_when_never_run() {
        let now = Utc::now();
        assert!(make_job(now).is_due(now));
    }

    #[test]
    fn not_due_when_next_run_in_future() {
        let now = Utc::now();
        let mut job = make_job(now);
        job.next_run = Some(now + Duration::minutes(1));
        assert!(!job.is_due(now));
    }

    #[test]
    fn not_due_without_next_run_or_when_deleted() {
        let now = Utc::now();
        let mut job = make_job(now);
        job.next_run = None;
        assert!(!job.is_due(now));

        let mut job = make_job(now);
        job.status = LifecycleStatus::Deleted;
        assert!(!job.is_due(now));
    }

    #[test]
    fn running_job_is_due_again_only_after_timeout() {
        let now = Utc::now();
        let mut job = make_job(now);
        // Started 10 minutes ago; next_run was then pushed ahead by the lock
        // window but has been pulled back (e.g. by an operator) into the past.
        job.last_run = Some(now - Duration::minutes(10));
        job.next_run = Some(now - Duration::minutes(11));
        assert!(!job.is_due(now));

        job.last_run = Some(now - Duration::minutes(20));
        job.next_run = Some(now - Duration::minutes(21));
        assert!(job.is_due(now));
    }

    #[test]
    fn stale_lock_detection() {
        let now = Utc::now();
        let mut job = make_job(now);
        job.execution_status = ExecutionStatus::Locked;
        job.last_run = Some(now - Duration::minutes(90));
        assert!(job.is_lock_stale(now));

        job.last_run = Some(now - Duration::minutes(5));
        assert!(!job.is_lock_stale(now));

        job.execution_status = ExecutionStatus::Active;
        job.last_run = Some(now - Duration::minutes(90));
        assert!(!job.is_lock_stale(now));
    }

    #[test]
    fn execution_status_round_trips_through_str() {
        for status in [ExecutionStatus::Active, ExecutionStatus::Locked] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("PAUSED".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn new_job_initial_next_run() {
        let now = Utc::now();
        let one_shot = NewJob::new("cleanup");
        assert_eq!(one_shot.initial_next_run(now).unwrap(), Some(now));

        let recurring = NewJob::new("digest").interval("*/5 * * * *");
        let next = recurring.initial_next_run(now).unwrap().unwrap();
        assert!(next > now);
        assert!(next - now <= Duration::minutes(5));
    }

    #[test]
    fn new_job_validation() {
        assert!(NewJob::new("").validate().is_err());
        assert!(NewJob::new("x").timeout(0).validate().is_err());
        assert!(NewJob::new("x").interval("nope").validate().is_err());
        assert!(NewJob::new("x").interval("0 3 * * *").validate().is_ok());
    }

    #[test]
    fn job_key_resolution() {
        assert_eq!(JobKey::resolve(Some(7), "digest"), JobKey::Id(7));
        assert_eq!(JobKey::resolve(None, "digest"), JobKey::Name("digest".into()));
        assert_eq!(JobKey::Id(7).to_string(), "id=7");
    }
}
