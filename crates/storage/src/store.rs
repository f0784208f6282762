//! Store traits and helpers shared by the PostgreSQL and in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use hourglass_core::{Job, JobKey, NewJob, WorkerDefinition};

use crate::error::StoreError;

/// Per-key equality filter over a job's `parameters` object.
pub type ParameterFilter = serde_json::Map<String, serde_json::Value>;

/// Inclusive `next_run` window for parameter lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// True when every key of `filter` is present in `parameters` with an equal value.
pub(crate) fn parameters_match(parameters: &serde_json::Value, filter: &ParameterFilter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| parameters.get(key) == Some(expected))
}

/// An open store transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait JobTransaction: Send {
    /// Load a live job; with `lock`, hold an exclusive row lock until the
    /// transaction ends so no concurrent transaction can read-then-write it.
    async fn populate(&mut self, key: &JobKey, lock: bool) -> Result<Option<Job>, StoreError>;

    async fn populate_by_id(&mut self, id: i64, lock: bool) -> Result<Option<Job>, StoreError> {
        self.populate(&JobKey::Id(id), lock).await
    }

    async fn populate_by_name(&mut self, name: &str, lock: bool) -> Result<Option<Job>, StoreError> {
        self.populate(&JobKey::Name(name.to_string()), lock).await
    }

    /// Write every mutable column of `job`.
    async fn update(&mut self, job: &Job) -> Result<(), StoreError>;

    /// Hard-delete a row. Returns whether it existed.
    async fn delete(&mut self, id: i64) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Persistent record of schedule state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Live jobs whose `next_run` has passed and that are not mid-run
    /// (or whose run outlived its timeout). No ordering guarantee.
    async fn pending_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    async fn find(&self, key: &JobKey) -> Result<Option<Job>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn JobTransaction>, StoreError>;

    async fn insert(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Merge the timing and telemetry fields of a finished (or starting) run
    /// back into its row. Locking columns are left untouched.
    async fn update_worker_definition(&self, def: &WorkerDefinition) -> Result<(), StoreError>;

    /// Hard delete, used by `autoRemove`.
    async fn remove(&self, key: &JobKey) -> Result<bool, StoreError>;

    /// Flip the lifecycle status to deleted; the row stays for audit.
    async fn soft_delete(&self, key: &JobKey) -> Result<bool, StoreError>;

    async fn list(&self, channel: Option<&str>) -> Result<Vec<Job>, StoreError>;

    /// Live jobs named `name` whose parameters match `filter`, optionally
    /// restricted to a `next_run` window.
    async fn jobs_with_parameters(
        &self,
        name: &str,
        filter: &ParameterFilter,
        window: Option<TimeWindow>,
    ) -> Result<Vec<Job>, StoreError>;
}

/// Result of [`schedule_unique`].
#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    /// A new job row was created.
    Created(Job),
    /// A matching job already exists; nothing was written.
    Duplicate(Job),
}

impl ScheduleOutcome {
    pub fn job(&self) -> &Job {
        match self {
            ScheduleOutcome::Created(job) | ScheduleOutcome::Duplicate(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ScheduleOutcome::Created(_))
    }
}

/// Create `job` unless a live job with the same name and parameters exists
/// (within `window`, when given).
pub async fn schedule_unique(
    store: &dyn JobStore,
    job: NewJob,
    window: Option<TimeWindow>,
) -> Result<ScheduleOutcome, StoreError> {
    let filter = match &job.parameters {
        serde_json::Value::Object(map) => map.clone(),
        _ => ParameterFilter::new(),
    };

    let existing = store.jobs_with_parameters(&job.name, &filter, window).await?;
    if let Some(found) = existing.into_iter().next() {
        debug!(job = %found.name, id = found.id, "matching job already scheduled");
        return Ok(ScheduleOutcome::Duplicate(found));
    }

    store.insert(job).await.map(ScheduleOutcome::Created)
}
