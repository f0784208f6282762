//! In-memory job store with the same exclusive-read semantics as the
//! PostgreSQL backend.
//!
//! Each row has its own `tokio` mutex. A transaction that populates a row
//! with `lock = true` holds the row's mutex until commit or rollback, and
//! every non-transactional write takes the same mutex briefly, mirroring a
//! row-level write lock. Transaction writes are buffered and applied on commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use hourglass_core::{ExecutionStatus, Job, JobKey, LifecycleStatus, NewJob, WorkerDefinition};

use crate::error::StoreError;
use crate::store::{parameters_match, JobStore, JobTransaction, ParameterFilter, TimeWindow};

type RowLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
struct Rows {
    jobs: BTreeMap<i64, Job>,
    next_id: i64,
}

impl Rows {
    fn resolve(&self, key: &JobKey) -> Option<i64> {
        match key {
            JobKey::Id(id) => self.jobs.contains_key(id).then_some(*id),
            JobKey::Name(name) => self
                .jobs
                .values()
                .find(|j| j.status == LifecycleStatus::Active && &j.name == name)
                .map(|j| j.id),
        }
    }
}

#[derive(Default)]
struct Shared {
    rows: Mutex<Rows>,
    locks: Mutex<HashMap<i64, RowLock>>,
}

impl Shared {
    fn rows(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_lock(&self, id: i64) -> RowLock {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Drop the lock of a hard-deleted row. Ids are never reused.
    fn forget_lock(&self, id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&id);
    }
}

/// Job store kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    shared: Arc<Shared>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed row, keeping its id. Useful for seeding fixtures.
    pub fn seed(&self, job: Job) {
        let mut rows = self.shared.rows();
        rows.next_id = rows.next_id.max(job.id);
        rows.jobs.insert(job.id, job);
    }

    /// Run `f` on a row while holding its row lock.
    async fn with_row<T>(
        &self,
        key: &JobKey,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<Option<T>, StoreError> {
        let Some(id) = self.shared.rows().resolve(key) else {
            return Ok(None);
        };
        let lock = self.shared.row_lock(id);
        let _guard = lock.lock().await;

        let mut rows = self.shared.rows();
        Ok(rows.jobs.get_mut(&id).map(|job| {
            let out = f(job);
            job.updated_at = Utc::now();
            out
        }))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn pending_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let rows = self.shared.rows();
        Ok(rows.jobs.values().filter(|j| j.is_due(now)).cloned().collect())
    }

    async fn find(&self, key: &JobKey) -> Result<Option<Job>, StoreError> {
        let rows = self.shared.rows();
        Ok(rows
            .resolve(key)
            .and_then(|id| rows.jobs.get(&id))
            .filter(|j| j.status == LifecycleStatus::Active)
            .cloned())
    }

    async fn begin(&self) -> Result<Box<dyn JobTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            guards: Vec::new(),
            locked: HashSet::new(),
            writes: BTreeMap::new(),
        }))
    }

    async fn insert(&self, job: NewJob) -> Result<Job, StoreError> {
        job.validate()?;
        let now = Utc::now();
        let next_run = job.initial_next_run(now)?;

        let mut rows = self.shared.rows();
        if rows.resolve(&JobKey::Name(job.name.clone())).is_some() {
            return Err(StoreError::Duplicate(job.name));
        }
        rows.next_id += 1;
        let row = Job {
            id: rows.next_id,
            name: job.name,
            channel: job.channel,
            interval: job.interval,
            last_run: None,
            next_run,
            timeout: job.timeout,
            input: job.input,
            retries: 0,
            last_duration: None,
            last_error: None,
            last_completed: None,
            last_failed: None,
            parameters: job.parameters,
            auto_remove: job.auto_remove,
            executor_count: 0,
            execution_status: ExecutionStatus::Active,
            status: LifecycleStatus::Active,
            created_at: now,
            updated_at: now,
        };
        rows.jobs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let replacement = job.clone();
        self.with_row(&job.key(), move |row| *row = replacement)
            .await?
            .ok_or_else(|| StoreError::NotFound(job.key()))
    }

    async fn update_worker_definition(&self, def: &WorkerDefinition) -> Result<(), StoreError> {
        let key = def.job_key();
        self.with_row(&key, |row| {
            row.last_run = def.last_run;
            row.next_run = def.next_run;
            row.retries = def.retries;
            row.last_duration = def.last_duration;
            row.last_error = def.last_error.clone();
            row.last_completed = def.last_completed;
            row.last_failed = def.last_failed;
        })
        .await?
        .ok_or(StoreError::NotFound(key))
    }

    async fn remove(&self, key: &JobKey) -> Result<bool, StoreError> {
        let Some(id) = self.shared.rows().resolve(key) else {
            return Ok(false);
        };
        let lock = self.shared.row_lock(id);
        let _guard = lock.lock().await;
        let removed = self.shared.rows().jobs.remove(&id).is_some();
        self.shared.forget_lock(id);
        Ok(removed)
    }

    async fn soft_delete(&self, key: &JobKey) -> Result<bool, StoreError> {
        Ok(self
            .with_row(key, |row| row.status = LifecycleStatus::Deleted)
            .await?
            .is_some())
    }

    async fn list(&self, channel: Option<&str>) -> Result<Vec<Job>, StoreError> {
        let rows = self.shared.rows();
        Ok(rows
            .jobs
            .values()
            .filter(|j| j.status == LifecycleStatus::Active)
            .filter(|j| channel.map_or(true, |c| j.channel.as_deref() == Some(c)))
            .cloned()
            .collect())
    }

    async fn jobs_with_parameters(
        &self,
        name: &str,
        filter: &ParameterFilter,
        window: Option<TimeWindow>,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = self.shared.rows();
        Ok(rows
            .jobs
            .values()
            .filter(|j| j.status == LifecycleStatus::Active && j.name == name)
            .filter(|j| parameters_match(&j.parameters, filter))
            .filter(|j| match window {
                Some(w) => j.next_run.map_or(false, |at| w.contains(at)),
                None => true,
            })
            .cloned()
            .collect())
    }
}

/// Transaction over a [`MemoryJobStore`].
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    guards: Vec<OwnedMutexGuard<()>>,
    locked: HashSet<i64>,
    /// Buffered writes; `None` marks a delete.
    writes: BTreeMap<i64, Option<Job>>,
}

impl MemoryTransaction {
    fn read(&self, id: i64) -> Option<Job> {
        match self.writes.get(&id) {
            Some(pending) => pending.clone(),
            None => self.shared.rows().jobs.get(&id).cloned(),
        }
    }
}

#[async_trait]
impl JobTransaction for MemoryTransaction {
    async fn populate(&mut self, key: &JobKey, lock: bool) -> Result<Option<Job>, StoreError> {
        let Some(id) = self.shared.rows().resolve(key) else {
            return Ok(None);
        };

        if lock && !self.locked.contains(&id) {
            let row_lock = self.shared.row_lock(id);
            self.guards.push(row_lock.lock_owned().await);
            self.locked.insert(id);
        }

        // Re-read after acquiring the lock: the previous holder may have written.
        Ok(self.read(id).filter(|j| j.status == LifecycleStatus::Active))
    }

    async fn update(&mut self, job: &Job) -> Result<(), StoreError> {
        if self.read(job.id).is_none() {
            return Err(StoreError::NotFound(job.key()));
        }
        let mut row = job.clone();
        row.updated_at = Utc::now();
        self.writes.insert(job.id, Some(row));
        Ok(())
    }

    async fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        let existed = self.read(id).is_some();
        self.writes.insert(id, None);
        Ok(existed)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        {
            let mut rows = this.shared.rows();
            for (id, write) in this.writes {
                match write {
                    Some(job) => {
                        rows.jobs.insert(id, job);
                    }
                    None => {
                        rows.jobs.remove(&id);
                        this.shared.forget_lock(id);
                    }
                }
            }
        }
        drop(this.guards);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}
