//! PostgreSQL job store.
//!
//! Exclusive reads use `SELECT ... FOR UPDATE` inside a transaction; the row
//! lock is held until the transaction commits or rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use hourglass_core::config::PostgresConfig;
use hourglass_core::{Job, JobKey, NewJob, WorkerDefinition};

use crate::error::StoreError;
use crate::store::{parameters_match, JobStore, JobTransaction, ParameterFilter, TimeWindow};

const JOB_COLUMNS: &str = r#"id, name, channel, "interval", last_run, next_run, timeout, input,
    retries, last_duration, last_error, last_completed, last_failed, parameters,
    auto_remove, executor_count, execution_status, status, created_at, updated_at"#;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    name: String,
    channel: Option<String>,
    interval: String,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    timeout: i64,
    input: Option<String>,
    retries: i32,
    last_duration: Option<i64>,
    last_error: Option<String>,
    last_completed: Option<DateTime<Utc>>,
    last_failed: Option<DateTime<Utc>>,
    parameters: serde_json::Value,
    auto_remove: bool,
    executor_count: i32,
    execution_status: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |e: hourglass_core::CoreError| StoreError::CorruptRow {
            id,
            reason: e.to_string(),
        };
        let execution_status = row.execution_status.parse().map_err(corrupt)?;
        let status = row.status.parse().map_err(corrupt)?;

        Ok(Job {
            id: row.id,
            name: row.name,
            channel: row.channel,
            interval: row.interval,
            last_run: row.last_run,
            next_run: row.next_run,
            timeout: row.timeout,
            input: row.input,
            retries: row.retries,
            last_duration: row.last_duration,
            last_error: row.last_error,
            last_completed: row.last_completed,
            last_failed: row.last_failed,
            parameters: row.parameters,
            auto_remove: row.auto_remove,
            executor_count: row.executor_count,
            execution_status,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

/// `WHERE` clause addressing a live row by `$1`.
fn key_clause(key: &JobKey) -> &'static str {
    match key {
        JobKey::Id(_) => "id = $1 AND status = 'active'",
        JobKey::Name(_) => "name = $1 AND status = 'active'",
    }
}

fn select_by_key(key: &JobKey, lock: bool) -> String {
    format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE {}{}",
        key_clause(key),
        if lock { " FOR UPDATE" } else { "" }
    )
}

fn bind_key<'q, O>(
    query: sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments>,
    key: &'q JobKey,
) -> sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments> {
    match key {
        JobKey::Id(id) => query.bind(*id),
        JobKey::Name(name) => query.bind(name.as_str()),
    }
}

const UPDATE_JOB: &str = r#"UPDATE jobs SET
    channel = $2, "interval" = $3, last_run = $4, next_run = $5, timeout = $6, input = $7,
    retries = $8, last_duration = $9, last_error = $10, last_completed = $11,
    last_failed = $12, parameters = $13, auto_remove = $14, executor_count = $15,
    execution_status = $16, status = $17, updated_at = NOW()
    WHERE id = $1"#;

fn update_query(job: &Job) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(UPDATE_JOB)
        .bind(job.id)
        .bind(job.channel.as_deref())
        .bind(&job.interval)
        .bind(job.last_run)
        .bind(job.next_run)
        .bind(job.timeout)
        .bind(job.input.as_deref())
        .bind(job.retries)
        .bind(job.last_duration)
        .bind(job.last_error.as_deref())
        .bind(job.last_completed)
        .bind(job.last_failed)
        .bind(&job.parameters)
        .bind(job.auto_remove)
        .bind(job.executor_count)
        .bind(job.execution_status.as_str())
        .bind(job.status.as_str())
}

/// Job store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url())
            .await?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied successfully");
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn pending_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = 'active'
               AND next_run IS NOT NULL
               AND next_run <= $1
               AND (last_run IS NULL
                    OR last_run <= next_run
                    OR $1 > last_run + timeout * INTERVAL '1 second')"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        debug!(count = rows.len(), "pending jobs loaded");
        into_jobs(rows)
    }

    async fn find(&self, key: &JobKey) -> Result<Option<Job>, StoreError> {
        let sql = select_by_key(key, false);
        let row = bind_key(sqlx::query_as::<_, JobRow>(&sql), key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn begin(&self) -> Result<Box<dyn JobTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn insert(&self, job: NewJob) -> Result<Job, StoreError> {
        job.validate()?;
        let next_run = job.initial_next_run(Utc::now())?;
        let sql = format!(
            r#"INSERT INTO jobs (name, channel, "interval", next_run, timeout, input, parameters, auto_remove)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {JOB_COLUMNS}"#
        );
        let result = sqlx::query_as::<_, JobRow>(&sql)
            .bind(&job.name)
            .bind(job.channel.as_deref())
            .bind(&job.interval)
            .bind(next_run)
            .bind(job.timeout)
            .bind(job.input.as_deref())
            .bind(&job.parameters)
            .bind(job.auto_remove)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Job::try_from(row),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(job.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let done = update_query(job).execute(&self.pool).await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.key()));
        }
        Ok(())
    }

    async fn update_worker_definition(&self, def: &WorkerDefinition) -> Result<(), StoreError> {
        let key = def.job_key();
        let column = match key {
            JobKey::Id(_) => "id",
            JobKey::Name(_) => "name",
        };
        let sql = format!(
            "UPDATE jobs SET
                last_run = $2, next_run = $3, retries = $4, last_duration = $5,
                last_error = $6, last_completed = $7, last_failed = $8, updated_at = NOW()
             WHERE {column} = $1 AND status = 'active'"
        );
        let query = sqlx::query(&sql);
        let query = match &key {
            JobKey::Id(id) => query.bind(*id),
            JobKey::Name(name) => query.bind(name.as_str()),
        };
        let done = query
            .bind(def.last_run)
            .bind(def.next_run)
            .bind(def.retries)
            .bind(def.last_duration)
            .bind(def.last_error.as_deref())
            .bind(def.last_completed)
            .bind(def.last_failed)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(key));
        }
        Ok(())
    }

    async fn remove(&self, key: &JobKey) -> Result<bool, StoreError> {
        let done = match key {
            JobKey::Id(id) => sqlx::query("DELETE FROM jobs WHERE id = $1").bind(*id),
            JobKey::Name(name) => {
                sqlx::query("DELETE FROM jobs WHERE name = $1 AND status = 'active'").bind(name.as_str())
            }
        }
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn soft_delete(&self, key: &JobKey) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE jobs SET status = 'deleted', updated_at = NOW() WHERE {}",
            key_clause(key)
        );
        let query = sqlx::query(&sql);
        let query = match key {
            JobKey::Id(id) => query.bind(*id),
            JobKey::Name(name) => query.bind(name.as_str()),
        };
        let done = query.execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list(&self, channel: Option<&str>) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = 'active' AND ($1::TEXT IS NULL OR channel = $1)
             ORDER BY id"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(channel)
            .fetch_all(&self.pool)
            .await?;
        into_jobs(rows)
    }

    async fn jobs_with_parameters(
        &self,
        name: &str,
        filter: &ParameterFilter,
        window: Option<TimeWindow>,
    ) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = 'active'
               AND name = $1
               AND parameters @> $2
               AND ($3::TIMESTAMPTZ IS NULL OR next_run >= $3)
               AND ($4::TIMESTAMPTZ IS NULL OR next_run <= $4)
             ORDER BY id"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(name)
            .bind(serde_json::Value::Object(filter.clone()))
            .bind(window.map(|w| w.start))
            .bind(window.map(|w| w.end))
            .fetch_all(&self.pool)
            .await?;
        // `@>` also matches arrays and objects that merely contain the filter
        // value; keep only rows where every filtered key is equal.
        let jobs = into_jobs(rows)?;
        Ok(jobs
            .into_iter()
            .filter(|job| parameters_match(&job.parameters, filter))
            .collect())
    }
}

/// Open PostgreSQL transaction. Dropped without commit, sqlx rolls it back.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl JobTransaction for PgTransaction {
    async fn populate(&mut self, key: &JobKey, lock: bool) -> Result<Option<Job>, StoreError> {
        let sql = select_by_key(key, lock);
        let row = bind_key(sqlx::query_as::<_, JobRow>(&sql), key)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn update(&mut self, job: &Job) -> Result<(), StoreError> {
        let done = update_query(job).execute(&mut *self.tx).await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.key()));
        }
        Ok(())
    }

    async fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
