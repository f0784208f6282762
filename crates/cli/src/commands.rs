use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::Notify;
use tracing::{info, warn};

use hourglass_core::{Config, Job, JobKey, NewJob};
use hourglass_queue::AwsTransports;
use hourglass_scheduler::{LaunchReport, Launcher, PendingJobScheduler, SchedulerDriver, TargetRegistry};
use hourglass_storage::{schedule_unique, JobStore, PgJobStore, ScheduleOutcome};

use crate::cli::AddJob;

async fn connect(config: &Config) -> Result<PgJobStore> {
    if !config.postgres.is_configured() {
        bail!("PostgreSQL is not configured; set DATABASE_URL or PG_USERNAME");
    }
    PgJobStore::connect(&config.postgres)
        .await
        .with_context(|| format!("failed to connect to {}/{}", config.postgres.host, config.postgres.database))
}

fn load_targets(path: &Path) -> Result<TargetRegistry> {
    let targets = TargetRegistry::load(path)
        .with_context(|| format!("failed to load dispatch targets from {}", path.display()))?;
    if targets.is_empty() {
        warn!(path = %path.display(), "no dispatch targets registered; nothing will be launched");
    }
    Ok(targets)
}

async fn driver(config: &Config, targets_file: &Path) -> Result<SchedulerDriver> {
    let store: Arc<dyn JobStore> = Arc::new(connect(config).await?);
    let targets = Arc::new(load_targets(targets_file)?);
    let transports = Arc::new(AwsTransports::new(config.aws.clone()));

    Ok(SchedulerDriver::new(
        Arc::new(PendingJobScheduler::new(store, targets)),
        Launcher::new(transports),
    ))
}

fn print_job(job: &Job) {
    println!(
        "{:>6}  {:<24} {:<14} next={:<25} last={:<25} {} x{} retries={}{}",
        job.id,
        job.name,
        if job.interval.is_empty() { "(once)" } else { job.interval.as_str() },
        job.next_run.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()),
        job.last_run.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()),
        job.execution_status.as_str(),
        job.executor_count,
        job.retries,
        job.last_error
            .as_deref()
            .map(|e| format!("  error={e}"))
            .unwrap_or_default(),
    );
}

fn print_report(report: &LaunchReport) {
    println!("launched {} of {} due jobs", report.accepted, report.total());
    for failure in &report.failures {
        println!(
            "  failed: {} (id {}): {}",
            failure.worker_name,
            failure.job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
            failure.error
        );
    }
}

pub async fn migrate(config: &Config) -> Result<()> {
    let store = connect(config).await?;
    store.migrate().await.context("failed to apply migrations")?;
    println!("migrations applied");
    Ok(())
}

pub async fn list_jobs(config: &Config, channel: Option<&str>) -> Result<()> {
    let store = connect(config).await?;
    let jobs = store.list(channel).await.context("failed to list jobs")?;
    if jobs.is_empty() {
        println!("no jobs");
    }
    for job in &jobs {
        print_job(job);
    }
    Ok(())
}

pub async fn add_job(config: &Config, add: AddJob) -> Result<()> {
    let parameters: serde_json::Value =
        serde_json::from_str(&add.parameters).context("--parameters must be valid JSON")?;
    if !parameters.is_object() {
        bail!("--parameters must be a JSON object");
    }

    let mut job = NewJob::new(&add.name)
        .interval(add.interval)
        .timeout(add.timeout.unwrap_or(config.scheduler.default_timeout_secs))
        .parameters(parameters)
        .auto_remove(add.auto_remove);
    if let Some(channel) = add.channel {
        job = job.channel(channel);
    }
    job.validate().context("invalid job")?;

    let store = connect(config).await?;
    if add.unique {
        match schedule_unique(&store, job, None).await.context("failed to schedule job")? {
            ScheduleOutcome::Created(job) => {
                println!("created");
                print_job(&job);
            }
            ScheduleOutcome::Duplicate(job) => {
                println!("already scheduled");
                print_job(&job);
            }
        }
    } else {
        let job = store.insert(job).await.context("failed to create job")?;
        println!("created");
        print_job(&job);
    }
    Ok(())
}

pub async fn remove_job(config: &Config, name: &str, hard: bool) -> Result<()> {
    let store = connect(config).await?;
    let key = JobKey::Name(name.to_string());
    let result = if hard {
        store.remove(&key).await
    } else {
        store.soft_delete(&key).await
    };
    let removed = result.with_context(|| format!("failed to remove job '{name}'"))?;

    if !removed {
        bail!("no live job named '{name}'");
    }
    println!("{} {name}", if hard { "deleted" } else { "marked deleted" });
    Ok(())
}

pub async fn tick(config: &Config, targets_file: &Path) -> Result<()> {
    let driver = driver(config, targets_file).await?;
    let report = driver.execute().await.context("scheduler tick failed")?;
    print_report(&report);
    Ok(())
}

pub async fn run(config: &Config, targets_file: &Path, interval: Duration) -> Result<()> {
    let driver = driver(config, targets_file).await?;
    let shutdown = Arc::new(Notify::new());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C; stopping"),
        }
        signal.notify_one();
    });

    driver.run(interval, shutdown).await;
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    let summary = serde_json::to_string_pretty(&config.redacted_summary())?;
    println!("{summary}");
    Ok(())
}
