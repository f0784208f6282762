mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::Semaphore;

use hourglass_core::{ExecutionStatus, JobKey, WorkerDefinition, TIMEOUT_EXCEEDED};
use hourglass_queue::Delivery;
use hourglass_storage::{JobStore, MemoryJobStore};
use hourglass_scheduler::{
    AlertAction, AlertContext, AuditLog, AuditQuery, DefaultAlertPolicy, FnAlertPolicy, RunStatus,
    SingleThreadStrategy, SingleThreadWorker, TargetRegistry, WorkerError, WorkerHost, WorkerStrategy,
};

use common::{eventually, job_row, RecordingTransports};

#[derive(Deserialize)]
struct ReportParams {
    #[serde(default)]
    tenant: Option<String>,
}

#[derive(Deserialize)]
struct ReportInput {
    page: u32,
}

#[derive(Default, Clone)]
struct ReportWorker {
    calls: Arc<AtomicUsize>,
    pages: Arc<std::sync::Mutex<Vec<u32>>>,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

#[async_trait]
impl SingleThreadWorker for ReportWorker {
    type Params = ReportParams;
    type Input = ReportInput;

    async fn run_executor(
        &self,
        params: &ReportParams,
        input: Option<ReportInput>,
        _def: &WorkerDefinition,
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(input) = input {
            self.pages.lock().unwrap().push(input.page);
        }
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        if self.fail {
            anyhow::bail!("report for {} failed", params.tenant.as_deref().unwrap_or("all"));
        }
        Ok(())
    }
}

fn host(store: Arc<MemoryJobStore>, worker: ReportWorker, audit: Arc<AuditLog>) -> WorkerHost {
    WorkerHost::new(
        store,
        Arc::new(RecordingTransports::default()),
        Arc::new(TargetRegistry::new()),
    )
    .with_audit(audit)
    .register_single_thread_worker("report", worker)
}

fn skipped(audit: &AuditLog) -> usize {
    audit
        .query(
            "report",
            &AuditQuery {
                status: Some(RunStatus::Skipped),
                ..Default::default()
            },
        )
        .len()
}

#[tokio::test]
async fn concurrent_runs_execute_exactly_once() {
    const RUNS: usize = 5;
    let now = Utc::now();
    let store = Arc::new(MemoryJobStore::new());
    let job = job_row(1, "report", now);
    store.seed(job.clone());

    let gate = Arc::new(Semaphore::new(0));
    let worker = ReportWorker {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    let calls = worker.calls.clone();
    let audit = Arc::new(AuditLog::new());
    let host = Arc::new(host(store.clone(), worker, audit.clone()));

    let def = WorkerDefinition::from_job(&job);
    let handles: Vec<_> = (0..RUNS)
        .map(|_| {
            let host = host.clone();
            let def = def.clone();
            tokio::spawn(async move { host.run_delivery(Delivery::new(def)).await })
        })
        .collect();

    assert!(eventually(|| skipped(&audit) == RUNS - 1).await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let held = store.find(&JobKey::Id(1)).await.unwrap().unwrap();
    assert_eq!(held.execution_status, ExecutionStatus::Locked);
    assert_eq!(held.executor_count, 1);

    gate.add_permits(RUNS);
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let row = store.find(&JobKey::Id(1)).await.unwrap().unwrap();
    assert_eq!(row.execution_status, ExecutionStatus::Active);
    assert_eq!(row.executor_count, 0);
    assert_eq!(row.retries, 0);
    assert_eq!(row.last_error, None);
    assert!(row.last_completed.is_some());
    assert!(row.next_run.unwrap() > now);
}

#[tokio::test]
async fn stale_lock_is_taken_over() {
    let now = Utc::now();
    let store = Arc::new(MemoryJobStore::new());
    let mut job = job_row(1, "report", now);
    job.execution_status = ExecutionStatus::Locked;
    job.executor_count = 1;
    job.last_run = Some(now - Duration::hours(2));
    store.seed(job.clone());

    let mut strategy = SingleThreadStrategy::new(
        Arc::new(ReportWorker::default()),
        store.clone(),
        Arc::new(DefaultAlertPolicy),
        Arc::new(AuditLog::new()),
    );
    let def = WorkerDefinition::from_job(&job);
    strategy.before(&def, None).await.unwrap();

    assert!(strategy.should_run());
    let row = store.find(&JobKey::Id(1)).await.unwrap().unwrap();
    assert_eq!(row.execution_status, ExecutionStatus::Locked);
    assert_eq!(row.executor_count, 1);
    assert_eq!(row.last_error.as_deref(), Some(TIMEOUT_EXCEEDED));
    assert!(row.last_run.unwrap() >= now);
}

#[tokio::test]
async fn takeover_run_completes_and_releases() {
    let now = Utc::now();
    let store = Arc::new(MemoryJobStore::new());
    let mut job = job_row(1, "report", now);
    job.execution_status = ExecutionStatus::Locked;
    job.executor_count = 1;
    job.retries = 3;
    job.last_run = Some(now - Duration::hours(2));
    store.seed(job.clone());

    let worker = ReportWorker::default();
    let calls = worker.calls.clone();
    let host = host(store.clone(), worker, Arc::new(AuditLog::new()));

    host.run_delivery(Delivery::new(WorkerDefinition::from_job(&job)))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let row = store.find(&JobKey::Id(1)).await.unwrap().unwrap();
    assert_eq!(row.execution_status, ExecutionStatus::Active);
    assert_eq!(row.executor_count, 0);
    assert_eq!(row.retries, 0);
}

#[tokio::test]
async fn fresh_lock_skips_without_touching_the_row() {
    let now = Utc::now();
    let store = Arc::new(MemoryJobStore::new());
    let mut job = job_row(1, "report", now);
    job.execution_status = ExecutionStatus::Locked;
    job.executor_count = 1;
    job.last_run = Some(now - Duration::minutes(1));
    store.seed(job.clone());

    let worker = ReportWorker::default();
    let calls = worker.calls.clone();
    let audit = Arc::new(AuditLog::new());
    let host = host(store.clone(), worker, audit.clone());

    let result = host
        .run_delivery(Delivery::new(WorkerDefinition::from_job(&job)))
        .await
        .unwrap();

    assert_eq!(result, serde_json::Value::Null);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(skipped(&audit), 1);
    assert_eq!(store.find(&JobKey::Id(1)).await.unwrap().unwrap(), job);
}

#[tokio::test]
async fn locked_job_raises_when_policy_says_so() {
    let now = Utc::now();
    let store = Arc::new(MemoryJobStore::new());
    let mut job = job_row(1, "report", now);
    job.execution_status = ExecutionStatus::Locked;
    job.executor_count = 1;
    job.last_run = Some(now);
    store.seed(job.clone());

    let audit = Arc::new(AuditLog::new());
    let host = host(store.clone(), ReportWorker::default(), audit.clone())
        .with_alert_policy(Arc::new(FnAlertPolicy(|_: &AlertContext| AlertAction::Raise)));

    let err = host
        .run_delivery(Delivery::new(WorkerDefinition::from_job(&job)))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::JobLocked(JobKey::Id(1))));
    assert_eq!(store.find(&JobKey::Id(1)).await.unwrap().unwrap(), job);

    let alerts = audit.query(
        "report",
        &AuditQuery {
            status: Some(RunStatus::Alert),
            ..Default::default()
        },
    );
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message, "JOB_LOCKED");
}

#[tokio::test]
async fn missing_definition_raises_by_default() {
    let store = Arc::new(MemoryJobStore::new());
    let worker = ReportWorker::default();
    let calls = worker.calls.clone();
    let host = host(store, worker, Arc::new(AuditLog::new()));

    let mut def = WorkerDefinition::new("report");
    def.id = Some(99);
    let err = host.run_delivery(Delivery::new(def)).await.unwrap_err();

    assert!(matches!(err, WorkerError::MissingJobDefinition(JobKey::Id(99))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_definition_can_be_discarded() {
    let store = Arc::new(MemoryJobStore::new());
    let worker = ReportWorker::default();
    let calls = worker.calls.clone();
    let audit = Arc::new(AuditLog::new());
    let host = host(store, worker, audit.clone())
        .with_alert_policy(Arc::new(FnAlertPolicy(|_: &AlertContext| AlertAction::Discard)));

    host.run_delivery(Delivery::new(WorkerDefinition::new("report")))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(skipped(&audit), 1);
}

#[tokio::test]
async fn failed_run_keeps_the_lock() {
    let now = Utc::now();
    let store = Arc::new(MemoryJobStore::new());
    let mut job = job_row(1, "report", now);
    job.parameters = serde_json::json!({ "tenant": "acme" });
    store.seed(job.clone());

    let worker = ReportWorker {
        fail: true,
        ..Default::default()
    };
    let first = host(store.clone(), worker, Arc::new(AuditLog::new()));

    let err = first
        .run_delivery(Delivery::new(WorkerDefinition::from_job(&job)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("report for acme failed"));

    let row = store.find(&JobKey::Id(1)).await.unwrap().unwrap();
    assert_eq!(row.execution_status, ExecutionStatus::Locked);
    assert_eq!(row.executor_count, 1);
    assert_eq!(row.retries, 1);
    assert!(row.last_error.unwrap().contains("report for acme failed"));
    assert!(row.last_failed.is_some());

    // The next delivery inside the timeout window stands down.
    let worker = ReportWorker::default();
    let calls = worker.calls.clone();
    let retry = host(store.clone(), worker, Arc::new(AuditLog::new()));
    retry
        .run_delivery(Delivery::new(WorkerDefinition::from_job(&job)))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn auto_remove_deletes_the_row() {
    let store = Arc::new(MemoryJobStore::new());
    let mut job = job_row(1, "report", Utc::now());
    job.auto_remove = true;
    job.interval = String::new();
    store.seed(job.clone());

    let worker = ReportWorker::default();
    let calls = worker.calls.clone();
    let host = host(store.clone(), worker, Arc::new(AuditLog::new()));

    host.run_delivery(Delivery::new(WorkerDefinition::from_job(&job)))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.find(&JobKey::Id(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn input_body_reaches_the_worker() {
    let store = Arc::new(MemoryJobStore::new());
    let job = job_row(1, "report", Utc::now());
    store.seed(job.clone());

    let worker = ReportWorker::default();
    let pages = worker.pages.clone();
    let host = host(store, worker, Arc::new(AuditLog::new()));

    host.run_delivery(Delivery::new(WorkerDefinition::from_job(&job)).with_body(r#"{"page":4}"#))
        .await
        .unwrap();

    assert_eq!(*pages.lock().unwrap(), vec![4]);
}

#[tokio::test]
async fn malformed_input_is_a_noop_that_releases_the_lock() {
    let store = Arc::new(MemoryJobStore::new());
    let job = job_row(1, "report", Utc::now());
    store.seed(job.clone());

    let worker = ReportWorker::default();
    let calls = worker.calls.clone();
    let host = host(store.clone(), worker, Arc::new(AuditLog::new()));

    host.run_delivery(Delivery::new(WorkerDefinition::from_job(&job)).with_body("not json"))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let row = store.find(&JobKey::Id(1)).await.unwrap().unwrap();
    assert_eq!(row.execution_status, ExecutionStatus::Active);
    assert_eq!(row.executor_count, 0);
    assert_eq!(row.last_error, None);
}

#[tokio::test]
async fn unknown_worker_is_rejected() {
    let host = host(Arc::new(MemoryJobStore::new()), ReportWorker::default(), Arc::new(AuditLog::new()));
    let err = host
        .run_delivery(Delivery::new(WorkerDefinition::new("nobody")))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::UnknownWorker(name) if name == "nobody"));
}
