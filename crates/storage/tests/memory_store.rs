use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde_json::json;

use hourglass_core::{ExecutionStatus, JobKey, NewJob};
use hourglass_storage::{schedule_unique, JobStore, MemoryJobStore, ScheduleOutcome, TimeWindow};

#[tokio::test]
async fn exclusive_counter_increments_are_serialized() {
    let store = Arc::new(MemoryJobStore::new());
    let id = store.insert(NewJob::new("counter")).await.unwrap().id;

    let tasks = (0..16).map(|_| {
        let store = store.clone();
        async move {
            let mut tx = store.begin().await.unwrap();
            let mut row = tx.populate_by_id(id, true).await.unwrap().unwrap();
            tokio::task::yield_now().await;
            row.executor_count += 1;
            tx.update(&row).await.unwrap();
            tx.commit().await.unwrap();
        }
    });
    join_all(tasks).await;

    let row = store.find(&JobKey::Id(id)).await.unwrap().unwrap();
    assert_eq!(row.executor_count, 16);
}

#[tokio::test]
async fn only_one_of_many_contenders_takes_the_lock() {
    let store = Arc::new(MemoryJobStore::new());
    store.insert(NewJob::new("report")).await.unwrap();

    let tasks = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            let mut row = tx.populate_by_name("report", true).await.unwrap().unwrap();
            if row.executor_count > 0 {
                tx.rollback().await.unwrap();
                return false;
            }
            row.executor_count = 1;
            row.execution_status = ExecutionStatus::Locked;
            tx.update(&row).await.unwrap();
            tx.commit().await.unwrap();
            true
        })
    });

    let winners = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();
    assert_eq!(winners, 1);

    let row = store.find(&JobKey::Name("report".into())).await.unwrap().unwrap();
    assert_eq!(row.execution_status, ExecutionStatus::Locked);
    assert_eq!(row.executor_count, 1);
}

#[tokio::test]
async fn dropped_transaction_releases_lock() {
    let store = MemoryJobStore::new();
    let job = store.insert(NewJob::new("digest")).await.unwrap();

    {
        let mut tx = store.begin().await.unwrap();
        tx.populate_by_id(job.id, true).await.unwrap();
    }

    let mut tx = store.begin().await.unwrap();
    let row = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        tx.populate_by_id(job.id, true),
    )
    .await
    .expect("lock should be free")
    .unwrap();
    assert!(row.is_some());
}

#[tokio::test]
async fn schedule_unique_reports_duplicates() {
    let store = MemoryJobStore::new();
    let at = Utc::now() + Duration::minutes(30);
    let new_job = || {
        NewJob::new("trial-reminder")
            .parameters(json!({"account": "acme"}))
            .next_run(at)
            .auto_remove(true)
    };

    let first = schedule_unique(&store, new_job(), None).await.unwrap();
    assert!(first.is_created());

    let second = schedule_unique(&store, new_job(), None).await.unwrap();
    match second {
        ScheduleOutcome::Duplicate(job) => assert_eq!(job.id, first.job().id),
        other => panic!("expected duplicate, got {other:?}"),
    }
}

#[tokio::test]
async fn schedule_unique_window_excludes_other_runs() {
    let store = MemoryJobStore::new();
    let tomorrow = Utc::now() + Duration::days(1);
    store
        .insert(
            NewJob::new("trial-reminder")
                .parameters(json!({"account": "acme"}))
                .next_run(tomorrow),
        )
        .await
        .unwrap();
    store.soft_delete(&JobKey::Name("trial-reminder".into())).await.unwrap();

    let window = TimeWindow::new(Utc::now(), Utc::now() + Duration::hours(1));
    let outcome = schedule_unique(
        &store,
        NewJob::new("trial-reminder").parameters(json!({"account": "acme"})),
        Some(window),
    )
    .await
    .unwrap();
    assert!(outcome.is_created());
}

#[tokio::test]
async fn list_filters_by_channel() {
    let store = MemoryJobStore::new();
    store.insert(NewJob::new("a").channel("mail")).await.unwrap();
    store.insert(NewJob::new("b").channel("search")).await.unwrap();
    store.insert(NewJob::new("c")).await.unwrap();

    assert_eq!(store.list(None).await.unwrap().len(), 3);
    let mail = store.list(Some("mail")).await.unwrap();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].name, "a");
}
