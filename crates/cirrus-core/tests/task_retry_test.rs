// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the task retry scheduler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;

use cirrus_core::provider::{LaunchSpec, MockProvider};
use cirrus_core::store::{NewTask, SqliteStore, Store, TaskStatus};

#[tokio::test(start_paused = true)]
async fn test_short_interval_becomes_sixty_seconds() {
    let ctx = TestContext::new();
    let account = ctx.add_account("ocid1.tenancy.interval").await;
    let scheduler = ctx.task_scheduler();

    let task = scheduler
        .create_task(account.id, LaunchSpec::default(), 5)
        .await
        .unwrap();
    assert_eq!(task.interval_seconds, 60);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(ctx.mock.call_count("launch_instance").await, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(ctx.mock.call_count("launch_instance").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_launch_succeeds() {
    let ctx = TestContext::new();
    let account = ctx.add_account("ocid1.tenancy.retry").await;
    ctx.mock.fail("launch_instance", 2).await;
    let scheduler = ctx.task_scheduler();

    let task = scheduler
        .create_task(account.id, LaunchSpec::default(), 60)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(181)).await;

    let task = scheduler.get_task(task.id).await.unwrap();
    assert_eq!(task.execute_count, 3);
    assert_eq!(task.success_count, 1);
    assert_eq!(task.task_status(), TaskStatus::Completed);
    assert!(scheduler.active_timers().await.is_empty());

    // Nothing fires once completed.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(ctx.mock.call_count("launch_instance").await, 3);

    let (page1, total) = scheduler.task_logs(task.id, 1, 2).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page1.len(), 2);
    assert_eq!(page1[0].status, "success");
    assert_eq!(page1[0].message, "instance created");
    assert_eq!(page1[1].status, "error");
    assert!(page1[1].message.starts_with("create failed: "));

    let (page2, _) = scheduler.task_logs(task.id, 2, 2).await.unwrap();
    assert_eq!(page2.len(), 1);
    assert_eq!(page2[0].status, "error");

    assert_eq!(scheduler.clear_task_logs(task.id).await.unwrap(), 3);
    assert_eq!(scheduler.task_logs(task.id, 1, 10).await.unwrap().1, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_delete_requires_task() {
    let ctx = TestContext::new();
    let account = ctx.add_account("ocid1.tenancy.stop").await;
    ctx.mock.fail_always("launch_instance").await;
    let scheduler = ctx.task_scheduler();
    let task = scheduler
        .create_task(account.id, LaunchSpec::default(), 60)
        .await
        .unwrap();
    let other = scheduler
        .create_task(account.id, LaunchSpec::default(), 120)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;

    scheduler.stop_task(task.id).await.unwrap();
    scheduler.stop_task(task.id).await.unwrap();
    assert_eq!(scheduler.active_timers().await, vec![other.id]);
    assert_eq!(
        scheduler.get_task(task.id).await.unwrap().task_status(),
        TaskStatus::Stopped
    );

    let before = scheduler.get_task(other.id).await.unwrap();
    let err = scheduler.delete_task(task.id + 100).await.unwrap_err();
    assert_eq!(err.error_code(), "CONFIG_NOT_FOUND");

    // The failed delete leaves the other task and its timer alone.
    let after = scheduler.get_task(other.id).await.unwrap();
    assert_eq!(after.task_status(), TaskStatus::Running);
    assert_eq!(after.execute_count, before.execute_count);
    assert_eq!(after.interval_seconds, 120);
    assert_eq!(scheduler.active_timers().await, vec![other.id]);
    assert_eq!(ctx.store.list_tasks(None).await.unwrap().len(), 2);

    scheduler.delete_task(task.id).await.unwrap();
    assert_eq!(
        scheduler.get_task(task.id).await.unwrap_err().error_code(),
        "CONFIG_NOT_FOUND"
    );
    assert_eq!(ctx.store.count_task_logs(task.id).await.unwrap(), 0);
    assert_eq!(scheduler.active_timers().await, vec![other.id]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_execution_does_not_rearm() {
    let ctx = TestContext::with_mock(MockProvider::new().with_call_delay(Duration::from_secs(5)));
    let account = ctx.add_account("ocid1.tenancy.inflight").await;
    ctx.mock.fail_always("launch_instance").await;
    let scheduler = ctx.task_scheduler();
    let task = scheduler
        .create_task(account.id, LaunchSpec::default(), 60)
        .await
        .unwrap();

    // The attempt starts at 60s and is still waiting on the provider.
    tokio::time::sleep(Duration::from_secs(62)).await;
    scheduler.stop_task(task.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(200)).await;

    let task = scheduler.get_task(task.id).await.unwrap();
    assert_eq!(task.execute_count, 1);
    assert_eq!(task.task_status(), TaskStatus::Stopped);
    assert!(scheduler.active_timers().await.is_empty());
    assert_eq!(ctx.mock.call_count("launch_instance").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_arms_exactly_one_timer_per_task() {
    let ctx = TestContext::new();
    let account = ctx.add_account("ocid1.tenancy.restart").await;
    let stopped = ctx
        .store
        .insert_task(&NewTask {
            account_id: account.id,
            create_params: LaunchSpec::default(),
            interval_seconds: 120,
            status: TaskStatus::Stopped,
        })
        .await
        .unwrap();

    let first = ctx.task_scheduler();
    let running = first
        .create_task(account.id, LaunchSpec::default(), 120)
        .await
        .unwrap();
    assert_eq!(first.start().await.unwrap(), 1);
    assert_eq!(first.active_timers().await, vec![running.id]);
    first.stop().await;

    let second = ctx.task_scheduler();
    assert_eq!(second.start().await.unwrap(), 1);
    assert_eq!(second.start().await.unwrap(), 0);
    assert_eq!(second.active_timers().await, vec![running.id]);
    assert!(!second.active_timers().await.contains(&stopped.id));
}

#[tokio::test]
async fn test_tasks_survive_reopening_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cirrus.db");
    let store = Arc::new(SqliteStore::from_path(&path).await.unwrap());
    let ctx = TestContext::with_store(store, MockProvider::new());
    let account = ctx.add_account("ocid1.tenancy.durable").await;

    let scheduler = ctx.task_scheduler();
    let spec = LaunchSpec {
        disk_gbs: 0,
        operating_system: String::new(),
        ..LaunchSpec::default()
    };
    let created = scheduler.create_task(account.id, spec, 3).await.unwrap();
    scheduler.stop().await;

    let reopened: Arc<dyn Store> = Arc::new(SqliteStore::from_path(&path).await.unwrap());
    let ctx = TestContext::with_store(reopened, MockProvider::new());
    let running = ctx
        .store
        .list_tasks(Some(TaskStatus::Running))
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, created.id);
    assert_eq!(running[0].interval_seconds, 60);
    assert_eq!(running[0].create_params.disk_gbs, 50);
    assert_eq!(running[0].create_params.operating_system, "Ubuntu");

    let restarted = ctx.task_scheduler();
    assert_eq!(restarted.start().await.unwrap(), 1);
    assert_eq!(restarted.active_timers().await, vec![created.id]);
    restarted.stop().await;
}
