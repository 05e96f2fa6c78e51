// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the rescue and bandwidth workflows.

mod common;

use std::sync::Arc;

use common::*;
use tokio::sync::broadcast;

use cirrus_core::provider::LifecycleState;
use cirrus_core::runtime::CirrusRuntime;
use cirrus_core::workflow::{DiscardSink, EnableBandwidthRequest, StepStatus, WorkflowOutcome};

#[tokio::test(start_paused = true)]
async fn test_rescue_steps_run_strictly_in_order() {
    let ctx = TestContext::new();
    let (account, seeded) = ctx.add_account_with_instance("ocid1.tenancy.seq").await;
    let (tx, mut rx) = broadcast::channel(64);

    let outcome = ctx
        .rescue_workflow()
        .run(rescue_request(&account, &seeded.instance_id, false), &tx)
        .await
        .unwrap();
    assert!(outcome.is_completed(), "{outcome:?}");

    // Each step reports running, then exactly one terminal status, before the next starts.
    let events = drain(&mut rx);
    assert_eq!(events.len(), 18);
    for (i, pair) in events.chunks(2).enumerate() {
        assert_eq!(pair[0].step_index, i + 1);
        assert_eq!(pair[0].status, StepStatus::Running);
        assert_eq!(pair[1].step_index, i + 1);
        assert!(pair[1].status.is_terminal());
    }

    let calls = ctx.mock.calls().await;
    let order = [
        "stop_instance",
        "create_boot_volume_backup",
        "detach_boot_volume",
        "delete_boot_volume",
        "create_boot_volume",
        "attach_boot_volume",
        "delete_boot_volume_backup",
        "start_instance",
    ];
    let positions: Vec<usize> = order.iter().map(|op| first_call(&calls, op)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "unexpected call order: {calls:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_rescue_backup_cleanup_failure_still_completes() {
    let ctx = TestContext::new();
    let (account, seeded) = ctx.add_account_with_instance("ocid1.tenancy.warn").await;
    ctx.mock.fail_always("delete_boot_volume_backup").await;
    let (tx, mut rx) = broadcast::channel(64);

    let outcome = ctx
        .rescue_workflow()
        .run(rescue_request(&account, &seeded.instance_id, false), &tx)
        .await
        .unwrap();

    match &outcome {
        WorkflowOutcome::Completed { warnings, .. } => {
            assert_eq!(warnings.len(), 1);
            assert_eq!(warnings[0].step_index, 8);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(outcome.result_str("bootVolumeId").is_some());

    let events = drain(&mut rx);
    let step8 = events
        .iter()
        .filter(|e| e.step_index == 8)
        .last()
        .unwrap();
    assert_eq!(step8.status, StepStatus::Warning);
    assert_eq!(events.last().unwrap().step_index, 9);
    assert_eq!(events.last().unwrap().status, StepStatus::Completed);
    assert_eq!(ctx.mock.backups().await[0].state, LifecycleState::Available);
}

#[tokio::test(start_paused = true)]
async fn test_rescues_of_different_instances_run_concurrently() {
    let ctx = TestContext::new();
    let (account, first) = ctx.add_account_with_instance("ocid1.tenancy.par").await;
    let second = ctx.mock.seed_instance("ocid1.tenancy.par", SHAPE).await;
    let workflow = ctx.rescue_workflow();

    let (a, b) = futures::join!(
        workflow.run(rescue_request(&account, &first.instance_id, true), &DiscardSink),
        workflow.run(rescue_request(&account, &second.instance_id, true), &DiscardSink),
    );

    assert!(a.unwrap().is_completed());
    assert!(b.unwrap().is_completed());
    assert_eq!(ctx.mock.backups().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_rescue_of_same_instance_is_rejected() {
    let ctx = TestContext::new();
    let (account, seeded) = ctx.add_account_with_instance("ocid1.tenancy.busy").await;
    let workflow = ctx.rescue_workflow();

    let (a, b) = futures::join!(
        workflow.run(rescue_request(&account, &seeded.instance_id, false), &DiscardSink),
        workflow.run(rescue_request(&account, &seeded.instance_id, false), &DiscardSink),
    );

    assert!(a.unwrap().is_completed());
    assert_eq!(b.unwrap_err().error_code(), "RESOURCE_BUSY");
    assert_eq!(ctx.mock.call_count("create_boot_volume_backup").await, 1);
    assert!(!ctx.locks.is_held(&seeded.instance_id));
}

#[tokio::test(start_paused = true)]
async fn test_bandwidth_round_trip_through_runtime() {
    let ctx = TestContext::new();
    let account = ctx.add_account("ocid1.tenancy.bw").await;
    let seeded = ctx.mock.seed_instance("ocid1.tenancy.bw", "VM.Standard.E2.1.Micro").await;

    let runtime = CirrusRuntime::builder()
        .store(ctx.store.clone())
        .provider(Arc::new(ctx.mock.clone()))
        .workflow_config(workflow_config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let enabled = runtime
        .enable_bandwidth(account.id, &seeded.instance_id, 22, &DiscardSink)
        .await
        .unwrap();
    assert!(enabled.is_completed(), "{enabled:?}");
    let nat_route = enabled.result_str("routeTableId").unwrap().to_string();
    assert_eq!(
        ctx.mock.vnic(&seeded.vnic_id).await.unwrap().route_table_id.as_deref(),
        Some(nat_route.as_str())
    );

    let disabled = runtime
        .disable_bandwidth(account.id, &seeded.instance_id, false, false, &DiscardSink)
        .await
        .unwrap();
    assert!(disabled.is_completed(), "{disabled:?}");
    let restored = ctx.mock.vnic(&seeded.vnic_id).await.unwrap().route_table_id;
    assert!(restored.is_some());
    assert_ne!(restored.as_deref(), Some(nat_route.as_str()));
    assert!(
        ctx.mock
            .load_balancers()
            .await
            .iter()
            .all(|lb| lb.state == LifecycleState::Deleted)
    );

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bandwidth_rejects_unrestricted_shape_without_mutation() {
    let ctx = TestContext::new();
    let (account, seeded) = ctx.add_account_with_instance("ocid1.tenancy.shape").await;

    let err = ctx
        .bandwidth_workflow()
        .enable(
            EnableBandwidthRequest {
                account,
                instance_id: seeded.instance_id.clone(),
                health_check_port: 22,
            },
            &DiscardSink,
        )
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert_eq!(ctx.mock.calls().await, vec!["get_instance".to_string()]);
}
