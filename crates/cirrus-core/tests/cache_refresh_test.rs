// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the cache refresh scheduler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;

use cirrus_core::cache_refresher::CacheRefresher;
use cirrus_core::provider::{MockProvider, TenantInfo, Vcn};
use cirrus_core::store::{SqliteStore, Store};

#[tokio::test(start_paused = true)]
async fn test_fan_out_is_bounded_by_max_concurrency() {
    let ctx = TestContext::with_mock(MockProvider::new().with_call_delay(Duration::from_secs(1)));
    for i in 0..20 {
        ctx.add_account_with_instance(&format!("ocid1.tenancy.fan{i}"))
            .await;
    }
    let refresher = ctx.cache_refresher(cache_config_without_jitter());
    refresher.set_cache_enabled(true).await.unwrap();

    let summary = refresher.check_and_refresh().await.unwrap().unwrap();

    assert_eq!(summary.accounts, 20);
    assert_eq!(summary.failed, 0);
    assert_eq!(ctx.mock.peak_in_flight(), 5);
    assert_eq!(ctx.store.list_cache_entries().await.unwrap().len(), 20);
    assert_eq!(ctx.mock.call_count("list_instances").await, 20);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_caches_are_not_refreshed_again() {
    let ctx = TestContext::new();
    ctx.add_account_with_instance("ocid1.tenancy.fresh").await;
    let refresher = ctx.cache_refresher(cache_config_without_jitter());
    refresher.set_cache_enabled(true).await.unwrap();

    assert!(refresher.check_and_refresh().await.unwrap().is_some());
    assert!(refresher.check_and_refresh().await.unwrap().is_none());
    assert_eq!(ctx.mock.call_count("list_instances").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_vcn_failure_keeps_previous_vcns() {
    let ctx = TestContext::new();
    let (account, _) = ctx
        .add_account_with_instance("ocid1.tenancy.partial")
        .await;
    let refresher = ctx.cache_refresher(cache_config_without_jitter());

    let first = refresher.refresh_account(account.id).await.unwrap();
    let vcns: Vec<Vcn> = serde_json::from_str(&first.vcns_json).unwrap();
    assert_eq!(vcns.len(), 1);
    assert_eq!(first.instance_count, 1);

    ctx.mock.seed_instance("ocid1.tenancy.partial", SHAPE).await;
    ctx.mock.fail_always("list_vcns").await;
    let second = refresher.refresh_account(account.id).await.unwrap();

    assert_eq!(second.instance_count, 2);
    assert_eq!(second.vcns_json, first.vcns_json);
    assert!(second.updated_at >= first.updated_at);
}

#[tokio::test(start_paused = true)]
async fn test_failing_detail_skips_only_that_instance() {
    let ctx = TestContext::new();
    let (account, _) = ctx
        .add_account_with_instance("ocid1.tenancy.detail")
        .await;
    ctx.mock.seed_instance("ocid1.tenancy.detail", SHAPE).await;
    ctx.mock.fail("get_instance_details", 1).await;
    let refresher = ctx.cache_refresher(cache_config_without_jitter());

    let entry = refresher.refresh_account(account.id).await.unwrap();

    let details: Vec<serde_json::Value> = serde_json::from_str(&entry.instances_json).unwrap();
    assert_eq!(entry.instance_count, 2);
    assert_eq!(details.len(), 1);
}

#[tokio::test]
async fn test_refresh_persists_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("cirrus.db");
    let store = Arc::new(SqliteStore::from_path(&path).await.unwrap());
    let ctx = TestContext::with_store(store, MockProvider::new());
    let (account, _) = ctx.add_account_with_instance("ocid1.tenancy.sql").await;
    ctx.mock
        .set_tenant(
            "ocid1.tenancy.sql",
            TenantInfo {
                id: "ocid1.tenancy.sql".to_string(),
                name: "acme".to_string(),
                create_time: Some("2024-01-02 03:04:05".to_string()),
                ..TenantInfo::default()
            },
        )
        .await;
    let refresher = ctx.cache_refresher(cache_config_without_jitter());
    refresher.set_cache_enabled(true).await.unwrap();
    refresher.set_cache_interval(15).await.unwrap();

    refresher.refresh_account(account.id).await.unwrap();

    // A second connection sees everything the first one wrote.
    let reopened = SqliteStore::from_path(&path).await.unwrap();
    let reloaded = CacheRefresher::new(
        Arc::new(reopened.clone()),
        Arc::new(ctx.mock.clone()),
        cache_config_without_jitter(),
    );
    assert!(reloaded.is_cache_enabled().await.unwrap());
    assert_eq!(reloaded.cache_interval_minutes().await.unwrap(), 15);

    let entry = reopened.get_cache_entry(account.id).await.unwrap().unwrap();
    assert_eq!(entry.instance_count, 1);
    assert_eq!(entry.running_instances, 1);
    let stored = reopened.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.tenant_name.as_deref(), Some("acme"));
    assert_eq!(
        stored.tenant_created_at.as_deref(),
        Some("2024-01-02 03:04:05")
    );
}
