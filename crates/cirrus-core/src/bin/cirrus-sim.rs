// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cirrus simulator
//!
//! Runs the cache refresher and the task scheduler against an in-process
//! mock cloud, backed by a real SQLite store:
//! - Seeds one instance per stored account into the mock
//! - Creates a demo account when the store is empty
//! - Enables cache refresh and runs until Ctrl-C

use std::sync::Arc;

use tracing::{info, warn};

use cirrus_core::config::Config;
use cirrus_core::provider::{MockProvider, TenantInfo};
use cirrus_core::runtime::CirrusRuntime;
use cirrus_core::store::{Account, SqliteStore, Store};

const DEMO_SHAPE: &str = "VM.Standard.A1.Flex";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cirrus_core=info,cirrus_sim=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        database_url = %config.database_url,
        cache_tick_secs = config.cache.tick_interval.as_secs(),
        max_concurrency = config.cache.max_concurrency,
        "Starting cirrus simulator"
    );

    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    info!("Connected to database");

    let mut accounts = store.list_accounts().await?;
    if accounts.is_empty() {
        let demo = store
            .insert_account(&Account::new(
                "ocid1.tenancy.oc1..demo",
                "ocid1.user.oc1..demo",
                "us-ashburn-1",
            ))
            .await?;
        info!(account_id = demo.id, "Created demo account");
        accounts.push(demo);
    }

    let provider = MockProvider::new();
    for account in &accounts {
        let seeded = provider.seed_instance(&account.tenant_id, DEMO_SHAPE).await;
        provider
            .set_tenant(
                &account.tenant_id,
                TenantInfo {
                    id: account.tenant_id.clone(),
                    name: format!("sim-tenant-{}", account.id),
                    home_region_key: "IAD".to_string(),
                    regions: vec![account.region.clone()],
                    ..TenantInfo::default()
                },
            )
            .await;
        info!(
            account_id = account.id,
            instance_id = %seeded.instance_id,
            "Seeded mock instance"
        );
    }

    let runtime = CirrusRuntime::builder()
        .store(store)
        .provider(Arc::new(provider))
        .config(&config)
        .build()?
        .start()
        .await?;

    runtime.cache().set_cache_enabled(true).await?;
    info!(accounts = accounts.len(), "Simulator ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Cirrus simulator shut down");

    Ok(())
}
