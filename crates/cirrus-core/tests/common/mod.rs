// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for cirrus-core integration tests.
//!
//! Provides TestContext wiring a store, a mock cloud and shared leases.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use cirrus_core::cache_refresher::{CacheRefresher, CacheRefresherConfig};
use cirrus_core::lease::ResourceLocks;
use cirrus_core::provider::{MockProvider, SeededInstance};
use cirrus_core::store::{Account, MemoryStore, Store};
use cirrus_core::task_scheduler::{TaskScheduler, TaskSchedulerConfig};
use cirrus_core::workflow::{
    BandwidthWorkflow, ProgressEvent, RescueRequest, RescueWorkflow, WorkflowConfig,
};

pub const SHAPE: &str = "VM.Standard.A1.Flex";

/// Test context sharing one store, mock cloud and lease table.
pub struct TestContext {
    pub store: Arc<dyn Store>,
    pub mock: MockProvider,
    pub locks: ResourceLocks,
}

impl TestContext {
    /// In-memory store with a default mock.
    pub fn new() -> Self {
        Self::with_mock(MockProvider::new())
    }

    /// In-memory store with a preconfigured mock.
    pub fn with_mock(mock: MockProvider) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), mock)
    }

    /// Any store with a preconfigured mock.
    pub fn with_store(store: Arc<dyn Store>, mock: MockProvider) -> Self {
        Self {
            store,
            mock,
            locks: ResourceLocks::new(),
        }
    }

    /// Insert an account whose compartment is its tenancy.
    pub async fn add_account(&self, tenant_id: &str) -> Account {
        self.store
            .insert_account(&Account::new(tenant_id, "ocid1.user.test", "us-ashburn-1"))
            .await
            .expect("Failed to insert account")
    }

    /// Insert an account and seed a running instance for it.
    pub async fn add_account_with_instance(&self, tenant_id: &str) -> (Account, SeededInstance) {
        let account = self.add_account(tenant_id).await;
        let seeded = self.mock.seed_instance(tenant_id, SHAPE).await;
        (account, seeded)
    }

    pub fn rescue_workflow(&self) -> RescueWorkflow {
        RescueWorkflow::new(
            Arc::new(self.mock.clone()),
            self.locks.clone(),
            workflow_config(),
        )
    }

    pub fn bandwidth_workflow(&self) -> BandwidthWorkflow {
        BandwidthWorkflow::new(
            Arc::new(self.mock.clone()),
            self.locks.clone(),
            workflow_config(),
        )
    }

    pub fn cache_refresher(&self, config: CacheRefresherConfig) -> CacheRefresher {
        CacheRefresher::new(self.store.clone(), Arc::new(self.mock.clone()), config)
    }

    pub fn task_scheduler(&self) -> TaskScheduler {
        TaskScheduler::new(
            self.store.clone(),
            Arc::new(self.mock.clone()),
            self.locks.clone(),
            TaskSchedulerConfig::default(),
        )
    }
}

/// Workflow settings with a one-second poll.
pub fn workflow_config() -> WorkflowConfig {
    WorkflowConfig {
        poll_interval: Duration::from_secs(1),
        max_poll_attempts: 60,
        ..WorkflowConfig::default()
    }
}

/// Cache settings without jitter.
pub fn cache_config_without_jitter() -> CacheRefresherConfig {
    CacheRefresherConfig {
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
        ..CacheRefresherConfig::default()
    }
}

pub fn rescue_request(account: &Account, instance_id: &str, keep_backup: bool) -> RescueRequest {
    RescueRequest {
        account: account.clone(),
        instance_id: instance_id.to_string(),
        keep_backup,
    }
}

/// Everything buffered on a progress channel.
pub fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Index of the first call of `operation` in the mock's call log.
pub fn first_call(calls: &[String], operation: &str) -> usize {
    calls
        .iter()
        .position(|c| c == operation)
        .unwrap_or_else(|| panic!("{operation} was never called: {calls:?}"))
}
