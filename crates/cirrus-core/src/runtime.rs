// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for cirrus.
//!
//! [`CirrusRuntime`] wires a [`Store`] and a [`CloudProvider`] into the cache
//! refresher, the task scheduler and the two workflows, and starts the
//! background schedulers inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cirrus_core::provider::MockProvider;
//! use cirrus_core::runtime::CirrusRuntime;
//! use cirrus_core::store::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::connect("sqlite://cirrus.db").await?);
//!
//!     let runtime = CirrusRuntime::builder()
//!         .store(store)
//!         .provider(Arc::new(MockProvider::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.cache().set_cache_enabled(true).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::cache_refresher::{CacheRefresher, CacheRefresherConfig};
use crate::config::Config;
use crate::error::Error;
use crate::lease::ResourceLocks;
use crate::provider::CloudProvider;
use crate::store::{Account, CacheEntry, Store};
use crate::task_scheduler::{TaskScheduler, TaskSchedulerConfig};
use crate::traffic::{TrafficSeries, parse_window_bound, traffic_summary};
use crate::workflow::{
    BandwidthWorkflow, DisableBandwidthRequest, EnableBandwidthRequest, ProgressSink,
    RescueRequest, RescueWorkflow, WorkflowConfig, WorkflowOutcome,
};

/// Builder for creating a [`CirrusRuntime`].
#[derive(Default)]
pub struct CirrusRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    provider: Option<Arc<dyn CloudProvider>>,
    cache: CacheRefresherConfig,
    tasks: TaskSchedulerConfig,
    workflow: WorkflowConfig,
}

impl CirrusRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the cloud provider (required).
    pub fn provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Take scheduler and workflow settings from a loaded [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.cache = config.cache.clone();
        self.tasks = config.tasks.clone();
        self.workflow = config.workflow.clone();
        self
    }

    /// Set the cache refresher configuration.
    pub fn cache_config(mut self, config: CacheRefresherConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set the task scheduler configuration.
    pub fn task_config(mut self, config: TaskSchedulerConfig) -> Self {
        self.tasks = config;
        self
    }

    /// Set the workflow polling configuration.
    pub fn workflow_config(mut self, config: WorkflowConfig) -> Self {
        self.workflow = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<CirrusRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("provider is required"))?;

        Ok(CirrusRuntimeConfig {
            store,
            provider,
            cache: self.cache,
            tasks: self.tasks,
            workflow: self.workflow,
        })
    }
}

/// Configuration for a [`CirrusRuntime`].
pub struct CirrusRuntimeConfig {
    store: Arc<dyn Store>,
    provider: Arc<dyn CloudProvider>,
    cache: CacheRefresherConfig,
    tasks: TaskSchedulerConfig,
    workflow: WorkflowConfig,
}

impl CirrusRuntimeConfig {
    /// Start the cache refresher ticker and re-arm persisted running tasks.
    pub async fn start(self) -> Result<CirrusRuntime> {
        let locks = ResourceLocks::new();

        let cache = CacheRefresher::new(self.store.clone(), self.provider.clone(), self.cache);
        let tasks = TaskScheduler::new(
            self.store.clone(),
            self.provider.clone(),
            locks.clone(),
            self.tasks,
        );
        let rescue = RescueWorkflow::new(self.provider.clone(), locks.clone(), self.workflow.clone());
        let bandwidth = BandwidthWorkflow::new(self.provider.clone(), locks.clone(), self.workflow);

        let rearmed = tasks.start().await?;
        cache.start();

        info!(
            provider = self.provider.provider_type(),
            rearmed_tasks = rearmed,
            "CirrusRuntime started"
        );

        Ok(CirrusRuntime {
            store: self.store,
            provider: self.provider,
            locks,
            cache,
            tasks,
            rescue,
            bandwidth,
        })
    }
}

/// A running cirrus instance.
///
/// The runtime manages:
/// - Cache refresher ticker (inventory snapshots per account)
/// - Task scheduler (one retry timer per running create task)
/// - Rescue and bandwidth workflows sharing one set of resource leases
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct CirrusRuntime {
    store: Arc<dyn Store>,
    provider: Arc<dyn CloudProvider>,
    locks: ResourceLocks,
    cache: CacheRefresher,
    tasks: TaskScheduler,
    rescue: RescueWorkflow,
    bandwidth: BandwidthWorkflow,
}

impl CirrusRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> CirrusRuntimeBuilder {
        CirrusRuntimeBuilder::new()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Cache settings, manual refresh and staleness checks.
    pub fn cache(&self) -> &CacheRefresher {
        &self.cache
    }

    /// Task creation, control and logs.
    pub fn tasks(&self) -> &TaskScheduler {
        &self.tasks
    }

    /// Leases held by in-flight workflow runs and task executions.
    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    /// Look up an account.
    pub async fn account(&self, account_id: i64) -> crate::Result<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| Error::not_found("account", account_id.to_string()))
    }

    /// Last inventory snapshot of an account.
    pub async fn cache_entry(&self, account_id: i64) -> crate::Result<Option<CacheEntry>> {
        self.store.get_cache_entry(account_id).await
    }

    /// Rebuild an instance's boot volume from a backup of itself.
    pub async fn rescue(
        &self,
        account_id: i64,
        instance_id: &str,
        keep_backup: bool,
        sink: &dyn ProgressSink,
    ) -> crate::Result<WorkflowOutcome> {
        let account = self.account(account_id).await?;
        self.rescue
            .run(
                RescueRequest {
                    account,
                    instance_id: instance_id.to_string(),
                    keep_backup,
                },
                sink,
            )
            .await
    }

    /// Front an instance with a NAT gateway and a network load balancer.
    pub async fn enable_bandwidth(
        &self,
        account_id: i64,
        instance_id: &str,
        health_check_port: u16,
        sink: &dyn ProgressSink,
    ) -> crate::Result<WorkflowOutcome> {
        let account = self.account(account_id).await?;
        self.bandwidth
            .enable(
                EnableBandwidthRequest {
                    account,
                    instance_id: instance_id.to_string(),
                    health_check_port,
                },
                sink,
            )
            .await
    }

    /// Undo [`enable_bandwidth`](Self::enable_bandwidth).
    pub async fn disable_bandwidth(
        &self,
        account_id: i64,
        instance_id: &str,
        keep_nat: bool,
        keep_load_balancer: bool,
        sink: &dyn ProgressSink,
    ) -> crate::Result<WorkflowOutcome> {
        let account = self.account(account_id).await?;
        self.bandwidth
            .disable(
                DisableBandwidthRequest {
                    account,
                    instance_id: instance_id.to_string(),
                    keep_nat,
                    keep_load_balancer,
                },
                sink,
            )
            .await
    }

    /// Per-minute traffic of a VNIC.
    pub async fn traffic(
        &self,
        account_id: i64,
        vnic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> crate::Result<TrafficSeries> {
        let account = self.account(account_id).await?;
        Ok(traffic_summary(self.provider.as_ref(), &account, vnic_id, start, end).await)
    }

    /// Per-minute traffic of a VNIC for a `YYYY-MM-DD HH:MM:SS` window.
    ///
    /// A bound that does not parse falls back to one hour ago.
    pub async fn traffic_window(
        &self,
        account_id: i64,
        vnic_id: &str,
        start: &str,
        end: &str,
    ) -> crate::Result<TrafficSeries> {
        let now = Utc::now();
        let start = parse_window_bound(start, now);
        let end = parse_window_bound(end, now);
        self.traffic(account_id, vnic_id, start, end).await
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the cache ticker and cancels every task timer. Workflow runs
    /// and refresh passes already in flight are not interrupted.
    pub async fn shutdown(self) -> Result<()> {
        info!("CirrusRuntime shutting down...");

        self.cache.stop().await;
        let cancelled = self.tasks.stop().await;

        info!(cancelled_timers = cancelled, "CirrusRuntime shutdown complete");
        Ok(())
    }
}
