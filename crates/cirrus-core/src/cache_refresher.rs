// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic inventory cache refresh.
//!
//! A ticker checks every minute whether any account's [`CacheEntry`] is
//! missing or older than the configured interval. If one is, the whole fleet
//! is refreshed: accounts are shuffled, then processed with bounded
//! concurrency and a random per-account delay so the remote API sees a
//! spread-out load.
//!
//! Each account's snapshot is assembled from independent fetches. A failed
//! fetch keeps the previous value of that one field; the entry's update time
//! is refreshed regardless.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::provider::{CloudProvider, LifecycleState, TenantInfo};
use crate::store::{Account, CacheEntry, Store};

/// Settings key enabling periodic refresh (`"true"` to enable).
pub const CACHE_ENABLED_KEY: &str = "cache_enabled";
/// Settings key holding the staleness interval in minutes (JSON integer).
pub const CACHE_INTERVAL_KEY: &str = "cache_interval_minutes";

/// Cache refresher configuration.
#[derive(Debug, Clone)]
pub struct CacheRefresherConfig {
    /// How often staleness is checked
    pub tick_interval: Duration,
    /// Accounts refreshed at the same time
    pub max_concurrency: usize,
    /// Lower bound of the delay before each account refresh
    pub jitter_min: Duration,
    /// Upper bound of the delay before each account refresh
    pub jitter_max: Duration,
    /// Staleness interval used when the setting is absent or invalid
    pub default_interval_minutes: i64,
}

impl Default for CacheRefresherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            max_concurrency: 5,
            jitter_min: Duration::from_secs(1),
            jitter_max: Duration::from_secs(10),
            default_interval_minutes: 30,
        }
    }
}

/// Result of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Accounts processed.
    pub accounts: usize,
    /// Accounts whose snapshot could not be stored.
    pub failed: usize,
}

/// Running ticker.
struct Ticker {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn Store>,
    provider: Arc<dyn CloudProvider>,
    config: CacheRefresherConfig,
    permits: Arc<Semaphore>,
    passes_in_flight: AtomicUsize,
    ticker: Mutex<Option<Ticker>>,
}

/// Periodic, bounded-concurrency cache refresher.
///
/// Cheap to clone; clones share the ticker and the concurrency bound.
#[derive(Clone)]
pub struct CacheRefresher {
    inner: Arc<Inner>,
}

/// Counts a refresh pass for as long as it lives.
struct PassGuard<'a>(&'a AtomicUsize);

impl<'a> PassGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CacheRefresher {
    /// Create a stopped refresher.
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CloudProvider>,
        config: CacheRefresherConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                config,
                permits,
                passes_in_flight: AtomicUsize::new(0),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Start the ticker. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut ticker = self.ticker();
        if ticker.is_some() {
            debug!("Cache refresher already running");
            return false;
        }

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(self.clone().run(shutdown.clone()));
        *ticker = Some(Ticker { shutdown, handle });
        true
    }

    /// Stop the ticker. Refresh passes already underway run to completion.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let taken = self.ticker().take();
        let Some(ticker) = taken else {
            debug!("Cache refresher not running");
            return false;
        };
        ticker.shutdown.notify_one();
        if let Err(e) = ticker.handle.await {
            error!(error = %e, "Cache refresher task panicked");
        }
        true
    }

    /// Whether the ticker is running.
    pub fn is_running(&self) -> bool {
        self.ticker().is_some()
    }

    fn ticker(&self) -> std::sync::MutexGuard<'_, Option<Ticker>> {
        self.inner.ticker.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(self, shutdown: Arc<Notify>) {
        info!(
            tick_interval_secs = self.inner.config.tick_interval.as_secs(),
            max_concurrency = self.inner.config.max_concurrency,
            "Cache refresher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("Cache refresher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.inner.config.tick_interval) => {
                    if self.inner.passes_in_flight.load(Ordering::SeqCst) > 0 {
                        debug!("Refresh pass still in flight, skipping tick");
                        continue;
                    }
                    let refresher = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = refresher.check_and_refresh().await {
                            error!(error = %e, "Cache staleness check failed");
                        }
                    });
                }
            }
        }
    }

    /// Refresh every account if caching is enabled and any entry is stale.
    ///
    /// Returns the pass summary, or `None` when nothing was due.
    pub async fn check_and_refresh(&self) -> Result<Option<RefreshSummary>> {
        if !self.needs_refresh().await? {
            return Ok(None);
        }
        self.refresh_all_now().await.map(Some)
    }

    /// Whether caching is enabled and at least one account has a missing or
    /// stale entry.
    pub async fn needs_refresh(&self) -> Result<bool> {
        if !self.is_cache_enabled().await? {
            debug!("Caching disabled");
            return Ok(false);
        }
        let interval = chrono::Duration::minutes(self.cache_interval_minutes().await?);
        let now = Utc::now();

        for account in self.inner.store.list_accounts().await? {
            let entry = self.inner.store.get_cache_entry(account.id).await?;
            if is_stale(entry.as_ref(), now, interval) {
                debug!(account_id = account.id, "Cache entry stale");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Refresh every account now, ignoring staleness.
    pub async fn refresh_all_now(&self) -> Result<RefreshSummary> {
        let _pass = PassGuard::enter(&self.inner.passes_in_flight);

        let mut accounts = self.inner.store.list_accounts().await?;
        accounts.shuffle(&mut rand::thread_rng());
        info!(accounts = accounts.len(), "Refreshing account caches");

        let mut summary = RefreshSummary {
            accounts: accounts.len(),
            failed: 0,
        };
        let mut units = JoinSet::new();
        for account in accounts {
            let permit = self
                .inner
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Other("refresh semaphore closed".to_string()))?;
            let refresher = self.clone();
            units.spawn(async move {
                let _permit = permit;
                tokio::time::sleep(refresher.jitter()).await;
                let account_id = account.id;
                (account_id, refresher.refresh(&account).await)
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((account_id, Err(e))) => {
                    error!(account_id, error = %e, "Failed to refresh account cache");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Refresh unit panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            accounts = summary.accounts,
            failed = summary.failed,
            "Account caches refreshed"
        );
        Ok(summary)
    }

    /// Refresh one account immediately, without jitter.
    pub async fn refresh_account(&self, account_id: i64) -> Result<CacheEntry> {
        let account = self
            .inner
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| Error::not_found("account", account_id.to_string()))?;
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Other("refresh semaphore closed".to_string()))?;
        self.refresh(&account).await
    }

    fn jitter(&self) -> Duration {
        let min = self.inner.config.jitter_min.as_millis() as u64;
        let max = self.inner.config.jitter_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    async fn refresh(&self, account: &Account) -> Result<CacheEntry> {
        let store = &self.inner.store;
        let provider = &self.inner.provider;
        let compartment_id = account.tenant_id.as_str();
        let now = Utc::now();

        let mut entry = store
            .get_cache_entry(account.id)
            .await?
            .unwrap_or_else(|| CacheEntry::empty(account.id, now));
        entry.updated_at = now;

        match provider.list_instances(account, compartment_id).await {
            Ok(instances) => {
                let mut details = Vec::with_capacity(instances.len());
                for instance in &instances {
                    match provider.get_instance_details(account, &instance.id).await {
                        Ok(d) => details.push(d),
                        Err(e) => warn!(
                            account_id = account.id,
                            instance_id = %instance.id,
                            error = %e,
                            "Skipping instance details"
                        ),
                    }
                }
                entry.instance_count = instances.len() as i64;
                entry.running_instances = instances
                    .iter()
                    .filter(|i| i.state == LifecycleState::Running)
                    .count() as i64;
                entry.instances_json = serde_json::to_string(&details)?;
            }
            Err(e) => warn!(account_id = account.id, error = %e, "Keeping cached instances"),
        }

        match provider.list_boot_volumes(account, compartment_id).await {
            Ok(volumes) => entry.volumes_json = serde_json::to_string(&volumes)?,
            Err(e) => warn!(account_id = account.id, error = %e, "Keeping cached boot volumes"),
        }

        match provider.list_vcns(account, compartment_id).await {
            Ok(vcns) => entry.vcns_json = serde_json::to_string(&vcns)?,
            Err(e) => warn!(account_id = account.id, error = %e, "Keeping cached VCNs"),
        }

        match provider.get_tenant_info(account).await {
            Ok(tenant) => {
                entry.tenant_json = serde_json::to_string(&tenant)?;
                self.enrich_account(account, &tenant).await;
            }
            Err(e) => warn!(account_id = account.id, error = %e, "Keeping cached tenant info"),
        }

        store.upsert_cache_entry(&entry).await?;
        debug!(
            account_id = account.id,
            instances = entry.instance_count,
            running = entry.running_instances,
            "Account cache refreshed"
        );
        Ok(entry)
    }

    /// Store the tenancy name and creation time learned from the provider.
    async fn enrich_account(&self, account: &Account, tenant: &TenantInfo) {
        let name = Some(tenant.name.as_str())
            .filter(|n| !n.is_empty() && account.tenant_name.as_deref() != Some(*n));
        let created_at = tenant
            .create_time
            .as_deref()
            .filter(|_| account.tenant_created_at.is_none());
        if name.is_none() && created_at.is_none() {
            return;
        }

        if let Err(e) = self
            .inner
            .store
            .update_account_tenant(account.id, name, created_at)
            .await
        {
            warn!(account_id = account.id, error = %e, "Failed to store tenant details");
        }
    }

    /// Whether periodic refresh is enabled.
    pub async fn is_cache_enabled(&self) -> Result<bool> {
        let value = self.inner.store.get_setting(CACHE_ENABLED_KEY).await?;
        Ok(value.as_deref() == Some("true"))
    }

    /// Staleness interval in minutes.
    ///
    /// Falls back to the configured default when the stored value is absent,
    /// not a JSON integer, or not positive.
    pub async fn cache_interval_minutes(&self) -> Result<i64> {
        let default = self.inner.config.default_interval_minutes.max(1);
        let value = self.inner.store.get_setting(CACHE_INTERVAL_KEY).await?;
        Ok(value
            .and_then(|v| serde_json::from_str::<i64>(&v).ok())
            .filter(|m| *m > 0)
            .unwrap_or(default))
    }

    /// Enable or disable periodic refresh.
    pub async fn set_cache_enabled(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "true" } else { "false" };
        self.inner.store.put_setting(CACHE_ENABLED_KEY, value).await
    }

    /// Set the staleness interval; non-positive values store the default.
    pub async fn set_cache_interval(&self, minutes: i64) -> Result<()> {
        let minutes = if minutes > 0 {
            minutes
        } else {
            self.inner.config.default_interval_minutes.max(1)
        };
        self.inner
            .store
            .put_setting(CACHE_INTERVAL_KEY, &serde_json::to_string(&minutes)?)
            .await
    }
}

/// An entry is stale when missing or at least `interval` old.
pub fn is_stale(entry: Option<&CacheEntry>, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
    entry.is_none_or(|e| now - e.updated_at >= interval)
}
