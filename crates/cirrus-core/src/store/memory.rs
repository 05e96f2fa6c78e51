// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process store for tests and the simulator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;

use crate::error::Result;

use super::{Account, CacheEntry, NewTask, Store, TaskAttempt, TaskLogEntry, TaskRecord, TaskStatus};

#[derive(Default)]
struct Tables {
    next_id: i64,
    accounts: BTreeMap<i64, Account>,
    cache_entries: BTreeMap<i64, CacheEntry>,
    tasks: BTreeMap<i64, TaskRecord>,
    task_logs: Vec<TaskLogEntry>,
    settings: HashMap<String, String>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store backed by in-memory maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.tables.lock().await.accounts.values().cloned().collect())
    }

    async fn get_account(&self, account_id: i64) -> Result<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(&account_id).cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<Account> {
        let mut tables = self.tables.lock().await;
        let mut saved = account.clone();
        saved.id = tables.allocate_id();
        tables.accounts.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn update_account_tenant(
        &self,
        account_id: i64,
        tenant_name: Option<&str>,
        tenant_created_at: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables.accounts.get_mut(&account_id) {
            if let Some(name) = tenant_name {
                account.tenant_name = Some(name.to_string());
            }
            if let Some(created) = tenant_created_at {
                account.tenant_created_at = Some(created.to_string());
            }
        }
        Ok(())
    }

    async fn get_cache_entry(&self, account_id: i64) -> Result<Option<CacheEntry>> {
        Ok(self.tables.lock().await.cache_entries.get(&account_id).cloned())
    }

    async fn list_cache_entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self
            .tables
            .lock()
            .await
            .cache_entries
            .values()
            .cloned()
            .collect())
    }

    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.cache_entries.insert(entry.account_id, entry.clone());
        Ok(())
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord> {
        let mut tables = self.tables.lock().await;
        let record = TaskRecord {
            id: tables.allocate_id(),
            account_id: task.account_id,
            create_params: Json(task.create_params.clone()),
            interval_seconds: task.interval_seconds,
            status: task.status.as_str().to_string(),
            execute_count: 0,
            success_count: 0,
            last_execute_time: None,
            last_message: None,
            created_at: Utc::now(),
        };
        tables.tasks.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<TaskRecord>> {
        Ok(self.tables.lock().await.tasks.get(&task_id).cloned())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s.as_str()))
            .cloned()
            .collect())
    }

    async fn set_task_status(&self, task_id: i64, status: TaskStatus) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.tasks.get_mut(&task_id) {
            Some(task) => {
                task.status = status.as_str().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_task_attempt(&self, task_id: i64, attempt: &TaskAttempt) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(task) = tables.tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        task.execute_count += 1;
        if attempt.success {
            task.success_count += 1;
            if task.task_status() == TaskStatus::Running {
                task.status = TaskStatus::Completed.as_str().to_string();
            }
        }
        task.last_execute_time = Some(attempt.executed_at);
        task.last_message = Some(attempt.message.clone());
        Ok(true)
    }

    async fn delete_task(&self, task_id: i64) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        tables.task_logs.retain(|l| l.task_id != task_id);
        Ok(tables.tasks.remove(&task_id).is_some())
    }

    async fn append_task_log(
        &self,
        task_id: i64,
        status: &str,
        message: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.task_logs.push(TaskLogEntry {
            id,
            task_id,
            status: status.to_string(),
            message: message.to_string(),
            execute_time: executed_at,
        });
        Ok(())
    }

    async fn list_task_logs(
        &self,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskLogEntry>> {
        let tables = self.tables.lock().await;
        let mut logs: Vec<TaskLogEntry> = tables
            .task_logs
            .iter()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| {
            b.execute_time
                .cmp(&a.execute_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(logs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_task_logs(&self, task_id: i64) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.task_logs.iter().filter(|l| l.task_id == task_id).count() as i64)
    }

    async fn clear_task_logs(&self, task_id: i64) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.task_logs.len();
        tables.task_logs.retain(|l| l.task_id != task_id);
        Ok((before - tables.task_logs.len()) as u64)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.tables.lock().await.settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LaunchSpec;

    #[tokio::test]
    async fn test_list_tasks_filters_by_status() {
        let store = MemoryStore::new();
        for status in [TaskStatus::Running, TaskStatus::Stopped, TaskStatus::Running] {
            store
                .insert_task(&NewTask {
                    account_id: 1,
                    create_params: LaunchSpec::default(),
                    interval_seconds: 60,
                    status,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.list_tasks(None).await.unwrap().len(), 3);
        assert_eq!(
            store
                .list_tasks(Some(TaskStatus::Running))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_clear_task_logs_only_touches_one_task() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.append_task_log(1, "error", "a", now).await.unwrap();
        store.append_task_log(1, "error", "b", now).await.unwrap();
        store.append_task_log(2, "error", "c", now).await.unwrap();

        assert_eq!(store.clear_task_logs(1).await.unwrap(), 2);
        assert_eq!(store.count_task_logs(1).await.unwrap(), 0);
        assert_eq!(store.count_task_logs(2).await.unwrap(), 1);
    }
}
