// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;

use crate::error::{Error, Result};

use super::{Account, CacheEntry, NewTask, Store, TaskAttempt, TaskLogEntry, TaskRecord, TaskStatus};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const TASK_COLUMNS: &str = "id, account_id, create_params, interval_seconds, status, \
     execute_count, success_count, last_execute_time, last_message, created_at";

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing, already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite URL and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file and run migrations.
    ///
    /// Parent directories are created when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Other(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(accounts)
    }

    async fn get_account(&self, account_id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn insert_account(&self, account: &Account) -> Result<Account> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (username, tenant_id, user_id, fingerprint, region, key_file,
                                  tenant_name, tenant_created_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.username)
        .bind(&account.tenant_id)
        .bind(&account.user_id)
        .bind(&account.fingerprint)
        .bind(&account.region)
        .bind(&account.key_file)
        .bind(&account.tenant_name)
        .bind(&account.tenant_created_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_account(id)
            .await?
            .ok_or_else(|| Error::not_found("account", id.to_string()))
    }

    async fn update_account_tenant(
        &self,
        account_id: i64,
        tenant_name: Option<&str>,
        tenant_created_at: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET tenant_name = COALESCE(?, tenant_name),
                tenant_created_at = COALESCE(?, tenant_created_at)
            WHERE id = ?
            "#,
        )
        .bind(tenant_name)
        .bind(tenant_created_at)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cache_entry(&self, account_id: i64) -> Result<Option<CacheEntry>> {
        let entry =
            sqlx::query_as::<_, CacheEntry>("SELECT * FROM cache_entries WHERE account_id = ?")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(entry)
    }

    async fn list_cache_entries(&self) -> Result<Vec<CacheEntry>> {
        let entries =
            sqlx::query_as::<_, CacheEntry>("SELECT * FROM cache_entries ORDER BY account_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(entries)
    }

    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (account_id, instance_count, running_instances,
                                       instances_json, volumes_json, vcns_json, tenant_json,
                                       updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                instance_count = excluded.instance_count,
                running_instances = excluded.running_instances,
                instances_json = excluded.instances_json,
                volumes_json = excluded.volumes_json,
                vcns_json = excluded.vcns_json,
                tenant_json = excluded.tenant_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.account_id)
        .bind(entry.instance_count)
        .bind(entry.running_instances)
        .bind(&entry.instances_json)
        .bind(&entry.volumes_json)
        .bind(&entry.vcns_json)
        .bind(&entry.tenant_json)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (account_id, create_params, interval_seconds, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.account_id)
        .bind(Json(&task.create_params))
        .bind(task.interval_seconds)
        .bind(task.status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_task(id)
            .await?
            .ok_or_else(|| Error::not_found("task", id.to_string()))
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<TaskRecord>> {
        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        let tasks = match status {
            Some(status) => {
                sqlx::query_as::<_, TaskRecord>(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? ORDER BY id"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TaskRecord>(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(tasks)
    }

    async fn set_task_status(&self, task_id: i64, status: TaskStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_task_attempt(&self, task_id: i64, attempt: &TaskAttempt) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET execute_count = execute_count + 1,
                success_count = success_count + CASE WHEN ?1 THEN 1 ELSE 0 END,
                status = CASE WHEN ?1 AND status = 'running' THEN 'completed' ELSE status END,
                last_execute_time = ?2,
                last_message = ?3
            WHERE id = ?4
            "#,
        )
        .bind(attempt.success)
        .bind(attempt.executed_at)
        .bind(&attempt.message)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_task(&self, task_id: i64) -> Result<bool> {
        sqlx::query("DELETE FROM task_logs WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_task_log(
        &self,
        task_id: i64,
        status: &str,
        message: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_logs (task_id, status, message, execute_time) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(status)
        .bind(message)
        .bind(executed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_task_logs(
        &self,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskLogEntry>> {
        let logs = sqlx::query_as::<_, TaskLogEntry>(
            r#"
            SELECT id, task_id, status, message, execute_time
            FROM task_logs
            WHERE task_id = ?
            ORDER BY execute_time DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(task_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn count_task_logs(&self, task_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_logs WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn clear_task_logs(&self, task_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_logs WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LaunchSpec;

    /// Create an in-memory SQLite store for testing.
    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        MIGRATOR.run(&pool).await.expect("Failed to run migrations");

        SqliteStore::new(pool)
    }

    async fn running_task(store: &SqliteStore) -> TaskRecord {
        let account = store
            .insert_account(&Account::new("ocid1.tenancy.a", "ocid1.user.a", "eu-frankfurt-1"))
            .await
            .unwrap();
        store
            .insert_task(&NewTask {
                account_id: account.id,
                create_params: LaunchSpec::default(),
                interval_seconds: 60,
                status: TaskStatus::Running,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_account() {
        let store = test_store().await;

        let saved = store
            .insert_account(&Account::new("ocid1.tenancy.a", "ocid1.user.a", "eu-frankfurt-1"))
            .await
            .unwrap();

        let loaded = store.get_account(saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.tenant_id, "ocid1.tenancy.a");
        assert_eq!(loaded.region, "eu-frankfurt-1");
        assert!(loaded.tenant_name.is_none());
    }

    #[tokio::test]
    async fn test_update_account_tenant_keeps_known_values() {
        let store = test_store().await;
        let saved = store
            .insert_account(&Account::new("t", "u", "r"))
            .await
            .unwrap();

        store
            .update_account_tenant(saved.id, Some("acme"), Some("2023-01-02 03:04:05"))
            .await
            .unwrap();
        store
            .update_account_tenant(saved.id, Some("acme-renamed"), None)
            .await
            .unwrap();

        let loaded = store.get_account(saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.tenant_name.as_deref(), Some("acme-renamed"));
        assert_eq!(loaded.tenant_created_at.as_deref(), Some("2023-01-02 03:04:05"));
    }

    #[tokio::test]
    async fn test_cache_entry_upsert_overwrites() {
        let store = test_store().await;
        let account = store
            .insert_account(&Account::new("t", "u", "r"))
            .await
            .unwrap();

        let mut entry = CacheEntry::empty(account.id, Utc::now());
        store.upsert_cache_entry(&entry).await.unwrap();

        entry.instance_count = 3;
        entry.vcns_json = r#"[{"id":"vcn"}]"#.to_string();
        store.upsert_cache_entry(&entry).await.unwrap();

        let loaded = store.get_cache_entry(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.instance_count, 3);
        assert_eq!(loaded.vcns_json, r#"[{"id":"vcn"}]"#);
        assert_eq!(store.list_cache_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_task_roundtrip_preserves_launch_spec() {
        let store = test_store().await;
        let task = running_task(&store).await;

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.task_status(), TaskStatus::Running);
        assert_eq!(loaded.create_params.0, LaunchSpec::default());
        assert_eq!(loaded.execute_count, 0);
    }

    #[tokio::test]
    async fn test_successful_attempt_completes_running_task() {
        let store = test_store().await;
        let task = running_task(&store).await;

        let attempt = TaskAttempt {
            success: true,
            message: "instance created".to_string(),
            executed_at: Utc::now(),
        };
        assert!(store.record_task_attempt(task.id, &attempt).await.unwrap());

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.task_status(), TaskStatus::Completed);
        assert_eq!(loaded.execute_count, 1);
        assert_eq!(loaded.success_count, 1);
        assert_eq!(loaded.last_message.as_deref(), Some("instance created"));
    }

    #[tokio::test]
    async fn test_attempt_does_not_override_stopped() {
        let store = test_store().await;
        let task = running_task(&store).await;
        store
            .set_task_status(task.id, TaskStatus::Stopped)
            .await
            .unwrap();

        let attempt = TaskAttempt {
            success: true,
            message: "instance created".to_string(),
            executed_at: Utc::now(),
        };
        store.record_task_attempt(task.id, &attempt).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.task_status(), TaskStatus::Stopped);
        assert_eq!(loaded.success_count, 1);
    }

    #[tokio::test]
    async fn test_task_logs_paged_newest_first() {
        let store = test_store().await;
        let task = running_task(&store).await;
        let base = Utc::now();

        for i in 0..5 {
            store
                .append_task_log(
                    task.id,
                    "error",
                    &format!("attempt {i}"),
                    base + chrono::Duration::seconds(i),
                )
                .await
                .unwrap();
        }

        let page = store.list_task_logs(task.id, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message, "attempt 4");
        assert_eq!(page[1].message, "attempt 3");
        assert_eq!(store.count_task_logs(task.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_delete_task_removes_logs() {
        let store = test_store().await;
        let task = running_task(&store).await;
        store
            .append_task_log(task.id, "error", "create failed: boom", Utc::now())
            .await
            .unwrap();

        assert!(store.delete_task(task.id).await.unwrap());
        assert!(!store.delete_task(task.id).await.unwrap());
        assert!(store.get_task(task.id).await.unwrap().is_none());
        assert_eq!(store.count_task_logs(task.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let store = test_store().await;

        assert!(store.get_setting("cache_enabled").await.unwrap().is_none());
        store.put_setting("cache_enabled", "true").await.unwrap();
        store.put_setting("cache_enabled", "false").await.unwrap();

        assert_eq!(
            store.get_setting("cache_enabled").await.unwrap().as_deref(),
            Some("false")
        );
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cirrus.db");

        let store = SqliteStore::from_path(&path).await.unwrap();
        store.put_setting("cache_interval_minutes", "15").await.unwrap();

        assert!(path.exists());
    }
}
