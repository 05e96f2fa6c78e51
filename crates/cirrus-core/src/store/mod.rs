// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store interfaces and backends.
//!
//! Durable record of accounts, cache snapshots, retry tasks with their
//! execution logs, and the flat settings table. Updates are row-level
//! last-writer-wins; no cross-entity transactions are required.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::error::Result;
use crate::provider::LaunchSpec;

/// A cloud account: credential bundle, region and identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    /// Database primary key.
    pub id: i64,
    /// Display name chosen by the operator.
    pub username: String,
    /// Tenancy OCID; also used as the root compartment.
    pub tenant_id: String,
    /// API user OCID.
    pub user_id: String,
    /// API key fingerprint.
    pub fingerprint: String,
    /// Home region of the credentials.
    pub region: String,
    /// Path to the private key file.
    pub key_file: String,
    /// Tenancy name, filled in by cache refresh.
    pub tenant_name: Option<String>,
    /// Tenancy creation time (`%Y-%m-%d %H:%M:%S`), filled in by cache refresh.
    pub tenant_created_at: Option<String>,
    /// When the account was added.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Build an unsaved account.
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            username: String::new(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            fingerprint: String::new(),
            region: region.into(),
            key_file: String::new(),
            tenant_name: None,
            tenant_created_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-account inventory snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheEntry {
    /// Account the snapshot belongs to.
    pub account_id: i64,
    /// Number of instances.
    pub instance_count: i64,
    /// Number of instances in `RUNNING` state.
    pub running_instances: i64,
    /// JSON array of instance details.
    pub instances_json: String,
    /// JSON array of boot volumes.
    pub volumes_json: String,
    /// JSON array of VCNs.
    pub vcns_json: String,
    /// JSON object with tenancy details.
    pub tenant_json: String,
    /// Last refresh.
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry with empty blobs.
    pub fn empty(account_id: i64, updated_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            instance_count: 0,
            running_instances: 0,
            instances_json: "[]".to_string(),
            volumes_json: "[]".to_string(),
            vcns_json: "[]".to_string(),
            tenant_json: "{}".to_string(),
            updated_at,
        }
    }
}

/// Status of a retry task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Has a live timer.
    Running,
    /// Paused by an operator.
    Stopped,
    /// The operation succeeded; never scheduled again.
    Completed,
}

impl TaskStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Completed => "completed",
        }
    }

    /// Parse a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(TaskStatus::Running),
            "stopped" => Some(TaskStatus::Stopped),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

/// A persistent background task that retries instance creation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    /// Database primary key.
    pub id: i64,
    /// Account the task acts for.
    pub account_id: i64,
    /// Launch parameters.
    pub create_params: Json<LaunchSpec>,
    /// Seconds between attempts.
    pub interval_seconds: i64,
    /// Status (running, stopped, completed).
    pub status: String,
    /// Number of attempts made.
    pub execute_count: i64,
    /// Number of successful attempts.
    pub success_count: i64,
    /// When the last attempt ran.
    pub last_execute_time: Option<DateTime<Utc>>,
    /// Outcome message of the last attempt.
    pub last_message: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Parsed status. Unknown values are treated as stopped.
    pub fn task_status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Stopped)
    }
}

/// Fields for inserting a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Account the task acts for.
    pub account_id: i64,
    /// Launch parameters.
    pub create_params: LaunchSpec,
    /// Seconds between attempts.
    pub interval_seconds: i64,
    /// Initial status.
    pub status: TaskStatus,
}

/// Outcome of one task attempt.
#[derive(Debug, Clone)]
pub struct TaskAttempt {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// When the attempt ran.
    pub executed_at: DateTime<Utc>,
}

/// One line of a task's execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskLogEntry {
    /// Database primary key.
    pub id: i64,
    /// Owning task.
    pub task_id: i64,
    /// `success` or `error`.
    pub status: String,
    /// Human-readable outcome.
    pub message: String,
    /// When the attempt ran.
    pub execute_time: DateTime<Utc>,
}

/// Store interface used by the schedulers and the runtime.
#[async_trait]
pub trait Store: Send + Sync {
    /// All accounts ordered by id.
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Account by id, `None` when missing.
    async fn get_account(&self, account_id: i64) -> Result<Option<Account>>;

    /// Insert an account; the returned record carries the assigned id.
    async fn insert_account(&self, account: &Account) -> Result<Account>;

    /// Update the tenancy fields learned during cache refresh.
    async fn update_account_tenant(
        &self,
        account_id: i64,
        tenant_name: Option<&str>,
        tenant_created_at: Option<&str>,
    ) -> Result<()>;

    /// Cached snapshot of one account.
    async fn get_cache_entry(&self, account_id: i64) -> Result<Option<CacheEntry>>;

    /// Every cached snapshot.
    async fn list_cache_entries(&self) -> Result<Vec<CacheEntry>>;

    /// Insert or overwrite the entry keyed by `entry.account_id`.
    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()>;

    /// Persist a new task and return it with its id and counters.
    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord>;

    /// Task by id, `None` when missing.
    async fn get_task(&self, task_id: i64) -> Result<Option<TaskRecord>>;

    /// Tasks ordered by id, optionally filtered by status.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>>;

    /// Returns `false` when the task does not exist.
    async fn set_task_status(&self, task_id: i64, status: TaskStatus) -> Result<bool>;

    /// Count an attempt and store its outcome.
    ///
    /// A successful attempt moves `running` to `completed`; any other status
    /// is left untouched. Returns `false` when the task does not exist.
    async fn record_task_attempt(&self, task_id: i64, attempt: &TaskAttempt) -> Result<bool>;

    /// Delete a task together with its logs. Returns `false` when missing.
    async fn delete_task(&self, task_id: i64) -> Result<bool>;

    /// Append one execution record to a task's history.
    async fn append_task_log(
        &self,
        task_id: i64,
        status: &str,
        message: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Logs newest first.
    async fn list_task_logs(
        &self,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskLogEntry>>;

    /// Number of log entries of a task.
    async fn count_task_logs(&self, task_id: i64) -> Result<i64>;

    /// Returns the number of removed entries.
    async fn clear_task_logs(&self, task_id: i64) -> Result<u64>;

    /// Raw value of a settings key.
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a settings key.
    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;
}
