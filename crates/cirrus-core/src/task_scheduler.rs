// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistent retry scheduler for instance-creation tasks.
//!
//! Every `running` task owns one one-shot timer. When it fires the task is
//! re-read, the launch is attempted once, the outcome is persisted, and the
//! timer is re-armed on failure. Success completes the task for good.
//!
//! The timer table is owned by a single actor task; scheduling, cancelling
//! and firing are all messages to it. A slot is either `Armed` (sleeping) or
//! `Executing` (attempt in progress). Each arm gets a fresh generation, so a
//! stale fire or a re-arm from an execution that was cancelled meanwhile is
//! ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::lease::ResourceLocks;
use crate::provider::{CloudProvider, LaunchSpec};
use crate::store::{NewTask, Store, TaskAttempt, TaskLogEntry, TaskRecord, TaskStatus};

/// Intervals below this many seconds are replaced on creation.
pub const MIN_TASK_INTERVAL_SECS: i64 = 10;
/// Interval used when the requested one is too short.
pub const DEFAULT_TASK_INTERVAL_SECS: i64 = 60;

/// Task scheduler configuration.
#[derive(Debug, Clone)]
pub struct TaskSchedulerConfig {
    /// Floor applied to every timer delay
    pub min_timer_interval: Duration,
}

impl Default for TaskSchedulerConfig {
    fn default() -> Self {
        Self {
            min_timer_interval: Duration::from_secs(10),
        }
    }
}

/// Interval a new task is stored with.
pub fn normalize_interval(interval_seconds: i64) -> i64 {
    if interval_seconds < MIN_TASK_INTERVAL_SECS {
        DEFAULT_TASK_INTERVAL_SECS
    } else {
        interval_seconds
    }
}

enum Command {
    Schedule {
        task_id: i64,
        delay: Duration,
    },
    Fired {
        task_id: i64,
        generation: u64,
    },
    Rearm {
        task_id: i64,
        generation: u64,
        delay: Duration,
    },
    Finish {
        task_id: i64,
        generation: u64,
    },
    Cancel {
        task_id: i64,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    ActiveTimers {
        reply: oneshot::Sender<Vec<i64>>,
    },
}

enum Slot {
    Armed { generation: u64, handle: JoinHandle<()> },
    Executing { generation: u64 },
}

struct Shared {
    store: Arc<dyn Store>,
    provider: Arc<dyn CloudProvider>,
    locks: ResourceLocks,
    config: TaskSchedulerConfig,
}

/// Single writer of the timer table.
struct TimerTable {
    slots: HashMap<i64, Slot>,
    next_generation: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl TimerTable {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!("Task timer table started");
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        for (_, slot) in self.slots.drain() {
            if let Slot::Armed { handle, .. } = slot {
                handle.abort();
            }
        }
        debug!("Task timer table stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Schedule { task_id, delay } => self.arm(task_id, delay),
            Command::Fired {
                task_id,
                generation,
            } => {
                let current = matches!(
                    self.slots.get(&task_id),
                    Some(Slot::Armed { generation: g, .. }) if *g == generation
                );
                if !current {
                    debug!(task_id, generation, "Ignoring stale timer");
                    return;
                }
                self.slots
                    .insert(task_id, Slot::Executing { generation });
                tokio::spawn(execute(
                    self.shared.clone(),
                    self.commands.clone(),
                    task_id,
                    generation,
                ));
            }
            Command::Rearm {
                task_id,
                generation,
                delay,
            } => {
                if self.is_executing(task_id, generation) {
                    self.arm(task_id, delay);
                } else {
                    debug!(task_id, "Task was cancelled during execution, not re-arming");
                }
            }
            Command::Finish {
                task_id,
                generation,
            } => {
                if self.is_executing(task_id, generation) {
                    self.slots.remove(&task_id);
                }
            }
            Command::Cancel { task_id, reply } => {
                let existed = match self.slots.remove(&task_id) {
                    Some(Slot::Armed { handle, .. }) => {
                        handle.abort();
                        true
                    }
                    Some(Slot::Executing { .. }) => true,
                    None => false,
                };
                let _ = reply.send(existed);
            }
            Command::CancelAll { reply } => {
                let count = self.slots.len();
                for (_, slot) in self.slots.drain() {
                    if let Slot::Armed { handle, .. } = slot {
                        handle.abort();
                    }
                }
                let _ = reply.send(count);
            }
            Command::ActiveTimers { reply } => {
                let mut ids: Vec<i64> = self
                    .slots
                    .iter()
                    .filter(|(_, slot)| matches!(slot, Slot::Armed { .. }))
                    .map(|(id, _)| *id)
                    .collect();
                ids.sort_unstable();
                let _ = reply.send(ids);
            }
        }
    }

    fn is_executing(&self, task_id: i64, generation: u64) -> bool {
        matches!(
            self.slots.get(&task_id),
            Some(Slot::Executing { generation: g }) if *g == generation
        )
    }

    /// Replace whatever the task had with a fresh timer.
    fn arm(&mut self, task_id: i64, delay: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let commands = self.commands.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Fired {
                    task_id,
                    generation,
                });
            }
        });

        if let Some(Slot::Armed { handle: old, .. }) =
            self.slots.insert(task_id, Slot::Armed { generation, handle })
        {
            old.abort();
        }
        debug!(task_id, delay_secs = delay.as_secs(), "Task timer armed");
    }
}

/// Run one attempt and report back to the timer table.
async fn execute(
    shared: Arc<Shared>,
    commands: mpsc::WeakUnboundedSender<Command>,
    task_id: i64,
    generation: u64,
) {
    let command = match shared.attempt(task_id).await {
        Ok(Some(delay)) => Command::Rearm {
            task_id,
            generation,
            delay,
        },
        Ok(None) => Command::Finish {
            task_id,
            generation,
        },
        Err(e) => {
            error!(task_id, error = %e, "Task execution failed, retrying later");
            Command::Rearm {
                task_id,
                generation,
                delay: shared.delay(DEFAULT_TASK_INTERVAL_SECS),
            }
        }
    };
    if let Some(tx) = commands.upgrade() {
        let _ = tx.send(command);
    }
}

impl Shared {
    fn delay(&self, interval_seconds: i64) -> Duration {
        Duration::from_secs(interval_seconds.max(0) as u64).max(self.config.min_timer_interval)
    }

    /// One fire of a task. Returns the delay before the next fire, or
    /// `None` when the task must not be scheduled again.
    async fn attempt(&self, task_id: i64) -> Result<Option<Duration>> {
        let Some(task) = self.store.get_task(task_id).await? else {
            debug!(task_id, "Task deleted before its timer fired");
            return Ok(None);
        };
        if task.task_status() != TaskStatus::Running {
            debug!(task_id, status = %task.status, "Task no longer running");
            return Ok(None);
        }
        let delay = self.delay(task.interval_seconds);

        let Ok(_lease) = self.locks.try_acquire(format!("task:{task_id}")) else {
            warn!(task_id, "Previous execution still in flight, skipping this fire");
            return Ok(Some(delay));
        };

        let executed_at = Utc::now();
        let launched = match self.store.get_account(task.account_id).await? {
            Some(account) => self
                .provider
                .launch_instance(&account, &task.create_params)
                .await
                .map_err(Error::from),
            None => Err(Error::not_found("account", task.account_id.to_string())),
        };

        let (attempt, log_status) = match &launched {
            Ok(instance) => {
                info!(task_id, instance_id = %instance.id, "Task created instance");
                (
                    TaskAttempt {
                        success: true,
                        message: "instance created".to_string(),
                        executed_at,
                    },
                    "success",
                )
            }
            Err(e) => {
                warn!(task_id, error = %e, "Task attempt failed");
                (
                    TaskAttempt {
                        success: false,
                        message: format!("create failed: {e}"),
                        executed_at,
                    },
                    "error",
                )
            }
        };

        if !self.store.record_task_attempt(task_id, &attempt).await? {
            return Ok(None);
        }
        self.store
            .append_task_log(task_id, log_status, &attempt.message, executed_at)
            .await?;

        if attempt.success {
            return Ok(None);
        }
        let still_running = self
            .store
            .get_task(task_id)
            .await?
            .is_some_and(|t| t.task_status() == TaskStatus::Running);
        Ok(still_running.then_some(delay))
    }
}

/// Persistent retry scheduler.
///
/// Cheap to clone; clones share the timer table. Dropping the last clone
/// stops the timer actor.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    started: Arc<AtomicBool>,
}

impl TaskScheduler {
    /// Create a stopped scheduler. Must be called within a Tokio runtime.
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CloudProvider>,
        locks: ResourceLocks,
        config: TaskSchedulerConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            provider,
            locks,
            config,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let table = TimerTable {
            slots: HashMap::new(),
            next_generation: 0,
            commands: tx.downgrade(),
            shared: shared.clone(),
        };
        tokio::spawn(table.run(rx));

        Self {
            shared,
            commands: tx,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arm one timer per persisted `running` task.
    ///
    /// Returns the number of timers armed; `0` if already started.
    pub async fn start(&self) -> Result<usize> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Task scheduler already running");
            return Ok(0);
        }

        let tasks = match self.shared.store.list_tasks(Some(TaskStatus::Running)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        for task in &tasks {
            self.schedule(task);
        }
        info!(tasks = tasks.len(), "Task scheduler started");
        Ok(tasks.len())
    }

    /// Cancel every pending timer. Task records keep their status so the
    /// next [`start`](Self::start) re-arms them.
    pub async fn stop(&self) -> usize {
        self.started.store(false, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.send(Command::CancelAll { reply });
        let cancelled = rx.await.unwrap_or(0);
        info!(cancelled, "Task scheduler stopped");
        cancelled
    }

    /// Whether [`start`](Self::start) has been called without a matching stop.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Create a running task and arm its timer.
    ///
    /// Intervals under ten seconds become sixty; launch parameters get
    /// their defaults filled in. The account must exist.
    pub async fn create_task(
        &self,
        account_id: i64,
        create_params: LaunchSpec,
        interval_seconds: i64,
    ) -> Result<TaskRecord> {
        if self.shared.store.get_account(account_id).await?.is_none() {
            return Err(Error::not_found("account", account_id.to_string()));
        }

        let task = self
            .shared
            .store
            .insert_task(&NewTask {
                account_id,
                create_params: create_params.normalized(),
                interval_seconds: normalize_interval(interval_seconds),
                status: TaskStatus::Running,
            })
            .await?;
        info!(
            task_id = task.id,
            account_id,
            interval_seconds = task.interval_seconds,
            "Task created"
        );
        self.schedule(&task);
        Ok(task)
    }

    /// Mark a task running and (re)arm its timer.
    pub async fn start_task(&self, task_id: i64) -> Result<TaskRecord> {
        if !self
            .shared
            .store
            .set_task_status(task_id, TaskStatus::Running)
            .await?
        {
            return Err(Error::not_found("task", task_id.to_string()));
        }
        let task = self.get_task(task_id).await?;
        self.schedule(&task);
        info!(task_id, "Task started");
        Ok(task)
    }

    /// Mark a running task stopped and cancel its timer.
    ///
    /// Stopping a stopped or completed task changes nothing.
    pub async fn stop_task(&self, task_id: i64) -> Result<()> {
        let task = self.get_task(task_id).await?;
        if task.task_status() == TaskStatus::Running {
            self.shared
                .store
                .set_task_status(task_id, TaskStatus::Stopped)
                .await?;
            info!(task_id, "Task stopped");
        }
        self.cancel(task_id).await;
        Ok(())
    }

    /// Cancel the timer, then delete the task and its logs.
    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        self.cancel(task_id).await;
        if !self.shared.store.delete_task(task_id).await? {
            return Err(Error::not_found("task", task_id.to_string()));
        }
        info!(task_id, "Task deleted");
        Ok(())
    }

    /// Look up a task.
    pub async fn get_task(&self, task_id: i64) -> Result<TaskRecord> {
        self.shared
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found("task", task_id.to_string()))
    }

    /// Tasks ordered by id, optionally filtered by status.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        self.shared.store.list_tasks(status).await
    }

    /// One page of a task's log, newest first, plus the total entry count.
    /// Pages start at 1.
    pub async fn task_logs(
        &self,
        task_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<TaskLogEntry>, i64)> {
        let page_size = page_size.max(1);
        let offset = (page.max(1) - 1) * page_size;
        let store = &self.shared.store;
        let total = store.count_task_logs(task_id).await?;
        let entries = store.list_task_logs(task_id, page_size, offset).await?;
        Ok((entries, total))
    }

    /// Remove a task's log. Returns the number of removed entries.
    pub async fn clear_task_logs(&self, task_id: i64) -> Result<u64> {
        self.shared.store.clear_task_logs(task_id).await
    }

    /// Ids of tasks with an armed timer, ascending.
    pub async fn active_timers(&self) -> Vec<i64> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ActiveTimers { reply });
        rx.await.unwrap_or_default()
    }

    fn schedule(&self, task: &TaskRecord) {
        self.send(Command::Schedule {
            task_id: task.id,
            delay: self.shared.delay(task.interval_seconds),
        });
    }

    async fn cancel(&self, task_id: i64) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { task_id, reply });
        rx.await.unwrap_or(false)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            error!("Task timer table is gone");
        }
    }
}
