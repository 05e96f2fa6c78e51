// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boot-volume rebuild ("rescue").
//!
//! Rebuilds an instance's boot volume by round-tripping it through a full
//! backup: stop, back up, detach, delete, restore at a fixed size, attach,
//! optionally drop the backup, start. Backup completion is awaited after the
//! detach so the two overlap.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::engine::{Step, StepOutput, WorkflowOutcome, run_steps};
use super::progress::ProgressSink;
use super::wait::{PollPolicy, missing_as, wait_for_state};
use super::{WorkflowConfig, lookup};
use crate::error::{Error, Result};
use crate::lease::ResourceLocks;
use crate::provider::{
    BackupType, CloudProvider, CreateBootVolume, Instance, InstanceAction, LifecycleState,
    ProviderResult,
};
use crate::store::Account;

const BACKUP_NAME: &str = "Old-BootVolume-Backup";
const ATTACHMENT_NAME: &str = "New-Boot-Volume";

/// Input of a rescue run.
#[derive(Debug, Clone)]
pub struct RescueRequest {
    /// Account owning the instance.
    pub account: Account,
    /// Instance to rescue.
    pub instance_id: String,
    /// Keep the intermediate backup instead of deleting it.
    pub keep_backup: bool,
}

/// Runs the nine-step boot-volume rebuild.
#[derive(Clone)]
pub struct RescueWorkflow {
    provider: Arc<dyn CloudProvider>,
    locks: ResourceLocks,
    config: WorkflowConfig,
}

impl RescueWorkflow {
    /// Create a workflow runner.
    pub fn new(provider: Arc<dyn CloudProvider>, locks: ResourceLocks, config: WorkflowConfig) -> Self {
        Self {
            provider,
            locks,
            config,
        }
    }

    /// Rescue one instance.
    ///
    /// The instance id is leased for the whole run. Errors before the first
    /// step (busy instance, unknown instance, no attached boot volume) are
    /// returned as `Err`; step failures are reported in the outcome.
    pub async fn run(
        &self,
        request: RescueRequest,
        sink: &dyn ProgressSink,
    ) -> Result<WorkflowOutcome> {
        let _lease = self.locks.try_acquire(request.instance_id.as_str())?;
        let run_id = Uuid::new_v4();
        let account = &request.account;

        let instance = lookup(
            self.provider.get_instance(account, &request.instance_id).await,
            "instance",
            &request.instance_id,
        )?;
        let attachment = self
            .provider
            .list_boot_volume_attachments(account, &instance.id)
            .await?
            .into_iter()
            .find(|a| a.state == LifecycleState::Attached)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "instance {} has no attached boot volume",
                    instance.id
                ))
            })?;

        info!(
            %run_id,
            instance_id = %instance.id,
            boot_volume_id = %attachment.boot_volume_id,
            keep_backup = request.keep_backup,
            "Starting rescue"
        );

        let mut ctx = RescueContext {
            provider: self.provider.clone(),
            account: request.account.clone(),
            policy: self.config.poll_policy(),
            config: self.config.clone(),
            keep_backup: request.keep_backup,
            instance,
            boot_volume_id: attachment.boot_volume_id,
            attachment_id: attachment.id,
            backup_id: None,
            new_volume_id: None,
        };

        let outcome = run_steps("rescue", &RESCUE_STEPS, &mut ctx, sink).await;
        info!(%run_id, completed = outcome.is_completed(), "Rescue finished");
        Ok(outcome)
    }
}

struct RescueContext {
    provider: Arc<dyn CloudProvider>,
    account: Account,
    policy: PollPolicy,
    config: WorkflowConfig,
    keep_backup: bool,
    instance: Instance,
    boot_volume_id: String,
    attachment_id: String,
    backup_id: Option<String>,
    new_volume_id: Option<String>,
}

impl RescueContext {
    fn backup_id(&self) -> Result<&str> {
        self.backup_id
            .as_deref()
            .ok_or_else(|| Error::Other("no backup was created".to_string()))
    }

    fn new_volume_id(&self) -> Result<&str> {
        self.new_volume_id
            .as_deref()
            .ok_or_else(|| Error::Other("no replacement boot volume was created".to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum RescueStep {
    StopInstance,
    BackupBootVolume,
    DetachBootVolume,
    AwaitBackup,
    DeleteBootVolume,
    RestoreBootVolume,
    AttachBootVolume,
    DeleteBackup,
    StartInstance,
}

const RESCUE_STEPS: [RescueStep; 9] = [
    RescueStep::StopInstance,
    RescueStep::BackupBootVolume,
    RescueStep::DetachBootVolume,
    RescueStep::AwaitBackup,
    RescueStep::DeleteBootVolume,
    RescueStep::RestoreBootVolume,
    RescueStep::AttachBootVolume,
    RescueStep::DeleteBackup,
    RescueStep::StartInstance,
];

async fn instance_state(
    provider: &dyn CloudProvider,
    account: &Account,
    instance_id: &str,
) -> ProviderResult<LifecycleState> {
    provider
        .get_instance(account, instance_id)
        .await
        .map(|i| i.state)
}

async fn volume_state(
    provider: &dyn CloudProvider,
    account: &Account,
    boot_volume_id: &str,
) -> ProviderResult<LifecycleState> {
    provider
        .get_boot_volume(account, boot_volume_id)
        .await
        .map(|v| v.state)
}

async fn backup_state(
    provider: &dyn CloudProvider,
    account: &Account,
    backup_id: &str,
) -> ProviderResult<LifecycleState> {
    provider
        .get_boot_volume_backup(account, backup_id)
        .await
        .map(|b| b.state)
}

async fn attachment_state(
    provider: &dyn CloudProvider,
    account: &Account,
    attachment_id: &str,
) -> ProviderResult<LifecycleState> {
    provider
        .get_boot_volume_attachment(account, attachment_id)
        .await
        .map(|a| a.state)
}

#[async_trait]
impl Step<RescueContext> for RescueStep {
    fn label(&self) -> &'static str {
        match self {
            Self::StopInstance => "Stopping instance",
            Self::BackupBootVolume => "Backing up boot volume",
            Self::DetachBootVolume => "Detaching boot volume",
            Self::AwaitBackup => "Waiting for backup",
            Self::DeleteBootVolume => "Deleting original boot volume",
            Self::RestoreBootVolume => "Restoring boot volume from backup",
            Self::AttachBootVolume => "Attaching new boot volume",
            Self::DeleteBackup => "Deleting backup",
            Self::StartInstance => "Starting instance",
        }
    }

    fn is_tolerant(&self) -> bool {
        matches!(self, Self::DeleteBackup)
    }

    async fn execute(&self, ctx: &mut RescueContext) -> Result<StepOutput> {
        let provider = ctx.provider.as_ref();
        let account = &ctx.account;
        let policy = ctx.policy;
        let instance_id = ctx.instance.id.as_str();

        match self {
            Self::StopInstance => {
                if ctx.instance.state == LifecycleState::Stopped {
                    return Ok(StepOutput::skipped("Instance already stopped"));
                }
                provider
                    .instance_action(account, instance_id, InstanceAction::Stop)
                    .await?;
                wait_for_state("instance", LifecycleState::Stopped, policy, || {
                    instance_state(provider, account, instance_id)
                })
                .await?;
                Ok(StepOutput::done("Instance stopped"))
            }

            Self::BackupBootVolume => {
                let volume_id = ctx.boot_volume_id.as_str();
                wait_for_state("boot volume", LifecycleState::Available, policy, || {
                    volume_state(provider, account, volume_id)
                })
                .await?;
                let backup = provider
                    .create_boot_volume_backup(account, volume_id, BACKUP_NAME, BackupType::Full)
                    .await?;
                tokio::time::sleep(ctx.config.backup_settle_delay).await;

                let message = format!("Backup {} requested", backup.id);
                let output = StepOutput::done(message).with("backupId", backup.id.clone());
                ctx.backup_id = Some(backup.id);
                Ok(output)
            }

            Self::DetachBootVolume => {
                let attachment_id = ctx.attachment_id.as_str();
                provider.detach_boot_volume(account, attachment_id).await?;
                wait_for_state(
                    "boot volume attachment",
                    LifecycleState::Detached,
                    policy,
                    || attachment_state(provider, account, attachment_id),
                )
                .await?;
                Ok(StepOutput::done("Boot volume detached"))
            }

            Self::AwaitBackup => {
                let backup_id = ctx.backup_id()?;
                wait_for_state("backup", LifecycleState::Available, policy, || {
                    backup_state(provider, account, backup_id)
                })
                .await?;
                Ok(StepOutput::done("Backup available"))
            }

            Self::DeleteBootVolume => {
                let volume_id = ctx.boot_volume_id.as_str();
                provider.delete_boot_volume(account, volume_id).await?;
                wait_for_state("boot volume", LifecycleState::Terminated, policy, || async move {
                    missing_as(
                        volume_state(provider, account, volume_id).await,
                        LifecycleState::Terminated,
                    )
                })
                .await?;
                Ok(StepOutput::done("Original boot volume deleted"))
            }

            Self::RestoreBootVolume => {
                let size_gbs = ctx.config.restored_volume_size_gbs;
                let details = CreateBootVolume {
                    compartment_id: ctx.instance.compartment_id.clone(),
                    availability_domain: ctx.instance.availability_domain.clone(),
                    display_name: format!("Restored-Boot-Volume-{size_gbs}GB"),
                    size_gbs,
                    source_backup_id: ctx.backup_id()?.to_string(),
                };
                let volume = provider.create_boot_volume(account, &details).await?;
                let volume_id = volume.id.as_str();
                wait_for_state("boot volume", LifecycleState::Available, policy, || {
                    volume_state(provider, account, volume_id)
                })
                .await?;

                let output = StepOutput::done(format!("Created {size_gbs}GB boot volume"))
                    .with("bootVolumeId", volume.id.clone());
                ctx.new_volume_id = Some(volume.id);
                Ok(output)
            }

            Self::AttachBootVolume => {
                let volume_id = ctx.new_volume_id()?;
                let attachment = provider
                    .attach_boot_volume(account, instance_id, volume_id, ATTACHMENT_NAME)
                    .await?;
                let attachment_id = attachment.id.as_str();
                wait_for_state(
                    "boot volume attachment",
                    LifecycleState::Attached,
                    policy,
                    || attachment_state(provider, account, attachment_id),
                )
                .await?;
                Ok(StepOutput::done("New boot volume attached"))
            }

            Self::DeleteBackup => {
                if ctx.keep_backup {
                    return Ok(StepOutput::skipped("Backup retained"));
                }
                let backup_id = ctx.backup_id()?;
                provider.delete_boot_volume_backup(account, backup_id).await?;
                Ok(StepOutput::done("Backup deleted"))
            }

            Self::StartInstance => {
                start_instance(provider, account, instance_id, &ctx.config).await?;

                match resolve_public_ip(provider, account, instance_id).await {
                    Ok(Some(ip)) => Ok(StepOutput::done(format!("Instance running at {ip}"))
                        .with("publicIp", ip)),
                    Ok(None) => Ok(StepOutput::done("Instance running without a public IP")),
                    Err(e) => {
                        warn!(instance_id, error = %e, "Could not resolve public IP");
                        Ok(StepOutput::done("Instance running; public IP unavailable"))
                    }
                }
            }
        }
    }
}

/// Re-issue start while polling for `RUNNING`, up to `start_attempts` times.
async fn start_instance(
    provider: &dyn CloudProvider,
    account: &Account,
    instance_id: &str,
    config: &WorkflowConfig,
) -> Result<()> {
    let attempts = config.start_attempts.max(1);

    for attempt in 1..=attempts {
        match provider.get_instance(account, instance_id).await {
            Ok(instance) if instance.state == LifecycleState::Running => return Ok(()),
            Ok(instance) if instance.state == LifecycleState::Stopped => {
                if let Err(e) = provider
                    .instance_action(account, instance_id, InstanceAction::Start)
                    .await
                {
                    warn!(instance_id, attempt, error = %e, "Start request failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(instance_id, attempt, error = %e, "Instance poll failed"),
        }

        if attempt < attempts {
            tokio::time::sleep(config.start_interval).await;
        }
    }

    Err(Error::PollTimeout {
        what: format!("instance {instance_id}"),
        target: LifecycleState::Running.as_str().to_string(),
        attempts,
    })
}

async fn resolve_public_ip(
    provider: &dyn CloudProvider,
    account: &Account,
    instance_id: &str,
) -> ProviderResult<Option<String>> {
    let vnics = provider.list_instance_vnics(account, instance_id).await?;
    Ok(vnics.into_iter().next().and_then(|v| v.public_ip))
}
