// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-step workflows against the cloud provider.
//!
//! A workflow is an ordered list of [`Step`]s run by [`run_steps`]. Steps
//! that mutate a remote resource wait for convergence with the bounded
//! [`wait_until`]/[`wait_for_state`] primitives and report progress to a
//! [`ProgressSink`].

pub mod bandwidth;
mod engine;
pub mod progress;
pub mod rescue;
pub mod wait;

use std::time::Duration;

use crate::error::{Error, Result};
use crate::provider::ProviderResult;

pub use bandwidth::{BandwidthWorkflow, DisableBandwidthRequest, EnableBandwidthRequest};
pub use engine::{Step, StepOutput, StepWarning, WorkflowOutcome, run_steps};
pub use progress::{DiscardSink, ProgressEvent, ProgressSink, StepStatus, TracingSink};
pub use rescue::{RescueRequest, RescueWorkflow};
pub use wait::{PollPolicy, wait_for_state, wait_until};

/// Workflow timing and sizing settings.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Delay between lifecycle polls
    pub poll_interval: Duration,
    /// Maximum lifecycle polls per wait
    pub max_poll_attempts: u32,
    /// Consecutive poll errors tolerated per wait
    pub max_poll_errors: u32,
    /// Start attempts in the final rescue step
    pub start_attempts: u32,
    /// Delay between start attempts
    pub start_interval: Duration,
    /// Pause after requesting the backup, before detaching
    pub backup_settle_delay: Duration,
    /// Size of the rebuilt boot volume in GB
    pub restored_volume_size_gbs: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 450,
            max_poll_errors: 5,
            start_attempts: 30,
            start_interval: Duration::from_secs(3),
            backup_settle_delay: Duration::from_secs(3),
            restored_volume_size_gbs: 47,
        }
    }
}

impl WorkflowConfig {
    /// Polling bounds for lifecycle waits.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_attempts: self.max_poll_attempts,
            max_consecutive_errors: self.max_poll_errors,
        }
    }
}

/// Map a provider miss on a referenced resource to [`Error::ConfigNotFound`].
pub(crate) fn lookup<T>(result: ProviderResult<T>, kind: &'static str, id: &str) -> Result<T> {
    result.map_err(|e| {
        if e.is_not_found() {
            Error::not_found(kind, id)
        } else {
            Error::RemoteApi(e)
        }
    })
}
