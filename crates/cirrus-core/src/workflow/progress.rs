// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress reporting for workflow runs.
//!
//! Delivery is best-effort and at-most-once. A sink must never block the
//! emitting step; buffered sinks drop the oldest events under backpressure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Status carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The step has started.
    Running,
    /// The step finished successfully.
    Completed,
    /// A tolerant step failed; the run continues.
    Warning,
    /// The step had nothing to do.
    Skipped,
    /// The step failed; the run is aborted.
    Failed,
}

impl StepStatus {
    /// Whether this status ends the step.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// 1-based step index.
    pub step_index: usize,
    /// Number of steps in the run.
    pub total_steps: usize,
    /// Step status.
    pub status: StepStatus,
    /// Human-readable message.
    pub message: String,
    /// Result fields reported by the step.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub result: Map<String, Value>,
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    /// Deliver an event. Must not block.
    fn emit(&self, event: ProgressEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl ProgressSink for DiscardSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Writes events to the tracing log.
#[derive(Debug, Clone)]
pub struct TracingSink {
    workflow: String,
}

impl TracingSink {
    /// Create a sink that tags events with the workflow name.
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
        }
    }
}

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event.status {
            StepStatus::Warning | StepStatus::Failed => warn!(
                workflow = %self.workflow,
                step = event.step_index,
                total = event.total_steps,
                status = ?event.status,
                "{}",
                event.message
            ),
            _ => info!(
                workflow = %self.workflow,
                step = event.step_index,
                total = event.total_steps,
                status = ?event.status,
                "{}",
                event.message
            ),
        }
    }
}

/// Push events to every subscriber of a broadcast channel.
///
/// Lagging receivers lose the oldest events; with no receivers attached the
/// event is discarded.
impl ProgressSink for broadcast::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}
