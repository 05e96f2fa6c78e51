// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sequential step runner with a fail-fast-except-tolerant policy.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::progress::{ProgressEvent, ProgressSink, StepStatus};
use crate::error::Result;

/// What a step reports when it finishes without error.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// The step did its work.
    Completed {
        /// Human-readable message.
        message: String,
        /// Fields merged into the run result.
        result: Map<String, Value>,
    },
    /// The step had nothing to do.
    Skipped {
        /// Why the step was skipped.
        message: String,
    },
}

impl StepOutput {
    /// A completed step without result fields.
    pub fn done(message: impl Into<String>) -> Self {
        Self::Completed {
            message: message.into(),
            result: Map::new(),
        }
    }

    /// A skipped step.
    pub fn skipped(message: impl Into<String>) -> Self {
        Self::Skipped {
            message: message.into(),
        }
    }

    /// Attach a result field to a completed step.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Self::Completed { result, .. } = &mut self {
            result.insert(key.to_string(), value.into());
        }
        self
    }
}

/// One unit of work in a workflow.
#[async_trait]
pub trait Step<C: Send>: Send + Sync {
    /// Short label used in progress messages.
    fn label(&self) -> &'static str;

    /// Whether a failure is downgraded to a warning.
    fn is_tolerant(&self) -> bool {
        false
    }

    /// Run the step against the shared run context.
    async fn execute(&self, ctx: &mut C) -> Result<StepOutput>;
}

/// A tolerant step's failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepWarning {
    /// 1-based step index.
    pub step_index: usize,
    /// Step label.
    pub step: &'static str,
    /// Error message.
    pub message: String,
}

/// Terminal result of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkflowOutcome {
    /// Every step completed, was skipped, or failed tolerantly.
    Completed {
        /// Merged result fields of all steps.
        result: Map<String, Value>,
        /// Failures of tolerant steps.
        warnings: Vec<StepWarning>,
    },
    /// A non-tolerant step failed and the run was aborted.
    #[serde(rename_all = "camelCase")]
    Failed {
        /// 1-based index of the failing step.
        step_index: usize,
        /// Label of the failing step.
        step: &'static str,
        /// Error message.
        message: String,
        /// Stable error code.
        error_code: &'static str,
    },
}

impl WorkflowOutcome {
    /// Whether the run reached its last step.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// A string result field of a completed run.
    pub fn result_str(&self, key: &str) -> Option<&str> {
        match self {
            Self::Completed { result, .. } => result.get(key).and_then(Value::as_str),
            Self::Failed { .. } => None,
        }
    }
}

/// Run `steps` in order against `ctx`, reporting to `sink`.
///
/// Each step emits a `running` event before it starts and exactly one
/// terminal event afterwards. A failing non-tolerant step aborts the run.
pub async fn run_steps<C, S>(
    workflow: &str,
    steps: &[S],
    ctx: &mut C,
    sink: &dyn ProgressSink,
) -> WorkflowOutcome
where
    C: Send,
    S: Step<C>,
{
    let total_steps = steps.len();
    let mut result = Map::new();
    let mut warnings = Vec::new();

    let emit = |step_index: usize, status: StepStatus, message: String, fields: Map<String, Value>| {
        sink.emit(ProgressEvent {
            step_index,
            total_steps,
            status,
            message,
            result: fields,
        });
    };

    info!(workflow, total_steps, "Workflow started");

    for (i, step) in steps.iter().enumerate() {
        let step_index = i + 1;
        let label = step.label();
        emit(step_index, StepStatus::Running, label.to_string(), Map::new());

        match step.execute(ctx).await {
            Ok(StepOutput::Completed {
                message,
                result: fields,
            }) => {
                info!(workflow, step = step_index, label, "Step completed");
                result.extend(fields.clone());
                emit(step_index, StepStatus::Completed, message, fields);
            }
            Ok(StepOutput::Skipped { message }) => {
                info!(workflow, step = step_index, label, reason = %message, "Step skipped");
                emit(step_index, StepStatus::Skipped, message, Map::new());
            }
            Err(e) if step.is_tolerant() => {
                warn!(workflow, step = step_index, label, error = %e, "Tolerant step failed, continuing");
                let message = e.to_string();
                emit(step_index, StepStatus::Warning, message.clone(), Map::new());
                warnings.push(StepWarning {
                    step_index,
                    step: label,
                    message,
                });
            }
            Err(e) => {
                error!(workflow, step = step_index, label, error = %e, "Step failed, aborting workflow");
                let message = e.to_string();
                emit(step_index, StepStatus::Failed, message.clone(), Map::new());
                return WorkflowOutcome::Failed {
                    step_index,
                    step: label,
                    message,
                    error_code: e.error_code(),
                };
            }
        }
    }

    info!(workflow, warnings = warnings.len(), "Workflow completed");
    WorkflowOutcome::Completed { result, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Trace {
        ran: Vec<&'static str>,
    }

    enum TestStep {
        Ok(&'static str),
        Skip(&'static str),
        Fail(&'static str),
        FailTolerant(&'static str),
    }

    #[async_trait]
    impl Step<Trace> for TestStep {
        fn label(&self) -> &'static str {
            match self {
                Self::Ok(l) | Self::Skip(l) | Self::Fail(l) | Self::FailTolerant(l) => l,
            }
        }

        fn is_tolerant(&self) -> bool {
            matches!(self, Self::FailTolerant(_))
        }

        async fn execute(&self, ctx: &mut Trace) -> Result<StepOutput> {
            ctx.ran.push(self.label());
            match self {
                Self::Ok(l) => Ok(StepOutput::done(format!("{l} done")).with(l, true)),
                Self::Skip(_) => Ok(StepOutput::skipped("nothing to do")),
                Self::Fail(_) | Self::FailTolerant(_) => Err(Error::Other("boom".to_string())),
            }
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_events_are_sequential() {
        let (tx, mut rx) = broadcast::channel(64);
        let steps = [TestStep::Ok("a"), TestStep::Skip("b"), TestStep::Ok("c")];
        let mut trace = Trace::default();

        let outcome = run_steps("test", &steps, &mut trace, &tx).await;
        assert!(outcome.is_completed());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 6);
        for (i, pair) in events.chunks(2).enumerate() {
            assert_eq!(pair[0].step_index, i + 1);
            assert_eq!(pair[0].status, StepStatus::Running);
            assert_eq!(pair[1].step_index, i + 1);
            assert!(pair[1].status.is_terminal());
        }
        assert_eq!(events[3].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_failure_aborts_run() {
        let (tx, mut rx) = broadcast::channel(64);
        let steps = [TestStep::Ok("a"), TestStep::Fail("b"), TestStep::Ok("c")];
        let mut trace = Trace::default();

        let outcome = run_steps("test", &steps, &mut trace, &tx).await;

        assert_eq!(
            outcome,
            WorkflowOutcome::Failed {
                step_index: 2,
                step: "b",
                message: "boom".to_string(),
                error_code: "INTERNAL_ERROR",
            }
        );
        assert_eq!(trace.ran, vec!["a", "b"]);
        let last = drain(&mut rx).pop().unwrap();
        assert_eq!(last.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_tolerant_failure_becomes_warning() {
        let (tx, mut rx) = broadcast::channel(64);
        let steps = [
            TestStep::Ok("a"),
            TestStep::FailTolerant("b"),
            TestStep::Ok("c"),
        ];
        let mut trace = Trace::default();

        let outcome = run_steps("test", &steps, &mut trace, &tx).await;

        match &outcome {
            WorkflowOutcome::Completed { result, warnings } => {
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].step_index, 2);
                assert_eq!(result.get("c"), Some(&Value::Bool(true)));
            }
            other => panic!("expected completed outcome, got {other:?}"),
        }
        assert_eq!(trace.ran, vec!["a", "b", "c"]);
        let statuses: Vec<StepStatus> = drain(&mut rx).into_iter().map(|e| e.status).collect();
        assert!(statuses.contains(&StepStatus::Warning));
    }
}
