// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded polling for remote lifecycle convergence.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::{LifecycleState, ProviderError, ProviderResult};

/// Bounds for a polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between polls.
    pub interval: Duration,
    /// Maximum number of polls (including the first).
    pub max_attempts: u32,
    /// Consecutive poll errors tolerated before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 450,
            max_consecutive_errors: 5,
        }
    }
}

impl PollPolicy {
    /// Policy with a fixed interval and attempt bound.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            ..Self::default()
        }
    }
}

/// Poll until `poll` yields `Some`, the attempt bound is hit, or polling
/// fails `max_consecutive_errors` times in a row.
///
/// The first poll happens immediately; subsequent polls are spaced by
/// `policy.interval`. Exhausting the attempts yields [`Error::PollTimeout`],
/// persistent poll failures yield the last [`Error::RemoteApi`].
pub async fn wait_until<T, F, Fut>(
    what: &str,
    target: &str,
    policy: PollPolicy,
    mut poll: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Option<T>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut consecutive_errors = 0u32;

    for attempt in 1..=max_attempts {
        match poll().await {
            Ok(Some(value)) => {
                debug!(what, target, attempt, "Wait satisfied");
                return Ok(value);
            }
            Ok(None) => consecutive_errors = 0,
            Err(e) => {
                consecutive_errors += 1;
                warn!(what, attempt, consecutive_errors, error = %e, "Poll failed");
                if consecutive_errors >= policy.max_consecutive_errors.max(1) {
                    return Err(Error::RemoteApi(e));
                }
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Error::PollTimeout {
        what: what.to_string(),
        target: target.to_string(),
        attempts: max_attempts,
    })
}

/// Wait for a resource to reach `target`.
///
/// A resource that lands in `FAILED` or `FAULTY` while waiting for another
/// state fails the wait immediately.
pub async fn wait_for_state<F, Fut>(
    what: &str,
    target: LifecycleState,
    policy: PollPolicy,
    mut poll: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<LifecycleState>>,
{
    let reached = wait_until(what, target.as_str(), policy, || {
        let fut = poll();
        async move {
            let state = fut.await?;
            let settled = state == target
                || matches!(state, LifecycleState::Failed | LifecycleState::Faulty);
            Ok(settled.then_some(state))
        }
    })
    .await?;

    if reached != target {
        return Err(Error::RemoteApi(ProviderError::api(
            format!("wait for {what}"),
            format!("{what} entered {reached} while waiting for {target}"),
        )));
    }
    Ok(())
}

/// Treat a vanished resource as having reached `gone`.
///
/// Deletion waits use this so a 404 counts as `TERMINATED`/`DELETED`.
pub fn missing_as(
    result: ProviderResult<LifecycleState>,
    gone: LifecycleState,
) -> ProviderResult<LifecycleState> {
    match result {
        Err(ProviderError::NotFound { .. }) => Ok(gone),
        other => other,
    }
}
