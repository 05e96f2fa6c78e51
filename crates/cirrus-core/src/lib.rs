// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cirrus Core - Compute Orchestration
//!
//! This crate orchestrates long-running operations against a cloud compute
//! provider on behalf of many accounts:
//!
//! - **Rescue workflow**: rebuild an instance's boot volume from a backup of
//!   itself, in nine sequential steps with progress events.
//! - **Bandwidth workflow**: route an instance through a NAT gateway and a
//!   network load balancer (enable), and undo it (disable).
//! - **Cache refresher**: a ticker that refreshes per-account inventory
//!   snapshots with bounded concurrency once they are stale.
//! - **Task scheduler**: persistent retry timers that keep attempting an
//!   instance launch until one succeeds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          CirrusRuntime                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │    Cache     │  │     Task     │  │  Rescue / Bandwidth    │  │
//! │  │  Refresher   │  │  Scheduler   │  │  workflows (run_steps) │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! │          │                │        ResourceLocks │               │
//! └──────────┼────────────────┼──────────────────────┼───────────────┘
//!            │                │                      │
//!            ▼                ▼                      ▼
//!   ┌──────────────────────────────┐     ┌────────────────────────┐
//!   │      Store (SQLite/memory)   │     │     CloudProvider      │
//!   │ accounts, cache, tasks, logs │     │  (remote API / mock)   │
//!   └──────────────────────────────┘     └────────────────────────┘
//! ```
//!
//! Workflow steps run strictly one after another within a run; runs for
//! different instances may overlap, while runs for the same instance are
//! rejected with [`Error::ResourceBusy`].
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CIRRUS_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `CIRRUS_CACHE_TICK_SECS` | No | `60` | Cache scheduler tick period |
//! | `CIRRUS_CACHE_MAX_CONCURRENCY` | No | `5` | Accounts refreshed at once |
//! | `CIRRUS_CACHE_JITTER_MAX_SECS` | No | `10` | Upper bound of refresh jitter |
//! | `CIRRUS_TASK_MIN_INTERVAL_SECS` | No | `10` | Floor for task timers |
//! | `CIRRUS_POLL_INTERVAL_SECS` | No | `2` | Workflow poll interval |
//! | `CIRRUS_POLL_MAX_ATTEMPTS` | No | `450` | Workflow poll bound |

#![deny(missing_docs)]

/// Inventory cache refresh scheduler.
pub mod cache_refresher;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types with stable error codes.
pub mod error;

/// Per-resource exclusive leases.
pub mod lease;

/// Cloud provider trait, resource types and the in-process mock.
pub mod provider;

/// Embeddable runtime wiring schedulers and workflows together.
pub mod runtime;

/// Persistence for accounts, cache snapshots, tasks and settings.
pub mod store;

/// Persistent instance-creation retry scheduler.
pub mod task_scheduler;

/// VNIC traffic summaries.
pub mod traffic;

/// Step engine, bounded waits and the rescue/bandwidth workflows.
pub mod workflow;

pub use error::{Error, Result};
pub use runtime::CirrusRuntime;
