// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-resource mutual exclusion.
//!
//! A mutating workflow or task execution leases the id of the resource it
//! touches for its whole duration. A second operation on the same id fails
//! fast with [`Error::ResourceBusy`] instead of interleaving.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{Error, Result};

/// Set of resource ids currently leased in this process.
#[derive(Debug, Clone, Default)]
pub struct ResourceLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ResourceLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease `resource_id`, or fail if another operation holds it.
    pub fn try_acquire(&self, resource_id: impl Into<String>) -> Result<ResourceLease> {
        let resource_id = resource_id.into();
        if !self.table().insert(resource_id.clone()) {
            return Err(Error::ResourceBusy(resource_id));
        }
        debug!(resource_id = %resource_id, "Resource leased");
        Ok(ResourceLease {
            locks: self.clone(),
            resource_id,
        })
    }

    /// Whether `resource_id` is currently leased.
    pub fn is_held(&self, resource_id: &str) -> bool {
        self.table().contains(resource_id)
    }

    fn table(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked mid-insert.
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held lease; released on drop.
#[derive(Debug)]
pub struct ResourceLease {
    locks: ResourceLocks,
    resource_id: String,
}

impl ResourceLease {
    /// The leased id.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.locks.table().remove(&self.resource_id);
        debug!(resource_id = %self.resource_id, "Resource lease released");
    }
}
