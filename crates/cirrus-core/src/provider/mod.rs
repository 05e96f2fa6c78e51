// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider module - remote cloud API backends.

pub mod mock;
mod traits;

pub use mock::{MockProvider, SeededInstance};
pub use traits::*;
