// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for cirrus-core.

use thiserror::Error;

use crate::provider::ProviderError;

/// Orchestration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying schema migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A referenced account, task or remote resource does not exist.
    #[error("{kind} not found: {id}")]
    ConfigNotFound {
        /// What kind of record was looked up (e.g. "account", "task").
        kind: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// A precondition of the requested operation is not met.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A call to the cloud provider failed.
    #[error("Remote API error: {0}")]
    RemoteApi(#[from] ProviderError),

    /// A bounded wait ran out of attempts before the target state was reached.
    #[error("Timed out waiting for {what} to become {target} after {attempts} attempts")]
    PollTimeout {
        /// The resource being waited on.
        what: String,
        /// The lifecycle state that was expected.
        target: String,
        /// Number of polls performed.
        attempts: u32,
    },

    /// Another operation currently holds the lease on this resource.
    #[error("Resource '{0}' is busy with another operation")]
    ResourceBusy(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a missing record of the given kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::ConfigNotFound {
            kind,
            id: id.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) | Self::Migrate(_) => "DATABASE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RemoteApi(_) => "REMOTE_API_ERROR",
            Self::PollTimeout { .. } => "POLL_TIMEOUT",
            Self::ResourceBusy(_) => "RESOURCE_BUSY",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type using the cirrus Error.
pub type Result<T> = std::result::Result<T, Error>;
