// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::cache_refresher::CacheRefresherConfig;
use crate::task_scheduler::TaskSchedulerConfig;
use crate::workflow::WorkflowConfig;

/// Cirrus configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL for the store
    pub database_url: String,
    /// Cache refresh scheduler settings
    pub cache: CacheRefresherConfig,
    /// Task retry scheduler settings
    pub tasks: TaskSchedulerConfig,
    /// Polling bounds shared by the rescue and bandwidth workflows
    pub workflow: WorkflowConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CIRRUS_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `CIRRUS_CACHE_TICK_SECS`: cache scheduler tick period (default: 60)
    /// - `CIRRUS_CACHE_MAX_CONCURRENCY`: concurrent refresh units (default: 5)
    /// - `CIRRUS_CACHE_JITTER_MAX_SECS`: upper bound of refresh jitter (default: 10)
    /// - `CIRRUS_TASK_MIN_INTERVAL_SECS`: floor for task timers (default: 10)
    /// - `CIRRUS_POLL_INTERVAL_SECS`: workflow poll interval (default: 2)
    /// - `CIRRUS_POLL_MAX_ATTEMPTS`: workflow poll bound (default: 450)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CIRRUS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CIRRUS_DATABASE_URL"))?;

        let tick_secs: u64 = parse_var("CIRRUS_CACHE_TICK_SECS", 60, "must be a positive integer")?;
        let max_concurrency: usize =
            parse_var("CIRRUS_CACHE_MAX_CONCURRENCY", 5, "must be a positive integer")?;
        let jitter_max_secs: u64 =
            parse_var("CIRRUS_CACHE_JITTER_MAX_SECS", 10, "must be a non-negative integer")?;
        let min_interval_secs: u64 =
            parse_var("CIRRUS_TASK_MIN_INTERVAL_SECS", 10, "must be a positive integer")?;
        let poll_interval_secs: u64 =
            parse_var("CIRRUS_POLL_INTERVAL_SECS", 2, "must be a positive integer")?;
        let poll_max_attempts: u32 =
            parse_var("CIRRUS_POLL_MAX_ATTEMPTS", 450, "must be a positive integer")?;

        if tick_secs == 0 {
            return Err(ConfigError::Invalid(
                "CIRRUS_CACHE_TICK_SECS",
                "must be a positive integer",
            ));
        }
        if max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "CIRRUS_CACHE_MAX_CONCURRENCY",
                "must be a positive integer",
            ));
        }
        if poll_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "CIRRUS_POLL_MAX_ATTEMPTS",
                "must be a positive integer",
            ));
        }

        let cache = CacheRefresherConfig {
            tick_interval: Duration::from_secs(tick_secs),
            max_concurrency,
            jitter_min: Duration::from_secs(jitter_max_secs.min(1)),
            jitter_max: Duration::from_secs(jitter_max_secs),
            ..CacheRefresherConfig::default()
        };

        let tasks = TaskSchedulerConfig {
            min_timer_interval: Duration::from_secs(min_interval_secs),
        };

        let workflow = WorkflowConfig {
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_poll_attempts: poll_max_attempts,
            ..WorkflowConfig::default()
        };

        Ok(Self {
            database_url,
            cache,
            tasks,
            workflow,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: T,
    message: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, message)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    const OPTIONAL: [&str; 6] = [
        "CIRRUS_CACHE_TICK_SECS",
        "CIRRUS_CACHE_MAX_CONCURRENCY",
        "CIRRUS_CACHE_JITTER_MAX_SECS",
        "CIRRUS_TASK_MIN_INTERVAL_SECS",
        "CIRRUS_POLL_INTERVAL_SECS",
        "CIRRUS_POLL_MAX_ATTEMPTS",
    ];

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CIRRUS_DATABASE_URL", "sqlite::memory:");
        for key in OPTIONAL {
            guard.remove(key);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.cache.tick_interval, Duration::from_secs(60));
        assert_eq!(config.cache.max_concurrency, 5);
        assert_eq!(config.cache.jitter_min, Duration::from_secs(1));
        assert_eq!(config.cache.jitter_max, Duration::from_secs(10));
        assert_eq!(config.tasks.min_timer_interval, Duration::from_secs(10));
        assert_eq!(config.workflow.poll_interval, Duration::from_secs(2));
        assert_eq!(config.workflow.max_poll_attempts, 450);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("CIRRUS_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CIRRUS_DATABASE_URL")));
    }

    #[test]
    fn test_config_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CIRRUS_DATABASE_URL", "sqlite:/tmp/cirrus.db");
        guard.set("CIRRUS_CACHE_TICK_SECS", "15");
        guard.set("CIRRUS_CACHE_MAX_CONCURRENCY", "2");
        guard.set("CIRRUS_CACHE_JITTER_MAX_SECS", "0");
        guard.set("CIRRUS_TASK_MIN_INTERVAL_SECS", "30");
        guard.set("CIRRUS_POLL_INTERVAL_SECS", "5");
        guard.set("CIRRUS_POLL_MAX_ATTEMPTS", "12");

        let config = Config::from_env().unwrap();
        assert_eq!(config.cache.tick_interval, Duration::from_secs(15));
        assert_eq!(config.cache.max_concurrency, 2);
        assert_eq!(config.cache.jitter_min, Duration::ZERO);
        assert_eq!(config.cache.jitter_max, Duration::ZERO);
        assert_eq!(config.tasks.min_timer_interval, Duration::from_secs(30));
        assert_eq!(config.workflow.poll_interval, Duration::from_secs(5));
        assert_eq!(config.workflow.max_poll_attempts, 12);
    }

    #[test]
    fn test_config_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CIRRUS_DATABASE_URL", "sqlite::memory:");
        for key in OPTIONAL {
            guard.remove(key);
        }
        guard.set("CIRRUS_CACHE_MAX_CONCURRENCY", "zero");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("CIRRUS_CACHE_MAX_CONCURRENCY", _)
        ));

        guard.set("CIRRUS_CACHE_MAX_CONCURRENCY", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("CIRRUS_CACHE_MAX_CONCURRENCY", _)
        ));
    }
}
