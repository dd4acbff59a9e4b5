//! # Configuration System
//!
//! Layered configuration for the task execution framework: built-in defaults, an
//! optional TOML file, an optional environment-specific override file, then
//! `TASKCHAIN__*` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskchain_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_file("config/taskchain.toml").load()?;
//!
//! let workers = config.scheduler.max_concurrent_tasks;
//! let poll = config.bridge.poll_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskchainConfig {
    /// Worker pool and hook thread settings
    pub scheduler: SchedulerConfig,

    /// Connection pool settings for transactional tasks
    pub database: DatabaseConfig,

    /// Sync-over-async server bridge settings
    pub bridge: BridgeConfig,

    /// Per-task temporary directory settings
    pub working_directory: WorkingDirectoryConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl TaskchainConfig {
    /// Validate cross-field constraints the type system cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.max_concurrent_tasks == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_concurrent_tasks",
                "0",
                "at least one worker is required",
            ));
        }

        if self.scheduler.hook_thread_name.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "scheduler.hook_thread_name",
                "",
                "hook thread name must not be empty",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "connection pool needs at least one connection",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigurationError::invalid_value(
                "database.min_connections",
                self.database.min_connections.to_string(),
                format!(
                    "must not exceed max_connections ({})",
                    self.database.max_connections
                ),
            ));
        }

        if self.bridge.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "bridge.poll_interval_ms",
                "0",
                "a zero poll interval would spin",
            ));
        }

        if self.working_directory.prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(ConfigurationError::invalid_value(
                "working_directory.prefix",
                self.working_directory.prefix.clone(),
                "prefix must be a single path component",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of task bodies allowed to run concurrently
    pub max_concurrent_tasks: usize,
    /// Thread name of the single lifecycle hook context
    pub hook_thread_name: String,
    /// Time allowed for active tasks to drain on shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: constants::DEFAULT_MAX_CONCURRENT_TASKS,
            hook_thread_name: constants::HOOK_THREAD_NAME.to_string(),
            shutdown_timeout_ms: constants::DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SchedulerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound on waiting for a pooled connection
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://taskchain.db?mode=rwc".to_string(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_seconds: constants::DEFAULT_ACQUIRE_TIMEOUT.as_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Sleep between completion, cancellation and connectivity checks
    pub poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkingDirectoryConfig {
    /// Parent of all per-task directories; the system temp dir when unset
    pub base_dir: Option<PathBuf>,
    pub prefix: String,
}

impl Default for WorkingDirectoryConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            prefix: constants::WORKING_DIRECTORY_PREFIX.to_string(),
        }
    }
}

impl WorkingDirectoryConfig {
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; RUST_LOG takes precedence when set
    pub level: Option<String>,
    /// Emit JSON records instead of human-readable lines
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TaskchainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bridge.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.scheduler.hook_thread_name, "taskchain-hooks");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = TaskchainConfig::default();
        config.scheduler.max_concurrent_tasks = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheduler.max_concurrent_tasks"));
    }

    #[test]
    fn test_min_connections_bounded_by_max() {
        let mut config = TaskchainConfig::default();
        config.database.max_connections = 2;
        config.database.min_connections = 5;

        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_partial_sections_deserialize_with_defaults() {
        let config: TaskchainConfig =
            serde_json::from_value(serde_json::json!({"scheduler": {"max_concurrent_tasks": 8}}))
                .unwrap();

        assert_eq!(config.scheduler.max_concurrent_tasks, 8);
        assert_eq!(config.scheduler.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.max_connections, 10);
    }
}
