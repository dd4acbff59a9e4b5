//! # System Constants
//!
//! Defaults and fixed names that define the operational boundaries of the task
//! execution framework. Configuration values fall back to these when unset.

use std::time::Duration;

/// Default number of task bodies allowed to run at the same time
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Default interval between completion checks while a task waits on a server reply
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default time allowed for running tasks to drain during shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pool acquire timeout. Callers tolerate waiting for a connection, so this
/// is only a last-resort guard against a wedged pool.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Name of the single thread that runs lifecycle hooks
pub const HOOK_THREAD_NAME: &str = "taskchain-hooks";

/// Prefix for per-task working directories
pub const WORKING_DIRECTORY_PREFIX: &str = "task";

/// Prefix for environment variable configuration overrides
pub const ENV_PREFIX: &str = "TASKCHAIN";

/// Environment variable naming the deployment environment
pub const ENV_VAR_ENVIRONMENT: &str = "TASKCHAIN_ENV";

/// Chunk size used by the progress-reporting file helpers
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Lifecycle operation names used in structured logs
pub mod operations {
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_SUCCEEDED: &str = "task.succeeded";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const FOLLOW_ONS_DISPATCHED: &str = "graph.follow_ons_dispatched";
    pub const FOLLOW_ONS_ABANDONED: &str = "graph.follow_ons_abandoned";
    pub const HOOK_PANICKED: &str = "hook.panicked";
    pub const SINK_PANICKED: &str = "sink.panicked";
}
