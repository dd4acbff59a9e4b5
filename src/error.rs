//! Error types for the task execution framework.
//!

use crate::config::ConfigurationError;
use thiserror::Error;

/// Failure cause of a unit of work.
///
/// Errors raised inside a task body travel unchanged to the lifecycle hooks and to
/// the [`TaskHandle`](crate::execution::TaskHandle) of the submitter. `Cancelled` is
/// not a failure: the scheduler maps it to the `Cancelled` terminal state.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The remote service went away while a request was outstanding. Recoverable:
    /// the user can reconnect and retry.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Task cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        TaskError::Execution(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        TaskError::ServiceUnavailable(message.into())
    }

    /// Soft failures surface as notices instead of error reports.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TaskError::ServiceUnavailable(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// Short machine-readable kind, used as a structured logging field
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::ServiceUnavailable(_) => "service_unavailable",
            TaskError::Database(_) => "database",
            TaskError::Io(_) => "io",
            TaskError::Archive(_) => "archive",
            TaskError::Execution(_) => "execution",
            TaskError::Panicked(_) => "panicked",
            TaskError::Cancelled => "cancelled",
            TaskError::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors raised while starting or stopping the framework itself.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Hook thread error: {0}")]
    HookThread(#[from] std::io::Error),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type SystemResult<T> = std::result::Result<T, SystemError>;
