//! Unit-of-work contract and its result.

use super::context::TaskContext;
use crate::error::{Result, TaskError};
use crate::state_machine::TaskState;
use async_trait::async_trait;

/// A unit of work run in the background by the [`TaskScheduler`](super::TaskScheduler)
///
/// `run` executes on a Tokio worker. Exactly one of the three lifecycle hooks runs
/// afterwards, on the scheduler's dedicated hook thread, once the task reached its
/// terminal state.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use taskchain_core::error::Result;
/// use taskchain_core::execution::{Task, TaskContext};
///
/// struct CountRows {
///     rows: Vec<String>,
/// }
///
/// #[async_trait]
/// impl Task for CountRows {
///     type Output = usize;
///
///     fn title(&self) -> String {
///         "Count rows".to_string()
///     }
///
///     async fn run(&self, ctx: &TaskContext) -> Result<usize> {
///         for (done, _) in self.rows.iter().enumerate() {
///             ctx.check_cancelled()?;
///             ctx.update_progress(done as u64 + 1, self.rows.len() as u64);
///         }
///         Ok(self.rows.len())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Output: Send + 'static;

    fn title(&self) -> String;

    /// Non-cancellable tasks ignore cancel requests from users
    fn is_cancellable(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Self::Output>;

    fn on_succeeded(&self, _ctx: &TaskContext, _value: &Self::Output) {}

    fn on_failed(&self, _ctx: &TaskContext, _error: &TaskError) {}

    fn on_cancelled(&self, _ctx: &TaskContext) {}
}

/// How a task ended
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Succeeded(T),
    Failed(TaskError),
    Cancelled,
}

/// Terminal outcome of a task plus the warnings it recorded
#[derive(Debug)]
pub struct TaskResult<T> {
    outcome: TaskOutcome<T>,
    warnings: Vec<String>,
}

impl<T> TaskResult<T> {
    pub fn succeeded(value: T) -> Self {
        Self::from_outcome(TaskOutcome::Succeeded(value))
    }

    pub fn failed(error: TaskError) -> Self {
        Self::from_outcome(TaskOutcome::Failed(error))
    }

    pub fn cancelled() -> Self {
        Self::from_outcome(TaskOutcome::Cancelled)
    }

    fn from_outcome(outcome: TaskOutcome<T>) -> Self {
        Self {
            outcome,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Classify what a task body returned
    ///
    /// A requested cancellation wins over whatever the body produced. Tasks
    /// that passed their commit point can no longer be cancelled, so their
    /// result stands.
    pub(crate) fn from_body(body: Result<T>, cancel_requested: bool, warnings: Vec<String>) -> Self {
        let outcome = match body {
            Err(TaskError::Cancelled) => TaskOutcome::Cancelled,
            _ if cancel_requested => TaskOutcome::Cancelled,
            Ok(value) => TaskOutcome::Succeeded(value),
            Err(error) => TaskOutcome::Failed(error),
        };
        Self { outcome, warnings }
    }

    pub fn state(&self) -> TaskState {
        match self.outcome {
            TaskOutcome::Succeeded(_) => TaskState::Succeeded,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }

    pub fn outcome(&self) -> &TaskOutcome<T> {
        &self.outcome
    }

    pub fn into_outcome(self) -> TaskOutcome<T> {
        self.outcome
    }

    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            TaskOutcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self.outcome {
            TaskOutcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            TaskOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Cancelled)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// `Cancelled` becomes `Err(TaskError::Cancelled)`
    pub fn into_result(self) -> Result<T> {
        match self.outcome {
            TaskOutcome::Succeeded(value) => Ok(value),
            TaskOutcome::Failed(error) => Err(error),
            TaskOutcome::Cancelled => Err(TaskError::Cancelled),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskResult<U> {
        let outcome = match self.outcome {
            TaskOutcome::Succeeded(value) => TaskOutcome::Succeeded(f(value)),
            TaskOutcome::Failed(error) => TaskOutcome::Failed(error),
            TaskOutcome::Cancelled => TaskOutcome::Cancelled,
        };
        TaskResult {
            outcome,
            warnings: self.warnings,
        }
    }
}
