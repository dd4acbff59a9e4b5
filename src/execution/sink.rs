//! Lifecycle reporting.
//!
//! The scheduler reports every progress change and every terminal outcome to a
//! [`LifecycleSink`]. Sink methods run on the hook thread.

use super::context::{ProgressReporter, TaskContext, TaskId, TaskSnapshot};
use super::hooks::HookExecutor;
use crate::error::TaskError;
use crate::state_machine::TaskState;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Terminal summary of a task handed to the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub title: String,
    pub state: TaskState,
    pub warnings: Vec<String>,
}

impl TaskReport {
    pub(crate) fn new(ctx: &TaskContext, state: TaskState, warnings: Vec<String>) -> Self {
        Self {
            task_id: ctx.id(),
            title: ctx.title(),
            state,
            warnings,
        }
    }
}

/// Receiver of task progress and outcomes
pub trait LifecycleSink: Send + Sync + 'static {
    fn report_progress(&self, _snapshot: &TaskSnapshot) {}

    /// Success, with any warnings recorded along the way
    fn report_result(&self, report: &TaskReport);

    fn report_failure(&self, report: &TaskReport, error: &TaskError);

    /// Recoverable failure, such as a lost server connection
    fn report_notice(&self, report: &TaskReport, error: &TaskError);

    fn report_cancelled(&self, report: &TaskReport);
}

/// Default sink writing to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LifecycleSink for TracingSink {
    fn report_progress(&self, snapshot: &TaskSnapshot) {
        debug!(
            task_id = %snapshot.id,
            title = %snapshot.title,
            state = %snapshot.state,
            progress = ?snapshot.progress.percent(),
            message = %snapshot.message,
            "Task progress"
        );
    }

    fn report_result(&self, report: &TaskReport) {
        info!(
            task_id = %report.task_id,
            title = %report.title,
            warnings = report.warnings.len(),
            "Task succeeded"
        );
        for warning in &report.warnings {
            warn!(task_id = %report.task_id, warning = %warning, "Task completed with warning");
        }
    }

    fn report_failure(&self, report: &TaskReport, error: &TaskError) {
        error!(
            task_id = %report.task_id,
            title = %report.title,
            error_kind = error.kind(),
            error = %error,
            "Task failed"
        );
    }

    fn report_notice(&self, report: &TaskReport, error: &TaskError) {
        warn!(
            task_id = %report.task_id,
            title = %report.title,
            error = %error,
            "Task stopped by a recoverable problem"
        );
    }

    fn report_cancelled(&self, report: &TaskReport) {
        info!(task_id = %report.task_id, title = %report.title, "Task cancelled");
    }
}

/// Forwards context changes to the sink on the hook thread
pub(crate) struct SinkProgressReporter {
    hooks: HookExecutor,
    sink: Arc<dyn LifecycleSink>,
}

impl SinkProgressReporter {
    pub(crate) fn new(hooks: HookExecutor, sink: Arc<dyn LifecycleSink>) -> Self {
        Self { hooks, sink }
    }
}

impl ProgressReporter for SinkProgressReporter {
    fn progress_changed(&self, snapshot: TaskSnapshot) {
        let sink = Arc::clone(&self.sink);
        self.hooks.dispatch(move || sink.report_progress(&snapshot));
    }
}
