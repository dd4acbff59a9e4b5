//! # Task Context
//!
//! Shared, cloneable view of one running unit of work. The task body receives a
//! `&TaskContext` to publish progress, check for cancellation, collect warnings and
//! reach its working directory. Handles and lifecycle hooks observe the same context.

use crate::error::{Result, TaskError};
use crate::filesystem::{ProgressSink, WorkingDirectory};
use crate::state_machine::{StateMachineResult, TaskEvent, TaskState, TaskStateMachine};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// Identifier of one submitted task
pub type TaskId = Uuid;

/// Task progress as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Progress {
    #[default]
    Indeterminate,
    Percent(u8),
}

impl Progress {
    /// Derive progress from a work counter; zero total is indeterminate
    pub fn from_work(done: u64, total: u64) -> Self {
        if total == 0 {
            return Progress::Indeterminate;
        }
        let percent = (u128::from(done.min(total)) * 100 / u128::from(total)) as u8;
        Progress::Percent(percent)
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            Progress::Indeterminate => None,
            Progress::Percent(p) => Some(*p),
        }
    }
}

/// Point-in-time view of a task, used for progress reporting and tracking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub title: String,
    pub state: TaskState,
    pub progress: Progress,
    pub message: String,
    pub cancellable: bool,
    pub cancel_requested: bool,
}

/// Receiver of context changes, installed by the scheduler
pub(crate) trait ProgressReporter: Send + Sync {
    fn progress_changed(&self, snapshot: TaskSnapshot);
}

const OPEN: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const COMMITTED: u8 = 2;

struct ContextInner {
    id: TaskId,
    title: RwLock<String>,
    progress: Mutex<Progress>,
    message: RwLock<String>,
    cancellable: bool,
    /// One of `OPEN`, `CANCEL_REQUESTED`, `COMMITTED`
    cancellation: AtomicU8,
    cancel_notify: Notify,
    warnings: Mutex<Vec<String>>,
    state: TaskStateMachine,
    working_directory: WorkingDirectory,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

/// Handle to the state of one task
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<ContextInner>,
}

impl TaskContext {
    pub(crate) fn new(
        title: impl Into<String>,
        cancellable: bool,
        working_directory: WorkingDirectory,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            inner: Arc::new(ContextInner {
                id,
                title: RwLock::new(title.into()),
                progress: Mutex::new(Progress::Indeterminate),
                message: RwLock::new(String::new()),
                cancellable,
                cancellation: AtomicU8::new(OPEN),
                cancel_notify: Notify::new(),
                warnings: Mutex::new(Vec::new()),
                state: TaskStateMachine::new(id),
                working_directory,
                reporter,
            }),
        }
    }

    /// Context that is not attached to a scheduler
    ///
    /// Useful for driving task bodies directly, for example in tests. The working
    /// directory is allocated under the system temp directory.
    pub fn detached(title: impl Into<String>) -> Self {
        Self::new(
            title,
            true,
            WorkingDirectory::new(std::env::temp_dir(), crate::constants::WORKING_DIRECTORY_PREFIX),
            None,
        )
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn title(&self) -> String {
        self.inner.title.read().clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        *self.inner.title.write() = title.into();
        self.publish();
    }

    pub fn progress(&self) -> Progress {
        *self.inner.progress.lock()
    }

    pub fn set_progress(&self, progress: Progress) {
        *self.inner.progress.lock() = progress;
        self.publish();
    }

    /// Report `done` out of `total` units of work
    pub fn update_progress(&self, done: u64, total: u64) {
        self.set_progress(Progress::from_work(done, total));
    }

    pub fn message(&self) -> String {
        self.inner.message.read().clone()
    }

    pub fn update_message(&self, message: impl Into<String>) {
        *self.inner.message.write() = message.into();
        self.publish();
    }

    pub fn is_cancellable(&self) -> bool {
        self.inner.cancellable
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.load(Ordering::Acquire) == CANCEL_REQUESTED
    }

    /// Request cooperative cancellation
    ///
    /// Returns `false` for non-cancellable tasks, tasks already in a terminal
    /// state, and repeated requests.
    pub fn cancel(&self) -> bool {
        if !self.inner.cancellable || self.inner.state.is_terminal() {
            return false;
        }
        self.request_cancel()
    }

    /// Cancel regardless of the cancellable flag; used for abandoned work
    pub(crate) fn force_cancel(&self) -> bool {
        self.request_cancel()
    }

    fn request_cancel(&self) -> bool {
        let first = self
            .inner
            .cancellation
            .compare_exchange(OPEN, CANCEL_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            tracing::debug!(task_id = %self.inner.id, "Cancellation requested");
            self.inner.cancel_notify.notify_waiters();
            self.publish();
        }
        first
    }

    /// `Err(TaskError::Cancelled)` once cancellation was requested
    ///
    /// Task bodies call this at safe points: `ctx.check_cancelled()?;`
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Pass the point after which the outcome can no longer be cancelled
    ///
    /// Returns `false` when cancellation was requested first; the caller must then
    /// abandon its side effects. Once this returned `true`, later cancel requests
    /// are refused, so work committed after this point is reported as done.
    pub fn enter_commit_point(&self) -> bool {
        match self.inner.cancellation.compare_exchange(
            OPEN,
            COMMITTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == COMMITTED,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.inner.cancellation.load(Ordering::Acquire) == COMMITTED
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        let notified = self.inner.cancel_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Record a non-fatal problem; warnings travel with the task result
    pub fn warn(&self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!(task_id = %self.inner.id, warning = %warning, "Task warning recorded");
        self.inner.warnings.lock().push(warning);
    }

    pub fn warnings(&self) -> Vec<String> {
        self.inner.warnings.lock().clone()
    }

    pub(crate) fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.warnings.lock())
    }

    pub fn state(&self) -> TaskState {
        self.inner.state.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.inner.state.subscribe()
    }

    pub(crate) fn transition(&self, event: TaskEvent) -> StateMachineResult<TaskState> {
        let state = self.inner.state.transition(event)?;
        self.publish();
        Ok(state)
    }

    pub fn working_directory(&self) -> &WorkingDirectory {
        &self.inner.working_directory
    }

    /// Shortcut for `working_directory().path()`
    pub fn working_path(&self) -> Result<PathBuf> {
        self.inner.working_directory.path()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.inner.id,
            title: self.title(),
            state: self.state(),
            progress: self.progress(),
            message: self.message(),
            cancellable: self.inner.cancellable,
            cancel_requested: self.is_cancelled(),
        }
    }

    fn publish(&self) {
        if let Some(reporter) = &self.inner.reporter {
            reporter.progress_changed(self.snapshot());
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.inner.id)
            .field("title", &*self.inner.title.read())
            .field("state", &self.state())
            .field("cancel_requested", &self.is_cancelled())
            .finish()
    }
}

impl ProgressSink for TaskContext {
    fn report(&self, done: u64, total: u64) {
        self.update_progress(done, total);
    }

    fn is_cancelled(&self) -> bool {
        TaskContext::is_cancelled(self)
    }
}
