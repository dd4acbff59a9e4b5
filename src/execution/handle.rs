//! Handles returned by the scheduler's submit operations.

use super::context::{TaskContext, TaskId};
use super::task::TaskResult;
use crate::error::TaskError;
use crate::state_machine::TaskState;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::error;

/// Type-erased handle to a submitted task
///
/// Used wherever tasks of different output types are tracked together, such as
/// batches and follow-on chains.
#[derive(Debug, Clone)]
pub struct JobHandle {
    ctx: TaskContext,
    done: watch::Receiver<Option<TaskState>>,
}

impl JobHandle {
    pub(crate) fn new(ctx: TaskContext, done: watch::Receiver<Option<TaskState>>) -> Self {
        Self { ctx, done }
    }

    pub fn id(&self) -> TaskId {
        self.ctx.id()
    }

    pub fn title(&self) -> String {
        self.ctx.title()
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn state(&self) -> TaskState {
        self.ctx.state()
    }

    pub fn cancel(&self) -> bool {
        self.ctx.cancel()
    }

    /// Whether hooks ran and the result was delivered
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Wait until the task finished, including its lifecycle hooks
    pub async fn wait(&self) -> TaskState {
        let mut done = self.done.clone();
        let finished = match done.wait_for(Option::is_some).await {
            Ok(state) => *state,
            Err(_) => None,
        };
        finished.unwrap_or_else(|| self.ctx.state())
    }

    pub(crate) fn outcome(&self, state: TaskState) -> JobOutcome {
        JobOutcome {
            task_id: self.id(),
            title: self.title(),
            state,
        }
    }
}

/// Typed handle to a submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    job: JobHandle,
    result: oneshot::Receiver<TaskResult<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(job: JobHandle, result: oneshot::Receiver<TaskResult<T>>) -> Self {
        Self { job, result }
    }

    pub fn id(&self) -> TaskId {
        self.job.id()
    }

    pub fn context(&self) -> &TaskContext {
        self.job.context()
    }

    pub fn state(&self) -> TaskState {
        self.job.state()
    }

    pub fn cancel(&self) -> bool {
        self.job.cancel()
    }

    pub fn job(&self) -> JobHandle {
        self.job.clone()
    }

    /// Wait for the terminal result; hooks already ran when this resolves
    pub async fn join(self) -> TaskResult<T> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => {
                let state = self.job.state();
                error!(task_id = %self.job.id(), state = %state, "Task result was dropped before delivery");
                match state {
                    TaskState::Cancelled => TaskResult::cancelled(),
                    state => TaskResult::failed(TaskError::execution(format!(
                        "task result lost in state {state}"
                    ))),
                }
            }
        }
    }
}

/// Final state of one task in a batch or chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub task_id: TaskId,
    pub title: String,
    pub state: TaskState,
}

/// Final state of one registered follow-on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowOnOutcome {
    /// Identifier the follow-on was registered under
    pub registration_id: String,
    pub task_id: TaskId,
    pub title: String,
    pub state: TaskState,
}

/// Owner result together with its follow-on outcomes
#[derive(Debug)]
pub struct GraphResult<T> {
    pub owner: TaskResult<T>,
    pub follow_ons: Vec<FollowOnOutcome>,
}

/// Handle to a submitted task graph
#[derive(Debug)]
pub struct GraphHandle<T> {
    owner: TaskHandle<T>,
    chain: JoinHandle<Vec<FollowOnOutcome>>,
}

impl<T> GraphHandle<T> {
    pub(crate) fn new(owner: TaskHandle<T>, chain: JoinHandle<Vec<FollowOnOutcome>>) -> Self {
        Self { owner, chain }
    }

    pub fn id(&self) -> TaskId {
        self.owner.id()
    }

    pub fn state(&self) -> TaskState {
        self.owner.state()
    }

    /// Cancel the owner; its follow-ons are then abandoned
    pub fn cancel(&self) -> bool {
        self.owner.cancel()
    }

    pub fn job(&self) -> JobHandle {
        self.owner.job()
    }

    /// Wait for the owner only; follow-ons keep running in the background
    pub async fn join(self) -> TaskResult<T> {
        self.owner.join().await
    }

    /// Wait for the owner and every follow-on, nested graphs excluded
    pub async fn join_all(self) -> GraphResult<T> {
        let owner = self.owner.join().await;
        let follow_ons = join_chain(self.chain).await;
        GraphResult { owner, follow_ons }
    }

    /// Wait for follow-ons only, discarding the owner's value
    pub async fn wait_follow_ons(self) -> Vec<FollowOnOutcome> {
        join_chain(self.chain).await
    }
}

async fn join_chain(chain: JoinHandle<Vec<FollowOnOutcome>>) -> Vec<FollowOnOutcome> {
    match chain.await {
        Ok(outcomes) => outcomes,
        Err(err) => {
            error!(error = %err, "Follow-on coordinator did not complete");
            Vec::new()
        }
    }
}

/// Shared stop switch and current-member tracking for sequential runs
#[derive(Debug, Clone, Default)]
pub(crate) struct ChainControl {
    cancelled: Arc<AtomicBool>,
    current: Arc<Mutex<Option<JobHandle>>>,
}

impl ChainControl {
    pub(crate) fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        if let Some(job) = self.current.lock().as_ref() {
            job.cancel();
        }
        first
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn set_current(&self, job: Option<JobHandle>) {
        *self.current.lock() = job;
    }

    pub(crate) fn current(&self) -> Option<JobHandle> {
        self.current.lock().clone()
    }
}

/// Handle to a sequential batch
#[derive(Debug)]
pub struct SequenceHandle {
    control: ChainControl,
    chain: JoinHandle<Vec<JobOutcome>>,
}

impl SequenceHandle {
    pub(crate) fn new(control: ChainControl, chain: JoinHandle<Vec<JobOutcome>>) -> Self {
        Self { control, chain }
    }

    /// Cancel the running member; members not yet started resolve as cancelled
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Member currently running, if any
    pub fn current(&self) -> Option<JobHandle> {
        self.control.current()
    }

    pub async fn wait(self) -> Vec<JobOutcome> {
        match self.chain.await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                error!(error = %err, "Sequential batch did not complete");
                Vec::new()
            }
        }
    }
}
