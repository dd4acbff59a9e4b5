//! # Task Scheduler
//!
//! Runs tasks in the background on the Tokio runtime, bounded by a [`WorkerPool`],
//! and drives each through its lifecycle:
//!
//! 1. `Pending` until a worker slot is free (or cancelled while waiting)
//! 2. `Running` while the body executes
//! 3. terminal state, then exactly one lifecycle hook and one sink report on the
//!    hook thread
//! 4. working directory sweep, removal from the active set, result delivery
//!
//! Task graphs and batches are layered on top: a coordinator future waits for the
//! owner and then launches follow-ons in parallel or in order.

use super::context::{ProgressReporter, TaskContext, TaskId, TaskSnapshot};
use super::handle::{
    ChainControl, FollowOnOutcome, GraphHandle, JobHandle, JobOutcome, SequenceHandle, TaskHandle,
};
use super::hooks::{panic_message, HookExecutor};
use super::sink::{LifecycleSink, SinkProgressReporter, TaskReport};
use super::task::{Task, TaskOutcome, TaskResult};
use super::worker_pool::{WorkerPool, WorkerPoolStats};
use crate::config::{SchedulerConfig, WorkingDirectoryConfig};
use crate::constants::operations;
use crate::error::{Result, SystemError, SystemResult, TaskError};
use crate::filesystem::WorkingDirectory;
use crate::logging::{log_error, log_task_operation};
use crate::orchestration::task_graph::{ExecutionMode, FollowOnRegistry, Handoff, TaskGraphOwner};
use crate::state_machine::{TaskEvent, TaskState};
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Whether a launched task runs its body or is resolved as cancelled up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaunchMode {
    Run,
    Abandon,
}

/// Deferred submission of a task whose output type has been erased
pub(crate) type Launcher = Box<dyn FnOnce(&TaskScheduler, LaunchMode) -> JobHandle + Send>;

/// Ordered group of heterogeneous tasks for batch submission
#[derive(Default)]
pub struct TaskBatch {
    launchers: Vec<Launcher>,
}

impl TaskBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task<T: Task>(mut self, task: T) -> Self {
        self.add_task(task);
        self
    }

    pub fn add_task<T: Task>(&mut self, task: T) -> &mut Self {
        self.launchers
            .push(Box::new(move |scheduler: &TaskScheduler, mode: LaunchMode| {
                scheduler.launch(task, mode).job()
            }));
        self
    }

    pub fn with_graph<O>(mut self, graph: TaskGraphOwner<O>) -> Self
    where
        O: Task,
        O::Output: Clone,
    {
        self.add_graph(graph);
        self
    }

    pub fn add_graph<O>(&mut self, graph: TaskGraphOwner<O>) -> &mut Self
    where
        O: Task,
        O::Output: Clone,
    {
        self.launchers
            .push(Box::new(move |scheduler: &TaskScheduler, mode: LaunchMode| {
                scheduler.launch_graph(graph, mode).job()
            }));
        self
    }

    pub fn len(&self) -> usize {
        self.launchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }
}

impl fmt::Debug for TaskBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBatch")
            .field("len", &self.launchers.len())
            .finish()
    }
}

struct SchedulerInner {
    runtime: Handle,
    workers: WorkerPool,
    hooks: HookExecutor,
    sink: Arc<dyn LifecycleSink>,
    reporter: Arc<dyn ProgressReporter>,
    working_base: PathBuf,
    working_prefix: String,
    tasks: DashMap<TaskId, TaskContext>,
    /// Graph coordinators and sequential chains that may still launch tasks
    chains: AtomicUsize,
    accepting: AtomicBool,
}

impl SchedulerInner {
    fn is_drained(&self) -> bool {
        self.tasks.is_empty() && self.chains.load(Ordering::Acquire) == 0
    }
}

/// Keeps a coordinator counted as active until its future completes or is dropped
struct ChainGuard(Arc<SchedulerInner>);

impl ChainGuard {
    fn enter(inner: &Arc<SchedulerInner>) -> Self {
        inner.chains.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(inner))
    }
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        self.0.chains.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Background task scheduler
///
/// Cloning is cheap; clones share the same workers, hook thread and task table.
/// Submissions may come from any thread, including the hook thread.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    /// Create a scheduler bound to the current Tokio runtime
    pub fn new(
        config: &SchedulerConfig,
        working_directories: &WorkingDirectoryConfig,
        sink: Arc<dyn LifecycleSink>,
    ) -> SystemResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            SystemError::InvalidState(format!("scheduler requires a Tokio runtime: {e}"))
        })?;
        let hooks = HookExecutor::start(&config.hook_thread_name)?;
        let reporter: Arc<dyn ProgressReporter> =
            Arc::new(SinkProgressReporter::new(hooks.clone(), Arc::clone(&sink)));

        info!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            hook_thread = %config.hook_thread_name,
            "Task scheduler started"
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                runtime,
                workers: WorkerPool::new(config.max_concurrent_tasks),
                hooks,
                sink,
                reporter,
                working_base: working_directories.resolved_base_dir(),
                working_prefix: working_directories.prefix.clone(),
                tasks: DashMap::new(),
                chains: AtomicUsize::new(0),
                accepting: AtomicBool::new(true),
            }),
        })
    }

    /// Scheduler with default configuration
    pub fn with_sink(sink: Arc<dyn LifecycleSink>) -> SystemResult<Self> {
        Self::new(
            &SchedulerConfig::default(),
            &WorkingDirectoryConfig::default(),
            sink,
        )
    }

    /// Submit a task for background execution
    pub fn submit<T: Task>(&self, task: T) -> TaskHandle<T::Output> {
        self.launch(task, LaunchMode::Run)
    }

    /// Submit a task graph; follow-ons launch once the owner finished
    pub fn submit_graph<O>(&self, graph: TaskGraphOwner<O>) -> GraphHandle<O::Output>
    where
        O: Task,
        O::Output: Clone,
    {
        self.launch_graph(graph, LaunchMode::Run)
    }

    /// Submit every task of `batch` at once
    pub fn submit_parallel(&self, batch: TaskBatch) -> Vec<JobHandle> {
        batch
            .launchers
            .into_iter()
            .map(|launcher| launcher(self, LaunchMode::Run))
            .collect()
    }

    /// Submit the tasks of `batch` one after another
    ///
    /// Each member starts after the previous one reached a terminal state,
    /// whatever that state was.
    pub fn submit_sequential(&self, batch: TaskBatch) -> SequenceHandle {
        let control = ChainControl::default();
        let launchers = batch
            .launchers
            .into_iter()
            .enumerate()
            .map(|(index, launcher)| (index.to_string(), launcher))
            .collect();

        let scheduler = self.clone();
        let chain_control = control.clone();
        let guard = ChainGuard::enter(&self.inner);
        let chain = self.inner.runtime.spawn(async move {
            let _guard = guard;
            scheduler
                .run_launchers(ExecutionMode::Sequential, launchers, &chain_control)
                .await
                .into_iter()
                .map(|(_, job, state)| job.outcome(state))
                .collect::<Vec<JobOutcome>>()
        });

        SequenceHandle::new(control, chain)
    }

    /// Request cancellation of an active task
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let ctx = self.inner.tasks.get(&task_id).map(|entry| entry.value().clone());
        ctx.map(|ctx| ctx.cancel()).unwrap_or(false)
    }

    /// Snapshots of all submitted tasks that have not finished yet
    pub fn active_tasks(&self) -> Vec<TaskSnapshot> {
        self.contexts().iter().map(TaskContext::snapshot).collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn worker_stats(&self) -> WorkerPoolStats {
        self.inner.workers.stats()
    }

    pub fn hook_thread_id(&self) -> ThreadId {
        self.inner.hooks.thread_id()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting work, cancel everything active and wait for it to drain
    ///
    /// Tasks submitted afterwards resolve as cancelled without running. The hook
    /// thread is stopped once the active set drained or `timeout` elapsed; graph
    /// and sequence coordinators count as active until their last member finished.
    pub async fn shutdown(&self, timeout: Duration) -> SystemResult<()> {
        if !self.inner.accepting.swap(false, Ordering::AcqRel) {
            debug!("Scheduler shutdown already requested");
        }

        let active = self.contexts();
        info!(active = active.len(), timeout_ms = timeout.as_millis() as u64, "Task scheduler shutting down");
        for ctx in &active {
            ctx.cancel();
        }

        let drained = tokio::time::timeout(timeout, async {
            while !self.inner.is_drained() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        self.inner.workers.close();

        let inner = Arc::clone(&self.inner);
        if let Err(err) = tokio::task::spawn_blocking(move || inner.hooks.shutdown()).await {
            error!(error = %err, "Hook thread shutdown did not complete");
        }

        match drained {
            Ok(()) => {
                info!("Task scheduler stopped");
                Ok(())
            }
            Err(_) => {
                let remaining = self.inner.tasks.len();
                let chains = self.inner.chains.load(Ordering::Acquire);
                warn!(remaining, chains, "Task scheduler stopped with tasks still active");
                Err(SystemError::Timeout(format!(
                    "{remaining} tasks and {chains} chains still active after {timeout:?}"
                )))
            }
        }
    }

    fn contexts(&self) -> Vec<TaskContext> {
        self.inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) fn launch<T: Task>(&self, task: T, mode: LaunchMode) -> TaskHandle<T::Output> {
        let ctx = TaskContext::new(
            task.title(),
            task.is_cancellable(),
            WorkingDirectory::new(&self.inner.working_base, self.inner.working_prefix.as_str()),
            Some(Arc::clone(&self.inner.reporter)),
        );

        if mode == LaunchMode::Abandon || !self.is_accepting() {
            ctx.force_cancel();
        }
        self.inner.tasks.insert(ctx.id(), ctx.clone());
        log_task_operation(
            operations::TASK_SUBMITTED,
            ctx.id(),
            &ctx.title(),
            &ctx.state().to_string(),
            (mode == LaunchMode::Abandon).then_some("abandoned"),
        );

        let (result_tx, result_rx) = oneshot::channel();
        let (done_tx, done_rx) = watch::channel(None);
        let job = JobHandle::new(ctx.clone(), done_rx);

        self.inner
            .runtime
            .spawn(execute(Arc::clone(&self.inner), task, ctx, result_tx, done_tx));

        TaskHandle::new(job, result_rx)
    }

    pub(crate) fn launch_graph<O>(
        &self,
        graph: TaskGraphOwner<O>,
        mode: LaunchMode,
    ) -> GraphHandle<O::Output>
    where
        O: Task,
        O::Output: Clone,
    {
        let (owner, follow_ons) = graph.into_parts();
        let owner_handle = self.launch(owner, mode);
        let job = owner_handle.job();
        let (forward_tx, forward_rx) = oneshot::channel();

        let scheduler = self.clone();
        let guard = ChainGuard::enter(&self.inner);
        let chain = self.inner.runtime.spawn(async move {
            let _guard = guard;
            let owner_id = owner_handle.id();
            let result = owner_handle.join().await;
            let handoff = match result.value() {
                Some(value) => Handoff::Value(value.clone()),
                None => Handoff::Abandoned,
            };
            let _ = forward_tx.send(result);
            scheduler.dispatch_follow_ons(owner_id, follow_ons, handoff).await
        });

        GraphHandle::new(TaskHandle::new(job, forward_rx), chain)
    }

    async fn dispatch_follow_ons<V>(
        &self,
        owner_id: TaskId,
        registry: FollowOnRegistry<V>,
        handoff: Handoff<V>,
    ) -> Vec<FollowOnOutcome>
    where
        V: Clone + Send + 'static,
    {
        if registry.is_empty() {
            return Vec::new();
        }

        let operation = match handoff {
            Handoff::Value(_) => operations::FOLLOW_ONS_DISPATCHED,
            Handoff::Abandoned => operations::FOLLOW_ONS_ABANDONED,
        };
        info!(
            operation,
            owner_id = %owner_id,
            follow_ons = registry.len(),
            mode = ?registry.execution_mode(),
            "Dispatching follow-on tasks"
        );

        let (mode, launchers) = registry.bind(handoff);
        self.run_launchers(mode, launchers, &ChainControl::default())
            .await
            .into_iter()
            .map(|(registration_id, job, state)| FollowOnOutcome {
                registration_id,
                task_id: job.id(),
                title: job.title(),
                state,
            })
            .collect()
    }

    async fn run_launchers(
        &self,
        mode: ExecutionMode,
        launchers: Vec<(String, Launcher)>,
        control: &ChainControl,
    ) -> Vec<(String, JobHandle, TaskState)> {
        let launch_mode = |control: &ChainControl| {
            if control.is_cancelled() {
                LaunchMode::Abandon
            } else {
                LaunchMode::Run
            }
        };

        match mode {
            ExecutionMode::Parallel => {
                let jobs: Vec<(String, JobHandle)> = launchers
                    .into_iter()
                    .map(|(label, launcher)| (label, launcher(self, launch_mode(control))))
                    .collect();
                join_all(jobs.into_iter().map(|(label, job)| async move {
                    let state = job.wait().await;
                    (label, job, state)
                }))
                .await
            }
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(launchers.len());
                for (label, launcher) in launchers {
                    let job = launcher(self, launch_mode(control));
                    control.set_current(Some(job.clone()));
                    if control.is_cancelled() {
                        job.cancel();
                    }

                    let state = job.wait().await;
                    debug!(member = %label, task_id = %job.id(), state = %state, "Sequential member finished");
                    outcomes.push((label, job, state));
                }
                control.set_current(None);
                outcomes
            }
        }
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("active", &self.inner.tasks.len())
            .field("chains", &self.inner.chains.load(Ordering::Relaxed))
            .field("workers", &self.inner.workers.stats())
            .field("hooks", &self.inner.hooks)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

async fn execute<T: Task>(
    inner: Arc<SchedulerInner>,
    task: T,
    ctx: TaskContext,
    result_tx: oneshot::Sender<TaskResult<T::Output>>,
    done_tx: watch::Sender<Option<TaskState>>,
) {
    let body = run_body(&inner, &task, &ctx).await;
    let result = TaskResult::from_body(body, ctx.is_cancelled(), ctx.take_warnings());

    let event = match result.outcome() {
        TaskOutcome::Succeeded(_) => TaskEvent::Succeed,
        TaskOutcome::Failed(error) => TaskEvent::Fail(error.to_string()),
        TaskOutcome::Cancelled => TaskEvent::Cancel,
    };
    if let Err(err) = ctx.transition(event) {
        error!(task_id = %ctx.id(), error = %err, "Task could not enter its terminal state");
    }

    let state = result.state();
    let operation = match state {
        TaskState::Succeeded => operations::TASK_SUCCEEDED,
        TaskState::Cancelled => operations::TASK_CANCELLED,
        _ => operations::TASK_FAILED,
    };
    let details = result.error().map(|e| e.to_string());
    log_task_operation(operation, ctx.id(), &ctx.title(), &state.to_string(), details.as_deref());

    let sink = Arc::clone(&inner.sink);
    let hook_ctx = ctx.clone();
    let delivered = inner
        .hooks
        .run(move || {
            run_hooks(&task, &hook_ctx, &result, sink.as_ref());
            result
        })
        .await;

    ctx.working_directory().schedule_cleanup(&inner.runtime);
    inner.tasks.remove(&ctx.id());

    match delivered {
        Some(result) => {
            let _ = result_tx.send(result);
        }
        None => error!(task_id = %ctx.id(), "Lifecycle hooks did not hand back the task result"),
    }
    done_tx.send_replace(Some(state));
}

async fn run_body<T: Task>(inner: &SchedulerInner, task: &T, ctx: &TaskContext) -> Result<T::Output> {
    if ctx.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let permit = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(TaskError::Cancelled),
        permit = inner.workers.acquire() => permit.map_err(|e| TaskError::execution(e.to_string()))?,
    };
    if ctx.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    ctx.transition(TaskEvent::Start)
        .map_err(|e| TaskError::execution(e.to_string()))?;
    log_task_operation(operations::TASK_STARTED, ctx.id(), &ctx.title(), "running", None);

    let outcome = AssertUnwindSafe(task.run(ctx)).catch_unwind().await;
    drop(permit);

    match outcome {
        Ok(body) => body,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn run_hooks<T: Task>(
    task: &T,
    ctx: &TaskContext,
    result: &TaskResult<T::Output>,
    sink: &dyn LifecycleSink,
) {
    let hook = std::panic::catch_unwind(AssertUnwindSafe(|| match result.outcome() {
        TaskOutcome::Succeeded(value) => task.on_succeeded(ctx, value),
        TaskOutcome::Failed(error) => task.on_failed(ctx, error),
        TaskOutcome::Cancelled => task.on_cancelled(ctx),
    }));
    if let Err(payload) = hook {
        log_error(
            "scheduler",
            operations::HOOK_PANICKED,
            &panic_message(payload.as_ref()),
            Some(&ctx.id().to_string()),
        );
    }

    let report = TaskReport::new(ctx, result.state(), result.warnings().to_vec());
    let reported = std::panic::catch_unwind(AssertUnwindSafe(|| match result.outcome() {
        TaskOutcome::Succeeded(_) => sink.report_result(&report),
        TaskOutcome::Failed(error) if error.is_recoverable() => sink.report_notice(&report, error),
        TaskOutcome::Failed(error) => sink.report_failure(&report, error),
        TaskOutcome::Cancelled => sink.report_cancelled(&report),
    }));
    if let Err(payload) = reported {
        log_error(
            "scheduler",
            operations::SINK_PANICKED,
            &panic_message(payload.as_ref()),
            Some(&ctx.id().to_string()),
        );
    }
}
