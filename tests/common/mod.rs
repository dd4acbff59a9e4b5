//! Shared fixtures for integration tests: a recording lifecycle sink, a hook log
//! and a handful of small tasks.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use taskchain_core::config::{SchedulerConfig, WorkingDirectoryConfig};
use taskchain_core::error::{Result, TaskError};
use taskchain_core::execution::{
    LifecycleSink, TaskContext, TaskReport, TaskScheduler, TaskSnapshot,
};
use taskchain_core::orchestration::AcceptsInput;
use taskchain_core::execution::Task;
use tempfile::TempDir;
use tokio::sync::Notify;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("taskchain_core=debug")
        .with_test_writer()
        .try_init();
}

/// One call received by [`RecordingSink`]
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Progress(TaskSnapshot),
    Result(TaskReport),
    Failure(TaskReport, String),
    Notice(TaskReport, String),
    Cancelled(TaskReport),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(SinkEvent, ThreadId)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.events.lock().iter().map(|(_, t)| *t).collect()
    }

    /// Terminal reports only, progress filtered out
    pub fn terminal_events(&self) -> Vec<SinkEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, SinkEvent::Progress(_)))
            .collect()
    }

    pub fn progress_messages(&self, title: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Progress(s) if s.title == title => Some(s.message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().push((event, std::thread::current().id()));
    }
}

impl LifecycleSink for RecordingSink {
    fn report_progress(&self, snapshot: &TaskSnapshot) {
        self.push(SinkEvent::Progress(snapshot.clone()));
    }

    fn report_result(&self, report: &TaskReport) {
        self.push(SinkEvent::Result(report.clone()));
    }

    fn report_failure(&self, report: &TaskReport, error: &TaskError) {
        self.push(SinkEvent::Failure(report.clone(), error.to_string()));
    }

    fn report_notice(&self, report: &TaskReport, error: &TaskError) {
        self.push(SinkEvent::Notice(report.clone(), error.to_string()));
    }

    fn report_cancelled(&self, report: &TaskReport) {
        self.push(SinkEvent::Cancelled(report.clone()));
    }
}

/// Scheduler wired to a recording sink and a private working-directory root
pub struct Harness {
    pub scheduler: TaskScheduler,
    pub sink: Arc<RecordingSink>,
    pub work_root: TempDir,
}

impl Harness {
    pub fn new(workers: usize) -> Self {
        init_test_logging();
        let work_root = tempfile::tempdir().expect("temp dir");
        let sink = Arc::new(RecordingSink::default());
        let scheduler = TaskScheduler::new(
            &SchedulerConfig {
                max_concurrent_tasks: workers,
                ..SchedulerConfig::default()
            },
            &WorkingDirectoryConfig {
                base_dir: Some(work_root.path().to_path_buf()),
                ..WorkingDirectoryConfig::default()
            },
            sink.clone(),
        )
        .expect("scheduler");

        Self {
            scheduler,
            sink,
            work_root,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hook {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Hook invocations across tasks, in call order
#[derive(Debug, Clone, Default)]
pub struct HookLog {
    entries: Arc<Mutex<Vec<(String, Hook, ThreadId)>>>,
}

impl HookLog {
    pub fn record(&self, title: &str, hook: Hook) {
        self.entries
            .lock()
            .push((title.to_string(), hook, std::thread::current().id()));
    }

    pub fn hooks_for(&self, title: &str) -> Vec<Hook> {
        self.entries
            .lock()
            .iter()
            .filter(|(t, _, _)| t == title)
            .map(|(_, h, _)| h.clone())
            .collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.entries.lock().iter().map(|(_, _, t)| *t).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Ordered record of task-body events, e.g. `start:a`, `end:a`
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<String>>>);

impl Timeline {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

macro_rules! record_hooks {
    () => {
        fn on_succeeded(&self, _ctx: &TaskContext, _value: &Self::Output) {
            self.log.record(&self.title, Hook::Succeeded);
        }

        fn on_failed(&self, _ctx: &TaskContext, error: &TaskError) {
            self.log.record(&self.title, Hook::Failed(error.to_string()));
        }

        fn on_cancelled(&self, _ctx: &TaskContext) {
            self.log.record(&self.title, Hook::Cancelled);
        }
    };
}

/// Succeeds with a fixed value
pub struct ValueTask<T> {
    pub title: String,
    pub value: T,
    pub log: HookLog,
}

impl<T> ValueTask<T> {
    pub fn new(title: &str, value: T, log: &HookLog) -> Self {
        Self {
            title: title.to_string(),
            value,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl<T> Task for ValueTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn title(&self) -> String {
        self.title.clone()
    }

    async fn run(&self, ctx: &TaskContext) -> Result<T> {
        ctx.update_message(format!("{} running", self.title));
        Ok(self.value.clone())
    }

    record_hooks!();
}

/// Fails with an execution error
pub struct FailTask {
    pub title: String,
    pub message: String,
    pub log: HookLog,
}

impl FailTask {
    pub fn new(title: &str, message: &str, log: &HookLog) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Task for FailTask {
    type Output = String;

    fn title(&self) -> String {
        self.title.clone()
    }

    async fn run(&self, _ctx: &TaskContext) -> Result<String> {
        Err(TaskError::execution(self.message.clone()))
    }

    record_hooks!();
}

/// Runs until its gate opens or, if cancellable, until cancelled
pub struct GatedTask {
    pub title: String,
    pub gate: Arc<Notify>,
    pub started: Arc<Notify>,
    pub body_ran: Arc<AtomicBool>,
    pub cancellable: bool,
    pub log: HookLog,
}

impl GatedTask {
    pub fn new(title: &str, log: &HookLog) -> Self {
        Self {
            title: title.to_string(),
            gate: Arc::new(Notify::new()),
            started: Arc::new(Notify::new()),
            body_ran: Arc::new(AtomicBool::new(false)),
            cancellable: true,
            log: log.clone(),
        }
    }

    pub fn pinned(mut self) -> Self {
        self.cancellable = false;
        self
    }
}

#[async_trait]
impl Task for GatedTask {
    type Output = ();

    fn title(&self) -> String {
        self.title.clone()
    }

    fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        self.body_ran.store(true, Ordering::SeqCst);
        self.started.notify_one();
        tokio::select! {
            _ = self.gate.notified() => Ok(()),
            _ = ctx.cancelled() => Err(TaskError::Cancelled),
        }
    }

    record_hooks!();
}

/// Follow-on that records the input it was handed
pub struct InputRecorder<I> {
    pub title: String,
    pub input: Option<I>,
    pub seen: Arc<Mutex<Vec<(String, Option<I>)>>>,
    pub timeline: Timeline,
    pub delay: Duration,
    pub fail: bool,
    pub log: HookLog,
}

impl<I> InputRecorder<I> {
    pub fn new(title: &str, seen: &Arc<Mutex<Vec<(String, Option<I>)>>>, log: &HookLog) -> Self {
        Self {
            title: title.to_string(),
            input: None,
            seen: Arc::clone(seen),
            timeline: Timeline::default(),
            delay: Duration::ZERO,
            fail: false,
            log: log.clone(),
        }
    }

    pub fn with_timeline(mut self, timeline: &Timeline) -> Self {
        self.timeline = timeline.clone();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl<I> AcceptsInput<I> for InputRecorder<I> {
    fn accept_input(&mut self, input: I) {
        self.input = Some(input);
    }
}

#[async_trait]
impl<I> Task for InputRecorder<I>
where
    I: Clone + Send + Sync + 'static,
{
    type Output = usize;

    fn title(&self) -> String {
        self.title.clone()
    }

    async fn run(&self, _ctx: &TaskContext) -> Result<usize> {
        self.timeline.push(format!("start:{}", self.title));
        self.seen.lock().push((self.title.clone(), self.input.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.timeline.push(format!("end:{}", self.title));
        if self.fail {
            return Err(TaskError::execution(format!("{} refused its input", self.title)));
        }
        Ok(self.seen.lock().len())
    }

    record_hooks!();
}

/// Fail the test instead of hanging
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("operation timed out")
}
