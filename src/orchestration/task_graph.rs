//! # Task Graphs
//!
//! A [`TaskGraphOwner`] wraps an owner task together with the follow-on tasks that
//! should run once the owner finished. Each follow-on receives the owner's value
//! through [`AcceptsInput`] before it is submitted.
//!
//! If the owner fails or is cancelled, every follow-on is still submitted but
//! resolves as cancelled without running its body. Its `on_cancelled` hook and
//! working directory cleanup still run.
//!
//! Owners with an optional result use `Output = Option<T>`; follow-ons then receive
//! `None` and decide for themselves to skip their work.

use crate::execution::scheduler::{LaunchMode, Launcher};
use crate::execution::{JobHandle, Task, TaskScheduler};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How follow-ons of one owner are launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// All follow-ons at once
    #[default]
    Parallel,
    /// In registration order, each after the previous one reached a terminal state
    Sequential,
}

impl ExecutionMode {
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, ExecutionMode::Parallel)
    }
}

/// What a follow-on gets from its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff<V> {
    /// Owner succeeded with this value
    Value(V),
    /// Owner failed or was cancelled
    Abandoned,
}

/// Receives the owner's value before the follow-on is submitted
pub trait AcceptsInput<I> {
    fn accept_input(&mut self, input: I);
}

type FollowOnLauncher<V> = Box<dyn FnOnce(&TaskScheduler, Handoff<V>) -> JobHandle + Send>;

/// Follow-ons registered against an owner whose output is `V`
///
/// Several follow-ons may share an id; all of them run.
pub struct FollowOnRegistry<V> {
    entries: Vec<(String, FollowOnLauncher<V>)>,
    mode: ExecutionMode,
}

impl<V> Default for FollowOnRegistry<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            mode: ExecutionMode::default(),
        }
    }
}

impl<V> FollowOnRegistry<V>
where
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, task: F)
    where
        F: Task + AcceptsInput<V>,
    {
        let launcher: FollowOnLauncher<V> =
            Box::new(move |scheduler: &TaskScheduler, handoff: Handoff<V>| {
                let mut task = task;
                match handoff {
                    Handoff::Value(input) => {
                        task.accept_input(input);
                        scheduler.launch(task, LaunchMode::Run).job()
                    }
                    Handoff::Abandoned => scheduler.launch(task, LaunchMode::Abandon).job(),
                }
            });
        self.entries.push((id.into(), launcher));
    }

    pub fn register_graph<F>(&mut self, id: impl Into<String>, graph: TaskGraphOwner<F>)
    where
        F: Task + AcceptsInput<V>,
        F::Output: Clone,
    {
        let launcher: FollowOnLauncher<V> =
            Box::new(move |scheduler: &TaskScheduler, handoff: Handoff<V>| {
                let mut graph = graph;
                match handoff {
                    Handoff::Value(input) => {
                        graph.owner_mut().accept_input(input);
                        scheduler.launch_graph(graph, LaunchMode::Run).job()
                    }
                    Handoff::Abandoned => scheduler.launch_graph(graph, LaunchMode::Abandon).job(),
                }
            });
        self.entries.push((id.into(), launcher));
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registration ids in registration order, duplicates included
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Attach the owner's handoff to every follow-on
    pub(crate) fn bind(self, handoff: Handoff<V>) -> (ExecutionMode, Vec<(String, Launcher)>) {
        let launchers = self
            .entries
            .into_iter()
            .map(|(id, launcher)| {
                let handoff = handoff.clone();
                let bound: Launcher = Box::new(move |scheduler: &TaskScheduler, mode: LaunchMode| {
                    match mode {
                        LaunchMode::Run => launcher(scheduler, handoff),
                        LaunchMode::Abandon => launcher(scheduler, Handoff::Abandoned),
                    }
                });
                (id, bound)
            })
            .collect();
        (self.mode, launchers)
    }
}

impl<V> fmt::Debug for FollowOnRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FollowOnRegistry")
            .field(
                "ids",
                &self.entries.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
            )
            .field("mode", &self.mode)
            .finish()
    }
}

/// Owner task plus its follow-ons
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use taskchain_core::error::Result;
/// use taskchain_core::execution::{Task, TaskContext};
/// use taskchain_core::orchestration::{AcceptsInput, ExecutionMode, TaskGraphOwner};
///
/// struct Fetch;
///
/// #[async_trait]
/// impl Task for Fetch {
///     type Output = Vec<u32>;
///     fn title(&self) -> String { "Fetch".into() }
///     async fn run(&self, _ctx: &TaskContext) -> Result<Vec<u32>> { Ok(vec![1, 2, 3]) }
/// }
///
/// #[derive(Default)]
/// struct Sum { input: Vec<u32> }
///
/// impl AcceptsInput<Vec<u32>> for Sum {
///     fn accept_input(&mut self, input: Vec<u32>) { self.input = input; }
/// }
///
/// #[async_trait]
/// impl Task for Sum {
///     type Output = u32;
///     fn title(&self) -> String { "Sum".into() }
///     async fn run(&self, _ctx: &TaskContext) -> Result<u32> { Ok(self.input.iter().sum()) }
/// }
///
/// let mut graph = TaskGraphOwner::new(Fetch);
/// graph.add_follow_on("sum", Sum::default());
/// graph.set_execution_mode(ExecutionMode::Sequential);
/// assert_eq!(graph.follow_on_count(), 1);
/// ```
pub struct TaskGraphOwner<O: Task> {
    owner: O,
    follow_ons: FollowOnRegistry<O::Output>,
}

impl<O> TaskGraphOwner<O>
where
    O: Task,
    O::Output: Clone,
{
    pub fn new(owner: O) -> Self {
        Self {
            owner,
            follow_ons: FollowOnRegistry::new(),
        }
    }

    pub fn add_follow_on<F>(&mut self, id: impl Into<String>, task: F) -> &mut Self
    where
        F: Task + AcceptsInput<O::Output>,
    {
        self.follow_ons.register(id, task);
        self
    }

    /// Register a follow-on that has follow-ons of its own
    pub fn add_follow_on_graph<F>(&mut self, id: impl Into<String>, graph: TaskGraphOwner<F>) -> &mut Self
    where
        F: Task + AcceptsInput<O::Output>,
        F::Output: Clone,
    {
        self.follow_ons.register_graph(id, graph);
        self
    }

    pub fn with_follow_on<F>(mut self, id: impl Into<String>, task: F) -> Self
    where
        F: Task + AcceptsInput<O::Output>,
    {
        self.add_follow_on(id, task);
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.set_execution_mode(mode);
        self
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.follow_ons.set_execution_mode(mode);
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.follow_ons.execution_mode()
    }

    pub fn follow_on_count(&self) -> usize {
        self.follow_ons.len()
    }

    pub fn follow_on_ids(&self) -> Vec<&str> {
        self.follow_ons.ids()
    }

    pub fn owner(&self) -> &O {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut O {
        &mut self.owner
    }

    pub(crate) fn into_parts(self) -> (O, FollowOnRegistry<O::Output>) {
        (self.owner, self.follow_ons)
    }
}

impl<I, O> AcceptsInput<I> for TaskGraphOwner<O>
where
    O: Task + AcceptsInput<I>,
{
    fn accept_input(&mut self, input: I) {
        self.owner.accept_input(input);
    }
}

impl<O: Task> fmt::Debug for TaskGraphOwner<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraphOwner")
            .field("owner", &self.owner.title())
            .field("follow_ons", &self.follow_ons)
            .finish()
    }
}
