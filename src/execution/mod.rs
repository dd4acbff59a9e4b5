//! # Execution Module
//!
//! Background execution of units of work: the [`Task`] contract, the shared
//! [`TaskContext`], the bounded [`WorkerPool`], the single hook thread and the
//! [`TaskScheduler`] tying them together.

pub mod context;
pub mod handle;
pub mod hooks;
pub mod scheduler;
pub mod sink;
pub mod task;
pub mod worker_pool;

pub use context::{Progress, TaskContext, TaskId, TaskSnapshot};
pub use handle::{
    FollowOnOutcome, GraphHandle, GraphResult, JobHandle, JobOutcome, SequenceHandle, TaskHandle,
};
pub use hooks::HookExecutor;
pub use scheduler::{TaskBatch, TaskScheduler};
pub use sink::{LifecycleSink, TaskReport, TracingSink};
pub use task::{Task, TaskOutcome, TaskResult};
pub use worker_pool::{WorkerPermit, WorkerPool, WorkerPoolError, WorkerPoolStats};
