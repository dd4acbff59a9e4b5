#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskchain Core
//!
//! Background task execution with transactional task scopes and automatic
//! follow-on chaining.
//!
//! ## Overview
//!
//! A host application submits units of work to a [`TaskScheduler`]. Each task
//! runs on a bounded worker pool, reports progress and warnings through its
//! [`TaskContext`], and finishes in exactly one of three terminal states:
//! succeeded, failed or cancelled. Exactly one lifecycle hook then runs on a
//! single dedicated hook thread.
//!
//! ## Key Features
//!
//! - **Cooperative Cancellation**: task bodies observe cancel requests at safe points
//! - **Transactional Tasks**: one connection, one transaction, commit only on success
//! - **Task Graphs**: follow-ons receive the owner's value and launch automatically,
//!   in parallel or in order
//! - **Server Bridge**: wait for asynchronous server replies without blocking a worker
//! - **Working Directories**: per-task temp directories swept after completion
//!
//! ## Module Organization
//!
//! - [`execution`] - tasks, contexts, the scheduler and its hook thread
//! - [`orchestration`] - task graphs and system bootstrap
//! - [`database`] - transactional connections and task scopes
//! - [`messaging`] - request/reply bridge over pushed server messages
//! - [`filesystem`] - working directories and progress-reporting file helpers
//! - [`state_machine`] - task lifecycle states and transitions
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use taskchain_core::error::Result;
//! use taskchain_core::execution::{Task, TaskContext, TaskScheduler, TracingSink};
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Task for Greet {
//!     type Output = String;
//!
//!     fn title(&self) -> String {
//!         "Greet".to_string()
//!     }
//!
//!     async fn run(&self, ctx: &TaskContext) -> Result<String> {
//!         ctx.update_message("composing greeting");
//!         Ok("hello".to_string())
//!     }
//! }
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let scheduler = TaskScheduler::with_sink(Arc::new(TracingSink))?;
//! let greeting = scheduler.submit(Greet).join().await.into_result()?;
//! assert_eq!(greeting, "hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod execution;
pub mod filesystem;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod state_machine;

pub use config::{ConfigLoader, TaskchainConfig};
pub use error::{Result, SystemError, SystemResult, TaskError};
pub use execution::{
    GraphHandle, JobHandle, LifecycleSink, Progress, TaskBatch, TaskContext, TaskHandle, TaskId,
    TaskResult, TaskScheduler, TracingSink,
};
pub use orchestration::{AcceptsInput, ExecutionMode, TaskGraphOwner, TaskSystem};
pub use state_machine::{TaskEvent, TaskState};
