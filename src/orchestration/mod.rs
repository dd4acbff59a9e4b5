//! # Orchestration Module
//!
//! Composition of tasks: owner tasks with automatically launched follow-ons,
//! and the bootstrap that assembles a running system.

pub mod bootstrap;
pub mod task_graph;

pub use bootstrap::TaskSystem;
pub use task_graph::{AcceptsInput, ExecutionMode, FollowOnRegistry, Handoff, TaskGraphOwner};
