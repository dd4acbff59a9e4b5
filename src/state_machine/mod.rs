// State machine module for task lifecycle management
//
// Tasks move Pending -> Running -> {Succeeded, Failed, Cancelled}. The machine is
// in-memory and per task instance; state changes are broadcast to watchers.

pub mod errors;
pub mod events;
pub mod states;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use states::TaskState;
pub use task_state_machine::TaskStateMachine;
