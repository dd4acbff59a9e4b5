use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    states::TaskState,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Thread-safe task state machine for lifecycle management
///
/// Owned by a task context. Every accepted transition is published on a watch
/// channel so handles can await terminal states without polling.
#[derive(Debug)]
pub struct TaskStateMachine {
    task_id: Uuid,
    state: Mutex<TaskState>,
    publisher: watch::Sender<TaskState>,
}

impl TaskStateMachine {
    /// Create a new task state machine instance in the `Pending` state
    pub fn new(task_id: Uuid) -> Self {
        let (publisher, _) = watch::channel(TaskState::Pending);
        Self {
            task_id,
            state: Mutex::new(TaskState::Pending),
            publisher,
        }
    }

    /// Get the current state of the task
    pub fn current_state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.publisher.subscribe()
    }

    /// Attempt to transition the task state
    pub fn transition(&self, event: TaskEvent) -> StateMachineResult<TaskState> {
        let mut state = self.state.lock();
        let target_state = Self::determine_target_state(*state, &event)?;

        debug!(
            task_id = %self.task_id,
            from = %*state,
            to = %target_state,
            event = event.event_type(),
            "Task state transition"
        );

        *state = target_state;
        self.publisher.send_replace(target_state);
        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskState> {
        let target = match (current_state, event) {
            (TaskState::Pending, TaskEvent::Start) => TaskState::Running,

            (TaskState::Running, TaskEvent::Succeed) => TaskState::Succeeded,

            // A task can fail before its body ran, e.g. when no worker could be acquired
            (TaskState::Running, TaskEvent::Fail(_)) => TaskState::Failed,
            (TaskState::Pending, TaskEvent::Fail(_)) => TaskState::Failed,

            (TaskState::Pending, TaskEvent::Cancel) => TaskState::Cancelled,
            (TaskState::Running, TaskEvent::Cancel) => TaskState::Cancelled,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.current_state().is_terminal()
    }

    /// Check if the task is currently running
    pub fn is_active(&self) -> bool {
        self.current_state().is_active()
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}
