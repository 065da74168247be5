//! # Task identity, lifecycle state, and the caller-facing handle.
//!
//! [`TaskHandle`] is the independently awaitable reference to one scheduled
//! unit of work. The registry holds only a non-owning tracking entry; the
//! handle owns the join side, so a task's result (or retained failure)
//! stays queryable after the registry entry was removed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{panic_message, TaskError};

/// Unique id of one scheduled unit of work.
///
/// Allocated from a per-scope monotonic counter, never reused; ordering by
/// id is ordering by submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Registered but not yet polled by the scheduler.
    Pending = 0,
    /// Being executed.
    Running = 1,
    /// Finished with `Ok`.
    Succeeded = 2,
    /// Finished with a genuine failure (retained for scope close).
    Failed = 3,
    /// Finished with the interruption signal; not an error.
    Interrupted = 4,
    /// Stopped cooperatively after the closing scope cancelled it; not an
    /// error.
    Cancelled = 5,
}

impl TaskState {
    /// True for any finished state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running)
    }

    fn from_u8(value: u8) -> TaskState {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Succeeded,
            3 => TaskState::Failed,
            4 => TaskState::Interrupted,
            _ => TaskState::Cancelled,
        }
    }
}

/// Atomically readable state cell shared between the handle and the
/// supervising wrapper.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(TaskState::Pending as u8))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// # Independently awaitable reference to one scheduled unit of work.
///
/// Returned by [`Scope::submit`](crate::Scope::submit). Dropping the handle
/// does **not** cancel or abandon the task; the scope keeps tracking it and
/// drains it at close.
///
/// ## Example
/// ```
/// use taskscope::{Scope, TaskError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), taskscope::ScopeError> {
/// let scope = Scope::new();
/// let handle = scope.submit(|_ctx| async move { Ok::<_, TaskError>(40 + 2) })?;
///
/// assert_eq!(handle.join().await.unwrap(), 42);
/// scope.close().await
/// # }
/// ```
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    name: Arc<str>,
    state: Arc<StateCell>,
    join: JoinHandle<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        name: Arc<str>,
        state: Arc<StateCell>,
        join: JoinHandle<Result<T, TaskError>>,
    ) -> Self {
        Self {
            id,
            name,
            state,
            join,
        }
    }

    /// The task's unique id (submission order).
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// True once the task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.get().is_terminal() || self.join.is_finished()
    }

    /// Waits for the task and returns its result or retained failure.
    ///
    /// Suspends only this caller; the scope's own drain is independent.
    pub async fn join(self) -> Result<T, TaskError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(TaskError::Panicked {
                reason: panic_message(err.into_panic().as_ref()),
            }),
            // The runtime shut down underneath the task.
            Err(_) => Err(TaskError::Canceled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Interrupted.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn state_cell_round_trips() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), TaskState::Pending);
        for state in [
            TaskState::Running,
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::Interrupted,
            TaskState::Cancelled,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn ids_order_by_submission() {
        assert!(TaskId(1) < TaskId(2));
        assert_eq!(TaskId(7).to_string(), "7");
    }
}
