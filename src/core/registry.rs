//! # Task registry: the scope's single shared mutable structure.
//!
//! One mutex guards everything that changes concurrently: the scope phase,
//! the map of in-flight tasks, and the ledger of retained failures. The
//! lock is never held across an await point.
//!
//! ## Rules
//! - Entries are **non-owning**: name, exit-cancellation flag, cancellation
//!   token, cancel-cause cell. The join side lives in the caller's
//!   [`TaskHandle`](crate::TaskHandle); the tokio scheduler owns execution.
//! - Registration checks the phase under the same lock that the exit
//!   coordinator uses to flip it, so a submission can never land after the
//!   coordinator's snapshot.
//! - `on_completion` is the only remover. It classifies the outcome,
//!   retains genuine failures in the ledger, publishes exactly one terminal
//!   event, and wakes the drain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::scope::ScopePhase;
use crate::error::{ScopeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{CancelCause, CauseCell, TaskId, TaskState};

/// Non-owning tracking entry for one in-flight task.
pub(crate) struct Entry {
    /// Diagnostic name.
    pub(crate) name: Arc<str>,
    /// Fixed at submission; decides exit-time treatment.
    pub(crate) cancel_on_exit: bool,
    /// The task's cancellation token.
    pub(crate) cancel: CancellationToken,
    /// Cause cell written by the exit coordinator before cancelling.
    pub(crate) cause: CauseCell,
}

/// Point-in-time copy of an entry, taken when the scope begins closing.
///
/// The live map keeps mutating independently while the coordinator works
/// on this fixed snapshot.
pub(crate) struct SnapshotEntry {
    pub(crate) id: TaskId,
    pub(crate) cancel_on_exit: bool,
    pub(crate) cancel: CancellationToken,
    pub(crate) cause: CauseCell,
}

/// A genuine task failure retained for the exit coordinator.
#[derive(Clone)]
pub(crate) struct FailureRecord {
    pub(crate) id: TaskId,
    pub(crate) task: Arc<str>,
    pub(crate) error: TaskError,
}

struct State {
    phase: ScopePhase,
    tasks: HashMap<TaskId, Entry>,
    failures: Vec<FailureRecord>,
}

/// Registry of in-flight tasks plus the failure ledger.
pub(crate) struct Registry {
    state: Mutex<State>,
    /// Woken by `on_completion`; the drain re-checks its snapshot ids.
    done: Notify,
    bus: Bus,
}

impl Registry {
    pub(crate) fn new(bus: Bus) -> Self {
        Self {
            state: Mutex::new(State {
                phase: ScopePhase::Open,
                tasks: HashMap::new(),
                failures: Vec::new(),
            }),
            done: Notify::new(),
            bus,
        }
    }

    /// Critical sections are panic-free, so a poisoned lock still holds a
    /// consistent state.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a tracking entry, atomically with the phase check.
    pub(crate) fn register(&self, id: TaskId, entry: Entry) -> Result<(), ScopeError> {
        let mut state = self.lock();
        if state.phase != ScopePhase::Open {
            return Err(ScopeError::ScopeClosed);
        }
        if state.tasks.contains_key(&id) {
            return Err(ScopeError::DuplicateTask { id });
        }
        state.tasks.insert(id, entry);
        Ok(())
    }

    /// Removes the entry for a finished task and classifies its outcome.
    ///
    /// Called exactly once per task by its supervising wrapper. Genuine
    /// failures are retained in the ledger; the drain is woken afterwards.
    pub(crate) fn on_completion(
        &self,
        id: TaskId,
        failure: Option<&TaskError>,
        elapsed: Duration,
    ) -> TaskState {
        // Removal and failure retention must be one critical section: the
        // drain may resume on any completion, and must never observe the
        // entry gone while its failure has not reached the ledger yet.
        let (entry, terminal) = {
            let mut state = self.lock();
            let Some(entry) = state.tasks.remove(&id) else {
                drop(state);
                // Completion for an untracked id: nothing to classify against.
                debug_assert!(false, "completion for unregistered task {id}");
                self.done.notify_waiters();
                return classify(failure, None);
            };
            let terminal = classify(failure, entry.cause.get().copied());
            if terminal == TaskState::Failed {
                let error = failure.cloned().unwrap_or(TaskError::Canceled);
                state.failures.push(FailureRecord {
                    id,
                    task: Arc::clone(&entry.name),
                    error,
                });
            }
            (entry, terminal)
        };

        let kind = match terminal {
            TaskState::Succeeded => EventKind::TaskSucceeded,
            TaskState::Interrupted => EventKind::TaskInterrupted,
            TaskState::Cancelled => EventKind::TaskCancelled,
            _ => EventKind::TaskFailed,
        };
        let mut event = Event::new(kind)
            .with_task(entry.name)
            .with_id(id)
            .with_elapsed(elapsed);
        if let (EventKind::TaskFailed, Some(err)) = (kind, failure) {
            event = event.with_reason(err.to_string());
        }
        self.bus.publish(event);

        self.done.notify_waiters();
        terminal
    }

    /// Flips the phase to Closing and returns the snapshot, or `None` if
    /// the scope already began closing.
    pub(crate) fn begin_close(&self) -> Option<Vec<SnapshotEntry>> {
        let mut state = self.lock();
        if state.phase != ScopePhase::Open {
            return None;
        }
        state.phase = ScopePhase::Closing;

        let mut snapshot: Vec<SnapshotEntry> = state
            .tasks
            .iter()
            .map(|(id, entry)| SnapshotEntry {
                id: *id,
                cancel_on_exit: entry.cancel_on_exit,
                cancel: entry.cancel.clone(),
                cause: Arc::clone(&entry.cause),
            })
            .collect();
        snapshot.sort_by_key(|e| e.id);
        Some(snapshot)
    }

    /// Marks the exit protocol finished.
    pub(crate) fn finish_close(&self) {
        self.lock().phase = ScopePhase::Closed;
    }

    pub(crate) fn phase(&self) -> ScopePhase {
        self.lock().phase
    }

    /// Number of tasks not yet finished.
    pub(crate) fn active(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Waits until none of `ids` remains in the registry.
    ///
    /// The enable-then-check loop guarantees a completion that races with
    /// the check cannot be missed.
    pub(crate) async fn wait_idle(&self, ids: &[TaskId]) {
        let notified = self.done.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            if !self.any_tracked(ids) {
                return;
            }
            notified.as_mut().await;
            notified.set(self.done.notified());
        }
    }

    fn any_tracked(&self, ids: &[TaskId]) -> bool {
        let state = self.lock();
        ids.iter().any(|id| state.tasks.contains_key(id))
    }

    /// The retained failure with the lowest submission id, if any.
    ///
    /// Completion order is arbitrary, so the ledger is scanned rather than
    /// relying on push order.
    pub(crate) fn first_failure(&self) -> Option<FailureRecord> {
        let state = self.lock();
        state.failures.iter().min_by_key(|f| f.id).cloned()
    }
}

/// Maps a task's outcome (and cancellation cause) to its terminal state.
fn classify(failure: Option<&TaskError>, cause: Option<CancelCause>) -> TaskState {
    match failure {
        None => TaskState::Succeeded,
        Some(TaskError::Interrupted) => TaskState::Interrupted,
        Some(TaskError::Canceled) if cause == Some(CancelCause::ScopeExit) => TaskState::Cancelled,
        Some(_) => TaskState::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn registry() -> Registry {
        Registry::new(Bus::new(16))
    }

    fn entry(cancel_on_exit: bool) -> Entry {
        Entry {
            name: Arc::from("t"),
            cancel_on_exit,
            cancel: CancellationToken::new(),
            cause: Arc::new(OnceLock::new()),
        }
    }

    #[test]
    fn register_rejects_duplicates() {
        let reg = registry();
        reg.register(TaskId(1), entry(false)).unwrap();
        let err = reg.register(TaskId(1), entry(false)).unwrap_err();
        assert!(matches!(err, ScopeError::DuplicateTask { id: TaskId(1) }));
    }

    #[test]
    fn register_rejects_after_close_begins() {
        let reg = registry();
        assert!(reg.begin_close().is_some());
        let err = reg.register(TaskId(1), entry(false)).unwrap_err();
        assert!(matches!(err, ScopeError::ScopeClosed));
    }

    #[test]
    fn begin_close_happens_once() {
        let reg = registry();
        reg.register(TaskId(1), entry(true)).unwrap();
        let snapshot = reg.begin_close().expect("first close takes snapshot");
        assert_eq!(snapshot.len(), 1);
        assert!(reg.begin_close().is_none());
        assert_eq!(reg.phase(), ScopePhase::Closing);
    }

    #[test]
    fn completion_classifies_and_removes() {
        let reg = registry();
        reg.register(TaskId(1), entry(false)).unwrap();
        reg.register(TaskId(2), entry(false)).unwrap();
        reg.register(TaskId(3), entry(false)).unwrap();

        let ok = reg.on_completion(TaskId(1), None, Duration::ZERO);
        let interrupted =
            reg.on_completion(TaskId(2), Some(&TaskError::Interrupted), Duration::ZERO);
        let failed = reg.on_completion(TaskId(3), Some(&TaskError::fail("boom")), Duration::ZERO);

        assert_eq!(ok, TaskState::Succeeded);
        assert_eq!(interrupted, TaskState::Interrupted);
        assert_eq!(failed, TaskState::Failed);
        assert_eq!(reg.active(), 0);

        // Only the genuine failure reaches the ledger.
        let first = reg.first_failure().expect("failure retained");
        assert_eq!(first.id, TaskId(3));
    }

    #[test]
    fn cancelled_by_scope_exit_is_silent() {
        let reg = registry();
        let e = entry(true);
        let cause = Arc::clone(&e.cause);
        reg.register(TaskId(1), e).unwrap();

        cause.set(CancelCause::ScopeExit).unwrap();
        let terminal = reg.on_completion(TaskId(1), Some(&TaskError::Canceled), Duration::ZERO);

        assert_eq!(terminal, TaskState::Cancelled);
        assert!(reg.first_failure().is_none());
    }

    #[test]
    fn unexplained_cancellation_is_a_failure() {
        let reg = registry();
        reg.register(TaskId(1), entry(false)).unwrap();

        let terminal = reg.on_completion(TaskId(1), Some(&TaskError::Canceled), Duration::ZERO);

        assert_eq!(terminal, TaskState::Failed);
        let first = reg.first_failure().expect("retained");
        assert_eq!(first.error, TaskError::Canceled);
    }

    #[test]
    fn first_failure_picks_lowest_id_regardless_of_completion_order() {
        let reg = registry();
        for id in 1..=3 {
            reg.register(TaskId(id), entry(false)).unwrap();
        }

        // Highest id fails first.
        reg.on_completion(TaskId(3), Some(&TaskError::fail("late")), Duration::ZERO);
        reg.on_completion(TaskId(1), Some(&TaskError::fail("early")), Duration::ZERO);
        reg.on_completion(TaskId(2), None, Duration::ZERO);

        let first = reg.first_failure().expect("retained");
        assert_eq!(first.id, TaskId(1));
        assert_eq!(first.error, TaskError::fail("early"));
    }
}
