//! # Runtime events emitted by the scope, registry, and task wrappers.
//!
//! [`EventKind`] classifies events across three categories:
//! - **Task lifecycle**: submission, start, and the five terminal states;
//! - **Scope lifecycle**: the exit coordinator's phase transitions;
//! - **Subscriber diagnostics**: overflow and panic reports from the
//!   fan-out workers.
//!
//! Each event carries a globally unique, monotonically increasing sequence
//! number (`seq`); use it to restore order when events are observed out of
//! band.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::tasks::TaskId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Task lifecycle ===
    /// Task registered and scheduled.
    ///
    /// Sets: `task`, `id`.
    TaskSubmitted,

    /// Task began executing.
    ///
    /// Sets: `task`, `id`.
    TaskStarting,

    /// Task finished with `Ok`.
    ///
    /// Sets: `task`, `id`, `elapsed_ms`.
    TaskSucceeded,

    /// Task finished with a genuine failure (retained for scope close).
    ///
    /// Sets: `task`, `id`, `reason`, `elapsed_ms`.
    TaskFailed,

    /// Task finished with the interruption signal; removed silently.
    ///
    /// Sets: `task`, `id`, `elapsed_ms`.
    TaskInterrupted,

    /// Task stopped after the closing scope cancelled it; not an error.
    ///
    /// Sets: `task`, `id`, `elapsed_ms`.
    TaskCancelled,

    /// Submission rejected (scope already closing, or a registry invariant
    /// violation).
    ///
    /// Sets: `task`, `id`, `reason`.
    SubmitRejected,

    // === Scope lifecycle ===
    /// The exit coordinator started: snapshot taken, exit-bound tasks are
    /// being cancelled.
    ScopeClosing,

    /// All tracked tasks reached a terminal state.
    ScopeDrained,

    /// The coordinator resolved the scope's outcome.
    ///
    /// Sets: `task` + `reason` when a task failure is re-raised.
    ScopeClosed,

    // === Subscriber diagnostics ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `task` (subscriber name), `reason`.
    SubscriberOverflow,

    /// Subscriber panicked while handling an event.
    ///
    /// Sets: `task` (subscriber name), `reason`.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// `seq` and `at` are always set; the remaining fields depend on the
/// [`EventKind`].
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task (or subscriber) name, if applicable.
    pub task: Option<Arc<str>>,
    /// Task id, if applicable.
    pub id: Option<TaskId>,
    /// Human-readable reason (failure message, rejection label, ...).
    pub reason: Option<Arc<str>>,
    /// Wall time of the unit of work, for terminal task events (ms).
    pub elapsed_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            id: None,
            reason: None,
            elapsed_ms: None,
        }
    }

    /// Attaches a task (or subscriber) name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the unit of work's wall time (stored as milliseconds).
    #[inline]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        let ms = elapsed.as_millis().min(u128::from(u32::MAX)) as u32;
        self.elapsed_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::TaskSubmitted);
        let b = Event::new(EventKind::TaskStarting);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_set_fields() {
        let ev = Event::new(EventKind::TaskFailed)
            .with_task("demo")
            .with_id(TaskId(3))
            .with_reason("boom")
            .with_elapsed(Duration::from_millis(1500));

        assert_eq!(ev.kind, EventKind::TaskFailed);
        assert_eq!(ev.task.as_deref(), Some("demo"));
        assert_eq!(ev.id, Some(TaskId(3)));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
        assert_eq!(ev.elapsed_ms, Some(1500));
    }

    #[test]
    fn elapsed_saturates_at_u32_max() {
        let ev = Event::new(EventKind::TaskSucceeded)
            .with_elapsed(Duration::from_secs(u64::from(u32::MAX)));
        assert_eq!(ev.elapsed_ms, Some(u32::MAX));
    }
}
