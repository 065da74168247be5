//! # Per-task execution context and submission-time value snapshots.
//!
//! Every unit of work receives a [`TaskContext`]: its identity, a
//! [`CancellationToken`] it must check cooperatively, the cause of a
//! cancellation (if any), and a frozen [`ContextSnapshot`] of the values the
//! scope carried at the moment of submission.
//!
//! ## Snapshot semantics
//! The scope owns a mutable [`ContextMap`]. `submit` freezes the map into a
//! `ContextSnapshot` (an `Arc` clone of the current generation, O(1)); the
//! task sees exactly the values visible to the submitter. Mutating the map
//! afterwards produces a new generation and never leaks into tasks that were
//! already submitted.
//!
//! ## Cancellation cause
//! When the exit coordinator cancels an exit-bound task it first sets
//! [`CancelCause::ScopeExit`] on the task's cause cell, so the task (and the
//! registry) can distinguish "cancelled because the scope is closing" from
//! any other cancellation source.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::tasks::TaskId;

/// Why a task's cancellation token was cancelled.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// Cancelled by the exit coordinator because the scope is closing.
    ScopeExit,
}

/// Write-once cell carrying the cancellation cause, shared between the
/// registry entry (writer) and the task context (reader).
pub(crate) type CauseCell = Arc<OnceLock<CancelCause>>;

type ContextValue = Arc<dyn Any + Send + Sync>;
type ValueMap = HashMap<Cow<'static, str>, ContextValue>;

/// Mutable, copy-on-write key/value map carried by a scope.
///
/// Writes replace the whole generation, so snapshots taken earlier keep
/// observing the values that were current when they were taken.
///
/// ## Example
/// ```
/// use taskscope::ContextMap;
///
/// let ctx = ContextMap::new();
/// ctx.set("request_id", 7_u64);
///
/// let frozen = ctx.snapshot();
/// ctx.set("request_id", 8_u64);
///
/// assert_eq!(frozen.get::<u64>("request_id"), Some(&7));
/// assert_eq!(ctx.snapshot().get::<u64>("request_id"), Some(&8));
/// ```
#[derive(Clone, Default)]
pub struct ContextMap {
    current: Arc<RwLock<Arc<ValueMap>>>,
}

impl ContextMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a value under `key`.
    ///
    /// Starts a new generation; existing snapshots are unaffected.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<Cow<'static, str>>, value: T) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next: ValueMap = (**current).clone();
        next.insert(key.into(), Arc::new(value));
        *current = Arc::new(next);
    }

    /// Removes a value. No-op if the key is absent.
    pub fn remove(&self, key: &str) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if current.contains_key(key) {
            let mut next: ValueMap = (**current).clone();
            next.remove(key);
            *current = Arc::new(next);
        }
    }

    /// Freezes the current generation into an immutable snapshot.
    pub fn snapshot(&self) -> ContextSnapshot {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        ContextSnapshot {
            values: Arc::clone(&current),
        }
    }
}

impl std::fmt::Debug for ContextMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ContextMap")
            .field("len", &current.len())
            .finish()
    }
}

/// Immutable point-in-time view of a [`ContextMap`].
///
/// Cheap to clone; every clone observes the same frozen generation.
#[derive(Clone)]
pub struct ContextSnapshot {
    values: Arc<ValueMap>,
}

impl ContextSnapshot {
    /// Looks up `key` and downcasts the value to `T`.
    ///
    /// Returns `None` if the key is absent or holds a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.as_ref().downcast_ref())
    }

    /// Number of values in the snapshot.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the snapshot carries no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSnapshot")
            .field("len", &self.values.len())
            .finish()
    }
}

/// # Execution context handed to every unit of work.
///
/// Tasks should check [`TaskContext::is_cancelled`] (or await
/// [`TaskContext::cancelled`]) at safe points and exit promptly, returning
/// [`TaskError::Canceled`](crate::TaskError::Canceled) when they stop
/// because of it.
#[derive(Clone)]
pub struct TaskContext {
    pub(crate) id: TaskId,
    pub(crate) name: Arc<str>,
    pub(crate) cancel: CancellationToken,
    pub(crate) cause: CauseCell,
    pub(crate) values: ContextSnapshot,
}

impl TaskContext {
    /// The task's unique id (submission order).
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Why this task was cancelled, if a cause was recorded.
    ///
    /// [`CancelCause::ScopeExit`] is set by the exit coordinator *before*
    /// the token fires, so a task waking from [`TaskContext::cancelled`]
    /// can rely on the cause being visible.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.cause.get().copied()
    }

    /// The values frozen at submission time.
    pub fn values(&self) -> &ContextSnapshot {
        &self.values
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_frozen() {
        let map = ContextMap::new();
        map.set("k", 1_u32);
        let snap = map.snapshot();

        map.set("k", 2_u32);
        map.set("extra", "v");

        assert_eq!(snap.get::<u32>("k"), Some(&1));
        assert!(snap.get::<&str>("extra").is_none());
        assert_eq!(map.snapshot().get::<u32>("k"), Some(&2));
    }

    #[test]
    fn get_is_type_checked() {
        let map = ContextMap::new();
        map.set("k", String::from("s"));
        let snap = map.snapshot();

        assert_eq!(snap.get::<String>("k"), Some(&String::from("s")));
        assert!(snap.get::<u32>("k").is_none());
    }

    #[test]
    fn remove_starts_a_new_generation() {
        let map = ContextMap::new();
        map.set("k", 1_u32);
        let before = map.snapshot();

        map.remove("k");

        assert_eq!(before.get::<u32>("k"), Some(&1));
        assert!(map.snapshot().is_empty());
    }
}
