//! Error types used by the scope runtime and tasks.
//!
//! This module defines two main error enums:
//!
//! - [`ScopeError`] — errors raised by the scope itself (rejected
//!   submissions, registry invariant violations, the first task failure
//!   re-raised at close).
//! - [`TaskError`] — outcomes reported by individual units of work.
//!
//! Both types provide `as_label` for logging/metrics. Note that two
//! [`TaskError`] variants are *not* errors in the propagation sense:
//! [`TaskError::Interrupted`] is the designated interruption signal
//! (control flow, never re-raised at close), and [`TaskError::Canceled`]
//! is silent when the cancellation was issued by the closing scope.

use thiserror::Error;

use crate::tasks::TaskId;

/// # Outcomes reported by units of work.
///
/// A task finishes by returning `Ok(value)` or one of these variants.
/// The scope classifies the variant at the registry boundary; only
/// [`TaskError::Fail`] and [`TaskError::Panicked`] (and an unexplained
/// `Canceled`) count as genuine failures at scope close.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The designated interruption signal: "stop this unit of work, not an
    /// error". Removed from the registry silently, never re-raised at close.
    #[error("interrupted")]
    Interrupted,

    /// The task observed cancellation and stopped cooperatively.
    ///
    /// Silent when the cancellation came from the closing scope (the
    /// [`CancelCause::ScopeExit`](crate::tasks::CancelCause) sentinel is
    /// set); treated as a real failure otherwise.
    #[error("cancelled")]
    Canceled,

    /// Task execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The task panicked; the panic was caught at the scope boundary.
    #[error("panicked: {reason}")]
    Panicked {
        /// Best-effort panic payload message.
        reason: String,
    },
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`] from any displayable error.
    ///
    /// # Example
    /// ```
    /// use taskscope::TaskError;
    ///
    /// let err = TaskError::fail("connection refused");
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Interrupted => "task_interrupted",
            TaskError::Canceled => "task_canceled",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
        }
    }

    /// True for the interruption signal — expected control flow, not an error.
    ///
    /// # Example
    /// ```
    /// use taskscope::TaskError;
    ///
    /// assert!(TaskError::Interrupted.is_interruption());
    /// assert!(!TaskError::fail("boom").is_interruption());
    /// ```
    pub fn is_interruption(&self) -> bool {
        matches!(self, TaskError::Interrupted)
    }
}

/// # Errors produced by the scope runtime.
///
/// These represent failures of the supervision machinery itself or the one
/// task failure the exit coordinator re-raises on a clean exit.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Submission was rejected because the scope already began closing.
    #[error("scope is closing; submission rejected")]
    ScopeClosed,

    /// A task id was registered twice. Task ids come from a monotonic
    /// counter, so this indicates a bug in the supervisor, not caller
    /// misuse.
    #[error("duplicate task id {id}: registry invariant violated")]
    DuplicateTask {
        /// The offending id.
        id: TaskId,
    },

    /// The first genuine task failure, re-raised when the scope exits
    /// normally. Ties between concurrently failing tasks are broken by
    /// submission order (lowest id wins).
    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        /// Name of the failed task.
        task: String,
        /// The retained failure.
        #[source]
        source: TaskError,
    },
}

impl ScopeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskscope::ScopeError;
    ///
    /// assert_eq!(ScopeError::ScopeClosed.as_label(), "scope_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ScopeError::ScopeClosed => "scope_closed",
            ScopeError::DuplicateTask { .. } => "duplicate_task",
            ScopeError::TaskFailed { .. } => "scope_task_failed",
        }
    }
}

/// Best-effort extraction of a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(TaskError::Interrupted.as_label(), "task_interrupted");
        assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
        assert_eq!(TaskError::fail("x").as_label(), "task_failed");
        assert_eq!(
            TaskError::Panicked { reason: "x".into() }.as_label(),
            "task_panicked"
        );
    }

    #[test]
    fn only_interrupted_is_interruption() {
        assert!(TaskError::Interrupted.is_interruption());
        assert!(!TaskError::Canceled.is_interruption());
        assert!(!TaskError::fail("boom").is_interruption());
    }

    #[test]
    fn panic_message_downcasts_common_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(s.as_ref()), "static str");

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");

        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
