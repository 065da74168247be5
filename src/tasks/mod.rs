//! Task-side primitives: identity, state, handle, and execution context.
//!
//! ## Contents
//! - [`TaskId`], [`TaskState`], [`TaskHandle`] — what the submitter gets
//!   back and how a task's lifecycle is observed;
//! - [`TaskContext`], [`ContextMap`], [`ContextSnapshot`], [`CancelCause`]
//!   — what the unit of work receives when it runs.

mod context;
mod handle;

pub use context::{CancelCause, ContextMap, ContextSnapshot, TaskContext};
pub use handle::{TaskHandle, TaskId, TaskState};

pub(crate) use context::CauseCell;
pub(crate) use handle::StateCell;
