//! # taskscope
//!
//! **Taskscope** is a scoped supervisor for background async tasks.
//!
//! A [`Scope`] is a bounded lifetime: units of work submitted into it run
//! concurrently and independently awaitable, and when the scope closes it
//! enforces a deterministic exit protocol — cancel the tasks marked
//! `cancel_on_exit`, wait for **all** tracked tasks to finish (shielded
//! from outer cancellation), and re-raise the first genuine failure while
//! treating the designated interruption signal as non-error control flow.
//!
//! ## Architecture
//! ```text
//!  caller ──► Scope::submit(work) ──► Registry.register(id, entry)
//!     │              │                     (non-owning: token + flag)
//!     │              └──► tokio::spawn(supervise_unit(fut))
//!     │                        │
//!     ▼                        └─ on finish ──► Registry.on_completion
//!  TaskHandle::join()                             ├─ Ok        → Succeeded
//!  (independent await)                            ├─ Interrupted → silent
//!                                                 ├─ Canceled+ScopeExit → silent
//!                                                 └─ other      → Failed (retained)
//!
//!  Scope::close() ──► spawn(coordinate)   ── shielded exit protocol ──
//!      Cancelling: cancel_on_exit entries get CancelCause::ScopeExit
//!      Draining:   wait for the registry snapshot to empty
//!      Closed:     re-raise first failure (submission order) or exit clean
//!
//!  every step ──► Bus ──► listener ──► SubscriberSet ──► Subscribe impls
//! ```
//!
//! ## Features
//! | Area            | Description                                          | Key types / traits                  |
//! |-----------------|------------------------------------------------------|-------------------------------------|
//! | **Scopes**      | Bounded lifetime, exit protocol, shielded drain.     | [`Scope`], [`scoped`], [`ScopePhase`] |
//! | **Tasks**       | Submission, handles, cooperative cancellation.       | [`TaskHandle`], [`TaskContext`], [`SubmitOptions`] |
//! | **Context**     | Values frozen into each task at submission time.     | [`ContextMap`], [`ContextSnapshot`] |
//! | **Errors**      | Interruption signal vs genuine failures.             | [`TaskError`], [`ScopeError`]       |
//! | **Subscribers** | Hook into lifecycle events (logging, metrics).       | [`Subscribe`], [`Event`]            |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use taskscope::{scoped, SubmitOptions, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), taskscope::ScopeError> {
//!     scoped(|scope| async move {
//!         // Runs to completion even if the scope closes first.
//!         let sum = scope.submit(|_ctx| async move { Ok::<_, TaskError>(2 + 2) })?;
//!
//!         // Exit-bound: the closing scope cancels it.
//!         scope.submit_with(
//!             SubmitOptions::named("watcher").with_cancel_on_exit(true),
//!             |ctx| async move {
//!                 ctx.cancelled().await;
//!                 Err::<(), _>(TaskError::Canceled)
//!             },
//!         )?;
//!
//!         assert_eq!(sum.join().await.unwrap(), 4);
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

mod core;
mod error;
mod events;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use crate::core::{scoped, Config, Scope, ScopeBuilder, ScopePhase, SubmitOptions};
pub use crate::error::{ScopeError, TaskError};
pub use crate::events::{Bus, Event, EventKind};
pub use crate::subscribers::{Subscribe, SubscriberSet};
pub use crate::tasks::{
    CancelCause, ContextMap, ContextSnapshot, TaskContext, TaskHandle, TaskId, TaskState,
};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use crate::subscribers::LogWriter;
