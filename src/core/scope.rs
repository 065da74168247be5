//! # Scope: bounded lifetime for background tasks, with a deterministic
//! exit protocol.
//!
//! A [`Scope`] is the submission interface callers use to launch units of
//! work, and the owner of the exit coordinator that runs when the scope
//! closes.
//!
//! ## Exit protocol
//! ```text
//! close() ──► spawn(coordinate)          (shield: survives caller drop)
//!                 │
//!                 ├─► Cancelling: snapshot registry (atomic with the
//!                 │     Open → Closing flip); for every cancel_on_exit
//!                 │     entry: set CancelCause::ScopeExit, cancel token
//!                 │
//!                 ├─► Draining: wait until every snapshot id left the
//!                 │     registry (cancelled AND naturally-running tasks)
//!                 │
//!                 └─► Closed:
//!                       ├─ body error in flight ─► suppress task failures
//!                       ├─ failure ledger non-empty ─► re-raise the
//!                       │    lowest-submission-id failure
//!                       └─ otherwise ─► clean exit
//! ```
//!
//! ## Rules
//! - `submit` never suspends; the work future is registered before it is
//!   spawned, so the exit coordinator can never miss it.
//! - Cancellation is cooperative: tasks must check their
//!   [`TaskContext`](crate::TaskContext) and stop; nothing is force-killed.
//! - The drain is shielded: the whole protocol runs inside a spawned task,
//!   so an outer cancellation that drops the `close()` future cannot abort
//!   it mid-wait.

use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::builder::ScopeBuilder;
use super::config::Config;
use super::registry::{Entry, Registry};
use crate::error::{panic_message, ScopeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;
use crate::tasks::{
    CancelCause, CauseCell, ContextMap, StateCell, TaskContext, TaskHandle, TaskId, TaskState,
};

/// Lifecycle phase of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePhase {
    /// Accepting submissions.
    Open,
    /// The exit coordinator is cancelling and draining.
    Closing,
    /// The exit protocol finished.
    Closed,
}

/// Per-submission options: diagnostic name and exit-cancellation flag.
///
/// ## Example
/// ```
/// use taskscope::SubmitOptions;
///
/// let opts = SubmitOptions::named("poller").with_cancel_on_exit(true);
/// # let _ = opts;
/// ```
#[derive(Clone, Debug, Default)]
pub struct SubmitOptions {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) cancel_on_exit: bool,
}

impl SubmitOptions {
    /// Anonymous task, `cancel_on_exit = false`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the task (for events and failure reports).
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: Some(name.into()),
            cancel_on_exit: false,
        }
    }

    /// Whether the closing scope should cancel this task.
    ///
    /// Fixed at submission; it fully determines exit-time treatment.
    pub fn with_cancel_on_exit(mut self, cancel_on_exit: bool) -> Self {
        self.cancel_on_exit = cancel_on_exit;
        self
    }
}

/// State shared by all clones of a scope.
pub(crate) struct Shared {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) registry: Arc<Registry>,
    pub(crate) context: ContextMap,
    pub(crate) next_id: AtomicU64,
    /// Keeps the subscriber workers' queues alive for the scope's lifetime.
    pub(crate) _subs: Option<Arc<SubscriberSet>>,
}

/// # Bounded lifetime for background tasks.
///
/// Cheap to clone; every clone submits into the same registry. Closing any
/// clone runs the exit protocol exactly once — later submissions on other
/// clones are rejected with [`ScopeError::ScopeClosed`].
///
/// Prefer the scoped-acquisition forms ([`scoped`] or [`Scope::run`]),
/// which guarantee the exit coordinator runs on both the success and the
/// error path of the body.
///
/// ## Example
/// ```
/// use taskscope::{scoped, TaskError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), taskscope::ScopeError> {
/// scoped(|scope| async move {
///     let double = scope.submit(|_ctx| async move { Ok::<_, TaskError>(21 * 2) })?;
///     assert_eq!(double.join().await.unwrap(), 42);
///     Ok(())
/// })
/// .await
/// # }
/// ```
#[derive(Clone)]
pub struct Scope {
    shared: Arc<Shared>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// Creates a scope with default [`Config`] and no subscribers.
    pub fn new() -> Self {
        ScopeBuilder::new(Config::default()).build()
    }

    /// Starts building a scope with the given configuration.
    pub fn builder(cfg: Config) -> ScopeBuilder {
        ScopeBuilder::new(cfg)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Submits an anonymous unit of work (`cancel_on_exit = false`).
    ///
    /// See [`Scope::submit_with`].
    pub fn submit<F, Fut, T>(&self, work: F) -> Result<TaskHandle<T>, ScopeError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with(SubmitOptions::new(), work)
    }

    /// Submits a unit of work for immediate concurrent execution.
    ///
    /// `work` is invoked eagerly with the task's [`TaskContext`] (which
    /// carries the values frozen from [`Scope::context`] at this instant);
    /// the resulting future is registered and then spawned. Never blocks or
    /// suspends; must be called within a tokio runtime.
    ///
    /// ## Errors
    /// - [`ScopeError::ScopeClosed`] once the scope began closing;
    /// - [`ScopeError::DuplicateTask`] on a registry invariant violation
    ///   (a supervisor bug, not caller misuse).
    pub fn submit_with<F, Fut, T>(
        &self,
        opts: SubmitOptions,
        work: F,
    ) -> Result<TaskHandle<T>, ScopeError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = match &opts.name {
            Some(name) => Arc::from(name.as_ref()),
            None => Arc::from(format!("task-{id}").as_str()),
        };
        let cancel = CancellationToken::new();
        let cause: CauseCell = Arc::new(OnceLock::new());
        let state = Arc::new(StateCell::new());

        let ctx = TaskContext {
            id,
            name: Arc::clone(&name),
            cancel: cancel.clone(),
            cause: Arc::clone(&cause),
            values: self.shared.context.snapshot(),
        };
        // Produce the future before registering, so a panicking constructor
        // cannot leak a registry entry the drain would wait on forever.
        let fut = work(ctx);

        let entry = Entry {
            name: Arc::clone(&name),
            cancel_on_exit: opts.cancel_on_exit,
            cancel,
            cause,
        };
        if let Err(err) = self.shared.registry.register(id, entry) {
            self.shared.bus.publish(
                Event::new(EventKind::SubmitRejected)
                    .with_task(Arc::clone(&name))
                    .with_id(id)
                    .with_reason(err.as_label()),
            );
            return Err(err);
        }
        self.shared.bus.publish(
            Event::new(EventKind::TaskSubmitted)
                .with_task(Arc::clone(&name))
                .with_id(id),
        );

        let join = tokio::spawn(supervise_unit(
            Arc::clone(&self.shared.registry),
            self.shared.bus.clone(),
            id,
            Arc::clone(&name),
            Arc::clone(&state),
            fut,
        ));
        Ok(TaskHandle::new(id, name, state, join))
    }

    /// Runs `body` with a clone of this scope, then closes it.
    ///
    /// The exit coordinator runs on both paths:
    /// - body `Ok(value)` → close normally; the first genuine task failure
    ///   (if any) is returned instead of `value`;
    /// - body `Err(e)` → close with failure suppression; the caller
    ///   observes exactly `e`.
    pub async fn run<F, Fut, T, E>(self, body: F) -> Result<T, E>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ScopeError>,
    {
        match body(self.clone()).await {
            Ok(value) => match self.close().await {
                Ok(()) => Ok(value),
                Err(err) => Err(E::from(err)),
            },
            Err(err) => {
                self.close_on_error().await;
                Err(err)
            }
        }
    }

    /// Closes the scope: cancels exit-bound tasks, drains the rest, and
    /// re-raises the first genuine failure (submission order).
    ///
    /// Idempotent across clones — only the first close runs the protocol;
    /// later calls return `Ok(())` immediately.
    ///
    /// The protocol runs inside a spawned task: dropping this future does
    /// not abort the drain.
    pub async fn close(self) -> Result<(), ScopeError> {
        shielded_close(&self.shared, false).await
    }

    /// Closes the scope while the caller's own error is already in flight:
    /// drains everything but suppresses task failures, so the original
    /// error propagates alone.
    pub async fn close_on_error(self) {
        let _ = shielded_close(&self.shared, true).await;
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ScopePhase {
        self.shared.registry.phase()
    }

    /// Number of tasks not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.shared.registry.active()
    }

    /// The scope's mutable context. Values set here are frozen into each
    /// task at submission time.
    pub fn context(&self) -> &ContextMap {
        &self.shared.context
    }

    /// The scope's event bus; subscribe for raw event access.
    pub fn bus(&self) -> &Bus {
        &self.shared.bus
    }

    /// The configuration the scope was built with.
    pub fn config(&self) -> &Config {
        &self.shared.cfg
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("phase", &self.phase())
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

/// Last-resort cleanup when a scope is abandoned without closing: cancel
/// exit-bound tasks and, when a runtime is available, drain detached.
impl Drop for Shared {
    fn drop(&mut self) {
        let Some(snapshot) = self.registry.begin_close() else {
            return;
        };
        for entry in &snapshot {
            if entry.cancel_on_exit {
                let _ = entry.cause.set(CancelCause::ScopeExit);
                entry.cancel.cancel();
            }
        }
        let registry = Arc::clone(&self.registry);
        let ids: Vec<TaskId> = snapshot.iter().map(|e| e.id).collect();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.wait_idle(&ids).await;
                registry.finish_close();
            });
        } else {
            registry.finish_close();
        }
    }
}

/// Opens a default scope, runs `body` with it, and closes it on every exit
/// path. The scoped-acquisition form of [`Scope::run`].
pub async fn scoped<F, Fut, T, E>(body: F) -> Result<T, E>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ScopeError>,
{
    Scope::new().run(body).await
}

/// Supervises one spawned unit of work: tracks its state, contains panics,
/// and reports the outcome to the registry exactly once.
async fn supervise_unit<T, Fut>(
    registry: Arc<Registry>,
    bus: Bus,
    id: TaskId,
    name: Arc<str>,
    state: Arc<StateCell>,
    fut: Fut,
) -> Result<T, TaskError>
where
    Fut: Future<Output = Result<T, TaskError>>,
{
    state.set(TaskState::Running);
    bus.publish(Event::new(EventKind::TaskStarting).with_task(name).with_id(id));

    let started = Instant::now();
    let result = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked {
            reason: panic_message(payload.as_ref()),
        }),
    };

    let terminal = registry.on_completion(id, result.as_ref().err(), started.elapsed());
    state.set(terminal);
    result
}

/// Runs the exit protocol inside a spawned task and joins it, so the
/// protocol survives the closing caller being dropped.
async fn shielded_close(shared: &Arc<Shared>, suppress_failures: bool) -> Result<(), ScopeError> {
    let coordinator = tokio::spawn(coordinate(
        Arc::clone(&shared.registry),
        shared.bus.clone(),
        suppress_failures,
    ));
    match coordinator.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        // The runtime is shutting down; there is nothing left to report.
        Err(_) => Ok(()),
    }
}

/// The exit coordinator: Cancelling → Draining → Closed.
async fn coordinate(
    registry: Arc<Registry>,
    bus: Bus,
    suppress_failures: bool,
) -> Result<(), ScopeError> {
    let Some(snapshot) = registry.begin_close() else {
        return Ok(());
    };
    bus.publish(Event::new(EventKind::ScopeClosing));

    // Cancelling: every request is issued before the drain begins. The
    // cause is set first so a task waking from cancellation can already
    // observe it.
    for entry in &snapshot {
        if entry.cancel_on_exit {
            let _ = entry.cause.set(CancelCause::ScopeExit);
            entry.cancel.cancel();
        }
    }

    // Draining: wait on the fixed snapshot; completions of cancelled and
    // naturally-running tasks may arrive in any order.
    if !snapshot.is_empty() {
        let ids: Vec<TaskId> = snapshot.iter().map(|e| e.id).collect();
        registry.wait_idle(&ids).await;
    }
    bus.publish(Event::new(EventKind::ScopeDrained));
    registry.finish_close();

    if suppress_failures {
        bus.publish(Event::new(EventKind::ScopeClosed));
        return Ok(());
    }
    match registry.first_failure() {
        Some(found) => {
            bus.publish(
                Event::new(EventKind::ScopeClosed)
                    .with_task(Arc::clone(&found.task))
                    .with_reason(found.error.to_string()),
            );
            Err(ScopeError::TaskFailed {
                task: found.task.to_string(),
                source: found.error,
            })
        }
        None => {
            bus.publish(Event::new(EventKind::ScopeClosed));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_options_defaults() {
        let opts = SubmitOptions::new();
        assert!(opts.name.is_none());
        assert!(!opts.cancel_on_exit);

        let opts = SubmitOptions::named("n").with_cancel_on_exit(true);
        assert_eq!(opts.name.as_deref(), Some("n"));
        assert!(opts.cancel_on_exit);
    }

    #[test]
    fn fresh_scope_is_open_and_empty() {
        let scope = Scope::new();
        assert_eq!(scope.phase(), ScopePhase::Open);
        assert_eq!(scope.active_tasks(), 0);
    }
}
