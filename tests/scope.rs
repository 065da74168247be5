//! End-to-end properties of the scope exit protocol.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, timeout};

use taskscope::{
    scoped, CancelCause, Config, Event, EventKind, Scope, ScopeError, ScopePhase, SubmitOptions,
    Subscribe, TaskError, TaskState,
};

#[tokio::test]
async fn flagged_tasks_are_cancelled_on_close() {
    let scope = Scope::new();
    let handle = scope
        .submit_with(
            SubmitOptions::named("flagged").with_cancel_on_exit(true),
            |ctx| async move {
                ctx.cancelled().await;
                Err::<(), _>(TaskError::Canceled)
            },
        )
        .unwrap();

    scope.close().await.expect("scope-exit cancellation is not an error");

    assert_eq!(handle.state(), TaskState::Cancelled);
    assert_eq!(handle.join().await, Err(TaskError::Canceled));
}

#[tokio::test(start_paused = true)]
async fn unflagged_tasks_are_drained_not_abandoned() {
    let scope = Scope::new();
    let finished = Arc::new(AtomicBool::new(false));

    let handle = scope
        .submit({
            let finished = Arc::clone(&finished);
            move |_ctx| async move {
                time::sleep(Duration::from_millis(200)).await;
                finished.store(true, Ordering::SeqCst);
                Ok::<_, TaskError>(())
            }
        })
        .unwrap();

    scope.close().await.unwrap();

    assert!(finished.load(Ordering::SeqCst), "close returned before the task finished");
    assert!(handle.is_finished());
    assert_eq!(handle.state(), TaskState::Succeeded);
}

#[tokio::test]
async fn interruption_signal_never_raises_at_close() {
    let scope = Scope::new();
    let handle = scope
        .submit(|_ctx| async move { Err::<(), _>(TaskError::Interrupted) })
        .unwrap();

    scope.close().await.expect("interruption is control flow, not an error");

    assert_eq!(handle.state(), TaskState::Interrupted);
    // Removal from the registry does not erase the outcome.
    assert_eq!(handle.join().await, Err(TaskError::Interrupted));
}

#[derive(Debug, PartialEq)]
enum BodyError {
    Boom,
    Scope(String),
}

impl From<ScopeError> for BodyError {
    fn from(err: ScopeError) -> Self {
        BodyError::Scope(err.to_string())
    }
}

#[tokio::test]
async fn body_error_suppresses_task_failures() {
    let result: Result<(), BodyError> = scoped(|scope| async move {
        scope.submit(|_ctx| async move { Err::<(), _>(TaskError::fail("task boom")) })?;
        Err(BodyError::Boom)
    })
    .await;

    // The caller observes exactly the body's error, not the task failure.
    assert_eq!(result, Err(BodyError::Boom));
}

#[tokio::test]
async fn clean_exit_reraises_single_task_failure() {
    let result: Result<(), ScopeError> = scoped(|scope| async move {
        scope.submit(|_ctx| async move { Ok::<_, TaskError>(()) })?;
        scope.submit_with(SubmitOptions::named("fragile"), |_ctx| async move {
            Err::<(), _>(TaskError::fail("disk full"))
        })?;
        Ok(())
    })
    .await;

    match result {
        Err(ScopeError::TaskFailed { task, source }) => {
            assert_eq!(task, "fragile");
            assert_eq!(source, TaskError::fail("disk full"));
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn first_failure_wins_by_submission_order() {
    let gate = Arc::new(Notify::new());
    let gate_first = Arc::clone(&gate);
    let gate_second = Arc::clone(&gate);

    let result: Result<(), ScopeError> = scoped(move |scope| async move {
        // Submitted first, fails last (waits until the other one failed).
        scope.submit_with(SubmitOptions::named("first"), move |_ctx| async move {
            gate_first.notified().await;
            Err::<(), _>(TaskError::fail("failed last"))
        })?;
        scope.submit_with(SubmitOptions::named("second"), move |_ctx| async move {
            gate_second.notify_one();
            Err::<(), _>(TaskError::fail("failed first"))
        })?;
        Ok(())
    })
    .await;

    match result {
        Err(ScopeError::TaskFailed { task, source }) => {
            assert_eq!(task, "first", "tie-break is submission order, not completion order");
            assert_eq!(source, TaskError::fail("failed last"));
        }
        other => panic!("expected the first-submitted failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn drain_is_shielded_from_outer_cancellation() {
    let scope = Scope::new();
    let watcher = scope.clone();
    let release = Arc::new(Notify::new());
    let done = Arc::new(AtomicBool::new(false));

    let handle = scope
        .submit_with(SubmitOptions::named("slow").with_cancel_on_exit(true), {
            let release = Arc::clone(&release);
            let done = Arc::clone(&done);
            move |ctx| async move {
                ctx.cancelled().await;
                release.notified().await;
                done.store(true, Ordering::SeqCst);
                Err::<(), _>(TaskError::Canceled)
            }
        })
        .unwrap();

    let mut close_fut = Box::pin(scope.close());
    tokio::select! {
        _ = &mut close_fut => panic!("close cannot finish while the task holds the drain"),
        _ = time::sleep(Duration::from_millis(10)) => {}
    }
    timeout(Duration::from_secs(5), async {
        while watcher.phase() != ScopePhase::Closing {
            time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("coordinator entered the exit protocol");
    assert!(!done.load(Ordering::SeqCst));

    // The closing caller is torn down mid-drain...
    drop(close_fut);

    // ...yet the coordinator drains to completion and resolves the scope.
    release.notify_one();
    timeout(Duration::from_secs(5), async {
        while watcher.phase() != ScopePhase::Closed {
            time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("shielded drain ran to completion");

    assert_eq!(watcher.active_tasks(), 0);
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(handle.join().await, Err(TaskError::Canceled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_leaked_entries_after_close() {
    let scope = Scope::new();
    let observer = scope.clone();

    scope
        .submit(|_ctx| async move { Ok::<_, TaskError>(()) })
        .unwrap();
    scope
        .submit(|_ctx| async move { Err::<(), _>(TaskError::Interrupted) })
        .unwrap();
    scope
        .submit(|_ctx| async move { Err::<(), _>(TaskError::fail("boom")) })
        .unwrap();
    scope
        .submit_with(
            SubmitOptions::named("flagged").with_cancel_on_exit(true),
            |ctx| async move {
                ctx.cancelled().await;
                Err::<(), _>(TaskError::Canceled)
            },
        )
        .unwrap();

    let result = scope.close().await;

    assert!(matches!(result, Err(ScopeError::TaskFailed { .. })));
    assert_eq!(observer.active_tasks(), 0);
    assert_eq!(observer.phase(), ScopePhase::Closed);
}

#[tokio::test]
async fn submit_after_close_is_rejected() {
    let scope = Scope::new();
    let keeper = scope.clone();

    scope.close().await.unwrap();

    let err = keeper
        .submit(|_ctx| async move { Ok::<_, TaskError>(()) })
        .unwrap_err();
    assert!(matches!(err, ScopeError::ScopeClosed));
    assert_eq!(keeper.phase(), ScopePhase::Closed);
}

#[tokio::test]
async fn context_is_frozen_at_submission() {
    let scope = Scope::new();
    scope.context().set("attempt", 1_u32);

    let gate = Arc::new(Notify::new());
    let gate_task = Arc::clone(&gate);
    let handle = scope
        .submit(move |ctx| async move {
            gate_task.notified().await;
            Ok::<_, TaskError>(ctx.values().get::<u32>("attempt").copied())
        })
        .unwrap();

    // Mutations after submission must not leak into the running task.
    scope.context().set("attempt", 2_u32);
    gate.notify_one();

    assert_eq!(handle.join().await.unwrap(), Some(1));
    scope.close().await.unwrap();
}

#[tokio::test]
async fn exit_cancellation_carries_scope_exit_cause() {
    let scope = Scope::new();
    let handle = scope
        .submit_with(
            SubmitOptions::named("flagged").with_cancel_on_exit(true),
            |ctx| async move {
                ctx.cancelled().await;
                // Suppress the cancellation; report the observed cause.
                Ok::<_, TaskError>(ctx.cancel_cause())
            },
        )
        .unwrap();

    scope.close().await.unwrap();

    assert_eq!(handle.join().await.unwrap(), Some(CancelCause::ScopeExit));
}

#[tokio::test]
#[allow(unreachable_code)]
async fn panics_are_contained_and_reported() {
    let scope = Scope::new();
    let handle = scope
        .submit_with(SubmitOptions::named("bomb"), |_ctx| async move {
            panic!("kaboom");
            Ok::<_, TaskError>(())
        })
        .unwrap();

    let result = scope.close().await;
    match result {
        Err(ScopeError::TaskFailed { task, source }) => {
            assert_eq!(task, "bomb");
            assert!(matches!(source, TaskError::Panicked { .. }));
        }
        other => panic!("expected a contained panic, got {other:?}"),
    }
    assert!(matches!(handle.join().await, Err(TaskError::Panicked { .. })));
}

#[tokio::test]
async fn scoped_returns_body_value_on_clean_exit() {
    let value: Result<u32, ScopeError> = scoped(|scope| async move {
        let forty = scope.submit(|_ctx| async move { Ok::<_, TaskError>(40) })?;
        Ok(forty.join().await.unwrap() + 2)
    })
    .await;

    assert_eq!(value.unwrap(), 42);
}

#[tokio::test]
async fn events_follow_the_lifecycle() {
    let scope = Scope::new();
    let mut rx = scope.bus().subscribe();

    let handle = scope
        .submit_with(SubmitOptions::named("one"), |_ctx| async move {
            Ok::<_, TaskError>(())
        })
        .unwrap();
    handle.join().await.unwrap();
    scope.close().await.unwrap();

    let mut kinds = Vec::new();
    loop {
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Ok(ev)) => {
                kinds.push(ev.kind);
                if ev.kind == EventKind::ScopeClosed {
                    break;
                }
            }
            _ => break,
        }
    }

    assert_eq!(
        kinds,
        vec![
            EventKind::TaskSubmitted,
            EventKind::TaskStarting,
            EventKind::TaskSucceeded,
            EventKind::ScopeClosing,
            EventKind::ScopeDrained,
            EventKind::ScopeClosed,
        ]
    );
}

struct Recorder {
    cancelled: AtomicUsize,
}

#[async_trait::async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        if event.kind == EventKind::TaskCancelled {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn subscribers_receive_fanned_out_events() {
    let recorder = Arc::new(Recorder {
        cancelled: AtomicUsize::new(0),
    });
    let scope = Scope::builder(Config::default())
        .with_subscribers(vec![Arc::clone(&recorder) as Arc<dyn Subscribe>])
        .build();

    scope
        .submit_with(
            SubmitOptions::named("flagged").with_cancel_on_exit(true),
            |ctx| async move {
                ctx.cancelled().await;
                Err::<(), _>(TaskError::Canceled)
            },
        )
        .unwrap();
    scope.close().await.unwrap();

    // Fan-out is fire-and-forget; give the worker a chance to run.
    timeout(Duration::from_secs(1), async {
        while recorder.cancelled.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("subscriber observed the cancellation");
}
