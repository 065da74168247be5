//! Exit-bound cancellation and the interruption signal, observed through
//! the built-in LogWriter subscriber.
//!
//! Run with: `cargo run --example cancel_on_exit --features logging`

use std::sync::Arc;
use std::time::Duration;

use taskscope::{Config, LogWriter, Scope, Subscribe, SubmitOptions, TaskError};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), taskscope::ScopeError> {
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let scope = Scope::builder(Config::default())
        .with_subscribers(subs)
        .build();

    scope
        .run(|scope| async move {
            // Runs until the closing scope cancels it.
            scope.submit_with(
                SubmitOptions::named("watcher").with_cancel_on_exit(true),
                |ctx| async move {
                    ctx.cancelled().await;
                    println!("watcher: stopped by {:?}", ctx.cancel_cause());
                    Err::<(), _>(TaskError::Canceled)
                },
            )?;

            // Stops itself with the interruption signal; not an error.
            scope.submit_with(SubmitOptions::named("short"), |_ctx| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err::<(), _>(TaskError::Interrupted)
            })?;

            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(())
        })
        .await
}
