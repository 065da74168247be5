//! Minimal usage: submit a couple of units of work, await them
//! independently, and let the scope drain on close.
//!
//! Run with: `cargo run --example basic`

use std::time::Duration;

use taskscope::{scoped, SubmitOptions, TaskError};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), taskscope::ScopeError> {
    scoped(|scope| async move {
        let sum = scope.submit(|_ctx| async move { Ok::<_, TaskError>(1 + 2) })?;

        let greeter = scope.submit_with(SubmitOptions::named("greeter"), |ctx| async move {
            println!("hello from {}", ctx.name());
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, TaskError>(())
        })?;

        println!("1 + 2 = {}", sum.join().await.expect("sum task"));
        greeter.join().await.expect("greeter task");
        println!("all tasks completed!");
        Ok(())
    })
    .await
}
