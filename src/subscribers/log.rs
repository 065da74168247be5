//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints events to stdout in a human-readable format.
//!
//! ## Output format
//! ```text
//! [submitted] task=worker id=1
//! [starting] task=worker id=1
//! [failed] task=worker id=1 err="connection refused" elapsed_ms=12
//! [cancelled] task=watcher id=2 elapsed_ms=110
//! [scope-closing]
//! [scope-drained]
//! [scope-closed]
//! ```

use async_trait::async_trait;

use super::Subscribe;
use crate::events::{Event, EventKind};

/// Simple stdout logging subscriber.
///
/// Enabled via the `logging` feature. Intended for development and demos;
/// implement a custom [`Subscribe`] for structured logging or metrics.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("?");
        match e.kind {
            EventKind::TaskSubmitted => {
                println!("[submitted] task={task} id={:?}", e.id);
            }
            EventKind::TaskStarting => {
                println!("[starting] task={task} id={:?}", e.id);
            }
            EventKind::TaskSucceeded => {
                println!("[succeeded] task={task} elapsed_ms={:?}", e.elapsed_ms);
            }
            EventKind::TaskFailed => {
                println!(
                    "[failed] task={task} err={:?} elapsed_ms={:?}",
                    e.reason, e.elapsed_ms
                );
            }
            EventKind::TaskInterrupted => {
                println!("[interrupted] task={task} elapsed_ms={:?}", e.elapsed_ms);
            }
            EventKind::TaskCancelled => {
                println!("[cancelled] task={task} elapsed_ms={:?}", e.elapsed_ms);
            }
            EventKind::SubmitRejected => {
                println!("[rejected] task={task} reason={:?}", e.reason);
            }
            EventKind::ScopeClosing => {
                println!("[scope-closing]");
            }
            EventKind::ScopeDrained => {
                println!("[scope-drained]");
            }
            EventKind::ScopeClosed => match &e.reason {
                Some(reason) => println!("[scope-closed] first_failure={reason:?}"),
                None => println!("[scope-closed]"),
            },
            EventKind::SubscriberOverflow => {
                println!("[subscriber-overflow] subscriber={task} reason={:?}", e.reason);
            }
            EventKind::SubscriberPanicked => {
                println!("[subscriber-panic] subscriber={task} info={:?}", e.reason);
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
