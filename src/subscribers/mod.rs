//! Subscriber API: observe scope and task lifecycle events.
//!
//! ## Contents
//! - [`Subscribe`] — the handler trait;
//! - [`SubscriberSet`] — bounded-queue fan-out with panic isolation;
//! - [`LogWriter`] — stdout reference subscriber (feature `logging`).
//!
//! Subscribers are attached at build time via
//! [`ScopeBuilder::with_subscribers`](crate::ScopeBuilder::with_subscribers);
//! the scope forwards every bus event to the set, fire-and-forget. Events
//! may still be in flight inside subscriber queues when `close` returns.

mod set;
mod subscribe;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
mod log;
#[cfg(feature = "logging")]
pub use log::LogWriter;
