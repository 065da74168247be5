//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] — classification and payload metadata;
//! - [`Bus`] — thin wrapper over `tokio::sync::broadcast`.
//!
//! ## Quick reference
//! - **Publishers**: `Scope` (submission, rejection, phase transitions),
//!   `Registry` (terminal task states), task wrappers (start),
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the scope's subscriber listener (fans out to the
//!   [`SubscriberSet`](crate::SubscriberSet)) and anyone holding a
//!   [`Bus::subscribe`] receiver.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
