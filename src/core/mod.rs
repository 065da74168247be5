//! Runtime core: submission, tracking, and the exit protocol.
//!
//! Internal modules:
//! - [`registry`]: the single shared mutable structure (phase + in-flight
//!   tasks + failure ledger) and the drain wait;
//! - [`scope`]: the [`Scope`] submission interface and exit coordinator;
//! - [`builder`]: wires bus, registry, and subscribers together;
//! - [`config`]: central runtime settings.

mod builder;
mod config;
mod registry;
mod scope;

pub use builder::ScopeBuilder;
pub use config::Config;
pub use scope::{scoped, Scope, ScopePhase, SubmitOptions};
