//! # Scope runtime configuration.
//!
//! [`Config`] centralizes the settings a [`Scope`](crate::Scope) is built
//! with. Deliberately small: this core imposes no global timeout and no
//! concurrency cap — cancellation is cooperative and the drain waits as
//! long as tasks take to finish.

/// Configuration for a scope.
///
/// ## Field semantics
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by the
///   bus). Slow subscribers lagging behind more than `bus_capacity` events
///   skip the oldest ones.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Config {
    /// Returns the bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration: `bus_capacity = 1024`.
    fn default() -> Self {
        Self { bus_capacity: 1024 }
    }
}
