//! # Builder for constructing a [`Scope`].
//!
//! Wires the runtime components together: event bus, registry, optional
//! subscriber fan-out, and the scope's seed context.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use super::config::Config;
use super::registry::Registry;
use super::scope::{Scope, Shared};
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::ContextMap;

/// Builder for a [`Scope`].
///
/// ## Example
/// ```
/// use taskscope::{Config, ContextMap, Scope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = ContextMap::new();
/// context.set("tenant", String::from("acme"));
///
/// let scope = Scope::builder(Config::default())
///     .with_context(context)
///     .build();
/// scope.close().await.unwrap();
/// # }
/// ```
pub struct ScopeBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    context: ContextMap,
}

impl ScopeBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            context: ContextMap::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events through dedicated workers with
    /// bounded queues; see [`SubscriberSet`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Seeds the scope's context. Values can still be mutated later via
    /// [`Scope::context`]; each submission freezes the then-current state.
    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    /// Builds the scope.
    ///
    /// When subscribers are present, this spawns the fan-out listener and
    /// must therefore run within a tokio runtime; without subscribers no
    /// task is spawned here.
    pub fn build(self) -> Scope {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let registry = Arc::new(Registry::new(bus.clone()));

        let subs = if self.subscribers.is_empty() {
            None
        } else {
            let set = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
            Self::spawn_listener(&bus, Arc::clone(&set));
            Some(set)
        };

        Scope::from_shared(Arc::new(Shared {
            cfg: self.cfg,
            bus,
            registry,
            context: self.context,
            next_id: AtomicU64::new(1),
            _subs: subs,
        }))
    }

    /// Subscribes to the bus and forwards events to the subscriber set
    /// (fire-and-forget). Exits when every bus sender is gone.
    fn spawn_listener(bus: &Bus, set: Arc<SubscriberSet>) {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }
}
