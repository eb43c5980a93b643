//! # Warmer Facade
//!
//! The host-facing handle over the warming engine. Constructing a [`Warmer`]
//! wires the bus, the registry and the lifecycle consumer together and
//! spawns the consumer; from then on the host interacts through three
//! verbs: *report* a completed call, *stop* warming a key, *observe* the
//! event stream. Everything else happens inside the engine.
//!
//! A warmer can also be started from a registry snapshot taken in a
//! previous run, re-attaching executors by their persisted route strings.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::bus::EventBus;
use super::events::{ExecuteReport, WarmEvent};
use super::lifecycle::LifecycleManager;
use super::registry::{Registry, RegistrySnapshot};
use crate::configs::options::WarmerOptions;
use crate::retrieve::executor::{ExecuteOutcome, Executor, ExecutorResolver, WarmRequest};
use crate::utils::fingerprint::Fingerprint;

/// # Warmer
///
/// Demand-driven cache warming coordinator. Owns the engine tasks; dropping
/// the warmer without calling [`Warmer::shutdown`] leaves the consumer
/// running until the process exits, so long-lived hosts should shut it down
/// explicitly.
pub struct Warmer {
    bus: EventBus,
    registry: Arc<Registry>,
    options: WarmerOptions,
    shutdown: CancellationToken,
    lifecycle: JoinHandle<()>,
}

impl Warmer {
    /// Starts an empty warming engine.
    ///
    /// Must be called from within a Tokio runtime; the lifecycle consumer
    /// is spawned immediately.
    pub fn new(options: WarmerOptions) -> Self {
        Self::start(options, None)
    }

    /// Starts the engine from a persisted registry snapshot.
    ///
    /// Every restored entry resumes exactly where it left off: failure
    /// counts and group linkage survive, roots get their warm-up timers
    /// back, and each key starts a fresh idle window. Entries whose route
    /// the resolver does not recognize are dropped with a warning.
    pub fn with_snapshot(
        options: WarmerOptions,
        snapshot: RegistrySnapshot,
        resolver: &dyn ExecutorResolver,
    ) -> Self {
        Self::start(options, Some((snapshot, resolver)))
    }

    fn start(
        options: WarmerOptions,
        seed: Option<(RegistrySnapshot, &dyn ExecutorResolver)>,
    ) -> Self {
        let options = options.normalized();
        let (bus, receiver) = EventBus::new(options.event_tap_capacity);
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();

        let mut manager = LifecycleManager::new(
            Arc::clone(&registry),
            bus.clone(),
            options.clone(),
            shutdown.clone(),
        );
        if let Some((snapshot, resolver)) = seed {
            manager.seed(snapshot, resolver);
        }
        let lifecycle = tokio::spawn(manager.run(receiver));

        Self {
            bus,
            registry,
            options,
            shutdown,
            lifecycle,
        }
    }

    /// Reports a completed upstream call for warming.
    ///
    /// Returns the fingerprint of `request`, the handle callers keep to
    /// stop warming later. For batched outcomes each sub-request is
    /// additionally addressable by its own fingerprint.
    pub fn report(
        &self,
        request: WarmRequest,
        executor: Arc<dyn Executor>,
        outcome: &ExecuteOutcome,
    ) -> Fingerprint {
        let key = request.fingerprint();
        self.bus.publish(WarmEvent::Execute(ExecuteReport::from_outcome(
            request, executor, outcome,
        )));
        key
    }

    /// Stops warming a key: the subscription is removed and, for group
    /// members, the member leaves its group.
    pub fn stop_warming(&self, key: &Fingerprint) {
        self.bus.publish(WarmEvent::Unsubscribe { key: key.clone() });
    }

    /// Opens an observer stream over everything the engine does.
    ///
    /// Observers see events published after they subscribe; falling behind
    /// by more than the configured tap capacity skips the oldest events.
    pub fn events(&self) -> broadcast::Receiver<WarmEvent> {
        self.bus.observe()
    }

    /// Serializable copy of the current registry state.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// The normalized options the engine runs with.
    pub fn options(&self) -> &WarmerOptions {
        &self.options
    }

    /// Stops the engine: cancels every timer, clears the registry and waits
    /// for the lifecycle consumer to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.lifecycle.await {
            log::warn!("Lifecycle task ended abnormally: {}", error);
        }
    }
}
