//! # Executor Runner
//!
//! Answers `Requested` ticks by replaying the subscription's origin against
//! its executor, cache bypassed. Each invocation runs as its own spawned
//! task so a slow upstream call never stalls the event pipeline; the
//! completion comes back as an ordinary `Fulfilled`/`Failed` event and
//! serializes through the lifecycle consumer like everything else.
//!
//! A tick for a key that is no longer registered is the benign race where
//! the entry was evicted between the timer firing and the lookup; the tick
//! is dropped without complaint.

use std::sync::Arc;

use super::bus::EventBus;
use super::events::WarmEvent;
use super::registry::Registry;
use crate::retrieve::executor::CacheMode;
use crate::utils::fingerprint::Fingerprint;

/// Replays warm-up calls for scheduled ticks.
pub struct Runner {
    registry: Arc<Registry>,
    bus: EventBus,
}

impl Runner {
    /// Creates a runner reading subscriptions from `registry` and reporting
    /// completions onto `bus`.
    pub fn new(registry: Arc<Registry>, bus: EventBus) -> Self {
        Self { registry, bus }
    }

    /// Handles one warm-up tick for `key`.
    ///
    /// Looks the subscription up at dispatch time, so a tick raced by an
    /// eviction is a no-op. The executor call itself is spawned; dispatch
    /// returns immediately.
    pub fn dispatch(&self, key: &Fingerprint) {
        let Some(subscription) = self.registry.get(key) else {
            log::debug!("Requested tick for unknown key {}; dropping", key);
            return;
        };

        let bus = self.bus.clone();
        let key = key.clone();
        let origin = subscription.origin.clone();
        let executor = Arc::clone(&subscription.executor);
        tokio::spawn(async move {
            match executor.execute(origin, CacheMode::Bypass).await {
                Ok(_outcome) => {
                    bus.publish(WarmEvent::Fulfilled { key });
                }
                Err(error) => {
                    // Render the whole chain; the cause is usually in the
                    // source, not the top-level context.
                    bus.publish(WarmEvent::Failed {
                        key,
                        reason: format!("{:#}", error),
                    });
                }
            }
        });
    }
}
