//! # Warm-up Scheduler
//!
//! One repeating timer per root subscription. Each timer is an independent
//! spawned task holding a [`CancellationToken`]; it emits a `Requested`
//! event immediately on start and then once per period until cancelled.
//! Timers never touch the registry themselves; the tick is just another
//! event for the lifecycle consumer to act on.
//!
//! Duplicate starts for a live key are ignored, which keeps the original
//! timer's phase: re-subscribing does not make refreshes arrive early or
//! late.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::bus::EventBus;
use super::events::WarmEvent;
use crate::utils::fingerprint::Fingerprint;

/// Owns the per-key warm-up timers. Driven only by the lifecycle consumer,
/// so it needs no interior locking.
pub struct Scheduler {
    timers: HashMap<Fingerprint, CancellationToken>,
    bus: EventBus,
}

impl Scheduler {
    /// Creates a scheduler publishing ticks onto the given bus.
    pub fn new(bus: EventBus) -> Self {
        Self {
            timers: HashMap::new(),
            bus,
        }
    }

    /// Whether a live timer exists for `key`.
    pub fn is_scheduled(&self, key: &Fingerprint) -> bool {
        self.timers.contains_key(key)
    }

    /// Number of live timers.
    pub fn active(&self) -> usize {
        self.timers.len()
    }

    /// Starts the repeating timer for `key`, first tick immediately.
    ///
    /// No-op when a timer for the key is already live.
    pub fn start(&mut self, key: Fingerprint, period: Duration) {
        if self.timers.contains_key(&key) {
            return;
        }

        let token = CancellationToken::new();
        self.timers.insert(key.clone(), token.clone());

        // A zero period would panic the interval; one millisecond is the
        // effective floor.
        let period = period.max(Duration::from_millis(1));
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    // If token is cancelled, the subscription was removed
                    _ = token.cancelled() => {
                        log::debug!("Warm-up timer cancelled for {}", key);
                        break;
                    },
                    _ = ticks.tick() => {
                        bus.publish(WarmEvent::Requested { key: key.clone() });
                    }
                }
            }
        });
    }

    /// Cancels the timer for `key`, if one is live.
    pub fn cancel(&mut self, key: &Fingerprint) {
        if let Some(token) = self.timers.remove(key) {
            token.cancel();
        }
    }

    /// Cancels every live timer.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.timers.drain() {
            token.cancel();
        }
    }
}
