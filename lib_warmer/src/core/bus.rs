//! # Warming Event Bus
//!
//! Two channels with one publish call. The *pipeline* is an unbounded MPSC
//! feeding the single lifecycle consumer; it is the engine's source of truth
//! and must never lose an event. The *tap* is a bounded broadcast mirror for
//! outside observers; a slow observer lags (drops its oldest events) without
//! ever slowing the pipeline down.
//!
//! The pipeline can stay unbounded because the consumer also publishes into
//! it while handling events; a bounded channel would let the consumer block
//! on itself.

use tokio::sync::{broadcast, mpsc};

use super::events::WarmEvent;

/// Cloneable publishing handle onto the warming bus.
#[derive(Clone)]
pub struct EventBus {
    pipeline: mpsc::UnboundedSender<WarmEvent>,
    tap: broadcast::Sender<WarmEvent>,
}

impl EventBus {
    /// Creates the bus and hands back the pipeline receiver.
    ///
    /// The receiver must be owned by exactly one consumer; every handle
    /// cloned from the returned bus publishes into it.
    pub fn new(tap_capacity: usize) -> (Self, mpsc::UnboundedReceiver<WarmEvent>) {
        let (pipeline, receiver) = mpsc::unbounded_channel();
        let (tap, _) = broadcast::channel(tap_capacity.max(1));
        (Self { pipeline, tap }, receiver)
    }

    /// Publishes an event onto the pipeline and mirrors it to observers.
    pub fn publish(&self, event: WarmEvent) {
        // Errors on the tap just mean nobody is observing right now.
        let _ = self.tap.send(event.clone());
        if self.pipeline.send(event).is_err() {
            log::debug!("Event dropped: lifecycle consumer is gone");
        }
    }

    /// Opens a new observer stream.
    ///
    /// Observers only see events published after they subscribe, and receive
    /// `RecvError::Lagged` when they fall more than the tap capacity behind.
    pub fn observe(&self) -> broadcast::Receiver<WarmEvent> {
        self.tap.subscribe()
    }
}
