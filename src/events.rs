//! Observer Event Stream
//!
//! Best-effort broadcast of core happenings for dashboards and tooling.
//! Publishing is lossy by contract: the core never blocks on observers, and
//! a slow subscriber only loses its own backlog.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::types::{EngineId, ThoughtId};

/// Default ring capacity per subscriber
const EVENT_CAPACITY: usize = 256;

/// Events published by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CoreEvent {
    /// A thought passed validation and entered working memory
    ThoughtCommitted {
        cycle: u64,
        step: u8,
        engine_id: EngineId,
        thought_id: ThoughtId,
        content_summary: String,
        importance: f32,
        valence: f32,
    },

    /// The step counter wrapped back to zero
    CycleBoundary { cycle: u64 },

    /// Fatigue crossed the rest threshold (advisory, not enforced)
    RestRecommended { fatigue: f32 },

    /// An engine errored twice this cycle and is skipped on non-pivotal steps
    EngineDegraded { engine_id: EngineId, cycle: u64 },

    /// A persistence task exhausted its retries
    PersistenceDeadLetter { thought_id: ThoughtId, reason: String },

    /// An engine asked for consolidation practice on a topic
    PracticeRequested { engine_id: EngineId, topic: String },
}

/// Lossy broadcast bus for [`CoreEvent`]
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; drops it silently when nobody listens
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to the event stream
    ///
    /// Receivers that fall behind see `RecvError::Lagged` and keep going;
    /// the publisher is never slowed down.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(CoreEvent::CycleBoundary { cycle: 1 });
        assert_eq!(rx.recv().await.unwrap(), CoreEvent::CycleBoundary { cycle: 1 });
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        // Must not panic or block
        bus.publish(CoreEvent::RestRecommended { fatigue: 0.9 });
    }

    #[tokio::test]
    async fn subscribers_are_independent() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(CoreEvent::CycleBoundary { cycle: 7 });
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
