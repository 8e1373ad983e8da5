//! Broadcast bus carrying `ResilienceEvent`s out of the orchestrator.
//!
//! Every retry, breaker transition, fallback hop and dead letter is published
//! here in the order the orchestrator decided it. Subscribers only see events
//! published after they subscribe; publishing with none attached drops the
//! event. A subscriber that falls more than the channel capacity behind gets
//! `RecvError::Lagged` and loses the oldest events.

use bulwark_types::event::ResilienceEvent;
use tokio::sync::broadcast;

/// Default channel capacity for an orchestrator's bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Multi-consumer bus for retry, breaker and fallback decisions.
pub struct EventBus {
    sender: broadcast::Sender<ResilienceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ResilienceEvent) {
        tracing::trace!(node_id = event.node_id(), ?event, "resilience event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
