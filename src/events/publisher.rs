use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{EventError, EventSink, ExecutionEvent};
use crate::constants::defaults;

/// Broadcast publisher for execution events
///
/// Publishing never blocks: slow subscribers lag and lose the oldest events instead of
/// holding up the engine.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ExecutionEvent>,
    published: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EventPublisherStats {
    pub published: u64,
    pub subscribers: usize,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.published.load(Ordering::Acquire),
            subscribers: self.subscriber_count(),
        }
    }
}

impl EventSink for EventPublisher {
    fn publish(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.published.fetch_add(1, Ordering::AcqRel);
        // No subscribers is not an error; events are published whether or not anyone listens.
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(defaults::EVENT_CHANNEL_CAPACITY)
    }
}
