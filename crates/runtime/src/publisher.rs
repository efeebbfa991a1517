use kestrel_core::EntityId;
use tokio::sync::broadcast;

/// An event that is durably in the log
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedEvent<E> {
    pub entity_id: EntityId,
    pub sequence: u64,
    pub event: E,
}

/// Broadcast-based publisher of committed events
///
/// Slow subscribers lag and lose events; the log stays the source of truth.
pub struct EventPublisher<E> {
    tx: broadcast::Sender<CommittedEvent<E>>,
}

impl<E: Clone> EventPublisher<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommittedEvent<E>> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CommittedEvent<E>) {
        // Non-blocking send, ignore errors (no subscribers)
        let _ = self.tx.send(event);
    }
}

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
