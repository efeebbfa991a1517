use async_trait::async_trait;
use futures_util::stream::BoxStream;
use kestrel_core::{EntityId, EventSourced};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LogError, LogResult};

/// One event as stored in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    /// Position in the entity's log, gapless from 1
    pub sequence: u64,
    pub event_type: String,
    pub payload: Value,
}

impl PersistedEvent {
    pub fn encode<A: EventSourced>(sequence: u64, event: &A::Event) -> LogResult<Self> {
        Ok(Self {
            sequence,
            event_type: A::event_name(event).to_string(),
            payload: serde_json::to_value(event)?,
        })
    }

    pub fn decode<A: EventSourced>(&self) -> LogResult<A::Event> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            LogError::Codec(format!(
                "event {} ({}): {e}",
                self.sequence, self.event_type
            ))
        })
    }
}

/// Serialized entity state as of `sequence`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub state: Value,
}

impl Snapshot {
    pub fn encode<A: EventSourced>(sequence: u64, state: &A) -> LogResult<Self> {
        Ok(Self {
            sequence,
            state: serde_json::to_value(state)?,
        })
    }

    pub fn decode<A: EventSourced>(&self) -> LogResult<A> {
        serde_json::from_value(self.state.clone())
            .map_err(|e| LogError::Codec(format!("snapshot at {}: {e}", self.sequence)))
    }
}

pub type EventStream = BoxStream<'static, LogResult<PersistedEvent>>;

/// Port for the durable, per-entity, append-only event log
///
/// Appends to different entities may run concurrently. Appends to the same
/// entity are ordered by the `expected_tail` check: a writer whose view of
/// the tail is stale gets `VersionConflict` and nothing is written.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Atomically append `events`, whose sequences must run from
    /// `expected_tail + 1` without gaps. Returns the new tail.
    async fn append(
        &self,
        entity_id: &EntityId,
        expected_tail: u64,
        events: Vec<PersistedEvent>,
    ) -> LogResult<u64>;

    /// Events with `sequence > after`, in order
    async fn read_from(&self, entity_id: &EntityId, after: u64) -> LogResult<EventStream>;

    async fn load_latest_snapshot(&self, entity_id: &EntityId) -> LogResult<Option<Snapshot>>;

    /// Store a snapshot unless a newer one is already stored
    async fn save_snapshot(&self, entity_id: &EntityId, snapshot: Snapshot) -> LogResult<()>;

    /// Name of the adapter for logs
    fn name(&self) -> &str;
}

/// Check that `events` continue a log whose tail is `expected_tail`
pub fn check_batch(expected_tail: u64, events: &[PersistedEvent]) -> LogResult<()> {
    if events.is_empty() {
        return Err(LogError::InvalidBatch("empty batch".to_string()));
    }
    for (offset, event) in events.iter().enumerate() {
        let wanted = expected_tail + 1 + offset as u64;
        if event.sequence != wanted {
            return Err(LogError::InvalidBatch(format!(
                "sequence {} where {wanted} was expected",
                event.sequence
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(sequence: u64) -> PersistedEvent {
        PersistedEvent {
            sequence,
            event_type: "order_placed".to_string(),
            payload: json!({}),
        }
    }

    #[test]
    fn test_check_batch_requires_contiguous_sequences() {
        assert!(check_batch(0, &[event(1), event(2)]).is_ok());
        assert!(check_batch(4, &[event(5)]).is_ok());
        assert!(matches!(
            check_batch(0, &[event(1), event(3)]),
            Err(LogError::InvalidBatch(_))
        ));
        assert!(matches!(
            check_batch(2, &[event(2)]),
            Err(LogError::InvalidBatch(_))
        ));
        assert!(matches!(check_batch(0, &[]), Err(LogError::InvalidBatch(_))));
    }
}
