use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream;
use kestrel_core::EntityId;
use kestrel_ports::{
    EventLog, EventStream, LogError, LogResult, PersistedEvent, Snapshot, check_batch,
};
use std::sync::Arc;

/// In-memory event log
///
/// Thread-safe storage for event streams using DashMap.
/// Suitable for simulation and testing; nothing survives the process.
pub struct InMemoryEventLog {
    /// Event streams by entity
    streams: Arc<DashMap<EntityId, Vec<PersistedEvent>>>,
    /// Latest snapshot by entity
    snapshots: Arc<DashMap<EntityId, Snapshot>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            snapshots: Arc::new(DashMap::new()),
        }
    }

    /// Current tail of an entity's stream (0 when empty)
    pub fn tail(&self, entity_id: &EntityId) -> u64 {
        self.streams
            .get(entity_id)
            .and_then(|s| s.last().map(|e| e.sequence))
            .unwrap_or(0)
    }

    /// Number of entities with at least one event
    pub fn entity_count(&self) -> usize {
        self.streams.len()
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryEventLog {
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
            snapshots: Arc::clone(&self.snapshots),
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        entity_id: &EntityId,
        expected_tail: u64,
        events: Vec<PersistedEvent>,
    ) -> LogResult<u64> {
        // The entry guard serializes appends to one entity
        let mut stream = self.streams.entry(entity_id.clone()).or_default();
        let actual = stream.last().map(|e| e.sequence).unwrap_or(0);
        if actual != expected_tail {
            return Err(LogError::VersionConflict {
                entity_id: entity_id.to_string(),
                expected: expected_tail,
                actual,
            });
        }
        check_batch(expected_tail, &events)?;

        stream.extend(events);
        Ok(stream.last().map(|e| e.sequence).unwrap_or(0))
    }

    async fn read_from(&self, entity_id: &EntityId, after: u64) -> LogResult<EventStream> {
        let events: Vec<PersistedEvent> = self
            .streams
            .get(entity_id)
            .map(|s| {
                s.iter()
                    .filter(|e| e.sequence > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn load_latest_snapshot(&self, entity_id: &EntityId) -> LogResult<Option<Snapshot>> {
        Ok(self.snapshots.get(entity_id).map(|s| s.value().clone()))
    }

    async fn save_snapshot(&self, entity_id: &EntityId, snapshot: Snapshot) -> LogResult<()> {
        self.snapshots
            .entry(entity_id.clone())
            .and_modify(|current| {
                if snapshot.sequence > current.sequence {
                    *current = snapshot.clone();
                }
            })
            .or_insert_with(|| snapshot.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use serde_json::json;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn events(from: u64, count: u64) -> Vec<PersistedEvent> {
        (from..from + count)
            .map(|sequence| PersistedEvent {
                sequence,
                event_type: "order_placed".to_string(),
                payload: json!({ "n": sequence }),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let log = InMemoryEventLog::new();
        let acct = id("acct1");

        assert_eq!(log.append(&acct, 0, events(1, 2)).await.unwrap(), 2);
        assert_eq!(log.append(&acct, 2, events(3, 1)).await.unwrap(), 3);

        let all: Vec<_> = log.read_from(&acct, 0).await.unwrap().try_collect().await.unwrap();
        assert_eq!(all.len(), 3);
        let tail: Vec<_> = log.read_from(&acct, 2).await.unwrap().try_collect().await.unwrap();
        assert_eq!(tail[0].sequence, 3);
    }

    #[tokio::test]
    async fn test_stale_append_conflicts_without_writing() {
        let log = InMemoryEventLog::new();
        let acct = id("acct1");
        log.append(&acct, 0, events(1, 1)).await.unwrap();

        let err = log.append(&acct, 0, events(1, 1)).await.unwrap_err();
        assert_eq!(
            err,
            LogError::VersionConflict {
                entity_id: "acct1".to_string(),
                expected: 0,
                actual: 1,
            }
        );
        assert_eq!(log.tail(&acct), 1);
    }

    #[tokio::test]
    async fn test_entities_are_independent() {
        let log = InMemoryEventLog::new();
        log.append(&id("a"), 0, events(1, 3)).await.unwrap();
        log.append(&id("b"), 0, events(1, 1)).await.unwrap();
        assert_eq!(log.tail(&id("a")), 3);
        assert_eq!(log.tail(&id("b")), 1);
        assert_eq!(log.entity_count(), 2);
    }

    #[tokio::test]
    async fn test_older_snapshot_never_replaces_newer() {
        let log = InMemoryEventLog::new();
        let acct = id("acct1");
        let snap = |sequence| Snapshot {
            sequence,
            state: json!({ "at": sequence }),
        };

        log.save_snapshot(&acct, snap(10)).await.unwrap();
        log.save_snapshot(&acct, snap(5)).await.unwrap();
        assert_eq!(log.load_latest_snapshot(&acct).await.unwrap().unwrap().sequence, 10);

        log.save_snapshot(&acct, snap(20)).await.unwrap();
        assert_eq!(log.load_latest_snapshot(&acct).await.unwrap().unwrap().sequence, 20);
    }
}
