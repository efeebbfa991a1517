use async_trait::async_trait;
use kestrel_core::EntityId;
use kestrel_ports::{EventLog, EventStream, LogError, LogResult, PersistedEvent, Snapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Wraps another log and injects I/O failures on request
///
/// Failures are reported before the inner log is touched, so a failed
/// append never writes anything.
pub struct FlakyEventLog<L> {
    inner: Arc<L>,
    failing_appends: AtomicU32,
    fail_all_appends: AtomicBool,
    fail_snapshots: AtomicBool,
    fail_reads: AtomicBool,
    append_calls: AtomicU32,
}

impl<L: EventLog> FlakyEventLog<L> {
    pub fn new(inner: Arc<L>) -> Self {
        Self {
            inner,
            failing_appends: AtomicU32::new(0),
            fail_all_appends: AtomicBool::new(false),
            fail_snapshots: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            append_calls: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<L> {
        &self.inner
    }

    /// Fail the next `count` appends
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_all_appends(&self, fail: bool) {
        self.fail_all_appends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Appends attempted so far, failed ones included
    pub fn append_calls(&self) -> u32 {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn take_append_failure(&self) -> bool {
        if self.fail_all_appends.load(Ordering::SeqCst) {
            return true;
        }
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<L: EventLog> EventLog for FlakyEventLog<L> {
    async fn append(
        &self,
        entity_id: &EntityId,
        expected_tail: u64,
        events: Vec<PersistedEvent>,
    ) -> LogResult<u64> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_append_failure() {
            return Err(LogError::Io("injected append failure".to_string()));
        }
        self.inner.append(entity_id, expected_tail, events).await
    }

    async fn read_from(&self, entity_id: &EntityId, after: u64) -> LogResult<EventStream> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LogError::Io("injected read failure".to_string()));
        }
        self.inner.read_from(entity_id, after).await
    }

    async fn load_latest_snapshot(&self, entity_id: &EntityId) -> LogResult<Option<Snapshot>> {
        self.inner.load_latest_snapshot(entity_id).await
    }

    async fn save_snapshot(&self, entity_id: &EntityId, snapshot: Snapshot) -> LogResult<()> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(LogError::Io("injected snapshot failure".to_string()));
        }
        self.inner.save_snapshot(entity_id, snapshot).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
