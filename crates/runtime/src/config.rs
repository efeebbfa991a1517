use kestrel_ports::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the entity runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Buffer size of each entity's mailbox
    pub mailbox_capacity: usize,
    /// Committed events between snapshots (0 disables snapshots)
    pub snapshot_every: u64,
    /// Resident entities before the least recently used is passivated
    pub max_resident: usize,
    /// Idle time before a worker passivates itself (0 disables)
    pub idle_timeout_ms: u64,
    /// Backoff for failed appends
    pub append_retry: RetryPolicy,
    /// Capacity of the committed-event broadcast channel
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1_024,
            snapshot_every: 100,
            max_resident: 10_000,
            idle_timeout_ms: 300_000,
            append_retry: RetryPolicy::default(),
            event_capacity: 10_000,
        }
    }
}

impl RuntimeConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_snapshot_every(mut self, events: u64) -> Self {
        self.snapshot_every = events;
        self
    }

    pub fn with_max_resident(mut self, max: usize) -> Self {
        self.max_resident = max;
        self
    }

    pub fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    pub fn with_append_retry(mut self, policy: RetryPolicy) -> Self {
        self.append_retry = policy;
        self
    }
}
