//! Kestrel Ports
//!
//! Port definitions (traits) for the Kestrel trading service.
//! These define the boundaries between domain logic and infrastructure.

mod clock;
mod error;
mod event_log;
mod retry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{LogError, LogResult};
pub use event_log::{EventLog, EventStream, PersistedEvent, Snapshot, check_batch};
pub use kestrel_core::{Decision, EventSourced};
pub use retry::RetryPolicy;
