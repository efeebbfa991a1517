//! Kestrel Event Log
//!
//! Adapters for the `EventLog` port:
//! - `InMemoryEventLog`: DashMap-backed, for tests and ephemeral servers
//! - `FileEventLog`: one JSON-lines file per entity plus a snapshot file

mod file;
mod in_memory;

#[cfg(feature = "test-support")]
mod flaky;

pub use file::FileEventLog;
pub use in_memory::InMemoryEventLog;

#[cfg(feature = "test-support")]
pub use flaky::FlakyEventLog;
