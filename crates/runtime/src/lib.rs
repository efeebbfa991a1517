//! Kestrel Entity Runtime
//!
//! Hosts event-sourced entities as tokio tasks, one per resident entity,
//! each with a bounded mailbox. Commands for one entity are handled one at
//! a time in arrival order; different entities run concurrently. Workers
//! recover from the event log on activation and are passivated when idle,
//! under resident-count pressure, or after a log failure.

mod command;
mod config;
mod entity;
mod error;
mod publisher;
mod supervisor;

pub use config::RuntimeConfig;
pub use error::{DispatchError, RuntimeError};
pub use publisher::{CommittedEvent, EventPublisher};
pub use supervisor::EntityRuntime;
