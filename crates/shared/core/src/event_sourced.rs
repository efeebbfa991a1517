//! Contract between an event-sourced entity and the runtime that hosts it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Outcome of a successfully handled command: the events to persist, in
/// order, and the reply for the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<E, R> {
    pub events: Vec<E>,
    pub reply: R,
}

impl<E, R> Decision<E, R> {
    pub fn new(events: Vec<E>, reply: R) -> Self {
        Self { events, reply }
    }

    /// A decision that changes nothing (e.g. a repeated idempotent command)
    pub fn reply_only(reply: R) -> Self {
        Self {
            events: Vec::new(),
            reply,
        }
    }
}

/// An entity whose state is derived purely from its own events.
///
/// `handle` and `apply` must be deterministic and free of I/O: the runtime
/// relies on replaying persisted events through `apply` to rebuild exactly
/// the state a live instance had. Anything time-dependent travels inside
/// the command.
pub trait EventSourced:
    Clone + Default + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Command: Debug + Send + Sync + 'static;
    type Event: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static;
    type Reply: Clone + Debug + Send + Sync + 'static;
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    /// Stable name of the entity type, used in logs and storage metadata
    const ENTITY_TYPE: &'static str;

    /// Decide what a command does against the current state.
    ///
    /// An `Err` means no events; the state must stay untouched.
    fn handle(
        &self,
        command: &Self::Command,
    ) -> Result<Decision<Self::Event, Self::Reply>, Self::Error>;

    /// Fold one event into the state. Must accept every event `handle`
    /// can produce.
    fn apply(&mut self, event: &Self::Event);

    /// Name of an event, stored next to its payload
    fn event_name(event: &Self::Event) -> &'static str;
}
