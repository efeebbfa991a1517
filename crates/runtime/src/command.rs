use kestrel_core::EventSourced;
use tokio::sync::oneshot;

use crate::error::{DispatchError, RuntimeError};

/// What a worker sends back for a message it received
#[derive(Debug)]
pub(crate) enum Outcome<T, M> {
    Done(T),
    /// The worker passivated before getting to the message; deliver it
    /// again to a fresh activation
    Relocate(M),
}

pub(crate) type CommandOutcome<A> = Outcome<
    Result<<A as EventSourced>::Reply, DispatchError<<A as EventSourced>::Error>>,
    <A as EventSourced>::Command,
>;

pub(crate) type InspectOutcome<A> = Outcome<Result<(A, u64), RuntimeError>, ()>;

/// Messages accepted by an entity worker's mailbox
#[derive(Debug)]
pub(crate) enum EntityMessage<A: EventSourced> {
    /// Handle a command and persist its events
    Command {
        command: A::Command,
        respond_to: oneshot::Sender<CommandOutcome<A>>,
    },

    /// Read the current state and sequence
    Inspect {
        respond_to: oneshot::Sender<InspectOutcome<A>>,
    },

    /// Stop after the messages already queued ahead of this one
    Passivate,
}

impl<A: EventSourced> EntityMessage<A> {
    /// Hand the message back to its sender for redelivery
    pub(crate) fn relocate(self) {
        match self {
            EntityMessage::Command {
                command,
                respond_to,
            } => {
                let _ = respond_to.send(Outcome::Relocate(command));
            }
            EntityMessage::Inspect { respond_to } => {
                let _ = respond_to.send(Outcome::Relocate(()));
            }
            EntityMessage::Passivate => {}
        }
    }

    /// Answer the message with a runtime failure
    pub(crate) fn fail(self, error: RuntimeError) {
        match self {
            EntityMessage::Command { respond_to, .. } => {
                let _ = respond_to.send(Outcome::Done(Err(DispatchError::Runtime(error))));
            }
            EntityMessage::Inspect { respond_to } => {
                let _ = respond_to.send(Outcome::Done(Err(error)));
            }
            EntityMessage::Passivate => {}
        }
    }

    pub(crate) fn into_command(self) -> Option<A::Command> {
        match self {
            EntityMessage::Command { command, .. } => Some(command),
            _ => None,
        }
    }
}
