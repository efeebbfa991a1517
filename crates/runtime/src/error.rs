use kestrel_core::EntityId;
use kestrel_ports::LogError;
use thiserror::Error;

/// Infrastructure failures while hosting an entity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Event log unavailable for {entity_id} after {attempts} attempts: {source}")]
    LogUnavailable {
        entity_id: EntityId,
        attempts: u32,
        source: LogError,
    },

    #[error("Corrupt event stream for {entity_id}: {reason}")]
    CorruptStream { entity_id: EntityId, reason: String },

    #[error("Recovery of {entity_id} failed: {source}")]
    RecoveryFailed {
        entity_id: EntityId,
        source: LogError,
    },

    #[error("Entity {0} is unavailable")]
    Unavailable(EntityId),

    #[error("Runtime is shutting down")]
    ShuttingDown,
}

/// Why a dispatched command produced no reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError<E> {
    /// The entity refused the command; nothing was persisted
    #[error("Command rejected: {0}")]
    Rejected(E),

    /// Another writer kept moving the log while the command was retried
    #[error("Concurrent modification of {entity_id}")]
    Conflict { entity_id: EntityId },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
