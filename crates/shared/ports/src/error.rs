use thiserror::Error;

/// Errors reported by an event log adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log's tail moved since the writer last read it
    #[error("Version conflict on {entity_id}: expected tail {expected}, actual {actual}")]
    VersionConflict {
        entity_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Encoding error: {0}")]
    Codec(String),

    /// A batch whose sequence numbers do not continue the tail
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
}

impl LogError {
    /// Whether retrying the same append could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Io(_))
    }
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        LogError::Codec(err.to_string())
    }
}

pub type LogResult<T> = std::result::Result<T, LogError>;
