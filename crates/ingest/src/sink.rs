use async_trait::async_trait;
use kestrel_core::{EntityId, TraderReply};
use thiserror::Error;

use crate::record::CommandRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The entity refused the command
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The service could not make sense of the request
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Nothing is known to have happened; the submission may be retried
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl SubmitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SubmitError::Unavailable(_))
    }
}

/// Destination for ingested commands
#[async_trait]
pub trait CommandSink: Send + Sync + 'static {
    async fn submit(
        &self,
        entity_id: &EntityId,
        request: &CommandRequest,
    ) -> Result<TraderReply, SubmitError>;

    fn name(&self) -> &str;
}
