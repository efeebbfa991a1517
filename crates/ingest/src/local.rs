use async_trait::async_trait;
use kestrel_core::{CommandError, EntityId, TraderReply, TraderState};
use kestrel_ports::{Clock, EventLog};
use kestrel_runtime::{DispatchError, EntityRuntime};
use std::sync::Arc;

use crate::record::CommandRequest;
use crate::sink::{CommandSink, SubmitError};

/// Dispatches straight into an in-process entity runtime
pub struct RuntimeCommandSink<C: Clock, L: EventLog> {
    runtime: EntityRuntime<TraderState, L>,
    clock: Arc<C>,
}

impl<C: Clock, L: EventLog> RuntimeCommandSink<C, L> {
    pub fn new(runtime: EntityRuntime<TraderState, L>, clock: Arc<C>) -> Self {
        Self { runtime, clock }
    }

    pub fn runtime(&self) -> &EntityRuntime<TraderState, L> {
        &self.runtime
    }
}

#[async_trait]
impl<C: Clock + 'static, L: EventLog> CommandSink for RuntimeCommandSink<C, L> {
    async fn submit(
        &self,
        entity_id: &EntityId,
        request: &CommandRequest,
    ) -> Result<TraderReply, SubmitError> {
        let command = request.clone().into_command(self.clock.now());
        self.runtime
            .dispatch(entity_id, command)
            .await
            .map_err(|e: DispatchError<CommandError>| match e {
                DispatchError::Rejected(err) => SubmitError::Rejected {
                    code: err.code().to_string(),
                    message: err.to_string(),
                },
                other => SubmitError::Unavailable(other.to_string()),
            })
    }

    fn name(&self) -> &str {
        "runtime"
    }
}
