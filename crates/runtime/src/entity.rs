use dashmap::DashMap;
use futures_util::StreamExt;
use kestrel_core::{EntityId, EventSourced};
use kestrel_ports::{EventLog, LogError, PersistedEvent, Snapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{EntityMessage, Outcome};
use crate::config::RuntimeConfig;
use crate::error::{DispatchError, RuntimeError};
use crate::publisher::{CommittedEvent, EventPublisher};
use crate::supervisor::EntityHandle;

pub(crate) type Registry<A> = DashMap<EntityId, EntityHandle<A>>;

/// Why an append did not go through
enum PersistError {
    Conflict,
    Failed(RuntimeError),
}

/// How a worker leaves its loop
enum Exit {
    /// Queued messages go back to their callers for a fresh activation
    Relocate,
    /// Queued messages fail with this error
    Fail(RuntimeError),
}

/// The task that owns one resident entity
pub(crate) struct EntityWorker<A: EventSourced, L: EventLog> {
    entity_id: EntityId,
    generation: u64,
    state: A,
    /// Sequence of the last event applied to `state`
    sequence: u64,
    since_snapshot: u64,
    snapshot_in_flight: Arc<AtomicBool>,
    mailbox: mpsc::Receiver<EntityMessage<A>>,
    log: Arc<L>,
    config: Arc<RuntimeConfig>,
    registry: Arc<Registry<A>>,
    publisher: EventPublisher<A::Event>,
}

impl<A: EventSourced, L: EventLog> EntityWorker<A, L> {
    pub(crate) fn new(
        entity_id: EntityId,
        generation: u64,
        mailbox: mpsc::Receiver<EntityMessage<A>>,
        log: Arc<L>,
        config: Arc<RuntimeConfig>,
        registry: Arc<Registry<A>>,
        publisher: EventPublisher<A::Event>,
    ) -> Self {
        Self {
            entity_id,
            generation,
            state: A::default(),
            sequence: 0,
            since_snapshot: 0,
            snapshot_in_flight: Arc::new(AtomicBool::new(false)),
            mailbox,
            log,
            config,
            registry,
            publisher,
        }
    }

    /// Main loop - recovers, then processes messages sequentially
    pub(crate) async fn run(mut self) {
        // Commands that arrive meanwhile wait in the mailbox
        if let Err(e) = self.recover().await {
            warn!(entity_id = %self.entity_id, error = %e, "Recovery failed");
            self.passivate(Exit::Fail(e));
            return;
        }
        debug!(
            entity_id = %self.entity_id,
            entity_type = A::ENTITY_TYPE,
            sequence = self.sequence,
            "Entity activated"
        );

        let idle_timeout = self.config.idle_timeout();
        loop {
            let message = match idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, self.mailbox.recv()).await {
                    Ok(message) => message,
                    Err(_) => {
                        debug!(entity_id = %self.entity_id, "Passivating idle entity");
                        self.passivate(Exit::Relocate);
                        return;
                    }
                },
                None => self.mailbox.recv().await,
            };

            let Some(message) = message else {
                // Every sender is gone: the runtime shut down
                debug!(entity_id = %self.entity_id, "Mailbox closed");
                return;
            };

            match message {
                EntityMessage::Command {
                    command,
                    respond_to,
                } => {
                    if respond_to.is_closed() {
                        debug!(entity_id = %self.entity_id, ?command, "Skipping cancelled command");
                        continue;
                    }
                    let result = self.process(&command).await;
                    let failure = match &result {
                        Err(DispatchError::Runtime(e)) => Some(e.clone()),
                        _ => None,
                    };
                    let _ = respond_to.send(Outcome::Done(result));

                    if let Some(e) = failure {
                        // In-memory state may be behind the log; drop it
                        warn!(entity_id = %self.entity_id, error = %e, "Discarding entity after runtime failure");
                        self.passivate(Exit::Relocate);
                        return;
                    }
                }
                EntityMessage::Inspect { respond_to } => {
                    let _ = respond_to.send(Outcome::Done(Ok((self.state.clone(), self.sequence))));
                }
                EntityMessage::Passivate => {
                    debug!(entity_id = %self.entity_id, "Passivating on request");
                    self.passivate(Exit::Relocate);
                    return;
                }
            }
        }
    }

    /// Handle one command: decide, persist, apply, publish
    async fn process(
        &mut self,
        command: &A::Command,
    ) -> Result<A::Reply, DispatchError<A::Error>> {
        let mut reloaded = false;
        loop {
            let decision = self
                .state
                .handle(command)
                .map_err(DispatchError::Rejected)?;
            if decision.events.is_empty() {
                return Ok(decision.reply);
            }

            match self.persist(&decision.events).await {
                Ok(()) => {
                    self.commit(decision.events);
                    return Ok(decision.reply);
                }
                Err(PersistError::Conflict) if !reloaded => {
                    debug!(entity_id = %self.entity_id, sequence = self.sequence, "Version conflict, reloading tail");
                    self.catch_up().await?;
                    reloaded = true;
                }
                Err(PersistError::Conflict) => {
                    warn!(entity_id = %self.entity_id, "Version conflict after reload");
                    return Err(DispatchError::Conflict {
                        entity_id: self.entity_id.clone(),
                    });
                }
                Err(PersistError::Failed(e)) => return Err(DispatchError::Runtime(e)),
            }
        }
    }

    /// Append events after the current sequence, retrying transient failures
    async fn persist(&self, events: &[A::Event]) -> Result<(), PersistError> {
        let batch = events
            .iter()
            .zip(self.sequence + 1..)
            .map(|(event, sequence)| PersistedEvent::encode::<A>(sequence, event))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.log_failure(1, e))?;

        let policy = &self.config.append_retry;
        let mut attempt = 1;
        loop {
            match self
                .log
                .append(&self.entity_id, self.sequence, batch.clone())
                .await
            {
                Ok(_) => return Ok(()),
                Err(LogError::VersionConflict { .. }) => return Err(PersistError::Conflict),
                Err(e) if e.is_transient() && policy.allows_retry(attempt) => {
                    let delay = policy.delay(attempt);
                    warn!(
                        entity_id = %self.entity_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(self.log_failure(attempt, e)),
            }
        }
    }

    fn log_failure(&self, attempts: u32, source: LogError) -> PersistError {
        PersistError::Failed(RuntimeError::LogUnavailable {
            entity_id: self.entity_id.clone(),
            attempts,
            source,
        })
    }

    /// Fold freshly persisted events into the state and announce them
    fn commit(&mut self, events: Vec<A::Event>) {
        for event in events {
            self.state.apply(&event);
            self.sequence += 1;
            self.since_snapshot += 1;
            self.publisher.publish(CommittedEvent {
                entity_id: self.entity_id.clone(),
                sequence: self.sequence,
                event,
            });
        }
        self.maybe_snapshot();
    }

    /// Start from the newest readable snapshot, then replay what follows it
    async fn recover(&mut self) -> Result<(), RuntimeError> {
        match self.log.load_latest_snapshot(&self.entity_id).await {
            Ok(Some(snapshot)) => match snapshot.decode::<A>() {
                Ok(state) => {
                    self.state = state;
                    self.sequence = snapshot.sequence;
                }
                Err(e) => {
                    warn!(entity_id = %self.entity_id, error = %e, "Ignoring unreadable snapshot");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(entity_id = %self.entity_id, error = %e, "Snapshot load failed, replaying from start");
            }
        }
        let from_snapshot = self.sequence;
        self.catch_up().await?;
        if self.sequence > 0 {
            info!(
                entity_id = %self.entity_id,
                snapshot = from_snapshot,
                replayed = self.sequence - from_snapshot,
                sequence = self.sequence,
                "Entity recovered"
            );
        }
        Ok(())
    }

    /// Apply every event after the current sequence
    async fn catch_up(&mut self) -> Result<(), RuntimeError> {
        let recovery_failed = |source| RuntimeError::RecoveryFailed {
            entity_id: self.entity_id.clone(),
            source,
        };
        let mut stream = self
            .log
            .read_from(&self.entity_id, self.sequence)
            .await
            .map_err(recovery_failed)?;

        while let Some(persisted) = stream.next().await {
            let persisted = persisted.map_err(|source| RuntimeError::RecoveryFailed {
                entity_id: self.entity_id.clone(),
                source,
            })?;
            if persisted.sequence != self.sequence + 1 {
                return Err(RuntimeError::CorruptStream {
                    entity_id: self.entity_id.clone(),
                    reason: format!(
                        "found sequence {} after {}",
                        persisted.sequence, self.sequence
                    ),
                });
            }
            let event = persisted
                .decode::<A>()
                .map_err(|e| RuntimeError::CorruptStream {
                    entity_id: self.entity_id.clone(),
                    reason: e.to_string(),
                })?;
            self.state.apply(&event);
            self.sequence = persisted.sequence;
        }
        Ok(())
    }

    /// Write a snapshot in the background once enough events piled up
    fn maybe_snapshot(&mut self) {
        let every = self.config.snapshot_every;
        if every == 0 || self.since_snapshot < every {
            return;
        }
        if self.snapshot_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        let snapshot = match Snapshot::encode::<A>(self.sequence, &self.state) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(entity_id = %self.entity_id, error = %e, "Snapshot encoding failed");
                self.snapshot_in_flight.store(false, Ordering::Release);
                return;
            }
        };
        self.since_snapshot = 0;

        let log = Arc::clone(&self.log);
        let entity_id = self.entity_id.clone();
        let in_flight = Arc::clone(&self.snapshot_in_flight);
        tokio::spawn(async move {
            let sequence = snapshot.sequence;
            match log.save_snapshot(&entity_id, snapshot).await {
                Ok(()) => debug!(entity_id = %entity_id, sequence, "Snapshot saved"),
                Err(e) => warn!(entity_id = %entity_id, sequence, error = %e, "Snapshot failed"),
            }
            in_flight.store(false, Ordering::Release);
        });
    }

    /// Deregister, close the mailbox and settle whatever is still queued
    fn passivate(&mut self, exit: Exit) {
        let generation = self.generation;
        self.registry
            .remove_if(&self.entity_id, |_, handle| handle.generation() == generation);
        self.mailbox.close();

        let mut settled = 0;
        while let Ok(message) = self.mailbox.try_recv() {
            match &exit {
                Exit::Relocate => message.relocate(),
                Exit::Fail(e) => message.fail(e.clone()),
            }
            settled += 1;
        }
        debug!(
            entity_id = %self.entity_id,
            generation,
            settled,
            sequence = self.sequence,
            "Entity passivated"
        );
    }
}
