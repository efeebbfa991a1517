use dashmap::DashMap;
use kestrel_core::{EntityId, EventSourced};
use kestrel_ports::EventLog;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::command::{EntityMessage, Outcome};
use crate::config::RuntimeConfig;
use crate::entity::{EntityWorker, Registry};
use crate::error::{DispatchError, RuntimeError};
use crate::publisher::{CommittedEvent, EventPublisher};

/// Redeliveries tolerated for one call before giving up
const MAX_RELOCATIONS: usize = 16;

/// Handle to communicate with a resident entity worker
pub(crate) struct EntityHandle<A: EventSourced> {
    generation: u64,
    sender: mpsc::Sender<EntityMessage<A>>,
    last_used: Arc<AtomicU64>,
}

impl<A: EventSourced> EntityHandle<A> {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl<A: EventSourced> Clone for EntityHandle<A> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            sender: self.sender.clone(),
            last_used: Arc::clone(&self.last_used),
        }
    }
}

struct Inner<A: EventSourced, L: EventLog> {
    log: Arc<L>,
    config: Arc<RuntimeConfig>,
    registry: Arc<Registry<A>>,
    publisher: EventPublisher<A::Event>,
    next_generation: AtomicU64,
    /// Logical clock for least-recently-used eviction
    ticks: AtomicU64,
    shutting_down: AtomicBool,
    workers: Mutex<JoinSet<()>>,
}

/// Routes commands to per-entity workers, activating them on demand
///
/// Cheap to clone; clones share the same workers.
pub struct EntityRuntime<A: EventSourced, L: EventLog> {
    inner: Arc<Inner<A, L>>,
}

impl<A: EventSourced, L: EventLog> Clone for EntityRuntime<A, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: EventSourced, L: EventLog> EntityRuntime<A, L> {
    pub fn new(log: Arc<L>, config: RuntimeConfig) -> Self {
        let publisher = EventPublisher::new(config.event_capacity);
        info!(
            entity_type = A::ENTITY_TYPE,
            log = log.name(),
            mailbox_capacity = config.mailbox_capacity,
            max_resident = config.max_resident,
            snapshot_every = config.snapshot_every,
            "EntityRuntime started"
        );
        Self {
            inner: Arc::new(Inner {
                log,
                config: Arc::new(config),
                registry: Arc::new(DashMap::new()),
                publisher,
                next_generation: AtomicU64::new(1),
                ticks: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                workers: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn log(&self) -> &Arc<L> {
        &self.inner.log
    }

    /// Deliver a command to its entity and wait for the outcome
    ///
    /// Dropping the returned future before the worker starts the command
    /// cancels it.
    pub async fn dispatch(
        &self,
        entity_id: &EntityId,
        command: A::Command,
    ) -> Result<A::Reply, DispatchError<A::Error>> {
        let mut command = command;
        for _ in 0..MAX_RELOCATIONS {
            let handle = self.handle_for(entity_id)?;
            let (tx, rx) = oneshot::channel();
            let message = EntityMessage::Command {
                command,
                respond_to: tx,
            };

            if let Err(mpsc::error::SendError(message)) = handle.sender.send(message).await {
                // The worker passivated after we looked it up
                self.forget(entity_id, handle.generation);
                command = message
                    .into_command()
                    .ok_or_else(|| RuntimeError::Unavailable(entity_id.clone()))?;
                continue;
            }

            match rx.await {
                Ok(Outcome::Done(result)) => return result,
                Ok(Outcome::Relocate(returned)) => command = returned,
                Err(_) => return Err(RuntimeError::Unavailable(entity_id.clone()).into()),
            }
        }
        warn!(entity_id = %entity_id, "Command relocated too many times");
        Err(RuntimeError::Unavailable(entity_id.clone()).into())
    }

    /// Current state and sequence of an entity, read through its mailbox
    pub async fn inspect(&self, entity_id: &EntityId) -> Result<(A, u64), RuntimeError> {
        for _ in 0..MAX_RELOCATIONS {
            let handle = self.handle_for(entity_id)?;
            let (tx, rx) = oneshot::channel();

            if handle
                .sender
                .send(EntityMessage::Inspect { respond_to: tx })
                .await
                .is_err()
            {
                self.forget(entity_id, handle.generation);
                continue;
            }

            match rx.await {
                Ok(Outcome::Done(result)) => return result,
                Ok(Outcome::Relocate(())) => {}
                Err(_) => return Err(RuntimeError::Unavailable(entity_id.clone())),
            }
        }
        Err(RuntimeError::Unavailable(entity_id.clone()))
    }

    /// Subscribe to every event committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CommittedEvent<A::Event>> {
        self.inner.publisher.subscribe()
    }

    /// Ask a resident entity to passivate once its queued work is done.
    /// Returns false if it was not resident.
    pub fn evict(&self, entity_id: &EntityId) -> bool {
        let Some(handle) = self.inner.registry.get(entity_id).map(|h| h.clone()) else {
            return false;
        };
        request_passivation(entity_id, handle);
        true
    }

    pub fn resident_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_resident(&self, entity_id: &EntityId) -> bool {
        self.inner.registry.contains_key(entity_id)
    }

    /// Stop accepting commands and wait for workers to finish queued work
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let resident = self.inner.registry.len();
        // Dropping the senders ends each worker once its mailbox drains
        self.inner.registry.clear();

        let mut workers = match self.inner.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        while workers.join_next().await.is_some() {}
        info!(entity_type = A::ENTITY_TYPE, resident, "EntityRuntime shut down");
    }

    /// Get the worker for an entity, activating it if needed
    fn handle_for(&self, entity_id: &EntityId) -> Result<EntityHandle<A>, RuntimeError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::ShuttingDown);
        }
        let tick = self.inner.ticks.fetch_add(1, Ordering::Relaxed);

        if let Some(handle) = self.inner.registry.get(entity_id) {
            handle.last_used.store(tick, Ordering::Relaxed);
            return Ok(handle.clone());
        }

        let mut activated = false;
        let handle = self
            .inner
            .registry
            .entry(entity_id.clone())
            .or_insert_with(|| {
                activated = true;
                self.activate(entity_id, tick)
            })
            .clone();

        if activated {
            self.enforce_resident_limit(entity_id);
        }
        Ok(handle)
    }

    fn activate(&self, entity_id: &EntityId, tick: u64) -> EntityHandle<A> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, mailbox) = mpsc::channel(self.inner.config.mailbox_capacity.max(1));

        let worker = EntityWorker::new(
            entity_id.clone(),
            generation,
            mailbox,
            Arc::clone(&self.inner.log),
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.registry),
            self.inner.publisher.clone(),
        );

        match self.inner.workers.lock() {
            Ok(mut workers) => {
                while workers.try_join_next().is_some() {}
                workers.spawn(worker.run());
            }
            Err(poisoned) => {
                poisoned.into_inner().spawn(worker.run());
            }
        }
        debug!(entity_id = %entity_id, generation, "Entity worker spawned");

        EntityHandle {
            generation,
            sender,
            last_used: Arc::new(AtomicU64::new(tick)),
        }
    }

    /// Passivate the least recently used entity while over the cap
    fn enforce_resident_limit(&self, just_activated: &EntityId) {
        let max = self.inner.config.max_resident.max(1);
        let resident = self.inner.registry.len();
        if resident <= max {
            return;
        }

        let victim = self
            .inner
            .registry
            .iter()
            .filter(|entry| entry.key() != just_activated)
            .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
            .map(|entry| (entry.key().clone(), entry.value().clone()));

        if let Some((victim_id, handle)) = victim {
            debug!(entity_id = %victim_id, resident, max, "Evicting least recently used entity");
            request_passivation(&victim_id, handle);
        }
    }

    /// Drop a registry entry whose worker is gone
    fn forget(&self, entity_id: &EntityId, generation: u64) {
        self.inner
            .registry
            .remove_if(entity_id, |_, handle| handle.generation == generation);
    }
}

fn request_passivation<A: EventSourced>(entity_id: &EntityId, handle: EntityHandle<A>) {
    match handle.sender.try_send(EntityMessage::Passivate) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(message)) => {
            debug!(entity_id = %entity_id, "Mailbox full, queueing passivation");
            tokio::spawn(async move {
                let _ = handle.sender.send(message).await;
            });
        }
    }
}
