//! High-level client for the Shelf SDK.
//!
//! The client owns one state controller, picked from [`ClientConfig`] at
//! construction, and talks to a [`RemoteStore`]. Edits and reads are
//! synchronous and only touch local state. Saves, fetches and destroys are
//! async and run through a per-object [`TaskQueue`], so at most one request
//! per object is outstanding at a time.

use crate::error::{Result, SdkError};
use crate::queue::{TaskKey, TaskQueue};
use crate::remote::{MemoryRemote, RemoteStore, SaveRequest};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::{Number, Value};
use shelf_core::{Attributes, Identity, ObjectId, Operation};
use shelf_state::{controller_for, Handle, SaveToken, StateController, Strategy};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Configuration for the Shelf client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// How handles map to object state.
    pub strategy: Strategy,
    /// Attempts per save before giving up on a retryable failure.
    pub max_save_attempts: u32,
    /// Delay before the first retry; later retries wait proportionally longer.
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::SingleInstance,
            max_save_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Builder for client configuration.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn max_save_attempts(mut self, attempts: u32) -> Self {
        self.config.max_save_attempts = attempts.max(1);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by a client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// A save was confirmed by the remote.
    Saved { identity: Identity },
    /// A save attempt failed; its edits are queued again.
    SaveFailed {
        identity: Identity,
        attempt: u32,
        error: String,
    },
    /// A local object received its server id.
    Renamed { from: Identity, to: Identity },
    /// Server attributes were refreshed.
    Fetched { identity: Identity },
    /// The object was deleted.
    Destroyed { identity: Identity },
}

type SharedController = Arc<RwLock<Box<dyn StateController + Send + Sync>>>;

/// Identities of locally created objects that have been saved.
#[derive(Debug, Default)]
struct Aliases {
    /// Local identity to the server identity it was saved as.
    saved_as: HashMap<Identity, Identity>,
    /// Server identity back to the local identity it started as.
    created_as: HashMap<Identity, Identity>,
}

/// The Shelf client.
///
/// # Example
///
/// ```rust
/// use shelf_sdk::{Client, ClientConfig};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let client = Client::new_with_memory_remote(ClientConfig::default());
///
/// let item = client.object("Item");
/// client.increment(&item, "count", 5.into()).unwrap();
/// client.increment(&item, "count", (-2).into()).unwrap();
/// assert_eq!(client.get(&item, "count").unwrap(), Some(json!(3)));
///
/// let item = client.save(&item).await.unwrap();
/// assert!(!item.identity().is_local());
/// # });
/// ```
pub struct Client<R: RemoteStore> {
    config: ClientConfig,
    remote: Arc<R>,
    states: SharedController,
    queue: TaskQueue,
    aliases: RwLock<Aliases>,
    event_tx: broadcast::Sender<ClientEvent>,
}

impl Client<MemoryRemote> {
    /// Create a client backed by an in-memory remote (for testing).
    pub fn new_with_memory_remote(config: ClientConfig) -> Self {
        Self::new(Arc::new(MemoryRemote::new()), config)
    }
}

impl<R: RemoteStore> Client<R> {
    /// Create a client with a custom remote.
    pub fn new(remote: Arc<R>, config: ClientConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        info!(strategy = ?config.strategy, "client started");

        Self {
            states: Arc::new(RwLock::new(controller_for(config.strategy))),
            config,
            remote,
            queue: TaskQueue::new(),
            aliases: RwLock::new(Aliases::default()),
            event_tx,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    // === Handles ===

    /// A handle for a new, unsaved object of `class_name`.
    pub fn object(&self, class_name: &str) -> Handle {
        self.states.write().create_local(class_name)
    }

    /// A handle for a saved object.
    pub fn lookup(&self, class_name: &str, object_id: &str) -> Handle {
        self.states
            .write()
            .lookup_or_create(Identity::server(class_name, object_id))
    }

    /// Another reference to the same object.
    pub fn duplicate(&self, handle: &Handle) -> Result<Handle> {
        let handle = self.resolve(handle);
        Ok(self.states.write().duplicate(&handle)?)
    }

    /// Drop all local state for `handle`.
    pub fn release(&self, handle: &Handle) -> Result<()> {
        let handle = self.resolve(handle);
        self.states.write().release(&handle)?;
        Ok(())
    }

    /// Number of object states held.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // === Edits ===

    pub fn apply_op(&self, handle: &Handle, key: &str, op: Operation) -> Result<()> {
        let handle = self.resolve(handle);
        Ok(self.states.write().apply_op(&handle, key, op)?)
    }

    pub fn set(&self, handle: &Handle, key: &str, value: Value) -> Result<()> {
        self.apply_op(handle, key, Operation::set(value))
    }

    pub fn unset(&self, handle: &Handle, key: &str) -> Result<()> {
        self.apply_op(handle, key, Operation::unset())
    }

    pub fn increment(&self, handle: &Handle, key: &str, amount: Number) -> Result<()> {
        self.apply_op(handle, key, Operation::increment(amount))
    }

    pub fn add(&self, handle: &Handle, key: &str, elements: Vec<Value>) -> Result<()> {
        self.apply_op(handle, key, Operation::add(elements))
    }

    pub fn add_unique(&self, handle: &Handle, key: &str, elements: Vec<Value>) -> Result<()> {
        self.apply_op(handle, key, Operation::add_unique(elements))
    }

    pub fn remove(&self, handle: &Handle, key: &str, elements: Vec<Value>) -> Result<()> {
        self.apply_op(handle, key, Operation::remove(elements))
    }

    pub fn relation_add(&self, handle: &Handle, key: &str, targets: &[Identity]) -> Result<()> {
        let handle = self.resolve(handle);
        Ok(self.states.write().relation_add(&handle, key, targets)?)
    }

    pub fn relation_remove(&self, handle: &Handle, key: &str, targets: &[Identity]) -> Result<()> {
        let handle = self.resolve(handle);
        Ok(self.states.write().relation_remove(&handle, key, targets)?)
    }

    /// Drop unsaved edits for `keys`, or all of them.
    pub fn revert(&self, handle: &Handle, keys: Option<&[&str]>) -> Result<()> {
        let handle = self.resolve(handle);
        Ok(self.states.write().revert(&handle, keys)?)
    }

    // === Reads ===

    /// Estimated value of one attribute.
    pub fn get(&self, handle: &Handle, key: &str) -> Result<Option<Value>> {
        let handle = self.resolve(handle);
        Ok(self.states.read().estimate(&handle, key)?)
    }

    /// Every estimated attribute.
    pub fn attributes(&self, handle: &Handle) -> Result<Attributes> {
        let handle = self.resolve(handle);
        Ok(self.states.read().estimate_all(&handle)?)
    }

    /// Attributes last confirmed by the remote.
    pub fn server_data(&self, handle: &Handle) -> Result<Attributes> {
        let handle = self.resolve(handle);
        Ok(self.states.read().server_data(&handle)?.into_owned())
    }

    pub fn dirty_keys(&self, handle: &Handle) -> Result<BTreeSet<String>> {
        let handle = self.resolve(handle);
        Ok(self.states.read().dirty_keys(&handle)?)
    }

    pub fn is_dirty(&self, handle: &Handle, key: Option<&str>) -> Result<bool> {
        let handle = self.resolve(handle);
        Ok(self.states.read().is_dirty(&handle, key)?)
    }

    /// Whether the remote has confirmed the object exists.
    pub fn existed(&self, handle: &Handle) -> Result<bool> {
        let handle = self.resolve(handle);
        Ok(self.states.read().existed(&handle)?)
    }

    /// Current identity of the object behind `handle`.
    pub fn identity(&self, handle: &Handle) -> Result<Identity> {
        let handle = self.resolve(handle);
        let states = self.states.read();
        Ok(states
            .record(&handle)?
            .map(|record| record.identity().clone())
            .unwrap_or_else(|| handle.identity().clone()))
    }

    // === Remote ===

    /// Send queued edits to the remote.
    ///
    /// Every operation set queued when the save runs goes out, oldest first;
    /// edits made meanwhile wait for the next save. Retryable failures are
    /// retried up to `max_save_attempts` times per set; after a final
    /// failure the edits stay queued. Dropping the future puts an unconfirmed
    /// set back in the queue. Returns the handle to keep using, renamed if
    /// the object just received its server id.
    pub async fn save(&self, handle: &Handle) -> Result<Handle> {
        let handle = self.resolve(handle);
        let key = self.task_key(&handle);
        self.queue.run(key, self.save_now(handle)).await
    }

    /// Save several objects concurrently.
    pub async fn save_all(&self, handles: &[Handle]) -> Vec<Result<Handle>> {
        join_all(handles.iter().map(|handle| self.save(handle))).await
    }

    /// Replace server attributes with the remote's copy.
    pub async fn fetch(&self, handle: &Handle) -> Result<()> {
        let handle = self.resolve(handle);
        let key = self.task_key(&handle);
        self.queue.run(key, self.fetch_now(handle)).await
    }

    /// Delete the object remotely and forget its local state.
    ///
    /// An object that was never saved is only cleared locally.
    pub async fn destroy(&self, handle: &Handle) -> Result<()> {
        let handle = self.resolve(handle);
        let key = self.task_key(&handle);
        self.queue.run(key, self.destroy_now(handle)).await
    }

    async fn fetch_now(&self, handle: Handle) -> Result<()> {
        let handle = self.resolve(&handle);
        let identity = self.saved_identity(&handle)?;

        let attributes = self.remote.fetch(&identity).await?;
        self.states.write().apply_fetch(&handle, attributes)?;

        debug!(identity = %identity, "fetched");
        let _ = self.event_tx.send(ClientEvent::Fetched { identity });
        Ok(())
    }

    async fn destroy_now(&self, handle: Handle) -> Result<()> {
        let handle = self.resolve(&handle);
        let identity = self.identity(&handle)?;

        if !identity.is_local() {
            self.remote.destroy(&identity).await?;
        }
        self.states.write().clear(&handle)?;

        info!(identity = %identity, "destroyed");
        let _ = self.event_tx.send(ClientEvent::Destroyed { identity });
        Ok(())
    }

    async fn save_now(&self, handle: Handle) -> Result<Handle> {
        // A save queued behind this object's first save sees the new id.
        let mut handle = self.resolve(&handle);
        let mut remaining = self.queued_sets(&handle)?.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let identity = self.identity(&handle)?;
            let batch = self.states.write().begin_save(&handle)?;
            let in_flight = InFlight::new(&self.states, handle.clone(), batch.token);

            if batch.operations.is_empty() && !identity.is_local() {
                in_flight.release()?;
                debug!(identity = %identity, "nothing to save");
                return Ok(handle);
            }

            let request = SaveRequest {
                identity: identity.clone(),
                operations: batch.operations,
            };
            match self.remote.save(request).await {
                Ok(response) => {
                    in_flight.commit(response.attributes)?;
                    if let (ObjectId::Local(_), Some(object_id)) = (identity.id(), response.object_id) {
                        handle = self.assign_server_id(&handle, &identity, object_id)?;
                    }

                    let identity = handle.identity().clone();
                    info!(identity = %identity, attempt, "saved");
                    let _ = self.event_tx.send(ClientEvent::Saved { identity });

                    remaining -= 1;
                    if remaining == 0 {
                        return Ok(handle);
                    }
                    attempt = 0;
                }
                Err(error) => {
                    in_flight.release()?;
                    warn!(identity = %identity, attempt, error = %error, "save failed");
                    let _ = self.event_tx.send(ClientEvent::SaveFailed {
                        identity,
                        attempt,
                        error: error.to_string(),
                    });

                    if !error.is_retryable() || attempt >= self.config.max_save_attempts {
                        return Err(SdkError::Remote(error));
                    }
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
            }
        }
    }

    /// Non-empty operation sets waiting to be sent.
    fn queued_sets(&self, handle: &Handle) -> Result<usize> {
        let states = self.states.read();
        Ok(states.record(handle)?.map_or(0, |record| {
            record.pending_sets().iter().filter(|set| !set.is_empty()).count()
        }))
    }

    fn assign_server_id(&self, handle: &Handle, from: &Identity, object_id: String) -> Result<Handle> {
        let to = from.with_server_id(object_id);
        let renamed = self.states.write().rename(handle, to.clone())?;
        if self.config.strategy == Strategy::SingleInstance {
            let mut aliases = self.aliases.write();
            aliases.saved_as.insert(from.clone(), to.clone());
            aliases.created_as.insert(to.clone(), from.clone());
        }

        debug!(from = %from, to = %to, "assigned server id");
        let _ = self.event_tx.send(ClientEvent::Renamed {
            from: from.clone(),
            to,
        });
        Ok(renamed)
    }

    fn saved_identity(&self, handle: &Handle) -> Result<Identity> {
        let identity = self.identity(handle)?;
        if identity.is_local() {
            return Err(SdkError::NotSaved(identity.to_string()));
        }
        Ok(identity)
    }

    /// Follow a local identity to the server identity it was saved as.
    fn resolve(&self, handle: &Handle) -> Handle {
        let target = self.aliases.read().saved_as.get(handle.identity()).cloned();
        match target {
            Some(identity) => self.states.write().lookup_or_create(identity),
            None => handle.clone(),
        }
    }

    /// Queue key for `handle`. A saved local object keeps the key of its
    /// local identity, so tasks queued before and after the rename share it.
    fn task_key(&self, handle: &Handle) -> TaskKey {
        match self.config.strategy {
            Strategy::SingleInstance => {
                let identity = handle.identity();
                let origin = self.aliases.read().created_as.get(identity).cloned();
                TaskKey::Identity(origin.unwrap_or_else(|| identity.clone()))
            }
            Strategy::UniqueInstance => TaskKey::Instance(handle.instance()),
        }
    }
}

/// A submitted operation set. Unless committed, it goes back to the pending
/// queue when dropped, including when the save future is cancelled.
struct InFlight<'a> {
    states: &'a SharedController,
    handle: Handle,
    token: SaveToken,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(states: &'a SharedController, handle: Handle, token: SaveToken) -> Self {
        Self {
            states,
            handle,
            token,
            settled: false,
        }
    }

    fn commit(mut self, response: Attributes) -> Result<()> {
        self.settled = true;
        let committed = self.states.write().commit_save(&self.handle, self.token, response);
        Ok(committed?)
    }

    /// Hand the set back without confirming anything.
    fn release(mut self) -> Result<()> {
        self.settled = true;
        let released = self.states.write().fail_save(&self.handle, self.token);
        Ok(released?)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.states.write().fail_save(&self.handle, self.token) {
            Ok(()) => debug!(identity = %self.handle.identity(), token = %self.token, "abandoned save requeued"),
            Err(e) => warn!(identity = %self.handle.identity(), error = %e, "could not requeue abandoned save"),
        }
    }
}
