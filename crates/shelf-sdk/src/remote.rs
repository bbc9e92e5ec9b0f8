//! Remote store abstractions.
//!
//! The client only needs three calls from a server: save a batch of
//! operations, fetch an object and destroy one. [`MemoryRemote`] implements
//! them in memory for tests and simulation, with injectable failures.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shelf_core::{Attributes, Identity, ObjectId, OperationSet};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use ulid::Ulid;

/// A save sent to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub identity: Identity,
    pub operations: OperationSet,
}

/// What the server answered to a save.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveResponse {
    /// Server id assigned to an object saved for the first time.
    pub object_id: Option<String>,
    /// Authoritative values for keys the server computed.
    pub attributes: Attributes,
}

/// Remote store failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Whether sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Abstract remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Apply a batch of operations to one object.
    async fn save(&self, request: SaveRequest) -> Result<SaveResponse, RemoteError>;

    /// Current attributes of a saved object.
    async fn fetch(&self, identity: &Identity) -> Result<Attributes, RemoteError>;

    /// Delete a saved object.
    async fn destroy(&self, identity: &Identity) -> Result<(), RemoteError>;
}

/// In-memory remote store for testing and simulation.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    objects: RwLock<HashMap<Identity, Attributes>>,
    failures: RwLock<VecDeque<RemoteError>>,
    latency: Option<Duration>,
    saves: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Store an object directly, bypassing any client.
    pub fn insert(&self, identity: Identity, attributes: Attributes) {
        self.objects.write().insert(identity, attributes);
    }

    /// Stored attributes of an object.
    pub fn get(&self, identity: &Identity) -> Option<Attributes> {
        self.objects.read().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of save requests received, failed ones included.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make the next `count` requests fail as unavailable.
    pub fn fail_next(&self, count: usize) {
        let mut failures = self.failures.write();
        for _ in 0..count {
            failures.push_back(RemoteError::Unavailable("injected failure".to_string()));
        }
    }

    /// Make the next request fail with `error`.
    pub fn fail_next_with(&self, error: RemoteError) {
        self.failures.write().push_back(error);
    }

    async fn round_trip(&self) -> Result<(), RemoteError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.failures.write().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn save(&self, request: SaveRequest) -> Result<SaveResponse, RemoteError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let SaveRequest {
            identity,
            operations,
        } = request;
        let mut objects = self.objects.write();

        let (stored_as, object_id) = match identity.id() {
            ObjectId::Local(_) => {
                let id = Ulid::new().to_string().to_lowercase();
                (identity.with_server_id(id.clone()), Some(id))
            }
            ObjectId::Server(_) if objects.contains_key(&identity) => (identity.clone(), None),
            ObjectId::Server(_) => return Err(RemoteError::NotFound(identity.to_string())),
        };

        let mut attributes = objects.get(&stored_as).cloned().unwrap_or_default();
        let mut computed = Attributes::new();
        for (key, op) in &operations {
            match op
                .apply(attributes.get(key))
                .map_err(|e| RemoteError::Rejected(format!("{}: {}", key, e)))?
            {
                Some(value) => {
                    computed.insert(key.clone(), value.clone());
                    attributes.insert(key.clone(), value);
                }
                None => {
                    attributes.remove(key);
                }
            }
        }
        objects.insert(stored_as, attributes);

        Ok(SaveResponse {
            object_id,
            attributes: computed,
        })
    }

    async fn fetch(&self, identity: &Identity) -> Result<Attributes, RemoteError> {
        self.round_trip().await?;
        self.get(identity)
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()))
    }

    async fn destroy(&self, identity: &Identity) -> Result<(), RemoteError> {
        self.round_trip().await?;
        self.objects
            .write()
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()))
    }
}
