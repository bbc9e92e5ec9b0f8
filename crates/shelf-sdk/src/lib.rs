//! Shelf SDK - async client for the Shelf object state cache
//!
//! The SDK wraps a state controller with a remote store. Edits are applied
//! locally and show up in reads immediately; saves send them to the remote
//! one batch per object at a time, retrying transient failures and keeping
//! edits queued when a save finally fails.
//!
//! # Quick Start
//!
//! ```rust
//! use shelf_sdk::prelude::*;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let client = Client::new_with_memory_remote(ClientConfig::default());
//!
//! let post = client.object("Post");
//! client.set(&post, "title", json!("Hello")).unwrap();
//! client.add_unique(&post, "tags", vec![json!("rust")]).unwrap();
//!
//! let post = client.save(&post).await.unwrap();
//! assert!(!client.is_dirty(&post, None).unwrap());
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`client`] - Client, configuration and events
//! - [`remote`] - Remote store trait and the in-memory remote
//! - [`queue`] - Per-object task serialization
//! - [`error`] - Error types

pub mod client;
pub mod error;
pub mod queue;
pub mod remote;

// Re-exports for convenience
pub use client::{Client, ClientConfig, ClientConfigBuilder, ClientEvent};
pub use error::{Result, SdkError};
pub use queue::{TaskKey, TaskQueue};
pub use remote::{MemoryRemote, RemoteError, RemoteStore, SaveRequest, SaveResponse};

// Re-export commonly used types from the lower layers
pub use shelf_core::{Attributes, Identity, ObjectId, Operation};
pub use shelf_state::{Handle, Strategy};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{Client, ClientConfig, ClientConfigBuilder};
    pub use crate::error::SdkError;
    pub use crate::remote::{MemoryRemote, RemoteStore};
    pub use shelf_core::{Identity, Operation};
    pub use shelf_state::{Handle, Strategy};
}
