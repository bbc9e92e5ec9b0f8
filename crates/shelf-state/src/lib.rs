//! # shelf-state
//!
//! Object state for the Shelf client-side cache.
//!
//! This crate provides:
//! - [`StateRecord`]: server attributes plus pending and in-flight operation
//!   sets for one object
//! - Estimated attributes: server state with queued operations applied
//! - [`StateController`] and its two strategies, Single-Instance (shared by
//!   identity) and Unique-Instance (one record per handle)
//!
//! ## Example
//!
//! ```rust
//! use shelf_state::{SingleInstanceController, StateController};
//! use shelf_core::{Attributes, Identity};
//! use serde_json::json;
//!
//! let mut states = SingleInstanceController::new();
//! let item = states.lookup_or_create(Identity::local("Item", "local7"));
//!
//! states.increment(&item, "count", 5.into()).unwrap();
//! states.increment(&item, "count", (-2).into()).unwrap();
//! assert_eq!(states.estimate(&item, "count").unwrap(), Some(json!(3)));
//!
//! // A save takes the queued edits; the server confirms them.
//! let batch = states.begin_save(&item).unwrap();
//! states
//!     .commit_save(&item, batch.token, Attributes::from([("count".into(), json!(3))]))
//!     .unwrap();
//! let item = states.rename(&item, Identity::server("Item", "srv99")).unwrap();
//! assert_eq!(states.estimate(&item, "count").unwrap(), Some(json!(3)));
//! ```

pub mod controller;
pub mod error;
pub mod estimate;
pub mod record;
pub mod single;
pub mod unique;

pub use controller::{Handle, InstanceId, StateController, Strategy};
pub use error::{Result, StateError};
pub use estimate::{estimate_attribute, estimate_attributes};
pub use record::{InFlightSet, SaveBatch, SaveToken, StateRecord};
pub use single::SingleInstanceController;
pub use unique::UniqueInstanceController;

/// A boxed controller for the given strategy.
pub fn controller_for(strategy: Strategy) -> Box<dyn StateController + Send + Sync> {
    match strategy {
        Strategy::SingleInstance => Box::new(SingleInstanceController::new()),
        Strategy::UniqueInstance => Box::new(UniqueInstanceController::new()),
    }
}
