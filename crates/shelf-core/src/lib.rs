//! # shelf-core
//!
//! Building blocks for the Shelf object state cache.
//!
//! This crate provides:
//! - Object identities (class name plus local or server id)
//! - Attribute maps and JSON value helpers
//! - The closed set of attribute operations, with local `apply` and
//!   pairwise `merge_with` rules
//!
//! ## Example
//!
//! ```rust
//! use shelf_core::{Identity, Operation};
//! use serde_json::json;
//!
//! let item = Identity::server("Item", "srv99");
//! assert_eq!(item.to_string(), "Item:srv99");
//!
//! let first = Operation::increment(5);
//! let second = Operation::increment(-2);
//! let merged = second.merge_with(Some(&first)).unwrap();
//! assert_eq!(merged.apply(None).unwrap(), Some(json!(3)));
//! ```

pub mod error;
pub mod identity;
pub mod operation;
pub mod value;

pub use error::OpError;
pub use identity::{Identity, ObjectId};
pub use operation::{Operation, OperationSet};
pub use value::{AttributeUpdate, Attributes};
