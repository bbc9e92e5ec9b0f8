//! State controllers.
//!
//! A controller decides how handles map to [`StateRecord`]s. Two strategies
//! implement the same [`StateController`] trait:
//!
//! - [`SingleInstanceController`](crate::SingleInstanceController): one record
//!   per identity, shared by every handle that names it.
//! - [`UniqueInstanceController`](crate::UniqueInstanceController): one record
//!   per handle, even when two handles name the same identity.
//!
//! Implementations only provide record lookup, duplication, renaming and
//! release. Everything callers use on top (edits, estimates, the save
//! lifecycle) is provided by the trait and behaves the same for both.

use crate::error::{Result, StateError};
use crate::estimate::{estimate_attribute, estimate_attributes};
use crate::record::{SaveBatch, SaveToken, StateRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use shelf_core::{AttributeUpdate, Attributes, Identity, Operation};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;
use ulid::Ulid;

/// Which addressing strategy a controller uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One shared record per identity.
    #[default]
    SingleInstance,
    /// One independent record per handle.
    UniqueInstance,
}

/// Identifies one object reference held by a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(Ulid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A caller's reference to an object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    identity: Identity,
    instance: InstanceId,
}

impl Handle {
    pub(crate) fn new(identity: Identity) -> Self {
        Self {
            identity,
            instance: InstanceId::new(),
        }
    }

    pub(crate) fn renamed(&self, identity: Identity) -> Self {
        Self {
            identity,
            instance: self.instance,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.instance)
    }
}

/// Maps handles to object state and exposes the cache operations.
pub trait StateController {
    fn strategy(&self) -> Strategy;

    /// Resolve an identity to a handle, creating empty state if needed.
    fn lookup_or_create(&mut self, identity: Identity) -> Handle;

    /// The record behind `handle`, if there is one yet.
    fn record(&self, handle: &Handle) -> Result<Option<&StateRecord>>;

    /// The record behind `handle`, created if the strategy allows it.
    fn record_mut(&mut self, handle: &Handle) -> Result<&mut StateRecord>;

    /// A handle for another reference to the same object.
    fn duplicate(&mut self, handle: &Handle) -> Result<Handle>;

    /// Re-key state from the handle's identity to `identity`.
    fn rename(&mut self, handle: &Handle, identity: Identity) -> Result<Handle>;

    /// Drop the record behind `handle` entirely.
    fn release(&mut self, handle: &Handle) -> Result<Option<StateRecord>>;

    /// Number of records held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A handle for a new, never-saved object.
    fn create_local(&mut self, class_name: &str) -> Handle {
        self.lookup_or_create(Identity::new_local(class_name))
    }

    // === Attribute store ===

    fn server_data(&self, handle: &Handle) -> Result<Cow<'_, Attributes>> {
        Ok(match self.record(handle)? {
            Some(record) => Cow::Borrowed(record.server_data()),
            None => Cow::Owned(Attributes::new()),
        })
    }

    fn set_server_data(&mut self, handle: &Handle, updates: AttributeUpdate) -> Result<()> {
        self.record_mut(handle)?.set_server_data(updates);
        Ok(())
    }

    /// Replace server attributes with a fetch result.
    fn apply_fetch(&mut self, handle: &Handle, attributes: Attributes) -> Result<()> {
        self.record_mut(handle)?.apply_fetch(attributes);
        Ok(())
    }

    fn existed(&self, handle: &Handle) -> Result<bool> {
        Ok(self.record(handle)?.is_some_and(StateRecord::existed))
    }

    // === Edits ===

    /// Queue an operation on `key`.
    ///
    /// The operation must apply to the current estimate and merge with what is
    /// already queued on the key; otherwise nothing changes and the conflict
    /// is returned.
    fn apply_op(&mut self, handle: &Handle, key: &str, op: Operation) -> Result<()> {
        let record = self.record_mut(handle)?;
        let current = estimate_attribute(record, key);
        op.apply(current.as_ref())
            .map_err(|source| StateError::MergeConflict {
                key: key.to_string(),
                source,
            })?;

        trace!(identity = %record.identity(), key = %key, op = op.kind(), "queue operation");
        record.set_pending_op(key, Some(op))
    }

    fn set(&mut self, handle: &Handle, key: &str, value: Value) -> Result<()> {
        self.apply_op(handle, key, Operation::set(value))
    }

    fn unset(&mut self, handle: &Handle, key: &str) -> Result<()> {
        self.apply_op(handle, key, Operation::unset())
    }

    fn increment(&mut self, handle: &Handle, key: &str, amount: Number) -> Result<()> {
        self.apply_op(handle, key, Operation::increment(amount))
    }

    fn add(&mut self, handle: &Handle, key: &str, elements: Vec<Value>) -> Result<()> {
        self.apply_op(handle, key, Operation::add(elements))
    }

    fn add_unique(&mut self, handle: &Handle, key: &str, elements: Vec<Value>) -> Result<()> {
        self.apply_op(handle, key, Operation::add_unique(elements))
    }

    fn remove(&mut self, handle: &Handle, key: &str, elements: Vec<Value>) -> Result<()> {
        self.apply_op(handle, key, Operation::remove(elements))
    }

    fn relation_add(&mut self, handle: &Handle, key: &str, targets: &[Identity]) -> Result<()> {
        let op = Operation::relation_add(targets).map_err(|source| StateError::MergeConflict {
            key: key.to_string(),
            source,
        })?;
        self.apply_op(handle, key, op)
    }

    fn relation_remove(&mut self, handle: &Handle, key: &str, targets: &[Identity]) -> Result<()> {
        let op = Operation::relation_remove(targets).map_err(|source| StateError::MergeConflict {
            key: key.to_string(),
            source,
        })?;
        self.apply_op(handle, key, op)
    }

    /// Drop unsubmitted edits for `keys`, or all of them.
    fn revert(&mut self, handle: &Handle, keys: Option<&[&str]>) -> Result<()> {
        self.record_mut(handle)?.revert(keys);
        Ok(())
    }

    // === Reads ===

    fn estimate(&self, handle: &Handle, key: &str) -> Result<Option<Value>> {
        Ok(self
            .record(handle)?
            .and_then(|record| estimate_attribute(record, key)))
    }

    fn estimate_all(&self, handle: &Handle) -> Result<Attributes> {
        Ok(self
            .record(handle)?
            .map(estimate_attributes)
            .unwrap_or_default())
    }

    fn dirty_keys(&self, handle: &Handle) -> Result<BTreeSet<String>> {
        Ok(self
            .record(handle)?
            .map(StateRecord::dirty_keys)
            .unwrap_or_default())
    }

    /// Whether the object, or one key of it, has unsaved changes.
    ///
    /// An object that was never saved is always dirty.
    fn is_dirty(&self, handle: &Handle, key: Option<&str>) -> Result<bool> {
        let dirty = self.dirty_keys(handle)?;
        Ok(match key {
            Some(key) => dirty.contains(key),
            None => handle.identity().is_local() || !dirty.is_empty(),
        })
    }

    // === Save lifecycle ===

    fn begin_save(&mut self, handle: &Handle) -> Result<SaveBatch> {
        self.record_mut(handle)?.begin_save()
    }

    fn commit_save(&mut self, handle: &Handle, token: SaveToken, attributes: Attributes) -> Result<()> {
        self.record_mut(handle)?.commit_save(token, attributes)
    }

    fn fail_save(&mut self, handle: &Handle, token: SaveToken) -> Result<()> {
        self.record_mut(handle)?.fail_save(token)
    }

    /// Forget everything known about the object, as after a local delete.
    fn clear(&mut self, handle: &Handle) -> Result<()> {
        self.record_mut(handle)?.clear_all_state();
        Ok(())
    }
}
