//! Unique-Instance controller: one independent record per handle.
//!
//! Records are keyed by the handle's [`InstanceId`], not by identity. Two
//! handles for the same identity never see each other's edits, and renaming
//! one handle leaves every other handle for the old identity untouched. That
//! weaker consistency is the point of this strategy.

use crate::controller::{Handle, InstanceId, StateController, Strategy};
use crate::error::{Result, StateError};
use crate::record::StateRecord;
use shelf_core::Identity;
use std::collections::HashMap;
use tracing::debug;

/// Per-reference object state.
#[derive(Clone, Debug, Default)]
pub struct UniqueInstanceController {
    records: HashMap<InstanceId, StateRecord>,
}

impl UniqueInstanceController {
    pub fn new() -> Self {
        Self::default()
    }

    fn unknown(handle: &Handle) -> StateError {
        StateError::UnknownIdentity(handle.to_string())
    }
}

impl StateController for UniqueInstanceController {
    fn strategy(&self) -> Strategy {
        Strategy::UniqueInstance
    }

    fn lookup_or_create(&mut self, identity: Identity) -> Handle {
        let handle = Handle::new(identity.clone());
        self.records
            .insert(handle.instance(), StateRecord::new(identity));
        handle
    }

    fn record(&self, handle: &Handle) -> Result<Option<&StateRecord>> {
        self.records
            .get(&handle.instance())
            .map(Some)
            .ok_or_else(|| Self::unknown(handle))
    }

    fn record_mut(&mut self, handle: &Handle) -> Result<&mut StateRecord> {
        self.records
            .get_mut(&handle.instance())
            .ok_or_else(|| Self::unknown(handle))
    }

    fn duplicate(&mut self, handle: &Handle) -> Result<Handle> {
        let copy = self
            .records
            .get(&handle.instance())
            .ok_or_else(|| Self::unknown(handle))?
            .detached_copy();

        let duplicate = Handle::new(handle.identity().clone());
        self.records.insert(duplicate.instance(), copy);
        Ok(duplicate)
    }

    fn rename(&mut self, handle: &Handle, identity: Identity) -> Result<Handle> {
        let record = self.record_mut(handle)?;
        record.rekey(identity.clone());

        debug!(from = %handle.identity(), to = %identity, "renamed instance state");
        Ok(handle.renamed(identity))
    }

    fn release(&mut self, handle: &Handle) -> Result<Option<StateRecord>> {
        self.records
            .remove(&handle.instance())
            .map(Some)
            .ok_or_else(|| Self::unknown(handle))
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
