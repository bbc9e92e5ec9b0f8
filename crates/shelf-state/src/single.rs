//! Single-Instance controller: one shared record per identity.
//!
//! The registry is an ordinary value owned by whoever constructs it and
//! lives until it is dropped or [`SingleInstanceController::clear_all`] is
//! called. Every handle naming the same identity resolves to the same record,
//! so an edit through one handle is visible through all of them.
//!
//! After [`rename`](StateController::rename) the old identity no longer has
//! state. Handles still naming it are not redirected; callers must switch to
//! the handle `rename` returns.

use crate::controller::{Handle, StateController, Strategy};
use crate::error::{Result, StateError};
use crate::record::StateRecord;
use shelf_core::Identity;
use std::collections::HashMap;
use tracing::debug;

/// Identity-mapped object state.
#[derive(Clone, Debug, Default)]
pub struct SingleInstanceController {
    records: HashMap<Identity, StateRecord>,
}

impl SingleInstanceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record.
    pub fn clear_all(&mut self) {
        self.records.clear();
    }

    /// Identities that currently have state.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.records.keys()
    }
}

impl StateController for SingleInstanceController {
    fn strategy(&self) -> Strategy {
        Strategy::SingleInstance
    }

    fn lookup_or_create(&mut self, identity: Identity) -> Handle {
        self.records
            .entry(identity.clone())
            .or_insert_with(|| StateRecord::new(identity.clone()));
        Handle::new(identity)
    }

    fn record(&self, handle: &Handle) -> Result<Option<&StateRecord>> {
        Ok(self.records.get(handle.identity()))
    }

    fn record_mut(&mut self, handle: &Handle) -> Result<&mut StateRecord> {
        let identity = handle.identity();
        Ok(self
            .records
            .entry(identity.clone())
            .or_insert_with(|| StateRecord::new(identity.clone())))
    }

    fn duplicate(&mut self, handle: &Handle) -> Result<Handle> {
        Ok(handle.clone())
    }

    fn rename(&mut self, handle: &Handle, identity: Identity) -> Result<Handle> {
        let old = handle.identity();
        if old == &identity {
            return Ok(handle.clone());
        }
        if self.records.contains_key(&identity) {
            return Err(StateError::IdentityTaken(identity.to_string()));
        }

        let mut record = self
            .records
            .remove(old)
            .unwrap_or_else(|| StateRecord::new(old.clone()));
        record.rekey(identity.clone());
        self.records.insert(identity.clone(), record);

        debug!(from = %old, to = %identity, "renamed shared state");
        Ok(handle.renamed(identity))
    }

    fn release(&mut self, handle: &Handle) -> Result<Option<StateRecord>> {
        Ok(self.records.remove(handle.identity()))
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handles_share_state() {
        let mut ctl = SingleInstanceController::new();
        let first = ctl.lookup_or_create(Identity::server("Item", "1"));
        let second = ctl.lookup_or_create(Identity::server("Item", "1"));

        ctl.set(&first, "label", json!("x")).unwrap();
        assert_eq!(ctl.estimate(&second, "label").unwrap(), Some(json!("x")));

        ctl.set(&second, "label", json!("y")).unwrap();
        assert_eq!(ctl.estimate(&first, "label").unwrap(), Some(json!("y")));
        assert_eq!(ctl.len(), 1);
    }

    #[test]
    fn test_unknown_identity_reads_empty() {
        let ctl = SingleInstanceController::new();
        let handle = Handle::new(Identity::server("Item", "nope"));

        assert!(ctl.server_data(&handle).unwrap().is_empty());
        assert_eq!(ctl.estimate(&handle, "a").unwrap(), None);
        assert!(!ctl.existed(&handle).unwrap());
    }

    #[test]
    fn test_duplicate_is_the_same_record() {
        let mut ctl = SingleInstanceController::new();
        let handle = ctl.lookup_or_create(Identity::server("Item", "1"));
        let copy = ctl.duplicate(&handle).unwrap();

        ctl.set(&handle, "label", json!("x")).unwrap();
        assert_eq!(ctl.estimate(&copy, "label").unwrap(), Some(json!("x")));
    }

    #[test]
    fn test_rename_moves_state() {
        let mut ctl = SingleInstanceController::new();
        let handle = ctl.lookup_or_create(Identity::local("Item", "local7"));
        ctl.increment(&handle, "count", 3.into()).unwrap();

        let renamed = ctl.rename(&handle, Identity::server("Item", "srv99")).unwrap();

        assert_eq!(ctl.estimate(&renamed, "count").unwrap(), Some(json!(3)));
        assert_eq!(ctl.len(), 1);
        assert_eq!(
            ctl.identities().collect::<Vec<_>>(),
            vec![&Identity::server("Item", "srv99")]
        );
        // The old handle is not redirected.
        assert_eq!(ctl.estimate(&handle, "count").unwrap(), None);
    }

    #[test]
    fn test_rename_onto_existing_identity_fails() {
        let mut ctl = SingleInstanceController::new();
        let local = ctl.lookup_or_create(Identity::local("Item", "local7"));
        ctl.lookup_or_create(Identity::server("Item", "srv99"));

        let err = ctl
            .rename(&local, Identity::server("Item", "srv99"))
            .unwrap_err();
        assert_eq!(err, StateError::IdentityTaken("Item:srv99".to_string()));
        assert_eq!(ctl.len(), 2);
    }

    #[test]
    fn test_release_and_clear_all() {
        let mut ctl = SingleInstanceController::new();
        let a = ctl.lookup_or_create(Identity::server("Item", "1"));
        ctl.lookup_or_create(Identity::server("Item", "2"));

        assert!(ctl.release(&a).unwrap().is_some());
        assert_eq!(ctl.len(), 1);

        ctl.clear_all();
        assert!(ctl.is_empty());
    }
}
