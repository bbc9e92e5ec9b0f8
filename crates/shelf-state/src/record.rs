//! State Record - server attributes plus queued and in-flight operations.
//!
//! One record exists per object (per identity or per instance, depending on
//! the controller). It holds:
//! - the last attributes confirmed by the server
//! - pending operation sets, oldest first; the newest one receives edits
//! - in-flight operation sets, submitted to the server and unconfirmed
//!
//! A save moves the oldest pending set into the in-flight list. While it is
//! out, new edits land in a fresh pending set so they never race the request.

use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use shelf_core::{AttributeUpdate, Attributes, Identity, Operation, OperationSet};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Identifies one in-flight operation set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SaveToken(u64);

impl fmt::Display for SaveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An operation set submitted to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InFlightSet {
    pub token: SaveToken,
    pub operations: OperationSet,
}

/// What a caller sends when a save begins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveBatch {
    pub token: SaveToken,
    pub operations: OperationSet,
}

/// Cached state of one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    identity: Identity,
    server_attributes: Attributes,
    pending: VecDeque<OperationSet>,
    in_flight: VecDeque<InFlightSet>,
    existed: bool,
    next_token: u64,
}

impl StateRecord {
    /// Create an empty record.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            server_attributes: Attributes::new(),
            pending: VecDeque::from([OperationSet::new()]),
            in_flight: VecDeque::new(),
            existed: false,
            next_token: 1,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Point the record at a new identity, keeping everything queued.
    pub fn rekey(&mut self, identity: Identity) {
        self.identity = identity;
    }

    pub fn server_data(&self) -> &Attributes {
        &self.server_attributes
    }

    pub fn pending_sets(&self) -> &VecDeque<OperationSet> {
        &self.pending
    }

    pub fn in_flight_sets(&self) -> &VecDeque<InFlightSet> {
        &self.in_flight
    }

    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn set_existed(&mut self, existed: bool) {
        self.existed = existed;
    }

    // === Attribute store ===

    /// Merge keys into the server attributes. `None` deletes the key.
    pub fn set_server_data(&mut self, updates: AttributeUpdate) {
        for (key, value) in updates {
            match value {
                Some(value) => {
                    self.server_attributes.insert(key, value);
                }
                None => {
                    self.server_attributes.remove(&key);
                }
            }
        }
    }

    /// Replace the server attributes after a fetch.
    pub fn apply_fetch(&mut self, attributes: Attributes) {
        self.server_attributes = attributes;
        self.existed = true;
    }

    /// Operation queued for `key` in the newest pending set.
    pub fn pending_op(&self, key: &str) -> Option<&Operation> {
        self.pending.back().and_then(|set| set.get(key))
    }

    /// Queue `op` for `key` in the newest pending set, merged with whatever is
    /// already there. `None` clears the key.
    pub fn set_pending_op(&mut self, key: &str, op: Option<Operation>) -> Result<()> {
        if self.pending.is_empty() {
            self.pending.push_back(OperationSet::new());
        }
        let Some(newest) = self.pending.back_mut() else {
            return Ok(());
        };

        match op {
            None => {
                newest.remove(key);
            }
            Some(op) => {
                let merged = op
                    .merge_with(newest.get(key))
                    .map_err(|source| StateError::MergeConflict {
                        key: key.to_string(),
                        source,
                    })?;
                newest.insert(key.to_string(), merged);
            }
        }
        Ok(())
    }

    /// Start a fresh pending set; the previous newest set stops taking edits.
    pub fn push_pending_state(&mut self) {
        self.pending.push_back(OperationSet::new());
    }

    /// Remove and return the oldest pending set.
    ///
    /// Fails if a set is already in flight: only one save may consume the
    /// pending queue at a time.
    pub fn pop_pending_state(&mut self) -> Result<OperationSet> {
        if !self.in_flight.is_empty() {
            return Err(StateError::SaveInFlightConflict(self.identity.to_string()));
        }
        let oldest = self.pending.pop_front().unwrap_or_default();
        if self.pending.is_empty() {
            self.pending.push_back(OperationSet::new());
        }
        Ok(oldest)
    }

    /// Merge the two oldest pending sets into one, later edits winning.
    ///
    /// Returns `false` and leaves both sets in place if some key holds a pair
    /// of operations that cannot be merged.
    pub fn merge_first_pending_state(&mut self) -> bool {
        if self.pending.len() < 2 {
            return false;
        }

        let first = &self.pending[0];
        let mut merged = self.pending[1].clone();
        for (key, earlier) in first {
            let combined = match merged.get(key) {
                Some(later) => match later.merge_with(Some(earlier)) {
                    Ok(op) => op,
                    Err(err) => {
                        warn!(
                            identity = %self.identity,
                            key = %key,
                            error = %err,
                            "keeping pending sets apart"
                        );
                        return false;
                    }
                },
                None => earlier.clone(),
            };
            merged.insert(key.clone(), combined);
        }

        self.pending.pop_front();
        self.pending[0] = merged;
        true
    }

    /// Drop server attributes and every queued or in-flight set.
    pub fn clear_all_state(&mut self) {
        self.server_attributes.clear();
        self.pending = VecDeque::from([OperationSet::new()]);
        self.in_flight.clear();
        self.existed = false;
    }

    // === Save lifecycle ===

    /// Move the oldest pending set in flight.
    pub fn begin_save(&mut self) -> Result<SaveBatch> {
        if !self.in_flight.is_empty() {
            return Err(StateError::SaveInFlightConflict(self.identity.to_string()));
        }

        self.push_pending_state();
        let operations = self.pop_pending_state()?;
        let token = SaveToken(self.next_token);
        self.next_token += 1;

        debug!(
            identity = %self.identity,
            token = %token,
            keys = operations.len(),
            "save started"
        );

        self.in_flight.push_back(InFlightSet {
            token,
            operations: operations.clone(),
        });
        Ok(SaveBatch { token, operations })
    }

    /// Confirm an in-flight set with the attributes the server returned.
    ///
    /// Operations on keys the server did not echo are folded into the server
    /// attributes locally; echoed keys take the server's value.
    pub fn commit_save(&mut self, token: SaveToken, response: Attributes) -> Result<()> {
        let saved = self.take_in_flight(token)?;

        for (key, op) in &saved.operations {
            if response.contains_key(key) {
                continue;
            }
            match op.apply(self.server_attributes.get(key)) {
                Ok(Some(value)) => {
                    self.server_attributes.insert(key.clone(), value);
                }
                Ok(None) => {
                    self.server_attributes.remove(key);
                }
                Err(err) => {
                    warn!(identity = %self.identity, key = %key, error = %err, "could not fold saved operation");
                }
            }
        }
        self.server_attributes.extend(response);
        self.existed = true;

        debug!(identity = %self.identity, token = %token, "save committed");
        Ok(())
    }

    /// Return a failed in-flight set to the front of the pending queue.
    pub fn fail_save(&mut self, token: SaveToken) -> Result<()> {
        let failed = self.take_in_flight(token)?;
        self.pending.push_front(failed.operations);
        self.merge_first_pending_state();

        debug!(identity = %self.identity, token = %token, "save failed, edits requeued");
        Ok(())
    }

    fn take_in_flight(&mut self, token: SaveToken) -> Result<InFlightSet> {
        let position = self.in_flight.iter().position(|set| set.token == token);
        position
            .and_then(|index| self.in_flight.remove(index))
            .ok_or_else(|| StateError::StaleSaveToken {
                identity: self.identity.to_string(),
                token,
            })
    }

    // === Queries ===

    /// Every operation on `key`, in-flight sets first, oldest first.
    pub fn operations_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Operation> + 'a {
        self.in_flight
            .iter()
            .filter_map(move |set| set.operations.get(key))
            .chain(self.pending.iter().filter_map(move |set| set.get(key)))
    }

    /// Keys present in server attributes or any operation set.
    pub fn known_keys(&self) -> BTreeSet<&str> {
        let mut keys: BTreeSet<&str> = self.server_attributes.keys().map(String::as_str).collect();
        for set in self.in_flight.iter().map(|s| &s.operations).chain(self.pending.iter()) {
            keys.extend(set.keys().map(String::as_str));
        }
        keys
    }

    /// Keys with edits not yet submitted.
    pub fn dirty_keys(&self) -> BTreeSet<String> {
        self.pending
            .iter()
            .flat_map(|set| set.keys().cloned())
            .collect()
    }

    /// Drop unsubmitted edits, for the given keys or for every key.
    pub fn revert(&mut self, keys: Option<&[&str]>) {
        for set in self.pending.iter_mut() {
            match keys {
                Some(keys) => set.retain(|key, _| !keys.contains(&key.as_str())),
                None => set.clear(),
            }
        }
        // Older sets left empty are dropped; the newest keeps taking edits.
        let newest = self.pending.pop_back().unwrap_or_default();
        self.pending.retain(|set| !set.is_empty());
        self.pending.push_back(newest);
    }

    /// An independent copy for another instance.
    ///
    /// In-flight sets become plain pending sets of the copy, so its estimate
    /// matches this record's while it owns no outstanding save.
    pub fn detached_copy(&self) -> StateRecord {
        let mut pending: VecDeque<OperationSet> = self
            .in_flight
            .iter()
            .map(|set| set.operations.clone())
            .chain(self.pending.iter().cloned())
            .collect();
        if pending.is_empty() {
            pending.push_back(OperationSet::new());
        }

        StateRecord {
            identity: self.identity.clone(),
            server_attributes: self.server_attributes.clone(),
            pending,
            in_flight: VecDeque::new(),
            existed: self.existed,
            next_token: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> StateRecord {
        StateRecord::new(Identity::server("Item", "1"))
    }

    #[test]
    fn test_set_server_data_merges_and_deletes() {
        let mut rec = record();
        rec.set_server_data(AttributeUpdate::from([
            ("a".to_string(), Some(json!(1))),
            ("b".to_string(), Some(json!(2))),
        ]));
        rec.set_server_data(AttributeUpdate::from([
            ("a".to_string(), None),
            ("c".to_string(), Some(json!(3))),
        ]));

        assert_eq!(
            rec.server_data(),
            &Attributes::from([("b".to_string(), json!(2)), ("c".to_string(), json!(3))])
        );
        assert_eq!(rec.pending_sets().len(), 1);
    }

    #[test]
    fn test_set_pending_op_merges_in_newest_set() {
        let mut rec = record();
        rec.set_pending_op("count", Some(Operation::increment(5))).unwrap();
        rec.set_pending_op("count", Some(Operation::increment(-2))).unwrap();
        assert_eq!(rec.pending_op("count"), Some(&Operation::increment(3)));

        rec.push_pending_state();
        rec.set_pending_op("count", Some(Operation::increment(1))).unwrap();
        assert_eq!(rec.pending_op("count"), Some(&Operation::increment(1)));
        assert_eq!(rec.pending_sets().len(), 2);

        rec.set_pending_op("count", None).unwrap();
        assert_eq!(rec.pending_op("count"), None);
        assert_eq!(rec.pending_sets()[0].get("count"), Some(&Operation::increment(3)));
    }

    #[test]
    fn test_set_pending_op_conflict_leaves_state() {
        let mut rec = record();
        rec.set_pending_op("tags", Some(Operation::add_unique(vec![json!("a")])))
            .unwrap();
        let before = rec.clone();

        let err = rec
            .set_pending_op("tags", Some(Operation::increment(1)))
            .unwrap_err();
        assert!(matches!(err, StateError::MergeConflict { ref key, .. } if key == "tags"));
        assert_eq!(rec, before);
    }

    #[test]
    fn test_pop_pending_state_reseeds() {
        let mut rec = record();
        rec.set_pending_op("a", Some(Operation::set(json!(1)))).unwrap();

        let popped = rec.pop_pending_state().unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(rec.pending_sets().len(), 1);
        assert!(rec.pending_sets()[0].is_empty());
    }

    #[test]
    fn test_pop_refuses_while_in_flight() {
        let mut rec = record();
        rec.begin_save().unwrap();
        assert!(matches!(
            rec.pop_pending_state(),
            Err(StateError::SaveInFlightConflict(_))
        ));
        assert!(matches!(
            rec.begin_save(),
            Err(StateError::SaveInFlightConflict(_))
        ));
    }

    #[test]
    fn test_merge_first_pending_state_later_wins() {
        let mut rec = record();
        rec.set_pending_op("a", Some(Operation::set(json!(1)))).unwrap();
        rec.set_pending_op("n", Some(Operation::increment(2))).unwrap();
        rec.push_pending_state();
        rec.set_pending_op("a", Some(Operation::set(json!(9)))).unwrap();
        rec.set_pending_op("n", Some(Operation::increment(3))).unwrap();

        assert!(rec.merge_first_pending_state());
        assert_eq!(rec.pending_sets().len(), 1);
        assert_eq!(rec.pending_op("a"), Some(&Operation::set(json!(9))));
        assert_eq!(rec.pending_op("n"), Some(&Operation::increment(5)));
    }

    #[test]
    fn test_merge_first_pending_state_keeps_unmergeable_sets() {
        let mut rec = record();
        rec.set_pending_op("x", Some(Operation::unset())).unwrap();
        rec.push_pending_state();
        rec.set_pending_op(
            "x",
            Some(Operation::relation_add(&[Identity::server("Tag", "t")]).unwrap()),
        )
        .unwrap();

        assert!(!rec.merge_first_pending_state());
        assert_eq!(rec.pending_sets().len(), 2);
    }

    #[test]
    fn test_commit_folds_unechoed_ops() {
        let mut rec = record();
        rec.set_server_data(AttributeUpdate::from([
            ("gone".to_string(), Some(json!(true))),
        ]));
        rec.set_pending_op("label", Some(Operation::set(json!("x")))).unwrap();
        rec.set_pending_op("gone", Some(Operation::unset())).unwrap();
        rec.set_pending_op("count", Some(Operation::increment(2))).unwrap();

        let batch = rec.begin_save().unwrap();
        assert_eq!(batch.operations.len(), 3);

        rec.commit_save(
            batch.token,
            Attributes::from([("count".to_string(), json!(12))]),
        )
        .unwrap();

        assert_eq!(
            rec.server_data(),
            &Attributes::from([
                ("count".to_string(), json!(12)),
                ("label".to_string(), json!("x")),
            ])
        );
        assert!(rec.existed());
        assert!(rec.in_flight_sets().is_empty());
    }

    #[test]
    fn test_second_commit_is_rejected() {
        let mut rec = record();
        rec.set_pending_op("count", Some(Operation::increment(1))).unwrap();
        let batch = rec.begin_save().unwrap();

        rec.commit_save(batch.token, Attributes::new()).unwrap();
        let once = rec.clone();

        let err = rec.commit_save(batch.token, Attributes::new()).unwrap_err();
        assert!(matches!(err, StateError::StaleSaveToken { .. }));
        assert_eq!(rec, once);
    }

    #[test]
    fn test_fail_save_requeues_in_front() {
        let mut rec = record();
        rec.set_pending_op("count", Some(Operation::increment(5))).unwrap();
        let batch = rec.begin_save().unwrap();
        rec.set_pending_op("count", Some(Operation::increment(1))).unwrap();

        rec.fail_save(batch.token).unwrap();

        assert!(rec.in_flight_sets().is_empty());
        assert_eq!(rec.pending_sets().len(), 1);
        assert_eq!(rec.pending_op("count"), Some(&Operation::increment(6)));
    }

    #[test]
    fn test_dirty_keys_and_revert() {
        let mut rec = record();
        rec.set_pending_op("a", Some(Operation::set(json!(1)))).unwrap();
        rec.push_pending_state();
        rec.set_pending_op("b", Some(Operation::set(json!(2)))).unwrap();

        assert_eq!(rec.dirty_keys().len(), 2);

        rec.revert(Some(&["a"]));
        assert_eq!(rec.dirty_keys(), BTreeSet::from(["b".to_string()]));

        rec.revert(None);
        assert!(rec.dirty_keys().is_empty());
        assert_eq!(rec.pending_sets().len(), 1);
    }

    #[test]
    fn test_detached_copy_flattens_in_flight() {
        let mut rec = record();
        rec.set_pending_op("a", Some(Operation::set(json!(1)))).unwrap();
        rec.begin_save().unwrap();
        rec.set_pending_op("b", Some(Operation::set(json!(2)))).unwrap();

        let copy = rec.detached_copy();
        assert!(copy.in_flight_sets().is_empty());
        assert_eq!(copy.pending_sets().len(), 2);
        assert_eq!(copy.operations_for("a").count(), 1);
        assert_eq!(copy.operations_for("b").count(), 1);
    }

    #[test]
    fn test_clear_all_state() {
        let mut rec = record();
        rec.apply_fetch(Attributes::from([("a".to_string(), json!(1))]));
        rec.set_pending_op("b", Some(Operation::set(json!(2)))).unwrap();
        rec.begin_save().unwrap();

        rec.clear_all_state();

        assert!(rec.server_data().is_empty());
        assert!(rec.in_flight_sets().is_empty());
        assert!(rec.dirty_keys().is_empty());
        assert!(!rec.existed());
    }
}
