//! Attribute operations.
//!
//! Every local edit to an attribute is one [`Operation`]. Operations are what
//! gets sent to the server; locally they are only ever *applied* to estimate
//! the attribute the caller should currently observe.
//!
//! Two operations queued on the same key collapse into one through
//! [`Operation::merge_with`]. The merged operation must apply exactly like the
//! two applied in order, so the rules below are total over the closed set of
//! kinds and any pair without an equivalent single operation is an
//! [`OpError::Incompatible`].
//!
//! Add-unique, remove and patch all describe "remove these elements, then
//! add-unique those". Chains of them compose as
//! `(R1, A1) then (R2, A2) = (R1 ∪ R2, (A1 − R2) ∪ A2)`.

use crate::error::{OpError, Result};
use crate::identity::{Identity, ObjectId};
use crate::value::{add_numbers, difference, kind_name, relation_target, relation_value, union};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// Operations queued in one save window, by attribute key.
pub type OperationSet = BTreeMap<String, Operation>;

/// A single attribute mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__op")]
pub enum Operation {
    /// Replace the value.
    Set { value: Value },
    /// Remove the attribute.
    #[serde(rename = "Delete")]
    Unset,
    /// Add to a numeric value.
    Increment { amount: Number },
    /// Append elements, duplicates allowed.
    Add { objects: Vec<Value> },
    /// Append elements not already present.
    AddUnique { objects: Vec<Value> },
    /// Remove every occurrence of the elements.
    Remove { objects: Vec<Value> },
    /// Remove elements, then add-unique others. Only produced by merging.
    Patch {
        remove: Vec<Value>,
        add_unique: Vec<Value>,
    },
    /// Add and remove members of a relation to `target_class`.
    Relation {
        target_class: String,
        added: Vec<String>,
        removed: Vec<String>,
    },
}

impl Operation {
    pub fn set(value: impl Into<Value>) -> Self {
        Operation::Set {
            value: value.into(),
        }
    }

    pub fn unset() -> Self {
        Operation::Unset
    }

    pub fn increment(amount: impl Into<Number>) -> Self {
        Operation::Increment {
            amount: amount.into(),
        }
    }

    pub fn add(objects: Vec<Value>) -> Self {
        Operation::Add { objects }
    }

    pub fn add_unique(objects: Vec<Value>) -> Self {
        Operation::AddUnique { objects }
    }

    pub fn remove(objects: Vec<Value>) -> Self {
        Operation::Remove { objects }
    }

    /// Add saved objects to a relation.
    pub fn relation_add(targets: &[Identity]) -> Result<Self> {
        let (target_class, ids) = relation_targets(targets)?;
        Ok(Operation::Relation {
            target_class,
            added: ids,
            removed: Vec::new(),
        })
    }

    /// Remove saved objects from a relation.
    pub fn relation_remove(targets: &[Identity]) -> Result<Self> {
        let (target_class, ids) = relation_targets(targets)?;
        Ok(Operation::Relation {
            target_class,
            added: Vec::new(),
            removed: ids,
        })
    }

    /// Name of the operation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Set { .. } => "Set",
            Operation::Unset => "Unset",
            Operation::Increment { .. } => "Increment",
            Operation::Add { .. } => "Add",
            Operation::AddUnique { .. } => "AddUnique",
            Operation::Remove { .. } => "Remove",
            Operation::Patch { .. } => "Patch",
            Operation::Relation { .. } => "Relation",
        }
    }

    /// Apply to the prior value of the attribute. `None` means absent.
    pub fn apply(&self, prior: Option<&Value>) -> Result<Option<Value>> {
        match self {
            Operation::Set { value } => Ok(Some(value.clone())),
            Operation::Unset => Ok(None),
            Operation::Increment { amount } => match prior {
                None => Ok(Some(Value::Number(amount.clone()))),
                Some(Value::Number(n)) => add_numbers(n, amount)
                    .map(|sum| Some(Value::Number(sum)))
                    .ok_or(OpError::NonFiniteNumber),
                Some(other) => Err(self.mismatch(other)),
            },
            Operation::Add { objects } => {
                let mut out = self.array_base(prior)?;
                out.extend(objects.iter().cloned());
                Ok(Some(Value::Array(out)))
            }
            Operation::AddUnique { .. } | Operation::Remove { .. } | Operation::Patch { .. } => {
                let base = self.array_base(prior)?;
                let (remove, add) = self.array_parts().unwrap_or_default();
                let kept = difference(&base, remove);
                Ok(Some(Value::Array(union(&kept, add))))
            }
            Operation::Relation { target_class, .. } => match prior {
                None => Ok(Some(relation_value(target_class))),
                Some(v) => match relation_target(v) {
                    Some(found) if found == target_class => Ok(Some(v.clone())),
                    Some(found) => Err(OpError::RelationClass {
                        expected: target_class.clone(),
                        found: found.to_string(),
                    }),
                    None => Err(self.mismatch(v)),
                },
            },
        }
    }

    /// Combine with the operation previously queued on the same key.
    ///
    /// The result applies exactly like `previous` followed by `self`.
    pub fn merge_with(&self, previous: Option<&Operation>) -> Result<Operation> {
        let Some(previous) = previous else {
            return Ok(self.clone());
        };

        match (self, previous) {
            (Operation::Set { .. } | Operation::Unset, _) => Ok(self.clone()),

            (Operation::Relation { .. }, Operation::Unset) => Err(self.incompatible(previous)),

            (_, Operation::Set { value }) => Ok(from_estimate(self.apply(Some(value))?)),
            (_, Operation::Unset) => Ok(from_estimate(self.apply(None)?)),

            (Operation::Increment { amount }, Operation::Increment { amount: prior }) => {
                let amount = add_numbers(prior, amount).ok_or(OpError::NonFiniteNumber)?;
                Ok(Operation::Increment { amount })
            }

            (Operation::Add { objects }, Operation::Add { objects: prior }) => {
                let mut merged = prior.clone();
                merged.extend(objects.iter().cloned());
                Ok(Operation::Add { objects: merged })
            }

            (
                Operation::AddUnique { .. } | Operation::Remove { .. } | Operation::Patch { .. },
                Operation::AddUnique { .. } | Operation::Remove { .. } | Operation::Patch { .. },
            ) => {
                let (prior_remove, prior_add) = previous.array_parts().unwrap_or_default();
                let (remove, add) = self.array_parts().unwrap_or_default();
                Ok(from_array_parts(
                    union(prior_remove, remove),
                    union(&difference(prior_add, remove), add),
                ))
            }

            (
                Operation::Relation {
                    target_class,
                    added,
                    removed,
                },
                Operation::Relation {
                    target_class: prior_class,
                    added: prior_added,
                    removed: prior_removed,
                },
            ) => {
                if target_class != prior_class {
                    return Err(OpError::RelationClass {
                        expected: prior_class.clone(),
                        found: target_class.clone(),
                    });
                }
                Ok(Operation::Relation {
                    target_class: target_class.clone(),
                    added: merge_ids(prior_added, removed, added),
                    removed: merge_ids(prior_removed, added, removed),
                })
            }

            _ => Err(self.incompatible(previous)),
        }
    }

    /// `(remove, add_unique)` view of the set-like array kinds.
    fn array_parts(&self) -> Option<(&[Value], &[Value])> {
        match self {
            Operation::AddUnique { objects } => Some((&[], objects.as_slice())),
            Operation::Remove { objects } => Some((objects.as_slice(), &[])),
            Operation::Patch { remove, add_unique } => Some((remove.as_slice(), add_unique.as_slice())),
            _ => None,
        }
    }

    fn array_base(&self, prior: Option<&Value>) -> Result<Vec<Value>> {
        match prior {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(self.mismatch(other)),
        }
    }

    fn mismatch(&self, found: &Value) -> OpError {
        OpError::TypeMismatch {
            op: self.kind(),
            found: kind_name(found),
        }
    }

    fn incompatible(&self, previous: &Operation) -> OpError {
        OpError::Incompatible {
            op: self.kind(),
            previous: previous.kind(),
        }
    }
}

fn from_estimate(value: Option<Value>) -> Operation {
    match value {
        Some(value) => Operation::Set { value },
        None => Operation::Unset,
    }
}

fn from_array_parts(remove: Vec<Value>, add_unique: Vec<Value>) -> Operation {
    if remove.is_empty() {
        Operation::AddUnique {
            objects: add_unique,
        }
    } else if add_unique.is_empty() {
        Operation::Remove { objects: remove }
    } else {
        Operation::Patch { remove, add_unique }
    }
}

/// `(base − cancel) ∪ extra`, keeping first-seen order.
fn merge_ids(base: &[String], cancel: &[String], extra: &[String]) -> Vec<String> {
    let mut out: Vec<String> = base.iter().filter(|id| !cancel.contains(id)).cloned().collect();
    for id in extra {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

fn relation_targets(targets: &[Identity]) -> Result<(String, Vec<String>)> {
    let first = targets.first().ok_or(OpError::EmptyRelation)?;
    let target_class = first.class_name().to_string();
    let mut ids = Vec::with_capacity(targets.len());
    for target in targets {
        if target.class_name() != target_class {
            return Err(OpError::RelationClass {
                expected: target_class,
                found: target.class_name().to_string(),
            });
        }
        match target.id() {
            ObjectId::Server(id) => {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            ObjectId::Local(_) => return Err(OpError::UnsavedTarget(target.to_string())),
        }
    }
    Ok((target_class, ids))
}

impl From<Value> for Operation {
    fn from(value: Value) -> Self {
        Operation::Set { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fold(base: Option<Value>, ops: &[Operation]) -> Option<Value> {
        ops.iter()
            .fold(base, |acc, op| op.apply(acc.as_ref()).unwrap())
    }

    #[test]
    fn test_increment_applies() {
        let op = Operation::increment(3);
        assert_eq!(op.apply(None).unwrap(), Some(json!(3)));
        assert_eq!(op.apply(Some(&json!(10))).unwrap(), Some(json!(13)));
        assert_eq!(
            op.apply(Some(&json!("ten"))),
            Err(OpError::TypeMismatch {
                op: "Increment",
                found: "string"
            })
        );
    }

    #[test]
    fn test_increments_merge() {
        let merged = Operation::increment(-2)
            .merge_with(Some(&Operation::increment(5)))
            .unwrap();
        assert_eq!(merged, Operation::increment(3));
        assert_eq!(merged.apply(None).unwrap(), Some(json!(3)));
    }

    #[test]
    fn test_set_wins_over_anything() {
        let set = Operation::set(json!("x"));
        for prior in [
            Operation::increment(1),
            Operation::add_unique(vec![json!(1)]),
            Operation::remove(vec![json!(1)]),
            Operation::unset(),
        ] {
            assert_eq!(set.merge_with(Some(&prior)).unwrap(), set);
        }
        assert_eq!(
            Operation::unset().merge_with(Some(&set)).unwrap(),
            Operation::unset()
        );
    }

    #[test]
    fn test_merge_onto_set_folds_value() {
        let prior = Operation::set(json!([1, 2]));

        let merged = Operation::increment(1).merge_with(Some(&Operation::set(json!(4))));
        assert_eq!(merged.unwrap(), Operation::set(json!(5)));

        let merged = Operation::add_unique(vec![json!(2), json!(3)]).merge_with(Some(&prior));
        assert_eq!(merged.unwrap(), Operation::set(json!([1, 2, 3])));

        let merged = Operation::remove(vec![json!(1)]).merge_with(Some(&prior));
        assert_eq!(merged.unwrap(), Operation::set(json!([2])));
    }

    #[test]
    fn test_merge_onto_unset() {
        let unset = Operation::unset();
        assert_eq!(
            Operation::increment(4).merge_with(Some(&unset)).unwrap(),
            Operation::set(json!(4))
        );
        assert_eq!(
            Operation::remove(vec![json!(1)]).merge_with(Some(&unset)).unwrap(),
            Operation::set(json!([]))
        );
    }

    #[test]
    fn test_increment_onto_array_op_conflicts() {
        let err = Operation::increment(1)
            .merge_with(Some(&Operation::add_unique(vec![json!(1)])))
            .unwrap_err();
        assert_eq!(
            err,
            OpError::Incompatible {
                op: "Increment",
                previous: "AddUnique"
            }
        );
        assert!(Operation::add_unique(vec![json!(1)])
            .merge_with(Some(&Operation::increment(1)))
            .is_err());
        assert!(Operation::add(vec![json!(1)])
            .merge_with(Some(&Operation::remove(vec![json!(1)])))
            .is_err());
    }

    #[test]
    fn test_add_unique_chains() {
        let merged = Operation::add_unique(vec![json!("b"), json!("c")])
            .merge_with(Some(&Operation::add_unique(vec![json!("a"), json!("b")])))
            .unwrap();
        assert_eq!(merged, Operation::add_unique(vec![json!("a"), json!("b"), json!("c")]));

        let merged = Operation::remove(vec![json!("b")])
            .merge_with(Some(&Operation::remove(vec![json!("a")])))
            .unwrap();
        assert_eq!(merged, Operation::remove(vec![json!("a"), json!("b")]));
    }

    #[test]
    fn test_remove_after_add_unique_becomes_patch() {
        let first = Operation::add_unique(vec![json!("a"), json!("b")]);
        let second = Operation::remove(vec![json!("a")]);
        let merged = second.merge_with(Some(&first)).unwrap();

        assert_eq!(
            merged,
            Operation::Patch {
                remove: vec![json!("a")],
                add_unique: vec![json!("b")],
            }
        );

        // "a" was on the server already: it must still go away
        let base = Some(json!(["a", "z"]));
        assert_eq!(
            merged.apply(base.as_ref()).unwrap(),
            fold(base.clone(), &[first, second])
        );
    }

    #[test]
    fn test_three_step_chain_matches_fold() {
        let ops = [
            Operation::remove(vec![json!(1)]),
            Operation::add_unique(vec![json!(1), json!(2)]),
            Operation::remove(vec![json!(2)]),
        ];
        let merged = ops[1..]
            .iter()
            .try_fold(ops[0].clone(), |acc, op| op.merge_with(Some(&acc)))
            .unwrap();

        let base = Some(json!([1, 2, 3]));
        assert_eq!(merged.apply(base.as_ref()).unwrap(), Some(json!([3, 1])));
        assert_eq!(merged.apply(base.as_ref()).unwrap(), fold(base, &ops));
    }

    #[test]
    fn test_add_appends() {
        let merged = Operation::add(vec![json!(1)])
            .merge_with(Some(&Operation::add(vec![json!(1)])))
            .unwrap();
        assert_eq!(merged.apply(Some(&json!([0]))).unwrap(), Some(json!([0, 1, 1])));
    }

    #[test]
    fn test_relation_ops() {
        let a = Identity::server("Tag", "a");
        let b = Identity::server("Tag", "b");

        let add = Operation::relation_add(&[a.clone(), b.clone()]).unwrap();
        let remove = Operation::relation_remove(&[a]).unwrap();
        let merged = remove.merge_with(Some(&add)).unwrap();

        assert_eq!(
            merged,
            Operation::Relation {
                target_class: "Tag".into(),
                added: vec!["b".into()],
                removed: vec!["a".into()],
            }
        );
        assert_eq!(merged.apply(None).unwrap(), Some(relation_value("Tag")));
    }

    #[test]
    fn test_relation_errors() {
        assert_eq!(Operation::relation_add(&[]), Err(OpError::EmptyRelation));
        assert!(matches!(
            Operation::relation_add(&[Identity::local("Tag", "local1")]),
            Err(OpError::UnsavedTarget(_))
        ));
        assert!(matches!(
            Operation::relation_add(&[Identity::server("Tag", "a"), Identity::server("User", "b")]),
            Err(OpError::RelationClass { .. })
        ));

        let tags = Operation::relation_add(&[Identity::server("Tag", "a")]).unwrap();
        let users = Operation::relation_add(&[Identity::server("User", "a")]).unwrap();
        assert!(matches!(
            users.merge_with(Some(&tags)),
            Err(OpError::RelationClass { .. })
        ));
        assert!(tags.merge_with(Some(&Operation::unset())).is_err());
        assert!(tags.apply(Some(&json!(3))).is_err());
    }

    #[test]
    fn test_relation_after_set_keeps_the_set() {
        let tags = Operation::relation_add(&[Identity::server("Tag", "t1")]).unwrap();
        let set = Operation::set(relation_value("Tag"));

        let merged = tags.merge_with(Some(&set)).unwrap();
        assert_eq!(merged, Operation::set(relation_value("Tag")));
        assert_eq!(
            merged.apply(Some(&json!(3))).unwrap(),
            fold(Some(json!(3)), &[set, tags])
        );
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(Operation::increment(2)).unwrap();
        assert_eq!(json, json!({"__op": "Increment", "amount": 2}));

        let json = serde_json::to_value(Operation::unset()).unwrap();
        assert_eq!(json, json!({"__op": "Delete"}));

        let back: Operation = serde_json::from_value(json!({"__op": "AddUnique", "objects": [1]})).unwrap();
        assert_eq!(back, Operation::add_unique(vec![json!(1)]));
    }
}
