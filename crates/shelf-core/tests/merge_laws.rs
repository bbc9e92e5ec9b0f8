//! Property-based tests for the operation merge rules.
//!
//! Merging a chain of operations into one must apply exactly like applying
//! each operation in order, from any starting value.

use proptest::prelude::*;
use serde_json::{json, Value};
use shelf_core::value::relation_value;
use shelf_core::{Identity, Operation};

fn elements() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec((0i64..6).prop_map(|n| json!(n)), 0..4)
}

fn base_array() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        Just(None),
        prop::collection::vec((0i64..6).prop_map(|n| json!(n)), 0..6)
            .prop_map(|items| Some(Value::Array(items))),
    ]
}

fn array_op() -> impl Strategy<Value = Operation> {
    prop_oneof![
        elements().prop_map(Operation::add_unique),
        elements().prop_map(Operation::remove),
        elements().prop_map(|items| Operation::set(Value::Array(items))),
        Just(Operation::unset()),
    ]
}

fn any_op() -> impl Strategy<Value = Operation> {
    prop_oneof![
        array_op(),
        elements().prop_map(Operation::add),
        (-50i64..50).prop_map(Operation::increment),
        (-50i64..50).prop_map(|n| Operation::set(json!(n))),
        Just(Operation::relation_add(&[Identity::server("Tag", "t1")]).unwrap()),
        Just(Operation::set(relation_value("Tag"))),
    ]
}

fn fold(base: Option<Value>, ops: &[Operation]) -> Option<Option<Value>> {
    let mut value = base;
    for op in ops {
        value = op.apply(value.as_ref()).ok()?;
    }
    Some(value)
}

fn merge_chain(ops: &[Operation]) -> Option<Operation> {
    let (first, rest) = ops.split_first()?;
    rest.iter()
        .try_fold(first.clone(), |acc, op| op.merge_with(Some(&acc)))
        .ok()
}

proptest! {
    #[test]
    fn array_chains_always_merge(ops in prop::collection::vec(array_op(), 1..8)) {
        prop_assert!(merge_chain(&ops).is_some());
    }

    #[test]
    fn merged_array_chain_matches_fold(
        base in base_array(),
        ops in prop::collection::vec(array_op(), 1..8)
    ) {
        let merged = merge_chain(&ops).unwrap();
        let expected = fold(base.clone(), &ops).unwrap();
        prop_assert_eq!(merged.apply(base.as_ref()).unwrap(), expected);
    }

    #[test]
    fn increments_merge_to_their_sum(
        start in prop::option::of(-100i64..100),
        amounts in prop::collection::vec(-100i64..100, 1..10)
    ) {
        let ops: Vec<Operation> = amounts.iter().copied().map(Operation::increment).collect();
        let base = start.map(|n| json!(n));
        let merged = merge_chain(&ops).unwrap();

        let total: i64 = start.unwrap_or(0) + amounts.iter().sum::<i64>();
        prop_assert_eq!(merged.apply(base.as_ref()).unwrap(), Some(json!(total)));
    }

    #[test]
    fn any_successful_merge_matches_fold(
        base in prop_oneof![
            base_array(),
            (-10i64..10).prop_map(|n| Some(json!(n))),
            Just(Some(relation_value("Tag"))),
        ],
        ops in prop::collection::vec(any_op(), 1..6)
    ) {
        let merged = merge_chain(&ops);
        let expected = fold(base.clone(), &ops);
        prop_assume!(merged.is_some() && expected.is_some());

        let merged = merged.unwrap();
        prop_assert_eq!(merged.apply(base.as_ref()).ok(), expected);
    }
}
