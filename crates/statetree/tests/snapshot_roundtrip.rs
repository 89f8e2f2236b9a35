//! Property tests for the snapshot protocol: materializing an arbitrary
//! plain value and applying its own snapshot back is always an identity.

use proptest::prelude::*;
use serde_json::{json, Value};
use statetree::{TreeStore, TypeDescriptor};

/// Strategy for arbitrary JSON-shaped plain values, a few levels deep.
fn plain_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn materialized_snapshot_matches_source(value in plain_value()) {
        let mut store = TreeStore::new();
        let root = store
            .create_node(TypeDescriptor::infer(&value), value.clone())
            .unwrap();
        prop_assert_eq!(store.get_snapshot(root).unwrap(), value);
    }

    #[test]
    fn identity_round_trip_is_idempotent(value in plain_value()) {
        let mut store = TreeStore::new();
        let root = store
            .create_node(TypeDescriptor::infer(&value), value)
            .unwrap();
        let before = store.get_snapshot(root).unwrap();
        store.apply_snapshot(root, before.clone()).unwrap();
        prop_assert_eq!(store.get_snapshot(root).unwrap(), before);
    }

    #[test]
    fn wholesale_replacement_converges(first in plain_value(), second in plain_value()) {
        let mut store = TreeStore::new();
        let root = store
            .create_node(TypeDescriptor::dictionary("map"), json!({}))
            .unwrap();
        store.apply_snapshot(root, json!({"slot": first})).unwrap();
        store.apply_snapshot(root, json!({"slot": second.clone()})).unwrap();
        prop_assert_eq!(store.get_snapshot(root).unwrap(), json!({"slot": second}));
    }
}
