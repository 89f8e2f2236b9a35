//! End-to-end workflows over the tree lifecycle: mutation, notification,
//! identifier resolution, and patch wire compatibility.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};
use statetree::{
    decode_patches, encode_patch, Patch, PatchOp, TreeError, TreeStore, TypeDescriptor,
};

#[test]
fn counter_mutation_emits_one_patch_and_one_snapshot() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(TypeDescriptor::record("Counter"), json!({"count": 0}))
        .unwrap();
    let count = store.child_of(root, "count").unwrap();

    let patches: Rc<RefCell<Vec<Value>>> = Rc::default();
    let snapshots: Rc<RefCell<Vec<Value>>> = Rc::default();
    let sink = Rc::clone(&patches);
    store
        .on_patch(root, move |forward, _| {
            sink.borrow_mut().push(encode_patch(forward))
        })
        .unwrap();
    let sink = Rc::clone(&snapshots);
    store
        .on_snapshot(root, move |snapshot| sink.borrow_mut().push(snapshot.clone()))
        .unwrap();

    store.set_value(count, json!(5)).unwrap();

    assert_eq!(patches.borrow().len(), 1);
    assert_eq!(
        patches.borrow()[0],
        json!({"op": "replace", "path": "/count", "value": 5, "oldValue": 0})
    );
    assert_eq!(*snapshots.borrow(), vec![json!({"count": 5})]);
}

#[test]
fn identifier_lifecycle_scenario() {
    let mut store = TreeStore::new();
    let a = store
        .create_node(TypeDescriptor::record("User"), json!({"name": "ann"}))
        .unwrap();
    store.register_identifier(a, "User", "u1").unwrap();
    assert_eq!(store.resolve_identifier("User", "u1"), Some(a));
    store.destroy(a);
    assert_eq!(store.resolve_identifier("User", "u1"), None);
}

#[test]
fn path_consistency_after_structural_changes() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(
            TypeDescriptor::record("Store"),
            json!({"lists": {"todo": ["a", "b"]}}),
        )
        .unwrap();

    // Every live descendant's path equals the key-join from the root.
    fn check(store: &TreeStore, node: statetree::NodeId, prefix: &str) {
        assert_eq!(store.path_string_of(node).unwrap(), prefix);
        for (key, child) in store.children_of(node) {
            check(store, child, &format!("{prefix}/{key}"));
        }
    }
    check(&store, root, "");

    let lists = store.child_of(root, "lists").unwrap();
    let todo = store.child_of(lists, "todo").unwrap();
    store.detach(todo).unwrap();
    check(&store, root, "");
    check(&store, todo, "");

    store.add_child(root, "orphans", todo).unwrap();
    check(&store, root, "");
    let b = store.resolve_path(root, "/orphans/1").unwrap();
    assert_eq!(store.get_value(b).unwrap(), json!("b"));

    store.remove_child(root, "orphans").unwrap();
    check(&store, root, "");
}

#[test]
fn destroy_completeness_unbinds_subtree_identifiers() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(
            TypeDescriptor::record("Store"),
            json!({"users": {"ann": {"name": "ann"}, "bob": {"name": "bob"}}}),
        )
        .unwrap();
    let users = store.child_of(root, "users").unwrap();
    let ann = store.child_of(users, "ann").unwrap();
    let bob = store.child_of(users, "bob").unwrap();
    store.register_identifier(ann, "User", "u1").unwrap();
    store.register_identifier(bob, "User", "u2").unwrap();

    let before = store.node_count();
    assert!(before >= 6);
    store.destroy(root);

    assert!(!store.is_alive(root));
    assert!(!store.is_alive(users));
    assert!(!store.is_alive(ann));
    assert!(!store.is_alive(bob));
    assert_eq!(store.resolve_identifier("User", "u1"), None);
    assert_eq!(store.resolve_identifier("User", "u2"), None);
    assert_eq!(store.node_count(), 0);
}

#[test]
fn inverse_patches_restore_pre_mutation_snapshot() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(
            TypeDescriptor::record("Store"),
            json!({"count": 0, "items": ["a"], "meta": {"tag": "x"}}),
        )
        .unwrap();
    let before = store.get_snapshot(root).unwrap();

    let inverses: Rc<RefCell<Vec<Patch>>> = Rc::default();
    let sink = Rc::clone(&inverses);
    store
        .on_patch(root, move |_, inverse| sink.borrow_mut().push(inverse.clone()))
        .unwrap();

    store
        .apply_patches(
            root,
            &[
                Patch::replace("/count", json!(3)),
                Patch::add("/items/-", json!("b")),
                Patch::remove("/items/0"),
                Patch::replace("/meta/tag", json!("y")),
            ],
        )
        .unwrap();
    assert_ne!(store.get_snapshot(root).unwrap(), before);

    let recorded: Vec<Patch> = inverses.borrow().clone();
    for inverse in recorded.iter().rev() {
        store.apply_patch(root, inverse).unwrap();
    }
    assert_eq!(store.get_snapshot(root).unwrap(), before);
}

#[test]
fn patch_wire_format_round_trips_exactly() {
    let wire = json!([
        {"op": "replace", "path": "/a~1b/0", "value": 1},
        {"op": "add", "path": "/items/-", "value": {"nested": true}},
        {"op": "remove", "path": "/items/2", "oldValue": "x"},
    ]);
    let decoded = decode_patches(&wire).unwrap();
    assert_eq!(decoded[0].op, PatchOp::Replace);
    assert_eq!(decoded[0].segments(), vec!["a/b".to_string(), "0".to_string()]);
    let reencoded = Value::Array(decoded.iter().map(encode_patch).collect());
    assert_eq!(reencoded, wire);
}

#[test]
fn escaped_keys_address_children() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(TypeDescriptor::dictionary("map"), json!({"a/b": 1, "c~d": 2}))
        .unwrap();
    let awkward = store.resolve_path(root, "/a~1b").unwrap();
    assert_eq!(store.path_string_of(awkward).unwrap(), "/a~1b");
    store
        .apply_patch(root, &Patch::replace("/c~0d", json!(20)))
        .unwrap();
    assert_eq!(
        store.get_snapshot(root).unwrap(),
        json!({"a/b": 1, "c~d": 20})
    );
}

#[test]
fn dead_nodes_reject_all_mutation() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(TypeDescriptor::record("S"), json!({"x": 1}))
        .unwrap();
    let x = store.child_of(root, "x").unwrap();
    store.destroy(root);
    assert_eq!(store.set_value(x, json!(2)).unwrap_err(), TreeError::DeadNode(x));
    assert_eq!(
        store.apply_snapshot(x, json!(2)).unwrap_err(),
        TreeError::DeadNode(x)
    );
    assert_eq!(
        store
            .apply_patch(root, &Patch::replace("/x", json!(2)))
            .unwrap_err(),
        TreeError::DeadNode(root)
    );
}

#[test]
fn listener_disposal_stops_delivery() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(TypeDescriptor::record("S"), json!({"x": 1}))
        .unwrap();
    let x = store.child_of(root, "x").unwrap();
    let hits: Rc<RefCell<u32>> = Rc::default();
    let sink = Rc::clone(&hits);
    let id = store
        .on_patch(root, move |_, _| *sink.borrow_mut() += 1)
        .unwrap();
    store.set_value(x, json!(2)).unwrap();
    assert!(store.off_patch(root, id));
    store.set_value(x, json!(3)).unwrap();
    assert_eq!(*hits.borrow(), 1);
}

#[test]
fn consecutive_mutations_each_notify() {
    let mut store = TreeStore::new();
    let root = store
        .create_node(TypeDescriptor::record("S"), json!({"x": 0}))
        .unwrap();
    let x = store.child_of(root, "x").unwrap();
    let snapshots: Rc<RefCell<Vec<Value>>> = Rc::default();
    let sink = Rc::clone(&snapshots);
    store
        .on_snapshot(root, move |s| sink.borrow_mut().push(s.clone()))
        .unwrap();
    for i in 1..=3 {
        store.set_value(x, json!(i)).unwrap();
    }
    // No coalescing: one full cycle per mutation.
    assert_eq!(
        *snapshots.borrow(),
        vec![json!({"x": 1}), json!({"x": 2}), json!({"x": 3})]
    );
}
