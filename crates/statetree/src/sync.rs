//! The modeling-layer reconciliation boundary.
//!
//! Whenever collection contents are replaced wholesale (a `set_value` on a
//! list or dictionary, snapshot application, initial materialization), the
//! store hands the incoming plain value to its [`Reconciler`]. The
//! reconciler diffs old children against the incoming value, reuses child
//! nodes for entries that can absorb the new value in place, destroys
//! children that disappeared, and creates nodes for the rest. It works
//! through the silent structural surface only; the enclosing operation owns
//! patch emission.

use serde_json::Value;

use crate::error::TreeError;
use crate::node::{NodeId, NodeKind, TypeDescriptor};
use crate::store::TreeStore;

/// The `sync_to_node` contract. A modeling layer with declared shapes can
/// install its own implementation via
/// [`TreeStore::set_reconciler`](crate::store::TreeStore::set_reconciler).
pub trait Reconciler {
    fn sync_to_node(
        &self,
        store: &mut TreeStore,
        node: NodeId,
        incoming: &Value,
    ) -> Result<(), TreeError>;
}

/// Shape-inferring reconciler: objects become records, arrays become lists,
/// everything else is a scalar.
pub struct StructuralReconciler;

impl Reconciler for StructuralReconciler {
    fn sync_to_node(
        &self,
        store: &mut TreeStore,
        node: NodeId,
        incoming: &Value,
    ) -> Result<(), TreeError> {
        match store.kind_of(node).ok_or(TreeError::DeadNode(node))? {
            NodeKind::Scalar | NodeKind::Reference => {
                store.write_cell_silent(node, incoming.clone());
                Ok(())
            }
            NodeKind::Record | NodeKind::Dictionary => sync_map(store, node, incoming),
            NodeKind::List => sync_list(store, node, incoming),
        }
    }
}

/// Can the existing child absorb the incoming value in place?
///
/// Scalars and references always can (their cell is just overwritten);
/// composites can when the incoming value matches their shape.
fn reusable(store: &TreeStore, child: NodeId, value: &Value) -> bool {
    match store.kind_of(child) {
        Some(NodeKind::Scalar) | Some(NodeKind::Reference) => true,
        Some(NodeKind::Record) | Some(NodeKind::Dictionary) => value.is_object(),
        Some(NodeKind::List) => value.is_array(),
        None => false,
    }
}

fn recurse(store: &mut TreeStore, child: NodeId, value: &Value) -> Result<(), TreeError> {
    StructuralReconciler.sync_to_node(store, child, value)
}

fn spawn(store: &mut TreeStore, parent: NodeId, value: &Value) -> Result<NodeId, TreeError> {
    let environment = store.environment_of(parent).cloned();
    store.spawn_node(TypeDescriptor::infer(value), value.clone(), environment)
}

fn sync_map(store: &mut TreeStore, node: NodeId, incoming: &Value) -> Result<(), TreeError> {
    let Value::Object(incoming) = incoming else {
        return Err(TreeError::InvalidPath(format!(
            "cannot sync a non-object value into {} at {}",
            store
                .descriptor_of(node)
                .map(|d| d.name.clone())
                .unwrap_or_default(),
            store.path_string_of(node).unwrap_or_default()
        )));
    };
    for (key, child) in store.children_of(node) {
        if !incoming.contains_key(&key) {
            store.withdraw_child_silent(node, &key);
            store.destroy_subtree(child);
        }
    }
    for (key, value) in incoming {
        match store.child_of(node, key) {
            Some(child) if reusable(store, child, value) => recurse(store, child, value)?,
            Some(child) => {
                store.withdraw_child_silent(node, key);
                store.destroy_subtree(child);
                let fresh = spawn(store, node, value)?;
                store.attach_child_silent(node, key, fresh)?;
            }
            None => {
                let fresh = spawn(store, node, value)?;
                store.attach_child_silent(node, key, fresh)?;
            }
        }
    }
    Ok(())
}

fn sync_list(store: &mut TreeStore, node: NodeId, incoming: &Value) -> Result<(), TreeError> {
    let Value::Array(incoming) = incoming else {
        return Err(TreeError::InvalidPath(format!(
            "cannot sync a non-array value into list at {}",
            store.path_string_of(node).unwrap_or_default()
        )));
    };
    let old: Vec<NodeId> = store
        .children_of(node)
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    let mut order = Vec::with_capacity(incoming.len());
    for (index, value) in incoming.iter().enumerate() {
        match old.get(index).copied() {
            Some(child) if reusable(store, child, value) => {
                recurse(store, child, value)?;
                order.push(child);
            }
            Some(child) => {
                store.destroy_subtree(child);
                order.push(spawn(store, node, value)?);
            }
            None => order.push(spawn(store, node, value)?),
        }
    }
    for child in old.iter().skip(incoming.len()) {
        store.destroy_subtree(*child);
    }
    store.rewrite_list_children(node, order);
    Ok(())
}
