//! Snapshot protocol: derive a plain value from a live subtree and apply an
//! external plain value back onto it.
//!
//! Derivation is pure: it never mutates the tree and never fires listeners,
//! and it terminates even when the live graph contains resolved-reference
//! cycles, because reference nodes serialize as their stored identifier
//! value, never as the resolved target.

use serde_json::{Map, Value};

use crate::error::TreeError;
use crate::node::{NodeId, NodeKind};
use crate::store::TreeStore;

/// Recursively derive the plain value of a subtree.
///
/// Record and dictionary nodes map child key → child snapshot, lists collect
/// child snapshots in index order, references yield their stored identifier,
/// scalars yield the raw cell value. A node's post-transform, when present,
/// is applied to the assembled value. Volatile entries never appear.
pub(crate) fn snapshot_of(store: &TreeStore, id: NodeId) -> Value {
    let Some(node) = store.node(id) else {
        return Value::Null;
    };
    let out = match node.descriptor.kind {
        NodeKind::Scalar | NodeKind::Reference => node.cell.get().clone(),
        NodeKind::Record | NodeKind::Dictionary => {
            let mut map = Map::new();
            for (key, child) in &node.children {
                map.insert(key.clone(), snapshot_of(store, *child));
            }
            Value::Object(map)
        }
        NodeKind::List => Value::Array(
            node.children
                .values()
                .map(|child| snapshot_of(store, *child))
                .collect(),
        ),
    };
    match &node.post_transform {
        Some(transform) => transform(out),
        None => out,
    }
}

impl TreeStore {
    /// Derive the plain snapshot of a live subtree.
    pub fn get_snapshot(&self, node: NodeId) -> Result<Value, TreeError> {
        self.ensure_alive(node)?;
        Ok(snapshot_of(self, node))
    }

    /// Ingest an external plain value into a subtree.
    ///
    /// The node's pre-transform, when present, is applied first. Records
    /// merge key-wise: only children whose key is present in the incoming
    /// object are descended into, everything else is left untouched. Lists,
    /// dictionaries, scalars, and references delegate to
    /// [`TreeStore::set_value`], which replaces contents wholesale.
    pub fn apply_snapshot(&mut self, node: NodeId, value: Value) -> Result<(), TreeError> {
        let (kind, value) = {
            let n = self.ensure_alive(node)?;
            let value = match &n.pre_transform {
                Some(transform) => transform(value),
                None => value,
            };
            (n.descriptor.kind, value)
        };
        match kind {
            NodeKind::Record => self.merge_record(node, value),
            _ => self.set_value(node, value),
        }
    }

    /// Record-level merge: descend into each existing child named by the
    /// incoming object. Children absent from the incoming value keep their
    /// state; incoming keys with no corresponding child are ignored (the
    /// modeling layer owns field declaration).
    pub(crate) fn merge_record(&mut self, node: NodeId, value: Value) -> Result<(), TreeError> {
        let Value::Object(incoming) = value else {
            return Err(TreeError::InvalidPath(format!(
                "cannot apply a non-object value to record at {}",
                self.path_string_of(node).unwrap_or_default()
            )));
        };
        for (key, child_value) in incoming {
            if let Some(child) = self.child_of(node, &key) {
                self.apply_snapshot(child, child_value)?;
            }
        }
        Ok(())
    }
}
