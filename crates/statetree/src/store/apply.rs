//! Patch application onto a live tree.
//!
//! The path is walked from the target root through existing children to the
//! parent of the final segment. A `replace` whose final segment names an
//! existing child delegates to snapshot application on that child; paths
//! that continue past the node layer mutate the raw value inside the owning
//! scalar's cell and funnel through `set_value`. `add`/`remove` splice list
//! children at the numeric index (`-` appends) or insert/delete dictionary
//! entries, each emitting the forward patch together with a synthesized
//! inverse.

use serde_json::Value;

use statetree_json_pointer::{format_pointer, parse_index, PathSegment, APPEND};

use crate::error::TreeError;
use crate::node::{NodeId, NodeKind, TypeDescriptor};
use crate::patch::{Patch, PatchOp};
use crate::snapshot::snapshot_of;
use crate::store::TreeStore;

impl TreeStore {
    /// Apply a single structural edit addressed relative to `root`.
    pub fn apply_patch(&mut self, root: NodeId, patch: &Patch) -> Result<(), TreeError> {
        self.ensure_alive(root)?;
        let segments = patch.segments();
        if segments.is_empty() {
            return match patch.op {
                PatchOp::Replace => self.apply_snapshot(root, required_value(patch)?),
                _ => Err(TreeError::InvalidPath(
                    "add/remove cannot target a tree root".into(),
                )),
            };
        }

        // Walk through existing children to the owner of the final segment.
        let mut node = root;
        let mut consumed = 0;
        while consumed + 1 < segments.len() {
            match self.child_of(node, &segments[consumed]) {
                Some(child) => {
                    node = child;
                    consumed += 1;
                }
                None => break,
            }
        }
        let remaining = &segments[consumed..];
        let kind = self.kind_of(node).ok_or(TreeError::DeadNode(node))?;

        if kind.is_composite() {
            if remaining.len() == 1 {
                return self.apply_structural(node, &remaining[0], patch);
            }
            // An intermediate segment had no corresponding child.
            return Err(TreeError::InvalidPath(patch.path.clone()));
        }
        self.apply_raw(node, remaining, patch)
    }

    /// Apply patches in order. No partial-application rollback: patches
    /// applied before a failing one stay applied.
    pub fn apply_patches(&mut self, root: NodeId, patches: &[Patch]) -> Result<(), TreeError> {
        for patch in patches {
            self.apply_patch(root, patch)?;
        }
        Ok(())
    }

    /// The final segment addresses a direct child slot of a composite node.
    fn apply_structural(
        &mut self,
        parent: NodeId,
        key: &PathSegment,
        patch: &Patch,
    ) -> Result<(), TreeError> {
        let kind = self.kind_of(parent).ok_or(TreeError::DeadNode(parent))?;
        match patch.op {
            PatchOp::Replace => match self.child_of(parent, key) {
                Some(child) => self.apply_snapshot(child, required_value(patch)?),
                None => Err(TreeError::InvalidPath(patch.path.clone())),
            },
            PatchOp::Add => {
                // Adding over an existing record/dictionary entry replaces it.
                if kind != NodeKind::List {
                    if let Some(child) = self.child_of(parent, key) {
                        return self.apply_snapshot(child, required_value(patch)?);
                    }
                }
                let value = required_value(patch)?;
                if kind == NodeKind::List {
                    let len = self.children_of(parent).len();
                    let index = parse_index(key, len)
                        .map_err(|_| TreeError::InvalidPath(patch.path.clone()))?;
                    if index > len {
                        return Err(TreeError::InvalidPath(patch.path.clone()));
                    }
                }
                let environment = self.environment_of(parent).cloned();
                let child = self.spawn_node(TypeDescriptor::infer(&value), value.clone(), environment)?;
                let actual_key = self.attach_child_silent(parent, key, child)?;
                let mut path = self.abs_path(parent);
                path.push(actual_key);
                let pointer = format_pointer(&path);
                let forward = Patch::add(pointer.clone(), value.clone());
                let inverse = Patch::remove(pointer).with_old_value(value);
                self.commit(parent, forward, inverse);
                Ok(())
            }
            PatchOp::Remove => {
                if kind == NodeKind::List {
                    let len = self.children_of(parent).len();
                    let index = parse_index(key, len)
                        .map_err(|_| TreeError::InvalidPath(patch.path.clone()))?;
                    if key == APPEND || index >= len {
                        return Err(TreeError::InvalidPath(patch.path.clone()));
                    }
                }
                let child = self
                    .child_of(parent, key)
                    .ok_or_else(|| TreeError::InvalidPath(patch.path.clone()))?;
                let mut path = self.abs_path(parent);
                path.push(key.clone());
                let pointer = format_pointer(&path);
                let old = snapshot_of(self, child);
                self.withdraw_child_silent(parent, key);
                self.destroy_subtree(child);
                let forward = Patch::remove(pointer.clone()).with_old_value(old.clone());
                let inverse = Patch::add(pointer, old);
                self.commit(parent, forward, inverse);
                Ok(())
            }
        }
    }

    /// The path continues past the node layer: edit the raw value inside the
    /// owning node's cell, then publish through `set_value` (one cycle).
    fn apply_raw(
        &mut self,
        node: NodeId,
        remaining: &[PathSegment],
        patch: &Patch,
    ) -> Result<(), TreeError> {
        self.ensure_alive(node)?;
        let mut value = self
            .node(node)
            .map(|n| n.cell.get().clone())
            .unwrap_or(Value::Null);
        raw_apply(&mut value, remaining, patch)?;
        self.set_value(node, value)
    }
}

fn required_value(patch: &Patch) -> Result<Value, TreeError> {
    patch
        .value
        .clone()
        .ok_or_else(|| TreeError::InvalidPath(format!("{} patch at {} is missing a value", patch.op.as_str(), patch.path)))
}

/// Edit a plain value in place at `path`. All intermediate segments must
/// resolve; the final segment follows JSON Patch semantics for objects and
/// arrays (`-` appends on `add`).
fn raw_apply(doc: &mut Value, path: &[PathSegment], patch: &Patch) -> Result<(), TreeError> {
    let (parent_path, key) = path.split_at(path.len() - 1);
    let key = &key[0];
    let target = statetree_json_pointer::get_mut(doc, parent_path)
        .ok_or_else(|| TreeError::InvalidPath(patch.path.clone()))?;
    match target {
        Value::Object(map) => match patch.op {
            PatchOp::Add => {
                map.insert(key.clone(), required_value(patch)?);
            }
            PatchOp::Remove => {
                map.shift_remove(key)
                    .ok_or_else(|| TreeError::InvalidPath(patch.path.clone()))?;
            }
            PatchOp::Replace => {
                if !map.contains_key(key) {
                    return Err(TreeError::InvalidPath(patch.path.clone()));
                }
                map.insert(key.clone(), required_value(patch)?);
            }
        },
        Value::Array(arr) => {
            let len = arr.len();
            let index = parse_index(key, len)
                .map_err(|_| TreeError::InvalidPath(patch.path.clone()))?;
            match patch.op {
                PatchOp::Add => {
                    if index > len {
                        return Err(TreeError::InvalidPath(patch.path.clone()));
                    }
                    arr.insert(index, required_value(patch)?);
                }
                PatchOp::Remove => {
                    if key == APPEND || index >= len {
                        return Err(TreeError::InvalidPath(patch.path.clone()));
                    }
                    arr.remove(index);
                }
                PatchOp::Replace => {
                    if key == APPEND || index >= len {
                        return Err(TreeError::InvalidPath(patch.path.clone()));
                    }
                    arr[index] = required_value(patch)?;
                }
            }
        }
        _ => return Err(TreeError::InvalidPath(patch.path.clone())),
    }
    Ok(())
}
