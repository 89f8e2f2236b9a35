//! The commit pipeline and the observable structural operations.
//!
//! Every logical change funnels through [`TreeStore::commit`]: history
//! managers record the inverse patch, patch listeners are notified bubbling
//! from the mutated node to its root (paths re-rooted per listener), and the
//! root's snapshot listeners fire exactly once.

use serde_json::Value;

use statetree_json_pointer::format_pointer;

use crate::error::TreeError;
use crate::node::{now_ms, NodeId, NodeKind, TypeDescriptor};
use crate::patch::Patch;
use crate::snapshot::snapshot_of;
use crate::store::TreeStore;

impl TreeStore {
    // ── set_value ─────────────────────────────────────────────────────────

    /// Replace the node's value.
    ///
    /// Scalars and references overwrite their cell and emit a `replace`
    /// patch at the node's path. Records merge key-wise (children absent
    /// from the incoming object are left untouched), each touched child
    /// producing its own change cycle. Lists and dictionaries reconcile
    /// their children wholesale and emit a single `replace` patch for the
    /// collection.
    pub fn set_value(&mut self, node: NodeId, value: Value) -> Result<(), TreeError> {
        let kind = self.ensure_alive(node)?.descriptor.kind;
        match kind {
            NodeKind::Scalar | NodeKind::Reference => {
                let old = match self.node_mut(node) {
                    Some(n) => n.cell.replace(value.clone()),
                    None => return Err(TreeError::DeadNode(node)),
                };
                let path = format_pointer(&self.abs_path(node));
                let forward = Patch::replace(path.clone(), value.clone()).with_old_value(old.clone());
                let inverse = Patch::replace(path, old).with_old_value(value);
                self.commit(node, forward, inverse);
                Ok(())
            }
            NodeKind::Record => self.merge_record(node, value),
            NodeKind::List | NodeKind::Dictionary => {
                let old = snapshot_of(self, node);
                let reconciler = std::rc::Rc::clone(&self.reconciler);
                reconciler.sync_to_node(self, node, &value)?;
                let path = format_pointer(&self.abs_path(node));
                let forward = Patch::replace(path.clone(), value.clone()).with_old_value(old.clone());
                let inverse = Patch::replace(path, old).with_old_value(value);
                self.commit(node, forward, inverse);
                Ok(())
            }
        }
    }

    // ── Structural operations ─────────────────────────────────────────────

    /// Materialize a new child under `parent` at `key`, inheriting the
    /// parent's environment, and emit an `add` patch for the attachment.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        key: &str,
        descriptor: TypeDescriptor,
        value: Value,
    ) -> Result<NodeId, TreeError> {
        self.ensure_alive(parent)?;
        let environment = self.environment_of(parent).cloned();
        let child = self.spawn_node(descriptor, value, environment)?;
        self.attach_and_commit(parent, key, child)?;
        Ok(child)
    }

    /// Attach an existing root node under `parent` at `key`, reparenting it
    /// and recomputing the paths of its entire subtree.
    pub fn add_child(&mut self, parent: NodeId, key: &str, child: NodeId) -> Result<(), TreeError> {
        self.ensure_alive(parent)?;
        let child_node = self.ensure_alive(child)?;
        if child_node.parent.is_some() {
            return Err(TreeError::InvalidPath(format!(
                "{child} is already attached at {}",
                format_pointer(&self.abs_path(child))
            )));
        }
        self.attach_and_commit(parent, key, child)
    }

    fn attach_and_commit(&mut self, parent: NodeId, key: &str, child: NodeId) -> Result<(), TreeError> {
        let actual_key = self.attach_child_silent(parent, key, child)?;
        let mut path = self.abs_path(parent);
        path.push(actual_key);
        let pointer = format_pointer(&path);
        let value = snapshot_of(self, child);
        let forward = Patch::add(pointer.clone(), value.clone());
        let inverse = Patch::remove(pointer).with_old_value(value);
        self.commit(parent, forward, inverse);
        Ok(())
    }

    /// Remove the child at `key`, destroying it (removal through this entry
    /// point never silently detaches; see [`TreeStore::detach`] for that).
    pub fn remove_child(&mut self, parent: NodeId, key: &str) -> Result<(), TreeError> {
        self.ensure_alive(parent)?;
        let child = self
            .child_of(parent, key)
            .ok_or_else(|| TreeError::InvalidPath(format!("no child at key: {key}")))?;
        let mut path = self.abs_path(parent);
        path.push(key.to_string());
        let pointer = format_pointer(&path);
        let old = snapshot_of(self, child);
        self.withdraw_child_silent(parent, key);
        self.destroy_subtree(child);
        let forward = Patch::remove(pointer.clone()).with_old_value(old.clone());
        let inverse = Patch::add(pointer, old);
        self.commit(parent, forward, inverse);
        Ok(())
    }

    /// Destroy a node and its entire subtree. Idempotent: destroying a dead
    /// or unknown node is a no-op. An attached node is withdrawn from its
    /// parent first, which emits a `remove` patch in the parent's tree.
    pub fn destroy(&mut self, node: NodeId) {
        if !self.is_alive(node) {
            return;
        }
        match self.parent_of(node) {
            Some(parent) => {
                let key = match self.nodes.get(&node).and_then(|n| n.key_in_parent.clone()) {
                    Some(k) => k,
                    None => return,
                };
                let pointer = format_pointer(&self.abs_path(node));
                let old = snapshot_of(self, node);
                self.withdraw_child_silent(parent, &key);
                self.destroy_subtree(node);
                let forward = Patch::remove(pointer.clone()).with_old_value(old.clone());
                let inverse = Patch::add(pointer, old);
                self.commit(parent, forward, inverse);
            }
            None => self.destroy_subtree(node),
        }
    }

    /// Remove the node from its parent without destroying it: the node
    /// becomes a new root, retaining liveness, identity, and subscriptions.
    pub fn detach(&mut self, node: NodeId) -> Result<(), TreeError> {
        self.ensure_alive(node)?;
        let Some(parent) = self.parent_of(node) else {
            return Ok(()); // already a root
        };
        let key = match self.nodes.get(&node).and_then(|n| n.key_in_parent.clone()) {
            Some(k) => k,
            None => return Ok(()),
        };
        let pointer = format_pointer(&self.abs_path(node));
        let old = snapshot_of(self, node);
        self.withdraw_child_silent(parent, &key);
        self.recompute_paths(node);
        let forward = Patch::remove(pointer.clone()).with_old_value(old.clone());
        let inverse = Patch::add(pointer, old);
        self.commit(parent, forward, inverse);
        Ok(())
    }

    // ── Commit pipeline ───────────────────────────────────────────────────

    /// Publish one logical change: record it into history managers, notify
    /// patch listeners in ancestor order starting at `anchor`, then fire the
    /// root's snapshot stage exactly once.
    pub(crate) fn commit(&mut self, anchor: NodeId, forward: Patch, inverse: Patch) {
        self.record_history(anchor, &forward, &inverse);
        self.notify_patches(anchor, &forward, &inverse);
        let root = self.root_of(anchor);
        self.snapshot_stage(root);
    }

    fn record_history(&mut self, anchor: NodeId, forward: &Patch, inverse: &Patch) {
        if self.undo_managers.is_empty() {
            return;
        }
        let ancestors = self.ancestors_of(anchor);
        let now = now_ms();
        let nodes = &self.nodes;
        for manager in self.undo_managers.values_mut() {
            if !ancestors.contains(&manager.target) {
                continue;
            }
            let base_len = nodes
                .get(&manager.target)
                .map(|n| n.path.len())
                .unwrap_or(0);
            manager.observe(forward.rebased(base_len), inverse.rebased(base_len), now);
        }
    }

    fn notify_patches(&mut self, anchor: NodeId, forward: &Patch, inverse: &Patch) {
        let mut current = Some(anchor);
        while let Some(id) = current {
            current = self.parent_of(id);
            let has_listeners = self
                .nodes
                .get(&id)
                .map(|n| !n.patch_listeners.is_empty())
                .unwrap_or(false);
            if !has_listeners {
                continue;
            }
            let base_len = self.nodes.get(&id).map(|n| n.path.len()).unwrap_or(0);
            let local_forward = forward.rebased(base_len);
            let local_inverse = inverse.rebased(base_len);
            let Some(node) = self.node_mut(id) else { continue };
            let mut listeners = node.patch_listeners.begin_dispatch();
            for (_, listener) in listeners.iter_mut() {
                listener(&local_forward, &local_inverse);
            }
            if let Some(node) = self.node_mut(id) {
                node.patch_listeners.end_dispatch(listeners);
            }
        }
    }

    /// Recompute the root snapshot once and deliver it to the root's
    /// snapshot listeners and auto-recording time-travel managers.
    fn snapshot_stage(&mut self, root: NodeId) {
        let has_listeners = self
            .nodes
            .get(&root)
            .map(|n| !n.snapshot_listeners.is_empty())
            .unwrap_or(false);
        let travelers: Vec<_> = self
            .time_travelers
            .iter()
            .filter(|(_, t)| t.target == root && t.auto_record && !t.applying)
            .map(|(id, _)| *id)
            .collect();
        if !has_listeners && travelers.is_empty() {
            return;
        }
        let snapshot = snapshot_of(self, root);
        if has_listeners {
            if let Some(node) = self.node_mut(root) {
                let mut listeners = node.snapshot_listeners.begin_dispatch();
                for (_, listener) in listeners.iter_mut() {
                    listener(&snapshot);
                }
                if let Some(node) = self.node_mut(root) {
                    node.snapshot_listeners.end_dispatch(listeners);
                }
            }
        }
        for id in travelers {
            if let Some(traveler) = self.time_travelers.get_mut(&id) {
                traveler.push_snapshot(snapshot.clone());
            }
        }
    }
}
