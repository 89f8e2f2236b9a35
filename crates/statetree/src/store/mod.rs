//! The tree store: arena, registries, and structural operations.
//!
//! # Overview
//!
//! A [`TreeStore`] owns every node in an id-keyed arena and is the single
//! mutator for all of them. Nodes reference each other by [`NodeId`], so no
//! registry ever owns a node and destroy can remove entries explicitly and
//! synchronously. A store may hold several disjoint trees: any parentless
//! node is a root, and a detached subtree simply becomes another root in the
//! same store (which keeps identifier resolution working across trees).
//!
//! Structural operations that change observable state (`set_value`,
//! `add_child`, `remove_child`, `destroy`, `detach`, `apply_patch`,
//! `apply_snapshot`) live in the sibling modules and all funnel through one
//! commit pipeline; this module holds the arena plumbing, the silent
//! structural helpers that pipeline is built from, and the subscription
//! surface.

pub mod apply;
pub mod mutate;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use statetree_json_pointer::{parse_index, parse_pointer, Path};

use crate::action::{ActionContext, ActionListenerSet};
use crate::error::TreeError;
use crate::history::timetravel::{TimeTravelId, TimeTravelManager};
use crate::history::undo::{UndoManager, UndoManagerId};
use crate::node::{
    ActionListener, LifecycleListener, ListenerId, NodeId, NodeKind, PatchListener,
    SnapshotListener, TreeNode, TypeDescriptor,
};
use crate::registry::IdentifierWaiter;
use crate::sync::{Reconciler, StructuralReconciler};

/// The observable state container.
pub struct TreeStore {
    pub(crate) nodes: HashMap<NodeId, TreeNode>,
    next_node: u64,
    /// Type name → identifier value → node.
    pub(crate) identifiers: IndexMap<String, IndexMap<String, NodeId>>,
    pub(crate) waiters: Vec<IdentifierWaiter>,
    pub(crate) action_stack: Rc<RefCell<Vec<ActionContext>>>,
    pub(crate) action_listeners: ActionListenerSet,
    pub(crate) undo_managers: HashMap<UndoManagerId, UndoManager>,
    pub(crate) next_undo: u64,
    pub(crate) time_travelers: HashMap<TimeTravelId, TimeTravelManager>,
    pub(crate) next_time_travel: u64,
    pub(crate) reconciler: Rc<dyn Reconciler>,
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_node: 0,
            identifiers: IndexMap::new(),
            waiters: Vec::new(),
            action_stack: Rc::new(RefCell::new(Vec::new())),
            action_listeners: ActionListenerSet::default(),
            undo_managers: HashMap::new(),
            next_undo: 0,
            time_travelers: HashMap::new(),
            next_time_travel: 0,
            reconciler: Rc::new(StructuralReconciler),
        }
    }

    /// Replace the collection reconciler (the modeling-layer `sync_to_node`
    /// hook). The structural reconciler is installed by default.
    pub fn set_reconciler(&mut self, reconciler: Rc<dyn Reconciler>) {
        self.reconciler = reconciler;
    }

    // ── Node creation ─────────────────────────────────────────────────────

    /// Materialize a new root node from a plain value.
    pub fn create_node(
        &mut self,
        descriptor: TypeDescriptor,
        value: Value,
    ) -> Result<NodeId, TreeError> {
        self.spawn_node(descriptor, value, None)
    }

    /// Materialize a new root node carrying an environment, inherited by all
    /// descendants created under it (fixed at creation time).
    pub fn create_node_with_env(
        &mut self,
        descriptor: TypeDescriptor,
        value: Value,
        environment: Value,
    ) -> Result<NodeId, TreeError> {
        self.spawn_node(descriptor, value, Some(environment))
    }

    /// Allocate a node and, for composite kinds, build its children from the
    /// initial value through the reconciler. No patch is emitted; creation
    /// becomes observable when the node is attached or mutated.
    pub(crate) fn spawn_node(
        &mut self,
        descriptor: TypeDescriptor,
        value: Value,
        environment: Option<Value>,
    ) -> Result<NodeId, TreeError> {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        let composite = descriptor.kind.is_composite();
        let cell_value = if composite { Value::Null } else { value.clone() };
        let mut node = TreeNode::new(id, descriptor, cell_value);
        node.environment = environment;
        self.nodes.insert(id, node);
        if composite {
            let reconciler = Rc::clone(&self.reconciler);
            if let Err(err) = reconciler.sync_to_node(self, id, &value) {
                self.destroy_subtree(id);
                return Err(err);
            }
        }
        Ok(id)
    }

    // ── Arena accessors ───────────────────────────────────────────────────

    pub(crate) fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn ensure_alive(&self, id: NodeId) -> Result<&TreeNode, TreeError> {
        match self.nodes.get(&id) {
            Some(n) if n.alive => Ok(n),
            _ => Err(TreeError::DeadNode(id)),
        }
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| n.alive).unwrap_or(false)
    }

    pub fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|n| n.descriptor.kind)
    }

    pub fn descriptor_of(&self, id: NodeId) -> Option<&TypeDescriptor> {
        self.nodes.get(&id).map(|n| &n.descriptor)
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Walk the parent chain to the tree root.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        current
    }

    /// The node's path segments from its root.
    pub fn path_of(&self, id: NodeId) -> Option<&Path> {
        self.nodes.get(&id).map(|n| &n.path)
    }

    /// The node's `/`-joined, escaped path string.
    pub fn path_string_of(&self, id: NodeId) -> Option<String> {
        self.path_of(id).map(|p| statetree_json_pointer::format_pointer(p))
    }

    /// The environment fixed at the node's creation, if any.
    pub fn environment_of(&self, id: NodeId) -> Option<&Value> {
        self.nodes.get(&id).and_then(|n| n.environment.as_ref())
    }

    /// Child keys and ids in stable insertion order.
    pub fn children_of(&self, id: NodeId) -> Vec<(String, NodeId)> {
        self.nodes
            .get(&id)
            .map(|n| n.children.iter().map(|(k, c)| (k.clone(), *c)).collect())
            .unwrap_or_default()
    }

    pub fn child_of(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.children.get(key).copied())
    }

    /// Exact-path resolution from `root`; no pattern matching.
    pub fn resolve_path(&self, root: NodeId, pointer: &str) -> Option<NodeId> {
        let mut current = root;
        self.nodes.get(&current)?;
        for segment in parse_pointer(pointer) {
            current = self.child_of(current, &segment)?;
        }
        Some(current)
    }

    /// Number of live nodes in the arena. Diagnostics only.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The node's plain value: the cell for scalars and references, the
    /// derived snapshot for composite kinds.
    pub fn get_value(&self, id: NodeId) -> Result<Value, TreeError> {
        let node = self.ensure_alive(id)?;
        if node.descriptor.kind.is_composite() {
            Ok(crate::snapshot::snapshot_of(self, id))
        } else {
            Ok(node.cell.get().clone())
        }
    }

    // ── Volatile bag & transforms ─────────────────────────────────────────

    /// Attach an un-serialized value to the node; volatile entries never
    /// appear in snapshots.
    pub fn set_volatile(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), TreeError> {
        self.ensure_alive(id)?;
        if let Some(n) = self.node_mut(id) {
            n.volatile.insert(key.into(), value);
        }
        Ok(())
    }

    pub fn volatile(&self, id: NodeId, key: &str) -> Option<Value> {
        self.nodes.get(&id).and_then(|n| n.volatile.get(key).cloned())
    }

    pub fn remove_volatile(&mut self, id: NodeId, key: &str) -> Option<Value> {
        self.nodes.get_mut(&id).and_then(|n| n.volatile.remove(key))
    }

    /// Install the transform applied when ingesting an external value into
    /// this node's subtree.
    pub fn set_pre_snapshot_transform(
        &mut self,
        id: NodeId,
        transform: impl Fn(Value) -> Value + 'static,
    ) -> Result<(), TreeError> {
        self.ensure_alive(id)?;
        if let Some(n) = self.node_mut(id) {
            n.pre_transform = Some(Box::new(transform));
        }
        Ok(())
    }

    /// Install the transform applied when deriving a snapshot out of this
    /// node.
    pub fn set_post_snapshot_transform(
        &mut self,
        id: NodeId,
        transform: impl Fn(Value) -> Value + 'static,
    ) -> Result<(), TreeError> {
        self.ensure_alive(id)?;
        if let Some(n) = self.node_mut(id) {
            n.post_transform = Some(Box::new(transform));
        }
        Ok(())
    }

    // ── Subscriptions ─────────────────────────────────────────────────────

    /// Subscribe to patches at `node`. The listener receives forward and
    /// inverse patches with paths relative to `node`, for every change in its
    /// subtree (patch notification bubbles through every ancestor).
    pub fn on_patch(
        &mut self,
        node: NodeId,
        listener: impl FnMut(&crate::patch::Patch, &crate::patch::Patch) + 'static,
    ) -> Result<ListenerId, TreeError> {
        self.ensure_alive(node)?;
        let boxed: PatchListener = Box::new(listener);
        match self.node_mut(node) {
            Some(n) => Ok(n.patch_listeners.add(boxed)),
            None => Err(TreeError::DeadNode(node)),
        }
    }

    pub fn off_patch(&mut self, node: NodeId, id: ListenerId) -> bool {
        self.nodes
            .get_mut(&node)
            .map(|n| n.patch_listeners.remove(id))
            .unwrap_or(false)
    }

    /// Subscribe to snapshot recomputations. Snapshot notification is
    /// delivered only while `node` is the root of its tree.
    pub fn on_snapshot(
        &mut self,
        node: NodeId,
        listener: impl FnMut(&Value) + 'static,
    ) -> Result<ListenerId, TreeError> {
        self.ensure_alive(node)?;
        let boxed: SnapshotListener = Box::new(listener);
        match self.node_mut(node) {
            Some(n) => Ok(n.snapshot_listeners.add(boxed)),
            None => Err(TreeError::DeadNode(node)),
        }
    }

    pub fn off_snapshot(&mut self, node: NodeId, id: ListenerId) -> bool {
        self.nodes
            .get_mut(&node)
            .map(|n| n.snapshot_listeners.remove(id))
            .unwrap_or(false)
    }

    /// Subscribe to liveness changes; the listener fires with `false` when
    /// the node is destroyed.
    pub fn on_lifecycle(
        &mut self,
        node: NodeId,
        listener: impl FnMut(bool) + 'static,
    ) -> Result<ListenerId, TreeError> {
        self.ensure_alive(node)?;
        let boxed: LifecycleListener = Box::new(listener);
        match self.node_mut(node) {
            Some(n) => Ok(n.lifecycle_listeners.add(boxed)),
            None => Err(TreeError::DeadNode(node)),
        }
    }

    pub fn off_lifecycle(&mut self, node: NodeId, id: ListenerId) -> bool {
        self.nodes
            .get_mut(&node)
            .map(|n| n.lifecycle_listeners.remove(id))
            .unwrap_or(false)
    }

    /// Register a per-node action recorder: it fires for actions run on this
    /// node or any of its descendants.
    pub fn add_action_recorder(
        &mut self,
        node: NodeId,
        listener: impl FnMut(&crate::action::ActionCall) + 'static,
    ) -> Result<ListenerId, TreeError> {
        self.ensure_alive(node)?;
        let boxed: ActionListener = Box::new(listener);
        match self.node_mut(node) {
            Some(n) => Ok(n.action_recorders.add(boxed)),
            None => Err(TreeError::DeadNode(node)),
        }
    }

    pub fn remove_action_recorder(&mut self, node: NodeId, id: ListenerId) -> bool {
        self.nodes
            .get_mut(&node)
            .map(|n| n.action_recorders.remove(id))
            .unwrap_or(false)
    }

    // ── Silent structural helpers ─────────────────────────────────────────
    //
    // These mutate tree shape without emitting patches; the commit pipeline
    // and the reconciler compose them into observable operations.

    /// Absolute path segments of a node (empty for roots and unknown ids).
    pub(crate) fn abs_path(&self, id: NodeId) -> Path {
        self.nodes.get(&id).map(|n| n.path.clone()).unwrap_or_default()
    }

    /// Insert `child` under `parent` at `key`. List parents splice at the
    /// numeric index (`-` appends); record/dictionary parents replace any
    /// existing occupant, destroying it first.
    pub(crate) fn attach_child_silent(
        &mut self,
        parent: NodeId,
        key: &str,
        child: NodeId,
    ) -> Result<String, TreeError> {
        let parent_kind = self
            .kind_of(parent)
            .ok_or(TreeError::DeadNode(parent))?;
        let actual_key = if parent_kind == NodeKind::List {
            let len = self.nodes.get(&parent).map(|n| n.list_len()).unwrap_or(0);
            let index = parse_index(key, len)
                .map_err(|_| TreeError::InvalidPath(format!("bad list index: {key}")))?;
            if index > len {
                return Err(TreeError::InvalidPath(format!(
                    "list index {index} out of bounds (len {len})"
                )));
            }
            self.splice_list_insert(parent, index, child);
            index.to_string()
        } else {
            if let Some(existing) = self.child_of(parent, key) {
                self.destroy_subtree(existing);
            }
            if let Some(p) = self.node_mut(parent) {
                p.children.insert(key.to_string(), child);
            }
            key.to_string()
        };
        if let Some(c) = self.node_mut(child) {
            c.parent = Some(parent);
            c.key_in_parent = Some(actual_key.clone());
        }
        self.recompute_paths(child);
        Ok(actual_key)
    }

    /// Remove the child at `key` from `parent` without destroying it. List
    /// parents are re-indexed densely.
    pub(crate) fn withdraw_child_silent(&mut self, parent: NodeId, key: &str) -> Option<NodeId> {
        let child = self.child_of(parent, key)?;
        let is_list = self.kind_of(parent) == Some(NodeKind::List);
        if let Some(p) = self.node_mut(parent) {
            p.children.shift_remove(key);
        }
        if let Some(c) = self.node_mut(child) {
            c.parent = None;
            c.key_in_parent = None;
        }
        if is_list {
            self.rebuild_list_keys(parent);
        }
        Some(child)
    }

    fn splice_list_insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        let mut order: Vec<NodeId> = self
            .nodes
            .get(&parent)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default();
        order.insert(index.min(order.len()), child);
        self.rewrite_list_children(parent, order);
    }

    /// Re-key a list's children densely (`"0"`, `"1"`, …) after a splice,
    /// fixing each child's key and subtree paths.
    pub(crate) fn rebuild_list_keys(&mut self, parent: NodeId) {
        let order: Vec<NodeId> = self
            .nodes
            .get(&parent)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default();
        self.rewrite_list_children(parent, order);
    }

    pub(crate) fn rewrite_list_children(&mut self, parent: NodeId, order: Vec<NodeId>) {
        let mut children = IndexMap::with_capacity(order.len());
        for (i, id) in order.iter().enumerate() {
            children.insert(i.to_string(), *id);
        }
        if let Some(p) = self.node_mut(parent) {
            p.children = children;
        }
        for (i, id) in order.into_iter().enumerate() {
            let key = i.to_string();
            let changed = self
                .nodes
                .get(&id)
                .map(|n| n.key_in_parent.as_deref() != Some(key.as_str()) || n.parent != Some(parent))
                .unwrap_or(false);
            if let Some(c) = self.node_mut(id) {
                c.parent = Some(parent);
                c.key_in_parent = Some(key);
            }
            if changed {
                self.recompute_paths(id);
            }
        }
    }

    /// Re-derive `start`'s path from its parent chain and propagate through
    /// its entire subtree.
    pub(crate) fn recompute_paths(&mut self, start: NodeId) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let new_path = match self.nodes.get(&id).and_then(|n| n.parent) {
                Some(parent) => {
                    let mut path = self.abs_path(parent);
                    if let Some(key) = self.nodes.get(&id).and_then(|n| n.key_in_parent.clone()) {
                        path.push(key);
                    }
                    path
                }
                None => Vec::new(),
            };
            if let Some(n) = self.node_mut(id) {
                n.path = new_path;
                stack.extend(n.children.values().copied());
            }
        }
    }

    /// Destroy a subtree: children depth-first, then the node itself. Each
    /// node has its identifier binding removed, its liveness flag cleared,
    /// its lifecycle listeners fired with `false`, its listener sets cleared,
    /// and its arena entry removed. Emits no patches.
    pub(crate) fn destroy_subtree(&mut self, node: NodeId) {
        let mut preorder = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            preorder.push(id);
            if let Some(n) = self.nodes.get(&id) {
                stack.extend(n.children.values().copied());
            }
        }
        // Reverse pre-order visits every child before its parent.
        for id in preorder.into_iter().rev() {
            self.unregister_identifier(id);
            if let Some(n) = self.nodes.get_mut(&id) {
                n.alive = false;
                let mut listeners = n.lifecycle_listeners.begin_dispatch();
                for (_, listener) in listeners.iter_mut() {
                    listener(false);
                }
                n.patch_listeners.clear();
                n.snapshot_listeners.clear();
                n.lifecycle_listeners.clear();
                n.action_recorders.clear();
            }
            self.nodes.remove(&id);
        }
    }

    /// Overwrite a node's cell without synthesizing a patch. Used by the
    /// reconciler while a wholesale collection replacement is in progress
    /// (the enclosing operation emits the single logical patch).
    pub(crate) fn write_cell_silent(&mut self, id: NodeId, value: Value) {
        if let Some(n) = self.node_mut(id) {
            n.cell.replace(value);
        }
    }

    /// Ancestor chain from `id` (inclusive) to its root.
    pub(crate) fn ancestors_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent_of(node);
        }
        out
    }
}
