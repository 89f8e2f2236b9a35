//! The atomic unit of tree structure.
//!
//! A [`TreeNode`] wraps a [`StorageCell`] and tracks parent/children/path/
//! environment/liveness plus its listener sets. Nodes live in the
//! [`TreeStore`](crate::store::TreeStore) arena and refer to each other by
//! [`NodeId`] only, so the registries are never the sole owner of a node and
//! removal on destroy is explicit and synchronous.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde_json::Value;

use statetree_json_pointer::Path;

use crate::cell::StorageCell;
use crate::patch::Patch;

/// Process-unique node handle: a monotonic sequence number, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The shape kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Record,
    List,
    Dictionary,
    Reference,
    Scalar,
}

impl NodeKind {
    /// Record/list/dictionary nodes derive their value from children.
    pub fn is_composite(&self) -> bool {
        matches!(self, NodeKind::Record | NodeKind::List | NodeKind::Dictionary)
    }
}

/// Opaque tag identifying a node's shape kind and human-readable type name.
///
/// Reference descriptors additionally name the target type and may be marked
/// safe, in which case failed resolution yields absence instead of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub kind: NodeKind,
    pub name: String,
    pub reference_target: Option<String>,
    pub safe_reference: bool,
}

impl TypeDescriptor {
    fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            reference_target: None,
            safe_reference: false,
        }
    }

    pub fn record(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Record, name)
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self::new(NodeKind::List, name)
    }

    pub fn dictionary(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Dictionary, name)
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Scalar, name)
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut d = Self::new(NodeKind::Reference, name);
        d.reference_target = Some(target.into());
        d
    }

    pub fn safe_reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut d = Self::reference(name, target);
        d.safe_reference = true;
        d
    }

    /// Infer a descriptor from a plain value: objects become records, arrays
    /// become lists, everything else is a scalar. The structural reconciler
    /// uses this when no modeling layer has declared shapes.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Object(_) => Self::record("record"),
            Value::Array(_) => Self::list("list"),
            _ => Self::scalar("scalar"),
        }
    }
}

/// Handle returned by a subscription; passing it back disposes the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Patch listener: receives the forward and inverse patch, with paths
/// relative to the listening node.
pub type PatchListener = Box<dyn FnMut(&Patch, &Patch)>;
/// Snapshot listener: receives the freshly derived root snapshot.
pub type SnapshotListener = Box<dyn FnMut(&Value)>;
/// Lifecycle listener: receives the liveness flag (`false` on destroy).
pub type LifecycleListener = Box<dyn FnMut(bool)>;
/// Action listener: receives the completed action call descriptor.
pub type ActionListener = Box<dyn FnMut(&crate::action::ActionCall)>;

/// An id-keyed listener set with stable-snapshot dispatch.
///
/// Dispatch takes the entries out, iterates the taken vector, and merges back
/// anything subscribed in the meantime, so an in-progress notification never
/// iterates a set that is being mutated.
pub(crate) struct ListenerSet<F> {
    next: u64,
    entries: Vec<(ListenerId, F)>,
}

impl<F> Default for ListenerSet<F> {
    fn default() -> Self {
        Self {
            next: 0,
            entries: Vec::new(),
        }
    }
}

impl<F> ListenerSet<F> {
    pub fn add(&mut self, listener: F) -> ListenerId {
        let id = ListenerId(self.next);
        self.next += 1;
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(lid, _)| *lid != id);
        before != self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Take the current entries for dispatch.
    pub fn begin_dispatch(&mut self) -> Vec<(ListenerId, F)> {
        std::mem::take(&mut self.entries)
    }

    /// Merge the dispatched entries back, keeping subscriptions added during
    /// dispatch at the tail.
    pub fn end_dispatch(&mut self, mut dispatched: Vec<(ListenerId, F)>) {
        let added = std::mem::take(&mut self.entries);
        dispatched.extend(added);
        self.entries = dispatched;
    }
}

/// The atomic tree unit: value, identity, and structural links.
pub struct TreeNode {
    pub(crate) id: NodeId,
    pub(crate) created_at_ms: u64,
    pub(crate) descriptor: TypeDescriptor,
    pub(crate) parent: Option<NodeId>,
    pub(crate) key_in_parent: Option<String>,
    pub(crate) children: IndexMap<String, NodeId>,
    pub(crate) path: Path,
    pub(crate) environment: Option<Value>,
    pub(crate) alive: bool,
    pub(crate) cell: StorageCell,
    pub(crate) identifier: Option<(String, String)>,
    pub(crate) volatile: HashMap<String, Value>,
    pub(crate) pre_transform: Option<Box<dyn Fn(Value) -> Value>>,
    pub(crate) post_transform: Option<Box<dyn Fn(Value) -> Value>>,
    pub(crate) patch_listeners: ListenerSet<PatchListener>,
    pub(crate) snapshot_listeners: ListenerSet<SnapshotListener>,
    pub(crate) lifecycle_listeners: ListenerSet<LifecycleListener>,
    pub(crate) action_recorders: ListenerSet<ActionListener>,
}

impl TreeNode {
    pub(crate) fn new(id: NodeId, descriptor: TypeDescriptor, value: Value) -> Self {
        Self {
            id,
            created_at_ms: now_ms(),
            descriptor,
            parent: None,
            key_in_parent: None,
            children: IndexMap::new(),
            path: Vec::new(),
            environment: None,
            alive: true,
            cell: StorageCell::new(value),
            identifier: None,
            volatile: HashMap::new(),
            pre_transform: None,
            post_transform: None,
            patch_listeners: ListenerSet::default(),
            snapshot_listeners: ListenerSet::default(),
            lifecycle_listeners: ListenerSet::default(),
            action_recorders: ListenerSet::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> NodeKind {
        self.descriptor.kind
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Milliseconds since the epoch at creation.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Number of children in the list, based on its dense index keys.
    pub(crate) fn list_len(&self) -> usize {
        self.children.len()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_constructors() {
        assert_eq!(TypeDescriptor::record("User").kind, NodeKind::Record);
        let r = TypeDescriptor::reference("ref", "User");
        assert_eq!(r.reference_target.as_deref(), Some("User"));
        assert!(!r.safe_reference);
        assert!(TypeDescriptor::safe_reference("ref", "User").safe_reference);
    }

    #[test]
    fn descriptor_inference() {
        assert_eq!(TypeDescriptor::infer(&json!({})).kind, NodeKind::Record);
        assert_eq!(TypeDescriptor::infer(&json!([])).kind, NodeKind::List);
        assert_eq!(TypeDescriptor::infer(&json!(1)).kind, NodeKind::Scalar);
    }

    #[test]
    fn listener_set_dispatch_is_stable() {
        let mut set: ListenerSet<u32> = ListenerSet::default();
        let a = set.add(1);
        set.add(2);
        let dispatched = set.begin_dispatch();
        assert_eq!(dispatched.len(), 2);
        // A subscription arriving mid-dispatch lands on the live (empty) set.
        set.add(3);
        set.end_dispatch(dispatched);
        assert_eq!(set.entries.len(), 3);
        assert!(set.remove(a));
        assert!(!set.remove(a));
    }

    #[test]
    fn new_node_is_alive_root() {
        let n = TreeNode::new(NodeId(1), TypeDescriptor::scalar("number"), json!(0));
        assert!(n.is_alive());
        assert!(n.is_root());
        assert!(n.path.is_empty());
    }
}
