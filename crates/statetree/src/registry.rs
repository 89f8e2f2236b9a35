//! The type-partitioned identifier registry and its wait protocol.
//!
//! The registry maps type name → identifier value → node. It never owns a
//! node: entries are plain ids, and destroy removes them explicitly and
//! synchronously. The arena itself doubles as the global node index used for
//! diagnostics; nothing correctness-critical looks a node up by raw id.

use crate::error::TreeError;
use crate::node::{NodeId, now_ms};
use crate::store::TreeStore;

/// A pending resolve-or-wait request. The callback fires synchronously when
/// a matching identifier is registered, or with an error once the deadline
/// passes and [`TreeStore::expire_waiters`] runs.
pub(crate) struct IdentifierWaiter {
    pub type_name: String,
    pub id: String,
    pub deadline_ms: u64,
    pub callback: Box<dyn FnOnce(Result<NodeId, TreeError>)>,
}

impl TreeStore {
    /// Bind `(type_name, id)` to a live node, replacing any previous binding
    /// of that node. The binding is removed exactly when the node is
    /// destroyed or rebound.
    pub fn register_identifier(
        &mut self,
        node: NodeId,
        type_name: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<(), TreeError> {
        self.ensure_alive(node)?;
        self.unregister_identifier(node);
        let type_name = type_name.into();
        let id = id.into();
        self.identifiers
            .entry(type_name.clone())
            .or_default()
            .insert(id.clone(), node);
        if let Some(n) = self.node_mut(node) {
            n.identifier = Some((type_name.clone(), id.clone()));
        }
        self.wake_waiters(&type_name, &id, node);
        Ok(())
    }

    /// Remove the node's identifier binding, pruning an emptied type
    /// partition. Safe to call on unbound, dead, or unknown nodes.
    pub fn unregister_identifier(&mut self, node: NodeId) {
        let Some(binding) = self.nodes.get_mut(&node).and_then(|n| n.identifier.take()) else {
            return;
        };
        let (type_name, id) = binding;
        let mut emptied = false;
        if let Some(partition) = self.identifiers.get_mut(&type_name) {
            // Only drop the entry if it still points at this node; a newer
            // registration under the same identifier wins.
            if partition.get(&id) == Some(&node) {
                partition.shift_remove(&id);
            }
            emptied = partition.is_empty();
        }
        if emptied {
            self.identifiers.shift_remove(&type_name);
        }
    }

    /// Synchronous lookup. `None` means no live node is registered under
    /// that key; callers decide whether absence is fatal.
    pub fn resolve_identifier(&self, type_name: &str, id: &str) -> Option<NodeId> {
        let node = self.identifiers.get(type_name)?.get(id).copied()?;
        self.is_alive(node).then_some(node)
    }

    /// The node's current identifier binding, if any.
    pub fn identifier_of(&self, node: NodeId) -> Option<(String, String)> {
        self.nodes.get(&node).and_then(|n| n.identifier.clone())
    }

    /// Resolve `(type_name, id)` now, or park `callback` until a matching
    /// registration occurs. If no registration arrives before `deadline_ms`
    /// (milliseconds since the epoch), the next [`TreeStore::expire_waiters`]
    /// call fails the wait with [`TreeError::RegistrationTimeout`].
    pub fn when_identifier_registered(
        &mut self,
        type_name: impl Into<String>,
        id: impl Into<String>,
        deadline_ms: u64,
        callback: impl FnOnce(Result<NodeId, TreeError>) + 'static,
    ) {
        let type_name = type_name.into();
        let id = id.into();
        if let Some(node) = self.resolve_identifier(&type_name, &id) {
            callback(Ok(node));
            return;
        }
        self.waiters.push(IdentifierWaiter {
            type_name,
            id,
            deadline_ms,
            callback: Box::new(callback),
        });
    }

    /// Fail every waiter whose deadline has passed. The embedder drives the
    /// clock; passing `None` uses the current wall time.
    pub fn expire_waiters(&mut self, now_ms_override: Option<u64>) {
        let now = now_ms_override.unwrap_or_else(now_ms);
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.waiters.len() {
            if self.waiters[index].deadline_ms <= now {
                expired.push(self.waiters.swap_remove(index));
            } else {
                index += 1;
            }
        }
        for waiter in expired {
            (waiter.callback)(Err(TreeError::RegistrationTimeout {
                type_name: waiter.type_name,
                id: waiter.id,
            }));
        }
    }

    /// Number of pending identifier waits. Diagnostics only.
    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    fn wake_waiters(&mut self, type_name: &str, id: &str, node: NodeId) {
        if self.waiters.is_empty() {
            return;
        }
        let mut woken = Vec::new();
        let mut index = 0;
        while index < self.waiters.len() {
            if self.waiters[index].type_name == type_name && self.waiters[index].id == id {
                woken.push(self.waiters.swap_remove(index));
            } else {
                index += 1;
            }
        }
        for waiter in woken {
            (waiter.callback)(Ok(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TypeDescriptor;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn user_node(store: &mut TreeStore) -> NodeId {
        store
            .create_node(TypeDescriptor::record("User"), json!({"name": "ann"}))
            .unwrap()
    }

    #[test]
    fn register_resolve_destroy() {
        let mut store = TreeStore::new();
        let a = user_node(&mut store);
        store.register_identifier(a, "User", "u1").unwrap();
        assert_eq!(store.resolve_identifier("User", "u1"), Some(a));
        store.destroy(a);
        assert_eq!(store.resolve_identifier("User", "u1"), None);
        // The emptied partition is pruned.
        assert!(store.identifiers.get("User").is_none());
    }

    #[test]
    fn rebinding_moves_the_entry() {
        let mut store = TreeStore::new();
        let a = user_node(&mut store);
        store.register_identifier(a, "User", "u1").unwrap();
        store.register_identifier(a, "User", "u2").unwrap();
        assert_eq!(store.resolve_identifier("User", "u1"), None);
        assert_eq!(store.resolve_identifier("User", "u2"), Some(a));
        assert_eq!(store.identifier_of(a), Some(("User".into(), "u2".into())));
    }

    #[test]
    fn same_identifier_new_node_after_destroy() {
        let mut store = TreeStore::new();
        let a = user_node(&mut store);
        store.register_identifier(a, "User", "u1").unwrap();
        store.destroy(a);
        let b = user_node(&mut store);
        store.register_identifier(b, "User", "u1").unwrap();
        assert_eq!(store.resolve_identifier("User", "u1"), Some(b));
    }

    #[test]
    fn waiter_fires_on_registration() {
        let mut store = TreeStore::new();
        let resolved: Rc<RefCell<Option<NodeId>>> = Rc::default();
        let out = Rc::clone(&resolved);
        store.when_identifier_registered("User", "u1", u64::MAX, move |result| {
            *out.borrow_mut() = result.ok();
        });
        assert_eq!(store.pending_waiters(), 1);
        let a = user_node(&mut store);
        store.register_identifier(a, "User", "u1").unwrap();
        assert_eq!(*resolved.borrow(), Some(a));
        assert_eq!(store.pending_waiters(), 0);
    }

    #[test]
    fn waiter_resolves_immediately_when_registered() {
        let mut store = TreeStore::new();
        let a = user_node(&mut store);
        store.register_identifier(a, "User", "u1").unwrap();
        let resolved: Rc<RefCell<Option<NodeId>>> = Rc::default();
        let out = Rc::clone(&resolved);
        store.when_identifier_registered("User", "u1", 0, move |result| {
            *out.borrow_mut() = result.ok();
        });
        assert_eq!(*resolved.borrow(), Some(a));
        assert_eq!(store.pending_waiters(), 0);
    }

    #[test]
    fn waiter_times_out_explicitly() {
        let mut store = TreeStore::new();
        let failure: Rc<RefCell<Option<TreeError>>> = Rc::default();
        let out = Rc::clone(&failure);
        store.when_identifier_registered("User", "u1", 1_000, move |result| {
            *out.borrow_mut() = result.err();
        });
        store.expire_waiters(Some(500));
        assert!(failure.borrow().is_none());
        store.expire_waiters(Some(1_000));
        assert_eq!(
            *failure.borrow(),
            Some(TreeError::RegistrationTimeout {
                type_name: "User".into(),
                id: "u1".into()
            })
        );
    }
}
