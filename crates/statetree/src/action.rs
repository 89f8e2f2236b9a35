//! The action context stack.
//!
//! A per-store stack of "current mutation" descriptors, pushed before a
//! modeling-layer action body runs and popped afterwards under a
//! guaranteed-restore scope guard, so an unwinding action still leaves the
//! stack balanced. On normal completion the store's action listeners and the
//! action recorders on the owning node and its ancestors are notified. The
//! stack only attributes mutations; it does not make actions transactional —
//! a failing action leaves its partial mutations in place.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::node::{ActionListener, ListenerId, ListenerSet, NodeId};
use crate::store::TreeStore;

pub(crate) type ActionListenerSet = ListenerSet<ActionListener>;

/// The in-flight mutation descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    pub name: String,
    pub args: Vec<Value>,
    pub node: NodeId,
}

/// What listeners and recorders observe once an action completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub path: String,
    pub args: Vec<Value>,
}

/// Pops the pushed context on drop, surviving unwinds.
struct ActionScope {
    stack: Rc<RefCell<Vec<ActionContext>>>,
}

impl ActionScope {
    fn enter(stack: Rc<RefCell<Vec<ActionContext>>>, context: ActionContext) -> Self {
        stack.borrow_mut().push(context);
        Self { stack }
    }
}

impl Drop for ActionScope {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

impl TreeStore {
    /// Run `body` as a named action owned by `node`.
    ///
    /// The context is visible through [`TreeStore::current_action`] for the
    /// duration of `body`; afterwards action listeners and the recorders on
    /// `node` and its ancestors are notified. Notification is skipped when
    /// `body` unwinds (the stack is still restored).
    pub fn run_action<R>(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        args: Vec<Value>,
        body: impl FnOnce(&mut TreeStore) -> R,
    ) -> R {
        let name = name.into();
        let context = ActionContext {
            name: name.clone(),
            args: args.clone(),
            node,
        };
        let scope = ActionScope::enter(Rc::clone(&self.action_stack), context);
        let result = body(self);
        drop(scope);
        let call = ActionCall {
            name,
            path: self.path_string_of(node).unwrap_or_default(),
            args,
        };
        self.notify_action(node, &call);
        result
    }

    /// The innermost in-flight action, if any.
    pub fn current_action(&self) -> Option<ActionContext> {
        self.action_stack.borrow().last().cloned()
    }

    /// Subscribe to every completed action in this store.
    pub fn on_action(&mut self, listener: impl FnMut(&ActionCall) + 'static) -> ListenerId {
        self.action_listeners.add(Box::new(listener))
    }

    pub fn off_action(&mut self, id: ListenerId) -> bool {
        self.action_listeners.remove(id)
    }

    fn notify_action(&mut self, node: NodeId, call: &ActionCall) {
        let mut listeners = self.action_listeners.begin_dispatch();
        for (_, listener) in listeners.iter_mut() {
            listener(call);
        }
        self.action_listeners.end_dispatch(listeners);

        for ancestor in self.ancestors_of(node) {
            let has_recorders = self
                .nodes
                .get(&ancestor)
                .map(|n| !n.action_recorders.is_empty())
                .unwrap_or(false);
            if !has_recorders {
                continue;
            }
            let Some(n) = self.node_mut(ancestor) else { continue };
            let mut recorders = n.action_recorders.begin_dispatch();
            for (_, recorder) in recorders.iter_mut() {
                recorder(call);
            }
            if let Some(n) = self.node_mut(ancestor) {
                n.action_recorders.end_dispatch(recorders);
            }
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

    #[test]
    fn action_attributes_mutation() {
        let mut store = TreeStore::new();
        let root = store
            .create_node(TypeDescriptor::record("Counter"), json!({"count": 0}))
            .unwrap();
        let count = store.child_of(root, "count").unwrap();

        let calls: Rc<RefCell<Vec<ActionCall>>> = Rc::default();
        let seen = Rc::clone(&calls);
        store.on_action(move |call| seen.borrow_mut().push(call.clone()));

        assert!(store.current_action().is_none());
        store.run_action(root, "increment", vec![json!(5)], |store| {
            assert_eq!(
                store.current_action().map(|c| c.name),
                Some("increment".to_string())
            );
            store.set_value(count, json!(5)).unwrap();
        });
        assert!(store.current_action().is_none());

        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "increment");
        assert_eq!(calls[0].path, "");
        assert_eq!(calls[0].args, vec![json!(5)]);
    }

    #[test]
    fn nested_actions_stack() {
        let mut store = TreeStore::new();
        let root = store
            .create_node(TypeDescriptor::record("S"), json!({}))
            .unwrap();
        store.run_action(root, "outer", vec![], |store| {
            store.run_action(root, "inner", vec![], |store| {
                assert_eq!(
                    store.current_action().map(|c| c.name),
                    Some("inner".to_string())
                );
            });
            assert_eq!(
                store.current_action().map(|c| c.name),
                Some("outer".to_string())
            );
        });
    }

    #[test]
    fn recorders_fire_on_ancestors() {
        let mut store = TreeStore::new();
        let root = store
            .create_node(TypeDescriptor::record("S"), json!({"child": {"x": 1}}))
            .unwrap();
        let child = store.child_of(root, "child").unwrap();

        let names: Rc<RefCell<Vec<String>>> = Rc::default();
        let seen = Rc::clone(&names);
        store
            .add_action_recorder(root, move |call| seen.borrow_mut().push(call.name.clone()))
            .unwrap();

        store.run_action(child, "touch", vec![], |_| {});
        assert_eq!(*names.borrow(), vec!["touch".to_string()]);
        // The recorded path is the owning node's path.
        let paths: Rc<RefCell<Vec<String>>> = Rc::default();
        let seen = Rc::clone(&paths);
        store
            .add_action_recorder(root, move |call| seen.borrow_mut().push(call.path.clone()))
            .unwrap();
        store.run_action(child, "touch", vec![], |_| {});
        assert_eq!(*paths.borrow(), vec!["/child".to_string()]);
    }

    #[test]
    fn stack_survives_unwind() {
        let mut store = TreeStore::new();
        let root = store
            .create_node(TypeDescriptor::record("S"), json!({}))
            .unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.run_action(root, "boom", vec![], |_| panic!("action failed"));
        }));
        assert!(result.is_err());
        assert!(store.current_action().is_none());
    }
}
