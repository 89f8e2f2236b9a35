//! Reference resolution.
//!
//! A reference node holds only an identifier value, never the target.
//! Resolution is late and re-evaluated on every access: nothing is cached,
//! so registering a new node under the same identifier (after destroying the
//! old one, or for the first time) is picked up by the next access.

use serde_json::Value;

use crate::error::TreeError;
use crate::node::{NodeId, NodeKind};
use crate::store::TreeStore;

impl TreeStore {
    /// Resolve a reference node to its current target.
    ///
    /// Returns `Ok(Some(target))` when a live node is registered under the
    /// reference's `(target type, identifier)` key. A failed resolution is
    /// [`TreeError::UnresolvedReference`] unless the reference was declared
    /// safe, in which case it yields `Ok(None)`.
    pub fn resolve_reference(&self, reference: NodeId) -> Result<Option<NodeId>, TreeError> {
        let node = self.ensure_alive(reference)?;
        if node.descriptor.kind != NodeKind::Reference {
            return Err(TreeError::InvalidPath(format!(
                "{reference} is not a reference node"
            )));
        }
        let type_name = node
            .descriptor
            .reference_target
            .clone()
            .unwrap_or_default();
        let id = identifier_text(node.cell.get());
        match self.resolve_identifier(&type_name, &id) {
            Some(target) => Ok(Some(target)),
            None if node.descriptor.safe_reference => Ok(None),
            None => Err(TreeError::UnresolvedReference { type_name, id }),
        }
    }
}

/// Identifier cells may hold strings or numbers; both address the registry
/// by their canonical text.
fn identifier_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
