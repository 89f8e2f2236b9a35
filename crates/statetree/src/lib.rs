//! statetree — an observable, hierarchical state container.
//!
//! A runtime tree of mutable nodes with structural snapshotting, patch-based
//! change propagation, identifier-based references, and reversible history.
//! The higher-level modeling layer (typed records, lists, dictionaries) is an
//! external collaborator: it materializes values through the node-creation
//! primitives here and plugs collection reconciliation in through the
//! [`sync::Reconciler`] boundary.
//!
//! Everything is synchronous and single-threaded: one mutation produces patch
//! notifications in ancestor order followed by exactly one snapshot
//! notification at the tree root.

// Leaf modules (no internal deps)
pub mod cell;
pub mod error;
pub mod patch;

pub mod node;
pub mod action;
pub mod history;
pub mod registry;
pub mod reference;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use action::{ActionCall, ActionContext};
pub use cell::StorageCell;
pub use error::TreeError;
pub use history::{TimeTravelId, TimeTravelOptions, UndoManagerId, UndoOptions};
pub use node::{ListenerId, NodeId, NodeKind, TypeDescriptor};
pub use patch::codec::{decode_patch, decode_patches, encode_patch, encode_patches};
pub use patch::{Patch, PatchOp};
pub use store::TreeStore;
pub use sync::{Reconciler, StructuralReconciler};
