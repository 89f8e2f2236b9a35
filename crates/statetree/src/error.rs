//! Error taxonomy for the state tree.
//!
//! Every structural failure is raised directly to the caller of the mutating
//! or resolving operation; the library performs no silent recovery. The two
//! intentional exceptions live elsewhere: safe-reference access yields
//! `Ok(None)` instead of [`TreeError::UnresolvedReference`], and the history
//! managers suppress their own feedback while replaying.

use thiserror::Error;

use crate::node::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Mutation attempted on a node whose liveness flag is false.
    #[error("DEAD_NODE: {0} is no longer alive")]
    DeadNode(NodeId),

    /// A patch or path-resolution operation referenced a path segment with no
    /// corresponding child. Operations applied before the failing segment are
    /// not rolled back.
    #[error("INVALID_PATH: {0}")]
    InvalidPath(String),

    /// A non-safe reference access failed to find a registered target.
    /// Raised at the point of access, never at reference creation.
    #[error("UNRESOLVED_REFERENCE: {type_name}[{id}]")]
    UnresolvedReference { type_name: String, id: String },

    /// An identifier wait exceeded its deadline.
    #[error("REGISTRATION_TIMEOUT: {type_name}[{id}]")]
    RegistrationTimeout { type_name: String, id: String },
}
