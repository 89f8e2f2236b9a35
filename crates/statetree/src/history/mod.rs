//! Reversible history built on the patch and snapshot protocols.
//!
//! Two disciplines with one trade-off: the undo manager records inverse
//! patches (O(change size) per step), the time-travel manager records full
//! snapshots (O(tree size) per step, robust to any mutation shape). Both are
//! bounded, cursor-based, and guard against their own feedback while
//! replaying.

pub mod timetravel;
pub mod undo;

pub use timetravel::{TimeTravelId, TimeTravelOptions};
pub use undo::{UndoManagerId, UndoOptions};
