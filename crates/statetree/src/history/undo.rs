//! Inverse-patch undo/redo.
//!
//! A bounded, double-ended history list with a cursor. Every inverse patch
//! produced under the manager's target root is recorded (unless replaying,
//! suppressed, or the manager is grouping into an open transaction); `undo`
//! applies an entry's patches in reverse order, `redo` applies the stored
//! forward patches in order. Paths inside entries are relative to the
//! manager's target, so a manager over a subtree keeps working when the
//! subtree moves.

use std::collections::VecDeque;

use crate::error::TreeError;
use crate::node::NodeId;
use crate::patch::Patch;
use crate::store::TreeStore;

/// Opaque handle to an undo manager registered on a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndoManagerId(pub(crate) u64);

#[derive(Debug, Clone, Default)]
pub struct UndoOptions {
    /// Maximum retained entries; the oldest entry is trimmed when exceeded.
    pub history_limit: Option<usize>,
    /// When set, a change landing within this many milliseconds of the
    /// previous entry merges into it instead of opening a new entry.
    pub group_window_ms: Option<u64>,
}

pub(crate) struct UndoEntry {
    /// Inverse patches; applying them in reverse order undoes the entry.
    pub patches: Vec<Patch>,
    /// Forward patches; applying them in order redoes the entry.
    pub inverse_patches: Vec<Patch>,
    pub recorded_at_ms: u64,
}

impl UndoEntry {
    fn new(now: u64) -> Self {
        Self {
            patches: Vec::new(),
            inverse_patches: Vec::new(),
            recorded_at_ms: now,
        }
    }

    fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

pub(crate) struct UndoManager {
    pub target: NodeId,
    entries: VecDeque<UndoEntry>,
    /// Index of the last undoable entry; -1 means nothing undoable.
    cursor: isize,
    pub replaying: bool,
    suppressed: u32,
    group: Option<UndoEntry>,
    options: UndoOptions,
}

impl UndoManager {
    pub fn new(target: NodeId, options: UndoOptions) -> Self {
        Self {
            target,
            entries: VecDeque::new(),
            cursor: -1,
            replaying: false,
            suppressed: 0,
            group: None,
            options,
        }
    }

    /// Record one reversible change produced under the target.
    pub fn observe(&mut self, forward: Patch, inverse: Patch, now: u64) {
        if self.replaying || self.suppressed > 0 {
            return;
        }
        if let Some(group) = &mut self.group {
            group.patches.push(inverse);
            group.inverse_patches.push(forward);
            return;
        }
        if let Some(window) = self.options.group_window_ms {
            let at_tail = self.cursor >= 0 && self.cursor as usize == self.entries.len() - 1;
            if at_tail {
                if let Some(last) = self.entries.back_mut() {
                    if now.saturating_sub(last.recorded_at_ms) <= window {
                        last.patches.push(inverse);
                        last.inverse_patches.push(forward);
                        last.recorded_at_ms = now;
                        return;
                    }
                }
            }
        }
        self.push_entry(
            UndoEntry {
                patches: vec![inverse],
                inverse_patches: vec![forward],
                recorded_at_ms: now,
            },
        );
    }

    fn push_entry(&mut self, entry: UndoEntry) {
        // Anything beyond the cursor is unreachable redo state.
        self.entries.truncate((self.cursor + 1) as usize);
        self.entries.push_back(entry);
        self.cursor += 1;
        if let Some(limit) = self.options.history_limit {
            while self.entries.len() > limit.max(1) {
                self.entries.pop_front();
                self.cursor -= 1;
            }
        }
    }

    fn open_group(&mut self, now: u64) {
        if self.group.is_none() {
            self.group = Some(UndoEntry::new(now));
        }
    }

    fn close_group(&mut self) {
        if let Some(group) = self.group.take() {
            if !group.is_empty() {
                self.push_entry(group);
            }
        }
    }

    fn undo_entry(&self) -> Option<&UndoEntry> {
        usize::try_from(self.cursor)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    fn redo_entry(&self) -> Option<&UndoEntry> {
        usize::try_from(self.cursor + 1)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    pub fn undo_levels(&self) -> usize {
        (self.cursor + 1).max(0) as usize
    }

    pub fn redo_levels(&self) -> usize {
        self.entries.len().saturating_sub(self.undo_levels())
    }
}

impl TreeStore {
    /// Attach an inverse-patch undo manager to the subtree rooted at
    /// `target`.
    pub fn create_undo_manager(
        &mut self,
        target: NodeId,
        options: UndoOptions,
    ) -> Result<UndoManagerId, TreeError> {
        self.ensure_alive(target)?;
        let id = UndoManagerId(self.next_undo);
        self.next_undo += 1;
        self.undo_managers
            .insert(id, UndoManager::new(target, options));
        Ok(id)
    }

    /// Detach and discard an undo manager. Unknown handles are ignored.
    pub fn drop_undo_manager(&mut self, id: UndoManagerId) {
        self.undo_managers.remove(&id);
    }

    pub fn undo_levels(&self, id: UndoManagerId) -> usize {
        self.undo_managers
            .get(&id)
            .map(|m| m.undo_levels())
            .unwrap_or(0)
    }

    pub fn redo_levels(&self, id: UndoManagerId) -> usize {
        self.undo_managers
            .get(&id)
            .map(|m| m.redo_levels())
            .unwrap_or(0)
    }

    pub fn can_undo(&self, id: UndoManagerId) -> bool {
        self.undo_levels(id) > 0
    }

    pub fn can_redo(&self, id: UndoManagerId) -> bool {
        self.redo_levels(id) > 0
    }

    /// Revert the newest recorded entry. No-op when nothing is undoable.
    pub fn undo(&mut self, id: UndoManagerId) -> Result<(), TreeError> {
        let Some((target, patches)) = self.undo_managers.get_mut(&id).and_then(|m| {
            let patches: Vec<Patch> = m.undo_entry()?.patches.clone();
            m.replaying = true;
            Some((m.target, patches))
        }) else {
            return Ok(());
        };
        let result = patches
            .iter()
            .rev()
            .try_for_each(|patch| self.apply_patch(target, patch));
        if let Some(m) = self.undo_managers.get_mut(&id) {
            m.replaying = false;
            if result.is_ok() {
                m.cursor -= 1;
            }
        }
        result
    }

    /// Re-apply the entry just beyond the cursor. No-op at the tail.
    pub fn redo(&mut self, id: UndoManagerId) -> Result<(), TreeError> {
        let Some((target, patches)) = self.undo_managers.get_mut(&id).and_then(|m| {
            let patches: Vec<Patch> = m.redo_entry()?.inverse_patches.clone();
            m.replaying = true;
            Some((m.target, patches))
        }) else {
            return Ok(());
        };
        let result = patches
            .iter()
            .try_for_each(|patch| self.apply_patch(target, patch));
        if let Some(m) = self.undo_managers.get_mut(&id) {
            m.replaying = false;
            if result.is_ok() {
                m.cursor += 1;
            }
        }
        result
    }

    /// Open a transaction: changes accumulate into a single entry until
    /// [`TreeStore::end_group`]. An empty group records nothing.
    pub fn start_group(&mut self, id: UndoManagerId) {
        let now = crate::node::now_ms();
        if let Some(m) = self.undo_managers.get_mut(&id) {
            m.open_group(now);
        }
    }

    pub fn end_group(&mut self, id: UndoManagerId) {
        if let Some(m) = self.undo_managers.get_mut(&id) {
            m.close_group();
        }
    }

    /// Run `body` with recording suppressed for this manager, regardless of
    /// its current state.
    pub fn without_undo<R>(
        &mut self,
        id: UndoManagerId,
        body: impl FnOnce(&mut TreeStore) -> R,
    ) -> R {
        if let Some(m) = self.undo_managers.get_mut(&id) {
            m.suppressed += 1;
        }
        let result = body(self);
        if let Some(m) = self.undo_managers.get_mut(&id) {
            m.suppressed = m.suppressed.saturating_sub(1);
        }
        result
    }
}
