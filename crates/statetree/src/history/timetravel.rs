//! Snapshot-based time travel.
//!
//! An ordered, bounded list of full root snapshots plus a cursor. Recording
//! is O(tree size) per step, which buys robustness to any mutation shape:
//! stepping to an index just re-applies the stored snapshot. A re-entrancy
//! guard keeps auto-recording from observing its own application.

use serde_json::Value;

use crate::error::TreeError;
use crate::node::NodeId;
use crate::snapshot::snapshot_of;
use crate::store::TreeStore;

/// Opaque handle to a time-travel manager registered on a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeTravelId(pub(crate) u64);

#[derive(Debug, Clone)]
pub struct TimeTravelOptions {
    /// Maximum retained snapshots; the oldest is trimmed when exceeded.
    pub limit: Option<usize>,
    /// Record automatically on every root snapshot recomputation.
    pub auto_record: bool,
}

impl Default for TimeTravelOptions {
    fn default() -> Self {
        Self {
            limit: None,
            auto_record: true,
        }
    }
}

pub(crate) struct TimeTravelManager {
    pub target: NodeId,
    snapshots: Vec<Value>,
    /// Index of the current snapshot; -1 before anything is recorded.
    cursor: isize,
    pub applying: bool,
    pub auto_record: bool,
    limit: Option<usize>,
}

impl TimeTravelManager {
    fn new(target: NodeId, options: TimeTravelOptions) -> Self {
        Self {
            target,
            snapshots: Vec::new(),
            cursor: -1,
            applying: false,
            auto_record: options.auto_record,
            limit: options.limit,
        }
    }

    /// Append a snapshot at the cursor, discarding anything ahead of it and
    /// trimming from the front when over capacity.
    pub fn push_snapshot(&mut self, snapshot: Value) {
        if self.applying {
            return;
        }
        self.snapshots.truncate((self.cursor + 1) as usize);
        self.snapshots.push(snapshot);
        self.cursor += 1;
        if let Some(limit) = self.limit {
            while self.snapshots.len() > limit.max(1) {
                self.snapshots.remove(0);
                self.cursor -= 1;
            }
        }
    }

    fn get(&self, index: usize) -> Option<&Value> {
        self.snapshots.get(index)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }
}

impl TreeStore {
    /// Attach a snapshot-based time-travel manager to the tree rooted at
    /// `target`. The current state is recorded as the first entry.
    pub fn create_time_travel_manager(
        &mut self,
        target: NodeId,
        options: TimeTravelOptions,
    ) -> Result<TimeTravelId, TreeError> {
        self.ensure_alive(target)?;
        let id = TimeTravelId(self.next_time_travel);
        self.next_time_travel += 1;
        let mut manager = TimeTravelManager::new(target, options);
        manager.push_snapshot(snapshot_of(self, target));
        self.time_travelers.insert(id, manager);
        Ok(id)
    }

    /// Detach and discard a time-travel manager. Unknown handles are
    /// ignored.
    pub fn drop_time_travel_manager(&mut self, id: TimeTravelId) {
        self.time_travelers.remove(&id);
    }

    /// Record the target's current snapshot at the cursor.
    pub fn record(&mut self, id: TimeTravelId) -> Result<(), TreeError> {
        let Some(target) = self.time_travelers.get(&id).map(|t| t.target) else {
            return Ok(());
        };
        self.ensure_alive(target)?;
        let snapshot = snapshot_of(self, target);
        if let Some(traveler) = self.time_travelers.get_mut(&id) {
            traveler.push_snapshot(snapshot);
        }
        Ok(())
    }

    /// Step to the snapshot recorded at `index`.
    pub fn go_to(&mut self, id: TimeTravelId, index: usize) -> Result<(), TreeError> {
        let Some((target, snapshot)) = self.time_travelers.get_mut(&id).and_then(|t| {
            let snapshot = t.get(index)?.clone();
            t.applying = true;
            Some((t.target, snapshot))
        }) else {
            return Err(TreeError::InvalidPath(format!(
                "no recorded state at index {index}"
            )));
        };
        let result = self.apply_snapshot(target, snapshot);
        if let Some(traveler) = self.time_travelers.get_mut(&id) {
            traveler.applying = false;
            if result.is_ok() {
                traveler.cursor = index as isize;
            }
        }
        result
    }

    pub fn time_travel_len(&self, id: TimeTravelId) -> usize {
        self.time_travelers.get(&id).map(|t| t.len()).unwrap_or(0)
    }

    pub fn time_travel_cursor(&self, id: TimeTravelId) -> Option<usize> {
        self.time_travelers
            .get(&id)
            .and_then(|t| usize::try_from(t.cursor()).ok())
    }

    pub fn can_step_back(&self, id: TimeTravelId) -> bool {
        self.time_travelers
            .get(&id)
            .map(|t| t.cursor() > 0)
            .unwrap_or(false)
    }

    pub fn can_step_forward(&self, id: TimeTravelId) -> bool {
        self.time_travelers
            .get(&id)
            .map(|t| t.cursor() + 1 < t.len() as isize)
            .unwrap_or(false)
    }
}
