//! Undo/redo history
//!
//! A flat list of snapshots plus a cursor. Taking a snapshot after an undo
//! truncates the redo tail.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Default number of snapshots kept
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Editor state at one point in time
///
/// Vectors follow the editor's control registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub program_name: String,
    pub slider_values: Vec<i32>,
    /// Offsets from each box's minimum
    pub box_values: Vec<i32>,
    pub button_values: Vec<bool>,
}

/// Suppresses snapshot creation while any hold is alive
#[derive(Debug, Clone, Default)]
pub struct SnapshotGate {
    holds: Arc<AtomicUsize>,
}

impl SnapshotGate {
    pub fn hold(&self) -> SnapshotHold {
        self.holds.fetch_add(1, Ordering::AcqRel);
        SnapshotHold {
            holds: self.holds.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.holds.load(Ordering::Acquire) > 0
    }
}

/// Releases its hold on drop
#[must_use = "the gate is released as soon as the hold is dropped"]
#[derive(Debug)]
pub struct SnapshotHold {
    holds: Arc<AtomicUsize>,
}

impl Drop for SnapshotHold {
    fn drop(&mut self) {
        self.holds.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct History {
    entries: Vec<Snapshot>,
    cursor: Option<usize>,
    limit: usize,
    gate: SnapshotGate,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            limit: limit.max(1),
            gate: SnapshotGate::default(),
        }
    }

    pub fn gate(&self) -> &SnapshotGate {
        &self.gate
    }

    /// Record a snapshot; returns false while the gate is held
    pub fn snapshot(&mut self, snapshot: Snapshot) -> bool {
        if self.gate.is_held() {
            trace!("Snapshot suppressed");
            return false;
        }

        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
        self.entries.push(snapshot);

        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.cursor = Some(self.entries.len() - 1);
        debug!("Snapshot {} of {}", self.entries.len(), self.limit);
        true
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(c) if c + 1 < self.entries.len())
    }

    /// Step back; returns the snapshot to restore
    pub fn undo(&mut self) -> Option<&Snapshot> {
        let cursor = self.cursor.filter(|&c| c > 0)? - 1;
        self.cursor = Some(cursor);
        self.entries.get(cursor)
    }

    /// Step forward; returns the snapshot to restore
    pub fn redo(&mut self) -> Option<&Snapshot> {
        let cursor = self.cursor? + 1;
        if cursor >= self.entries.len() {
            return None;
        }
        self.cursor = Some(cursor);
        self.entries.get(cursor)
    }

    /// Snapshot under the cursor
    pub fn current(&self) -> Option<&Snapshot> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(n: i32) -> Snapshot {
        Snapshot {
            program_name: format!("p{}", n),
            slider_values: vec![n],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_history() {
        let mut history = History::default();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert!(history.current().is_none());
    }

    #[test]
    fn test_undo_redo() {
        let mut history = History::default();
        for n in 0..3 {
            history.snapshot(snap(n));
        }
        assert_eq!(history.undo(), Some(&snap(1)));
        assert_eq!(history.undo(), Some(&snap(0)));
        assert!(history.undo().is_none());
        assert!(history.can_redo());
        assert_eq!(history.redo(), Some(&snap(1)));
    }

    #[test]
    fn test_snapshot_after_undo_truncates_redo() {
        let mut history = History::default();
        for n in 0..3 {
            history.snapshot(snap(n));
        }
        history.undo();
        history.undo();
        history.snapshot(snap(9));

        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
        assert_eq!(history.current(), Some(&snap(9)));
        assert_eq!(history.undo(), Some(&snap(0)));
    }

    #[test]
    fn test_gate_suppresses_snapshots() {
        let mut history = History::default();
        let gate = history.gate().clone();
        {
            let _outer = gate.hold();
            let inner = gate.hold();
            assert!(!history.snapshot(snap(0)));
            drop(inner);
            assert!(!history.snapshot(snap(1)));
        }
        assert!(history.snapshot(snap(2)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = History::new(3);
        for n in 0..5 {
            history.snapshot(snap(n));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.current(), Some(&snap(4)));
        history.undo();
        assert_eq!(history.undo(), Some(&snap(2)));
        assert!(!history.can_undo());
    }
}
