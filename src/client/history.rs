//! Linear undo/redo stack of immutable element snapshots.
//!
//! Entries are `Arc<[Element]>`: pushing shares the slice, undo and redo
//! hand out cheap clones, and no entry is ever mutated after it is stored.
//! Pushing after an undo discards the redo tail; there are no branches.

use std::sync::Arc;

use crate::element::Element;

/// One committed state of the local element collection.
pub type Snapshot = Arc<[Element]>;

pub const DEFAULT_MAX_DEPTH: usize = 100;

#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Snapshot>,
    index: usize,
    max_depth: usize,
}

impl History {
    /// A stack holding just `initial`. `max_depth` of 0 means unbounded.
    #[must_use]
    pub fn new(initial: Snapshot, max_depth: usize) -> Self {
        Self { entries: vec![initial], index: 0, max_depth }
    }

    /// Append a commit point, discarding any redo tail.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.entries.truncate(self.index + 1);
        self.entries.push(snapshot);
        self.index += 1;

        if self.max_depth > 0 && self.entries.len() > self.max_depth {
            let overflow = self.entries.len() - self.max_depth;
            self.entries.drain(..overflow);
            self.index -= overflow;
        }
    }

    /// Step back one entry. `None` when already at the oldest entry.
    pub fn undo(&mut self) -> Option<Snapshot> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(self.current())
    }

    /// Step forward one entry. `None` when already at the newest entry.
    pub fn redo(&mut self) -> Option<Snapshot> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(self.current())
    }

    /// Replace the whole stack with a single entry.
    pub fn reset(&mut self, snapshot: Snapshot) {
        self.entries.clear();
        self.entries.push(snapshot);
        self.index = 0;
    }

    #[must_use]
    pub fn current(&self) -> Snapshot {
        Arc::clone(&self.entries[self.index])
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(Arc::from(Vec::new()), DEFAULT_MAX_DEPTH)
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
