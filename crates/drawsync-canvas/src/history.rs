//! Bounded undo/redo history over canvas states.

use std::collections::VecDeque;

/// Ordered canvas snapshots plus a cursor pointing at the current one.
///
/// The buffer is never empty, so the cursor is always a valid index. A new
/// edit after an undo discards everything past the cursor before appending.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: VecDeque<T>,
    cursor: usize,
    capacity: usize,
}

impl<T> History<T> {
    /// Start a history at `initial`. Capacity is clamped to at least one entry.
    pub fn new(initial: T, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = VecDeque::with_capacity(capacity.min(64));
        entries.push_back(initial);
        Self {
            entries,
            cursor: 0,
            capacity,
        }
    }

    /// Record a new state as the latest entry.
    pub fn push(&mut self, state: T) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(state);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Overwrite the current entry instead of growing the stack. Used while
    /// a gesture is still in progress; redo entries are discarded as with
    /// [`push`](Self::push).
    pub fn replace_current(&mut self, state: T) {
        self.entries.truncate(self.cursor + 1);
        self.entries[self.cursor] = state;
    }

    /// `push` or `replace_current` depending on `overwrite`.
    pub fn record(&mut self, state: T, overwrite: bool) {
        if overwrite {
            self.replace_current(state);
        } else {
            self.push(state);
        }
    }

    /// Step back one entry. Returns `false` at the oldest entry.
    pub fn undo(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    /// Step forward one entry. Returns `false` at the newest entry.
    pub fn redo(&mut self) -> bool {
        if self.cursor + 1 >= self.entries.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn current(&self) -> &T {
        &self.entries[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: a history holds at least its initial state.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}
