//! History Buffer
//!
//! A bounded FIFO of captured [`LadderSnapshot`]s plus the replay cursor.
//!
//! Capture timestamps are strictly increasing: a capture whose wall-clock
//! time does not exceed the newest entry's is advanced to `newest + 1`.

use std::collections::VecDeque;

use crate::domain::book::{LadderSnapshot, Millis};

/// Default number of snapshots kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Bounded sequence of ladder captures with a replay cursor.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<LadderSnapshot>,
    capacity: usize,
    cursor: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
            cursor: 0,
        }
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of captures held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current cursor position.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Index of the newest entry (0 when empty).
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    /// Append a capture, evicting the oldest entry when full.
    ///
    /// Returns the timestamp actually recorded and whether an entry was
    /// evicted. The cursor is not moved to the new entry; when an eviction
    /// happens it shifts back by one so it keeps addressing the same capture.
    pub fn push(&mut self, mut snapshot: LadderSnapshot) -> (Millis, bool) {
        if let Some(newest) = self.entries.back() {
            snapshot.timestamp = snapshot.timestamp.max(newest.timestamp + 1);
        }
        let recorded = snapshot.timestamp;

        let evicted = self.entries.len() >= self.capacity;
        if evicted {
            self.entries.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
        }
        self.entries.push_back(snapshot);
        (recorded, evicted)
    }

    /// Move the cursor, clamped to `[0, len - 1]`. Returns the new position.
    pub fn seek(&mut self, index: usize) -> usize {
        self.cursor = index.min(self.last_index());
        self.cursor
    }

    /// Move the cursor to the newest entry.
    pub fn seek_latest(&mut self) -> usize {
        self.cursor = self.last_index();
        self.cursor
    }

    /// The capture under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&LadderSnapshot> {
        self.entries.get(self.cursor)
    }

    /// Capture at an index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LadderSnapshot> {
        self.entries.get(index)
    }

    /// Newest capture.
    #[must_use]
    pub fn latest(&self) -> Option<&LadderSnapshot> {
        self.entries.back()
    }

    /// Truncate the capture under the cursor to `depth` levels per side.
    ///
    /// Only that one entry is modified.
    pub fn truncate_current(&mut self, depth: usize) {
        if let Some(snapshot) = self.entries.get_mut(self.cursor) {
            snapshot.truncate(depth);
        }
    }

    /// Drop every capture and reset the cursor.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Iterate captures oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LadderSnapshot> {
        self.entries.iter()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::PriceLevel;
    use rust_decimal::Decimal;

    fn capture(timestamp: Millis, levels: i64) -> LadderSnapshot {
        let level = |p: i64| PriceLevel::new(Decimal::from(p), Decimal::ONE);
        LadderSnapshot {
            timestamp,
            bids: (0..levels).map(|p| level(100 - p)).collect(),
            asks: (0..levels).map(|p| level(101 + p)).collect(),
        }
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut history = HistoryBuffer::new(3);
        for ts in 0..10 {
            history.push(capture(ts * 1000, 1));
        }
        assert_eq!(history.len(), 3);
        let kept: Vec<_> = history.iter().map(|s| s.timestamp).collect();
        assert_eq!(kept, vec![7000, 8000, 9000]);
    }

    #[test]
    fn push_reports_eviction() {
        let mut history = HistoryBuffer::new(1);
        assert_eq!(history.push(capture(1, 1)), (1, false));
        assert_eq!(history.push(capture(5, 1)), (5, true));
    }

    #[test]
    fn timestamps_strictly_increase_under_rapid_capture() {
        let mut history = HistoryBuffer::new(10);
        history.push(capture(1000, 1));
        history.push(capture(1000, 1));
        history.push(capture(999, 1));
        history.push(capture(2000, 1));

        let stamps: Vec<_> = history.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1000, 1001, 1002, 2000]);
    }

    #[test]
    fn seek_clamps_to_last_entry() {
        let mut history = HistoryBuffer::new(10);
        for ts in 0..4 {
            history.push(capture(ts, 1));
        }
        assert_eq!(history.seek(99), 3);
        assert_eq!(history.current().map(|s| s.timestamp), Some(3));
        assert_eq!(history.seek(1), 1);
    }

    #[test]
    fn seek_on_empty_buffer_stays_at_zero() {
        let mut history = HistoryBuffer::new(10);
        assert_eq!(history.seek(5), 0);
        assert!(history.current().is_none());
    }

    #[test]
    fn eviction_keeps_cursor_on_same_capture() {
        let mut history = HistoryBuffer::new(3);
        for ts in 0..3 {
            history.push(capture(ts, 1));
        }
        history.seek(1);
        history.push(capture(10, 1));

        assert_eq!(history.cursor(), 0);
        assert_eq!(history.current().map(|s| s.timestamp), Some(1));

        history.push(capture(11, 1));
        assert_eq!(history.cursor(), 0, "saturates at the oldest entry");
    }

    #[test]
    fn truncate_current_touches_only_cursor_entry() {
        let mut history = HistoryBuffer::new(10);
        history.push(capture(1, 5));
        history.push(capture(2, 5));
        history.seek(0);
        history.truncate_current(2);

        assert_eq!(history.get(0).map(|s| s.bids.len()), Some(2));
        assert_eq!(history.get(1).map(|s| s.bids.len()), Some(5));
    }

    #[test]
    fn clear_resets_cursor() {
        let mut history = HistoryBuffer::new(10);
        history.push(capture(1, 1));
        history.push(capture(2, 1));
        history.seek_latest();
        history.clear();

        assert!(history.is_empty());
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut history = HistoryBuffer::new(0);
        history.push(capture(1, 1));
        history.push(capture(2, 1));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.latest().map(|s| s.timestamp), Some(2));
    }
}
