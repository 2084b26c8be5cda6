//! Head/tail cursor of the encounter ring.
//!
//! The cursor carries an explicit record count next to the two indices, so
//! every slot is usable: `head == tail` means empty when `len == 0` and full
//! when `len == capacity`.

use std::num::NonZeroU32;

use dongle_types::LogIndex;
use serde::{Deserialize, Serialize};

/// Ring cursor. Invariant: `len <= capacity` and
/// `tail.distance_to(head) == len % capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogCursor {
    head: LogIndex,
    tail: LogIndex,
    len: u32,
}

impl LogCursor {
    /// Empty cursor at slot 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: LogIndex::ZERO,
            tail: LogIndex::ZERO,
            len: 0,
        }
    }

    /// Rebuild a cursor from persisted raw values, rejecting any
    /// combination that violates the ring invariant.
    #[must_use]
    pub fn restore(head: u32, tail: u32, len: u32, capacity: NonZeroU32) -> Option<Self> {
        let head = LogIndex::new(head, capacity).ok()?;
        let tail = LogIndex::new(tail, capacity).ok()?;
        if len > capacity.get() || tail.distance_to(head, capacity) != len % capacity.get() {
            return None;
        }
        Some(Self { head, tail, len })
    }

    /// Slot the next append writes.
    #[must_use]
    pub const fn head(&self) -> LogIndex {
        self.head
    }

    /// Slot of the oldest live record.
    #[must_use]
    pub const fn tail(&self) -> LogIndex {
        self.tail
    }

    #[must_use]
    pub const fn count(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn is_full(&self, capacity: NonZeroU32) -> bool {
        self.len >= capacity.get()
    }

    /// Physical slot of the record at logical position `i` (0 = oldest).
    #[must_use]
    pub fn physical(&self, i: u32, capacity: NonZeroU32) -> Option<LogIndex> {
        (i < self.len).then(|| self.tail.advance(i, capacity))
    }

    /// Drop the oldest record. Returns `false` when already empty.
    pub fn pop_tail(&mut self, capacity: NonZeroU32) -> bool {
        if self.len == 0 {
            return false;
        }
        self.tail = self.tail.next(capacity);
        self.len -= 1;
        true
    }

    /// Commit the record written at `head`, discarding the oldest record
    /// first when the ring is full. Returns `true` if a record was discarded.
    pub fn push_head(&mut self, capacity: NonZeroU32) -> bool {
        let forced = self.is_full(capacity) && self.pop_tail(capacity);
        self.head = self.head.next(capacity);
        self.len += 1;
        forced
    }
}
