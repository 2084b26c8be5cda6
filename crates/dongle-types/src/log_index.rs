//! Typed addressing for the encounter ring log.
//!
//! [`LogIndex`] is a physical slot number that is always reduced modulo the
//! ring capacity; all arithmetic is done in `u64` and reduced, so no
//! intermediate can wrap. [`RecordSlot`] turns an index into a flash address
//! with checked multiplication.

use std::num::NonZeroU32;

use dongle_error::{DongleError, Result};
use serde::{Deserialize, Serialize};

/// Physical slot index inside a ring of `capacity` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LogIndex(u32);

impl LogIndex {
    pub const ZERO: Self = Self(0);

    /// Validate a raw index against the ring capacity.
    pub fn new(raw: u32, capacity: NonZeroU32) -> Result<Self> {
        if raw >= capacity.get() {
            return Err(DongleError::out_of_range(
                "log index",
                format!("{raw} (capacity {capacity})"),
            ));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Advance by `n` slots, wrapping at `capacity`.
    #[must_use]
    pub fn advance(self, n: u32, capacity: NonZeroU32) -> Self {
        let sum = u64::from(self.0) + u64::from(n);
        Self((sum % u64::from(capacity.get())) as u32)
    }

    /// Next slot, wrapping at `capacity`.
    #[must_use]
    pub fn next(self, capacity: NonZeroU32) -> Self {
        self.advance(1, capacity)
    }

    /// Number of slots from `self` forward to `other`, modulo `capacity`.
    #[must_use]
    pub fn distance_to(self, other: Self, capacity: NonZeroU32) -> u32 {
        let cap = u64::from(capacity.get());
        ((u64::from(other.0) + cap - u64::from(self.0) % cap) % cap) as u32
    }
}

impl std::fmt::Display for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A physical slot resolved to its flash address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSlot {
    pub index: LogIndex,
    /// Absolute flash address of the first byte of the slot.
    pub addr: u32,
    /// Bytes reserved for the slot (record size rounded up to the write
    /// block).
    pub stride: u32,
}

impl RecordSlot {
    /// Resolve `index` within a log starting at `base` with `stride`-byte
    /// slots.
    pub fn locate(base: u32, stride: u32, index: LogIndex) -> Result<Self> {
        let addr = index
            .get()
            .checked_mul(stride)
            .and_then(|offset| offset.checked_add(base))
            .ok_or_else(|| {
                DongleError::out_of_range("record slot address", format!("{base:#x} + {index} * {stride}"))
            })?;
        Ok(Self {
            index,
            addr,
            stride,
        })
    }

    /// One past the last byte of the slot.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.addr.saturating_add(self.stride)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn cap(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).expect("non-zero")
    }

    #[test]
    fn test_new_rejects_index_at_capacity() {
        assert!(LogIndex::new(6, cap(7)).is_ok());
        let err = LogIndex::new(7, cap(7)).expect_err("7 is past the end");
        assert!(matches!(err, DongleError::OutOfRange { .. }));
    }

    #[test]
    fn test_next_wraps() {
        let last = LogIndex::new(6, cap(7)).expect("index");
        assert_eq!(last.next(cap(7)), LogIndex::ZERO);
    }

    #[test]
    fn test_distance_wraps() {
        let tail = LogIndex::new(5, cap(7)).expect("index");
        let head = LogIndex::new(2, cap(7)).expect("index");
        assert_eq!(tail.distance_to(head, cap(7)), 4);
        assert_eq!(head.distance_to(tail, cap(7)), 3);
        assert_eq!(head.distance_to(head, cap(7)), 0);
    }

    #[test]
    fn test_locate_checks_overflow() {
        let idx = LogIndex::new(3, cap(7)).expect("index");
        let slot = RecordSlot::locate(0x2e100, 48, idx).expect("slot");
        assert_eq!(slot.addr, 0x2e100 + 3 * 48);
        assert_eq!(slot.end(), slot.addr + 48);

        let far = LogIndex::new(u32::MAX - 1, cap(u32::MAX)).expect("index");
        assert!(RecordSlot::locate(0, 4096, far).is_err(), "case=overflow");
    }

    proptest! {
        #[test]
        fn prop_advance_stays_in_range(start in 0_u32..1000, n in any::<u32>(), capacity in 1_u32..1000) {
            let capacity = cap(capacity);
            let idx = LogIndex(start % capacity.get());
            let moved = idx.advance(n, capacity);
            prop_assert!(moved.get() < capacity.get());
            prop_assert_eq!(idx.distance_to(moved, capacity), n % capacity.get());
        }
    }
}
