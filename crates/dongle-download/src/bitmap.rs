//! Per-slot match bitmap.

use dongle_error::{DongleError, Result};
use dongle_flash::{CounterKey, CounterStore};
use dongle_types::LogIndex;
use serde::{Deserialize, Serialize};

/// One bit per physical log slot; set when the record in that slot matched
/// a downloaded risk filter. Bit `i` lives in byte `i / 8`, bit `i % 8`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchBitmap {
    bits: Vec<u8>,
    capacity: u32,
}

impl MatchBitmap {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            bits: vec![0; capacity.div_ceil(8) as usize],
            capacity,
        }
    }

    /// Restore a bitmap persisted with [`Self::to_bytes`].
    pub fn from_bytes(capacity: u32, bytes: &[u8]) -> Result<Self> {
        let expected = capacity.div_ceil(8) as usize;
        if bytes.len() != expected {
            return Err(DongleError::Corrupt {
                detail: format!("match bitmap is {} bytes, expected {expected}", bytes.len()),
            });
        }
        let mut bitmap = Self {
            bits: bytes.to_vec(),
            capacity,
        };
        // Bits past capacity carry no slot.
        let spare = expected as u32 * 8 - capacity;
        if spare > 0 {
            if let Some(last) = bitmap.bits.last_mut() {
                *last &= 0xFF >> spare;
            }
        }
        Ok(bitmap)
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    fn position(&self, slot: LogIndex) -> Option<(usize, u8)> {
        let i = slot.get();
        (i < self.capacity).then(|| ((i / 8) as usize, 1_u8 << (i % 8)))
    }

    /// Mark `slot`. Slots past capacity are ignored.
    pub fn set(&mut self, slot: LogIndex) {
        if let Some((byte, mask)) = self.position(slot) {
            self.bits[byte] |= mask;
        }
    }

    /// Unmark `slot`, returning whether it was marked.
    pub fn clear(&mut self, slot: LogIndex) -> bool {
        match self.position(slot) {
            Some((byte, mask)) if self.bits[byte] & mask != 0 => {
                self.bits[byte] &= !mask;
                true
            }
            _ => false,
        }
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(0);
    }

    #[must_use]
    pub fn is_set(&self, slot: LogIndex) -> bool {
        self.position(slot)
            .is_some_and(|(byte, mask)| self.bits[byte] & mask != 0)
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.bits.iter().any(|&b| b != 0)
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.clone()
    }

    fn word_keys(capacity: u32) -> Result<impl Iterator<Item = CounterKey>> {
        let words = capacity.div_ceil(32);
        let words = u16::try_from(words)
            .map_err(|_| DongleError::out_of_range("match bitmap words", words))?;
        Ok((0..words).map(CounterKey::MatchWord))
    }

    /// Write every bitmap word to the counter store in one batch.
    pub fn save<C: CounterStore>(&self, counters: &mut C) -> Result<()> {
        let mut bytes = self.to_bytes();
        bytes.resize(self.capacity.div_ceil(32) as usize * 4, 0);
        let batch: Vec<(CounterKey, u32)> = Self::word_keys(self.capacity)?
            .zip(bytes.chunks_exact(4))
            .map(|(key, word)| (key, u32::from_le_bytes([word[0], word[1], word[2], word[3]])))
            .collect();
        counters.write_batch(&batch)
    }

    /// Restore a bitmap written by [`Self::save`]. Words never written read
    /// as zero.
    pub fn load<C: CounterStore>(capacity: u32, counters: &C) -> Result<Self> {
        let mut bytes = Vec::with_capacity(capacity.div_ceil(32) as usize * 4);
        for key in Self::word_keys(capacity)? {
            bytes.extend_from_slice(&counters.read(key)?.unwrap_or(0).to_le_bytes());
        }
        bytes.truncate(capacity.div_ceil(8) as usize);
        Self::from_bytes(capacity, &bytes)
    }
}
