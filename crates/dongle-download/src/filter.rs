//! Risk-filter membership.
//!
//! [`FilterLookup`] is the seam the reassembler consumes. The reference
//! encoding, [`PackedCuckooFilter`], is a partial-key cuckoo filter:
//!
//! ```text
//! [table_len: u64 LE][bucket 0][bucket 1]...[bucket n-1]
//! ```
//!
//! Each bucket holds `entries_per_bucket` fingerprints of
//! `fingerprint_bits` bits, packed LSB-first with no padding between
//! buckets. A zero fingerprint marks an empty entry. For a key with hash
//! `h = xxh3(key)` the fingerprint is the high word of `h` (0 remapped to 1),
//! the primary bucket is the low word masked to the table size, and the
//! alternate bucket is `i ^ xxh3(fingerprint)` masked the same way.

use dongle_error::{DongleError, Result};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Bytes in the length header that precedes the bucket table.
pub const FILTER_HEADER_BYTES: usize = 8;

const MAX_KICKS: usize = 500;

/// Membership test over an encoded filter.
pub trait FilterLookup {
    /// Bucket count of a `filter_len`-byte encoding, or 0 when no valid
    /// encoding has that length.
    fn num_buckets(&self, filter_len: usize) -> u32;

    /// Whether `key` may be in the set encoded by `filter`.
    fn lookup(&self, key: &[u8], filter: &[u8], num_buckets: u32) -> bool;
}

/// Bit-packed cuckoo filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedCuckooFilter {
    pub fingerprint_bits: u32,
    pub entries_per_bucket: u32,
}

impl Default for PackedCuckooFilter {
    fn default() -> Self {
        Self::DEVICE
    }
}

impl PackedCuckooFilter {
    /// Parameters broadcast by the risk server: 27-bit fingerprints,
    /// 4 entries per bucket.
    pub const DEVICE: Self = Self {
        fingerprint_bits: 27,
        entries_per_bucket: 4,
    };

    /// Bucket count the risk server uses with [`Self::DEVICE`].
    pub const DEVICE_BUCKETS: u32 = 128;

    const fn is_valid(&self) -> bool {
        self.fingerprint_bits > 0 && self.fingerprint_bits <= 32 && self.entries_per_bucket > 0
    }

    const fn bucket_bits(&self) -> u64 {
        self.fingerprint_bits as u64 * self.entries_per_bucket as u64
    }

    /// Encoded size of a filter with `num_buckets` buckets.
    #[must_use]
    pub fn encoded_len(&self, num_buckets: u32) -> usize {
        let table_bits = u64::from(num_buckets) * self.bucket_bits();
        FILTER_HEADER_BYTES + table_bits.div_ceil(8) as usize
    }

    const fn fingerprint_mask(&self) -> u32 {
        if self.fingerprint_bits >= 32 {
            u32::MAX
        } else {
            (1_u32 << self.fingerprint_bits) - 1
        }
    }

    /// Fingerprint and primary bucket of `key`.
    fn locate(&self, key: &[u8], num_buckets: u32) -> (u32, u32) {
        let h = xxh3_64(key);
        let fp = match ((h >> 32) as u32) & self.fingerprint_mask() {
            0 => 1,
            fp => fp,
        };
        (fp, (h as u32) & (num_buckets - 1))
    }

    fn alt_bucket(bucket: u32, fp: u32, num_buckets: u32) -> u32 {
        (bucket ^ xxh3_64(&fp.to_le_bytes()) as u32) & (num_buckets - 1)
    }

    fn entry_bit(&self, bucket: u32, slot: u32) -> u64 {
        (u64::from(bucket) * u64::from(self.entries_per_bucket) + u64::from(slot))
            * u64::from(self.fingerprint_bits)
    }
}

impl FilterLookup for PackedCuckooFilter {
    fn num_buckets(&self, filter_len: usize) -> u32 {
        if !self.is_valid() || filter_len <= FILTER_HEADER_BYTES {
            return 0;
        }
        let table_bits = (filter_len - FILTER_HEADER_BYTES) as u64 * 8;
        let Ok(buckets) = u32::try_from(table_bits / self.bucket_bits()) else {
            return 0;
        };
        if !buckets.is_power_of_two() || self.encoded_len(buckets) != filter_len {
            return 0;
        }
        buckets
    }

    fn lookup(&self, key: &[u8], filter: &[u8], num_buckets: u32) -> bool {
        if !self.is_valid() || !num_buckets.is_power_of_two() {
            return false;
        }
        let Some(table) = filter.get(FILTER_HEADER_BYTES..) else {
            return false;
        };
        let (fp, i1) = self.locate(key, num_buckets);
        let i2 = Self::alt_bucket(i1, fp, num_buckets);
        [i1, i2].into_iter().any(|bucket| {
            (0..self.entries_per_bucket).any(|slot| {
                read_bits(table, self.entry_bit(bucket, slot), self.fingerprint_bits) == Some(fp)
            })
        })
    }
}

fn read_bits(table: &[u8], bit_off: u64, width: u32) -> Option<u32> {
    let mut value = 0_u32;
    for i in 0..width {
        let bit = bit_off + u64::from(i);
        let byte = *table.get(usize::try_from(bit / 8).ok()?)?;
        if (byte >> (bit % 8)) & 1 == 1 {
            value |= 1 << i;
        }
    }
    Some(value)
}

fn write_bits(table: &mut [u8], bit_off: u64, width: u32, value: u32) {
    for i in 0..width {
        let bit = bit_off + u64::from(i);
        let Some(byte) = usize::try_from(bit / 8).ok().and_then(|b| table.get_mut(b)) else {
            return;
        };
        let mask = 1_u8 << (bit % 8);
        if (value >> i) & 1 == 1 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

/// Builds [`PackedCuckooFilter`] encodings, for tests and the simulator.
#[derive(Debug, Clone)]
pub struct CuckooFilterBuilder {
    params: PackedCuckooFilter,
    num_buckets: u32,
    table: Vec<u32>,
    len: usize,
}

impl CuckooFilterBuilder {
    pub fn new(params: PackedCuckooFilter, num_buckets: u32) -> Result<Self> {
        if !params.is_valid() || !num_buckets.is_power_of_two() {
            return Err(DongleError::invalid_config(format!(
                "cuckoo filter {params:?} with {num_buckets} buckets"
            )));
        }
        let entries = num_buckets as usize * params.entries_per_bucket as usize;
        Ok(Self {
            params,
            num_buckets,
            table: vec![0; entries],
            len: 0,
        })
    }

    /// Builder with the device parameters.
    pub fn device() -> Result<Self> {
        Self::new(PackedCuckooFilter::DEVICE, PackedCuckooFilter::DEVICE_BUCKETS)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_mut(&mut self, bucket: u32) -> &mut [u32] {
        let per = self.params.entries_per_bucket as usize;
        let start = bucket as usize * per;
        &mut self.table[start..start + per]
    }

    fn try_place(&mut self, bucket: u32, fp: u32) -> bool {
        match self.bucket_mut(bucket).iter_mut().find(|entry| **entry == 0) {
            Some(entry) => {
                *entry = fp;
                true
            }
            None => false,
        }
    }

    /// Insert `key`. Fails without modifying the filter when no placement
    /// is found within the kick limit.
    pub fn insert(&mut self, key: &[u8]) -> Result<()> {
        let (fp, i1) = self.params.locate(key, self.num_buckets);
        let i2 = PackedCuckooFilter::alt_bucket(i1, fp, self.num_buckets);
        if self.try_place(i1, fp) || self.try_place(i2, fp) {
            self.len += 1;
            return Ok(());
        }

        let saved = self.table.clone();
        let per = self.params.entries_per_bucket as usize;
        let mut bucket = i2;
        let mut carried = fp;
        for kick in 0..MAX_KICKS {
            let slot = kick % per;
            std::mem::swap(&mut self.bucket_mut(bucket)[slot], &mut carried);
            bucket = PackedCuckooFilter::alt_bucket(bucket, carried, self.num_buckets);
            if self.try_place(bucket, carried) {
                self.len += 1;
                return Ok(());
            }
        }
        self.table = saved;
        Err(DongleError::Download {
            detail: format!("cuckoo filter full after {} entries", self.len),
        })
    }

    /// Whether `key` is present in the table being built.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let (fp, i1) = self.params.locate(key, self.num_buckets);
        let i2 = PackedCuckooFilter::alt_bucket(i1, fp, self.num_buckets);
        let per = self.params.entries_per_bucket as usize;
        [i1, i2].into_iter().any(|bucket| {
            let start = bucket as usize * per;
            self.table[start..start + per].contains(&fp)
        })
    }

    /// Encode the filter in the broadcast layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let total = self.params.encoded_len(self.num_buckets);
        let mut out = vec![0_u8; total];
        let table_len = (total - FILTER_HEADER_BYTES) as u64;
        out[..FILTER_HEADER_BYTES].copy_from_slice(&table_len.to_le_bytes());
        let table = &mut out[FILTER_HEADER_BYTES..];
        for (i, &fp) in self.table.iter().enumerate() {
            let bit = i as u64 * u64::from(self.params.fingerprint_bits);
            write_bits(table, bit, self.params.fingerprint_bits, fp);
        }
        out
    }
}
