//! Encounter records and their on-flash encodings.
//!
//! Two fixed-width layouts exist, both little-endian with no padding:
//!
//! `Full` (45 bytes):
//! - `location_id: u64`
//! - `beacon_id: u32`
//! - `beacon_time_start: u32`
//! - `beacon_time_duration: u32`
//! - `dongle_time_start: u32`
//! - `dongle_time_duration: u32`
//! - `rssi: i8`
//! - `eph_id[16]`
//!
//! `Compact` (36 bytes), the legacy firmware image:
//! - `location_id: u64`
//! - `beacon_id: u32`
//! - `beacon_time_start: u32`
//! - `dongle_time_start: u32`
//! - `eph_id[16]`

use std::fmt;

use dongle_error::{DongleError, Result};
use serde::{Deserialize, Serialize};

use crate::{
    BEACON_EPH_ID_HASH_LEN, BEACON_EPH_ID_SIZE, BEACON_SERVICE_ID_MASK, BROADCAST_SERVICE_ID,
    BeaconTimer, DongleTimer, LocationId,
};

/// Ephemeral id container. Only the first [`BEACON_EPH_ID_HASH_LEN`] bytes are
/// significant; the remainder is padding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EphId([u8; BEACON_EPH_ID_SIZE]);

impl EphId {
    /// Wrap a full container.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; BEACON_EPH_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from the hash bytes, zero-filling the padding.
    #[must_use]
    pub fn from_hash(hash: &[u8; BEACON_EPH_ID_HASH_LEN]) -> Self {
        let mut bytes = [0_u8; BEACON_EPH_ID_SIZE];
        bytes[..BEACON_EPH_ID_HASH_LEN].copy_from_slice(hash);
        Self(bytes)
    }

    /// The significant hash bytes.
    #[must_use]
    pub fn hash(&self) -> &[u8] {
        &self.0[..BEACON_EPH_ID_HASH_LEN]
    }

    /// The whole container, padding included.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BEACON_EPH_ID_SIZE] {
        &self.0
    }

    /// Compare over the hash length only; padding never participates.
    #[must_use]
    pub fn same_id(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl fmt::Debug for EphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EphId(")?;
        for byte in self.hash() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Beacon identifier; the upper 16 bits carry the broadcast service tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BeaconId(pub u32);

impl BeaconId {
    /// Build a PanCast beacon id from its serial number.
    #[must_use]
    pub const fn pancast(serial: u16) -> Self {
        Self((BROADCAST_SERVICE_ID << 16) | serial as u32)
    }

    /// Embedded service tag.
    #[must_use]
    pub const fn service_id(self) -> u32 {
        (self.0 & BEACON_SERVICE_ID_MASK) >> 16
    }

    /// Whether the tag matches the expected broadcast service.
    #[must_use]
    pub const fn is_pancast(self) -> bool {
        self.service_id() == BROADCAST_SERVICE_ID
    }
}

/// One logged encounter. Immutable once appended to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncounterRecord {
    pub location_id: LocationId,
    pub beacon_id: BeaconId,
    pub beacon_time_start: BeaconTimer,
    /// Beacon clock units covered, counting the first sighting as one.
    pub beacon_time_duration: u32,
    pub dongle_time_start: DongleTimer,
    pub dongle_time_duration: u32,
    pub rssi: i8,
    pub eph_id: EphId,
}

impl EncounterRecord {
    /// Dongle time of the last observation folded into this record.
    ///
    /// Computed in `u64` so a record near the end of the clock range cannot
    /// wrap.
    #[must_use]
    pub fn dongle_time_end(&self) -> u64 {
        u64::from(self.dongle_time_start) + u64::from(self.dongle_time_duration)
    }
}

/// Fixed-width on-flash layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// Every field persisted.
    #[default]
    Full,
    /// Identity and start times only; durations and rssi read back as zero.
    Compact,
}

/// Byte width of [`RecordFormat::Full`].
pub const FULL_RECORD_BYTES: usize = 8 + 4 + 4 + 4 + 4 + 4 + 1 + BEACON_EPH_ID_SIZE;
/// Byte width of [`RecordFormat::Compact`].
pub const COMPACT_RECORD_BYTES: usize = 8 + 4 + 4 + 4 + BEACON_EPH_ID_SIZE;

impl RecordFormat {
    /// Serialized width of one record.
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Full => FULL_RECORD_BYTES,
            Self::Compact => COMPACT_RECORD_BYTES,
        }
    }

    /// Encode a record into its exact on-flash representation.
    #[must_use]
    pub fn encode(self, record: &EncounterRecord) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&record.location_id.to_le_bytes());
        out.extend_from_slice(&record.beacon_id.0.to_le_bytes());
        out.extend_from_slice(&record.beacon_time_start.to_le_bytes());
        match self {
            Self::Full => {
                out.extend_from_slice(&record.beacon_time_duration.to_le_bytes());
                out.extend_from_slice(&record.dongle_time_start.to_le_bytes());
                out.extend_from_slice(&record.dongle_time_duration.to_le_bytes());
                out.extend_from_slice(&record.rssi.to_le_bytes());
            }
            Self::Compact => {
                out.extend_from_slice(&record.dongle_time_start.to_le_bytes());
            }
        }
        out.extend_from_slice(record.eph_id.as_bytes());
        debug_assert_eq!(out.len(), self.encoded_len());
        out
    }

    /// Decode a record from bytes produced by [`RecordFormat::encode`].
    pub fn decode(self, bytes: &[u8]) -> Result<EncounterRecord> {
        let expected = self.encoded_len();
        if bytes.len() < expected {
            return Err(DongleError::Corrupt {
                detail: format!(
                    "encounter record too short: expected {expected}, got {}",
                    bytes.len()
                ),
            });
        }

        let mut reader = FieldReader::new(bytes);
        let location_id = reader.u64();
        let beacon_id = BeaconId(reader.u32());
        let beacon_time_start = reader.u32();
        let mut record = EncounterRecord {
            location_id,
            beacon_id,
            beacon_time_start,
            ..EncounterRecord::default()
        };
        match self {
            Self::Full => {
                record.beacon_time_duration = reader.u32();
                record.dongle_time_start = reader.u32();
                record.dongle_time_duration = reader.u32();
                record.rssi = reader.i8();
            }
            Self::Compact => {
                record.dongle_time_start = reader.u32();
            }
        }
        record.eph_id = EphId::from_bytes(reader.array());
        Ok(record)
    }
}

/// Sequential little-endian field reader over a slice already checked for
/// length.
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0_u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn i8(&mut self) -> i8 {
        i8::from_le_bytes(self.array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> EncounterRecord {
        let mut hash = [0_u8; BEACON_EPH_ID_HASH_LEN];
        for (idx, byte) in hash.iter_mut().enumerate() {
            *byte = 0xA0 + idx as u8;
        }
        EncounterRecord {
            location_id: 0x0102_0304_0506_0708,
            beacon_id: BeaconId::pancast(7),
            beacon_time_start: 1_000,
            beacon_time_duration: 3,
            dongle_time_start: 2_000,
            dongle_time_duration: 2,
            rssi: -67,
            eph_id: EphId::from_hash(&hash),
        }
    }

    #[test]
    fn test_record_widths() {
        assert_eq!(RecordFormat::Full.encoded_len(), 45);
        assert_eq!(RecordFormat::Compact.encoded_len(), 36);
    }

    #[test]
    fn test_compact_layout_is_bit_exact() {
        let record = sample_record();
        let bytes = RecordFormat::Compact.encode(&record);
        assert_eq!(&bytes[0..8], &record.location_id.to_le_bytes());
        assert_eq!(&bytes[8..12], &record.beacon_id.0.to_le_bytes());
        assert_eq!(&bytes[12..16], &1_000_u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &2_000_u32.to_le_bytes());
        assert_eq!(&bytes[20..36], record.eph_id.as_bytes());
    }

    #[test]
    fn test_compact_drops_durations_and_rssi() {
        let record = sample_record();
        let decoded = RecordFormat::Compact
            .decode(&RecordFormat::Compact.encode(&record))
            .expect("decode");
        assert_eq!(decoded.dongle_time_start, record.dongle_time_start);
        assert_eq!(decoded.dongle_time_duration, 0, "case=compact_duration");
        assert_eq!(decoded.rssi, 0, "case=compact_rssi");
        assert_eq!(decoded.eph_id, record.eph_id);
    }

    #[test]
    fn test_full_preserves_negative_rssi() {
        let record = sample_record();
        let decoded = RecordFormat::Full
            .decode(&RecordFormat::Full.encode(&record))
            .expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_rejects_short_input() {
        let err = RecordFormat::Full
            .decode(&[0_u8; 44])
            .expect_err("44 bytes cannot hold a full record");
        assert!(matches!(err, DongleError::Corrupt { .. }));
    }

    #[test]
    fn test_eph_id_compare_ignores_padding() {
        let record = sample_record();
        let mut padded = *record.eph_id.as_bytes();
        padded[BEACON_EPH_ID_SIZE - 1] = 0xEE;
        let other = EphId::from_bytes(padded);
        assert_ne!(other, record.eph_id);
        assert!(other.same_id(&record.eph_id), "case=padding_ignored");
    }

    #[test]
    fn test_beacon_service_tag() {
        assert!(BeaconId::pancast(42).is_pancast());
        assert_eq!(BeaconId::pancast(42).service_id(), BROADCAST_SERVICE_ID);
        assert!(!BeaconId(0x1111_0001).is_pancast());
    }

    #[test]
    fn test_record_format_config_names() {
        let json = serde_json::to_string(&RecordFormat::Compact).expect("serialize");
        assert_eq!(json, "\"compact\"");
        let parsed: RecordFormat = serde_json::from_str("\"full\"").expect("deserialize");
        assert_eq!(parsed, RecordFormat::Full);
    }

    #[test]
    fn test_dongle_time_end_does_not_wrap() {
        let record = EncounterRecord {
            dongle_time_start: u32::MAX,
            dongle_time_duration: 10,
            ..EncounterRecord::default()
        };
        assert_eq!(record.dongle_time_end(), u64::from(u32::MAX) + 10);
    }
}
