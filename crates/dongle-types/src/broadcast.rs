//! Beacon broadcast framing for legacy scan advertisements.
//!
//! A beacon packs a 30-byte broadcast (`beacon_time | beacon_id |
//! location_id | eph_id hash`, little-endian) behind a one-byte AD length.
//! The AD header overlays the first two payload bytes, so the sender moves
//! payload byte 1 to the final position and the receiver restores it:
//!
//! ```text
//! air:     [len] [p0] [p2 .. p29] [p1]
//! decoded: [p0] [p1] [p2 .. p29]
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    BEACON_EPH_ID_HASH_LEN, BeaconId, BeaconTimer, ENCOUNTER_BROADCAST_SIZE, EphId, LocationId,
    MAX_BROADCAST_SIZE,
};

/// Decoded beacon broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBroadcast {
    pub beacon_time: BeaconTimer,
    pub beacon_id: BeaconId,
    pub location_id: LocationId,
    pub eph_id: EphId,
}

impl BeaconBroadcast {
    /// Pack into the 30-byte broadcast body.
    #[must_use]
    pub fn to_payload(&self) -> [u8; ENCOUNTER_BROADCAST_SIZE] {
        let mut out = [0_u8; ENCOUNTER_BROADCAST_SIZE];
        out[0..4].copy_from_slice(&self.beacon_time.to_le_bytes());
        out[4..8].copy_from_slice(&self.beacon_id.0.to_le_bytes());
        out[8..16].copy_from_slice(&self.location_id.to_le_bytes());
        out[16..].copy_from_slice(self.eph_id.hash());
        out
    }

    /// Unpack a 30-byte broadcast body.
    #[must_use]
    pub fn from_payload(payload: &[u8; ENCOUNTER_BROADCAST_SIZE]) -> Self {
        let (time, rest) = payload.split_at(4);
        let (beacon, rest) = rest.split_at(4);
        let (location, eph) = rest.split_at(8);
        let mut hash = [0_u8; BEACON_EPH_ID_HASH_LEN];
        hash.copy_from_slice(eph);
        Self {
            beacon_time: u32::from_le_bytes(to_array(time)),
            beacon_id: BeaconId(u32::from_le_bytes(to_array(beacon))),
            location_id: u64::from_le_bytes(to_array(location)),
            eph_id: EphId::from_hash(&hash),
        }
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0_u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Decode a raw advertisement. Anything other than exactly
/// `ENCOUNTER_BROADCAST_SIZE + 1` bytes is not a beacon broadcast.
#[must_use]
pub fn decode_advertisement(raw: &[u8]) -> Option<BeaconBroadcast> {
    if raw.len() != ENCOUNTER_BROADCAST_SIZE + 1 {
        return None;
    }
    let mut payload = [0_u8; ENCOUNTER_BROADCAST_SIZE];
    payload[0] = raw[1];
    payload[1] = raw[MAX_BROADCAST_SIZE - 1];
    payload[2..].copy_from_slice(&raw[2..MAX_BROADCAST_SIZE - 1]);
    Some(BeaconBroadcast::from_payload(&payload))
}

/// Frame a broadcast the way a beacon puts it on air.
#[must_use]
pub fn encode_advertisement(broadcast: &BeaconBroadcast) -> [u8; MAX_BROADCAST_SIZE] {
    let payload = broadcast.to_payload();
    let mut raw = [0_u8; MAX_BROADCAST_SIZE];
    raw[0] = ENCOUNTER_BROADCAST_SIZE as u8;
    raw[1] = payload[0];
    raw[2..MAX_BROADCAST_SIZE - 1].copy_from_slice(&payload[2..]);
    raw[MAX_BROADCAST_SIZE - 1] = payload[1];
    raw
}
