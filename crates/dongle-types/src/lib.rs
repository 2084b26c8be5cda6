//! Core type definitions shared by the dongle crates.
//!
//! - [`EncounterRecord`] and its on-flash [`RecordFormat`]s
//! - [`EphId`] / [`BeaconId`] identifiers
//! - [`LogIndex`] / [`RecordSlot`] for typed ring-buffer addressing
//! - [`PacketHeader`] for the periodic risk broadcast
//! - [`BeaconBroadcast`] for legacy scan advertisements

pub mod broadcast;
pub mod encounter;
pub mod log_index;
pub mod packet;

pub use broadcast::{BeaconBroadcast, decode_advertisement, encode_advertisement};
pub use encounter::{BeaconId, EncounterRecord, EphId, RecordFormat};
pub use log_index::{LogIndex, RecordSlot};
pub use packet::PacketHeader;

/// Dongle clock value, in application time units.
pub type DongleTimer = u32;
/// Beacon clock value as carried in its broadcast.
pub type BeaconTimer = u32;
/// Beacon location identifier.
pub type LocationId = u64;

/// Number of hash bytes that make up an ephemeral id.
pub const BEACON_EPH_ID_HASH_LEN: usize = 14;
/// Container size used to store an ephemeral id.
pub const BEACON_EPH_ID_SIZE: usize = 16;

/// Service tag carried in the upper 16 bits of every PanCast beacon id.
pub const BROADCAST_SERVICE_ID: u32 = 0x2222;
/// Mask selecting the service tag from a beacon id.
pub const BEACON_SERVICE_ID_MASK: u32 = 0xffff_0000;

/// Maximum raw payload of a legacy advertisement.
pub const MAX_BROADCAST_SIZE: usize = 31;
/// Encoded beacon broadcast: clock, beacon id, location id, ephemeral id hash.
pub const ENCOUNTER_BROADCAST_SIZE: usize = BEACON_EPH_ID_HASH_LEN + 8 + 4 + 4;

/// Largest risk filter the dongle can reassemble.
pub const MAX_FILTER_BYTES: usize = 2048;
/// Size of one periodic advertisement.
pub const PER_ADV_SIZE: usize = 250;
/// Fixed header prepended to every periodic packet.
pub const PACKET_HEADER_LEN: usize = 16;
/// Payload bytes carried by one periodic packet.
pub const MAX_PAYLOAD_SIZE: usize = PER_ADV_SIZE - PACKET_HEADER_LEN;
/// Upper bound on packets needed for one filter.
pub const MAX_PACKETS_PER_FILTER: usize = MAX_FILTER_BYTES / MAX_PAYLOAD_SIZE + 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_fits_legacy_advertisement() {
        assert_eq!(ENCOUNTER_BROADCAST_SIZE, 30);
        assert!(ENCOUNTER_BROADCAST_SIZE < MAX_BROADCAST_SIZE);
    }

    #[test]
    fn test_packet_geometry() {
        assert_eq!(MAX_PAYLOAD_SIZE, 234);
        assert_eq!(MAX_PACKETS_PER_FILTER, 9);
        assert!(MAX_PACKETS_PER_FILTER * MAX_PAYLOAD_SIZE >= MAX_FILTER_BYTES);
    }
}
