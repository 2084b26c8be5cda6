//! Periodic broadcast packet header.
//!
//! Every periodic advertisement starts with a fixed 16-byte little-endian
//! header followed by up to [`MAX_PAYLOAD_SIZE`](crate::MAX_PAYLOAD_SIZE)
//! payload bytes:
//!
//! | offset | size | field      |
//! |--------|------|------------|
//! | 0      | 4    | `seq`      |
//! | 4      | 4    | `chunk_id` |
//! | 8      | 8    | `chunk_len`|

use serde::{Deserialize, Serialize};

use crate::PACKET_HEADER_LEN;

/// Decoded periodic packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Position of this packet within its chunk.
    pub seq: u32,
    /// Identifier of the chunk the packet belongs to.
    pub chunk_id: u32,
    /// Total payload length the sender declares for the chunk.
    pub chunk_len: u64,
}

impl PacketHeader {
    /// Split a raw packet into its header and payload.
    ///
    /// Returns `None` when the packet is shorter than the header.
    #[must_use]
    pub fn parse(packet: &[u8]) -> Option<(Self, &[u8])> {
        let (header, payload) = packet.split_first_chunk::<PACKET_HEADER_LEN>()?;
        let (seq, rest) = header.split_first_chunk::<4>()?;
        let (chunk_id, rest) = rest.split_first_chunk::<4>()?;
        let (chunk_len, _) = rest.split_first_chunk::<8>()?;
        Some((
            Self {
                seq: u32::from_le_bytes(*seq),
                chunk_id: u32::from_le_bytes(*chunk_id),
                chunk_len: u64::from_le_bytes(*chunk_len),
            },
            payload,
        ))
    }

    /// Serialize the header.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_HEADER_LEN] {
        let mut out = [0_u8; PACKET_HEADER_LEN];
        out[0..4].copy_from_slice(&self.seq.to_le_bytes());
        out[4..8].copy_from_slice(&self.chunk_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.chunk_len.to_le_bytes());
        out
    }

    /// Serialize the header followed by `payload`.
    #[must_use]
    pub fn encode_packet(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(PACKET_HEADER_LEN + payload.len());
        out.extend_from_slice(&self.encode());
        out.extend_from_slice(payload);
        out
    }
}
