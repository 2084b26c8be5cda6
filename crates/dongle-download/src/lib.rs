//! Risk-filter download.
//!
//! The risk set is broadcast as a cuckoo filter split into fixed-size
//! periodic packets, repeated for as long as the sender keeps the chunk
//! current. Delivery is lossy and duplicated, and the sender may rotate to
//! a new chunk at any time.
//!
//! - [`DownloadReassembler`]: per-sequence receipt accounting, chunk-switch
//!   detection and completion against the encounter log.
//! - [`FilterLookup`]: the membership seam, with [`PackedCuckooFilter`] as
//!   the reference encoding.
//! - [`MatchBitmap`]: one bit per log slot marking encounters that hit a
//!   filter.

pub mod bitmap;
pub mod filter;
pub mod reassembler;

pub use bitmap::MatchBitmap;
pub use filter::{CuckooFilterBuilder, FilterLookup, PackedCuckooFilter};
pub use reassembler::{
    Completion, DownloadFailure, DownloadReassembler, DownloadState, FailReason,
    PacketDisposition, PacketReport, estimate_loss,
};
