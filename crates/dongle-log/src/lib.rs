//! Flash-backed encounter log.
//!
//! The log is a fixed-capacity ring of equally sized record slots inside a
//! reserved flash region. Records are never rewritten: `append` moves the
//! head forward, and the two retention policies (capacity-driven forced
//! deletion and age-driven eviction) only move the tail forward.
//!
//! Layout of the device storage area (see [`StorageMap`]):
//!
//! ```text
//! flash_offset ─► OTP table (NUM_OTP × 16 bytes)
//! next page    ─► encounter log (capacity × stride bytes)
//! ```

pub mod cursor;
pub mod erase;
pub mod layout;
pub mod otp;
pub mod store;

pub use cursor::LogCursor;
pub use erase::{ErasePlan, plan_erase};
pub use layout::{LogLayout, StorageMap};
pub use otp::{NUM_OTP, OtpEntry, OtpFlags, OtpTable};
pub use store::{AppendOutcome, CursorSnapshot, LogStore};
