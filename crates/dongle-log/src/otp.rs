//! One-time passcode table.
//!
//! `NUM_OTP` entries of `{flags: u64, val: u64}` (little-endian) stored at
//! the start of the device storage area. An entry is unused while flag bit 0
//! is set; redeeming a code clears that bit with a plain program operation,
//! which is legal without an erase because it only clears bits.

use bitflags::bitflags;
use dongle_error::{DongleError, Result};
use dongle_flash::FlashDevice;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::erase::plan_erase;

/// Entries in the OTP table.
pub const NUM_OTP: usize = 16;
/// Encoded size of one entry.
pub const OTP_ENTRY_BYTES: usize = 16;
/// Encoded size of the whole table.
pub const OTP_TABLE_BYTES: usize = NUM_OTP * OTP_ENTRY_BYTES;

bitflags! {
    /// Per-entry flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OtpFlags: u64 {
        /// Set while the code has not been redeemed.
        const UNUSED = 1;
    }
}

/// One OTP table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpEntry {
    pub flags: OtpFlags,
    pub val: u64,
}

impl OtpEntry {
    /// A fresh, redeemable code. All other flag bits stay erased.
    #[must_use]
    pub const fn fresh(val: u64) -> Self {
        Self {
            flags: OtpFlags::from_bits_retain(u64::MAX),
            val,
        }
    }

    #[must_use]
    pub const fn is_used(&self) -> bool {
        !self.flags.contains(OtpFlags::UNUSED)
    }

    fn encode(&self) -> [u8; OTP_ENTRY_BYTES] {
        let mut out = [0_u8; OTP_ENTRY_BYTES];
        out[..8].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[8..].copy_from_slice(&self.val.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8; OTP_ENTRY_BYTES]) -> Self {
        let (flags, val) = bytes.split_at(8);
        let mut flag_bytes = [0_u8; 8];
        flag_bytes.copy_from_slice(flags);
        let mut val_bytes = [0_u8; 8];
        val_bytes.copy_from_slice(val);
        Self {
            flags: OtpFlags::from_bits_retain(u64::from_le_bytes(flag_bytes)),
            val: u64::from_le_bytes(val_bytes),
        }
    }
}

/// Handle to the OTP table at a fixed flash address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpTable {
    base: u32,
}

impl OtpTable {
    #[must_use]
    pub const fn new(base: u32) -> Self {
        Self { base }
    }

    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    fn entry_addr(&self, index: usize) -> Result<u32> {
        if index >= NUM_OTP {
            return Err(DongleError::out_of_range("otp index", index));
        }
        Ok(self.base + (index * OTP_ENTRY_BYTES) as u32)
    }

    /// Erase the table pages and write `codes` as fresh entries.
    pub fn save_all<F: FlashDevice>(&self, flash: &mut F, codes: &[u64; NUM_OTP]) -> Result<()> {
        let geometry = flash.geometry();
        for page in plan_erase(&geometry, self.base, OTP_TABLE_BYTES as u32).pages() {
            flash.erase_page(*page)?;
        }
        let mut image = Vec::with_capacity(OTP_TABLE_BYTES);
        for &code in codes {
            image.extend_from_slice(&OtpEntry::fresh(code).encode());
        }
        flash.write(self.base, &image)?;
        info!(base = self.base, entries = NUM_OTP, "otp table saved");
        Ok(())
    }

    pub fn load<F: FlashDevice>(&self, flash: &F, index: usize) -> Result<OtpEntry> {
        let mut buf = [0_u8; OTP_ENTRY_BYTES];
        flash.read(self.entry_addr(index)?, &mut buf)?;
        Ok(OtpEntry::decode(&buf))
    }

    /// Redeem `val`: mark the first unused entry holding it as used and
    /// return its index. Used codes never match again.
    pub fn match_code<F: FlashDevice>(&self, flash: &mut F, val: u64) -> Result<Option<usize>> {
        for index in 0..NUM_OTP {
            let mut entry = self.load(flash, index)?;
            if entry.val != val || entry.is_used() {
                continue;
            }
            entry.flags.remove(OtpFlags::UNUSED);
            flash.write(self.entry_addr(index)?, &entry.flags.bits().to_le_bytes())?;
            debug!(index, "otp redeemed");
            return Ok(Some(index));
        }
        Ok(None)
    }

    /// Number of codes not yet redeemed.
    pub fn remaining<F: FlashDevice>(&self, flash: &F) -> Result<usize> {
        let mut unused = 0;
        for index in 0..NUM_OTP {
            if !self.load(flash, index)?.is_used() {
                unused += 1;
            }
        }
        Ok(unused)
    }
}
