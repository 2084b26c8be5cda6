//! Placement of the OTP table and the encounter log inside flash.

use std::num::NonZeroU32;

use dongle_error::{DongleError, Result};
use dongle_flash::FlashGeometry;
use dongle_types::{LogIndex, RecordFormat, RecordSlot};
use serde::Serialize;

use crate::otp::OTP_TABLE_BYTES;

/// Addresses of the regions inside the device storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageMap {
    /// First byte of the OTP table; equal to the configured flash offset.
    pub otp: u32,
    /// First byte of the encounter log: the first page boundary at or after
    /// the end of the OTP table.
    pub log: u32,
}

impl StorageMap {
    pub fn new(geometry: &FlashGeometry, flash_offset: u32) -> Result<Self> {
        if !geometry.is_page_aligned(flash_offset) {
            return Err(DongleError::invalid_config(format!(
                "flash offset {flash_offset:#x} is not aligned to {}-byte pages",
                geometry.page_size
            )));
        }
        let otp_end = u64::from(flash_offset) + OTP_TABLE_BYTES as u64;
        let page = u64::from(geometry.page_size);
        let log = u32::try_from(otp_end.div_ceil(page) * page)
            .map_err(|_| DongleError::out_of_range("log base address", otp_end))?;
        if !geometry.contains(flash_offset, OTP_TABLE_BYTES) {
            return Err(DongleError::invalid_config(format!(
                "OTP table at {flash_offset:#x} does not fit in flash"
            )));
        }
        Ok(Self {
            otp: flash_offset,
            log,
        })
    }
}

/// Geometry of the encounter ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLayout {
    base: u32,
    stride: u32,
    capacity: NonZeroU32,
    format: RecordFormat,
    page_size: u32,
}

impl LogLayout {
    /// Lay out `floor(reserved_bytes / stride)` slots starting at `base`.
    ///
    /// `base` must be page aligned so the first write of every lap starts a
    /// fresh page.
    pub fn new(
        geometry: &FlashGeometry,
        base: u32,
        reserved_bytes: u32,
        format: RecordFormat,
    ) -> Result<Self> {
        if !geometry.is_page_aligned(base) {
            return Err(DongleError::invalid_config(format!(
                "log base {base:#x} is not page aligned"
            )));
        }
        let record_len = format.encoded_len() as u32;
        let stride = geometry.align_to_write_block(record_len);
        let capacity = NonZeroU32::new(reserved_bytes / stride).ok_or_else(|| {
            DongleError::invalid_config(format!(
                "{reserved_bytes} reserved bytes cannot hold one {stride}-byte record"
            ))
        })?;
        let used = capacity.get() * stride;
        if !geometry.contains(base, used as usize) {
            return Err(DongleError::invalid_config(format!(
                "log [{base:#x}, +{used}) exceeds the flash region"
            )));
        }
        Ok(Self {
            base,
            stride,
            capacity,
            format,
            page_size: geometry.page_size,
        })
    }

    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Bytes per slot: record size rounded up to the write block.
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    #[must_use]
    pub const fn capacity(&self) -> NonZeroU32 {
        self.capacity
    }

    #[must_use]
    pub const fn format(&self) -> RecordFormat {
        self.format
    }

    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// One past the last slot byte.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base + self.capacity.get() * self.stride
    }

    pub fn slot(&self, index: LogIndex) -> Result<RecordSlot> {
        RecordSlot::locate(self.base, self.stride, index)
    }
}
