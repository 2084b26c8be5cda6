//! Flash medium and persistent-counter abstractions.
//!
//! [`FlashDevice`] models NOR flash: bits can only be cleared by a program
//! operation and only set again by erasing a whole page. [`CounterStore`]
//! models the vendor key/value store that holds the device counters (log
//! cursor, clock) and commits a batch of writes atomically.
//!
//! [`MemFlash`] and [`MemCounterStore`] are in-memory implementations used by
//! tests and the host simulator.

pub mod counter;
pub mod mem_flash;

pub use counter::{CounterKey, CounterStore, MemCounterStore};
pub use mem_flash::MemFlash;

use dongle_error::{DongleError, Result};
use serde::{Deserialize, Serialize};

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Physical layout of a flash region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashGeometry {
    /// First addressable byte.
    pub base: u32,
    /// Region size in bytes; a whole number of pages.
    pub size: u32,
    /// Erase granularity.
    pub page_size: u32,
    /// Program granularity.
    pub write_block_size: u32,
}

impl FlashGeometry {
    /// Validate the geometry.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.write_block_size == 0 {
            return Err(DongleError::invalid_config(
                "flash page and write-block sizes must be non-zero",
            ));
        }
        if self.page_size % self.write_block_size != 0 {
            return Err(DongleError::invalid_config(format!(
                "page size {} is not a multiple of write block {}",
                self.page_size, self.write_block_size
            )));
        }
        if self.size == 0 || self.size % self.page_size != 0 {
            return Err(DongleError::invalid_config(format!(
                "flash size {} is not a whole number of {}-byte pages",
                self.size, self.page_size
            )));
        }
        if self.base % self.page_size != 0 {
            return Err(DongleError::invalid_config(format!(
                "flash base {:#x} is not page aligned",
                self.base
            )));
        }
        self.base.checked_add(self.size).ok_or_else(|| {
            DongleError::invalid_config("flash region extends past the address space")
        })?;
        Ok(())
    }

    /// One past the last addressable byte.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base.saturating_add(self.size)
    }

    #[must_use]
    pub const fn num_pages(&self) -> u32 {
        self.size / self.page_size
    }

    /// Start address of the page containing `addr`.
    #[must_use]
    pub const fn page_start(&self, addr: u32) -> u32 {
        addr - addr % self.page_size
    }

    #[must_use]
    pub const fn is_page_aligned(&self, addr: u32) -> bool {
        addr % self.page_size == 0
    }

    /// Round `len` up to a whole number of write blocks.
    #[must_use]
    pub const fn align_to_write_block(&self, len: u32) -> u32 {
        len.div_ceil(self.write_block_size) * self.write_block_size
    }

    /// Whether `[addr, addr + len)` lies inside the region.
    #[must_use]
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        let Ok(len) = u32::try_from(len) else {
            return false;
        };
        addr >= self.base && addr.checked_add(len).is_some_and(|end| end <= self.end())
    }
}

/// Raw page-erase / block-program flash primitive.
pub trait FlashDevice {
    fn geometry(&self) -> FlashGeometry;

    /// Reset the page starting at `addr` to [`ERASED_BYTE`].
    fn erase_page(&mut self, addr: u32) -> Result<()>;

    /// Program `bytes` at `addr`. Programming can only clear bits.
    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()>;

    /// Copy `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()>;
}

impl<T: FlashDevice + ?Sized> FlashDevice for &mut T {
    fn geometry(&self) -> FlashGeometry {
        (**self).geometry()
    }

    fn erase_page(&mut self, addr: u32) -> Result<()> {
        (**self).erase_page(addr)
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        (**self).write(addr, bytes)
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FlashGeometry {
        FlashGeometry {
            base: 0x2e000,
            size: 0x1000,
            page_size: 0x800,
            write_block_size: 4,
        }
    }

    #[test]
    fn test_geometry_helpers() {
        let g = geometry();
        g.validate().unwrap();
        assert_eq!(g.end(), 0x2f000);
        assert_eq!(g.num_pages(), 2);
        assert_eq!(g.page_start(0x2e900), 0x2e800);
        assert!(g.is_page_aligned(0x2e800));
        assert_eq!(g.align_to_write_block(45), 48);
        assert_eq!(g.align_to_write_block(36), 36);
    }

    #[test]
    fn test_contains_bounds() {
        let g = geometry();
        assert!(g.contains(0x2e000, 0x1000), "case=whole_region");
        assert!(!g.contains(0x2e000, 0x1001), "case=one_past_end");
        assert!(!g.contains(0x2dfff, 1), "case=below_base");
        assert!(!g.contains(u32::MAX, 2), "case=overflow");
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let mut g = geometry();
        g.base = 0x2e004;
        assert!(g.validate().is_err(), "case=unaligned_base");
        let mut g = geometry();
        g.size = 0x900;
        assert!(g.validate().is_err(), "case=partial_page");
        let mut g = geometry();
        g.write_block_size = 0;
        assert!(g.validate().is_err(), "case=zero_block");
    }
}
