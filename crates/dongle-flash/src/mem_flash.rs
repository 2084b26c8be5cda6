//! In-memory NOR flash simulator.

use dongle_error::{DongleError, FlashOp, Result};
use tracing::{debug, trace};

use crate::{ERASED_BYTE, FlashDevice, FlashGeometry};

/// Byte image of a flash region with per-page wear counters.
///
/// In strict mode (the default) a write is rejected with
/// [`DongleError::NotErased`] when it would have to set a bit that is
/// currently cleared, or when it is not aligned to the write block. Outside
/// strict mode such writes are silently ANDed into the image, which is what
/// real NOR hardware does.
#[derive(Debug, Clone)]
pub struct MemFlash {
    geometry: FlashGeometry,
    image: Vec<u8>,
    erase_counts: Vec<u32>,
    strict: bool,
    fail_next_write: bool,
    fail_next_erase: bool,
    writes: u64,
}

impl MemFlash {
    /// Create a fully erased region.
    pub fn new(geometry: FlashGeometry) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            image: vec![ERASED_BYTE; geometry.size as usize],
            erase_counts: vec![0; geometry.num_pages() as usize],
            strict: true,
            fail_next_write: false,
            fail_next_erase: false,
            writes: 0,
        })
    }

    /// Toggle strict program checking.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Make the next `write` call fail without touching the image.
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    /// Make the next `erase_page` call fail without touching the image.
    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }

    /// Raw bytes of the whole region.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Number of times the page containing `addr` has been erased.
    #[must_use]
    pub fn erase_count(&self, addr: u32) -> u32 {
        if !self.geometry.contains(addr, 1) {
            return 0;
        }
        let page = ((addr - self.geometry.base) / self.geometry.page_size) as usize;
        self.erase_counts[page]
    }

    /// Total erases across every page.
    #[must_use]
    pub fn total_erases(&self) -> u64 {
        self.erase_counts.iter().map(|&n| u64::from(n)).sum()
    }

    /// Successful program operations so far.
    #[must_use]
    pub const fn write_count(&self) -> u64 {
        self.writes
    }

    fn offset(&self, addr: u32, len: usize, op: FlashOp) -> Result<usize> {
        if !self.geometry.contains(addr, len) {
            return Err(DongleError::out_of_range(
                format!("flash {op} address"),
                format!("{addr:#x}+{len}"),
            ));
        }
        Ok((addr - self.geometry.base) as usize)
    }
}

impl FlashDevice for MemFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn erase_page(&mut self, addr: u32) -> Result<()> {
        if !self.geometry.is_page_aligned(addr) {
            return Err(DongleError::Flash {
                op: FlashOp::Erase,
                addr,
                detail: "address is not page aligned".to_owned(),
            });
        }
        let page_size = self.geometry.page_size as usize;
        let start = self.offset(addr, page_size, FlashOp::Erase)?;
        if std::mem::take(&mut self.fail_next_erase) {
            return Err(DongleError::Flash {
                op: FlashOp::Erase,
                addr,
                detail: "injected erase fault".to_owned(),
            });
        }
        self.image[start..start + page_size].fill(ERASED_BYTE);
        let page = start / page_size;
        self.erase_counts[page] = self.erase_counts[page].saturating_add(1);
        debug!(addr, page, erases = self.erase_counts[page], "flash page erased");
        Ok(())
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let start = self.offset(addr, bytes.len(), FlashOp::Write)?;
        if std::mem::take(&mut self.fail_next_write) {
            return Err(DongleError::Flash {
                op: FlashOp::Write,
                addr,
                detail: "injected write fault".to_owned(),
            });
        }
        let target = &mut self.image[start..start + bytes.len()];
        if self.strict {
            let block = self.geometry.write_block_size;
            if addr % block != 0 || bytes.len() % block as usize != 0 {
                return Err(DongleError::Flash {
                    op: FlashOp::Write,
                    addr,
                    detail: format!("{} bytes not aligned to {block}-byte blocks", bytes.len()),
                });
            }
            if target.iter().zip(bytes).any(|(&have, &want)| have & want != want) {
                return Err(DongleError::NotErased { addr });
            }
        }
        for (have, &want) in target.iter_mut().zip(bytes) {
            *have &= want;
        }
        self.writes += 1;
        trace!(addr, len = bytes.len(), "flash write");
        Ok(())
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let start = self.offset(addr, buf.len(), FlashOp::Read)?;
        buf.copy_from_slice(&self.image[start..start + buf.len()]);
        Ok(())
    }
}
