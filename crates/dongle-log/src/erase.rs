//! Erase-before-write planning.
//!
//! A program operation can only clear bits, so every page a record write
//! enters for the first time has to be erased beforehand. For a write of
//! `len` bytes at `addr` that means every page whose first byte lies in
//! `[addr, addr + len)`: the page starting at `addr` when `addr` is page
//! aligned, plus every page boundary the write crosses. The page holding a
//! non-aligned `addr` was already erased when the slot before it was
//! written.

use dongle_flash::FlashGeometry;

/// Pages to erase ahead of one write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErasePlan {
    pages: Vec<u32>,
    page_size: u32,
}

impl ErasePlan {
    /// Start addresses of the pages to erase, ascending.
    #[must_use]
    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether `[addr, addr + len)` overlaps any page in `erased`.
    #[must_use]
    pub fn overlaps(erased: &[u32], page_size: u32, addr: u32, len: u32) -> bool {
        let start = u64::from(addr);
        let end = start + u64::from(len);
        erased.iter().any(|&page| {
            let page_start = u64::from(page);
            let page_end = page_start + u64::from(page_size);
            start < page_end && page_start < end
        })
    }

    /// Whether `[addr, addr + len)` overlaps any planned page.
    #[must_use]
    pub fn covers(&self, addr: u32, len: u32) -> bool {
        Self::overlaps(&self.pages, self.page_size, addr, len)
    }
}

/// Plan the erases required before programming `len` bytes at `addr`.
#[must_use]
pub fn plan_erase(geometry: &FlashGeometry, addr: u32, len: u32) -> ErasePlan {
    let page = u64::from(geometry.page_size);
    let start = u64::from(addr);
    let end = start + u64::from(len);
    let mut next = if start % page == 0 {
        start
    } else {
        start - start % page + page
    };
    let mut pages = Vec::new();
    while next < end {
        if let Ok(page_addr) = u32::try_from(next) {
            pages.push(page_addr);
        }
        next += page;
    }
    ErasePlan {
        pages,
        page_size: geometry.page_size,
    }
}
