//! DMA memory for descriptor rings and firmware context memory.

use alloc::vec::Vec;
use zerocopy::{AsBytes, FromBytes};
use nic_hal::{DmaRegion, HalRef, PhysicalAddress};
use bnxt_hsi::{pte, Le32, BNXT_PAGE_SIZE, MAX_CTX_PAGES, MAX_CTX_TOTAL_PAGES};
use crate::{RingError, DESC_SIZE};

/// How to seed context memory that firmware reads before it ever writes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitPattern {
    /// The size of one context entry, which must divide the page size.
    pub entry_size: usize,
    /// The byte to write.
    pub value: u8,
    /// The byte offset of the initialized byte within each entry, or `None` to fill every byte.
    pub offset: Option<usize>,
}

/// A set of DMA-coherent pages plus the page table that describes them to firmware.
///
/// The pages never move once allocated, so the table handed to firmware stays valid until
/// the `RingMem` is dropped, which frees every page and table.
pub struct RingMem {
    pages: Vec<DmaRegion>,
    /// Level-1 tables, each describing up to `MAX_CTX_PAGES` pages.
    tables: Vec<DmaRegion>,
    /// The table of level-1 tables, for two-level memory.
    dir: Option<DmaRegion>,
    depth: u8,
    init: Option<InitPattern>,
}

impl RingMem {
    /// Allocates `nr_pages` zeroed pages, with a page table if there is more than one page
    /// or if `force_table` is set. More than `MAX_CTX_PAGES` pages use a two-level table.
    ///
    /// Nothing is left allocated on failure.
    pub fn new(hal: &HalRef, nr_pages: usize, force_table: bool, init: Option<InitPattern>) -> Result<RingMem, RingError> {
        if nr_pages == 0 || nr_pages > MAX_CTX_TOTAL_PAGES {
            return Err(RingError::InvalidSize);
        }
        if let Some(p) = init {
            if p.entry_size == 0 || BNXT_PAGE_SIZE % p.entry_size != 0 || p.offset.map_or(false, |o| o >= p.entry_size) {
                return Err(RingError::InvalidSize);
            }
        }

        let mut pages = Vec::with_capacity(nr_pages);
        for _ in 0..nr_pages {
            let page = DmaRegion::new(hal, BNXT_PAGE_SIZE).map_err(|_e| RingError::OutOfMemory)?;
            pages.push(page);
        }

        let mut mem = RingMem { pages, tables: Vec::new(), dir: None, depth: 0, init };
        mem.init_pages();

        if nr_pages > MAX_CTX_PAGES {
            let nr_tables = (nr_pages + MAX_CTX_PAGES - 1) / MAX_CTX_PAGES;
            let dir = DmaRegion::new(hal, BNXT_PAGE_SIZE).map_err(|_e| RingError::OutOfMemory)?;
            for t in 0..nr_tables {
                let table = DmaRegion::new(hal, BNXT_PAGE_SIZE).map_err(|_e| RingError::OutOfMemory)?;
                let first = t * MAX_CTX_PAGES;
                let count = (nr_pages - first).min(MAX_CTX_PAGES);
                for i in 0..count {
                    // The last/next-to-last markers refer to the whole memory, not to this table.
                    let entry = pte(mem.pages[first + i].phys_addr().value(), first + i, nr_pages);
                    table.write::<u64>(i * 8, entry.to_le());
                }
                dir.write::<u64>(t * 8, pte(table.phys_addr().value(), t, nr_tables).to_le());
                mem.tables.push(table);
            }
            mem.dir = Some(dir);
            mem.depth = 2;
        } else if nr_pages > 1 || force_table {
            let table = DmaRegion::new(hal, BNXT_PAGE_SIZE).map_err(|_e| RingError::OutOfMemory)?;
            for (i, page) in mem.pages.iter().enumerate() {
                table.write::<u64>(i * 8, pte(page.phys_addr().value(), i, nr_pages).to_le());
            }
            mem.tables.push(table);
            mem.depth = 1;
        }
        trace!("RingMem::new(): {} pages, depth {}", nr_pages, mem.depth);
        Ok(mem)
    }

    /// Allocates memory for a ring of `entries` 16-byte descriptors.
    pub fn for_ring(hal: &HalRef, entries: usize) -> Result<RingMem, RingError> {
        if entries == 0 || !entries.is_power_of_two() {
            return Err(RingError::InvalidSize);
        }
        let bytes = entries * DESC_SIZE;
        let nr_pages = (bytes + BNXT_PAGE_SIZE - 1) / BNXT_PAGE_SIZE;
        RingMem::new(hal, nr_pages, false, None)
    }

    fn init_pages(&self) {
        let Some(pattern) = self.init else { return };
        for page in &self.pages {
            match pattern.offset {
                None => page.fill(pattern.value),
                Some(offset) => {
                    for entry in (0..BNXT_PAGE_SIZE).step_by(pattern.entry_size) {
                        page.write::<u8>(entry + offset, pattern.value);
                    }
                }
            }
        }
    }

    /// The address firmware is given: the single page, or the top-level table.
    pub fn base_addr(&self) -> PhysicalAddress {
        match (&self.dir, self.tables.first()) {
            (Some(dir), _) => dir.phys_addr(),
            (None, Some(table)) => table.phys_addr(),
            (None, None) => self.pages[0].phys_addr(),
        }
    }

    /// 0 for a direct pointer, 1 or 2 for page tables.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn nr_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.pages.len() * BNXT_PAGE_SIZE
    }

    pub fn page(&self, index: usize) -> Option<&DmaRegion> {
        self.pages.get(index)
    }

    fn locate(&self, byte_offset: usize) -> (&DmaRegion, usize) {
        let page = (byte_offset / BNXT_PAGE_SIZE) % self.pages.len();
        (&self.pages[page], byte_offset % BNXT_PAGE_SIZE)
    }

    /// Reads the 16-byte slot at `index`.
    pub fn read_slot<T: FromBytes + Copy>(&self, index: usize) -> T {
        let (page, offset) = self.locate(index * DESC_SIZE);
        page.read::<T>(offset)
    }

    /// Writes `value` into the slot at `index`; values larger than one slot spill into the next.
    pub fn write_slot<T: AsBytes>(&self, index: usize, value: &T) {
        let bytes = value.as_bytes();
        for (i, chunk) in bytes.chunks(DESC_SIZE).enumerate() {
            let (page, offset) = self.locate((index + i) * DESC_SIZE);
            page.copy_from(offset, chunk);
        }
    }

    /// Reads the dword at `within` bytes into slot `index`.
    pub fn read_dword(&self, index: usize, within: usize) -> u32 {
        let (page, offset) = self.locate(index * DESC_SIZE + within);
        page.read::<Le32>(offset).get()
    }

    /// Returns every page to its initial contents.
    pub fn reset(&self) {
        for page in &self.pages {
            page.fill(0);
        }
        self.init_pages();
    }
}

impl core::fmt::Debug for RingMem {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("RingMem")
            .field("pages", &self.pages.len())
            .field("depth", &self.depth)
            .field("base", &self.base_addr())
            .finish()
    }
}
