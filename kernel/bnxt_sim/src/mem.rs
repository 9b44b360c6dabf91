//! Host memory as seen by the simulated device.
//!
//! Bus addresses are identity-mapped CPU addresses. Every device access is checked against
//! the set of live coherent allocations and streaming mappings, so a driver that hands the
//! device a stale or unmapped address fails loudly instead of corrupting the heap.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use zerocopy::{AsBytes, FromBytes, FromZeroes};
use nic_hal::{DmaDirection, PhysicalAddress, PAGE_SIZE};

#[derive(Default)]
pub(crate) struct DmaMemory {
    /// Coherent allocations: start -> length.
    coherent: BTreeMap<u64, usize>,
    /// Streaming mappings: start -> (length, direction, map count).
    streaming: BTreeMap<u64, (usize, DmaDirection, usize)>,
    /// Number of upcoming `dma_map()` calls that fail.
    pub(crate) fail_maps: usize,
    /// Number of upcoming `dma_alloc_coherent()` calls that fail.
    pub(crate) fail_allocs: usize,
}

impl DmaMemory {
    pub(crate) fn alloc(&mut self, size: usize) -> Option<(PhysicalAddress, NonNull<u8>)> {
        if self.fail_allocs > 0 {
            self.fail_allocs -= 1;
            return None;
        }
        let layout = Layout::from_size_align(size.max(1), PAGE_SIZE).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        let paddr = ptr.as_ptr() as u64;
        self.coherent.insert(paddr, size);
        Some((PhysicalAddress::new(paddr), ptr))
    }

    pub(crate) unsafe fn free(&mut self, paddr: PhysicalAddress, vaddr: NonNull<u8>, size: usize) {
        match self.coherent.remove(&paddr.value()) {
            Some(len) if len == size => {
                dealloc(vaddr.as_ptr(), Layout::from_size_align_unchecked(size.max(1), PAGE_SIZE));
            }
            Some(len) => panic!("dma_free_coherent({}, {}) of a {} byte allocation", paddr, size, len),
            None => panic!("dma_free_coherent({}) of unknown memory", paddr),
        }
    }

    pub(crate) fn map(&mut self, vaddr: NonNull<u8>, len: usize, dir: DmaDirection) -> Option<PhysicalAddress> {
        if self.fail_maps > 0 {
            self.fail_maps -= 1;
            return None;
        }
        let paddr = vaddr.as_ptr() as u64;
        let entry = self.streaming.entry(paddr).or_insert((len, dir, 0));
        entry.0 = entry.0.max(len);
        entry.2 += 1;
        Some(PhysicalAddress::new(paddr))
    }

    pub(crate) fn unmap(&mut self, paddr: PhysicalAddress, len: usize) {
        match self.streaming.get_mut(&paddr.value()) {
            Some(entry) => {
                assert!(len <= entry.0, "dma_unmap({}, {}) larger than the mapping", paddr, len);
                entry.2 -= 1;
                if entry.2 == 0 {
                    self.streaming.remove(&paddr.value());
                }
            }
            None => panic!("dma_unmap({}) of an address that is not mapped", paddr),
        }
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.coherent.len()
    }

    pub(crate) fn live_mappings(&self) -> usize {
        self.streaming.values().map(|e| e.2).sum()
    }

    /// Returns true if `paddr..paddr + len` lies within live device-visible memory.
    pub(crate) fn is_live(&self, paddr: u64, len: usize) -> bool {
        let end = paddr + len as u64;
        let in_coherent = self.coherent.range(..=paddr).next_back()
            .map_or(false, |(start, size)| end <= start + *size as u64);
        let in_streaming = self.streaming.range(..=paddr).next_back()
            .map_or(false, |(start, e)| end <= start + e.0 as u64);
        in_coherent || in_streaming
    }

    fn check(&self, paddr: u64, len: usize) {
        assert!(self.is_live(paddr, len), "device access to unmapped memory {:#x}+{}", paddr, len);
    }

    pub(crate) fn read(&self, paddr: u64, dst: &mut [u8]) {
        self.check(paddr, dst.len());
        unsafe { core::ptr::copy_nonoverlapping(paddr as *const u8, dst.as_mut_ptr(), dst.len()) }
    }

    pub(crate) fn write(&self, paddr: u64, src: &[u8]) {
        self.check(paddr, src.len());
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), paddr as *mut u8, src.len()) }
    }

    pub(crate) fn read_obj<T: FromBytes + AsBytes>(&self, paddr: u64) -> T {
        let mut obj = <T as FromZeroes>::new_zeroed();
        self.read(paddr, obj.as_bytes_mut());
        obj
    }

    pub(crate) fn write_obj<T: AsBytes>(&self, paddr: u64, obj: &T) {
        self.write(paddr, obj.as_bytes());
    }

    pub(crate) fn read_u64(&self, paddr: u64) -> u64 {
        let mut b = [0u8; 8];
        self.read(paddr, &mut b);
        u64::from_le_bytes(b)
    }
}

impl Drop for DmaMemory {
    fn drop(&mut self) {
        // The driver owns the memory; anything still allocated is leaked with the driver.
        if !self.coherent.is_empty() {
            log::debug!("sim dropped with {} coherent allocations live", self.coherent.len());
        }
    }
}
