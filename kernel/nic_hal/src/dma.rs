//! DMA-coherent regions and streaming DMA mappings.

use core::{
    fmt,
    mem,
    ptr::{self, NonNull},
    slice,
};
use crate::{Hal, HalRef, PhysicalAddress};

/// The direction of a streaming DMA mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaDirection {
    ToDevice,
    FromDevice,
    Bidirectional,
}

/// A physically-contiguous, DMA-coherent memory region shared with the device.
///
/// This is the DMA counterpart of `MappedPages`: it owns the allocation and
/// returns it to the [`Hal`] when dropped. Because the device may write into the
/// region at any time, all typed accesses go through volatile reads and writes
/// and no long-lived references into the region are handed out.
pub struct DmaRegion {
    hal: HalRef,
    vaddr: NonNull<u8>,
    paddr: PhysicalAddress,
    size: usize,
}

// SAFE: the region is exclusively owned, and concurrent access to its contents is
// coordinated by the ring protocols built on top of it (volatile accesses only).
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Allocates a new zeroed region of at least `size_in_bytes` bytes.
    pub fn new(hal: &HalRef, size_in_bytes: usize) -> Result<DmaRegion, &'static str> {
        if size_in_bytes == 0 {
            return Err("DmaRegion::new(): cannot allocate a zero-sized region");
        }
        let (paddr, vaddr) = hal.dma_alloc_coherent(size_in_bytes)
            .ok_or("DmaRegion::new(): out of DMA-coherent memory")?;
        let region = DmaRegion { hal: hal.clone(), vaddr, paddr, size: size_in_bytes };
        region.fill(0);
        Ok(region)
    }

    /// The bus address of the first byte of this region.
    #[inline]
    pub fn phys_addr(&self) -> PhysicalAddress {
        self.paddr
    }

    /// The size of this region in bytes.
    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.size
    }

    /// The CPU-visible address of the first byte of this region.
    #[inline]
    pub fn start_address(&self) -> NonNull<u8> {
        self.vaddr
    }

    #[inline]
    fn check_bounds(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).map_or(false, |end| end <= self.size),
            "DmaRegion access out of bounds"
        );
    }

    /// Reads a `T` at `offset` with a single volatile load.
    #[inline]
    pub fn read<T: Copy>(&self, offset: usize) -> T {
        self.check_bounds(offset, mem::size_of::<T>());
        debug_assert_eq!(offset % mem::align_of::<T>(), 0);
        // SAFE: bounds are checked above and the region lives as long as `self`.
        unsafe { ptr::read_volatile(self.vaddr.as_ptr().add(offset) as *const T) }
    }

    /// Writes a `T` at `offset` with a single volatile store.
    #[inline]
    pub fn write<T: Copy>(&self, offset: usize, value: T) {
        self.check_bounds(offset, mem::size_of::<T>());
        debug_assert_eq!(offset % mem::align_of::<T>(), 0);
        // SAFE: bounds are checked above and the region lives as long as `self`.
        unsafe { ptr::write_volatile(self.vaddr.as_ptr().add(offset) as *mut T, value) }
    }

    /// Copies `src` into the region starting at `offset`.
    pub fn copy_from(&self, offset: usize, src: &[u8]) {
        self.check_bounds(offset, src.len());
        // SAFE: bounds are checked above; `src` cannot overlap a DMA region we own.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.vaddr.as_ptr().add(offset), src.len()) }
    }

    /// Copies bytes out of the region starting at `offset` into `dst`.
    pub fn copy_to(&self, offset: usize, dst: &mut [u8]) {
        self.check_bounds(offset, dst.len());
        // SAFE: bounds are checked above; `dst` cannot overlap a DMA region we own.
        unsafe { ptr::copy_nonoverlapping(self.vaddr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// Sets every byte of the region to `value`.
    pub fn fill(&self, value: u8) {
        // SAFE: the whole region is owned by `self`.
        unsafe { ptr::write_bytes(self.vaddr.as_ptr(), value, self.size) }
    }

    /// Reinterprets part of the region as a byte slice.
    pub fn as_slice(&self, byte_offset: usize, length: usize) -> Result<&[u8], &'static str> {
        let end = byte_offset.checked_add(length).ok_or("DmaRegion::as_slice(): offset overflow")?;
        if end > self.size {
            error!("DmaRegion::as_slice(): requested {} bytes at offset {}, region size is {}", length, byte_offset, self.size);
            return Err("requested slice length and offset would not fit within the DmaRegion bounds");
        }
        // SAFE: we guarantee the size and lifetime are within that of this DmaRegion
        Ok(unsafe { slice::from_raw_parts(self.vaddr.as_ptr().add(byte_offset), length) })
    }

    /// Same as [`as_slice()`](#method.as_slice), but returns a *mutable* slice.
    pub fn as_slice_mut(&mut self, byte_offset: usize, length: usize) -> Result<&mut [u8], &'static str> {
        let end = byte_offset.checked_add(length).ok_or("DmaRegion::as_slice_mut(): offset overflow")?;
        if end > self.size {
            error!("DmaRegion::as_slice_mut(): requested {} bytes at offset {}, region size is {}", length, byte_offset, self.size);
            return Err("requested slice length and offset would not fit within the DmaRegion bounds");
        }
        // SAFE: we guarantee the size and lifetime are within that of this DmaRegion
        Ok(unsafe { slice::from_raw_parts_mut(self.vaddr.as_ptr().add(byte_offset), length) })
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        // SAFE: this region was allocated by this Hal and nobody can reference it anymore.
        unsafe { self.hal.dma_free_coherent(self.paddr, self.vaddr, self.size) };
    }
}

impl fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DmaRegion")
            .field("paddr", &self.paddr)
            .field("size", &self.size)
            .finish()
    }
}


/// A streaming DMA mapping of memory owned by someone else, e.g., a packet buffer.
///
/// The mapping does not unmap itself on drop; the owner of the underlying memory
/// must call [`DmaMapping::unmap()`] before releasing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaMapping {
    paddr: PhysicalAddress,
    len: usize,
    dir: DmaDirection,
}

impl DmaMapping {
    /// Maps `data` for the device. Returns `None` on a mapping error.
    pub fn map(hal: &dyn Hal, data: &[u8], dir: DmaDirection) -> Option<DmaMapping> {
        let vaddr = NonNull::new(data.as_ptr() as *mut u8)?;
        let paddr = hal.dma_map(vaddr, data.len(), dir)?;
        Some(DmaMapping { paddr, len: data.len(), dir })
    }

    pub fn phys_addr(&self) -> PhysicalAddress {
        self.paddr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Releases the mapping.
    pub fn unmap(self, hal: &dyn Hal) {
        hal.dma_unmap(self.paddr, self.len, self.dir);
    }
}
