//! The platform interface that the bnxt NIC crates are written against.
//!
//! Everything the driver needs from the host goes through the [`Hal`] trait:
//! coherent DMA allocations, streaming DMA mappings, MMIO accesses to the
//! device BARs, PCI config space, and time. The driver never touches a raw
//! physical address on its own; it only ever sees [`PhysicalAddress`]es handed
//! back by the `Hal` and [`DmaRegion`]s that wrap them.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;

mod address;
mod dma;

#[cfg(test)]
mod test;

pub use address::PhysicalAddress;
pub use dma::{DmaRegion, DmaMapping, DmaDirection};

use alloc::sync::Arc;
use core::ptr::NonNull;

/// The size of a page as seen by the NIC, regardless of the host page size.
pub const PAGE_SIZE: usize = 4096;
/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// The PCI BARs of the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bar {
    /// Register space: GRC window, HWRM mailbox and trigger, health registers.
    Bar0,
    /// Doorbell space.
    Bar1,
    /// Write-combined mapping of the doorbell space, used for push transmit.
    Bar2,
}

/// A reference-counted handle to the platform implementation.
pub type HalRef = Arc<dyn Hal>;

/// Everything the NIC driver needs from the platform it runs on.
///
/// Implementations must be usable from any CPU: the transmit path, the poll loops
/// and the control path may all call into the `Hal` concurrently.
pub trait Hal: Send + Sync {
    /// Allocates `size` bytes of zeroed, physically contiguous, DMA-coherent memory
    /// aligned to [`PAGE_SIZE`].
    /// Returns the bus address and the CPU-visible virtual address, or `None` if out of memory.
    fn dma_alloc_coherent(&self, size: usize) -> Option<(PhysicalAddress, NonNull<u8>)>;

    /// Releases memory previously returned by [`Hal::dma_alloc_coherent()`].
    ///
    /// # Safety
    /// The arguments must describe exactly one earlier allocation, and the memory
    /// must no longer be accessed by either the CPU or the device.
    unsafe fn dma_free_coherent(&self, paddr: PhysicalAddress, vaddr: NonNull<u8>, size: usize);

    /// Creates a streaming mapping of `len` bytes at `vaddr` for the device.
    /// Returns `None` on a mapping error (the equivalent of `dma_mapping_error()`).
    fn dma_map(&self, vaddr: NonNull<u8>, len: usize, dir: DmaDirection) -> Option<PhysicalAddress>;

    /// Tears down a mapping created by [`Hal::dma_map()`].
    fn dma_unmap(&self, paddr: PhysicalAddress, len: usize, dir: DmaDirection);

    /// Reads a 32-bit register.
    fn read32(&self, bar: Bar, offset: usize) -> u32;

    /// Writes a 32-bit register.
    fn write32(&self, bar: Bar, offset: usize, value: u32);

    /// Writes a 64-bit register, ordered after all earlier MMIO writes.
    fn write64(&self, bar: Bar, offset: usize, value: u64);

    /// Writes a 64-bit register without ordering against earlier MMIO writes.
    /// The caller is responsible for any needed fence.
    fn write64_relaxed(&self, bar: Bar, offset: usize, value: u64) {
        self.write64(bar, offset, value)
    }

    /// Copies `data` into a write-combined window as a sequence of 64-bit stores.
    fn wc_copy(&self, bar: Bar, offset: usize, data: &[u64]);

    /// Reads a 16-bit value from PCI config space.
    fn pci_read_config16(&self, offset: u16) -> u16;

    /// Enables the PCI device (memory decoding).
    fn pci_enable_device(&self) -> Result<(), &'static str>;

    /// Disables the PCI device.
    fn pci_disable_device(&self);

    /// Sets or clears the bus-master bit, which allows the device to perform DMA.
    fn pci_set_master(&self, enable: bool);

    /// Busy-waits or sleeps for at least `us` microseconds.
    fn delay_us(&self, us: u64);

    /// A monotonic timestamp in microseconds.
    fn now_us(&self) -> u64;

    /// Busy-waits or sleeps for at least `ms` milliseconds.
    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms * 1000)
    }
}

/// Copies `src` into the 32-bit register window starting at `offset`, one dword at a time.
/// A trailing partial dword is zero-padded.
pub fn iowrite32_copy(hal: &dyn Hal, bar: Bar, offset: usize, src: &[u8]) {
    for (i, chunk) in src.chunks(4).enumerate() {
        let mut dword = [0u8; 4];
        dword[..chunk.len()].copy_from_slice(chunk);
        hal.write32(bar, offset + i * 4, u32::from_le_bytes(dword));
    }
}

/// Packs `src` into little-endian 64-bit words for a [`Hal::wc_copy()`].
/// A trailing partial word is zero-padded.
pub fn to_qwords(src: &[u8], dst: &mut alloc::vec::Vec<u64>) {
    for chunk in src.chunks(8) {
        let mut qword = [0u8; 8];
        qword[..chunk.len()].copy_from_slice(chunk);
        dst.push(u64::from_le_bytes(qword));
    }
}
