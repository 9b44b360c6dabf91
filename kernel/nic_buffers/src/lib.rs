//! Defines buffers that are used to send and receive packets, and the skb-like packet
//! handles that the NIC driver exchanges with the network stack.
//!
//! * A [`TransmitPacket`] is what the stack hands to the driver: a linear head, optional
//!   fragments, and the offload requests (GSO, checksum, VLAN insertion, timestamps).
//! * A [`ReceiveBuffer`] is a DMA-mapped receive buffer that is returned to its
//!   [`BufferPool`] when dropped.
//! * A [`ReceivedPacket`] is what the driver hands to the stack: a head (copied or built
//!   around a receive buffer), any aggregation fragments, and the receive metadata.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate mpmc;
extern crate nic_hal;

mod pool;
mod packet;

#[cfg(test)]
mod test;

pub use pool::{BufferPool, RxBufferMode};
pub use packet::*;

use core::ops::{Deref, DerefMut};
use alloc::{sync::Arc, vec::Vec};
use nic_hal::{DmaRegion, HalRef, PhysicalAddress};

/// A buffer that stores a packet to be transmitted through the NIC
/// and is guaranteed to be contiguous in physical memory.
/// Auto-dereferences into a byte slice that represents its underlying memory.
pub struct TransmitBuffer {
    region: DmaRegion,
    length: u16,
}

impl TransmitBuffer {
    /// Creates a new TransmitBuffer with the specified size in bytes.
    /// The size is a `u16` because that is the maximum size of an NIC transmit buffer.
    pub fn new(hal: &HalRef, size_in_bytes: u16) -> Result<TransmitBuffer, &'static str> {
        let region = DmaRegion::new(hal, usize::from(size_in_bytes).max(1))?;
        Ok(TransmitBuffer {
            region,
            length: size_in_bytes,
        })
    }

    pub fn phys_addr(&self) -> PhysicalAddress {
        self.region.phys_addr()
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    /// Sets the buffers length.
    ///
    /// Returns an error if the length is greater than the current length.
    pub fn set_length(&mut self, length: u16) -> Result<(), &'static str> {
        if length > self.length {
            Err("TransmitBuffer::set_length(): length too long")
        } else {
            self.length = length;
            Ok(())
        }
    }
}

impl Deref for TransmitBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // The region is at least `length` bytes long, so this cannot fail.
        self.region.as_slice(0, self.length.into()).unwrap_or(&[])
    }
}

impl DerefMut for TransmitBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let length = self.length.into();
        self.region.as_slice_mut(0, length).unwrap_or(&mut [])
    }
}


/// A buffer that stores a packet (a piece of an Ethernet frame) that has been received from the NIC.
///
/// The buffer stays DMA-mapped for its whole life; only its `offset` and `length` change
/// as it is filled by the NIC and consumed by the stack.
/// Auto-dereferences into a byte slice covering `offset..offset + length`.
/// When dropped, its underlying memory is automatically returned to its [`BufferPool`] for future reuse.
pub struct ReceiveBuffer {
    mem: Vec<u8>,
    phys_addr: PhysicalAddress,
    offset: u32,
    length: u32,
    pool: Arc<BufferPool>,
}

impl ReceiveBuffer {
    /// The bus address of the start of the underlying memory.
    pub fn phys_addr(&self) -> PhysicalAddress {
        self.phys_addr
    }

    /// The bus address the NIC should write received data to, i.e., after the pool's headroom.
    pub fn dma_addr(&self) -> PhysicalAddress {
        self.phys_addr + self.pool.headroom()
    }

    /// The number of bytes the NIC may write at [`dma_addr()`](Self::dma_addr).
    pub fn capacity(&self) -> usize {
        self.mem.len() - self.pool.headroom()
    }

    /// The total amount of memory this buffer accounts for.
    pub fn truesize(&self) -> usize {
        self.mem.len()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Sets the window of valid data within the buffer.
    ///
    /// Returns an error if the window would not fit in the buffer.
    pub fn set_data(&mut self, offset: u32, length: u32) -> Result<(), &'static str> {
        let end = offset as usize + length as usize;
        if end > self.mem.len() {
            Err("ReceiveBuffer::set_data(): window exceeds buffer size")
        } else {
            self.offset = offset;
            self.length = length;
            Ok(())
        }
    }

    /// Sets the window of valid data to `length` bytes right after the headroom,
    /// which is where the NIC places received data.
    pub fn set_received_len(&mut self, length: u32) -> Result<(), &'static str> {
        let headroom = self.pool.headroom() as u32;
        self.set_data(headroom, length)
    }

    /// Returns the whole underlying memory, including headroom.
    pub fn raw(&self) -> &[u8] {
        &self.mem
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    /// The pool this buffer returns to.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Deref for ReceiveBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        let start = self.offset as usize;
        &self.mem[start..start + self.length as usize]
    }
}

impl DerefMut for ReceiveBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let start = self.offset as usize;
        &mut self.mem[start..start + self.length as usize]
    }
}

impl Drop for ReceiveBuffer {
    fn drop(&mut self) {
        // We need to return this buffer's memory to its pool. Since we cannot move the
        // memory out of `self` because it's borrowed, we replace it with an empty Vec,
        // which takes ownership of the real memory without allocating.
        let mem = core::mem::take(&mut self.mem);
        self.pool.recycle(mem, self.phys_addr);
    }
}

impl core::fmt::Debug for ReceiveBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ReceiveBuffer")
            .field("phys_addr", &self.phys_addr)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}
