//! Pools of DMA-mapped receive buffers.

use core::{
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use alloc::{sync::Arc, vec, vec::Vec};
use mpmc::Queue;
use nic_hal::{DmaDirection, HalRef, PhysicalAddress, PAGE_SIZE};
use crate::ReceiveBuffer;

/// The most buffers a growable pool keeps for reuse; buffers returned beyond that are unmapped.
pub const MAX_POOLED_BUFFERS: usize = 4096;

/// How receive buffers are allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxBufferMode {
    /// Buffers just large enough for one MTU-sized frame plus headroom.
    Frag,
    /// One full page per buffer, used with XDP and large MTUs.
    PagePool,
    /// A fixed set of frames shared with a userspace consumer; the pool never grows.
    Xsk,
}

/// A pool of equally-sized, DMA-mapped receive buffers.
///
/// Buffers stay mapped while they cycle between the pool, the NIC and the stack.
/// Memory is only unmapped when the pool is closed or dropped.
pub struct BufferPool {
    hal: HalRef,
    mode: RxBufferMode,
    buf_size: usize,
    headroom: usize,
    dir: DmaDirection,
    free: Queue<(Vec<u8>, PhysicalAddress)>,
    /// The number of buffers sitting in `free`.
    pooled: AtomicUsize,
    /// The number of buffers currently handed out.
    outstanding: AtomicUsize,
    closed: AtomicBool,
}

impl BufferPool {
    /// Creates a new, empty pool that allocates buffers on demand.
    ///
    /// # Arguments
    /// * `hal`: the platform used to map buffers for DMA.
    /// * `mode`: [`RxBufferMode::Frag`] or [`RxBufferMode::PagePool`]; use [`BufferPool::new_xsk()`] for XSK.
    /// * `buf_size`: the size of each buffer including headroom. Page-pool buffers are always one page.
    /// * `headroom`: the number of bytes reserved in front of received data.
    /// * `dir`: the DMA direction, `Bidirectional` if buffers may be retransmitted by XDP.
    pub fn new(hal: HalRef, mode: RxBufferMode, buf_size: usize, headroom: usize, dir: DmaDirection) -> Arc<BufferPool> {
        let buf_size = match mode {
            RxBufferMode::PagePool => PAGE_SIZE.max(buf_size),
            _ => buf_size,
        };
        Arc::new(BufferPool {
            hal,
            mode,
            buf_size,
            headroom,
            dir,
            free: Queue::with_capacity(MAX_POOLED_BUFFERS),
            pooled: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a pool of exactly `frames` pre-mapped buffers that never grows.
    pub fn new_xsk(hal: HalRef, frame_size: usize, headroom: usize, frames: usize) -> Result<Arc<BufferPool>, &'static str> {
        let pool = Arc::new(BufferPool {
            hal,
            mode: RxBufferMode::Xsk,
            buf_size: frame_size,
            headroom,
            dir: DmaDirection::Bidirectional,
            free: Queue::with_capacity(frames.max(2).next_power_of_two()),
            pooled: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        for _ in 0..frames {
            let frame = pool.map_new().ok_or("BufferPool::new_xsk(): failed to map XSK frame")?;
            pool.put(frame);
        }
        Ok(pool)
    }

    pub fn mode(&self) -> RxBufferMode {
        self.mode
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn headroom(&self) -> usize {
        self.headroom
    }

    /// The number of buffers sitting in the pool.
    pub fn available(&self) -> usize {
        self.pooled.load(Ordering::Relaxed)
    }

    /// The number of buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn map_new(&self) -> Option<(Vec<u8>, PhysicalAddress)> {
        let mem = vec![0u8; self.buf_size];
        let vaddr = NonNull::new(mem.as_ptr() as *mut u8)?;
        let paddr = self.hal.dma_map(vaddr, mem.len(), self.dir)?;
        Some((mem, paddr))
    }

    /// Takes a buffer out of the pool, allocating and mapping a new one if the pool is empty.
    ///
    /// Returns `None` if the pool is closed, if an XSK pool is exhausted,
    /// or if a new buffer could not be allocated or mapped.
    pub fn alloc(self: &Arc<Self>) -> Option<ReceiveBuffer> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let recycled = self.take();
        let (mem, phys_addr) = match recycled {
            Some(entry) => entry,
            None if self.mode == RxBufferMode::Xsk => return None,
            None => self.map_new()?,
        };
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Some(ReceiveBuffer {
            mem,
            phys_addr,
            offset: self.headroom as u32,
            length: 0,
            pool: self.clone(),
        })
    }

    /// Returns a buffer's memory to the pool, or unmaps it if the pool is closed.
    pub(crate) fn recycle(&self, mem: Vec<u8>, phys_addr: PhysicalAddress) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            self.hal.dma_unmap(phys_addr, mem.len(), self.dir);
            return;
        }
        self.put((mem, phys_addr));
    }

    fn take(&self) -> Option<(Vec<u8>, PhysicalAddress)> {
        let entry = self.free.pop()?;
        self.pooled.fetch_sub(1, Ordering::Relaxed);
        Some(entry)
    }

    fn put(&self, entry: (Vec<u8>, PhysicalAddress)) {
        match self.free.push(entry) {
            Ok(()) => {
                self.pooled.fetch_add(1, Ordering::Relaxed);
            }
            Err((mem, phys_addr)) => self.hal.dma_unmap(phys_addr, mem.len(), self.dir),
        }
    }

    /// Closes the pool: unmaps every buffer it holds now, and every buffer returned to it later.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut unmapped = 0;
        while let Some((mem, phys_addr)) = self.take() {
            self.hal.dma_unmap(phys_addr, mem.len(), self.dir);
            unmapped += 1;
        }
        debug!("BufferPool::close(): unmapped {} buffers, {} still outstanding", unmapped, self.outstanding());
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.close();
    }
}
