//! The software side of an RX ring and its aggregation ring.
//!
//! RX BDs carry the slot of their buffer as their opaque value, and the NIC consumes RX BDs
//! in order, so the opaque of each RX completion must match `rx_next_cons`.
//!
//! AGG buffers are not consumed in ring order once TPA is involved, so the slot a buffer
//! sits in (its opaque) is decoupled from the ring position of its BD: a bitmap tracks which
//! slots hold a posted buffer, and a new buffer takes the first free slot at or after the
//! producer position.

use alloc::{sync::Arc, vec::Vec};
use bit_field::BitField;
use nic_hal::HalRef;
use nic_buffers::{BufferPool, ReceiveBuffer};
use bnxt_hsi::Le32;
use bnxt_hsi::Le64;
use bnxt_hsi::hwrm::INVALID_HW_RING_ID;
use bnxt_hsi::rx::*;
use crate::{Doorbell, RingError, RingMem, TpaTable};

/// The shape of an RX ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxRingParams {
    /// The receive queue this ring serves.
    pub index: u16,
    pub entries: usize,
    /// The size of the aggregation ring, or 0 for none.
    pub agg_entries: usize,
    /// The number of concurrent TPA aggregations, or 0 if TPA is off.
    pub max_tpa: usize,
}

struct AggRing {
    mem: RingMem,
    len: u32,
    bufs: Vec<Option<ReceiveBuffer>>,
    bmap: Vec<u64>,
    prod: u32,
    pool: Arc<BufferPool>,
    db: Option<Doorbell>,
    fw_ring_id: u16,
}

impl AggRing {
    fn slot_in_use(&self, slot: usize) -> bool {
        self.bmap[slot / 64].get_bit(slot % 64)
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        self.bmap[slot / 64].set_bit(slot % 64, used);
    }

    fn next_free_slot(&self, from: usize) -> Option<usize> {
        let len = self.len as usize;
        (0..len).map(|i| (from + i) % len).find(|s| !self.slot_in_use(*s))
    }

    fn post(&mut self, buf: ReceiveBuffer) -> Result<(), ReceiveBuffer> {
        let pos = (self.prod & (self.len - 1)) as usize;
        let Some(slot) = self.next_free_slot(pos) else { return Err(buf) };
        let bd = RxBd {
            len_flags_type: Le32::new(RxBd::len_flags_type_for(RX_BD_TYPE_RX_AGG_BD, buf.capacity() as u32)),
            opaque: Le32::new(slot as u32),
            haddr: Le64::new(buf.dma_addr().value()),
        };
        self.mem.write_slot(pos, &bd);
        self.set_slot(slot, true);
        self.bufs[slot] = Some(buf);
        self.prod = self.prod.wrapping_add(1);
        Ok(())
    }

    fn take(&mut self, slot: u32) -> Option<ReceiveBuffer> {
        let slot = (slot & (self.len - 1)) as usize;
        self.set_slot(slot, false);
        self.bufs[slot].take()
    }
}

pub struct RxRing {
    pub index: u16,
    mem: RingMem,
    len: u32,
    bufs: Vec<Option<ReceiveBuffer>>,
    pool: Arc<BufferPool>,
    rx_prod: u32,
    rx_next_cons: u32,
    agg: Option<AggRing>,
    pub tpa: Option<TpaTable>,
    db: Option<Doorbell>,
    fw_ring_id: u16,
}

impl RxRing {
    /// Allocates the descriptor memory of an RX ring and, if asked for, its AGG ring.
    /// No buffers are posted until [`fill()`](Self::fill).
    pub fn new(hal: &HalRef, params: RxRingParams, pool: Arc<BufferPool>, agg_pool: Option<Arc<BufferPool>>) -> Result<RxRing, RingError> {
        let mem = RingMem::for_ring(hal, params.entries)?;
        let agg = match (params.agg_entries, agg_pool) {
            (0, _) | (_, None) => None,
            (entries, Some(pool)) => Some(AggRing {
                mem: RingMem::for_ring(hal, entries)?,
                len: entries as u32,
                bufs: (0..entries).map(|_| None).collect(),
                bmap: alloc::vec![0; (entries + 63) / 64],
                prod: 0,
                pool,
                db: None,
                fw_ring_id: INVALID_HW_RING_ID,
            }),
        };
        let tpa = if params.max_tpa > 0 && agg.is_some() { Some(TpaTable::new(params.max_tpa)) } else { None };
        Ok(RxRing {
            index: params.index,
            mem,
            len: params.entries as u32,
            bufs: (0..params.entries).map(|_| None).collect(),
            pool,
            rx_prod: 0,
            rx_next_cons: 0,
            agg,
            tpa,
            db: None,
            fw_ring_id: INVALID_HW_RING_ID,
        })
    }

    pub fn mem(&self) -> &RingMem {
        &self.mem
    }

    pub fn agg_mem(&self) -> Option<&RingMem> {
        self.agg.as_ref().map(|a| &a.mem)
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn agg_len(&self) -> u32 {
        self.agg.as_ref().map_or(0, |a| a.len)
    }

    pub fn has_agg(&self) -> bool {
        self.agg.is_some()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn agg_pool(&self) -> Option<&Arc<BufferPool>> {
        self.agg.as_ref().map(|a| &a.pool)
    }

    pub fn fw_ring_id(&self) -> u16 {
        self.fw_ring_id
    }

    pub fn agg_fw_ring_id(&self) -> u16 {
        self.agg.as_ref().map_or(INVALID_HW_RING_ID, |a| a.fw_ring_id)
    }

    pub fn set_fw_ring_id(&mut self, id: u16) {
        self.fw_ring_id = id;
    }

    pub fn set_agg_fw_ring_id(&mut self, id: u16) {
        if let Some(agg) = self.agg.as_mut() {
            agg.fw_ring_id = id;
        }
    }

    pub fn set_doorbell(&mut self, db: Doorbell) {
        self.db = Some(db);
    }

    pub fn set_agg_doorbell(&mut self, db: Doorbell) {
        if let Some(agg) = self.agg.as_mut() {
            agg.db = Some(db);
        }
    }

    pub fn doorbell(&self) -> Option<&Doorbell> {
        self.db.as_ref()
    }

    pub fn agg_doorbell(&self) -> Option<&Doorbell> {
        self.agg.as_ref().and_then(|a| a.db.as_ref())
    }

    pub fn rx_prod(&self) -> u32 {
        self.rx_prod
    }

    pub fn rx_next_cons(&self) -> u32 {
        self.rx_next_cons
    }

    pub fn agg_prod(&self) -> u32 {
        self.agg.as_ref().map_or(0, |a| a.prod)
    }

    /// The slot index of raw RX index `raw`.
    pub fn slot(&self, raw: u32) -> u32 {
        raw & (self.len - 1)
    }

    /// The number of RX buffers currently posted.
    pub fn rx_posted(&self) -> usize {
        self.bufs.iter().filter(|b| b.is_some()).count()
    }

    /// The number of AGG buffers currently posted.
    pub fn agg_posted(&self) -> usize {
        self.agg.as_ref().map_or(0, |a| a.bufs.iter().filter(|b| b.is_some()).count())
    }

    /// Posts `buf` at the RX producer index.
    fn post_rx(&mut self, buf: ReceiveBuffer) {
        let slot = self.slot(self.rx_prod);
        let bd = RxBd {
            len_flags_type: Le32::new(RxBd::len_flags_type_for(RX_BD_TYPE_RX_PACKET_BD, buf.capacity() as u32)),
            opaque: Le32::new(slot),
            haddr: Le64::new(buf.dma_addr().value()),
        };
        self.mem.write_slot(slot as usize, &bd);
        self.bufs[slot as usize] = Some(buf);
        self.rx_prod = self.rx_prod.wrapping_add(1);
    }

    /// Posts a fresh buffer at the RX producer index.
    pub fn alloc_rx(&mut self) -> Result<(), RingError> {
        let buf = self.pool.alloc().ok_or(RingError::OutOfMemory)?;
        self.post_rx(buf);
        Ok(())
    }

    /// Posts a buffer the stack did not keep back at the RX producer index.
    pub fn reuse_rx(&mut self, mut buf: ReceiveBuffer) {
        let _ = buf.set_received_len(0);
        self.post_rx(buf);
    }

    /// Takes the buffer of the RX completion with opaque `opaque`, advancing `rx_next_cons`.
    pub fn take_rx(&mut self, opaque: u32) -> Option<ReceiveBuffer> {
        let slot = self.slot(opaque) as usize;
        let buf = self.bufs[slot].take();
        self.rx_next_cons = self.rx_next_cons.wrapping_add(1);
        buf
    }

    /// Posts a fresh buffer at the AGG producer index.
    pub fn alloc_agg(&mut self) -> Result<(), RingError> {
        let agg = self.agg.as_mut().ok_or(RingError::InvalidSize)?;
        let buf = agg.pool.alloc().ok_or(RingError::OutOfMemory)?;
        agg.post(buf).map_err(|_buf| RingError::OutOfMemory)
    }

    /// Posts a buffer the stack did not keep back on the AGG ring.
    pub fn reuse_agg(&mut self, mut buf: ReceiveBuffer) {
        let _ = buf.set_received_len(0);
        if let Some(agg) = self.agg.as_mut() {
            if agg.post(buf).is_err() {
                warn!("RxRing {}: no free AGG slot to recycle a buffer into", self.index);
            }
        }
    }

    /// Takes the AGG buffer posted in slot `opaque`.
    pub fn take_agg(&mut self, opaque: u32) -> Option<ReceiveBuffer> {
        self.agg.as_mut().and_then(|a| a.take(opaque))
    }

    /// Posts buffers into every RX and AGG slot but one. Returns the number of RX buffers
    /// posted, which is short of the ring size when the pool runs dry.
    pub fn fill(&mut self) -> usize {
        let mut posted = 0;
        while (posted as u32) < self.len - 1 {
            if self.alloc_rx().is_err() {
                warn!("RxRing {}: only {} of {} RX buffers could be allocated", self.index, posted, self.len - 1);
                break;
            }
            posted += 1;
        }
        let agg_len = self.agg_len();
        for i in 0..agg_len.saturating_sub(1) {
            if self.alloc_agg().is_err() {
                warn!("RxRing {}: only {} of {} AGG buffers could be allocated", self.index, i, agg_len - 1);
                break;
            }
        }
        posted
    }

    /// Publishes the RX and AGG producer indices.
    pub fn write_doorbells(&self) {
        if let Some(agg) = &self.agg {
            if let Some(db) = &agg.db {
                db.write(agg.prod);
            }
        }
        if let Some(db) = &self.db {
            db.write(self.rx_prod);
        }
    }

    /// Returns every posted buffer and open aggregation to the pools and rewinds the ring
    /// to its just-allocated state, ready to be filled again.
    pub fn reset(&mut self) {
        self.drop_buffers();
        self.mem.reset();
        self.rx_prod = 0;
        self.rx_next_cons = 0;
        if let Some(agg) = self.agg.as_mut() {
            agg.mem.reset();
            agg.prod = 0;
        }
    }

    fn drop_buffers(&mut self) -> usize {
        let mut dropped = 0;
        for buf in self.bufs.iter_mut() {
            dropped += buf.take().is_some() as usize;
        }
        if let Some(agg) = self.agg.as_mut() {
            for buf in agg.bufs.iter_mut() {
                dropped += buf.take().is_some() as usize;
            }
            for word in agg.bmap.iter_mut() {
                *word = 0;
            }
        }
        if let Some(tpa) = self.tpa.as_mut() {
            dropped += tpa.clear();
        }
        dropped
    }

    /// Returns every buffer to its pool and closes the pools, which unmaps them.
    pub fn free_buffers(&mut self) {
        let dropped = self.drop_buffers();
        self.pool.close();
        if let Some(agg) = &self.agg {
            agg.pool.close();
        }
        debug!("RxRing {}: released {} buffers", self.index, dropped);
    }
}

impl Drop for RxRing {
    fn drop(&mut self) {
        self.free_buffers();
    }
}
