//! The software side of a TX ring.
//!
//! The shadow array has one [`TxSoftDesc`] per ring slot. Slots in `[cons, prod)` belong to
//! the poll loop, which reclaims them as completions arrive; all other slots belong to the
//! transmit path. Neither side touches the other's slots, so the array needs no lock: the
//! transmit path publishes `prod` with release ordering after filling a slot, and the poll
//! loop publishes `cons` with release ordering after emptying one.

use alloc::{boxed::Box, vec::Vec};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use spin::{Mutex, MutexGuard};
use zerocopy::AsBytes;
use nic_hal::{DmaMapping, HalRef};
use nic_buffers::TransmitPacket;
use bnxt_hsi::hwrm::INVALID_HW_RING_ID;
use crate::{Doorbell, PushBuffer, RingError, RingMem};

/// Builds the opaque value of a packet: its NAPI, its BD count, and the slot of its first BD.
pub fn tx_opaque(napi: u16, bds: u32, idx: u32) -> u32 {
    ((napi as u32 & 0xff) << 24) | ((bds & 0xff) << 16) | (idx & 0xffff)
}

pub fn tx_opaque_idx(opaque: u32) -> u32 {
    opaque & 0xffff
}

pub fn tx_opaque_bds(opaque: u32) -> u32 {
    (opaque >> 16) & 0xff
}

pub fn tx_opaque_napi(opaque: u32) -> u16 {
    (opaque >> 24) as u16
}

/// The shadow of one TX ring slot. Only the slot of a packet's first BD is populated.
#[derive(Default)]
pub struct TxSoftDesc {
    pub packet: Option<TransmitPacket>,
    pub head_map: Option<DmaMapping>,
    pub frag_maps: Vec<DmaMapping>,
    /// The number of ring slots the packet occupies.
    pub nr_bds: u16,
    pub nr_frags: u16,
    pub is_push: bool,
    /// The number of slots taken by inline data of a pushed packet.
    pub inline_bds: u16,
    pub is_ts_pkt: bool,
    pub opaque: u32,
}

impl TxSoftDesc {
    /// Unmaps the packet and takes it out of the slot.
    pub fn release(&mut self, hal: &HalRef) -> Option<TransmitPacket> {
        if let Some(map) = self.head_map.take() {
            map.unmap(&**hal);
        }
        for map in self.frag_maps.drain(..) {
            map.unmap(&**hal);
        }
        self.nr_bds = 0;
        self.nr_frags = 0;
        self.is_push = false;
        self.inline_bds = 0;
        self.is_ts_pkt = false;
        self.packet.take()
    }
}

pub struct TxRing {
    /// The transmit queue this ring serves.
    pub index: u16,
    /// The NAPI that reclaims this ring.
    pub napi: u16,
    hal: HalRef,
    mem: RingMem,
    len: u32,
    shadow: Box<[UnsafeCell<TxSoftDesc>]>,
    prod: AtomicU32,
    cons: AtomicU32,
    /// Serializes senders on this queue.
    xmit_lock: Mutex<()>,
    stopped: AtomicBool,
    kick_pending: AtomicBool,
    fw_ring_id: AtomicU16,
    db: Option<Doorbell>,
    push: Option<PushBuffer>,
}

// SAFE: the shadow array is split between the transmit path and the poll loop by the
// producer/consumer indices, see the module documentation.
unsafe impl Sync for TxRing {}
unsafe impl Send for TxRing {}

impl TxRing {
    pub fn new(hal: &HalRef, index: u16, napi: u16, entries: usize) -> Result<TxRing, RingError> {
        let mem = RingMem::for_ring(hal, entries)?;
        let shadow = (0..entries).map(|_| UnsafeCell::new(TxSoftDesc::default())).collect::<Vec<_>>();
        Ok(TxRing {
            index,
            napi,
            hal: hal.clone(),
            mem,
            len: entries as u32,
            shadow: shadow.into_boxed_slice(),
            prod: AtomicU32::new(0),
            cons: AtomicU32::new(0),
            xmit_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
            kick_pending: AtomicBool::new(false),
            fw_ring_id: AtomicU16::new(INVALID_HW_RING_ID),
            db: None,
            push: None,
        })
    }

    pub fn mem(&self) -> &RingMem {
        &self.mem
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn slot(&self, raw: u32) -> usize {
        (raw & (self.len - 1)) as usize
    }

    pub fn fw_ring_id(&self) -> u16 {
        self.fw_ring_id.load(Ordering::Relaxed)
    }

    pub fn set_fw_ring_id(&self, id: u16) {
        self.fw_ring_id.store(id, Ordering::Relaxed);
    }

    pub fn set_doorbell(&mut self, db: Doorbell) {
        self.db = Some(db);
    }

    pub fn doorbell(&self) -> Option<&Doorbell> {
        self.db.as_ref()
    }

    pub fn set_push_buffer(&mut self, push: Option<PushBuffer>) {
        self.push = push;
    }

    pub fn push_buffer(&self) -> Option<&PushBuffer> {
        self.push.as_ref()
    }

    pub fn hal(&self) -> &HalRef {
        &self.hal
    }

    pub fn prod(&self) -> u32 {
        self.prod.load(Ordering::Acquire)
    }

    pub fn cons(&self) -> u32 {
        self.cons.load(Ordering::Acquire)
    }

    /// The number of host-owned slots.
    pub fn in_flight(&self) -> u32 {
        self.prod().wrapping_sub(self.cons())
    }

    /// The number of free slots; one slot always stays empty.
    pub fn avail(&self) -> u32 {
        self.len - 1 - self.in_flight()
    }

    pub fn lock_xmit(&self) -> MutexGuard<'_, ()> {
        self.xmit_lock.lock()
    }

    pub fn write_bd<T: AsBytes>(&self, raw: u32, bd: &T) {
        self.mem.write_slot(self.slot(raw), bd);
    }

    /// Returns the shadow of the slot at raw index `raw`.
    ///
    /// # Safety
    /// The caller must own the slot: the transmit path may only touch slots outside
    /// `[cons, prod)`, the poll loop only slots inside it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn soft_desc(&self, raw: u32) -> &mut TxSoftDesc {
        &mut *self.shadow[self.slot(raw)].get()
    }

    /// Hands the slots up to `raw` to the poll loop.
    pub fn publish(&self, raw: u32) {
        self.prod.store(raw, Ordering::Release);
    }

    /// Returns the slots up to `raw` to the transmit path.
    pub fn complete(&self, raw: u32) {
        self.cons.store(raw, Ordering::Release);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn wake(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Notes that a doorbell was deferred because more packets were coming.
    pub fn defer_kick(&self) {
        self.kick_pending.store(true, Ordering::Release);
    }

    /// Clears and returns whether a doorbell was deferred.
    pub fn take_kick(&self) -> bool {
        self.kick_pending.swap(false, Ordering::AcqRel)
    }

    /// Rings the producer doorbell with the current producer index.
    pub fn kick(&self) {
        self.kick_pending.store(false, Ordering::Release);
        if let Some(db) = &self.db {
            db.write(self.prod());
        }
    }

    /// Reclaims every packet the NIC has not completed, e.g., when the ring is being freed.
    /// Returns the number of packets freed.
    pub fn drain(&self) -> usize {
        let _guard = self.lock_xmit();
        let prod = self.prod();
        let mut cons = self.cons();
        let mut freed = 0;
        while cons != prod {
            // SAFE: the transmit path is locked out and the slot is in [cons, prod).
            let desc = unsafe { self.soft_desc(cons) };
            let bds = desc.nr_bds.max(1) as u32;
            if desc.release(&self.hal).is_some() {
                freed += 1;
            }
            cons = cons.wrapping_add(bds);
            if prod.wrapping_sub(cons) > self.len {
                // A corrupt BD count walked past the producer.
                cons = prod;
            }
        }
        self.complete(prod);
        if freed > 0 {
            debug!("TxRing {}: reclaimed {} in-flight packets", self.index, freed);
        }
        freed
    }
}

impl Drop for TxRing {
    fn drop(&mut self) {
        self.drain();
    }
}
