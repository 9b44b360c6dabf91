//! Completion rings and notification queues: rings the NIC writes and the host reads.

use core::sync::atomic::{fence, Ordering};
use zerocopy::FromBytes;
use nic_hal::HalRef;
use bnxt_hsi::cmpl::{cmp_valid, CmplType, CMPL_VALID_OFFSET};
use bnxt_hsi::hwrm::INVALID_HW_RING_ID;
use crate::{Doorbell, RingError, RingMem};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpKind {
    /// A notification queue (P5+), whose entries point at CQs.
    Nq,
    /// A completion queue: TX, RX and, on P4 chips, firmware completions.
    Cq,
}

pub struct CpRing {
    pub kind: CpKind,
    mem: RingMem,
    len: u32,
    /// The raw consumer index: its ring-size bit tells which pass the host is reading.
    pub raw_cons: u32,
    db: Option<Doorbell>,
    fw_ring_id: u16,
    /// Set when the poll loop ran out of budget with completions still on this ring.
    pub has_more_work: bool,
    /// Set when this ring was drained in the current poll and needs its consumer published.
    pub touched: bool,
}

impl CpRing {
    pub fn new(hal: &HalRef, kind: CpKind, entries: usize) -> Result<CpRing, RingError> {
        Ok(CpRing {
            kind,
            mem: RingMem::for_ring(hal, entries)?,
            len: entries as u32,
            raw_cons: 0,
            db: None,
            fw_ring_id: INVALID_HW_RING_ID,
            has_more_work: false,
            touched: false,
        })
    }

    pub fn mem(&self) -> &RingMem {
        &self.mem
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn fw_ring_id(&self) -> u16 {
        self.fw_ring_id
    }

    pub fn set_fw_ring_id(&mut self, id: u16) {
        self.fw_ring_id = id;
    }

    pub fn set_doorbell(&mut self, db: Doorbell) {
        self.db = Some(db);
    }

    pub fn doorbell(&self) -> Option<&Doorbell> {
        self.db.as_ref()
    }

    fn slot(&self, raw: u32) -> usize {
        (raw & (self.len - 1)) as usize
    }

    /// Checks the valid bit of the slot at raw index `raw` for the pass `raw` belongs to.
    /// A `true` result is followed by an acquire fence, so the rest of the record may be read.
    pub fn is_valid(&self, raw: u32) -> bool {
        let dword = self.mem.read_dword(self.slot(raw), CMPL_VALID_OFFSET);
        if cmp_valid(dword, raw, self.len) {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// The raw type of the record at the consumer index, if it is valid.
    pub fn peek_type(&self) -> Option<u8> {
        if !self.is_valid(self.raw_cons) {
            return None;
        }
        Some(CmplType::raw(self.mem.read_dword(self.slot(self.raw_cons), 0)))
    }

    /// Reads the 16-byte slot at raw index `raw`. The caller must have checked its valid bit.
    pub fn read<T: FromBytes + Copy>(&self, raw: u32) -> T {
        self.mem.read_slot(self.slot(raw))
    }

    pub fn advance(&mut self, slots: u32) {
        self.raw_cons = self.raw_cons.wrapping_add(slots);
    }

    /// Publishes the consumer index, re-arming the interrupt if `arm` is set.
    pub fn ack(&self, arm: bool) {
        let Some(db) = &self.db else { return };
        match self.kind {
            CpKind::Nq => db.nq(self.raw_cons, arm),
            CpKind::Cq => db.cq(self.raw_cons, arm),
        }
    }

    /// Rewinds the ring to its just-allocated state.
    pub fn reset(&mut self) {
        self.mem.reset();
        self.raw_cons = 0;
        self.has_more_work = false;
        self.touched = false;
    }
}
