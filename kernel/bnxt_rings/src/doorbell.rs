//! Doorbells: the MMIO writes that publish ring indices to the NIC.
//!
//! A P4 chip has one 32-bit doorbell cell per ring. P5 and newer chips share a single 64-bit
//! doorbell register per function, and every write names its ring through the key in the
//! upper half. P7 chips additionally want the epoch of the index (which pass over the ring
//! it belongs to) and, when arming a CQ, the toggle that firmware last reported for it.
//!
//! Every write is preceded by a release fence, so that all descriptor writes made before
//! ringing the doorbell are visible to the NIC when it reacts to it.

use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use nic_hal::{to_qwords, Bar, HalRef};
use bnxt_hsi::ChipKind;
use bnxt_hsi::db::*;

/// The longest packet sent through a legacy push.
pub const PUSH_THRESH_LEGACY: usize = 164;
/// The longest packet sent through a WCB or PPP push.
pub const PUSH_THRESH_WCB: usize = 208;

/// The ring a doorbell belongs to, which decides how its writes are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbKind {
    Tx,
    Rx,
    Agg,
    Cq,
    Nq,
}

pub struct Doorbell {
    hal: HalRef,
    chip: ChipKind,
    kind: DbKind,
    offset: usize,
    key64: u64,
    key32: u32,
    ring_len: u32,
    /// The last raw index published, replayed by doorbell-drop recovery.
    last: AtomicU32,
    armed: AtomicBool,
    toggle: AtomicU8,
}

impl Doorbell {
    /// Creates the doorbell of a ring with `ring_len` slots.
    ///
    /// # Arguments
    /// * `fw_ring_id`: the ring id firmware assigned, which P5+ doorbells carry in their key.
    /// * `logical_id`: the doorbell cell index of the ring on P4 chips.
    /// * `vf`: whether the function is a virtual function, which moves the P5+ doorbell page.
    pub fn new(hal: &HalRef, chip: ChipKind, kind: DbKind, fw_ring_id: u16, logical_id: u16, ring_len: u32, vf: bool) -> Doorbell {
        let (offset, key64, key32) = if chip.is_p5_plus() {
            let db_type = match kind {
                DbKind::Tx => DBR_TYPE_SQ,
                DbKind::Rx | DbKind::Agg => DBR_TYPE_SRQ,
                DbKind::Cq => DBR_TYPE_CQ,
                DbKind::Nq => DBR_TYPE_NQ,
            };
            let offset = if vf { DB_VF_OFFSET_P5 } else { DB_PF_OFFSET_P5 };
            (offset, db_key64(db_type, fw_ring_id as u32), 0)
        } else {
            let key = match kind {
                DbKind::Tx => DB_KEY_TX,
                DbKind::Rx | DbKind::Agg => DB_KEY_RX,
                DbKind::Cq | DbKind::Nq => DB_KEY_CP,
            };
            (logical_id as usize * DB_LEGACY_STRIDE, 0, key)
        };
        Doorbell {
            hal: hal.clone(),
            chip,
            kind,
            offset,
            key64,
            key32,
            ring_len,
            last: AtomicU32::new(0),
            armed: AtomicBool::new(false),
            toggle: AtomicU8::new(0),
        }
    }

    pub fn kind(&self) -> DbKind {
        self.kind
    }

    /// The BAR1 offset this doorbell is written to.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The 64-bit key (zero on P4 chips).
    pub fn key(&self) -> u64 {
        self.key64
    }

    /// The last raw index written.
    pub fn last(&self) -> u32 {
        self.last.load(Ordering::Acquire)
    }

    /// Whether the last consumer update re-armed the interrupt.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }

    /// Records the toggle that firmware reported for this CQ in its last notification.
    pub fn set_toggle(&self, toggle: u8) {
        self.toggle.store(toggle, Ordering::Relaxed);
    }

    pub fn toggle(&self) -> u8 {
        self.toggle.load(Ordering::Relaxed)
    }

    /// The index field of a 64-bit doorbell, with the epoch bit on P7 chips.
    fn index64(&self, raw: u32) -> u64 {
        let mut value = (raw & (self.ring_len - 1)) as u64;
        if self.chip.is_p7() && raw & self.ring_len != 0 {
            value |= DBR_EPOCH_MASK;
        }
        value
    }

    fn ring64(&self, db_type: u64, raw: u32, toggle: Option<u8>) {
        let mut value = db_key64_with_type(self.key64, db_type) | self.index64(raw);
        if let (true, Some(t)) = (self.chip.is_p7(), toggle) {
            value |= ((t as u64) << DBR_TOGGLE_SHIFT) & DBR_TOGGLE_MASK;
        }
        fence(Ordering::Release);
        self.hal.write64_relaxed(Bar::Bar1, self.offset, value);
    }

    fn ring32(&self, value: u32) {
        fence(Ordering::Release);
        self.hal.write32(Bar::Bar1, self.offset, value);
    }

    /// Publishes producer index `raw` of a TX, RX or AGG ring.
    pub fn write(&self, raw: u32) {
        self.last.store(raw, Ordering::Release);
        if self.chip.is_p5_plus() {
            let db_type = match self.kind {
                DbKind::Tx => DBR_TYPE_SQ,
                _ => DBR_TYPE_SRQ,
            };
            self.ring64(db_type, raw, None);
        } else {
            self.ring32(self.key32 | (raw & (self.ring_len - 1)));
        }
    }

    /// Advances the consumer index of a CQ (or of a P4 completion ring), optionally re-arming
    /// its interrupt.
    pub fn cq(&self, raw: u32, arm: bool) {
        self.last.store(raw, Ordering::Release);
        self.armed.store(arm, Ordering::Relaxed);
        if self.chip.is_p5_plus() {
            let db_type = if arm { DBR_TYPE_CQ_ARMALL } else { DBR_TYPE_CQ };
            self.ring64(db_type, raw, Some(self.toggle()));
        } else {
            let mut value = self.key32 | DB_IDX_VALID | (raw & (self.ring_len - 1));
            if !arm {
                value |= DB_IRQ_DIS;
            }
            self.ring32(value);
        }
    }

    /// Masks the interrupt of a P4 completion ring without moving its consumer index.
    pub fn cq_disable_irq(&self) {
        self.armed.store(false, Ordering::Relaxed);
        if !self.chip.is_p5_plus() {
            self.ring32(self.key32 | DB_IRQ_DIS);
        }
    }

    /// Advances the consumer index of an NQ, optionally re-arming its interrupt.
    pub fn nq(&self, raw: u32, arm: bool) {
        if !self.chip.is_p5_plus() {
            return self.cq(raw, arm);
        }
        self.last.store(raw, Ordering::Release);
        self.armed.store(arm, Ordering::Relaxed);
        let db_type = if arm { DBR_TYPE_NQ_ARM } else { DBR_TYPE_NQ };
        self.ring64(db_type, raw, None);
    }

    /// Masks the interrupt of an NQ, leaving its consumer index where it is.
    pub fn nq_mask(&self) {
        self.armed.store(false, Ordering::Relaxed);
        if self.chip.is_p5_plus() {
            self.ring64(DBR_TYPE_NQ_MASK, self.last(), None);
        } else {
            self.cq_disable_irq();
        }
    }

    /// Writes the last published index again, arming completion rings, so that firmware
    /// re-reads a doorbell it may have dropped.
    pub fn replay(&self) {
        let raw = self.last();
        match self.kind {
            DbKind::Tx | DbKind::Rx | DbKind::Agg => self.write(raw),
            DbKind::Cq => self.cq(raw, true),
            DbKind::Nq => self.nq(raw, true),
        }
    }

    pub fn push_start(&self, raw: u32) {
        self.ring64(DBR_TYPE_PUSH_START, raw, None);
    }

    pub fn push_end(&self, raw: u32) {
        self.last.store(raw, Ordering::Release);
        self.ring64(DBR_TYPE_PUSH_END, raw, None);
    }

    /// Records a producer index that was published through a legacy push.
    pub(crate) fn record(&self, raw: u32) {
        self.last.store(raw, Ordering::Release);
    }

    /// The doorbell word embedded at the head of a legacy push.
    pub fn legacy_push_word(&self, raw: u32) -> u32 {
        DB_KEY_TX_PUSH | DB_LONG_TX_PUSH | (raw & (self.ring_len - 1))
    }
}

impl core::fmt::Debug for Doorbell {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Doorbell")
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("key", &self.key64)
            .field("last", &self.last())
            .finish()
    }
}


/// How a TX ring may push small packets through the doorbell window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushMode {
    None,
    /// Inline data behind a 32-bit doorbell word, written to the ring's P4 doorbell cell.
    Legacy,
    /// A write-combining buffer page, framed by PUSH_START and PUSH_END doorbells.
    Wcb,
    /// Like `Wcb`, but alternating between the two halves of the page.
    Ppp,
}

impl PushMode {
    /// The longest packet this mode pushes.
    pub fn threshold(self) -> usize {
        match self {
            PushMode::None => 0,
            PushMode::Legacy => PUSH_THRESH_LEGACY,
            PushMode::Wcb | PushMode::Ppp => PUSH_THRESH_WCB,
        }
    }
}

/// The write-combined window a TX ring pushes packets into.
pub struct PushBuffer {
    hal: HalRef,
    mode: PushMode,
    bar: Bar,
    offset: usize,
    half: AtomicUsize,
}

impl PushBuffer {
    /// The legacy push window of a P4 TX ring, which is its doorbell cell.
    pub fn legacy(hal: &HalRef, db: &Doorbell) -> PushBuffer {
        PushBuffer { hal: hal.clone(), mode: PushMode::Legacy, bar: Bar::Bar1, offset: db.offset(), half: AtomicUsize::new(0) }
    }

    /// The push page `push_idx` that firmware assigned to a P7 TX ring.
    pub fn page(hal: &HalRef, push_idx: u8, ppp: bool) -> PushBuffer {
        PushBuffer {
            hal: hal.clone(),
            mode: if ppp { PushMode::Ppp } else { PushMode::Wcb },
            bar: Bar::Bar2,
            offset: push_idx as usize * DB_PUSH_PAGE_SIZE,
            half: AtomicUsize::new(0),
        }
    }

    pub fn mode(&self) -> PushMode {
        self.mode
    }

    pub fn threshold(&self) -> usize {
        self.mode.threshold()
    }

    /// Pushes a packet whose BDs and payload have been laid out in `bytes`, publishing
    /// producer index `raw_prod` once it is in the window.
    ///
    /// For a legacy push, `bytes` starts with the doorbell word, so the copy itself is the
    /// doorbell write.
    pub fn push(&self, db: &Doorbell, raw_prod: u32, bytes: &[u8]) {
        let mut qwords = Vec::with_capacity((bytes.len() + 7) / 8);
        to_qwords(bytes, &mut qwords);
        match self.mode {
            PushMode::None => {}
            PushMode::Legacy => {
                db.record(raw_prod);
                fence(Ordering::Release);
                self.hal.wc_copy(self.bar, self.offset, &qwords);
            }
            PushMode::Wcb | PushMode::Ppp => {
                db.push_start(raw_prod);
                let half = if self.mode == PushMode::Ppp {
                    self.half.fetch_xor(1, Ordering::Relaxed)
                } else {
                    0
                };
                self.hal.wc_copy(self.bar, self.offset + half * DB_PPP_SIZE, &qwords);
                db.push_end(raw_prod);
            }
        }
    }
}
