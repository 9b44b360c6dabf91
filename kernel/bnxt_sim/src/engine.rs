//! The data path of the simulated NIC: doorbell decoding, descriptor processing,
//! completion and notification posting.
//!
//! Everything happens synchronously inside the MMIO write that rings a doorbell, so by the
//! time `write64()` returns to the driver the packets are on the "wire" and their
//! completions are in host memory.

use std::collections::BTreeMap;
use core::mem::size_of;
use zerocopy::{AsBytes, FromBytes};
use bit_field::BitField;
use nic_hal::Bar;
use bnxt_hsi::*;
use bnxt_hsi::cmpl::*;
use bnxt_hsi::db::*;
use bnxt_hsi::hwrm::*;
use bnxt_hsi::rx::*;
use bnxt_hsi::tx::*;
use crate::firmware::SimRing;
use crate::State;

/// What the driver wrote to a doorbell window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoorbellWrite {
    Db32(u32),
    Db64(u64),
    /// A write-combined copy of this many bytes.
    WcCopy(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoorbellRecord {
    pub bar:    Bar,
    pub offset: usize,
    pub write:  DoorbellWrite,
}

impl DoorbellRecord {
    /// The `DBR_TYPE_*` of a 64-bit doorbell.
    pub fn db_type(&self) -> Option<u64> {
        match self.write {
            DoorbellWrite::Db64(value) => Some(db_type64(value)),
            _ => None,
        }
    }

    /// The ring id (xid) of a 64-bit doorbell.
    pub fn xid(&self) -> Option<u32> {
        match self.write {
            DoorbellWrite::Db64(value) => Some(db_xid64(value)),
            _ => None,
        }
    }
}

/// A packet the device put on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimTxPacket {
    pub ring_id:        u16,
    pub data:           Vec<u8>,
    /// The number of BDs (or, for a push, ring slots) the packet consumed.
    pub bds:            u32,
    pub push:           bool,
    pub lflags:         u32,
    pub mss:            u32,
    pub hdr_len:        u32,
    pub vlan:           Option<u16>,
    pub cfa_action:     u32,
    pub launch_time:    Option<u64>,
    pub opaque:         u32,
    pub nr_frags:       usize,
    /// The length field of the first BD.
    pub first_len:      u32,
    /// The length hint flags of the first BD.
    pub lhint:          u32,
}

/// A packet for the device to receive.
#[derive(Clone, Debug, Default)]
pub struct SimRxPacket {
    pub data:           Vec<u8>,
    pub rss_hash:       Option<u32>,
    /// The `RX_CMP_RSS_HASH_TYPE` reported with the hash.
    pub hash_type:      u8,
    /// One of the `RX_CMP_FLAGS_ITYPE_*` values.
    pub itype:          u32,
    /// A VLAN TCI the device stripped from the frame.
    pub vlan:           Option<u16>,
    pub csum_ok:        bool,
    pub l4_csum_err:    bool,
    pub buffer_error:   bool,
    pub ipv6:           bool,
    pub timestamp:      u32,
}

impl SimRxPacket {
    pub fn new(data: Vec<u8>) -> SimRxPacket {
        SimRxPacket { data, csum_ok: true, itype: RX_CMP_FLAGS_ITYPE_TCP, ..SimRxPacket::default() }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RingState {
    pub(crate) kind:        u8,
    pub(crate) len:         u32,
    depth:                  u8,
    base:                   u64,
    logical_id:             u16,
    cmpl_ring:              u16,
    rx_ring:                u16,
    nq_ring:                u16,
    cq_handle:              u64,
    stats:                  Option<u64>,
    push_idx:               Option<u8>,
    /// Raw producer index: written by the host for TX/RX/AGG, by the device for CQ/NQ.
    pub(crate) prod:        u32,
    /// Raw consumer index: advanced by the device for TX/RX/AGG, by the host for CQ/NQ.
    pub(crate) cons:        u32,
    armed:                  bool,
    notify_pending:         bool,
    toggle:                 u8,
    ppp_half:               usize,
    push_data:              Option<Vec<u64>>,
    push_started:           bool,
}

impl RingState {
    fn from_ring(ring: &SimRing, stats: Option<u64>) -> RingState {
        RingState {
            kind:           ring.ring_type,
            len:            ring.length,
            depth:          ring.page_tbl_depth,
            base:           ring.page_tbl_addr,
            logical_id:     ring.logical_id,
            cmpl_ring:      ring.cmpl_ring_id,
            rx_ring:        ring.rx_ring_id,
            nq_ring:        ring.nq_ring_id,
            cq_handle:      ring.cq_handle,
            stats,
            push_idx:       ring.push_idx,
            prod:           0,
            cons:           0,
            armed:          false,
            notify_pending: false,
            toggle:         0,
            ppp_half:       0,
            push_data:      None,
            push_started:   false,
        }
    }

    fn outstanding(&self) -> u32 {
        self.prod.wrapping_sub(self.cons)
    }
}

#[derive(Default)]
pub(crate) struct Engine {
    pub(crate) rings:           BTreeMap<u16, RingState>,
    pub(crate) async_ring:      Option<u16>,
    /// Open TPA aggregations: (RX ring id, agg id) -> (start opaque, agg buffer count).
    tpa:                        BTreeMap<(u16, u16), (u32, u32)>,
    held:                       Vec<(u16, [u8; CMPL_SLOT_SIZE])>,
    pub(crate) hold_tx_cmpl:    bool,
    pub(crate) transmitted:     Vec<SimTxPacket>,
    pub(crate) doorbells:       Vec<DoorbellRecord>,
    pub(crate) drop_doorbells:  bool,
    pub(crate) db_errors:       u32,
    pub(crate) cq_overflows:    u32,
    pub(crate) interrupts:      u32,
}

impl Engine {
    pub(crate) fn add_ring(&mut self, ring: &SimRing, stats: Option<u64>) {
        self.rings.insert(ring.id, RingState::from_ring(ring, stats));
    }

    pub(crate) fn remove_ring(&mut self, id: u16) {
        self.rings.remove(&id);
        self.tpa.retain(|(ring, _), _| *ring != id);
        self.held.retain(|(cq, _)| *cq != id);
        if self.async_ring == Some(id) {
            self.async_ring = None;
        }
    }

    /// Returns an RX or AGG ring to its just-allocated state.
    pub(crate) fn reset_ring(&mut self, id: u16) {
        if let Some(ring) = self.rings.get_mut(&id) {
            ring.prod = 0;
            ring.cons = 0;
        }
        self.tpa.retain(|(ring, _), _| *ring != id);
    }

    /// Forgets every ring, as a function or chip reset does.
    pub(crate) fn reset(&mut self) {
        self.rings.clear();
        self.tpa.clear();
        self.held.clear();
        self.async_ring = None;
    }

    fn find(&self, pred: impl Fn(&RingState) -> bool) -> Option<u16> {
        self.rings.iter().find(|(_, r)| pred(r)).map(|(id, _)| *id)
    }
}

/// Recovers a raw index from the masked index in a doorbell.
///
/// With an epoch bit, the doorbell pins the index within a window of twice the ring size,
/// so an index can only name a position less than one ring ahead of `old`. Anything else
/// is a stale doorbell from the previous pass.
pub(crate) fn unwrap_index(old: u32, idx: u32, len: u32, epoch: Option<bool>) -> Option<u32> {
    match epoch {
        Some(e) => {
            let window = 2 * len;
            let candidate = if e { idx + len } else { idx };
            let delta = (candidate + window - old % window) % window;
            if delta >= len {
                None
            } else {
                Some(old.wrapping_add(delta))
            }
        }
        None => Some(old.wrapping_add(idx.wrapping_sub(old) & (len - 1))),
    }
}

fn slot_bytes<T: AsBytes>(record: &T) -> [u8; CMPL_SLOT_SIZE] {
    let mut slot = [0u8; CMPL_SLOT_SIZE];
    slot.copy_from_slice(&record.as_bytes()[..CMPL_SLOT_SIZE]);
    slot
}

impl State {
    /* ------------------------------ MMIO entry points ------------------------------ */

    pub(crate) fn mmio_read32(&mut self, bar: Bar, offset: usize) -> u32 {
        match bar {
            Bar::Bar0 => self.regs.read32(offset, self.clock_us),
            _ => 0,
        }
    }

    pub(crate) fn mmio_write32(&mut self, bar: Bar, offset: usize, value: u32) -> Option<(u16, u16)> {
        match bar {
            Bar::Bar0 => {
                let mut reset = false;
                let trigger = self.regs.write32(offset, value, &mut reset);
                if reset {
                    self.perform_reset();
                    return None;
                }
                if trigger {
                    return self.hwrm_request();
                }
                None
            }
            Bar::Bar1 => {
                self.eng.doorbells.push(DoorbellRecord { bar, offset, write: DoorbellWrite::Db32(value) });
                if !self.eng.drop_doorbells {
                    self.legacy_doorbell(offset, value);
                }
                None
            }
            Bar::Bar2 => None,
        }
    }

    pub(crate) fn mmio_write64(&mut self, bar: Bar, offset: usize, value: u64) {
        if bar == Bar::Bar0 {
            return;
        }
        self.eng.doorbells.push(DoorbellRecord { bar, offset, write: DoorbellWrite::Db64(value) });
        if !self.eng.drop_doorbells && self.cfg.chip().is_p5_plus() {
            self.doorbell64(value);
        }
    }

    pub(crate) fn mmio_wc_copy(&mut self, bar: Bar, offset: usize, data: &[u64]) {
        self.eng.doorbells.push(DoorbellRecord { bar, offset, write: DoorbellWrite::WcCopy(data.len() * 8) });
        if self.eng.drop_doorbells {
            return;
        }
        match bar {
            Bar::Bar1 if !self.cfg.chip().is_p5_plus() => self.legacy_push(offset, data),
            Bar::Bar2 => self.push_buffer_write(offset, data),
            _ => {
                log::warn!("sim: unexpected write-combined copy to {:?}+{:#x}", bar, offset);
                self.eng.db_errors += 1;
            }
        }
    }

    /* ------------------------------ doorbell decoding ------------------------------ */

    /// A 64-bit doorbell of a P5 or newer chip.
    fn doorbell64(&mut self, value: u64) {
        if value & DBR_VALID == 0 || value & DBR_PATH_L2 == 0 {
            self.eng.db_errors += 1;
            return;
        }
        let xid = db_xid64(value) as u16;
        let idx = db_index64(value);
        let db_type = db_type64(value);
        let Some(ring) = self.eng.rings.get(&xid) else {
            log::warn!("sim: doorbell {:#x} for unknown ring {}", value, xid);
            self.eng.db_errors += 1;
            return;
        };
        let epoch = if self.cfg.chip().is_p7() { Some(value & DBR_EPOCH_MASK != 0) } else { None };
        let toggle = ((value & DBR_TOGGLE_MASK) >> DBR_TOGGLE_SHIFT) as u8;
        let kind = ring.kind;

        match (db_type, kind) {
            (DBR_TYPE_SQ, RING_TYPE_TX) => {
                if self.advance_prod(xid, idx, epoch) {
                    self.process_tx(xid);
                }
            }
            (DBR_TYPE_SRQ, RING_TYPE_RX | RING_TYPE_RX_AGG) | (DBR_TYPE_RQ, RING_TYPE_RX | RING_TYPE_RX_AGG) => {
                self.advance_prod(xid, idx, epoch);
            }
            (DBR_TYPE_CQ, RING_TYPE_L2_CMPL) => {
                self.advance_cons(xid, idx, epoch);
            }
            (DBR_TYPE_CQ_ARMALL, RING_TYPE_L2_CMPL) => {
                if self.cfg.chip().is_p7() && self.eng.rings.get(&xid).map_or(false, |r| r.toggle != toggle) {
                    log::warn!("sim: CQ {} armed with toggle {} out of sync", xid, toggle);
                    self.eng.db_errors += 1;
                }
                if self.advance_cons(xid, idx, epoch) {
                    self.rearm_cq(xid);
                }
            }
            (DBR_TYPE_NQ, RING_TYPE_NQ) => {
                self.advance_cons(xid, idx, epoch);
            }
            (DBR_TYPE_NQ_ARM, RING_TYPE_NQ) | (DBR_TYPE_NQ_MASK, RING_TYPE_NQ) => {
                if self.advance_cons(xid, idx, epoch) {
                    if let Some(ring) = self.eng.rings.get_mut(&xid) {
                        ring.armed = db_type == DBR_TYPE_NQ_ARM;
                    }
                    self.maybe_interrupt(xid);
                }
            }
            (DBR_TYPE_PUSH_START, RING_TYPE_TX) => {
                if let Some(ring) = self.eng.rings.get_mut(&xid) {
                    ring.push_started = true;
                    ring.push_data = None;
                }
            }
            (DBR_TYPE_PUSH_END, RING_TYPE_TX) => self.push_end(xid, idx, epoch),
            (DBR_TYPE_NULL, _) => {}
            _ => {
                log::warn!("sim: doorbell type {:#x} does not apply to ring {} of type {}", db_type >> 60, xid, kind);
                self.eng.db_errors += 1;
            }
        }
    }

    /// A 32-bit doorbell of a P4 chip, written to the doorbell cell of the ring.
    fn legacy_doorbell(&mut self, offset: usize, value: u32) {
        if self.cfg.chip().is_p5_plus() {
            self.eng.db_errors += 1;
            return;
        }
        let cell = (offset / DB_LEGACY_STRIDE) as u16;
        let idx = value & DB_IDX_MASK;
        let key = value & DB_KEY_MASK;
        let target = match key {
            DB_KEY_TX => self.eng.find(|r| r.kind == RING_TYPE_TX && r.logical_id == cell),
            DB_KEY_RX => self.eng.find(|r| (r.kind == RING_TYPE_RX || r.kind == RING_TYPE_RX_AGG) && r.logical_id == cell),
            DB_KEY_CP => self.eng.find(|r| r.kind == RING_TYPE_L2_CMPL && r.logical_id == cell),
            _ => None,
        };
        let Some(id) = target else {
            log::warn!("sim: legacy doorbell {:#x} at cell {} matches no ring", value, cell);
            self.eng.db_errors += 1;
            return;
        };
        match key {
            DB_KEY_TX => {
                if self.advance_prod(id, idx, None) {
                    self.process_tx(id);
                }
            }
            DB_KEY_RX => { self.advance_prod(id, idx, None); }
            _ => {
                if value & DB_IDX_VALID != 0 && !self.advance_cons(id, idx, None) {
                    return;
                }
                let arm = value & DB_IRQ_DIS == 0;
                if let Some(ring) = self.eng.rings.get_mut(&id) {
                    ring.armed = arm;
                }
                if arm {
                    self.maybe_interrupt(id);
                }
            }
        }
    }

    fn advance_prod(&mut self, id: u16, idx: u32, epoch: Option<bool>) -> bool {
        let Some(ring) = self.eng.rings.get_mut(&id) else { return false };
        match unwrap_index(ring.prod, idx, ring.len, epoch) {
            Some(raw) if raw.wrapping_sub(ring.cons) < ring.len => {
                ring.prod = raw;
                true
            }
            _ => {
                log::warn!("sim: ring {} producer doorbell {} is inconsistent (prod {} cons {})", id, idx, ring.prod, ring.cons);
                self.eng.db_errors += 1;
                false
            }
        }
    }

    fn advance_cons(&mut self, id: u16, idx: u32, epoch: Option<bool>) -> bool {
        let Some(ring) = self.eng.rings.get_mut(&id) else { return false };
        match unwrap_index(ring.cons, idx, ring.len, epoch) {
            Some(raw) if ring.prod.wrapping_sub(raw) <= ring.len => {
                ring.cons = raw;
                true
            }
            _ => {
                log::warn!("sim: ring {} consumer doorbell {} is inconsistent (prod {} cons {})", id, idx, ring.prod, ring.cons);
                self.eng.db_errors += 1;
                false
            }
        }
    }

    /* ------------------------------ ring memory ------------------------------ */

    fn slot_addr(&self, id: u16, raw: u32) -> Option<u64> {
        let ring = self.eng.rings.get(&id)?;
        let offset = (raw & (ring.len - 1)) as usize * CMPL_SLOT_SIZE;
        self.resolve(ring.base, ring.depth, offset)
    }

    fn read_slot<T: AsBytes + FromBytes>(&self, id: u16, raw: u32) -> Option<T> {
        let addr = self.slot_addr(id, raw)?;
        if !self.mem.is_live(addr, CMPL_SLOT_SIZE) {
            return None;
        }
        Some(self.mem.read_obj(addr))
    }

    /// Writes completion records into a CQ or NQ, setting each slot's valid bit for the
    /// current pass, then notifies.
    fn post(&mut self, id: u16, slots: &[[u8; CMPL_SLOT_SIZE]]) -> bool {
        if !self.bus_master {
            return false;
        }
        let Some(ring) = self.eng.rings.get(&id) else { return false };
        let (prod, cons, len) = (ring.prod, ring.cons, ring.len);
        if prod.wrapping_add(slots.len() as u32).wrapping_sub(cons) > len {
            log::warn!("sim: completion ring {} overflow", id);
            self.eng.cq_overflows += 1;
        }
        for (i, slot) in slots.iter().enumerate() {
            let raw = prod.wrapping_add(i as u32);
            let mut bytes = *slot;
            let valid = raw & len == 0;
            bytes[CMPL_VALID_OFFSET].set_bit(0, valid);
            match self.slot_addr(id, raw) {
                Some(addr) if self.mem.is_live(addr, CMPL_SLOT_SIZE) => self.mem.write(addr, &bytes),
                _ => {
                    log::warn!("sim: completion ring {} slot {} is not mapped", id, raw);
                    return false;
                }
            }
        }
        if let Some(ring) = self.eng.rings.get_mut(&id) {
            ring.prod = prod.wrapping_add(slots.len() as u32);
        }
        self.notify(id);
        true
    }

    /// Tells the host that ring `id` has new entries.
    fn notify(&mut self, id: u16) {
        let Some(ring) = self.eng.rings.get(&id) else { return };
        if ring.kind == RING_TYPE_NQ || !self.cfg.chip().is_p5_plus() {
            self.maybe_interrupt(id);
            return;
        }
        if ring.notify_pending {
            return;
        }
        let nq = ring.nq_ring;
        let handle = ring.cq_handle;
        let toggle = (ring.toggle + 1) % 4;
        if let Some(ring) = self.eng.rings.get_mut(&id) {
            ring.toggle = toggle;
            ring.notify_pending = true;
        }
        let cn = NqCn {
            type_toggle:    Le16::new(CmplType::CqNotification as u16 | (toggle as u16) << NQ_CN_TOGGLE_SHIFT),
            reserved16:     Le16::new(0),
            cq_handle_low:  Le32::new(handle as u32),
            v:              Le32::new(0),
            cq_handle_high: Le32::new((handle >> 32) as u32),
        };
        self.post(nq, &[slot_bytes(&cn)]);
    }

    /// Handles an ARM-ALL of a CQ: notify again if entries arrived since the host last looked.
    fn rearm_cq(&mut self, id: u16) {
        let Some(ring) = self.eng.rings.get_mut(&id) else { return };
        ring.notify_pending = false;
        if ring.prod != ring.cons {
            self.notify(id);
        }
    }

    fn maybe_interrupt(&mut self, id: u16) {
        let Some(ring) = self.eng.rings.get_mut(&id) else { return };
        if ring.armed && ring.prod != ring.cons {
            ring.armed = false;
            self.eng.interrupts += 1;
        }
    }

    fn update_stats(&mut self, id: u16, tx: bool, bytes: usize) {
        let Some(addr) = self.eng.rings.get(&id).and_then(|r| r.stats) else { return };
        if !self.bus_master || !self.mem.is_live(addr, size_of::<CtxHwStats>()) {
            return;
        }
        let mut stats: CtxHwStats = self.mem.read_obj(addr);
        if tx {
            stats.tx_ucast_pkts = Le64::new(stats.tx_ucast_pkts.get() + 1);
            stats.tx_ucast_bytes = Le64::new(stats.tx_ucast_bytes.get() + bytes as u64);
        } else {
            stats.rx_ucast_pkts = Le64::new(stats.rx_ucast_pkts.get() + 1);
            stats.rx_ucast_bytes = Le64::new(stats.rx_ucast_bytes.get() + bytes as u64);
        }
        self.mem.write_obj(addr, &stats);
    }

    /* ------------------------------ transmit ------------------------------ */

    /// Sends every complete packet between the TX consumer and the producer.
    fn process_tx(&mut self, id: u16) {
        if !self.bus_master {
            return;
        }
        loop {
            let Some(ring) = self.eng.rings.get(&id) else { return };
            let (cons, outstanding) = (ring.cons, ring.outstanding());
            if outstanding < 2 {
                return;
            }
            let Some(first) = self.read_slot::<TxBd>(id, cons) else { return };
            let bds = first.bd_count();
            if bds < 2 || bds > outstanding {
                if bds < 2 {
                    log::warn!("sim: TX ring {} BD at {} has a BD count of {}", id, cons, bds);
                    self.eng.db_errors += 1;
                }
                return;
            }
            let Some(ext) = self.read_slot::<TxBdExt>(id, cons.wrapping_add(1)) else { return };

            let mut pkt = SimTxPacket {
                ring_id:    id,
                bds,
                lflags:     ext.lflags(),
                mss:        ext.mss(),
                hdr_len:    ext.hdr_len(),
                vlan:       ext.vlan_tci(),
                cfa_action: ext.cfa_action.get() >> TX_BD_CFA_ACTION_SHIFT,
                opaque:     first.opaque.get(),
                first_len:  first.len(),
                lhint:      first.len_flags_type.get() & (0x3 << TX_BD_FLAGS_LHINT_SHIFT),
                ..SimTxPacket::default()
            };
            let mut data = vec![0u8; first.len() as usize];
            self.mem.read(first.haddr.get(), &mut data);
            let mut last = first;
            for i in 2..bds {
                let Some(bd) = self.read_slot::<TxBd>(id, cons.wrapping_add(i)) else { return };
                if bd.bd_type() == TX_BD_TYPE_TIMEDTX_BD {
                    let Some(timed) = self.read_slot::<TxBdTimed>(id, cons.wrapping_add(i)) else { return };
                    pkt.launch_time = Some(timed.tx_time.get());
                    continue;
                }
                let start = data.len();
                data.resize(start + bd.len() as usize, 0);
                self.mem.read(bd.haddr.get(), &mut data[start..]);
                pkt.nr_frags += 1;
                last = bd;
            }
            if !last.is_packet_end() {
                log::warn!("sim: TX ring {} packet at {} has no PACKET_END", id, cons);
                self.eng.db_errors += 1;
            }
            pkt.data = data;
            let no_cmpl = first.len_flags_type.get() & TX_BD_FLAGS_NO_CMPL != 0;
            self.complete_tx(id, pkt, bds, no_cmpl);
        }
    }

    fn complete_tx(&mut self, id: u16, pkt: SimTxPacket, slots: u32, no_cmpl: bool) {
        let Some(ring) = self.eng.rings.get_mut(&id) else { return };
        ring.cons = ring.cons.wrapping_add(slots);
        let cons = ring.cons;
        let cq = ring.cmpl_ring;
        let len = pkt.data.len();
        let mut flags = CmplType::TxL2 as u32;
        if pkt.push {
            flags |= TX_CMP_FLAGS_PUSH;
        }
        let cmp = TxCmp {
            flags_type:  Le32::new(flags),
            opaque:      Le32::new(pkt.opaque),
            errors_v:    Le32::new(0),
            sq_cons_idx: Le32::new(cons & TX_CMP_SQ_CONS_IDX_MASK),
        };
        self.eng.transmitted.push(pkt);
        self.update_stats(id, true, len);
        if no_cmpl {
            return;
        }
        if self.eng.hold_tx_cmpl {
            self.eng.held.push((cq, slot_bytes(&cmp)));
        } else {
            self.post(cq, &[slot_bytes(&cmp)]);
        }
    }

    pub(crate) fn release_tx_completions(&mut self) {
        for (cq, slot) in std::mem::take(&mut self.eng.held) {
            self.post(cq, &[slot]);
        }
    }

    /// A P4 push: the doorbell word, both BDs and the packet data, copied to the ring's
    /// doorbell cell.
    fn legacy_push(&mut self, offset: usize, data: &[u64]) {
        let bytes: Vec<u8> = data.iter().flat_map(|q| q.to_le_bytes()).collect();
        if bytes.len() < size_of::<TxPushBd>() {
            self.eng.db_errors += 1;
            return;
        }
        let push: TxPushBd = crate::firmware::parse(&bytes);
        let db = push.doorbell.get();
        let cell = (offset / DB_LEGACY_STRIDE) as u16;
        if db & DB_KEY_MASK != DB_KEY_TX_PUSH {
            self.eng.db_errors += 1;
            return;
        }
        let Some(id) = self.eng.find(|r| r.kind == RING_TYPE_TX && r.logical_id == cell) else {
            self.eng.db_errors += 1;
            return;
        };
        let lft = push.len_flags_type.get();
        let len = (lft >> TX_BD_LEN_SHIFT) as usize;
        let payload = &bytes[size_of::<TxPushBd>()..];
        if payload.len() < len {
            self.eng.db_errors += 1;
            return;
        }
        let pkt = SimTxPacket {
            ring_id:    id,
            data:       payload[..len].to_vec(),
            bds:        (lft & TX_BD_FLAGS_BD_CNT_MASK) >> TX_BD_FLAGS_BD_CNT_SHIFT,
            push:       true,
            lflags:     push.ext.lflags(),
            vlan:       push.ext.vlan_tci(),
            cfa_action: push.ext.cfa_action.get() >> TX_BD_CFA_ACTION_SHIFT,
            opaque:     push.opaque.get(),
            first_len:  len as u32,
            lhint:      lft & (0x3 << TX_BD_FLAGS_LHINT_SHIFT),
            ..SimTxPacket::default()
        };
        let Some(ring) = self.eng.rings.get(&id) else { return };
        let old = ring.prod;
        if !self.advance_prod(id, db & DB_IDX_MASK, None) || !self.bus_master {
            return;
        }
        let slots = self.eng.rings.get(&id).map_or(0, |r| r.prod.wrapping_sub(old));
        if slots != pkt.bds {
            log::warn!("sim: push advanced the ring by {} slots for {} BDs", slots, pkt.bds);
            self.eng.db_errors += 1;
        }
        self.complete_tx(id, pkt, slots, false);
    }

    /// A WCB or PPP push: BDs and data written into the ring's push page between the
    /// PUSH_START and PUSH_END doorbells.
    fn push_buffer_write(&mut self, offset: usize, data: &[u64]) {
        let page = offset / DB_PUSH_PAGE_SIZE;
        let half = (offset % DB_PUSH_PAGE_SIZE) / DB_PPP_SIZE;
        let ppp = self.cfg.ppp_push;
        let Some(id) = self.eng.find(|r| r.kind == RING_TYPE_TX && r.push_idx == Some(page as u8)) else {
            log::warn!("sim: push page {} belongs to no ring", page);
            self.eng.db_errors += 1;
            return;
        };
        let mut errors = 0;
        if let Some(ring) = self.eng.rings.get_mut(&id) {
            if !ring.push_started {
                errors += 1;
            }
            if ppp {
                if half != ring.ppp_half {
                    log::warn!("sim: push to PPP half {} while half {} is active", half, ring.ppp_half);
                    errors += 1;
                }
                ring.ppp_half ^= 1;
            } else if half != 0 {
                errors += 1;
            }
            ring.push_data = Some(data.to_vec());
        }
        self.eng.db_errors += errors;
    }

    fn push_end(&mut self, id: u16, idx: u32, epoch: Option<bool>) {
        let Some(ring) = self.eng.rings.get_mut(&id) else { return };
        let started = core::mem::take(&mut ring.push_started);
        let data = ring.push_data.take();
        let old = ring.prod;
        let Some(data) = data.filter(|_| started) else {
            log::warn!("sim: PUSH_END on ring {} without a push", id);
            self.eng.db_errors += 1;
            return;
        };
        let bytes: Vec<u8> = data.iter().flat_map(|q| q.to_le_bytes()).collect();
        if bytes.len() < 2 * size_of::<TxBd>() {
            self.eng.db_errors += 1;
            return;
        }
        let first: TxBd = crate::firmware::parse(&bytes);
        let ext: TxBdExt = crate::firmware::parse(&bytes[size_of::<TxBd>()..]);
        let len = first.len() as usize;
        let payload = &bytes[2 * size_of::<TxBd>()..];
        if payload.len() < len {
            self.eng.db_errors += 1;
            return;
        }
        if !self.advance_prod(id, idx, epoch) || !self.bus_master {
            return;
        }
        let slots = self.eng.rings.get(&id).map_or(0, |r| r.prod.wrapping_sub(old));
        if slots != first.bd_count() {
            log::warn!("sim: push advanced the ring by {} slots for {} BDs", slots, first.bd_count());
            self.eng.db_errors += 1;
        }
        let pkt = SimTxPacket {
            ring_id:    id,
            data:       payload[..len].to_vec(),
            bds:        first.bd_count(),
            push:       true,
            lflags:     ext.lflags(),
            vlan:       ext.vlan_tci(),
            cfa_action: ext.cfa_action.get() >> TX_BD_CFA_ACTION_SHIFT,
            opaque:     first.opaque.get(),
            first_len:  len as u32,
            lhint:      first.len_flags_type.get() & (0x3 << TX_BD_FLAGS_LHINT_SHIFT),
            ..SimTxPacket::default()
        };
        self.complete_tx(id, pkt, slots, false);
    }

    /* ------------------------------ receive ------------------------------ */

    fn rx_rings(&self, rx_index: usize) -> Result<(u16, Option<u16>), &'static str> {
        let rx = self.eng.find(|r| r.kind == RING_TYPE_RX && r.logical_id as usize == rx_index)
            .ok_or("no such RX ring")?;
        let agg = self.eng.find(|r| r.kind == RING_TYPE_RX_AGG && r.rx_ring == rx);
        Ok((rx, agg))
    }

    /// Takes the next posted buffer of an RX or AGG ring: (opaque, address, capacity).
    fn take_buffer(&mut self, id: u16) -> Result<(u32, u64, usize), &'static str> {
        let ring = self.eng.rings.get(&id).ok_or("no such ring")?;
        if ring.outstanding() == 0 {
            return Err("no buffer posted");
        }
        let cons = ring.cons;
        let bd: RxBd = self.read_slot(id, cons).ok_or("RX BD is not mapped")?;
        if let Some(ring) = self.eng.rings.get_mut(&id) {
            ring.cons = cons.wrapping_add(1);
        }
        Ok((bd.opaque.get(), bd.haddr.get(), bd.buf_len() as usize))
    }

    /// Checks that `n` buffers are posted on ring `id`.
    fn has_buffers(&self, id: u16, n: usize) -> bool {
        self.eng.rings.get(&id).map_or(false, |r| r.outstanding() as usize >= n)
    }

    /// Places `data` into as many AGG buffers as it needs; returns their completions.
    fn fill_aggs(&mut self, agg: u16, data: &[u8], cmpl_type: CmplType, agg_id: u16) -> Result<Vec<[u8; CMPL_SLOT_SIZE]>, &'static str> {
        let mut slots = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (opaque, addr, cap) = self.take_buffer(agg)?;
            let n = rest.len().min(cap);
            self.mem.write(addr, &rest[..n]);
            rest = &rest[n..];
            let cmp = RxAggCmp {
                len_flags_type: Le32::new((n as u32) << RX_AGG_CMP_LEN_SHIFT | cmpl_type as u32),
                opaque:         Le32::new(opaque),
                agg_id_v:       Le32::new((agg_id as u32) << RX_AGG_CMP_AGG_ID_SHIFT),
                unused:         Le32::new(0),
            };
            slots.push(slot_bytes(&cmp));
        }
        Ok(slots)
    }

    fn rx_ext(pkt: &SimRxPacket) -> RxCmpExt {
        let mut flags2 = 0;
        if pkt.csum_ok || pkt.l4_csum_err {
            flags2 |= RX_CMP_FLAGS2_IP_CS_CALC | RX_CMP_FLAGS2_L4_CS_CALC;
        }
        if pkt.ipv6 {
            flags2 |= RX_CMP_FLAGS2_IP_TYPE_V6;
        }
        let mut metadata = 0;
        if let Some(tci) = pkt.vlan {
            flags2 |= RX_CMP_FLAGS2_META_FORMAT_VLAN;
            metadata = tci as u32 | RX_CMP_METADATA_TPID_8021Q;
        }
        let mut errors = 0;
        if pkt.buffer_error {
            errors |= 1 << 1;
        }
        if pkt.l4_csum_err {
            errors |= RX_CMPL_ERRORS_L4_CS_ERROR;
        }
        RxCmpExt {
            flags2:             Le32::new(flags2),
            metadata:           Le32::new(metadata),
            cfa_code_errors_v2: Le32::new(errors),
            timestamp:          Le32::new(pkt.timestamp),
        }
    }

    fn rx_flags(pkt: &SimRxPacket) -> u32 {
        let mut flags = pkt.itype & RX_CMP_FLAGS_ITYPES_MASK;
        if pkt.rss_hash.is_some() {
            flags |= RX_CMP_FLAGS_RSS_VALID;
        }
        flags
    }

    pub(crate) fn receive(&mut self, rx_index: usize, pkt: &SimRxPacket) -> Result<(), &'static str> {
        if !self.bus_master {
            return Err("bus mastering is disabled");
        }
        let (rx, agg) = self.rx_rings(rx_index)?;
        let cq = self.eng.rings.get(&rx).map(|r| r.cmpl_ring).ok_or("no such RX ring")?;
        if !self.has_buffers(rx, 1) {
            return Err("no RX buffer posted");
        }

        let (opaque, addr, cap) = self.take_buffer(rx)?;
        let head = pkt.data.len().min(cap);
        self.mem.write(addr, &pkt.data[..head]);
        let aggs = if head < pkt.data.len() {
            let agg = agg.ok_or("packet does not fit and there is no AGG ring")?;
            self.fill_aggs(agg, &pkt.data[head..], CmplType::RxAgg, 0)?
        } else {
            Vec::new()
        };
        if aggs.len() > 0x1f {
            return Err("too many AGG buffers");
        }

        let cmp = RxCmp {
            len_flags_type: Le32::new((head as u32) << RX_CMP_LEN_SHIFT | Self::rx_flags(pkt) | CmplType::RxL2 as u32),
            opaque:         Le32::new(opaque),
            misc_v1:        Le32::new((aggs.len() as u32) << RX_CMP_AGG_BUFS_SHIFT
                                | (pkt.hash_type as u32) << RX_CMP_RSS_HASH_TYPE_SHIFT),
            rss_hash:       Le32::new(pkt.rss_hash.unwrap_or(0)),
        };
        let mut slots = vec![slot_bytes(&cmp), slot_bytes(&Self::rx_ext(pkt))];
        slots.extend(aggs);
        self.post(cq, &slots);
        self.update_stats(rx, false, pkt.data.len());
        Ok(())
    }

    fn tpa_enabled(&self) -> bool {
        self.fw.vnics.values().any(|v| v.tpa_flags & VNIC_TPA_CFG_FLAGS_TPA != 0)
    }

    pub(crate) fn tpa_start(&mut self, rx_index: usize, agg_id: u16, pkt: &SimRxPacket) -> Result<(), &'static str> {
        if !self.bus_master {
            return Err("bus mastering is disabled");
        }
        if !self.tpa_enabled() {
            return Err("TPA is not enabled on any VNIC");
        }
        let (rx, _) = self.rx_rings(rx_index)?;
        if self.eng.tpa.contains_key(&(rx, agg_id)) {
            return Err("aggregation id already open");
        }
        let cq = self.eng.rings.get(&rx).map(|r| r.cmpl_ring).ok_or("no such RX ring")?;
        let (opaque, addr, cap) = self.take_buffer(rx)?;
        let len = pkt.data.len().min(cap);
        self.mem.write(addr, &pkt.data[..len]);

        let l3 = 14u32;
        let l4 = l3 + if pkt.ipv6 { 40 } else { 20 };
        let mut flags2 = RX_CMP_FLAGS2_IP_CS_CALC | RX_CMP_FLAGS2_L4_CS_CALC;
        if pkt.ipv6 {
            flags2 |= RX_CMP_FLAGS2_IP_TYPE_V6;
        }
        let mut metadata = 0;
        if let Some(tci) = pkt.vlan {
            flags2 |= RX_CMP_FLAGS2_META_FORMAT_VLAN;
            metadata = tci as u32 | RX_CMP_METADATA_TPID_8021Q;
        }
        let start = RxTpaStartCmp {
            len_flags_type: Le32::new((len as u32) << RX_CMP_LEN_SHIFT | Self::rx_flags(pkt) | CmplType::RxTpaStart as u32),
            opaque:         Le32::new(opaque),
            misc_v1:        Le32::new((agg_id as u32) << RX_TPA_START_CMP_AGG_ID_SHIFT
                                | (pkt.hash_type as u32) << RX_CMP_RSS_HASH_TYPE_SHIFT),
            rss_hash:       Le32::new(pkt.rss_hash.unwrap_or(0)),
        };
        let ext = RxTpaStartCmpExt {
            flags2:         Le32::new(flags2),
            metadata:       Le32::new(metadata),
            cfa_code_v2:    Le32::new(0),
            hdr_info:       Le32::new(l4 | l3 << 9),
        };
        self.eng.tpa.insert((rx, agg_id), (opaque, 0));
        self.post(cq, &[slot_bytes(&start), slot_bytes(&ext)]);
        Ok(())
    }

    pub(crate) fn tpa_agg(&mut self, rx_index: usize, agg_id: u16, data: &[u8]) -> Result<(), &'static str> {
        let (rx, agg) = self.rx_rings(rx_index)?;
        let agg = agg.ok_or("no AGG ring")?;
        if !self.eng.tpa.contains_key(&(rx, agg_id)) {
            return Err("aggregation id is not open");
        }
        let cq = self.eng.rings.get(&rx).map(|r| r.cmpl_ring).ok_or("no such RX ring")?;
        let slots = self.fill_aggs(agg, data, CmplType::RxTpaAgg, agg_id)?;
        if let Some(entry) = self.eng.tpa.get_mut(&(rx, agg_id)) {
            entry.1 += slots.len() as u32;
        }
        self.post(cq, &slots);
        Ok(())
    }

    pub(crate) fn tpa_end(&mut self, rx_index: usize, agg_id: u16, segs: u32, seg_len: u32) -> Result<(), &'static str> {
        let (rx, _) = self.rx_rings(rx_index)?;
        let (opaque, aggs) = self.eng.tpa.remove(&(rx, agg_id)).ok_or("aggregation id is not open")?;
        let cq = self.eng.rings.get(&rx).map(|r| r.cmpl_ring).ok_or("no such RX ring")?;
        let end = RxTpaEndCmp {
            len_flags_type: Le32::new(CmplType::RxTpaEnd as u32),
            opaque:         Le32::new(opaque),
            misc_v1:        Le32::new(aggs << RX_CMP_AGG_BUFS_SHIFT | (agg_id as u32) << 16),
            tsdelta:        Le32::new(0),
        };
        let ext = RxTpaEndCmpExt {
            tpa_segs:       Le32::new(segs & 0xff),
            seg_len:        Le32::new(seg_len & 0xffff),
            errors_v2:      Le32::new(0),
            start_opaque:   Le32::new(opaque),
        };
        self.post(cq, &[slot_bytes(&end), slot_bytes(&ext)]);
        Ok(())
    }

    pub(crate) fn rx_posted(&self, rx_index: usize) -> (u32, u32) {
        let Ok((rx, agg)) = self.rx_rings(rx_index) else { return (0, 0) };
        let count = |id: Option<u16>| id.and_then(|id| self.eng.rings.get(&id)).map_or(0, |r| r.outstanding());
        (count(Some(rx)), count(agg))
    }

    /* ------------------------------ firmware-originated completions ------------------------------ */

    pub(crate) fn post_async_event(&mut self, event_id: u16, data1: u32, data2: u32) -> bool {
        let Some(ring) = self.eng.async_ring else {
            log::debug!("sim: async event {:#x} with no async ring", event_id);
            return false;
        };
        let cmp = HwrmAsyncEventCmp {
            cmpl_type:      Le16::new(CmplType::HwrmAsyncEvent as u16),
            event_id:       Le16::new(event_id),
            event_data2:    Le32::new(data2),
            opaque_v:       0,
            timestamp_lo:   0,
            timestamp_hi:   Le16::new(0),
            event_data1:    Le32::new(data1),
        };
        self.post(ring, &[slot_bytes(&cmp)])
    }

    pub(crate) fn post_hwrm_done(&mut self, seq_id: u16) -> bool {
        let Some(ring) = self.eng.async_ring else { return false };
        let cmp = HwrmDoneCmp {
            cmpl_type:      Le16::new(CmplType::HwrmDone as u16),
            sequence_id:    Le16::new(seq_id),
            unused_0:       Le32::new(0),
            v:              Le32::new(0),
            unused_1:       Le32::new(0),
        };
        self.post(ring, &[slot_bytes(&cmp)])
    }
}
