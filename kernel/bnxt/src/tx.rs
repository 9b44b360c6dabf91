//! The transmit path and TX completion handling.

use core::sync::atomic::Ordering;
use alloc::vec::Vec;
use zerocopy::AsBytes;
use nic_hal::{DmaDirection, DmaMapping, HalRef};
use nic_buffers::{TransmitPacket, TxFrag, ETH_P_8021Q};
use bnxt_hsi::{Le32, Le64};
use bnxt_hsi::tx::*;
use bnxt_hsi::cmpl::{TxCmp, TX_CMP_FLAGS_PUSH};
use bnxt_rings::{tx_opaque, tx_opaque_bds, tx_opaque_idx, PushMode};
use crate::{Bnxt, DevState, SpEvents};
use crate::config::{BNXT_MIN_PKT_SIZE, BNXT_TX_BD_BASE_CNT, MAX_SKB_FRAGS};
use crate::napi::{Fabric, TxQueue};

/// The largest LSO segment plus headers the NIC accepts.
const BNXT_MAX_LSO_SEG: usize = 10239;

/// The outcome of [`Bnxt::start_xmit()`].
pub enum XmitStatus {
    /// The packet is on the ring.
    Queued,
    /// The packet was dropped and freed.
    Dropped,
    /// The ring is full; the queue is stopped and the packet is handed back.
    Busy(TransmitPacket),
}

/// The extended BD of a packet: offload flags, MSS, VLAN insertion and CFA action.
fn ext_bd(pkt: &TransmitPacket) -> TxBdExt {
    let mut lflags = 0;
    let mut kid_mss = 0;
    if let Some(gso) = pkt.gso {
        let hdr_len = pkt.lso_header_len() as u32;
        lflags |= TX_BD_FLAGS_LSO | TX_BD_FLAGS_T_IPID | (hdr_len / 2) << TX_BD_HSIZE_SHIFT;
        kid_mss = gso.size as u32 & TX_BD_MSS_MASK;
    } else if pkt.csum_partial {
        lflags |= TX_BD_FLAGS_TCP_UDP_CHKSUM;
        if pkt.encapsulated {
            lflags |= TX_BD_FLAGS_IP_CKSUM;
        }
    }
    if pkt.hw_timestamp {
        lflags |= TX_BD_FLAGS_STAMP;
    }
    let cfa_meta = pkt.vlan.map_or(0, |tag| {
        let tpid = if tag.proto == ETH_P_8021Q { TX_BD_CFA_META_TPID_8021Q } else { TX_BD_CFA_META_TPID_8021AD };
        TX_BD_CFA_META_KEY_VLAN | tpid | tag.tci as u32
    });
    TxBdExt {
        hsize_lflags: Le32::new(lflags),
        kid_mss:      Le32::new(kid_mss),
        cfa_action:   Le32::new((pkt.cfa_action as u32) << TX_BD_CFA_ACTION_SHIFT),
        cfa_meta:     Le32::new(cfa_meta),
    }
}

fn unmap_all(hal: &HalRef, maps: Vec<DmaMapping>) {
    for map in maps {
        map.unmap(&**hal);
    }
}

impl Bnxt {
    /// Posts `pkt` on TX ring `pkt.queue_index`.
    ///
    /// Short packets on an idle ring are pushed through the doorbell window with their
    /// data inline; everything else is mapped for DMA.
    pub fn start_xmit(&self, mut pkt: TransmitPacket) -> XmitStatus {
        let Some(fabric) = self.fabric() else { return XmitStatus::Dropped };
        if self.test_state(DevState::FW_FATAL_COND | DevState::IN_FW_RESET) {
            return XmitStatus::Dropped;
        }
        let Some(q) = fabric.txq.get(pkt.queue_index as usize) else {
            warn!("bnxt: no TX ring {}", pkt.queue_index);
            return XmitStatus::Dropped;
        };
        let ring = &q.ring;
        let _guard = ring.lock_xmit();

        let timed = pkt.launch_time.is_some() as u32;
        let needed = BNXT_TX_BD_BASE_CNT + pkt.nr_frags() as u32 + timed;
        if ring.is_stopped() || ring.avail() < needed {
            ring.stop();
            if ring.take_kick() {
                ring.kick();
            }
            return XmitStatus::Busy(pkt);
        }

        if pkt.len() < BNXT_MIN_PKT_SIZE {
            pkt.pad_to(BNXT_MIN_PKT_SIZE);
        }
        let xmit_more = pkt.xmit_more;
        let pkt = if self.can_push(&fabric, q, &pkt) {
            match self.xmit_push(q, pkt) {
                // The push itself rings the doorbell.
                Ok(()) => {
                    if ring.avail() < (MAX_SKB_FRAGS as u32) + 2 {
                        ring.stop();
                    }
                    return XmitStatus::Queued;
                }
                Err(pkt) => pkt,
            }
        } else {
            pkt
        };
        if !self.xmit_bds(q, pkt) {
            q.stats.dropped.fetch_add(1, Ordering::Relaxed);
            if ring.take_kick() {
                ring.kick();
            }
            return XmitStatus::Dropped;
        }

        if ring.avail() < (MAX_SKB_FRAGS as u32) + 2 {
            ring.stop();
        }
        if xmit_more && !ring.is_stopped() {
            ring.defer_kick();
        } else {
            ring.kick();
        }
        XmitStatus::Queued
    }

    fn can_push(&self, fabric: &Fabric, q: &TxQueue, pkt: &TransmitPacket) -> bool {
        fabric.params.push != PushMode::None
            && q.ring.push_buffer().is_some()
            && q.ring.in_flight() == 0
            && pkt.len() <= fabric.params.tx_push_thresh
            && pkt.gso.is_none()
            && pkt.launch_time.is_none()
            && !pkt.hw_timestamp
    }

    /// Writes the BDs and inline data of `pkt` to both the ring and the push window.
    /// Hands the packet back untouched if the ring has no push window to write.
    fn xmit_push(&self, q: &TxQueue, pkt: TransmitPacket) -> Result<(), TransmitPacket> {
        let ring = &q.ring;
        let (Some(db), Some(push)) = (ring.doorbell(), ring.push_buffer()) else { return Err(pkt) };
        let data = pkt.to_vec();
        let len = data.len() as u32;
        let inline = (len + 15) / 16;
        let bds = 2 + inline;
        let prod = ring.prod();
        let opaque = tx_opaque(q.napi_slot, bds, prod);
        let lft = TX_BD_TYPE_LONG_TX_BD | len << TX_BD_LEN_SHIFT | bds << TX_BD_FLAGS_BD_CNT_SHIFT
            | TX_BD_FLAGS_PACKET_END | length_hint(len);
        let first = TxBd::new(lft, opaque, 0);
        let ext = ext_bd(&pkt);

        ring.write_bd(prod, &first);
        ring.write_bd(prod.wrapping_add(1), &ext);
        for (i, chunk) in data.chunks(16).enumerate() {
            let mut slot = [0u8; 16];
            slot[..chunk.len()].copy_from_slice(chunk);
            ring.write_bd(prod.wrapping_add(2 + i as u32), &slot);
        }

        let next = prod.wrapping_add(bds);
        let mut bytes = Vec::with_capacity(32 + data.len());
        if push.mode() == PushMode::Legacy {
            let pbd = TxPushBd {
                doorbell:       Le32::new(db.legacy_push_word(next)),
                len_flags_type: Le32::new(lft),
                opaque:         Le32::new(opaque),
                rsvd:           Le32::new(0),
                ext,
            };
            bytes.extend_from_slice(pbd.as_bytes());
        } else {
            bytes.extend_from_slice(first.as_bytes());
            bytes.extend_from_slice(ext.as_bytes());
        }
        bytes.extend_from_slice(&data);

        // SAFE: the xmit lock is held and `prod` is outside [cons, prod).
        let desc = unsafe { ring.soft_desc(prod) };
        desc.packet = Some(pkt);
        desc.nr_bds = bds as u16;
        desc.is_push = true;
        desc.inline_bds = inline as u16;
        desc.opaque = opaque;
        ring.publish(next);
        push.push(db, next, &bytes);
        q.stats.push.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Maps `pkt` and writes its BD chain. Returns false if the packet was dropped.
    pub(crate) fn xmit_bds(&self, q: &TxQueue, pkt: TransmitPacket) -> bool {
        let ring = &q.ring;
        let hal = ring.hal();
        let len = pkt.len();
        let hint_len = match pkt.gso {
            Some(gso) => {
                let seg = gso.size as usize + pkt.lso_header_len();
                if seg > BNXT_MAX_LSO_SEG {
                    warn!("bnxt: LSO segment of {} bytes is too large", seg);
                    return false;
                }
                seg
            }
            None => len,
        };

        let Some(head_map) = DmaMapping::map(&**hal, &pkt.head, DmaDirection::ToDevice) else {
            warn!("bnxt: {}", <&'static str>::from(crate::BnxtError::DmaMappingFailed));
            return false;
        };
        let mut frag_maps = Vec::new();
        let mut frag_bds = Vec::with_capacity(pkt.nr_frags());
        for frag in pkt.frags.iter() {
            let (addr, flen) = match frag {
                TxFrag::Heap(buf) => match DmaMapping::map(&**hal, buf, DmaDirection::ToDevice) {
                    Some(map) => {
                        let entry = (map.phys_addr().value(), map.len() as u32);
                        frag_maps.push(map);
                        entry
                    }
                    None => {
                        warn!("bnxt: {}", <&'static str>::from(crate::BnxtError::DmaMappingFailed));
                        head_map.unmap(&**hal);
                        unmap_all(hal, frag_maps);
                        return false;
                    }
                },
                TxFrag::Dma(buf) => (buf.phys_addr().value(), buf.length() as u32),
            };
            frag_bds.push((addr, flen));
        }

        let timed = pkt.launch_time.is_some() as u32;
        let bds = BNXT_TX_BD_BASE_CNT + timed + frag_bds.len() as u32;
        let prod = ring.prod();
        let opaque = tx_opaque(q.napi_slot, bds, prod);
        let head_len = pkt.head.len() as u32;
        let mut lft = TX_BD_TYPE_LONG_TX_BD | head_len << TX_BD_LEN_SHIFT | bds << TX_BD_FLAGS_BD_CNT_SHIFT
            | length_hint(hint_len as u32);
        if frag_bds.is_empty() {
            lft |= TX_BD_FLAGS_PACKET_END;
        }
        ring.write_bd(prod, &TxBd::new(lft, opaque, head_map.phys_addr().value()));
        ring.write_bd(prod.wrapping_add(1), &ext_bd(&pkt));
        let mut idx = prod.wrapping_add(2);
        if let Some(time) = pkt.launch_time {
            let timed_bd = TxBdTimed {
                flags_type: Le32::new(TX_BD_TYPE_TIMEDTX_BD),
                rsvd:       Le32::new(0),
                tx_time:    Le64::new(time),
            };
            ring.write_bd(idx, &timed_bd);
            idx = idx.wrapping_add(1);
        }
        let last = frag_bds.len();
        for (i, (addr, flen)) in frag_bds.into_iter().enumerate() {
            let mut flags = flen << TX_BD_LEN_SHIFT;
            if i + 1 == last {
                flags |= TX_BD_FLAGS_PACKET_END;
            }
            ring.write_bd(idx, &TxBd::new(flags, opaque, addr));
            idx = idx.wrapping_add(1);
        }

        // SAFE: the xmit lock is held and `prod` is outside [cons, prod).
        let desc = unsafe { ring.soft_desc(prod) };
        desc.nr_frags = pkt.nr_frags() as u16;
        desc.is_ts_pkt = pkt.hw_timestamp;
        desc.packet = Some(pkt);
        desc.head_map = Some(head_map);
        desc.frag_maps = frag_maps;
        desc.nr_bds = bds as u16;
        desc.opaque = opaque;
        ring.publish(idx);
        true
    }

    /// Reclaims the packets a TX completion covers. Returns the number freed.
    ///
    /// The completion's opaque names the first slot and BD count of the last packet it
    /// covers; every packet from the consumer index up to it is done.
    pub(crate) fn tx_complete(&self, fabric: &Fabric, q: &TxQueue, cmp: &TxCmp) -> usize {
        let ring = &q.ring;
        let opaque = cmp.opaque.get();
        let cons = ring.cons();
        let end16 = tx_opaque_idx(opaque).wrapping_add(tx_opaque_bds(opaque));
        let done = end16.wrapping_sub(cons) & 0xffff;
        if done == 0 || done > ring.in_flight() {
            error!("bnxt: TX ring {} completion {:#x} does not match cons {} prod {}",
                ring.index, opaque, cons, ring.prod());
            self.tx_fault(q);
            return 0;
        }
        let target = cons.wrapping_add(done);
        let pushed = cmp.flags_type.get() & TX_CMP_FLAGS_PUSH != 0;

        let mut freed = 0;
        let mut idx = cons;
        while idx != target {
            // SAFE: `idx` is in [cons, prod), which only the poll loop touches.
            let desc = unsafe { ring.soft_desc(idx) };
            let bds = desc.nr_bds.max(1) as u32;
            let was_push = desc.is_push;
            match desc.release(ring.hal()) {
                Some(pkt) => {
                    freed += 1;
                    q.stats.packets.fetch_add(1, Ordering::Relaxed);
                    q.stats.bytes.fetch_add(pkt.len() as u64, Ordering::Relaxed);
                    if was_push && pushed {
                        q.stats.push_cmpl.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    error!("bnxt: TX ring {} slot {} holds no packet", ring.index, ring.slot(idx));
                    self.tx_fault(q);
                    ring.complete(idx);
                    return freed;
                }
            }
            idx = idx.wrapping_add(bds);
        }
        ring.complete(target);

        if ring.is_stopped() && ring.avail() >= fabric.params.tx_wake_thresh {
            let _guard = ring.lock_xmit();
            if ring.avail() >= fabric.params.tx_wake_thresh {
                ring.wake();
            }
        }
        freed
    }

    fn tx_fault(&self, q: &TxQueue) {
        q.stats.fault.store(true, Ordering::Release);
        q.ring.stop();
        self.pending.lock().tx_fault = true;
        self.queue_sp_event(SpEvents::RESET_RING);
    }
}
