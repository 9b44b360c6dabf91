//! The receive path: RX, AGG and TPA completions.

use alloc::vec::Vec;
use nic_buffers::{ChecksumStatus, GsoInfo, GsoType, PacketHead, ReceiveBuffer, ReceivedPacket, RssHash, VlanTag,
    ETH_P_8021AD, ETH_P_8021Q};
use bnxt_hsi::cmpl::*;
use bnxt_rings::{CpRing, RxRing};
use crate::{Bnxt, NetFeatures, SpEvents, XdpAction};
use crate::config::BNXT_BUF_ERR_RESET_THRESH;
use crate::napi::{Fabric, Napi};
use crate::stats::RingSwStats;
use crate::xdp::xdp_tx_ring;

/// What became of one RX completion.
pub(crate) enum RxOutcome {
    /// The completion was consumed; `packet` is true if it counts against the budget.
    Done { slots: u32, packet: bool },
    /// Part of the completion has not been written yet.
    Busy,
}

fn rss_hash(features: NetFeatures, flags: u32, hash: u32) -> Option<RssHash> {
    if !features.contains(NetFeatures::RXHASH) || flags & RX_CMP_FLAGS_RSS_VALID == 0 {
        return None;
    }
    let itype = flags & RX_CMP_FLAGS_ITYPES_MASK;
    Some(RssHash { value: hash, l4: itype == RX_CMP_FLAGS_ITYPE_TCP || itype == RX_CMP_FLAGS_ITYPE_UDP })
}

fn vlan_tag(features: NetFeatures, vlan: Option<(u16, u32)>) -> Option<VlanTag> {
    if !features.contains(NetFeatures::HW_VLAN_RX) {
        return None;
    }
    vlan.map(|(tci, tpid)| VlanTag {
        tci,
        proto: if tpid == RX_CMP_METADATA_TPID_8021Q { ETH_P_8021Q } else { ETH_P_8021AD },
    })
}

/// Returns every buffer of a dropped packet to its ring.
fn recycle(rx: &mut RxRing, head: Option<ReceiveBuffer>, frags: Vec<ReceiveBuffer>) {
    if let Some(buf) = head {
        rx.reuse_rx(buf);
    }
    for buf in frags {
        rx.reuse_agg(buf);
    }
}

/// Takes the AGG buffers named by `aggs`, sized to what the NIC wrote.
fn take_aggs(rx: &mut RxRing, aggs: &[RxAggCmp]) -> Vec<ReceiveBuffer> {
    let mut bufs = Vec::with_capacity(aggs.len());
    for cmp in aggs {
        match rx.take_agg(cmp.opaque.get()) {
            Some(mut buf) => {
                if buf.set_received_len(cmp.len()).is_err() {
                    warn!("bnxt: AGG completion length {} exceeds its buffer", cmp.len());
                }
                bufs.push(buf);
            }
            None => warn!("bnxt: RX ring {} AGG slot {} is empty", rx.index, cmp.opaque.get()),
        }
    }
    bufs
}

/// Posts a fresh AGG buffer for each taken one, or none at all. On failure the taken
/// buffers must be recycled instead.
fn replace_aggs(rx: &mut RxRing, count: usize) -> bool {
    if count == 0 {
        return true;
    }
    let Some(pool) = rx.agg_pool().cloned() else { return false };
    let fresh: Option<Vec<ReceiveBuffer>> = (0..count).map(|_| pool.alloc()).collect();
    match fresh {
        Some(bufs) => {
            bufs.into_iter().for_each(|b| rx.reuse_agg(b));
            true
        }
        None => false,
    }
}

impl Bnxt {
    /// Handles an `RX_L2` completion at raw index `raw` of the NAPI's completion ring.
    pub(crate) fn rx_pkt(&self, fabric: &Fabric, napi: &mut Napi, raw: u32, budget_zero: bool) -> RxOutcome {
        let Napi { index, cq, rx, sw, buf_errors, rx_fault, tx, .. } = napi;
        let cmp: RxCmp = cq.read(raw);
        if !cq.is_valid(raw.wrapping_add(1)) {
            return RxOutcome::Busy;
        }
        let agg_bufs = cmp.agg_bufs();
        let slots = 2 + agg_bufs;
        if agg_bufs > 0 && !cq.is_valid(raw.wrapping_add(slots - 1)) {
            return RxOutcome::Busy;
        }
        let ext: RxCmpExt = cq.read(raw.wrapping_add(1));
        let aggs = read_aggs(cq, raw.wrapping_add(2), agg_bufs);
        let Some(ring) = rx.as_mut() else {
            warn!("bnxt: RX completion on NAPI {} which has no RX ring", index);
            return RxOutcome::Done { slots, packet: false };
        };

        let opaque = cmp.opaque.get();
        if ring.slot(opaque) != ring.slot(ring.rx_next_cons()) {
            error!("bnxt: RX ring {} completion for slot {} while expecting {}",
                ring.index, ring.slot(opaque), ring.slot(ring.rx_next_cons()));
            self.rx_ring_fault(ring.index, rx_fault);
            return RxOutcome::Done { slots, packet: false };
        }
        let Some(mut buf) = ring.take_rx(opaque) else {
            error!("bnxt: RX ring {} slot {} is empty", ring.index, ring.slot(opaque));
            self.rx_ring_fault(ring.index, rx_fault);
            return RxOutcome::Done { slots, packet: false };
        };
        let frags = take_aggs(ring, &aggs);

        let errors = ext.errors();
        if errors & RX_CMPL_ERRORS_BUFFER_ERROR_MASK != 0 {
            sw.rx_buf_errors += 1;
            *buf_errors += 1;
            warn!("bnxt: RX ring {} buffer error {:#x}", ring.index, errors);
            recycle(ring, Some(buf), frags);
            if *buf_errors >= BNXT_BUF_ERR_RESET_THRESH && self.chip.is_p5_plus() {
                self.rx_ring_fault(ring.index, rx_fault);
            }
            return RxOutcome::Done { slots, packet: false };
        }
        if errors & RX_CMP_L2_ERRORS != 0 {
            sw.rx_l2_errors += 1;
            recycle(ring, Some(buf), frags);
            return RxOutcome::Done { slots, packet: false };
        }
        *buf_errors = 0;
        if budget_zero {
            sw.rx_netpoll_discards += 1;
            recycle(ring, Some(buf), frags);
            return RxOutcome::Done { slots, packet: true };
        }
        if buf.set_received_len(cmp.len()).is_err() {
            warn!("bnxt: RX completion length {} exceeds its buffer", cmp.len());
        }

        if let Some(prog) = fabric.params.xdp.as_ref() {
            let frag_views: Vec<&[u8]> = frags.iter().map(|f| &f[..]).collect();
            let action = prog.run(&buf[..], &frag_views);
            drop(frag_views);
            if action != XdpAction::Pass {
                let frame = || {
                    let mut v = buf.to_vec();
                    frags.iter().for_each(|f| v.extend_from_slice(f));
                    v
                };
                match action {
                    XdpAction::Tx => {
                        let sent = xdp_tx_ring(fabric, tx, ring.index as usize)
                            .map_or(false, |t| self.xdp_xmit(fabric, t, frame()));
                        if sent { sw.xdp_tx += 1 } else { sw.xdp_drops += 1 }
                    }
                    XdpAction::Redirect => {
                        if self.sink.xdp_redirect(*index, &frame()) { sw.xdp_redirects += 1 } else { sw.xdp_drops += 1 }
                    }
                    _ => sw.xdp_drops += 1,
                }
                recycle(ring, Some(buf), frags);
                return RxOutcome::Done { slots, packet: true };
            }
        }

        if !replace_aggs(ring, frags.len()) {
            sw.rx_oom_discards += 1;
            recycle(ring, Some(buf), frags);
            return RxOutcome::Done { slots, packet: true };
        }
        let len = cmp.len() as usize;
        let head = if frags.is_empty() && len <= fabric.params.rx_copy_thresh {
            let copy = buf.to_vec();
            ring.reuse_rx(buf);
            PacketHead::Copied(copy)
        } else {
            if ring.alloc_rx().is_err() {
                // The AGG slots are already refilled, so only the head goes back.
                sw.rx_oom_discards += 1;
                ring.reuse_rx(buf);
                drop(frags);
                return RxOutcome::Done { slots, packet: true };
            }
            PacketHead::Buffer(buf)
        };

        let features = fabric.params.features;
        let mut pkt = ReceivedPacket::new(head);
        for f in frags {
            pkt.push_frag(f);
        }
        pkt.queue_index = ring.index;
        pkt.rss_hash = rss_hash(features, cmp.flags(), cmp.rss_hash.get());
        pkt.vlan = vlan_tag(features, ext.vlan());
        pkt.csum = rx_csum(features, ext.flags2.get(), errors, sw);
        if cmp.itype() == RX_CMP_FLAGS_ITYPE_PTP_W_TS {
            pkt.hw_timestamp = Some(ext.timestamp.get() as u64);
        }
        sw.rx_packets += 1;
        sw.rx_bytes += pkt.len() as u64;
        self.sink.deliver(*index, pkt);
        RxOutcome::Done { slots, packet: true }
    }

    /// Handles a `RX_TPA_START` completion: the head buffer is parked until the aggregation ends.
    pub(crate) fn tpa_start(&self, napi: &mut Napi, raw: u32) -> RxOutcome {
        let Napi { cq, rx, sw, rx_fault, .. } = napi;
        if !cq.is_valid(raw.wrapping_add(1)) {
            return RxOutcome::Busy;
        }
        let start: RxTpaStartCmp = cq.read(raw);
        let ext: RxTpaStartCmpExt = cq.read(raw.wrapping_add(1));
        let done = RxOutcome::Done { slots: 2, packet: false };
        let Some(ring) = rx.as_mut() else { return done };
        let opaque = start.opaque.get();
        if ring.slot(opaque) != ring.slot(ring.rx_next_cons()) {
            error!("bnxt: TPA start on RX ring {} for slot {} out of order", ring.index, ring.slot(opaque));
            self.rx_ring_fault(ring.index, rx_fault);
            return done;
        }
        let Some(mut buf) = ring.take_rx(opaque) else { return done };
        let (index, agg_id) = (ring.index, start.agg_id());
        if !ring.tpa.as_mut().map_or(false, |t| t.start(agg_id).is_some()) {
            warn!("bnxt: RX ring {} cannot track TPA id {}", index, agg_id);
            ring.reuse_rx(buf);
            return done;
        }
        if buf.set_received_len(start.len()).is_err() {
            warn!("bnxt: TPA start length {} exceeds its buffer", start.len());
        }
        // Without a replacement the head stays on the ring and the aggregation is discarded.
        let data = match ring.alloc_rx() {
            Ok(()) => Some(buf),
            Err(_) => {
                sw.rx_oom_discards += 1;
                ring.reuse_rx(buf);
                None
            }
        };
        let Some(info) = ring.tpa.as_mut().and_then(|t| t.get_mut(agg_id)) else { return done };
        info.data = data;
        info.len = start.len();
        info.flags = start.len_flags_type.get();
        info.rss_hash = start.rss_hash.get();
        info.hash_type = start.hash_type();
        info.flags2 = ext.flags2.get();
        info.metadata = ext.metadata.get();
        info.hdr_info = ext.hdr_info.get();
        info.aggs.clear();
        RxOutcome::Done { slots: 2, packet: false }
    }

    /// Records an AGG buffer reported for an open aggregation.
    pub(crate) fn tpa_agg(&self, napi: &mut Napi, raw: u32) {
        let cmp: RxAggCmp = napi.cq.read(raw);
        let Some(ring) = napi.rx.as_mut() else { return };
        match ring.tpa.as_mut().and_then(|t| t.get_mut(cmp.agg_id())) {
            Some(info) => info.aggs.push(cmp),
            None => warn!("bnxt: TPA AGG completion for unknown id {}", cmp.agg_id()),
        }
    }

    /// Handles a `RX_TPA_END` completion, turning the aggregation into one large packet.
    pub(crate) fn tpa_end(&self, fabric: &Fabric, napi: &mut Napi, raw: u32, budget_zero: bool) -> RxOutcome {
        let Napi { index, cq, rx, sw, .. } = napi;
        if !cq.is_valid(raw.wrapping_add(1)) {
            return RxOutcome::Busy;
        }
        let end: RxTpaEndCmp = cq.read(raw);
        let ext: RxTpaEndCmpExt = cq.read(raw.wrapping_add(1));
        let done = RxOutcome::Done { slots: 2, packet: true };
        let Some(ring) = rx.as_mut() else { return done };
        let Some(mut info) = ring.tpa.as_mut().and_then(|t| t.end(end.agg_id())) else {
            warn!("bnxt: TPA end for unknown id {} on RX ring {}", end.agg_id(), ring.index);
            return done;
        };
        let aggs = core::mem::take(&mut info.aggs);
        if aggs.len() as u32 != end.agg_bufs() {
            warn!("bnxt: TPA id {} ended with {} AGG buffers, {} were reported",
                end.agg_id(), end.agg_bufs(), aggs.len());
        }
        let frags = take_aggs(ring, &aggs);
        // The head slot was refilled at TPA start, so a dropped head is not reposted.
        let Some(buf) = info.data.take() else {
            recycle(ring, None, frags);
            return done;
        };
        if budget_zero || ext.errors() != 0 {
            sw.rx_netpoll_discards += budget_zero as u64;
            drop(buf);
            recycle(ring, None, frags);
            return done;
        }
        if !replace_aggs(ring, frags.len()) {
            sw.rx_oom_discards += 1;
            drop(buf);
            recycle(ring, None, frags);
            return done;
        }

        let features = fabric.params.features;
        let segs = ext.segs() as u16;
        let mut pkt = ReceivedPacket::new(PacketHead::Buffer(buf));
        for f in frags {
            pkt.push_frag(f);
        }
        pkt.queue_index = ring.index;
        pkt.rss_hash = rss_hash(features, info.flags, info.rss_hash);
        pkt.vlan = vlan_tag(features, {
            let tagged = info.flags2 & RX_CMP_FLAGS2_META_FORMAT_VLAN != 0;
            if tagged {
                Some(((info.metadata & RX_CMP_METADATA_TCI_MASK) as u16, info.metadata & RX_CMP_METADATA_TPID_MASK))
            } else {
                None
            }
        });
        if features.contains(NetFeatures::RXCSUM) && info.flags2 & RX_CMP_FLAGS2_L4_CS_CALC != 0 {
            pkt.csum = ChecksumStatus::Unnecessary { level: 0 };
        }
        if segs > 1 {
            let ipv6 = info.flags2 & RX_CMP_FLAGS2_IP_TYPE_V6 != 0;
            let size = match ext.gso_size() {
                0 => (pkt.len() as u32 / segs as u32) as u16,
                s => s as u16,
            };
            pkt.gso = Some(GsoInfo {
                kind: if ipv6 { GsoType::TcpV6 } else { GsoType::TcpV4 },
                size,
                segs,
                tunnel: false,
            });
        }
        sw.rx_tpa_pkts += 1;
        sw.rx_packets += 1;
        sw.rx_bytes += pkt.len() as u64;
        self.sink.deliver(*index, pkt);
        done
    }

    /// Marks an RX ring for a reset by the sp task. The poll loop skips it until then.
    fn rx_ring_fault(&self, ring: u16, rx_fault: &mut bool) {
        if *rx_fault {
            return;
        }
        *rx_fault = true;
        let mut pending = self.pending.lock();
        if !pending.rx_ring_resets.contains(&ring) {
            pending.rx_ring_resets.push(ring);
        }
        drop(pending);
        self.queue_sp_event(SpEvents::RESET_RING);
    }
}

fn read_aggs(cq: &CpRing, first: u32, count: u32) -> Vec<RxAggCmp> {
    (0..count).map(|i| cq.read(first.wrapping_add(i))).collect()
}

fn rx_csum(features: NetFeatures, flags2: u32, errors: u32, sw: &mut RingSwStats) -> ChecksumStatus {
    if !features.contains(NetFeatures::RXCSUM) || flags2 & RX_CMP_FLAGS2_L4_CS_CALC == 0 {
        return ChecksumStatus::None;
    }
    if errors & RX_CMP_L4_CS_ERRORS != 0 {
        sw.rx_l4_csum_errors += 1;
        return ChecksumStatus::None;
    }
    let level = (flags2 & RX_CMP_FLAGS2_T_L4_CS_CALC != 0) as u8;
    ChecksumStatus::Unnecessary { level }
}
