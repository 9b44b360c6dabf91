//! Device and per-ring statistics.

use core::sync::atomic::Ordering;
use alloc::vec::Vec;
use bnxt_hsi::CtxHwStats;
use crate::Bnxt;

/// Software counters of one NAPI context, kept by the poll loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct RingSwStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_buf_errors: u64,
    pub rx_l2_errors: u64,
    /// Packets dropped because they arrived during a zero-budget poll.
    pub rx_netpoll_discards: u64,
    pub rx_oom_discards: u64,
    pub rx_l4_csum_errors: u64,
    pub rx_tpa_pkts: u64,
    pub rx_resets: u64,
    pub xdp_tx: u64,
    pub xdp_drops: u64,
    pub xdp_redirects: u64,
}

impl RingSwStats {
    fn add(&mut self, o: &RingSwStats) {
        self.rx_packets += o.rx_packets;
        self.rx_bytes += o.rx_bytes;
        self.rx_buf_errors += o.rx_buf_errors;
        self.rx_l2_errors += o.rx_l2_errors;
        self.rx_netpoll_discards += o.rx_netpoll_discards;
        self.rx_oom_discards += o.rx_oom_discards;
        self.rx_l4_csum_errors += o.rx_l4_csum_errors;
        self.rx_tpa_pkts += o.rx_tpa_pkts;
        self.rx_resets += o.rx_resets;
        self.xdp_tx += o.xdp_tx;
        self.xdp_drops += o.xdp_drops;
        self.xdp_redirects += o.xdp_redirects;
    }
}

/// The counters of one NAPI context.
#[derive(Clone, Copy, Debug, Default)]
pub struct RingStats {
    pub napi: u16,
    /// What firmware counted into the ring's statistics context.
    pub hw_rx_pkts: u64,
    pub hw_rx_bytes: u64,
    pub hw_rx_discards: u64,
    pub hw_rx_errors: u64,
    pub hw_tx_pkts: u64,
    pub hw_tx_bytes: u64,
    pub hw_tx_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub tx_push: u64,
    pub tx_push_cmpl: u64,
    pub sw: RingSwStats,
}

/// Totals across every ring, including rings that no longer exist.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
    pub rx_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub tx_errors: u64,
    pub sw: RingSwStats,
}

impl DeviceStats {
    fn add_ring(&mut self, r: &RingStats) {
        self.rx_packets += r.sw.rx_packets;
        self.rx_bytes += r.sw.rx_bytes;
        self.rx_dropped += r.hw_rx_discards + r.sw.rx_oom_discards + r.sw.rx_netpoll_discards;
        self.rx_errors += r.hw_rx_errors + r.sw.rx_buf_errors + r.sw.rx_l2_errors;
        self.tx_packets += r.tx_packets;
        self.tx_bytes += r.tx_bytes;
        self.tx_dropped += r.tx_dropped;
        self.tx_errors += r.hw_tx_errors;
        self.sw.add(&r.sw);
    }

    fn add(&mut self, o: &DeviceStats) {
        self.rx_packets += o.rx_packets;
        self.rx_bytes += o.rx_bytes;
        self.rx_dropped += o.rx_dropped;
        self.rx_errors += o.rx_errors;
        self.tx_packets += o.tx_packets;
        self.tx_bytes += o.tx_bytes;
        self.tx_dropped += o.tx_dropped;
        self.tx_errors += o.tx_errors;
        self.sw.add(&o.sw);
    }
}

impl Bnxt {
    /// Counters of every NAPI context of the open device.
    pub fn get_ring_stats(&self) -> Vec<RingStats> {
        let Some(fabric) = self.fabric() else { return Vec::new() };
        fabric.napis.iter().enumerate().map(|(i, slot)| {
            let napi = slot.lock();
            let mut rs = RingStats { napi: i as u16, sw: napi.sw, ..Default::default() };
            if let Some(ctx) = fabric.stat_ctxs.get(i) {
                let hw: CtxHwStats = ctx.mem.read(0);
                rs.hw_rx_pkts = hw.rx_ucast_pkts.get() + hw.rx_mcast_pkts.get() + hw.rx_bcast_pkts.get();
                rs.hw_rx_bytes = hw.rx_ucast_bytes.get() + hw.rx_mcast_bytes.get() + hw.rx_bcast_bytes.get();
                rs.hw_rx_discards = hw.rx_discard_pkts.get();
                rs.hw_rx_errors = hw.rx_error_pkts.get();
                rs.hw_tx_pkts = hw.tx_ucast_pkts.get() + hw.tx_mcast_pkts.get() + hw.tx_bcast_pkts.get();
                rs.hw_tx_bytes = hw.tx_ucast_bytes.get() + hw.tx_mcast_bytes.get() + hw.tx_bcast_bytes.get();
                rs.hw_tx_errors = hw.tx_error_pkts.get() + hw.tx_discard_pkts.get();
            }
            for &t in napi.tx.iter() {
                let s = &fabric.txq[t].stats;
                rs.tx_packets += s.packets.load(Ordering::Relaxed);
                rs.tx_bytes += s.bytes.load(Ordering::Relaxed);
                rs.tx_dropped += s.dropped.load(Ordering::Relaxed);
                rs.tx_push += s.push.load(Ordering::Relaxed);
                rs.tx_push_cmpl += s.push_cmpl.load(Ordering::Relaxed);
            }
            rs
        }).collect()
    }

    /// Device totals: the live rings plus everything counted before the last close.
    pub fn get_stats(&self) -> DeviceStats {
        let mut stats = *self.prev_stats.lock();
        stats.add(&self.live_stats());
        stats
    }

    fn live_stats(&self) -> DeviceStats {
        let mut stats = DeviceStats::default();
        for rs in self.get_ring_stats() {
            stats.add_ring(&rs);
        }
        stats
    }

    /// Folds the counters of the rings about to be freed into the running totals.
    pub(crate) fn save_stats(&self) {
        let live = self.live_stats();
        self.prev_stats.lock().add(&live);
    }
}
