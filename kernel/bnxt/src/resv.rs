//! Negotiating ring and context counts with firmware.

use core::cmp::{max, min};
use bnxt_hsi::Le16;
use bnxt_hsi::hwrm::*;
use nic_buffers::ETH_HLEN;
use crate::{Bnxt, BnxtConfig, BnxtError, NetFeatures};
use crate::config::{BNXT_RSS_RINGS_PER_CTX, BNXT_RX_HEADROOM, BNXT_RX_PAGE_SIZE, VLAN_HLEN};

/// Counts of the rings and contexts a function uses.
///
/// The same shape describes firmware maxima, what the driver asks for, and what was granted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingCounts {
    pub tx: u16,
    /// RX rings as the stack sees them; with `agg` each one is two hardware rings.
    pub rx: u16,
    pub cp: u16,
    pub stat: u16,
    pub vnic: u16,
    pub rss: u16,
    pub grp: u16,
    pub l2: u16,
    pub msix: u16,
    /// Every RX ring has an aggregation ring.
    pub agg: bool,
    /// TX ring `i` and RX ring `i` share a completion ring.
    pub shared: bool,
    /// One extra VNIC per RX ring steers ntuple flows.
    pub rfs: bool,
}

impl RingCounts {
    /// The number of NAPI contexts, each with its own completion ring and interrupt.
    pub fn napis(&self) -> u16 {
        if self.shared {
            max(self.tx, self.rx)
        } else {
            self.tx + self.rx
        }
    }

    /// The number of hardware RX rings, counting aggregation rings.
    pub fn rx_hw(&self) -> u16 {
        if self.agg { self.rx * 2 } else { self.rx }
    }

    /// Recomputes every count that follows from the TX and RX ring counts.
    fn derive(&mut self, p5_plus: bool) {
        let napis = self.napis();
        self.cp = napis;
        self.stat = napis;
        self.msix = napis;
        self.vnic = if self.rfs { 1 + self.rx } else { 1 };
        self.rss = if p5_plus {
            let per_vnic = (self.rx as usize + BNXT_RSS_RINGS_PER_CTX - 1) / BNXT_RSS_RINGS_PER_CTX;
            max(1, per_vnic as u16) * self.vnic
        } else {
            self.vnic
        };
        self.grp = if p5_plus { 0 } else { self.rx };
        self.l2 = max(self.l2, 1);
    }

    fn from_qcfg(resp: &FuncQcfgOutput) -> RingCounts {
        RingCounts {
            tx:   resp.alloc_tx_rings.get(),
            rx:   resp.alloc_rx_rings.get(),
            cp:   resp.alloc_cmpl_rings.get(),
            stat: resp.alloc_stat_ctx.get(),
            vnic: resp.alloc_vnics.get(),
            rss:  resp.alloc_rsscos_ctx.get(),
            grp:  resp.alloc_hw_ring_grps.get(),
            l2:   resp.alloc_l2_ctx.get(),
            msix: resp.alloc_msix.get(),
            ..RingCounts::default()
        }
    }
}

/// Fits the RX and TX ring counts into `max` completion rings.
///
/// Shared rings only need each count to fit; otherwise their sum must, and the larger
/// count gives up a ring until it does.
pub fn trim_rings(rx: &mut u16, tx: &mut u16, max: u16, shared: bool) -> Result<(), BnxtError> {
    if shared {
        *rx = min(*rx, max);
        *tx = min(*tx, max);
        return Ok(());
    }
    if max < 2 {
        return Err(BnxtError::ResourceExhausted);
    }
    while *rx + *tx > max {
        if *rx > *tx && *rx > 1 {
            *rx -= 1;
        } else if *tx > 1 {
            *tx -= 1;
        } else {
            return Err(BnxtError::ResourceExhausted);
        }
    }
    Ok(())
}

/// Whether RX rings need aggregation rings: for hardware aggregation, or when a
/// frame does not fit one page.
pub(crate) fn wants_agg(cfg: &BnxtConfig, xdp: bool, fw_max_tpa: u16) -> bool {
    let tpa = cfg.features.tpa() && !xdp && cfg.max_tpa > 0 && fw_max_tpa > 0;
    let headroom = if xdp { crate::config::XDP_PACKET_HEADROOM } else { BNXT_RX_HEADROOM };
    let jumbo = cfg.mtu as usize + ETH_HLEN + VLAN_HLEN + headroom > BNXT_RX_PAGE_SIZE;
    tpa || jumbo
}

impl Bnxt {
    /// The counts the current configuration asks for, clamped to firmware maxima.
    fn desired_rings(&self) -> RingCounts {
        let cfg = self.cfg.lock().clone();
        let info_max = self.info.lock().max;
        let fw_max_tpa = self.info.lock().max_tpa;
        let xdp = self.xdp.lock().is_some();
        let mut want = RingCounts {
            tx: max(1, min(cfg.tx_rings, info_max.tx)),
            rx: max(1, cfg.rx_rings),
            agg: wants_agg(&cfg, xdp, fw_max_tpa),
            shared: cfg.shared_cp,
            rfs: cfg.rfs && !self.vf,
            l2: 1,
            ..RingCounts::default()
        };
        let rx_max = if want.agg { info_max.rx / 2 } else { info_max.rx };
        want.rx = max(1, min(want.rx, rx_max));
        want.derive(self.chip.is_p5_plus());
        want
    }

    /// Computes the initial ring counts without talking to firmware.
    pub(crate) fn init_ring_counts(&self) {
        let mut want = self.desired_rings();
        let max_cp = self.info.lock().max.cp;
        if trim_rings(&mut want.rx, &mut want.tx, max_cp, want.shared).is_ok() {
            want.derive(self.chip.is_p5_plus());
        }
        *self.rings.lock() = want;
    }

    /// The ring counts negotiated for the device.
    pub fn ring_counts(&self) -> RingCounts {
        *self.rings.lock()
    }

    /// Reserves what the configuration asks for and settles for what firmware grants.
    pub(crate) fn reserve_rings(&self) -> Result<RingCounts, BnxtError> {
        let p5 = self.chip.is_p5_plus();
        let mut want = self.desired_rings();
        let mut granted = self.hwrm_reserve(&want)?;

        if granted.rx < want.rx_hw() {
            want.rx = max(1, want.rx / 2);
            want.derive(p5);
            granted = self.hwrm_reserve(&want)?;
            if granted.rx < want.rx_hw() && want.agg {
                warn!("bnxt: only {} RX rings granted, disabling aggregation rings", granted.rx);
                want.agg = false;
                want.derive(p5);
                self.cfg.lock().features.remove(NetFeatures::LRO | NetFeatures::GRO_HW);
                granted = self.hwrm_reserve(&want)?;
            }
        }

        if want.rfs && (granted.vnic < want.vnic || granted.rss < want.rss) {
            warn!("bnxt: not enough VNICs or RSS contexts for RFS, disabling it");
            want.rfs = false;
            want.derive(p5);
            self.cfg.lock().rfs = false;
            granted = self.hwrm_reserve(&want)?;
        }

        let mut rx = min(want.rx, if want.agg { granted.rx / 2 } else { granted.rx });
        let mut tx = min(want.tx, granted.tx);
        let max_cp = granted.cp;
        trim_rings(&mut rx, &mut tx, max_cp, want.shared)?;
        if rx == 0 || tx == 0 || granted.stat < min(want.stat, max_cp) || granted.vnic == 0 {
            error!("bnxt: firmware granted too few resources: {:?}", granted);
            return Err(BnxtError::ResourceExhausted);
        }
        let mut result = RingCounts { rx, tx, ..want };
        result.derive(p5);
        info!("bnxt: reserved {} TX, {} RX{} rings on {} completion rings",
            result.tx, result.rx, if result.agg { " (+AGG)" } else { "" }, result.cp);
        *self.rings.lock() = result;
        Ok(result)
    }

    /// Makes firmware's reservation match `want` and returns what it then holds.
    fn hwrm_reserve(&self, want: &RingCounts) -> Result<RingCounts, BnxtError> {
        let cur = RingCounts::from_qcfg(&self.func_qcfg()?);
        let fields: [(u32, u16, u16); 9] = [
            (FUNC_CFG_ENABLES_NUM_TX_RINGS, cur.tx, want.tx),
            (FUNC_CFG_ENABLES_NUM_RX_RINGS, cur.rx, want.rx_hw()),
            (FUNC_CFG_ENABLES_NUM_CMPL_RINGS, cur.cp, want.cp),
            (FUNC_CFG_ENABLES_NUM_STAT_CTXS, cur.stat, want.stat),
            (FUNC_CFG_ENABLES_NUM_VNICS, cur.vnic, want.vnic),
            (FUNC_CFG_ENABLES_NUM_RSSCOS_CTXS, cur.rss, want.rss),
            (FUNC_CFG_ENABLES_NUM_HW_RING_GRPS, cur.grp, want.grp),
            (FUNC_CFG_ENABLES_NUM_L2_CTXS, cur.l2, want.l2),
            (FUNC_CFG_ENABLES_NUM_MSIX, cur.msix, want.msix),
        ];
        let enables = fields.iter()
            .filter(|(bit, have, need)| have != need && !(self.vf && *bit == FUNC_CFG_ENABLES_NUM_MSIX))
            .fold(0, |acc, (bit, _, _)| acc | bit);
        if enables == 0 {
            return Ok(cur);
        }
        debug!("bnxt: reserving {:?} (enables {:#x})", want, enables);

        if self.vf {
            let mut req = self.hwrm.req_init::<FuncVfCfgInput>()?;
            req.req.enables = bnxt_hsi::Le32::new(enables);
            req.req.num_tx_rings = Le16::new(want.tx);
            req.req.num_rx_rings = Le16::new(want.rx_hw());
            req.req.num_cmpl_rings = Le16::new(want.cp);
            req.req.num_stat_ctxs = Le16::new(want.stat);
            req.req.num_vnics = Le16::new(want.vnic);
            req.req.num_rsscos_ctxs = Le16::new(want.rss);
            req.req.num_hw_ring_grps = Le16::new(want.grp);
            req.req.num_l2_ctxs = Le16::new(want.l2);
            req.send()?;
        } else {
            let mut req = self.hwrm.req_init::<FuncCfgInput>()?;
            req.req.fid = Le16::new(0xffff);
            req.req.enables = bnxt_hsi::Le32::new(enables);
            req.req.num_tx_rings = Le16::new(want.tx);
            req.req.num_rx_rings = Le16::new(want.rx_hw());
            req.req.num_cmpl_rings = Le16::new(want.cp);
            req.req.num_stat_ctxs = Le16::new(want.stat);
            req.req.num_vnics = Le16::new(want.vnic);
            req.req.num_rsscos_ctxs = Le16::new(want.rss);
            req.req.num_hw_ring_grps = Le16::new(want.grp);
            req.req.num_l2_ctxs = Le16::new(want.l2);
            req.req.num_msix = Le16::new(want.msix);
            req.send()?;
        }
        Ok(RingCounts::from_qcfg(&self.func_qcfg()?))
    }

    /// Checks whether the device could run with `hwr`, without changing anything.
    pub fn hwrm_check_rings(&self, hwr: &RingCounts) -> Result<(), BnxtError> {
        let max = self.info.lock().max;
        let mut rx = hwr.rx;
        let mut tx = hwr.tx;
        trim_rings(&mut rx, &mut tx, max.cp, hwr.shared)?;
        let too_many = rx != hwr.rx || tx != hwr.tx
            || hwr.tx > max.tx
            || hwr.rx_hw() > max.rx
            || hwr.napis() > max.stat
            || hwr.vnic > max.vnic
            || (!self.chip.is_p5_plus() && hwr.rx > max.grp);
        if too_many {
            debug!("bnxt: {:?} does not fit within {:?}", hwr, max);
            return Err(BnxtError::ResourceExhausted);
        }
        Ok(())
    }
}
