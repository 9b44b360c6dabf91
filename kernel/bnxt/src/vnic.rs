//! VNIC setup: the default VNIC with its RSS table, TPA, MAC filter and RX mask,
//! plus one VNIC per RX ring for flow steering.

use alloc::vec::Vec;
use bnxt_hsi::{Le16, Le32, Le64};
use bnxt_hsi::hwrm::*;
use nic_hal::DmaRegion;
use crate::{Bnxt, BnxtError, DevState, NetFeatures};
use crate::config::*;
use crate::control::RxMask;
use crate::filter::L2FilterKey;
use crate::napi::Fabric;

#[derive(Default)]
pub(crate) struct VnicState {
    pub id: Option<u16>,
    pub rss_ctx: Option<u16>,
    /// The RSS indirection table and hash key, handed to firmware by address.
    pub rss_mem: Option<DmaRegion>,
    pub l2_filter: Option<u64>,
    pub rx_mask: u32,
    /// Per-RX-ring VNICs for n-tuple steering, indexed by RX ring.
    pub rfs: Vec<u16>,
}

impl VnicState {
    pub fn default_id(&self) -> Option<u16> {
        self.id
    }
}

impl Bnxt {
    fn hwrm_vnic_alloc(&self, default: bool) -> Result<u16, BnxtError> {
        let mut req = self.hwrm.req_init::<VnicAllocInput>()?;
        if default {
            req.req.flags = Le32::new(VNIC_ALLOC_FLAGS_DEFAULT);
        }
        Ok(req.send()?.vnic_id.get() as u16)
    }

    fn hwrm_vnic_cfg(&self, fabric: &Fabric, vnic_id: u16, rx: usize, rss_ctx: Option<u16>) -> Result<(), BnxtError> {
        let cfg = self.cfg.lock().clone();
        let mut req = self.hwrm.req_init::<VnicCfgInput>()?;
        let mut enables = VNIC_CFG_ENABLES_MRU;
        req.req.vnic_id = Le16::new(vnic_id);
        req.req.mru = Le16::new(cfg.mtu + 14 + VLAN_HLEN as u16);
        if cfg.features.contains(NetFeatures::HW_VLAN_RX) {
            req.req.flags = Le32::new(VNIC_CFG_FLAGS_VLAN_STRIP_MODE);
        }
        if let Some(ctx) = rss_ctx {
            enables |= VNIC_CFG_ENABLES_RSS_RULE;
            req.req.rss_rule = Le16::new(ctx);
        }
        let napi = fabric.napis[fabric.rx_napi(rx)].lock();
        if self.chip.is_p5_plus() {
            enables |= VNIC_CFG_ENABLES_DEFAULT_RX_RING_ID | VNIC_CFG_ENABLES_DEFAULT_CMPL_RING_ID;
            req.req.default_rx_ring_id = Le16::new(napi.rx.as_ref().map_or(INVALID_HW_RING_ID, |r| r.fw_ring_id()));
            req.req.default_cmpl_ring_id = Le16::new(napi.cq.fw_ring_id());
        } else {
            enables |= VNIC_CFG_ENABLES_DFLT_RING_GRP;
            req.req.dflt_ring_grp = Le16::new(fabric.grps.get(rx).copied().unwrap_or(0) as u16);
        }
        drop(napi);
        req.req.enables = Le32::new(enables);
        req.send()?;
        Ok(())
    }

    /// Writes the RSS table: ring group ids on P4, RX ring ids on newer chips, spread
    /// round-robin over the RX rings.
    fn hwrm_vnic_rss_cfg(&self, fabric: &Fabric, vnic_id: u16, rss_ctx: u16, mem: &DmaRegion) -> Result<(), BnxtError> {
        let rx_nr = fabric.counts.rx.max(1) as usize;
        let ids: Vec<u16> = (0..rx_nr)
            .map(|r| if self.chip.is_p5_plus() {
                fabric.napis[fabric.rx_napi(r)].lock().rx.as_ref().map_or(INVALID_HW_RING_ID, |rx| rx.fw_ring_id())
            } else {
                fabric.grps.get(r).copied().unwrap_or(0) as u16
            })
            .collect();
        for i in 0..BNXT_RSS_TABLE_ENTRIES {
            mem.write::<u16>(i * 2, ids[i % rx_nr].to_le());
        }
        mem.copy_from(BNXT_RSS_TABLE_ENTRIES * 2, &self.cfg.lock().rss_key);

        let mut req = self.hwrm.req_init::<VnicRssCfgInput>()?;
        req.req.vnic_id = Le16::new(vnic_id);
        req.req.rss_ctx_idx = Le16::new(rss_ctx);
        req.req.hash_type = Le32::new(VNIC_RSS_CFG_HASH_TYPE_IPV4 | VNIC_RSS_CFG_HASH_TYPE_TCP_IPV4
            | VNIC_RSS_CFG_HASH_TYPE_UDP_IPV4 | VNIC_RSS_CFG_HASH_TYPE_IPV6
            | VNIC_RSS_CFG_HASH_TYPE_TCP_IPV6 | VNIC_RSS_CFG_HASH_TYPE_UDP_IPV6);
        let base = mem.phys_addr().value();
        req.req.ring_grp_tbl_addr = Le64::new(base);
        req.req.hash_key_tbl_addr = Le64::new(base + BNXT_RSS_TABLE_ENTRIES as u64 * 2);
        req.send()?;
        Ok(())
    }

    fn hwrm_vnic_tpa_cfg(&self, fabric: &Fabric, vnic_id: u16) -> Result<(), BnxtError> {
        let features = fabric.params.features;
        let mut req = self.hwrm.req_init::<VnicTpaCfgInput>()?;
        req.req.vnic_id = Le16::new(vnic_id);
        if fabric.counts.agg && features.intersects(NetFeatures::LRO | NetFeatures::GRO_HW) {
            let mut flags = VNIC_TPA_CFG_FLAGS_TPA | VNIC_TPA_CFG_FLAGS_ENCAP_TPA
                | VNIC_TPA_CFG_FLAGS_RSC_WND_UPDATE | VNIC_TPA_CFG_FLAGS_AGG_WITH_ECN
                | VNIC_TPA_CFG_FLAGS_AGG_WITH_SAME_GRE_SEQ;
            if features.contains(NetFeatures::GRO_HW) {
                flags |= VNIC_TPA_CFG_FLAGS_GRO;
            }
            req.req.flags = Le32::new(flags);
            req.req.enables = Le32::new(VNIC_TPA_CFG_ENABLES_MAX_AGG_SEGS
                | VNIC_TPA_CFG_ENABLES_MAX_AGGS | VNIC_TPA_CFG_ENABLES_MIN_AGG_LEN);
            // Segments are encoded as a power of two.
            req.req.max_agg_segs = Le16::new(5);
            let max_aggs = self.info.lock().max_tpa.min(self.cfg.lock().max_tpa).max(1);
            req.req.max_aggs = Le16::new(max_aggs.next_power_of_two().trailing_zeros() as u16);
            req.req.min_agg_len = Le32::new(512);
        }
        req.send()?;
        Ok(())
    }

    pub(crate) fn hwrm_set_rx_mask(&self, vnic_id: u16, mask: RxMask, mc: &[[u8; 6]]) -> Result<(), BnxtError> {
        let mut req = self.hwrm.req_init::<CfaL2SetRxMaskInput>()?;
        let mut bits = mask.bits();
        if !mc.is_empty() && !mask.contains(RxMask::ALL_MCAST) {
            let size = mc.len() * 6;
            let addr = req.dma_slice(size)?;
            if let Some(region) = req.slices().last() {
                for (i, a) in mc.iter().enumerate() {
                    region.copy_from(i * 6, a);
                }
            }
            bits |= CFA_L2_SET_RX_MASK_MCAST;
            req.req.mc_tbl_addr = Le64::new(addr.value());
            req.req.num_mc_entries = Le32::new(mc.len() as u32);
        }
        req.req.vnic_id = Le32::new(vnic_id as u32);
        req.req.mask = Le32::new(bits);
        req.send()?;
        self.vnic.lock().rx_mask = bits;
        Ok(())
    }

    /// Brings up the default VNIC and, with n-tuple steering, one VNIC per RX ring.
    pub(crate) fn vnic_setup(&self, fabric: &Fabric) -> Result<(), BnxtError> {
        let result = self.vnic_setup_inner(fabric);
        if result.is_err() {
            self.vnic_teardown();
        }
        result
    }

    fn vnic_setup_inner(&self, fabric: &Fabric) -> Result<(), BnxtError> {
        let id = self.hwrm_vnic_alloc(true)?;
        self.vnic.lock().id = Some(id);
        let ctx = self.hwrm.req_init::<VnicRssCosLbCtxAllocInput>()?.send()?.rss_cos_lb_ctx_id.get();
        self.vnic.lock().rss_ctx = Some(ctx);
        self.hwrm_vnic_cfg(fabric, id, 0, Some(ctx))?;

        let mem = DmaRegion::new(&self.hal, BNXT_RSS_TABLE_ENTRIES * 2 + BNXT_RSS_KEY_SIZE)
            .map_err(|_| BnxtError::OutOfMemory)?;
        let rss = self.hwrm_vnic_rss_cfg(fabric, id, ctx, &mem);
        self.vnic.lock().rss_mem = Some(mem);
        rss?;
        self.hwrm_vnic_tpa_cfg(fabric, id)?;

        let mac = self.info.lock().mac;
        let l2 = self.hwrm_l2_filter_alloc(id, &L2FilterKey { addr: mac, vlan: None })?;
        self.vnic.lock().l2_filter = Some(l2);
        self.hwrm_set_rx_mask(id, RxMask::BCAST | RxMask::MCAST, &[])?;

        if self.cfg.lock().rfs && fabric.params.features.contains(NetFeatures::NTUPLE) {
            for r in 0..fabric.counts.rx as usize {
                let rfs_id = self.hwrm_vnic_alloc(false)?;
                self.vnic.lock().rfs.push(rfs_id);
                self.hwrm_vnic_cfg(fabric, rfs_id, r, None)?;
            }
        }
        debug!("bnxt: default VNIC {} ready", id);
        Ok(())
    }

    /// The steering VNIC of RX ring `ring`.
    pub(crate) fn rfs_vnic(&self, ring: u16) -> Option<u16> {
        self.vnic.lock().rfs.get(ring as usize).copied()
    }

    pub(crate) fn vnic_teardown(&self) {
        let state = core::mem::take(&mut *self.vnic.lock());
        self.clear_filters();
        if self.test_state(DevState::FW_FATAL_COND) {
            return;
        }
        if let Some(l2) = state.l2_filter {
            if let Err(e) = self.hwrm_l2_filter_free(l2) {
                warn!("bnxt: freeing L2 filter {:#x} failed: {}", l2, e);
            }
        }
        for &id in state.rfs.iter().rev().chain(state.id.iter()) {
            let result = self.hwrm.req_init::<VnicFreeInput>().and_then(|mut req| {
                req.req.vnic_id = Le32::new(id as u32);
                req.send().map(|_| ())
            });
            if let Err(e) = result {
                warn!("bnxt: freeing VNIC {} failed: {}", id, e);
            }
        }
        if let Some(ctx) = state.rss_ctx {
            let result = self.hwrm.req_init::<VnicRssCosLbCtxFreeInput>().and_then(|mut req| {
                req.req.rss_cos_lb_ctx_id = Le16::new(ctx);
                req.send().map(|_| ())
            });
            if let Err(e) = result {
                warn!("bnxt: freeing RSS context {} failed: {}", ctx, e);
            }
        }
    }
}
