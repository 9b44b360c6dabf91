//! Allocating and freeing every ring of the device, in the order firmware requires.

use core::mem::size_of;
use alloc::{sync::Arc, vec::Vec};
use spin::Mutex;
use nic_hal::{DmaDirection, DmaRegion};
use nic_buffers::{BufferPool, RxBufferMode, ETH_HLEN};
use bnxt_hsi::{CtxHwStats, Le16, Le32, Le64, BNXT_PAGE_SHIFT};
use bnxt_hsi::hwrm::*;
use bnxt_rings::{ring_size, CpKind, CpRing, DbKind, Doorbell, PushBuffer, PushMode, RingMem, RxRing, RxRingParams, TxRing};
use crate::{Bnxt, BnxtError, RingCounts};
use crate::config::*;
use crate::dim::Dim;
use crate::napi::{DataParams, Fabric, Napi, StatCtx, TxQueue, TxQueueStats};
use crate::stats::RingSwStats;

/// How often firmware refreshes a statistics context, in milliseconds.
const STATS_UPDATE_PERIOD_MS: u32 = 1000;

impl Bnxt {
    /// Sends `RING_ALLOC` for a ring backed by `mem` and returns the firmware's response.
    fn hwrm_ring_alloc<F>(&self, ring_type: u8, mem: &RingMem, len: u32, logical_id: u16, fill: F)
        -> Result<RingAllocOutput, BnxtError>
        where F: FnOnce(&mut RingAllocInput)
    {
        let mut req = self.hwrm.req_init::<RingAllocInput>()?;
        req.req.ring_type = ring_type;
        req.req.page_tbl_addr = Le64::new(mem.base_addr().value());
        req.req.page_size = BNXT_PAGE_SHIFT as u8;
        req.req.page_tbl_depth = mem.depth();
        req.req.length = Le32::new(len);
        req.req.logical_id = Le16::new(logical_id);
        req.req.int_mode = RING_ALLOC_INT_MODE_MSIX;
        fill(&mut req.req);
        let resp = req.send()?;
        trace!("bnxt: ring type {} logical {} is firmware ring {}", ring_type, logical_id, resp.ring_id.get());
        Ok(resp)
    }

    pub(crate) fn hwrm_ring_free(&self, ring_type: u8, fw_id: u16) {
        if fw_id == INVALID_HW_RING_ID {
            return;
        }
        let result = self.hwrm.req_init::<RingFreeInput>().and_then(|mut req| {
            req.req.ring_type = ring_type;
            req.req.ring_id = Le16::new(fw_id);
            req.send().map(|_| ())
        });
        if let Err(e) = result {
            warn!("bnxt: RING_FREE of type {} ring {} failed: {}", ring_type, fw_id, e);
        }
    }

    /// The receive buffer pools of one RX ring, following the configuration.
    fn rx_pools(&self, cfg: &BnxtConfig, counts: &RingCounts, xdp: bool)
        -> Result<(Arc<BufferPool>, Option<Arc<BufferPool>>), BnxtError>
    {
        let hal = self.hal.clone();
        let head = if cfg.rx_buf_mode == RxBufferMode::Xsk {
            BufferPool::new_xsk(hal.clone(), BNXT_RX_PAGE_SIZE, XDP_PACKET_HEADROOM, cfg.xsk_frames).map_err(|e| {
                error!("bnxt: cannot create the XSK pool: {}", e);
                BnxtError::OutOfMemory
            })?
        } else if xdp {
            BufferPool::new(hal.clone(), RxBufferMode::PagePool, BNXT_RX_PAGE_SIZE, XDP_PACKET_HEADROOM, DmaDirection::Bidirectional)
        } else if counts.agg {
            BufferPool::new(hal.clone(), RxBufferMode::Frag, cfg.rx_copy_thresh + BNXT_RX_HEADROOM,
                BNXT_RX_HEADROOM, DmaDirection::FromDevice)
        } else {
            let size = cfg.mtu as usize + ETH_HLEN + VLAN_HLEN + BNXT_RX_HEADROOM;
            BufferPool::new(hal.clone(), cfg.rx_buf_mode, size, BNXT_RX_HEADROOM, DmaDirection::FromDevice)
        };
        let agg = if counts.agg {
            Some(BufferPool::new(hal, RxBufferMode::PagePool, BNXT_RX_PAGE_SIZE, 0, DmaDirection::FromDevice))
        } else {
            None
        };
        Ok((head, agg))
    }

    /// Allocates every ring, stat context and ring group for `counts`.
    ///
    /// On failure everything allocated so far is freed again.
    pub(crate) fn build_fabric(&self, counts: RingCounts) -> Result<Fabric, BnxtError> {
        let cfg = self.cfg.lock().clone();
        let info = self.info.lock().clone();
        let xdp = self.xdp.lock().clone();
        let p5 = self.chip.is_p5_plus();

        let tx_entries = ring_size(cfg.tx_ring_size.max(BNXT_MIN_TX_DESC_CNT), BNXT_MAX_TX_RING_SIZE)?;
        let rx_entries = ring_size(cfg.rx_ring_size, BNXT_MAX_RX_RING_SIZE)?;
        let agg_entries = if counts.agg {
            ring_size(rx_entries * BNXT_AGG_RING_FACTOR, BNXT_MAX_AGG_RING_SIZE)?
        } else {
            0
        };
        let max_tpa = if cfg.features.tpa() && xdp.is_none() && counts.agg {
            cfg.max_tpa.min(info.max_tpa) as usize
        } else {
            0
        };
        let cp_entries = (2 * rx_entries + agg_entries + tx_entries + max_tpa)
            .next_power_of_two()
            .min(BNXT_MAX_CP_RING_SIZE);

        let push = match info.push_mode {
            PushMode::Wcb | PushMode::Ppp if !cfg.enable_wcb_push => PushMode::None,
            mode => mode,
        };
        let params = DataParams {
            rx_copy_thresh: cfg.rx_copy_thresh,
            tx_push_thresh: cfg.tx_push_thresh.min(push.threshold()),
            push,
            features: cfg.features,
            xdp: xdp.clone(),
            tx_wake_thresh: (tx_entries / 2) as u32,
        };

        let mut fabric = Fabric {
            counts,
            txq: Vec::new(),
            napis: Vec::new(),
            stat_ctxs: Vec::new(),
            grps: Vec::new(),
            params,
        };
        let mut napis = Vec::new();
        let mut txrings = Vec::new();
        let result = self.alloc_rings(&mut fabric, &mut napis, &mut txrings, &cfg, xdp.is_some(),
            (tx_entries, rx_entries, agg_entries, cp_entries, max_tpa));
        fabric.napis = napis.into_iter().map(Mutex::new).collect();
        fabric.txq = txrings;
        if let Err(e) = result {
            error!("bnxt: ring allocation failed: {}", e);
            self.free_fabric(&fabric);
            return Err(e);
        }

        for napi in fabric.napis.iter() {
            let mut napi = napi.lock();
            if let Some(rx) = napi.rx.as_mut() {
                let filled = rx.fill();
                if filled == 0 {
                    warn!("bnxt: RX ring {} has no buffers", rx.index);
                }
                rx.write_doorbells();
            }
            if let Some(nq) = napi.nq.as_ref() {
                nq.ack(true);
            } else {
                napi.cq.ack(true);
            }
        }
        debug!("bnxt: {} NAPIs, {} TX rings, {} RX rings{}", fabric.napis.len(), fabric.txq.len(),
            counts.rx, if p5 { "" } else { " with ring groups" });
        Ok(fabric)
    }

    fn alloc_rings(
        &self,
        fabric: &mut Fabric,
        napis: &mut Vec<Napi>,
        txq: &mut Vec<TxQueue>,
        cfg: &BnxtConfig,
        xdp: bool,
        (tx_entries, rx_entries, agg_entries, cp_entries, max_tpa): (usize, usize, usize, usize, usize),
    ) -> Result<(), BnxtError> {
        let counts = fabric.counts;
        let p5 = self.chip.is_p5_plus();
        let nr_napis = counts.napis() as usize;

        for i in 0..nr_napis {
            let mem = DmaRegion::new(&self.hal, size_of::<CtxHwStats>()).map_err(|_| BnxtError::OutOfMemory)?;
            let mut req = self.hwrm.req_init::<StatCtxAllocInput>()?;
            req.req.stats_dma_addr = Le64::new(mem.phys_addr().value());
            req.req.stats_dma_length = Le16::new(size_of::<CtxHwStats>() as u16);
            req.req.update_period_ms = Le32::new(STATS_UPDATE_PERIOD_MS);
            let fw_id = req.send()?.stat_ctx_id.get();
            trace!("bnxt: NAPI {} uses stat context {}", i, fw_id);
            fabric.stat_ctxs.push(StatCtx { mem, fw_id });
        }

        for i in 0..nr_napis {
            let nq = if p5 {
                let mut nq = CpRing::new(&self.hal, CpKind::Nq, cp_entries)?;
                let resp = self.hwrm_ring_alloc(RING_TYPE_NQ, nq.mem(), nq.len(), i as u16, |_| {})?;
                let id = resp.ring_id.get();
                nq.set_fw_ring_id(id);
                nq.set_doorbell(Doorbell::new(&self.hal, self.chip, DbKind::Nq, id, i as u16, nq.len(), self.vf));
                Some(nq)
            } else {
                None
            };

            let mut cq = CpRing::new(&self.hal, CpKind::Cq, cp_entries)?;
            let nq_id = nq.as_ref().map(|nq| nq.fw_ring_id());
            let p7 = self.chip.is_p7();
            let resp = self.hwrm_ring_alloc(RING_TYPE_L2_CMPL, cq.mem(), cq.len(), i as u16, |req| {
                if let Some(nq_id) = nq_id {
                    req.enables = Le32::new(RING_ALLOC_ENABLES_NQ_RING_ID_VALID);
                    req.nq_ring_id = Le16::new(nq_id);
                    req.cq_handle = Le64::new(i as u64);
                }
                if p7 {
                    req.flags = Le16::new(RING_ALLOC_FLAGS_DISABLE_CQ_OVERFLOW_DETECTION);
                }
            })?;
            let id = resp.ring_id.get();
            cq.set_fw_ring_id(id);
            cq.set_doorbell(Doorbell::new(&self.hal, self.chip, DbKind::Cq, id, i as u16, cq.len(), self.vf));

            napis.push(Napi {
                index: i as u16,
                nq,
                cq,
                rx: None,
                tx: Vec::new(),
                sw: RingSwStats::default(),
                dim: Dim::default(),
                buf_errors: 0,
                rx_fault: false,
            });
        }

        let push = fabric.params.push;
        for t in 0..counts.tx as usize {
            let napi_idx = fabric.tx_napi(t);
            let napi = &mut napis[napi_idx];
            let slot = napi.tx.len() as u16;
            let mut ring = TxRing::new(&self.hal, t as u16, napi_idx as u16, tx_entries)?;
            let cq_id = napi.cq.fw_ring_id();
            let stat_id = fabric.stat_ctxs[napi_idx].fw_id;
            let wcb = matches!(push, PushMode::Wcb | PushMode::Ppp);
            let resp = self.hwrm_ring_alloc(RING_TYPE_TX, ring.mem(), ring.len(), t as u16, |req| {
                req.enables = Le32::new(RING_ALLOC_ENABLES_STAT_CTX_ID_VALID);
                req.cmpl_ring_id = Le16::new(cq_id);
                req.stat_ctx_id = Le32::new(stat_id);
                if wcb {
                    req.flags = Le16::new(RING_ALLOC_FLAGS_TX_PUSH_MODE);
                }
            })?;
            let id = resp.ring_id.get();
            ring.set_fw_ring_id(id);
            let db = Doorbell::new(&self.hal, self.chip, DbKind::Tx, id, t as u16, ring.len(), self.vf);
            let push_buf = match push {
                PushMode::Legacy => Some(PushBuffer::legacy(&self.hal, &db)),
                PushMode::Wcb | PushMode::Ppp if resp.push_buffer_index != RING_ALLOC_NO_PUSH_BUFFER =>
                    Some(PushBuffer::page(&self.hal, resp.push_buffer_index, push == PushMode::Ppp)),
                _ => None,
            };
            ring.set_doorbell(db);
            ring.set_push_buffer(push_buf);
            napi.tx.push(txq.len());
            txq.push(TxQueue { ring, napi_slot: slot, stats: TxQueueStats::default() });
        }

        for r in 0..counts.rx as usize {
            let napi_idx = fabric.rx_napi(r);
            let (pool, agg_pool) = self.rx_pools(cfg, &counts, xdp)?;
            let rx_buf_size = pool.buf_size() as u16;
            let params = RxRingParams { index: r as u16, entries: rx_entries, agg_entries, max_tpa };
            let mut ring = RxRing::new(&self.hal, params, pool, agg_pool)?;
            let cq_id = napis[napi_idx].cq.fw_ring_id();
            let stat_id = fabric.stat_ctxs[napi_idx].fw_id;
            let resp = self.hwrm_ring_alloc(RING_TYPE_RX, ring.mem(), ring.len(), r as u16, |req| {
                req.enables = Le32::new(RING_ALLOC_ENABLES_STAT_CTX_ID_VALID | RING_ALLOC_ENABLES_RX_BUF_SIZE_VALID);
                req.cmpl_ring_id = Le16::new(cq_id);
                req.stat_ctx_id = Le32::new(stat_id);
                req.rx_buf_size = Le16::new(rx_buf_size);
            })?;
            let rx_id = resp.ring_id.get();
            ring.set_fw_ring_id(rx_id);
            ring.set_doorbell(Doorbell::new(&self.hal, self.chip, DbKind::Rx, rx_id, r as u16, ring.len(), self.vf));
            napis[napi_idx].rx = Some(ring);
        }

        if counts.agg {
            for r in 0..counts.rx as usize {
                let napi_idx = fabric.rx_napi(r);
                let cq_id = napis[napi_idx].cq.fw_ring_id();
                let stat_id = fabric.stat_ctxs[napi_idx].fw_id;
                let Some(ring) = napis[napi_idx].rx.as_mut() else { continue };
                let Some(mem) = ring.agg_mem() else { continue };
                let rx_id = ring.fw_ring_id();
                let logical = (counts.rx as usize + r) as u16;
                let resp = self.hwrm_ring_alloc(RING_TYPE_RX_AGG, mem, ring.agg_len(), logical, |req| {
                    req.enables = Le32::new(RING_ALLOC_ENABLES_STAT_CTX_ID_VALID
                        | RING_ALLOC_ENABLES_RX_BUF_SIZE_VALID
                        | RING_ALLOC_ENABLES_RX_RING_ID_VALID);
                    req.cmpl_ring_id = Le16::new(cq_id);
                    req.rx_ring_id = Le16::new(rx_id);
                    req.stat_ctx_id = Le32::new(stat_id);
                    req.rx_buf_size = Le16::new(BNXT_RX_PAGE_SIZE as u16);
                })?;
                let id = resp.ring_id.get();
                let len = ring.agg_len();
                ring.set_agg_fw_ring_id(id);
                ring.set_agg_doorbell(Doorbell::new(&self.hal, self.chip, DbKind::Agg, id, logical, len, self.vf));
            }
        }

        if !p5 {
            for r in 0..counts.rx as usize {
                let napi_idx = fabric.rx_napi(r);
                let napi = &napis[napi_idx];
                let Some(ring) = napi.rx.as_ref() else { continue };
                let mut req = self.hwrm.req_init::<RingGrpAllocInput>()?;
                req.req.cr = Le16::new(napi.cq.fw_ring_id());
                req.req.rr = Le16::new(ring.fw_ring_id());
                req.req.ar = Le16::new(ring.agg_fw_ring_id());
                req.req.sc = Le16::new(fabric.stat_ctxs[napi_idx].fw_id as u16);
                fabric.grps.push(req.send()?.ring_group_id.get());
            }
        }
        Ok(())
    }

    /// Frees every firmware object of `fabric`, children before the rings they reference.
    ///
    /// Errors are logged and skipped so that as much as possible is released.
    pub(crate) fn free_fabric(&self, fabric: &Fabric) {
        let fatal = self.test_state(crate::DevState::FW_FATAL_COND);
        for &grp in fabric.grps.iter() {
            if fatal {
                break;
            }
            let result = self.hwrm.req_init::<RingGrpFreeInput>().and_then(|mut req| {
                req.req.ring_group_id = Le32::new(grp);
                req.send().map(|_| ())
            });
            if let Err(e) = result {
                warn!("bnxt: RING_GRP_FREE {} failed: {}", grp, e);
            }
        }

        let mut napis: Vec<_> = fabric.napis.iter().map(|n| n.lock()).collect();
        for napi in napis.iter_mut() {
            if let Some(rx) = napi.rx.as_mut() {
                if !fatal {
                    self.hwrm_ring_free(RING_TYPE_RX_AGG, rx.agg_fw_ring_id());
                    self.hwrm_ring_free(RING_TYPE_RX, rx.fw_ring_id());
                }
                rx.free_buffers();
                if let Some(tpa) = rx.tpa.as_mut() {
                    tpa.clear();
                }
            }
        }
        for q in fabric.txq.iter() {
            if !fatal {
                self.hwrm_ring_free(RING_TYPE_TX, q.ring.fw_ring_id());
            }
            let freed = q.ring.drain();
            if freed > 0 {
                debug!("bnxt: freed {} unsent packets of TX ring {}", freed, q.ring.index);
            }
        }
        for napi in napis.iter_mut() {
            if !fatal {
                self.hwrm_ring_free(RING_TYPE_L2_CMPL, napi.cq.fw_ring_id());
                if let Some(nq) = napi.nq.as_ref() {
                    self.hwrm_ring_free(RING_TYPE_NQ, nq.fw_ring_id());
                }
            }
        }
        drop(napis);

        for ctx in fabric.stat_ctxs.iter() {
            if fatal {
                break;
            }
            let result = self.hwrm.req_init::<StatCtxFreeInput>().and_then(|mut req| {
                req.req.stat_ctx_id = Le32::new(ctx.fw_id);
                req.send().map(|_| ())
            });
            if let Err(e) = result {
                warn!("bnxt: STAT_CTX_FREE {} failed: {}", ctx.fw_id, e);
            }
        }
    }
}
