//! Dynamic interrupt moderation: picks RX coalescing from the observed packet rate.

use bnxt_hsi::Le16;
use bnxt_hsi::hwrm::*;
use crate::{Bnxt, CoalesceParams};

/// The coalescing profiles, from lowest latency to highest throughput.
const DIM_PROFILES: [CoalesceParams; 5] = [
    CoalesceParams::new(2, 1),
    CoalesceParams::new(8, 4),
    CoalesceParams::new(16, 16),
    CoalesceParams::new(32, 32),
    CoalesceParams::new(64, 64),
];

/// Packets per sample interval at which the sampler moves one profile up.
const DIM_STEP_PKTS: u64 = 64;
/// Polls between two decisions.
const DIM_SAMPLE_POLLS: u32 = 16;

/// The per-NAPI moderation sampler.
#[derive(Debug, Default)]
pub(crate) struct Dim {
    polls: u32,
    last_packets: u64,
    profile: usize,
    /// A new profile has been picked and not yet sent to firmware.
    pending: bool,
}

impl Dim {
    /// Records the NAPI's running counters after a poll.
    pub fn sample(&mut self, packets: u64, _bytes: u64) {
        self.polls += 1;
        if self.polls < DIM_SAMPLE_POLLS {
            return;
        }
        self.polls = 0;
        let delta = packets.wrapping_sub(self.last_packets);
        self.last_packets = packets;
        let target = ((delta / DIM_STEP_PKTS) as usize).min(DIM_PROFILES.len() - 1);
        if target != self.profile {
            self.profile = target;
            self.pending = true;
        }
    }

    pub fn profile(&self) -> CoalesceParams {
        DIM_PROFILES[self.profile]
    }
}

/// Converts coalescing parameters into an `AGGINT_PARAMS` request for completion ring `ring_id`.
pub(crate) fn fill_aggint(req: &mut RingCmplRingCfgAggintParamsInput, ring_id: u16, coal: CoalesceParams) {
    let frames = coal.frames.max(1);
    let tmr = coal.usecs.max(1);
    req.ring_id = Le16::new(ring_id);
    req.num_cmpl_aggr_int = Le16::new(frames);
    req.num_cmpl_dma_aggr = Le16::new(frames);
    req.num_cmpl_dma_aggr_during_int = Le16::new(frames);
    req.int_lat_tmr_max = Le16::new(tmr);
    req.int_lat_tmr_min = Le16::new(tmr / 2);
    req.cmpl_aggr_dma_tmr = Le16::new(tmr / 2);
    req.enables = Le16::new(AGGINT_ENABLES_NUM_CMPL_DMA_AGGR
        | AGGINT_ENABLES_NUM_CMPL_DMA_AGGR_DURING_INT
        | AGGINT_ENABLES_CMPL_AGGR_DMA_TMR
        | AGGINT_ENABLES_INT_LAT_TMR_MIN
        | AGGINT_ENABLES_INT_LAT_TMR_MAX
        | AGGINT_ENABLES_NUM_CMPL_AGGR_INT);
}

impl Bnxt {
    /// True if some NAPI picked a profile that has not been applied.
    pub(crate) fn dim_pending(&self) -> bool {
        if !self.cfg.lock().adaptive_rx {
            return false;
        }
        let Some(fabric) = self.fabric() else { return false };
        fabric.napis.iter().any(|n| n.try_lock().map_or(false, |n| n.dim.pending))
    }

    /// Sends the profiles the samplers picked to firmware.
    pub(crate) fn apply_dim(&self) {
        let Some(fabric) = self.fabric() else { return };
        for slot in fabric.napis.iter() {
            let (ring_id, coal) = {
                let mut napi = slot.lock();
                if !napi.dim.pending || napi.rx.is_none() {
                    continue;
                }
                napi.dim.pending = false;
                (napi.cq.fw_ring_id(), napi.dim.profile())
            };
            let result = self.hwrm.req_init::<RingCmplRingCfgAggintParamsInput>().and_then(|mut req| {
                fill_aggint(&mut req.req, ring_id, coal);
                req.send().map(|_| ())
            });
            match result {
                Ok(()) => debug!("bnxt: CQ {} moderation set to {:?}", ring_id, coal),
                Err(e) => warn!("bnxt: AGGINT_PARAMS for CQ {} failed: {}", ring_id, e),
            }
        }
    }

    /// Applies the configured static coalescing to every completion ring.
    pub(crate) fn set_coalesce(&self) -> Result<(), crate::BnxtError> {
        let Some(fabric) = self.fabric() else { return Ok(()) };
        let cfg = self.cfg.lock().clone();
        for slot in fabric.napis.iter() {
            let (ring_id, coal) = {
                let napi = slot.lock();
                let coal = if napi.rx.is_some() { cfg.rx_coal } else { cfg.tx_coal };
                (napi.cq.fw_ring_id(), coal)
            };
            let mut req = self.hwrm.req_init::<RingCmplRingCfgAggintParamsInput>()?;
            fill_aggint(&mut req.req, ring_id, coal);
            req.send()?;
        }
        Ok(())
    }
}
