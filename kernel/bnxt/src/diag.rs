//! Debug access to chip registers and ring state.

use alloc::vec::Vec;
use bnxt_hsi::{Le32, Le64};
use bnxt_hsi::hwrm::DbgReadDirectInput;
use crate::{Bnxt, BnxtError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingKind {
    Tx,
    Rx,
    RxAgg,
    Cmpl,
    Nq,
}

/// A snapshot of a ring's indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingInfo {
    pub fw_ring_id: u16,
    pub len: u32,
    pub producer: u32,
    pub consumer: u32,
}

impl Bnxt {
    /// Reads `n_words` 32-bit words of chip address space starting at `offset`.
    pub fn dbg_read_reg(&self, offset: u32, n_words: u32) -> Result<Vec<u32>, BnxtError> {
        if n_words == 0 {
            return Err(BnxtError::InvalidArgument);
        }
        let mut req = self.hwrm.req_init::<DbgReadDirectInput>()?;
        let addr = req.dma_slice(n_words as usize * 4)?;
        req.req.host_dest_addr = Le64::new(addr.value());
        req.req.read_addr = Le32::new(offset);
        req.req.read_len32 = Le32::new(n_words);
        req.send()?;
        let region = req.slices().last().ok_or(BnxtError::OutOfMemory)?;
        Ok((0..n_words as usize).map(|i| u32::from_le(region.read::<u32>(i * 4))).collect())
    }

    /// The indices of ring `id` of the given kind. For completion rings and NQs, `id` is
    /// the NAPI index.
    pub fn dbg_ring_info(&self, kind: RingKind, id: usize) -> Result<RingInfo, BnxtError> {
        let fabric = self.fabric().ok_or(BnxtError::NoDevice)?;
        if kind == RingKind::Tx {
            let ring = &fabric.txq.get(id).ok_or(BnxtError::InvalidArgument)?.ring;
            return Ok(RingInfo {
                fw_ring_id: ring.fw_ring_id(),
                len: ring.len(),
                producer: ring.prod(),
                consumer: ring.cons(),
            });
        }
        let napi_idx = if matches!(kind, RingKind::Rx | RingKind::RxAgg) {
            if id >= fabric.counts.rx as usize {
                return Err(BnxtError::InvalidArgument);
            }
            fabric.rx_napi(id)
        } else {
            id
        };
        let napi = fabric.napis.get(napi_idx).ok_or(BnxtError::InvalidArgument)?.lock();
        let info = match kind {
            RingKind::Rx => {
                let rx = napi.rx.as_ref().ok_or(BnxtError::InvalidArgument)?;
                RingInfo { fw_ring_id: rx.fw_ring_id(), len: rx.len(), producer: rx.rx_prod(), consumer: rx.rx_next_cons() }
            }
            RingKind::RxAgg => {
                let rx = napi.rx.as_ref().filter(|rx| rx.has_agg()).ok_or(BnxtError::InvalidArgument)?;
                RingInfo { fw_ring_id: rx.agg_fw_ring_id(), len: rx.agg_len(), producer: rx.agg_prod(), consumer: 0 }
            }
            RingKind::Cmpl => {
                RingInfo { fw_ring_id: napi.cq.fw_ring_id(), len: napi.cq.len(), producer: 0, consumer: napi.cq.raw_cons }
            }
            RingKind::Nq => {
                let nq = napi.nq.as_ref().ok_or(BnxtError::InvalidArgument)?;
                RingInfo { fw_ring_id: nq.fw_ring_id(), len: nq.len(), producer: 0, consumer: nq.raw_cons }
            }
            RingKind::Tx => return Err(BnxtError::InvalidArgument),
        };
        Ok(info)
    }
}
