//! The NAPI poll loop.

use core::convert::TryFrom;
use bnxt_hsi::cmpl::*;
use bnxt_rings::tx_opaque_napi;
use crate::{Bnxt, DevState};
use crate::napi::{Fabric, Napi};
use crate::rx::RxOutcome;

impl Bnxt {
    /// Services NAPI context `index`: reclaims transmitted packets, delivers up to `budget`
    /// received packets to the sink, and handles firmware events. Returns the amount of
    /// RX work done; a return value of `budget` means there may be more.
    ///
    /// With a `budget` of 0 only TX completions are processed and received packets are
    /// dropped. If another context is polling the same NAPI, nothing is done and 0 is
    /// returned; the caller should poll again.
    pub fn poll(&self, index: usize, budget: usize) -> usize {
        if self.test_state(DevState::FW_FATAL_COND) {
            return 0;
        }
        let Some(fabric) = self.fabric() else { return 0 };
        let Some(slot) = fabric.napis.get(index) else { return 0 };
        let Some(mut napi) = slot.try_lock() else {
            trace!("bnxt: NAPI {} is busy", index);
            return 0;
        };

        let work = if napi.nq.is_some() {
            self.poll_nq(&fabric, &mut napi, budget)
        } else {
            let work = self.poll_cq(&fabric, &mut napi, budget);
            napi.cq.ack(work < budget.max(1));
            work
        };

        for &t in napi.tx.iter() {
            let ring = &fabric.txq[t].ring;
            if ring.take_kick() {
                let _guard = ring.lock_xmit();
                ring.kick();
            }
        }
        if let Some(rx) = napi.rx.as_ref() {
            rx.write_doorbells();
        }
        let (packets, bytes) = (napi.sw.rx_packets, napi.sw.rx_bytes);
        napi.dim.sample(packets, bytes);
        work
    }

    /// The P5 loop: drain the NQ, and each completion ring it points at.
    fn poll_nq(&self, fabric: &Fabric, napi: &mut Napi, budget: usize) -> usize {
        let mut work = 0;
        if napi.cq.has_more_work {
            work += self.drain_cq(fabric, napi, budget);
        }
        loop {
            let Some(nq) = napi.nq.as_ref() else { break };
            let raw = nq.raw_cons;
            let Some(ty) = nq.peek_type() else { break };
            if ty == CmplType::CqNotification as u8 {
                if work >= budget && budget > 0 {
                    break;
                }
                let cn: NqCn = nq.read(raw);
                if cn.cq_handle() != napi.index as u64 {
                    warn!("bnxt: NQ {} notification for unknown CQ handle {:#x}", napi.index, cn.cq_handle());
                } else if let Some(db) = napi.cq.doorbell() {
                    db.set_toggle(cn.toggle());
                }
                work += self.drain_cq(fabric, napi, budget.saturating_sub(work));
            } else if ty == CmplType::HwrmAsyncEvent as u8 {
                let cmp: HwrmAsyncEventCmp = nq.read(raw);
                self.async_event(&cmp);
            } else if ty == CmplType::HwrmDone as u8 {
                let cmp: HwrmDoneCmp = nq.read(raw);
                self.hwrm.on_hwrm_done(cmp.sequence_id.get());
            } else {
                debug!("bnxt: unexpected NQ entry type {:#x}", ty);
            }
            if let Some(nq) = napi.nq.as_mut() {
                nq.advance(1);
            }
        }

        if napi.cq.touched {
            napi.cq.touched = false;
            napi.cq.ack(true);
        }
        if let Some(nq) = napi.nq.as_ref() {
            nq.ack(work < budget.max(1));
        }
        work
    }

    fn drain_cq(&self, fabric: &Fabric, napi: &mut Napi, budget: usize) -> usize {
        let work = self.poll_cq(fabric, napi, budget);
        napi.cq.touched = true;
        napi.cq.has_more_work = budget > 0 && work >= budget;
        work
    }

    /// Processes completions on the NAPI's completion ring until it is empty or the
    /// budget is used up.
    fn poll_cq(&self, fabric: &Fabric, napi: &mut Napi, budget: usize) -> usize {
        let budget_zero = budget == 0;
        let mut work = 0;
        loop {
            if !budget_zero && work >= budget {
                break;
            }
            let raw = napi.cq.raw_cons;
            let Some(ty) = napi.cq.peek_type() else { break };
            let slots = match CmplType::try_from(ty) {
                Ok(CmplType::TxL2) | Ok(CmplType::TxL2Coal) => {
                    let cmp: TxCmp = napi.cq.read(raw);
                    self.tx_cmpl(fabric, napi, &cmp);
                    1
                }
                Ok(CmplType::RxL2) | Ok(CmplType::RxL2V3) => {
                    if napi.rx_fault {
                        // The ring is waiting for a reset; leave its completions alone.
                        break;
                    }
                    match self.rx_pkt(fabric, napi, raw, budget_zero) {
                        RxOutcome::Done { slots, packet } => {
                            work += packet as usize;
                            slots
                        }
                        RxOutcome::Busy => break,
                    }
                }
                Ok(CmplType::RxTpaStart) | Ok(CmplType::RxTpaStartV3) => match self.tpa_start(napi, raw) {
                    RxOutcome::Done { slots, .. } => slots,
                    RxOutcome::Busy => break,
                },
                Ok(CmplType::RxTpaAgg) => {
                    self.tpa_agg(napi, raw);
                    1
                }
                Ok(CmplType::RxTpaEnd) => match self.tpa_end(fabric, napi, raw, budget_zero) {
                    RxOutcome::Done { slots, packet } => {
                        work += packet as usize;
                        slots
                    }
                    RxOutcome::Busy => break,
                },
                Ok(CmplType::HwrmAsyncEvent) => {
                    let cmp: HwrmAsyncEventCmp = napi.cq.read(raw);
                    self.async_event(&cmp);
                    1
                }
                Ok(CmplType::HwrmDone) => {
                    let cmp: HwrmDoneCmp = napi.cq.read(raw);
                    self.hwrm.on_hwrm_done(cmp.sequence_id.get());
                    1
                }
                Ok(other) => {
                    debug!("bnxt: ignoring {:?} completion on NAPI {}", other, napi.index);
                    if other.is_32b() { 2 } else { 1 }
                }
                Err(_) => {
                    warn!("bnxt: unknown completion type {:#x} on NAPI {}", ty, napi.index);
                    1
                }
            };
            napi.cq.advance(slots);
        }
        work
    }

    fn tx_cmpl(&self, fabric: &Fabric, napi: &Napi, cmp: &TxCmp) {
        let slot = tx_opaque_napi(cmp.opaque.get()) as usize;
        let Some(&t) = napi.tx.get(slot) else {
            error!("bnxt: TX completion {:#x} names ring {} of NAPI {}", cmp.opaque.get(), slot, napi.index);
            return;
        };
        if cmp.flags_type.get() & TX_CMP_FLAGS_ERROR != 0 {
            warn!("bnxt: TX ring {} reported error {:#x}", t, cmp.errors_v.get());
        }
        self.tx_complete(fabric, &fabric.txq[t], cmp);
    }
}
