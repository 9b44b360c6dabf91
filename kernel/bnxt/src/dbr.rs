//! Doorbell drop recovery.
//!
//! When the chip drops doorbells under pacing pressure, firmware raises an event with
//! a new epoch; the driver then re-writes the last value of every doorbell.

use alloc::vec::Vec;
use bnxt_hsi::Le32;
use bnxt_hsi::hwrm::FuncDbrRecoveryCompletedInput;
use crate::Bnxt;

#[derive(Debug, Default)]
pub(crate) struct DbrState {
    /// The epoch of the last completed recovery.
    pub last_epoch: u32,
    /// The newest epoch firmware asked for.
    pub pending: Option<u32>,
    pub recoveries: u64,
}

impl Bnxt {
    pub(crate) fn dbr_event(&self, epoch: u32) {
        let mut dbr = self.dbr.lock();
        if epoch == dbr.last_epoch {
            trace!("bnxt: doorbell recovery epoch {} already handled", epoch);
            return;
        }
        dbr.pending = Some(epoch);
    }

    /// Replays every doorbell of the open device and tells firmware the epoch is done.
    pub(crate) fn dbr_recover(&self) {
        let Some(epoch) = self.dbr.lock().pending.take() else { return };
        let Some(fabric) = self.fabric() else { return };

        let napis: Vec<_> = fabric.napis.iter().map(|n| n.lock()).collect();
        for q in fabric.txq.iter() {
            q.ring.stop();
        }
        for napi in napis.iter() {
            if let Some(db) = napi.cq.doorbell() {
                db.replay();
            }
        }
        for q in fabric.txq.iter() {
            let _guard = q.ring.lock_xmit();
            if let Some(db) = q.ring.doorbell() {
                db.replay();
            }
        }
        for napi in napis.iter() {
            if let Some(rx) = napi.rx.as_ref() {
                if let Some(db) = rx.agg_doorbell() {
                    db.replay();
                }
                if let Some(db) = rx.doorbell() {
                    db.replay();
                }
            }
            if let Some(db) = napi.nq.as_ref().and_then(|nq| nq.doorbell()) {
                db.replay();
            }
        }
        for q in fabric.txq.iter() {
            if !q.stats.fault.load(core::sync::atomic::Ordering::Acquire) {
                q.ring.wake();
            }
        }
        drop(napis);

        let result = self.hwrm.req_init::<FuncDbrRecoveryCompletedInput>().and_then(|mut req| {
            req.req.epoch = Le32::new(epoch);
            req.send().map(|_| ())
        });
        let mut dbr = self.dbr.lock();
        if let Err(e) = result {
            warn!("bnxt: DBR_RECOVERY_COMPLETED for epoch {} failed: {}", epoch, e);
            // A newer epoch that arrived meanwhile supersedes this one.
            dbr.pending.get_or_insert(epoch);
            return;
        }
        dbr.last_epoch = epoch;
        dbr.recoveries += 1;
        info!("bnxt: doorbell recovery for epoch {} done", epoch);
    }

    /// The epoch of the last completed doorbell recovery.
    pub fn dbr_epoch(&self) -> u32 {
        self.dbr.lock().last_epoch
    }
}
