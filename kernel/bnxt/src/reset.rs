//! Firmware reset orchestration and ring-level recovery.
//!
//! A reset is driven by [`Bnxt::fw_reset_task()`], which the host calls again after
//! the delay each step returns. The control lock is only ever taken with `try_lock`
//! here; a busy lock makes the step retry shortly instead of blocking.

use core::mem::take;
use bnxt_hsi::Le16;
use bnxt_hsi::hwrm::*;
use crate::{Bnxt, BnxtError, DevState};
use crate::config::*;
use crate::firmware::hwrm_ver_get;
use crate::health::write_fw_reset_reg;

/// The steps of a firmware reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FwResetState {
    Idle,
    /// Waiting for VFs to unbind before the PF goes down.
    PollVf,
    /// Tearing down the datapath and firmware state.
    Close,
    /// Waiting for firmware to report it shut down.
    PollFwDown,
    /// Resetting the chip (master function only).
    ResetFw,
    /// Waiting out the reset, then re-enabling the PCI function.
    EnableDev,
    /// Polling firmware until it answers again.
    PollFw,
    /// Re-initializing firmware state and reopening the device.
    Opening,
    /// The reset failed.
    Abort,
}

impl Default for FwResetState {
    fn default() -> Self {
        FwResetState::Idle
    }
}

#[derive(Debug, Default)]
pub(crate) struct ResetCtx {
    pub state: FwResetState,
    /// When the current step gives up or moves on, in host microseconds.
    pub deadline_us: u64,
    /// The reset window announced by firmware, in tenths of a second.
    pub min_dsecs: u32,
    pub max_dsecs: u32,
    /// The device was open when the reset began.
    pub was_open: bool,
    pub resets: u32,
}

impl Bnxt {
    pub(crate) fn set_reset_window(&self, min_dsecs: u32, max_dsecs: u32) {
        let mut ctx = self.reset.lock();
        ctx.min_dsecs = if min_dsecs == 0 { BNXT_DFLT_FW_RST_MIN_DSECS } else { min_dsecs };
        ctx.max_dsecs = if max_dsecs == 0 { BNXT_DFLT_FW_RST_MAX_DSECS } else { max_dsecs };
    }

    /// The step the reset orchestrator is at.
    pub fn fw_reset_state(&self) -> FwResetState {
        self.reset.lock().state
    }

    /// Handles firmware found dead by the watchdog: marks it fatal and starts a reset.
    pub fn fw_exception(&self) {
        error!("bnxt: firmware exception, status {:#x?}", self.fw_status());
        self.set_state(DevState::FW_FATAL_COND);
        self.fw_reset();
    }

    /// Starts a firmware reset. The host must then run [`fw_reset_task()`](Self::fw_reset_task)
    /// until it returns `None`.
    pub fn fw_reset(&self) {
        if self.test_state(DevState::IN_FW_RESET) {
            debug!("bnxt: firmware reset already in progress");
            return;
        }
        self.set_state(DevState::IN_FW_RESET);
        let vfs = if self.vf { 0 } else { self.registered_vfs() };
        let now = self.hal.now_us();
        let mut ctx = self.reset.lock();
        if ctx.max_dsecs == 0 {
            ctx.min_dsecs = BNXT_DFLT_FW_RST_MIN_DSECS;
            ctx.max_dsecs = BNXT_DFLT_FW_RST_MAX_DSECS;
        }
        ctx.resets += 1;
        ctx.was_open = self.is_open();
        if vfs > 0 {
            info!("bnxt: waiting for {} VFs to unbind before resetting", vfs);
            ctx.state = FwResetState::PollVf;
            ctx.deadline_us = now + ctx.max_dsecs as u64 * 100_000;
        } else {
            ctx.state = FwResetState::Close;
        }
    }

    fn registered_vfs(&self) -> u16 {
        if self.info.lock().max_vfs == 0 {
            return 0;
        }
        self.func_qcfg().map_or(0, |resp| resp.registered_vfs.get())
    }

    /// Runs the current reset step. Returns the number of milliseconds after which it
    /// must run again, or `None` when no reset is in progress any more.
    pub fn fw_reset_task(&self) -> Option<u64> {
        let state = self.reset.lock().state;
        let now = self.hal.now_us();
        let next = match state {
            FwResetState::Idle | FwResetState::Abort => return None,
            FwResetState::PollVf => {
                let vfs = self.registered_vfs();
                let deadline = self.reset.lock().deadline_us;
                if vfs > 0 && now < deadline {
                    return Some(BNXT_FW_RESET_VF_POLL_MS);
                }
                if vfs > 0 {
                    warn!("bnxt: {} VFs still registered, resetting anyway", vfs);
                }
                FwResetState::Close
            }
            FwResetState::Close => {
                let Some(_guard) = self.ctrl.try_lock() else { return Some(BNXT_RESET_RETRY_MS) };
                self.fw_reset_close();
                let health = self.health.lock().clone();
                let reload = self.info.lock().flags & FUNC_QCAPS_FLAGS_ERR_RECOVER_RELOAD != 0;
                let mut ctx = self.reset.lock();
                if reload && health.is_some() {
                    let wait = health.map_or(0, |h| if h.master { h.master_wait_ms } else { h.normal_wait_ms });
                    ctx.deadline_us = now + wait as u64 * 1000;
                    FwResetState::PollFwDown
                } else {
                    ctx.deadline_us = now + ctx.min_dsecs as u64 * 100_000;
                    FwResetState::EnableDev
                }
            }
            FwResetState::PollFwDown => {
                let down = self.fw_status().map_or(true, |s| s & FW_STATUS_SHUTDOWN != 0);
                let deadline = self.reset.lock().deadline_us;
                if !down && now < deadline {
                    return Some(BNXT_FW_DOWN_POLL_MS);
                }
                if !down {
                    warn!("bnxt: firmware did not report shutdown, proceeding");
                }
                let master = self.health.lock().as_ref().map_or(false, |h| h.master);
                if master {
                    FwResetState::ResetFw
                } else {
                    let mut ctx = self.reset.lock();
                    ctx.deadline_us = now + ctx.min_dsecs as u64 * 100_000;
                    FwResetState::EnableDev
                }
            }
            FwResetState::ResetFw => {
                self.reset_chip();
                let wait = self.health.lock().as_ref().map_or(0, |h| h.master_wait_after_reset_ms);
                self.reset.lock().deadline_us = self.hal.now_us() + wait as u64 * 1000;
                FwResetState::EnableDev
            }
            FwResetState::EnableDev => {
                let deadline = self.reset.lock().deadline_us;
                if now < deadline {
                    return Some((deadline - now + 999) / 1000);
                }
                if self.hal.pci_read_config16(0) == 0xffff {
                    error!("bnxt: device is not accessible after reset");
                    return self.fw_reset_abort(BnxtError::NoDevice);
                }
                if let Err(e) = self.hal.pci_enable_device() {
                    error!("bnxt: cannot re-enable the PCI device: {}", e);
                    return self.fw_reset_abort(BnxtError::Io);
                }
                self.hal.pci_set_master(true);
                self.hwrm.reopen();
                let bailout = self.health.lock().as_ref().map_or(0, |h| h.max_bailout_ms).max(5000);
                self.reset.lock().deadline_us = now + bailout as u64 * 1000;
                FwResetState::PollFw
            }
            FwResetState::PollFw => match hwrm_ver_get(&self.hwrm, Some(SHORT_HWRM_CMD_TIMEOUT_MS), true) {
                Ok(_) => FwResetState::Opening,
                Err(_) => {
                    if now < self.reset.lock().deadline_us {
                        return Some(BNXT_FW_UP_POLL_MS);
                    }
                    error!("bnxt: firmware did not come back after reset");
                    return self.fw_reset_abort(BnxtError::HwrmTimeout);
                }
            },
            FwResetState::Opening => {
                let Some(_guard) = self.ctrl.try_lock() else { return Some(BNXT_RESET_RETRY_MS) };
                self.clear_state(DevState::FW_FATAL_COND | DevState::FW_NON_FATAL_COND);
                let was_open = self.reset.lock().was_open;
                let result = self.fw_init(false).and_then(|()| {
                    if was_open { self.open_nic(true) } else { Ok(()) }
                });
                if let Err(e) = result {
                    error!("bnxt: reopening after firmware reset failed: {}", e);
                    return self.fw_reset_abort(e);
                }
                if let Some(health) = self.health.lock().as_mut() {
                    health.tmr_counter = health.tmr_multiplier;
                }
                self.clear_state(DevState::IN_FW_RESET | DevState::ABORT_ERR);
                self.reset.lock().state = FwResetState::Idle;
                info!("bnxt: firmware reset complete");
                return None;
            }
        };
        trace!("bnxt: firmware reset {:?} -> {:?}", state, next);
        self.reset.lock().state = next;
        Some(0)
    }

    /// Quiesces the device for a reset.
    fn fw_reset_close(&self) {
        let fatal = self.test_state(DevState::FW_FATAL_COND);
        if fatal {
            self.hwrm.cancel_all();
        }
        if self.is_open() {
            self.close_nic(false);
        }
        if !fatal {
            let _ = self.drv_unrgtr();
        }
        self.clear_state(DevState::REGISTERED);
        self.free_ctx_mem();
        if fatal {
            self.hal.pci_set_master(false);
            self.hal.pci_disable_device();
        }
    }

    /// Resets the chip with the register sequence firmware gave, or with `FW_RESET`.
    fn reset_chip(&self) {
        let seq = self.health.lock().as_ref().map(|h| h.reset_seq.clone()).unwrap_or_default();
        if !seq.is_empty() {
            info!("bnxt: resetting the chip with {} register writes", seq.len());
            for (reg, val, delay) in seq {
                write_fw_reset_reg(&*self.hal, reg, val);
                if delay > 0 {
                    self.hal.delay_ms(delay as u64);
                }
            }
            return;
        }
        let result = self.hwrm.req_init::<FwResetInput>().and_then(|mut req| {
            req.req.embedded_proc_type = FW_RESET_EMBEDDED_PROC_TYPE_CHIP;
            req.req.selfrst_status = FW_RESET_SELFRST_STATUS_ASAP;
            req.req.flags = FW_RESET_FLAGS_RESET_GRACEFUL;
            req.send_silent().map(|_| ())
        });
        if let Err(e) = result {
            warn!("bnxt: FW_RESET failed: {}", e);
        }
    }

    fn fw_reset_abort(&self, e: BnxtError) -> Option<u64> {
        error!("bnxt: firmware reset aborted: {}", e);
        self.set_state(DevState::ABORT_ERR);
        self.clear_state(DevState::IN_FW_RESET);
        self.reset.lock().state = FwResetState::Abort;
        None
    }

    /// Recovers rings the datapath marked faulty.
    ///
    /// RX rings are reset in place with `RING_RESET` on P5 and newer chips; anything else
    /// needs the whole datapath closed and reopened.
    pub(crate) fn reset_faulted_rings(&self) {
        let (rx_rings, tx_fault) = {
            let mut pending = self.pending.lock();
            (take(&mut pending.rx_ring_resets), take(&mut pending.tx_fault))
        };
        if !self.is_open() || self.test_state(DevState::IN_FW_RESET) {
            return;
        }
        if tx_fault || (!rx_rings.is_empty() && !self.chip.is_p5_plus()) {
            warn!("bnxt: reopening the device to recover faulted rings");
            let _guard = self.ctrl.lock();
            self.close_nic(false);
            if let Err(e) = self.open_nic(false) {
                error!("bnxt: reopening after a ring fault failed: {}", e);
            }
            return;
        }
        for r in rx_rings {
            if let Err(e) = self.reset_rx_ring(r) {
                error!("bnxt: RX ring {} reset failed: {}", r, e);
            }
        }
    }

    fn reset_rx_ring(&self, r: u16) -> Result<(), BnxtError> {
        let fabric = self.fabric().ok_or(BnxtError::NoDevice)?;
        let slot = fabric.napis.get(fabric.rx_napi(r as usize)).ok_or(BnxtError::InvalidArgument)?;
        let mut napi = slot.lock();
        let fw_id = napi.rx.as_ref().ok_or(BnxtError::InvalidArgument)?.fw_ring_id();
        let mut req = self.hwrm.req_init::<RingResetInput>()?;
        req.req.ring_type = RING_TYPE_RX;
        req.req.ring_id = Le16::new(fw_id);
        req.send()?;

        if let Some(rx) = napi.rx.as_mut() {
            rx.reset();
            rx.fill();
            rx.write_doorbells();
        }
        napi.rx_fault = false;
        napi.buf_errors = 0;
        napi.sw.rx_resets += 1;
        info!("bnxt: RX ring {} reset", r);
        Ok(())
    }
}
