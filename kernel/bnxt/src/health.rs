//! The firmware health watchdog and the register access behind it.

use alloc::vec::Vec;
use nic_hal::{Bar, Hal};
use bnxt_hsi::hwrm::*;
use bnxt_hsi::event::{ERROR_RECOVERY_DATA1_MASTER_FUNC, ERROR_RECOVERY_DATA1_RECOVERY_ENABLED};
use crate::{Bnxt, DevState, SpEvents};
use crate::config::BNXT_TIMER_INTERVAL_MS;

/// The register locations and timings firmware reported for error recovery.
#[derive(Clone, Debug)]
pub(crate) struct FwHealth {
    pub flags: u32,
    pub polling_freq_ms: u32,
    pub master_wait_ms: u32,
    pub normal_wait_ms: u32,
    pub master_wait_after_reset_ms: u32,
    pub max_bailout_ms: u32,
    pub status_reg: u32,
    pub heartbeat_reg: u32,
    pub reset_cnt_reg: u32,
    pub inprog_reg: u32,
    pub inprog_mask: u32,
    /// `(register, value, delay in ms)` triples that reset the chip.
    pub reset_seq: Vec<(u32, u32, u8)>,

    /// Firmware enabled recovery with an `ERROR_RECOVERY` event.
    pub enabled: bool,
    /// This function is the one that resets the chip.
    pub master: bool,
    /// Timer ticks between two heartbeat samples.
    pub tmr_multiplier: u32,
    pub tmr_counter: u32,
    pub last_heartbeat: u32,
    pub last_reset_cnt: u32,
    /// Times the watchdog fired.
    pub arrests: u32,
}

impl FwHealth {
    pub fn from_qcfg(resp: &ErrorRecoveryQcfgOutput) -> FwHealth {
        let polling_freq_ms = resp.driver_polling_freq.get().max(BNXT_TIMER_INTERVAL_MS);
        let nr_regs = (resp.reg_array_cnt as usize).min(ERROR_RECOVERY_MAX_RESET_REGS);
        let reset_seq = (0..nr_regs)
            .map(|i| (resp.reset_reg[i].get(), resp.reset_reg_val[i].get(), resp.delay_after_reset[i]))
            .collect();
        FwHealth {
            flags: resp.flags.get(),
            polling_freq_ms,
            master_wait_ms: resp.master_func_wait_period.get(),
            normal_wait_ms: resp.normal_func_wait_period.get(),
            master_wait_after_reset_ms: resp.master_func_wait_period_after_reset.get(),
            max_bailout_ms: resp.max_bailout_time_after_reset.get(),
            status_reg: resp.fw_health_status_reg.get(),
            heartbeat_reg: resp.fw_heartbeat_reg.get(),
            reset_cnt_reg: resp.fw_reset_cnt_reg.get(),
            inprog_reg: resp.reset_inprogress_reg.get(),
            inprog_mask: resp.reset_inprogress_reg_mask.get(),
            reset_seq,
            enabled: false,
            master: false,
            tmr_multiplier: (polling_freq_ms + BNXT_TIMER_INTERVAL_MS - 1) / BNXT_TIMER_INTERVAL_MS,
            tmr_counter: 0,
            last_heartbeat: 0,
            last_reset_cnt: 0,
            arrests: 0,
        }
    }
}

/// Reads a firmware register named the way `ERROR_RECOVERY_QCFG` names them:
/// the register space in the low two bits, the address in the rest.
pub(crate) fn read_fw_reg(hal: &dyn Hal, reg: u32) -> u32 {
    let addr = reg & !FW_HEALTH_REG_TYPE_MASK;
    match reg & FW_HEALTH_REG_TYPE_MASK {
        FW_HEALTH_REG_TYPE_CFG => {
            let lo = hal.pci_read_config16(addr as u16) as u32;
            let hi = hal.pci_read_config16(addr as u16 + 2) as u32;
            hi << 16 | lo
        }
        FW_HEALTH_REG_TYPE_GRC => {
            hal.write32(Bar::Bar0, GRCPF_REG_WINDOW_BASE_OUT + FW_HEALTH_WIN_MAP_OFF, addr & GRC_BASE_MASK);
            hal.read32(Bar::Bar0, FW_HEALTH_WIN_BASE + (addr & GRC_OFFSET_MASK) as usize)
        }
        FW_HEALTH_REG_TYPE_BAR0 => hal.read32(Bar::Bar0, addr as usize),
        _ => hal.read32(Bar::Bar1, addr as usize),
    }
}

/// Writes one step of the chip reset sequence.
pub(crate) fn write_fw_reset_reg(hal: &dyn Hal, reg: u32, val: u32) {
    let addr = reg & !FW_HEALTH_REG_TYPE_MASK;
    match reg & FW_HEALTH_REG_TYPE_MASK {
        FW_HEALTH_REG_TYPE_CFG => warn!("bnxt: config space reset register {:#x} is not supported", addr),
        FW_HEALTH_REG_TYPE_GRC => {
            hal.write32(Bar::Bar0, GRCPF_REG_WINDOW_BASE_OUT + FW_RESET_WIN_MAP_OFF, addr & GRC_BASE_MASK);
            hal.write32(Bar::Bar0, FW_RESET_WIN_BASE + (addr & GRC_OFFSET_MASK) as usize, val);
        }
        FW_HEALTH_REG_TYPE_BAR0 => hal.write32(Bar::Bar0, addr as usize, val),
        _ => hal.write32(Bar::Bar1, addr as usize, val),
    }
}

impl Bnxt {
    /// Handles the `ERROR_RECOVERY` event, which turns the watchdog on or off.
    pub(crate) fn error_recovery_event(&self, data1: u32) {
        let mut guard = self.health.lock();
        let Some(health) = guard.as_mut() else {
            warn!("bnxt: error recovery event without recovery registers");
            return;
        };
        health.enabled = data1 & ERROR_RECOVERY_DATA1_RECOVERY_ENABLED != 0;
        health.master = data1 & ERROR_RECOVERY_DATA1_MASTER_FUNC != 0;
        if !health.enabled {
            info!("bnxt: firmware error recovery disabled");
            return;
        }
        health.tmr_counter = health.tmr_multiplier;
        health.last_heartbeat = read_fw_reg(&*self.hal, health.heartbeat_reg);
        health.last_reset_cnt = read_fw_reg(&*self.hal, health.reset_cnt_reg);
        info!("bnxt: firmware error recovery enabled ({} function), polling every {} ms",
            if health.master { "master" } else { "normal" }, health.polling_freq_ms);
    }

    /// The periodic driver timer, to be called every
    /// [`BNXT_TIMER_INTERVAL_MS`](crate::config::BNXT_TIMER_INTERVAL_MS) while the device is open.
    pub fn timer(&self) {
        if !self.is_open() || self.test_state(DevState::IN_FW_RESET) {
            return;
        }
        if self.fw_health_check() {
            self.queue_sp_event(SpEvents::FW_EXCEPTION);
        }
        if self.dim_pending() {
            self.queue_sp_event(SpEvents::DIM);
        }
    }

    /// Samples the heartbeat and reset counter once every `tmr_multiplier` ticks.
    /// Returns true if firmware looks dead.
    fn fw_health_check(&self) -> bool {
        let mut guard = self.health.lock();
        let Some(health) = guard.as_mut().filter(|h| h.enabled) else { return false };
        if health.tmr_counter > 0 {
            health.tmr_counter -= 1;
            return false;
        }
        health.tmr_counter = health.tmr_multiplier;

        let heartbeat = read_fw_reg(&*self.hal, health.heartbeat_reg);
        let reset_cnt = read_fw_reg(&*self.hal, health.reset_cnt_reg);
        let stalled = heartbeat == health.last_heartbeat;
        let reset = reset_cnt != health.last_reset_cnt;
        health.last_heartbeat = heartbeat;
        health.last_reset_cnt = reset_cnt;
        if stalled || reset {
            health.arrests += 1;
            error!("bnxt: firmware {} (heartbeat {:#x}, reset count {:#x})",
                if stalled { "heartbeat stopped" } else { "reset unexpectedly" }, heartbeat, reset_cnt);
            return true;
        }
        false
    }

    /// Reads the firmware health status register, if firmware reported one.
    pub(crate) fn fw_status(&self) -> Option<u32> {
        let reg = self.health.lock().as_ref()?.status_reg;
        Some(read_fw_reg(&*self.hal, reg))
    }
}
