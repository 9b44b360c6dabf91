//! The BAR0 register file: the HWRM request window and trigger, the GRC windows,
//! and the firmware health registers behind them.

use std::collections::BTreeMap;
use bnxt_hsi::hwrm::*;
use crate::SimConfig;

/// GRC addresses of the health and reset registers advertised in `ERROR_RECOVERY_QCFG`.
pub(crate) const GRC_FW_STATUS:         u32 = 0x31c00;
pub(crate) const GRC_FW_HEARTBEAT:      u32 = 0x31c04;
pub(crate) const GRC_FW_RESET_CNT:      u32 = 0x31c08;
pub(crate) const GRC_FW_RESET_INPROG:   u32 = 0x31c0c;
pub(crate) const GRC_RESET_ARM:         u32 = 0x31c10;
pub(crate) const GRC_RESET_GO:          u32 = 0x31c14;
/// Writing this to [`GRC_RESET_GO`] after arming resets the chip.
pub(crate) const RESET_GO_KEY:          u32 = 0x5a;

/// The number of 32-bit registers in the request window.
const WINDOW_WORDS: usize = GRCPF_REG_CHIMP_COMM_TRIGGER / 4;
const GRC_WINDOWS: usize = 4;
const GRC_WINDOW_SIZE: usize = 0x1000;

pub(crate) struct Regs {
    pub(crate) window: Vec<u32>,
    /// The GRC base each of the BAR0 windows 1..=3 is mapped to.
    grc_base: [u32; GRC_WINDOWS],
    /// Plain GRC words, readable through the windows and `DBG_READ_DIRECT`.
    pub(crate) grc: BTreeMap<u32, u32>,
    /// A status forced by the test; cleared by a reset.
    pub(crate) fw_status: u32,
    status_forced: bool,
    pub(crate) boot_until: u64,
    pub(crate) config_dead_until: u64,
    heartbeat_period: u64,
    heartbeat_epoch: u64,
    heartbeat_base: u32,
    heartbeat_frozen: Option<u32>,
    pub(crate) reset_cnt: u32,
    reset_armed: bool,
}

impl Regs {
    pub(crate) fn new(cfg: &SimConfig) -> Regs {
        Regs {
            window: vec![0; WINDOW_WORDS],
            grc_base: [0; GRC_WINDOWS],
            grc: BTreeMap::new(),
            fw_status: FW_STATUS_HEALTHY,
            status_forced: false,
            boot_until: 0,
            config_dead_until: 0,
            heartbeat_period: cfg.heartbeat_period_us.max(1),
            heartbeat_epoch: 0,
            heartbeat_base: 0,
            heartbeat_frozen: None,
            reset_cnt: 0,
            reset_armed: false,
        }
    }

    pub(crate) fn booting(&self, now: u64) -> bool {
        now < self.boot_until
    }

    pub(crate) fn config_dead(&self, now: u64) -> bool {
        now < self.config_dead_until
    }

    pub(crate) fn status(&self, now: u64) -> u32 {
        if self.status_forced {
            self.fw_status
        } else if self.booting(now) {
            1
        } else {
            FW_STATUS_HEALTHY
        }
    }

    pub(crate) fn force_status(&mut self, status: u32) {
        self.fw_status = status;
        self.status_forced = true;
    }

    fn heartbeat(&self, now: u64) -> u32 {
        match self.heartbeat_frozen {
            Some(value) => value,
            None => self.heartbeat_base
                .wrapping_add((now.saturating_sub(self.heartbeat_epoch) / self.heartbeat_period) as u32),
        }
    }

    pub(crate) fn freeze_heartbeat(&mut self, frozen: bool, now: u64) {
        match (frozen, self.heartbeat_frozen) {
            (true, None) => self.heartbeat_frozen = Some(self.heartbeat(now)),
            (false, Some(value)) => {
                self.heartbeat_frozen = None;
                self.heartbeat_base = value;
                self.heartbeat_epoch = now;
            }
            _ => {}
        }
    }

    /// Brings the registers to their post-reset state; the firmware boots until `boot_until`.
    pub(crate) fn reset(&mut self, now: u64, boot_us: u64) {
        self.status_forced = false;
        self.fw_status = FW_STATUS_HEALTHY;
        self.reset_cnt = self.reset_cnt.wrapping_add(1);
        self.boot_until = now + boot_us;
        self.config_dead_until = now + boot_us / 6;
        self.heartbeat_frozen = None;
        self.heartbeat_base = 0;
        self.heartbeat_epoch = now + boot_us;
        self.reset_armed = false;
    }

    /// Maps a BAR0 offset inside one of the GRC windows to a GRC address.
    fn grc_addr(&self, offset: usize) -> Option<u32> {
        let window = offset / GRC_WINDOW_SIZE;
        if window == 0 || window >= GRC_WINDOWS {
            return None;
        }
        Some(self.grc_base[window] + (offset as u32 & GRC_OFFSET_MASK))
    }

    pub(crate) fn grc_read(&self, addr: u32, now: u64) -> u32 {
        match addr {
            GRC_FW_STATUS => self.status(now),
            GRC_FW_HEARTBEAT => self.heartbeat(now),
            GRC_FW_RESET_CNT => self.reset_cnt,
            GRC_FW_RESET_INPROG => self.booting(now) as u32,
            _ => self.grc.get(&addr).copied().unwrap_or(0),
        }
    }

    pub(crate) fn read32(&self, offset: usize, now: u64) -> u32 {
        if offset < GRCPF_REG_CHIMP_COMM_TRIGGER {
            return self.window[offset / 4];
        }
        match self.grc_addr(offset) {
            Some(addr) => self.grc_read(addr, now),
            None => 0,
        }
    }

    /// Handles a BAR0 write. Returns true if the write triggered an HWRM request,
    /// and sets `reset` if it completed the chip reset sequence.
    pub(crate) fn write32(&mut self, offset: usize, value: u32, reset: &mut bool) -> bool {
        if offset < GRCPF_REG_CHIMP_COMM_TRIGGER {
            self.window[offset / 4] = value;
            return false;
        }
        if offset == GRCPF_REG_CHIMP_COMM_TRIGGER {
            return value != 0;
        }
        if offset >= GRCPF_REG_WINDOW_BASE_OUT && offset < GRCPF_REG_WINDOW_BASE_OUT + 4 * (GRC_WINDOWS - 1) {
            let window = (offset - GRCPF_REG_WINDOW_BASE_OUT) / 4 + 1;
            self.grc_base[window] = value & GRC_BASE_MASK;
            return false;
        }
        if let Some(addr) = self.grc_addr(offset) {
            match addr {
                GRC_RESET_ARM => self.reset_armed = value == 1,
                GRC_RESET_GO if self.reset_armed && value == RESET_GO_KEY => *reset = true,
                GRC_RESET_GO => log::warn!("sim: reset GO written without arming"),
                _ => { self.grc.insert(addr, value); }
            }
        }
        false
    }

    /// The request bytes currently in the window.
    pub(crate) fn window_bytes(&self) -> Vec<u8> {
        self.window.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}
