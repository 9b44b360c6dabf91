//! The core of a driver for Broadcom NetXtreme-C/E (bnxt) Ethernet controllers.
//!
//! A [`Bnxt`] is created by [`Bnxt::probe()`], which talks to the NIC firmware over the
//! HWRM channel, learns the device's capabilities, and registers the driver.
//! [`Bnxt::open()`] then negotiates ring counts, allocates every ring and the default
//! VNIC, and makes the datapath available:
//! * [`Bnxt::start_xmit()`] posts a packet on a TX ring,
//! * [`Bnxt::poll()`] services one NAPI context: TX completions, received packets,
//!   and firmware events, handing packets to the [`PacketSink`],
//! * [`Bnxt::sp_task()`], [`Bnxt::fw_reset_task()`] and [`Bnxt::timer()`] are the
//!   deferred work items the host runs on the driver's behalf.
//!
//! All hardware access goes through the [`nic_hal::Hal`] the device was probed with.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
#[macro_use] extern crate bitflags;
extern crate spin;
extern crate zerocopy;
extern crate nic_hal;
extern crate nic_buffers;
extern crate bnxt_hsi;
extern crate bnxt_hwrm;
extern crate bnxt_rings;

mod error;
pub mod config;
mod firmware;
mod health;
mod events;
mod resv;
mod napi;
mod setup;
mod vnic;
mod tx;
mod rx;
mod xdp;
mod poll;
mod dim;
mod dbr;
mod reset;
mod control;
mod filter;
mod stats;
mod diag;

#[cfg(test)]
mod test;

pub use error::BnxtError;
pub use config::{BnxtConfig, CoalesceParams, NetFeatures};
pub use firmware::FwInfo;
pub use events::SpEvents;
pub use resv::RingCounts;
pub use tx::XmitStatus;
pub use xdp::{PacketSink, XdpAction, XdpProgram};
pub use reset::FwResetState;
pub use control::RxMask;
pub use filter::{L2FilterKey, NtupleAction, NtupleKey, FilterHandle};
pub use stats::{DeviceStats, RingStats, RingSwStats};
pub use diag::{RingInfo, RingKind};

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use alloc::{sync::Arc, vec::Vec};
use spin::Mutex;
use nic_hal::HalRef;
use bnxt_hsi::ChipKind;
use bnxt_hwrm::HwrmChannel;
use bnxt_rings::RingMem;

use health::FwHealth;
use napi::Fabric;
use vnic::VnicState;
use filter::FilterTable;
use reset::ResetCtx;
use dbr::DbrState;
use events::PendingWork;

bitflags! {
    /// Device state bits, tested from every context without a lock.
    pub struct DevState: u32 {
        /// The datapath is up.
        const OPEN              = 1 << 0;
        /// The reset orchestrator owns the device.
        const IN_FW_RESET       = 1 << 1;
        /// Firmware is dead, so nothing may touch the rings or the HWRM channel.
        const FW_FATAL_COND     = 1 << 2;
        /// Firmware announced a reset it will recover from by itself.
        const FW_NON_FATAL_COND = 1 << 3;
        /// A reset failed; the next open must bring firmware back up first.
        const ABORT_ERR         = 1 << 4;
        /// The driver is registered with firmware.
        const REGISTERED        = 1 << 5;
    }
}

/// A bnxt network device.
///
/// Control operations serialize on an internal lock that plays the role of the host's
/// network configuration lock; the datapath never takes it.
pub struct Bnxt {
    hal: HalRef,
    hwrm: HwrmChannel,
    chip: ChipKind,
    /// This is a virtual function.
    vf: bool,
    sink: Arc<dyn PacketSink>,

    cfg: Mutex<BnxtConfig>,
    info: Mutex<FwInfo>,
    health: Mutex<Option<FwHealth>>,
    /// Backing store for firmware contexts (P5 and newer).
    ctx_mem: Mutex<Vec<RingMem>>,
    /// The ring counts negotiated for the next (or current) open.
    rings: Mutex<RingCounts>,

    state: AtomicU32,
    sp_events: AtomicU32,
    link_up: AtomicBool,

    ctrl: Mutex<()>,
    fabric: Mutex<Option<Arc<Fabric>>>,
    vnic: Mutex<VnicState>,
    filters: Mutex<FilterTable>,
    reset: Mutex<ResetCtx>,
    dbr: Mutex<DbrState>,
    xdp: Mutex<Option<Arc<dyn XdpProgram>>>,
    pending: Mutex<PendingWork>,
    /// Counters of rings that have been freed, so totals survive a close.
    prev_stats: Mutex<DeviceStats>,
}

impl Bnxt {
    pub fn chip(&self) -> ChipKind {
        self.chip
    }

    pub fn is_vf(&self) -> bool {
        self.vf
    }

    pub fn hal(&self) -> &HalRef {
        &self.hal
    }

    /// The capabilities and identity firmware reported at probe time.
    pub fn fw_info(&self) -> FwInfo {
        self.info.lock().clone()
    }

    pub fn config(&self) -> BnxtConfig {
        self.cfg.lock().clone()
    }

    pub fn state(&self) -> DevState {
        DevState::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.test_state(DevState::OPEN)
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    pub(crate) fn test_state(&self, bits: DevState) -> bool {
        self.state.load(Ordering::Acquire) & bits.bits() != 0
    }

    pub(crate) fn set_state(&self, bits: DevState) {
        self.state.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_state(&self, bits: DevState) {
        self.state.fetch_and(!bits.bits(), Ordering::AcqRel);
    }

    /// The rings of the open device.
    pub(crate) fn fabric(&self) -> Option<Arc<Fabric>> {
        self.fabric.lock().clone()
    }
}
