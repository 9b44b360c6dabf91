//! A software model of a bnxt NIC that runs on the host, for testing the driver crates.
//!
//! [`Sim`] implements [`nic_hal::Hal`]: DMA memory is heap memory with identity bus addresses,
//! BAR0 is a register file with a firmware model behind the HWRM mailbox, and BAR1/BAR2 are
//! doorbell windows whose writes drive a TX/RX engine that reads descriptors out of host
//! memory and writes completions back, all synchronously inside the doorbell write.
//!
//! Time is virtual: it only moves when the driver calls `delay_us()` or a test calls
//! [`Sim::advance_clock()`], so firmware timeouts are exercised without sleeping.

extern crate bit_field;
extern crate bnxt_hsi;
extern crate log;
extern crate nic_hal;
extern crate spin;
extern crate zerocopy;

mod engine;
mod firmware;
mod mem;
mod regs;

#[cfg(test)]
mod test;

pub use engine::{DoorbellRecord, DoorbellWrite, SimRxPacket, SimTxPacket};
pub use firmware::{Reservation, SimL2Filter, SimNtupleFilter, SimRing, SimVnic};

use std::ptr::NonNull;
use std::sync::Arc;
use spin::Mutex;
use bnxt_hsi::*;
use nic_hal::{Bar, DmaDirection, Hal, HalRef, PhysicalAddress};

/// Callback invoked after firmware accepted a request, with its type and sequence id.
pub type HwrmHook = Box<dyn Fn(u16, u16) + Send + Sync>;

/// The shape of the simulated device and its firmware.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub chip_num:           u16,
    pub device_id:          u16,
    pub mac:                [u8; 6],
    pub max_tx_rings:       u16,
    pub max_rx_rings:       u16,
    pub max_cp_rings:       u16,
    pub max_stat_ctxs:      u16,
    pub max_vnics:          u16,
    pub max_rsscos_ctxs:    u16,
    pub max_ring_grps:      u16,
    pub max_l2_ctxs:        u16,
    pub max_nqs:            u16,
    pub max_msix:           u16,
    pub max_tpa_aggs:       u16,
    pub max_vfs:            u16,
    pub short_cmd_required: bool,
    pub max_req_win_len:    u16,
    pub max_ext_req_len:    u16,
    pub def_req_timeout_ms: u16,
    pub max_req_timeout_s:  u16,
    /// Advertise WCB push (`PUSH_MODE_SUPPORTED`).
    pub push_mode:          bool,
    /// Advertise ping-pong page push.
    pub ppp_push:           bool,
    pub error_recovery:     bool,
    pub err_recover_reload: bool,
    pub hot_reset:          bool,
    /// Recovery is performed by the embedded CPU through `FW_RESET` rather than by the host
    /// writing the reset register sequence.
    pub co_cpu_recovery:    bool,
    pub hw_dbr_drop_recov:  bool,
    /// How long firmware ignores requests after a reset.
    pub fw_boot_us:         u64,
    pub heartbeat_period_us: u64,
    /// How often the driver should sample the health registers.
    pub polling_freq_ms:    u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            chip_num:           CHIP_NUM_57508,
            device_id:          0x1750,
            mac:                [0x00, 0x0a, 0xf7, 0x12, 0x34, 0x56],
            max_tx_rings:       8,
            max_rx_rings:       8,
            max_cp_rings:       16,
            max_stat_ctxs:      16,
            max_vnics:          8,
            max_rsscos_ctxs:    8,
            max_ring_grps:      8,
            max_l2_ctxs:        16,
            max_nqs:            8,
            max_msix:           16,
            max_tpa_aggs:       64,
            max_vfs:            4,
            short_cmd_required: false,
            max_req_win_len:    128,
            max_ext_req_len:    1024,
            def_req_timeout_ms: 500,
            max_req_timeout_s:  40,
            push_mode:          false,
            ppp_push:           false,
            error_recovery:     true,
            err_recover_reload: true,
            hot_reset:          true,
            co_cpu_recovery:    false,
            hw_dbr_drop_recov:  false,
            fw_boot_us:         300_000,
            heartbeat_period_us: 100_000,
            polling_freq_ms:    100,
        }
    }
}

impl SimConfig {
    /// A 5730x-class device: legacy doorbells, ring groups, no notification queues.
    pub fn p4() -> SimConfig {
        SimConfig { chip_num: CHIP_NUM_57414, device_id: 0x16d7, ..SimConfig::default() }
    }

    /// A 5760x-class device with WCB push advertised.
    pub fn p7() -> SimConfig {
        SimConfig { chip_num: CHIP_NUM_57608, device_id: 0x1760, push_mode: true, ..SimConfig::default() }
    }

    pub fn chip(&self) -> ChipKind {
        ChipKind::from_chip_num(self.chip_num)
    }
}

/// The simulated device. Share it as an `Arc<Sim>` between the test and the driver.
pub struct Sim {
    state: Mutex<State>,
    hook: Mutex<Option<Arc<HwrmHook>>>,
}

pub(crate) struct State {
    pub(crate) cfg: SimConfig,
    pub(crate) clock_us: u64,
    pub(crate) mem: mem::DmaMemory,
    pub(crate) regs: regs::Regs,
    pub(crate) fw: firmware::Firmware,
    pub(crate) eng: engine::Engine,
    pub(crate) pci_enabled: bool,
    pub(crate) bus_master: bool,
}

impl Sim {
    pub fn new(cfg: SimConfig) -> Arc<Sim> {
        let state = State {
            regs: regs::Regs::new(&cfg),
            fw: firmware::Firmware::new(&cfg),
            eng: engine::Engine::default(),
            clock_us: 1_000_000,
            mem: mem::DmaMemory::default(),
            pci_enabled: true,
            bus_master: true,
            cfg,
        };
        Arc::new(Sim { state: Mutex::new(state), hook: Mutex::new(None) })
    }

    /// Returns this device as the platform handle the driver crates take.
    pub fn hal(self: &Arc<Self>) -> HalRef {
        self.clone()
    }

    pub fn config(&self) -> SimConfig {
        self.state.lock().cfg.clone()
    }

    /* ------------------------------ time ------------------------------ */

    pub fn now(&self) -> u64 {
        self.state.lock().clock_us
    }

    /// Moves virtual time forward, delivering any firmware work that becomes due.
    pub fn advance_clock(&self, us: u64) {
        let mut st = self.state.lock();
        st.clock_us += us;
        st.tick();
    }

    /* ------------------------------ DMA ------------------------------ */

    /// The number of streaming mappings the driver has not unmapped yet.
    pub fn live_dma_mappings(&self) -> usize {
        self.state.lock().mem.live_mappings()
    }

    /// The number of coherent allocations the driver has not freed yet.
    pub fn live_dma_allocations(&self) -> usize {
        self.state.lock().mem.live_allocations()
    }

    pub fn fail_next_dma_maps(&self, count: usize) {
        self.state.lock().mem.fail_maps = count;
    }

    pub fn fail_next_dma_allocs(&self, count: usize) {
        self.state.lock().mem.fail_allocs = count;
    }

    /* ------------------------------ HWRM ------------------------------ */

    /// Installs a callback run after every request firmware accepts, outside the device lock.
    pub fn on_hwrm_request(&self, hook: Option<HwrmHook>) {
        *self.hook.lock() = hook.map(Arc::new);
    }

    /// Makes every request of `req_type` fail with `error_code` until cleared with code 0.
    pub fn set_hwrm_error(&self, req_type: u16, error_code: u16) {
        let mut st = self.state.lock();
        if error_code == 0 {
            st.fw.errors.remove(&req_type);
        } else {
            st.fw.errors.insert(req_type, (error_code, usize::MAX));
        }
    }

    /// Makes the next `count` requests of `req_type` fail with `error_code`.
    pub fn fail_next_hwrm(&self, req_type: u16, error_code: u16, count: usize) {
        self.state.lock().fw.errors.insert(req_type, (error_code, count));
    }

    /// Makes firmware silently swallow requests of `req_type`.
    pub fn drop_hwrm(&self, req_type: u16, drop: bool) {
        let mut st = self.state.lock();
        if drop {
            st.fw.dropped.insert(req_type);
        } else {
            st.fw.dropped.remove(&req_type);
        }
    }

    /// Makes firmware answer requests of `req_type` only after `delay_us` of virtual time.
    pub fn defer_hwrm(&self, req_type: u16, delay_us: Option<u64>) {
        let mut st = self.state.lock();
        match delay_us {
            Some(us) => { st.fw.deferred.insert(req_type, us); }
            None => { st.fw.deferred.remove(&req_type); }
        }
    }

    /// The request types firmware received, in order.
    pub fn requests_seen(&self) -> Vec<u16> {
        self.state.lock().fw.log.iter().map(|(t, _)| *t).collect()
    }

    pub fn request_count(&self, req_type: u16) -> usize {
        self.state.lock().fw.log.iter().filter(|(t, _)| *t == req_type).count()
    }

    /// The body of the last request of `req_type`.
    pub fn last_request(&self, req_type: u16) -> Option<Vec<u8>> {
        self.state.lock().fw.log.iter().rev().find(|(t, _)| *t == req_type).map(|(_, b)| b.clone())
    }

    pub fn clear_requests(&self) {
        self.state.lock().fw.log.clear();
    }

    /// The number of requests that arrived through the short command indirection.
    pub fn short_cmd_count(&self) -> usize {
        self.state.lock().fw.short_cmds
    }

    /// Posts an HWRM-done completion for `seq_id` on the async completion ring.
    pub fn inject_hwrm_done(&self, seq_id: u16) -> bool {
        self.state.lock().post_hwrm_done(seq_id)
    }

    /// Posts an async event on the async completion ring.
    pub fn inject_async_event(&self, event_id: u16, data1: u32, data2: u32) -> bool {
        self.state.lock().post_async_event(event_id, data1, data2)
    }

    /* ------------------------------ firmware state ------------------------------ */

    pub fn set_registered_vfs(&self, vfs: u16) {
        self.state.lock().fw.registered_vfs = vfs;
    }

    /// Caps how many RX rings firmware grants, regardless of what is requested.
    pub fn limit_rx_grant(&self, limit: Option<u16>) {
        self.state.lock().fw.rx_grant_limit = limit;
    }

    /// Caps how many RSS contexts firmware grants.
    pub fn limit_rss_grant(&self, limit: Option<u16>) {
        self.state.lock().fw.rss_grant_limit = limit;
    }

    pub fn registered(&self) -> bool {
        self.state.lock().fw.registered
    }

    pub fn if_up(&self) -> bool {
        self.state.lock().fw.if_up
    }

    /// The currently reserved (tx, rx, cmpl, stat, vnic, rss) counts.
    pub fn reservation(&self) -> firmware::Reservation {
        self.state.lock().fw.resv
    }

    pub fn mtu(&self) -> u16 {
        self.state.lock().fw.mtu
    }

    pub fn rings(&self) -> Vec<SimRing> {
        self.state.lock().fw.rings.values().cloned().collect()
    }

    pub fn ring_count(&self) -> usize {
        self.state.lock().fw.rings.len()
    }

    pub fn stat_ctx_count(&self) -> usize {
        self.state.lock().fw.stat_ctxs.len()
    }

    pub fn ring_grp_count(&self) -> usize {
        self.state.lock().fw.ring_grps.len()
    }

    pub fn vnics(&self) -> Vec<SimVnic> {
        self.state.lock().fw.vnics.values().cloned().collect()
    }

    pub fn rss_ctx_count(&self) -> usize {
        self.state.lock().fw.rss_ctxs.len()
    }

    pub fn l2_filters(&self) -> Vec<SimL2Filter> {
        self.state.lock().fw.l2_filters.values().cloned().collect()
    }

    pub fn ntuple_filters(&self) -> Vec<SimNtupleFilter> {
        self.state.lock().fw.ntuple_filters.values().cloned().collect()
    }

    /// The last RX mask and multicast list programmed with `CFA_L2_SET_RX_MASK`.
    pub fn rx_mask(&self) -> Option<(u32, Vec<[u8; 6]>)> {
        self.state.lock().fw.rx_mask.clone()
    }

    pub fn backing_store_configured(&self) -> bool {
        self.state.lock().fw.backing_store
    }

    pub fn dbr_recovery_completions(&self) -> Vec<u32> {
        self.state.lock().fw.dbr_completed.clone()
    }

    pub fn echo_responses(&self) -> Vec<(u32, u32)> {
        self.state.lock().fw.echo_responses.clone()
    }

    /// `(ring id, int_lat_tmr_min, int_lat_tmr_max, num_cmpl_aggr_int)` per aggint request.
    pub fn aggint_params(&self) -> Vec<(u16, u16, u16, u16)> {
        self.state.lock().fw.aggint.clone()
    }

    /// How many times the firmware has been reset.
    pub fn fw_reset_count(&self) -> u32 {
        self.state.lock().fw.reset_count
    }

    /// Writes a word of GRC register space, visible through `DBG_READ_DIRECT`.
    pub fn set_grc(&self, addr: u32, value: u32) {
        self.state.lock().regs.grc.insert(addr, value);
    }

    /* ------------------------------ health ------------------------------ */

    /// Stops (or restarts) the firmware heartbeat counter.
    pub fn freeze_heartbeat(&self, frozen: bool) {
        let mut st = self.state.lock();
        let now = st.clock_us;
        st.regs.freeze_heartbeat(frozen, now);
    }

    pub fn set_fw_status(&self, status: u32) {
        self.state.lock().regs.force_status(status);
    }

    pub fn fw_status(&self) -> u32 {
        let st = self.state.lock();
        st.regs.status(st.clock_us)
    }

    pub fn pci_enabled(&self) -> bool {
        self.state.lock().pci_enabled
    }

    pub fn bus_master(&self) -> bool {
        self.state.lock().bus_master
    }

    /* ------------------------------ traffic ------------------------------ */

    /// Removes and returns every packet the device transmitted so far.
    pub fn take_transmitted(&self) -> Vec<SimTxPacket> {
        std::mem::take(&mut self.state.lock().eng.transmitted)
    }

    /// Stops (or resumes) writing TX completions; transmitted packets are still recorded.
    pub fn hold_tx_completions(&self, hold: bool) {
        let mut st = self.state.lock();
        st.eng.hold_tx_cmpl = hold;
        if !hold {
            st.release_tx_completions();
        }
    }

    /// Receives `pkt` on the `rx_index`-th RX ring the driver allocated.
    pub fn inject_rx(&self, rx_index: usize, pkt: &SimRxPacket) -> Result<(), &'static str> {
        self.state.lock().receive(rx_index, pkt)
    }

    /// Opens TPA aggregation `agg_id` on the `rx_index`-th RX ring with the first segment.
    pub fn tpa_start(&self, rx_index: usize, agg_id: u16, pkt: &SimRxPacket) -> Result<(), &'static str> {
        self.state.lock().tpa_start(rx_index, agg_id, pkt)
    }

    /// Places `data` in an aggregation buffer of aggregation `agg_id`.
    pub fn tpa_agg(&self, rx_index: usize, agg_id: u16, data: &[u8]) -> Result<(), &'static str> {
        self.state.lock().tpa_agg(rx_index, agg_id, data)
    }

    /// Closes aggregation `agg_id`, reporting `segs` segments of `seg_len` bytes.
    pub fn tpa_end(&self, rx_index: usize, agg_id: u16, segs: u32, seg_len: u32) -> Result<(), &'static str> {
        self.state.lock().tpa_end(rx_index, agg_id, segs, seg_len)
    }

    /// The number of buffers the driver has posted and the device has not consumed yet,
    /// on the `rx_index`-th RX ring and on its aggregation ring.
    pub fn rx_buffers_posted(&self, rx_index: usize) -> (u32, u32) {
        self.state.lock().rx_posted(rx_index)
    }

    pub fn doorbells(&self) -> Vec<DoorbellRecord> {
        self.state.lock().eng.doorbells.clone()
    }

    pub fn clear_doorbells(&self) {
        self.state.lock().eng.doorbells.clear();
    }

    /// Makes the device ignore doorbell writes, as if they were dropped on the bus.
    pub fn drop_doorbells(&self, drop: bool) {
        self.state.lock().eng.drop_doorbells = drop;
    }

    /// Doorbells whose epoch or toggle bits did not match the ring state.
    pub fn doorbell_errors(&self) -> u32 {
        self.state.lock().eng.db_errors
    }

    /// Completion ring entries written while the ring had no free slot.
    pub fn cq_overflows(&self) -> u32 {
        self.state.lock().eng.cq_overflows
    }

    /// Interrupts raised on armed notification (or, on P4, completion) rings.
    pub fn interrupts(&self) -> u32 {
        self.state.lock().eng.interrupts
    }
}

impl State {
    /// Work that becomes due as time passes.
    pub(crate) fn tick(&mut self) {
        self.deliver_deferred();
    }
}

impl Hal for Sim {
    fn dma_alloc_coherent(&self, size: usize) -> Option<(PhysicalAddress, NonNull<u8>)> {
        self.state.lock().mem.alloc(size)
    }

    unsafe fn dma_free_coherent(&self, paddr: PhysicalAddress, vaddr: NonNull<u8>, size: usize) {
        self.state.lock().mem.free(paddr, vaddr, size)
    }

    fn dma_map(&self, vaddr: NonNull<u8>, len: usize, dir: DmaDirection) -> Option<PhysicalAddress> {
        self.state.lock().mem.map(vaddr, len, dir)
    }

    fn dma_unmap(&self, paddr: PhysicalAddress, len: usize, _dir: DmaDirection) {
        self.state.lock().mem.unmap(paddr, len)
    }

    fn read32(&self, bar: Bar, offset: usize) -> u32 {
        let mut st = self.state.lock();
        st.tick();
        st.mmio_read32(bar, offset)
    }

    fn write32(&self, bar: Bar, offset: usize, value: u32) {
        let accepted = self.state.lock().mmio_write32(bar, offset, value);
        if let Some((req_type, seq_id)) = accepted {
            let hook = self.hook.lock().clone();
            if let Some(hook) = hook {
                hook(req_type, seq_id);
            }
        }
    }

    fn write64(&self, bar: Bar, offset: usize, value: u64) {
        self.state.lock().mmio_write64(bar, offset, value)
    }

    fn wc_copy(&self, bar: Bar, offset: usize, data: &[u64]) {
        self.state.lock().mmio_wc_copy(bar, offset, data)
    }

    fn pci_read_config16(&self, offset: u16) -> u16 {
        let st = self.state.lock();
        if st.regs.config_dead(st.clock_us) {
            return 0xffff;
        }
        match offset {
            0 => 0x14e4,
            2 => st.cfg.device_id,
            _ => 0,
        }
    }

    fn pci_enable_device(&self) -> Result<(), &'static str> {
        let mut st = self.state.lock();
        if st.regs.config_dead(st.clock_us) {
            return Err("PCI device is not responding");
        }
        st.pci_enabled = true;
        Ok(())
    }

    fn pci_disable_device(&self) {
        self.state.lock().pci_enabled = false;
    }

    fn pci_set_master(&self, enable: bool) {
        self.state.lock().bus_master = enable;
    }

    fn delay_us(&self, us: u64) {
        let mut st = self.state.lock();
        st.clock_us += us.max(1);
        st.tick();
    }

    fn now_us(&self) -> u64 {
        let mut st = self.state.lock();
        st.tick();
        st.clock_us
    }
}
