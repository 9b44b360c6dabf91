//! The control plane: open and close, RX filtering modes, offload features, MTU, MAC
//! address and XDP attachment.
//!
//! Every public operation here takes the control lock, so they are serialized against
//! each other and against the reset orchestrator.

use alloc::sync::Arc;
use bnxt_hsi::{Le16, Le32};
use bnxt_hsi::hwrm::*;
use crate::{Bnxt, BnxtError, DevState, FwResetState, NetFeatures, SpEvents, XdpProgram};
use crate::config::*;
use crate::filter::L2FilterKey;

/// Multicast lists longer than this fall back to accepting all multicast.
const BNXT_MAX_MC_ADDRS: usize = 16;

bitflags! {
    /// Which frames the default VNIC accepts besides those addressed to its MAC.
    pub struct RxMask: u32 {
        const MCAST       = CFA_L2_SET_RX_MASK_MCAST;
        const ALL_MCAST   = CFA_L2_SET_RX_MASK_ALL_MCAST;
        const BCAST       = CFA_L2_SET_RX_MASK_BCAST;
        const PROMISCUOUS = CFA_L2_SET_RX_MASK_PROMISCUOUS;
    }
}

impl Bnxt {
    /// Brings the datapath up.
    pub fn open(&self) -> Result<(), BnxtError> {
        let _guard = self.ctrl.lock();
        if self.test_state(DevState::IN_FW_RESET) {
            return Err(BnxtError::Busy);
        }
        if self.is_open() {
            return Ok(());
        }
        if self.test_state(DevState::ABORT_ERR) {
            info!("bnxt: recovering firmware state after an aborted reset");
            self.fw_init(true)?;
            self.clear_state(DevState::ABORT_ERR);
            self.reset.lock().state = FwResetState::Idle;
        }
        self.open_nic(true)
    }

    /// Takes the datapath down and frees every ring.
    pub fn close(&self) {
        let _guard = self.ctrl.lock();
        if self.is_open() {
            self.close_nic(true);
        }
    }

    /// Allocates and configures the rings. With `if_change`, firmware is told the
    /// interface is going up first, and may answer that it went through a reset.
    pub(crate) fn open_nic(&self, if_change: bool) -> Result<(), BnxtError> {
        if if_change && !self.vf {
            let flags = self.if_change(true)?;
            if flags & FUNC_DRV_IF_CHANGE_RESP_FLAGS_HOT_FW_RESET_DONE != 0 {
                info!("bnxt: firmware was reset while the interface was down");
                self.fw_init(false)?;
            } else if flags & FUNC_DRV_IF_CHANGE_RESP_FLAGS_RESC_CHANGE != 0 {
                self.init_ring_counts();
            }
        }
        let counts = self.reserve_rings()?;
        let fabric = Arc::new(self.build_fabric(counts)?);
        if let Err(e) = self.vnic_setup(&fabric) {
            error!("bnxt: VNIC setup failed: {}", e);
            self.free_fabric(&fabric);
            return Err(e);
        }
        *self.fabric.lock() = Some(fabric);
        if let Err(e) = self.set_coalesce() {
            warn!("bnxt: setting interrupt coalescing failed: {}", e);
        }
        self.set_state(DevState::OPEN);
        info!("bnxt: open with {} RX and {} TX rings", counts.rx, counts.tx);
        Ok(())
    }

    pub(crate) fn close_nic(&self, if_change: bool) {
        self.clear_state(DevState::OPEN);
        self.save_stats();
        let Some(fabric) = self.fabric.lock().take() else { return };
        for q in fabric.txq.iter() {
            q.ring.stop();
        }
        self.vnic_teardown();
        {
            // Wait out any poll still running on these rings.
            let _napis: alloc::vec::Vec<_> = fabric.napis.iter().map(|n| n.lock()).collect();
        }
        self.free_fabric(&fabric);
        if if_change && !self.vf && !self.test_state(DevState::FW_FATAL_COND) {
            if let Err(e) = self.if_change(false) {
                warn!("bnxt: IF_CHANGE down failed: {}", e);
            }
        }
        debug!("bnxt: closed");
    }

    /// Sets which frames are accepted. Unicast addresses other than the device's own
    /// put the VNIC in promiscuous mode.
    pub fn set_rx_mode(&self, mask: RxMask, uc: &[[u8; 6]], mc: &[[u8; 6]]) -> Result<(), BnxtError> {
        let _guard = self.ctrl.lock();
        self.check_alive()?;
        let vnic_id = self.vnic.lock().default_id().ok_or(BnxtError::NoDevice)?;
        let mut mask = mask | RxMask::BCAST;
        let own = self.info.lock().mac;
        if uc.iter().any(|a| *a != own) {
            mask |= RxMask::PROMISCUOUS;
        }
        let mc = if mc.len() > BNXT_MAX_MC_ADDRS {
            mask |= RxMask::ALL_MCAST;
            &[][..]
        } else {
            mc
        };
        self.hwrm_set_rx_mask(vnic_id, mask, mc)
    }

    /// Changes the offloads. Aggregation offloads are dropped when the device cannot
    /// use aggregation rings; changes that affect ring layout reopen the device.
    pub fn set_features(&self, mut features: NetFeatures) -> Result<NetFeatures, BnxtError> {
        let _guard = self.ctrl.lock();
        self.check_alive()?;
        if self.xdp.lock().is_some() || self.info.lock().max_tpa == 0 {
            features.remove(NetFeatures::LRO | NetFeatures::GRO_HW);
        }
        if features.contains(NetFeatures::LRO) && features.contains(NetFeatures::GRO_HW) {
            features.remove(NetFeatures::LRO);
        }
        let old = core::mem::replace(&mut self.cfg.lock().features, features);
        let relayout = NetFeatures::LRO | NetFeatures::GRO_HW | NetFeatures::HW_VLAN_RX | NetFeatures::NTUPLE;
        if (old ^ features).intersects(relayout) {
            self.init_ring_counts();
            self.reopen()?;
        }
        Ok(features)
    }

    /// Sets the MTU; the device is reopened to resize its buffers.
    pub fn change_mtu(&self, mtu: u16) -> Result<(), BnxtError> {
        let _guard = self.ctrl.lock();
        self.check_alive()?;
        if !(BNXT_MIN_MTU..=BNXT_MAX_MTU).contains(&mtu) {
            return Err(BnxtError::InvalidArgument);
        }
        let single_buf = self.xdp.lock().as_ref().map_or(false, |p| !p.supports_frags());
        if single_buf && mtu > BNXT_MAX_PAGE_MODE_MTU {
            warn!("bnxt: MTU {} is too large with XDP attached", mtu);
            return Err(BnxtError::InvalidArgument);
        }
        let mut req = self.hwrm.req_init::<FuncCfgInput>()?;
        req.req.fid = Le16::new(0xffff);
        req.req.enables = Le32::new(FUNC_CFG_ENABLES_MTU);
        req.req.mtu = Le16::new(mtu + 14 + VLAN_HLEN as u16);
        req.send()?;
        self.cfg.lock().mtu = mtu;
        self.init_ring_counts();
        self.reopen()
    }

    pub fn get_mtu(&self) -> u16 {
        self.cfg.lock().mtu
    }

    /// Changes the device's unicast address, moving the default L2 filter with it.
    pub fn change_mac(&self, addr: [u8; 6]) -> Result<(), BnxtError> {
        let _guard = self.ctrl.lock();
        self.check_alive()?;
        if addr[0] & 1 != 0 || addr == [0; 6] {
            return Err(BnxtError::InvalidArgument);
        }
        let (vnic_id, old) = {
            let vnic = self.vnic.lock();
            (vnic.default_id(), vnic.l2_filter)
        };
        if let Some(vnic_id) = vnic_id {
            let new = self.hwrm_l2_filter_alloc(vnic_id, &L2FilterKey { addr, vlan: None })?;
            self.vnic.lock().l2_filter = Some(new);
            if let Some(old) = old {
                if let Err(e) = self.hwrm_l2_filter_free(old) {
                    warn!("bnxt: freeing the old MAC filter failed: {}", e);
                }
            }
        }
        self.info.lock().mac = addr;
        info!("bnxt: MAC address set to {:x?}", addr);
        Ok(())
    }

    /// Called by the host's watchdog when TX queue `qid` has not completed in time.
    pub fn tx_timeout(&self, qid: u16) {
        error!("bnxt: TX timeout on queue {}", qid);
        if let Some(q) = self.fabric().and_then(|f| f.txq.get(qid as usize).map(|q| q.ring.in_flight())) {
            debug!("bnxt: queue {} has {} descriptors in flight", qid, q);
        }
        self.pending.lock().tx_fault = true;
        self.queue_sp_event(SpEvents::RESET_RING);
    }

    /// Attaches or detaches an XDP program. Aggregation offloads are off while a program
    /// is attached; jumbo frames still use AGG buffers if the program takes frags.
    pub fn attach_xdp(&self, prog: Option<Arc<dyn XdpProgram>>) -> Result<(), BnxtError> {
        let _guard = self.ctrl.lock();
        self.check_alive()?;
        let single_buf = prog.as_ref().map_or(false, |p| !p.supports_frags());
        if single_buf && self.cfg.lock().mtu > BNXT_MAX_PAGE_MODE_MTU {
            warn!("bnxt: MTU {} is too large for XDP", self.cfg.lock().mtu);
            return Err(BnxtError::InvalidArgument);
        }
        if prog.is_some() {
            self.cfg.lock().features.remove(NetFeatures::LRO | NetFeatures::GRO_HW);
        }
        *self.xdp.lock() = prog;
        self.init_ring_counts();
        self.reopen()
    }

    /// Fails once firmware has declared the device dead.
    pub(crate) fn check_alive(&self) -> Result<(), BnxtError> {
        if self.test_state(DevState::FW_FATAL_COND) {
            return Err(BnxtError::NoDevice);
        }
        Ok(())
    }

    /// Closes and reopens the device if it is open. The control lock must be held.
    fn reopen(&self) -> Result<(), BnxtError> {
        if !self.is_open() {
            return Ok(());
        }
        self.close_nic(false);
        self.open_nic(false)
    }
}
