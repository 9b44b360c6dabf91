//! Bringing up the firmware side of a function: version and capability discovery,
//! driver registration, and the context memory firmware keeps in host DRAM.

use core::sync::atomic::{AtomicBool, AtomicU32};
use alloc::{sync::Arc, vec::Vec};
use spin::Mutex;
use nic_hal::HalRef;
use bnxt_hsi::{ChipKind, Le16, Le32, Le64, BNXT_PAGE_SIZE};
use bnxt_hsi::hwrm::*;
use bnxt_hsi::event::AsyncEventId;
use bnxt_hwrm::{HwrmCaps, HwrmChannel, HwrmError};
use bnxt_rings::{InitPattern, PushMode, RingMem};
use crate::{Bnxt, BnxtConfig, BnxtError, DevState, PacketSink, RingCounts};
use crate::health::FwHealth;

/// The PCI config space offset of the device ID.
const PCI_DEVICE_ID: u16 = 0x02;

pub const DRV_VER_MAJ: u8 = 1;
pub const DRV_VER_MIN: u8 = 10;
pub const DRV_VER_UPD: u8 = 3;

/// What firmware told the driver about the function.
#[derive(Clone, Debug)]
pub struct FwInfo {
    pub hwrm_version: [u8; 3],
    pub fw_version: [u8; 3],
    pub chip_num: u16,
    pub chip_rev: u8,
    pub fid: u16,
    pub port_id: u16,
    pub mac: [u8; 6],
    /// `FUNC_QCAPS` flags.
    pub flags: u32,
    pub flags_ext: u32,
    /// The most of each resource the function may reserve.
    pub max: RingCounts,
    pub max_nqs: u16,
    pub max_tpa: u16,
    pub max_vfs: u16,
    /// How TX rings push small packets.
    pub push_mode: PushMode,
    /// Firmware can recover from fatal errors with the driver's help.
    pub error_recovery: bool,
    pub mtu: u16,
}

impl FwInfo {
    fn new(ver: &VerGetOutput) -> FwInfo {
        FwInfo {
            hwrm_version: [ver.hwrm_intf_maj, ver.hwrm_intf_min, ver.hwrm_intf_upd],
            fw_version:   [ver.fw_maj, ver.fw_min, ver.fw_bld],
            chip_num:     ver.chip_num.get(),
            chip_rev:     ver.chip_rev,
            fid:          0xffff,
            port_id:      0,
            mac:          [0; 6],
            flags:        0,
            flags_ext:    0,
            max:          RingCounts::default(),
            max_nqs:      0,
            max_tpa:      0,
            max_vfs:      0,
            push_mode:    PushMode::None,
            error_recovery: false,
            mtu:          0,
        }
    }
}

/// Sends `VER_GET`, which also teaches the channel the firmware's mailbox limits.
pub(crate) fn hwrm_ver_get(hwrm: &HwrmChannel, timeout_ms: Option<u32>, silent: bool) -> Result<VerGetOutput, HwrmError> {
    let mut req = hwrm.req_init::<VerGetInput>()?;
    req.req.hwrm_intf_maj = HWRM_VERSION_MAJOR;
    req.req.hwrm_intf_min = HWRM_VERSION_MINOR;
    req.req.hwrm_intf_upd = HWRM_VERSION_UPDATE;
    if let Some(ms) = timeout_ms {
        req.set_timeout(ms);
    }
    let resp = if silent { req.send_silent()? } else { req.send()? };
    hwrm.set_caps(HwrmCaps::from_ver_get(&resp));
    Ok(resp)
}

impl Bnxt {
    /// Brings up a bnxt function: enables the PCI device, learns what firmware supports,
    /// and registers the driver. The returned device is closed.
    pub fn probe(hal: HalRef, cfg: BnxtConfig, sink: Arc<dyn PacketSink>) -> Result<Arc<Bnxt>, BnxtError> {
        hal.pci_enable_device().map_err(|e| {
            error!("bnxt: failed to enable the PCI device: {}", e);
            BnxtError::NoDevice
        })?;
        hal.pci_set_master(true);

        let device_id = hal.pci_read_config16(PCI_DEVICE_ID);
        if device_id == 0xffff {
            hal.pci_disable_device();
            return Err(BnxtError::NoDevice);
        }
        let vf = bnxt_hsi::is_vf_device(device_id);

        let hwrm = HwrmChannel::new(hal.clone());
        let ver = match hwrm_ver_get(&hwrm, None, false) {
            Ok(ver) => ver,
            Err(e) => {
                error!("bnxt: firmware did not answer VER_GET: {}", e);
                hal.pci_disable_device();
                return Err(e.into());
            }
        };
        let chip = ChipKind::from_chip_num(ver.chip_num.get());
        info!("bnxt: chip {:#x} ({:?}), firmware {}.{}.{}, HWRM interface {}.{}.{}{}",
            ver.chip_num.get(), chip, ver.fw_maj, ver.fw_min, ver.fw_bld,
            ver.hwrm_intf_maj, ver.hwrm_intf_min, ver.hwrm_intf_upd,
            if vf { ", VF" } else { "" }
        );

        let bnxt = Arc::new(Bnxt {
            hal: hal.clone(),
            hwrm,
            chip,
            vf,
            sink,
            cfg: Mutex::new(cfg),
            info: Mutex::new(FwInfo::new(&ver)),
            health: Mutex::new(None),
            ctx_mem: Mutex::new(Vec::new()),
            rings: Mutex::new(RingCounts::default()),
            state: AtomicU32::new(0),
            sp_events: AtomicU32::new(0),
            link_up: AtomicBool::new(false),
            ctrl: Mutex::new(()),
            fabric: Mutex::new(None),
            vnic: Mutex::new(Default::default()),
            filters: Mutex::new(Default::default()),
            reset: Mutex::new(Default::default()),
            dbr: Mutex::new(Default::default()),
            xdp: Mutex::new(None),
            pending: Mutex::new(Default::default()),
            prev_stats: Mutex::new(Default::default()),
        });

        if let Err(e) = bnxt.fw_init(true) {
            error!("bnxt: firmware initialization failed: {}", e);
            bnxt.fw_uninit();
            hal.pci_disable_device();
            return Err(e);
        }
        Ok(bnxt)
    }

    /// Discovers capabilities, registers the driver and sets up context memory.
    /// `reset_func` also resets the function, dropping whatever a previous driver left.
    pub(crate) fn fw_init(&self, reset_func: bool) -> Result<(), BnxtError> {
        if reset_func {
            self.func_reset()?;
        }
        self.func_qcaps()?;
        self.error_recovery_qcfg()?;
        self.drv_rgtr()?;
        if self.chip.is_p5_plus() {
            self.alloc_ctx_mem()?;
        }
        self.func_qcfg_info()?;
        self.init_ring_counts();
        Ok(())
    }

    /// Undoes [`fw_init()`](Self::fw_init), tolerating a firmware that no longer answers.
    pub(crate) fn fw_uninit(&self) {
        if self.test_state(DevState::REGISTERED) {
            if let Err(e) = self.drv_unrgtr() {
                debug!("bnxt: FUNC_DRV_UNRGTR failed: {}", e);
            }
        }
        self.free_ctx_mem();
    }

    fn func_reset(&self) -> Result<(), BnxtError> {
        let mut req = self.hwrm.req_init::<FuncResetInput>()?;
        req.req.enables = Le32::new(0);
        req.send()?;
        Ok(())
    }

    fn func_qcaps(&self) -> Result<(), BnxtError> {
        let mut req = self.hwrm.req_init::<FuncQcapsInput>()?;
        req.req.fid = Le16::new(0xffff);
        let resp = req.send()?;
        let flags = resp.flags.get();
        let flags_ext = resp.flags_ext.get();
        let enable_wcb = self.cfg.lock().enable_wcb_push;

        let push_mode = if self.chip.is_p7() && enable_wcb && flags & FUNC_QCAPS_FLAGS_PUSH_MODE_SUPPORTED != 0 {
            if flags_ext & FUNC_QCAPS_FLAGS_EXT_PPP_PUSH_MODE_SUPPORTED != 0 {
                PushMode::Ppp
            } else {
                PushMode::Wcb
            }
        } else if !self.chip.is_p5_plus() && !self.vf {
            PushMode::Legacy
        } else {
            PushMode::None
        };

        let mut info = self.info.lock();
        info.fid = resp.fid.get();
        info.port_id = resp.port_id.get();
        info.mac = resp.mac_address;
        info.flags = flags;
        info.flags_ext = flags_ext;
        info.max = RingCounts {
            tx:    resp.max_tx_rings.get(),
            rx:    resp.max_rx_rings.get(),
            cp:    resp.max_cmpl_rings.get(),
            stat:  resp.max_stat_ctx.get(),
            vnic:  resp.max_vnics.get(),
            rss:   resp.max_rsscos_ctx.get(),
            grp:   resp.max_hw_ring_grps.get(),
            l2:    resp.max_l2_ctxs.get(),
            msix:  resp.max_nqs.get().max(resp.max_cmpl_rings.get()),
            ..RingCounts::default()
        };
        info.max_nqs = resp.max_nqs.get();
        info.max_tpa = resp.max_tpa_aggs.get();
        info.max_vfs = resp.max_vfs.get();
        info.push_mode = push_mode;
        info.error_recovery = flags & FUNC_QCAPS_FLAGS_ERROR_RECOVERY_CAPABLE != 0;
        debug!("bnxt: QCAPS flags {:#x}/{:#x}, max {:?}, push {:?}", flags, flags_ext, info.max, push_mode);
        Ok(())
    }

    fn error_recovery_qcfg(&self) -> Result<(), BnxtError> {
        if !self.info.lock().error_recovery {
            *self.health.lock() = None;
            return Ok(());
        }
        let mut req = self.hwrm.req_init::<ErrorRecoveryQcfgInput>()?;
        match req.send_silent() {
            Ok(resp) => {
                *self.health.lock() = Some(FwHealth::from_qcfg(&resp));
                Ok(())
            }
            Err(HwrmError::FirmwareStatus(HWRM_ERR_CODE_CMD_NOT_SUPPORTED)) => {
                self.info.lock().error_recovery = false;
                *self.health.lock() = None;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn drv_rgtr(&self) -> Result<(), BnxtError> {
        let error_recovery = self.info.lock().error_recovery;
        let mut req = self.hwrm.req_init::<FuncDrvRgtrInput>()?;
        let mut flags = 0;
        if error_recovery {
            flags |= FUNC_DRV_RGTR_FLAGS_ERROR_RECOVERY_SUPPORT | FUNC_DRV_RGTR_FLAGS_MASTER_SUPPORT;
        }
        req.req.flags = Le32::new(flags);
        req.req.enables = Le32::new(
            FUNC_DRV_RGTR_ENABLES_OS_TYPE | FUNC_DRV_RGTR_ENABLES_VER | FUNC_DRV_RGTR_ENABLES_ASYNC_EVENT_FWD
        );
        req.req.os_type = Le16::new(FUNC_DRV_RGTR_OS_TYPE_OTHER);
        req.req.ver_maj = DRV_VER_MAJ;
        req.req.ver_min = DRV_VER_MIN;
        req.req.ver_upd = DRV_VER_UPD;

        let mut bitmap = [0u32; 8];
        for id in AsyncEventId::ALL.iter() {
            let id = *id as u16 as usize;
            bitmap[id / 32] |= 1 << (id % 32);
        }
        for (dst, src) in req.req.async_event_fwd.iter_mut().zip(bitmap.iter()) {
            *dst = Le32::new(*src);
        }
        req.send()?;
        self.set_state(DevState::REGISTERED);
        Ok(())
    }

    pub(crate) fn drv_unrgtr(&self) -> Result<(), BnxtError> {
        self.clear_state(DevState::REGISTERED);
        let mut req = self.hwrm.req_init::<FuncDrvUnrgtrInput>()?;
        req.send_silent()?;
        Ok(())
    }

    /// Reads the function's current configuration: MTU, MAC address and reservations.
    pub(crate) fn func_qcfg(&self) -> Result<FuncQcfgOutput, BnxtError> {
        let mut req = self.hwrm.req_init::<FuncQcfgInput>()?;
        req.req.fid = Le16::new(0xffff);
        Ok(req.send()?)
    }

    fn func_qcfg_info(&self) -> Result<(), BnxtError> {
        let resp = self.func_qcfg()?;
        let mut info = self.info.lock();
        info.mtu = resp.mtu.get();
        if resp.mac_address != [0; 6] {
            info.mac = resp.mac_address;
        }
        Ok(())
    }

    /// Tells firmware the interface is going up or down. Returns the response flags.
    pub(crate) fn if_change(&self, up: bool) -> Result<u32, BnxtError> {
        let mut req = self.hwrm.req_init::<FuncDrvIfChangeInput>()?;
        req.req.flags = Le32::new(if up { FUNC_DRV_IF_CHANGE_REQ_FLAGS_UP } else { 0 });
        let resp = if up { req.send()? } else { req.send_silent()? };
        Ok(resp.flags.get())
    }

    /// Gives firmware the host memory it keeps QP, SRQ, CQ, VNIC and statistics contexts in.
    fn alloc_ctx_mem(&self) -> Result<(), BnxtError> {
        if !self.ctx_mem.lock().is_empty() {
            return Ok(());
        }
        let caps = {
            let mut req = self.hwrm.req_init::<FuncBackingStoreQcapsInput>()?;
            match req.send_silent() {
                Ok(resp) => resp,
                Err(HwrmError::FirmwareStatus(HWRM_ERR_CODE_CMD_NOT_SUPPORTED)) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        };

        let mut mems = Vec::with_capacity(BACKING_STORE_TYPES);
        let mut req = self.hwrm.req_init::<FuncBackingStoreCfgInput>()?;
        let mut enables = 0;
        for (i, cap) in caps.types.iter().enumerate() {
            let entries = cap.max_entries.get() as usize;
            let entry_size = cap.entry_size.get() as usize;
            if entries == 0 || entry_size == 0 {
                continue;
            }
            let init = if cap.init_offset == BACKING_STORE_NO_INIT_OFFSET {
                None
            } else {
                Some(InitPattern {
                    entry_size,
                    value: cap.init_value,
                    offset: Some(cap.init_offset as usize * 4),
                })
            };
            let nr_pages = (entries * entry_size + BNXT_PAGE_SIZE - 1) / BNXT_PAGE_SIZE;
            let mem = RingMem::new(&self.hal, nr_pages, false, init)?;
            let t = &mut req.req.types[i];
            t.num_entries = Le32::new(entries as u32);
            t.entry_size = Le16::new(entry_size as u16);
            t.pg_info = mem.depth();
            t.page_dir = Le64::new(mem.base_addr().value());
            enables |= 1 << i;
            mems.push(mem);
        }
        req.req.enables = Le32::new(enables);
        req.send()?;
        debug!("bnxt: configured {} backing store types", mems.len());
        *self.ctx_mem.lock() = mems;
        Ok(())
    }

    pub(crate) fn free_ctx_mem(&self) {
        self.ctx_mem.lock().clear();
    }
}
