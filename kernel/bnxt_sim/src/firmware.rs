//! The firmware model behind the HWRM mailbox.
//!
//! Requests are read out of the BAR0 window (or, for short commands, out of host memory),
//! handled synchronously when the trigger register is written, and answered by writing the
//! response into the host buffer named in the request header.

use std::collections::{BTreeMap, BTreeSet};
use core::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};
use bnxt_hsi::*;
use bnxt_hsi::hwrm::*;
use bnxt_hsi::event::*;
use crate::regs::*;
use crate::{SimConfig, State};

/// A ring as firmware knows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimRing {
    pub id:             u16,
    pub ring_type:      u8,
    pub logical_id:     u16,
    pub length:         u32,
    pub page_tbl_addr:  u64,
    pub page_tbl_depth: u8,
    pub cmpl_ring_id:   u16,
    pub rx_ring_id:     u16,
    pub nq_ring_id:     u16,
    pub stat_ctx_id:    u32,
    pub rx_buf_size:    u16,
    pub push_idx:       Option<u8>,
    pub cq_handle:      u64,
    pub flags:          u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimVnic {
    pub id:                 u32,
    pub default:            bool,
    pub dflt_ring_grp:      u16,
    pub default_rx_ring_id: u16,
    pub default_cmpl_ring_id: u16,
    pub rss_rule:           u16,
    pub mru:                u16,
    pub vlan_strip:         bool,
    pub tpa_flags:          u32,
    pub max_aggs:           u16,
    pub max_agg_segs:       u16,
    pub rss_hash_type:      u32,
    pub rss_table:          Vec<u16>,
    pub rss_key:            Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimL2Filter {
    pub id:         u64,
    pub addr:       [u8; 6],
    pub mask:       [u8; 6],
    pub vlan:       Option<u16>,
    pub dst_id:     u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimNtupleFilter {
    pub id:             u64,
    pub l2_filter_id:   u64,
    pub ip_protocol:    u8,
    pub dst_port:       u16,
    pub drop:           bool,
    pub dst_id:         u16,
}

/// The resources reserved for the function with `FUNC_CFG`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reservation {
    pub tx:     u16,
    pub rx:     u16,
    pub cmpl:   u16,
    pub stat:   u16,
    pub vnic:   u16,
    pub rss:    u16,
    pub grp:    u16,
    pub l2:     u16,
    pub msix:   u16,
}

pub(crate) struct Deferred {
    due:    u64,
    addr:   u64,
    bytes:  Vec<u8>,
}

pub(crate) struct Firmware {
    pub(crate) registered:      bool,
    pub(crate) if_up:           bool,
    pub(crate) hot_reset_done:  bool,
    pub(crate) resv:            Reservation,
    pub(crate) mtu:             u16,
    pub(crate) rings:           BTreeMap<u16, SimRing>,
    pub(crate) stat_ctxs:       BTreeMap<u32, u64>,
    pub(crate) ring_grps:       BTreeMap<u32, [u16; 4]>,
    pub(crate) vnics:           BTreeMap<u32, SimVnic>,
    pub(crate) rss_ctxs:        BTreeSet<u16>,
    pub(crate) l2_filters:      BTreeMap<u64, SimL2Filter>,
    pub(crate) ntuple_filters:  BTreeMap<u64, SimNtupleFilter>,
    pub(crate) rx_mask:         Option<(u32, Vec<[u8; 6]>)>,
    pub(crate) backing_store:   bool,
    pub(crate) dbr_completed:   Vec<u32>,
    pub(crate) echo_responses:  Vec<(u32, u32)>,
    pub(crate) aggint:          Vec<(u16, u16, u16, u16)>,
    pub(crate) reset_count:     u32,
    pub(crate) registered_vfs:  u16,
    pub(crate) rx_grant_limit:  Option<u16>,
    pub(crate) rss_grant_limit: Option<u16>,
    /// Injected failures: request type -> (status, remaining count).
    pub(crate) errors:          BTreeMap<u16, (u16, usize)>,
    pub(crate) dropped:         BTreeSet<u16>,
    pub(crate) deferred:        BTreeMap<u16, u64>,
    pub(crate) pending:         Vec<Deferred>,
    /// Async events waiting for the driver to allocate its async completion ring.
    pub(crate) pending_events:  Vec<(u16, u32, u32)>,
    pub(crate) log:             Vec<(u16, Vec<u8>)>,
    pub(crate) short_cmds:      usize,
    next_id:                    u32,
    next_push_idx:              u8,
    reset_after_response:       bool,
}

impl Firmware {
    pub(crate) fn new(_cfg: &SimConfig) -> Firmware {
        Firmware {
            registered:      false,
            if_up:           false,
            hot_reset_done:  false,
            resv:            Reservation::default(),
            mtu:             1500,
            rings:           BTreeMap::new(),
            stat_ctxs:       BTreeMap::new(),
            ring_grps:       BTreeMap::new(),
            vnics:           BTreeMap::new(),
            rss_ctxs:        BTreeSet::new(),
            l2_filters:      BTreeMap::new(),
            ntuple_filters:  BTreeMap::new(),
            rx_mask:         None,
            backing_store:   false,
            dbr_completed:   Vec::new(),
            echo_responses:  Vec::new(),
            aggint:          Vec::new(),
            reset_count:     0,
            registered_vfs:  0,
            rx_grant_limit:  None,
            rss_grant_limit: None,
            errors:          BTreeMap::new(),
            dropped:         BTreeSet::new(),
            deferred:        BTreeMap::new(),
            pending:         Vec::new(),
            pending_events:  Vec::new(),
            log:             Vec::new(),
            short_cmds:      0,
            next_id:         0x10,
            next_push_idx:   0,
            reset_after_response: false,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Drops every resource the function owns, as `FUNC_RESET` does.
    fn release_resources(&mut self) {
        self.rings.clear();
        self.stat_ctxs.clear();
        self.ring_grps.clear();
        self.vnics.clear();
        self.rss_ctxs.clear();
        self.l2_filters.clear();
        self.ntuple_filters.clear();
        self.rx_mask = None;
        self.resv = Reservation::default();
        self.next_push_idx = 0;
    }

    /// The state firmware comes back with after a chip reset.
    fn reboot(&mut self, hot_reset: bool) {
        self.release_resources();
        self.backing_store = false;
        self.registered = false;
        self.if_up = false;
        self.hot_reset_done = hot_reset;
        self.pending.clear();
        self.pending_events.clear();
        self.reset_count += 1;
    }
}

/// Reads a request layout out of `body`, zero-padding a short body.
pub(crate) fn parse<T: FromBytes + AsBytes>(body: &[u8]) -> T {
    let mut obj = T::new_zeroed();
    let len = body.len().min(size_of::<T>());
    obj.as_bytes_mut()[..len].copy_from_slice(&body[..len]);
    obj
}

fn response<T: AsBytes>(obj: &T) -> Result<Vec<u8>, u16> {
    Ok(obj.as_bytes().to_vec())
}

fn empty() -> Result<Vec<u8>, u16> {
    response(&HwrmEmptyOutput::new_zeroed())
}

/// Fills in the response header and the trailing valid byte.
fn finish(result: Result<Vec<u8>, u16>, req_type: u16, seq_id: u16) -> Vec<u8> {
    let (mut bytes, code) = match result {
        Ok(bytes) => (bytes, HWRM_ERR_CODE_SUCCESS),
        Err(code) => (HwrmEmptyOutput::new_zeroed().as_bytes().to_vec(), code),
    };
    let len = bytes.len();
    let hdr = HwrmOutputHeader {
        error_code: Le16::new(code),
        req_type:   Le16::new(req_type),
        seq_id:     Le16::new(seq_id),
        resp_len:   Le16::new(len as u16),
    };
    bytes[..size_of::<HwrmOutputHeader>()].copy_from_slice(hdr.as_bytes());
    bytes[len - 1] = HWRM_RESP_VALID_KEY;
    bytes
}

fn grant(requested: u16, max: u16, limit: Option<u16>) -> u16 {
    requested.min(max).min(limit.unwrap_or(u16::MAX))
}

impl State {
    /// Handles the request sitting in the mailbox. Returns its type and sequence id.
    pub(crate) fn hwrm_request(&mut self) -> Option<(u16, u16)> {
        let window = self.regs.window_bytes();
        let short: HwrmShortInput = parse(&window);
        let body = if short.signature.get() == HWRM_SHORT_REQ_SIGNATURE {
            let size = short.size.get() as usize;
            let addr = short.req_addr.get();
            if !self.bus_master || !self.mem.is_live(addr, size) {
                log::warn!("sim: short command at {:#x} is not readable", addr);
                return None;
            }
            let mut body = vec![0u8; size];
            self.mem.read(addr, &mut body);
            self.fw.short_cmds += 1;
            body
        } else {
            if self.cfg.short_cmd_required {
                log::warn!("sim: request sent without the required short command");
            }
            window
        };

        let hdr: HwrmInputHeader = parse(&body);
        let req_type = hdr.req_type.get();
        let seq_id = hdr.seq_id.get();
        self.fw.log.push((req_type, body.clone()));

        if self.regs.booting(self.clock_us) || self.fw.dropped.contains(&req_type) {
            log::debug!("sim: no response to req_type {:#x} seq {}", req_type, seq_id);
            return Some((req_type, seq_id));
        }

        let injected = match self.fw.errors.get_mut(&req_type) {
            Some((code, count)) if *count > 0 => {
                if *count != usize::MAX {
                    *count -= 1;
                }
                Some(*code)
            }
            _ => None,
        };
        let result = match injected {
            Some(code) => Err(code),
            None => self.handle(req_type, &body),
        };
        let bytes = finish(result, req_type, seq_id);

        let resp_addr = hdr.resp_addr.get();
        match self.fw.deferred.get(&req_type) {
            Some(delay) => {
                let due = self.clock_us + delay;
                self.fw.pending.push(Deferred { due, addr: resp_addr, bytes });
            }
            None => self.write_response(resp_addr, &bytes),
        }

        if core::mem::take(&mut self.fw.reset_after_response) {
            self.perform_reset();
        }
        Some((req_type, seq_id))
    }

    fn write_response(&mut self, addr: u64, bytes: &[u8]) {
        if self.bus_master && self.mem.is_live(addr, bytes.len()) {
            self.mem.write(addr, bytes);
        } else {
            log::debug!("sim: response to {:#x} dropped", addr);
        }
    }

    /// Writes every deferred response whose time has come.
    pub(crate) fn deliver_deferred(&mut self) {
        if self.fw.pending.is_empty() {
            return;
        }
        let now = self.clock_us;
        let (due, later): (Vec<_>, Vec<_>) = core::mem::take(&mut self.fw.pending)
            .into_iter()
            .partition(|d| d.due <= now);
        self.fw.pending = later;
        for d in due {
            self.write_response(d.addr, &d.bytes);
        }
    }

    /// Resets the chip: firmware forgets everything and boots for `fw_boot_us`.
    pub(crate) fn perform_reset(&mut self) {
        log::info!("sim: chip reset");
        let now = self.clock_us;
        self.regs.reset(now, self.cfg.fw_boot_us);
        self.fw.reboot(self.cfg.hot_reset);
        self.eng.reset();
        self.bus_master = false;
        self.pci_enabled = false;
    }

    fn handle(&mut self, req_type: u16, body: &[u8]) -> Result<Vec<u8>, u16> {
        match req_type {
            HWRM_VER_GET => self.ver_get(),
            HWRM_FUNC_RESET => {
                self.fw.release_resources();
                self.eng.reset();
                empty()
            }
            HWRM_FUNC_QCAPS => self.func_qcaps(),
            HWRM_FUNC_QCFG => self.func_qcfg(),
            HWRM_FUNC_CFG => self.func_cfg(parse(body)),
            HWRM_FUNC_VF_CFG => {
                let req: FuncVfCfgInput = parse(body);
                let cfg = FuncCfgInput {
                    hdr: req.hdr,
                    fid: Le16::new(0),
                    unused_0: [0; 2],
                    flags: Le32::new(0),
                    enables: req.enables,
                    mtu: req.mtu,
                    num_rsscos_ctxs: req.num_rsscos_ctxs,
                    num_cmpl_rings: req.num_cmpl_rings,
                    num_tx_rings: req.num_tx_rings,
                    num_rx_rings: req.num_rx_rings,
                    num_l2_ctxs: req.num_l2_ctxs,
                    num_vnics: req.num_vnics,
                    num_stat_ctxs: req.num_stat_ctxs,
                    num_hw_ring_grps: req.num_hw_ring_grps,
                    num_msix: Le16::new(0),
                };
                self.func_cfg(cfg)
            }
            HWRM_FUNC_RESOURCE_QCAPS => self.func_resource_qcaps(),
            HWRM_FUNC_DRV_RGTR => self.func_drv_rgtr(parse(body)),
            HWRM_FUNC_DRV_UNRGTR => {
                self.fw.registered = false;
                empty()
            }
            HWRM_FUNC_DRV_IF_CHANGE => self.func_drv_if_change(parse(body)),
            HWRM_FUNC_BACKING_STORE_QCAPS => self.backing_store_qcaps(),
            HWRM_FUNC_BACKING_STORE_CFG => self.backing_store_cfg(parse(body)),
            HWRM_FUNC_ECHO_RESPONSE => {
                let req: FuncEchoResponseInput = parse(body);
                self.fw.echo_responses.push((req.event_data1.get(), req.event_data2.get()));
                empty()
            }
            HWRM_FUNC_DBR_RECOVERY_COMPLETED => {
                let req: FuncDbrRecoveryCompletedInput = parse(body);
                self.fw.dbr_completed.push(req.epoch.get());
                empty()
            }
            HWRM_RING_ALLOC => self.ring_alloc(parse(body)),
            HWRM_RING_FREE => self.ring_free(parse(body)),
            HWRM_RING_RESET => self.ring_reset(parse(body)),
            HWRM_RING_CMPL_RING_CFG_AGGINT_PARAMS => {
                let req: RingCmplRingCfgAggintParamsInput = parse(body);
                if !self.fw.rings.contains_key(&req.ring_id.get()) {
                    return Err(HWRM_ERR_CODE_INVALID_PARAMS);
                }
                self.fw.aggint.push((
                    req.ring_id.get(),
                    req.int_lat_tmr_min.get(),
                    req.int_lat_tmr_max.get(),
                    req.num_cmpl_aggr_int.get(),
                ));
                empty()
            }
            HWRM_RING_GRP_ALLOC => {
                let req: RingGrpAllocInput = parse(body);
                let id = self.fw.alloc_id();
                self.fw.ring_grps.insert(id, [req.cr.get(), req.rr.get(), req.ar.get(), req.sc.get()]);
                let mut resp = RingGrpAllocOutput::new_zeroed();
                resp.ring_group_id = Le32::new(id);
                response(&resp)
            }
            HWRM_RING_GRP_FREE => {
                let req: RingGrpFreeInput = parse(body);
                match self.fw.ring_grps.remove(&req.ring_group_id.get()) {
                    Some(_) => empty(),
                    None => Err(HWRM_ERR_CODE_INVALID_PARAMS),
                }
            }
            HWRM_STAT_CTX_ALLOC => {
                let req: StatCtxAllocInput = parse(body);
                let id = self.fw.alloc_id();
                self.fw.stat_ctxs.insert(id, req.stats_dma_addr.get());
                let mut resp = StatCtxAllocOutput::new_zeroed();
                resp.stat_ctx_id = Le32::new(id);
                response(&resp)
            }
            HWRM_STAT_CTX_FREE => {
                let req: StatCtxFreeInput = parse(body);
                match self.fw.stat_ctxs.remove(&req.stat_ctx_id.get()) {
                    Some(_) => empty(),
                    None => Err(HWRM_ERR_CODE_INVALID_PARAMS),
                }
            }
            HWRM_VNIC_ALLOC => {
                let req: VnicAllocInput = parse(body);
                if self.fw.vnics.len() >= self.cfg.max_vnics as usize {
                    return Err(HWRM_ERR_CODE_RESOURCE_ALLOC_ERROR);
                }
                let id = self.fw.alloc_id();
                let vnic = SimVnic {
                    id,
                    default: req.flags.get() & VNIC_ALLOC_FLAGS_DEFAULT != 0,
                    ..SimVnic::default()
                };
                self.fw.vnics.insert(id, vnic);
                let mut resp = VnicAllocOutput::new_zeroed();
                resp.vnic_id = Le32::new(id);
                response(&resp)
            }
            HWRM_VNIC_FREE => {
                let req: VnicFreeInput = parse(body);
                let id = req.vnic_id.get();
                if self.fw.l2_filters.values().any(|f| u32::from(f.dst_id) == id) {
                    return Err(HWRM_ERR_CODE_RESOURCE_ACCESS_DENIED);
                }
                match self.fw.vnics.remove(&id) {
                    Some(_) => empty(),
                    None => Err(HWRM_ERR_CODE_INVALID_PARAMS),
                }
            }
            HWRM_VNIC_CFG => self.vnic_cfg(parse(body)),
            HWRM_VNIC_TPA_CFG => {
                let req: VnicTpaCfgInput = parse(body);
                let vnic = self.fw.vnics.get_mut(&u32::from(req.vnic_id.get())).ok_or(HWRM_ERR_CODE_INVALID_PARAMS)?;
                vnic.tpa_flags = req.flags.get();
                vnic.max_aggs = req.max_aggs.get();
                vnic.max_agg_segs = req.max_agg_segs.get();
                empty()
            }
            HWRM_VNIC_RSS_CFG => self.vnic_rss_cfg(parse(body)),
            HWRM_VNIC_RSS_COS_LB_CTX_ALLOC => {
                if self.fw.rss_ctxs.len() >= self.cfg.max_rsscos_ctxs as usize {
                    return Err(HWRM_ERR_CODE_RESOURCE_ALLOC_ERROR);
                }
                let id = self.fw.alloc_id() as u16;
                self.fw.rss_ctxs.insert(id);
                let mut resp = VnicRssCosLbCtxAllocOutput::new_zeroed();
                resp.rss_cos_lb_ctx_id = Le16::new(id);
                response(&resp)
            }
            HWRM_VNIC_RSS_COS_LB_CTX_FREE => {
                let req: VnicRssCosLbCtxFreeInput = parse(body);
                if self.fw.rss_ctxs.remove(&req.rss_cos_lb_ctx_id.get()) {
                    empty()
                } else {
                    Err(HWRM_ERR_CODE_INVALID_PARAMS)
                }
            }
            HWRM_CFA_L2_FILTER_ALLOC => self.l2_filter_alloc(parse(body)),
            HWRM_CFA_L2_FILTER_FREE => {
                let req: CfaL2FilterFreeInput = parse(body);
                let id = req.l2_filter_id.get();
                if self.fw.ntuple_filters.values().any(|f| f.l2_filter_id == id) {
                    return Err(HWRM_ERR_CODE_RESOURCE_ACCESS_DENIED);
                }
                match self.fw.l2_filters.remove(&id) {
                    Some(_) => empty(),
                    None => Err(HWRM_ERR_CODE_INVALID_PARAMS),
                }
            }
            HWRM_CFA_L2_SET_RX_MASK => {
                let req: CfaL2SetRxMaskInput = parse(body);
                if !self.fw.vnics.contains_key(&req.vnic_id.get()) {
                    return Err(HWRM_ERR_CODE_INVALID_PARAMS);
                }
                let count = req.num_mc_entries.get() as usize;
                let mut table = Vec::with_capacity(count);
                if count > 0 {
                    let addr = req.mc_tbl_addr.get();
                    if !self.mem.is_live(addr, count * 6) {
                        return Err(HWRM_ERR_CODE_INVALID_PARAMS);
                    }
                    for i in 0..count {
                        let mut mac = [0u8; 6];
                        self.mem.read(addr + (i * 6) as u64, &mut mac);
                        table.push(mac);
                    }
                }
                self.fw.rx_mask = Some((req.mask.get(), table));
                empty()
            }
            HWRM_CFA_NTUPLE_FILTER_ALLOC => {
                let req: CfaNtupleFilterAllocInput = parse(body);
                let l2_filter_id = req.l2_filter_id.get();
                if !self.fw.l2_filters.contains_key(&l2_filter_id) {
                    return Err(HWRM_ERR_CODE_INVALID_PARAMS);
                }
                let id = u64::from(self.fw.alloc_id());
                self.fw.ntuple_filters.insert(id, SimNtupleFilter {
                    id,
                    l2_filter_id,
                    ip_protocol: req.ip_protocol,
                    dst_port: u16::from_be_bytes(req.dst_port),
                    drop: req.flags.get() & CFA_NTUPLE_FILTER_ALLOC_FLAGS_DROP != 0,
                    dst_id: req.dst_id.get(),
                });
                let mut resp = CfaNtupleFilterAllocOutput::new_zeroed();
                resp.ntuple_filter_id = Le64::new(id);
                response(&resp)
            }
            HWRM_CFA_NTUPLE_FILTER_FREE => {
                let req: CfaNtupleFilterFreeInput = parse(body);
                match self.fw.ntuple_filters.remove(&req.ntuple_filter_id.get()) {
                    Some(_) => empty(),
                    None => Err(HWRM_ERR_CODE_INVALID_PARAMS),
                }
            }
            HWRM_FW_RESET => {
                let req: FwResetInput = parse(body);
                if req.embedded_proc_type != FW_RESET_EMBEDDED_PROC_TYPE_CHIP {
                    return Err(HWRM_ERR_CODE_INVALID_PARAMS);
                }
                self.fw.reset_after_response = true;
                let mut resp = FwResetOutput::new_zeroed();
                resp.selfrst_status = req.selfrst_status;
                response(&resp)
            }
            HWRM_ERROR_RECOVERY_QCFG => self.error_recovery_qcfg(),
            HWRM_DBG_READ_DIRECT => {
                let req: DbgReadDirectInput = parse(body);
                let words = req.read_len32.get() as usize;
                let dest = req.host_dest_addr.get();
                if !self.mem.is_live(dest, words * 4) {
                    return Err(HWRM_ERR_CODE_INVALID_PARAMS);
                }
                let base = req.read_addr.get();
                let now = self.clock_us;
                for i in 0..words {
                    let value = self.regs.grc_read(base + (i * 4) as u32, now);
                    self.mem.write(dest + (i * 4) as u64, &value.to_le_bytes());
                }
                response(&DbgReadDirectOutput::new_zeroed())
            }
            _ => Err(HWRM_ERR_CODE_CMD_NOT_SUPPORTED),
        }
    }

    fn ver_get(&mut self) -> Result<Vec<u8>, u16> {
        let cfg = &self.cfg;
        let mut resp = VerGetOutput::new_zeroed();
        resp.hwrm_intf_maj = HWRM_VERSION_MAJOR;
        resp.hwrm_intf_min = HWRM_VERSION_MINOR;
        resp.hwrm_intf_upd = HWRM_VERSION_UPDATE;
        resp.fw_maj = 228;
        resp.fw_min = 1;
        resp.fw_bld = 44;
        let mut caps = VER_GET_DEV_CAPS_CFG_SHORT_CMD_SUPPORTED;
        if cfg.short_cmd_required {
            caps |= VER_GET_DEV_CAPS_CFG_SHORT_CMD_REQUIRED;
        }
        resp.dev_caps_cfg = Le32::new(caps);
        resp.chip_num = Le16::new(cfg.chip_num);
        resp.max_req_win_len = Le16::new(cfg.max_req_win_len);
        resp.max_resp_len = Le16::new(HWRM_MAX_RESP_LEN as u16);
        resp.def_req_timeout = Le16::new(cfg.def_req_timeout_ms);
        resp.max_req_timeout = Le16::new(cfg.max_req_timeout_s);
        resp.max_ext_req_len = Le16::new(cfg.max_ext_req_len);
        response(&resp)
    }

    fn func_qcaps(&mut self) -> Result<Vec<u8>, u16> {
        let cfg = &self.cfg;
        let mut flags = 0;
        if cfg.push_mode {
            flags |= FUNC_QCAPS_FLAGS_PUSH_MODE_SUPPORTED;
        }
        if cfg.error_recovery {
            flags |= FUNC_QCAPS_FLAGS_ERROR_RECOVERY_CAPABLE;
        }
        if cfg.hot_reset {
            flags |= FUNC_QCAPS_FLAGS_HOT_RESET_CAPABLE;
        }
        if cfg.err_recover_reload {
            flags |= FUNC_QCAPS_FLAGS_ERR_RECOVER_RELOAD;
        }
        let mut flags_ext = 0;
        if cfg.ppp_push {
            flags_ext |= FUNC_QCAPS_FLAGS_EXT_PPP_PUSH_MODE_SUPPORTED;
        }
        if cfg.hw_dbr_drop_recov {
            flags_ext |= FUNC_QCAPS_FLAGS_EXT_HW_DBR_DROP_RECOV;
        }
        let mut resp = FuncQcapsOutput::new_zeroed();
        resp.fid = Le16::new(0);
        resp.flags = Le32::new(flags);
        resp.flags_ext = Le32::new(flags_ext);
        resp.mac_address = cfg.mac;
        resp.max_rsscos_ctx = Le16::new(cfg.max_rsscos_ctxs);
        resp.max_cmpl_rings = Le16::new(cfg.max_cp_rings);
        resp.max_tx_rings = Le16::new(cfg.max_tx_rings);
        resp.max_rx_rings = Le16::new(cfg.max_rx_rings);
        resp.max_l2_ctxs = Le16::new(cfg.max_l2_ctxs);
        resp.max_vnics = Le16::new(cfg.max_vnics);
        resp.max_stat_ctx = Le16::new(cfg.max_stat_ctxs);
        resp.max_hw_ring_grps = Le16::new(cfg.max_ring_grps);
        resp.max_nqs = Le16::new(cfg.max_nqs);
        resp.max_tpa_aggs = Le16::new(cfg.max_tpa_aggs);
        resp.max_vfs = Le16::new(cfg.max_vfs);
        response(&resp)
    }

    fn func_qcfg(&mut self) -> Result<Vec<u8>, u16> {
        let resv = self.fw.resv;
        let mut resp = FuncQcfgOutput::new_zeroed();
        resp.mac_address = self.cfg.mac;
        resp.alloc_rsscos_ctx = Le16::new(resv.rss);
        resp.alloc_cmpl_rings = Le16::new(resv.cmpl);
        resp.alloc_tx_rings = Le16::new(resv.tx);
        resp.alloc_rx_rings = Le16::new(resv.rx);
        resp.alloc_l2_ctx = Le16::new(resv.l2);
        resp.alloc_vnics = Le16::new(resv.vnic);
        resp.alloc_stat_ctx = Le16::new(resv.stat);
        resp.alloc_hw_ring_grps = Le16::new(resv.grp);
        resp.alloc_msix = Le16::new(resv.msix);
        resp.mtu = Le16::new(self.fw.mtu);
        resp.registered_vfs = Le16::new(self.fw.registered_vfs);
        response(&resp)
    }

    fn func_cfg(&mut self, req: FuncCfgInput) -> Result<Vec<u8>, u16> {
        let cfg = &self.cfg;
        let en = req.enables.get();
        let mut resv = self.fw.resv;
        if en & FUNC_CFG_ENABLES_MTU != 0 {
            let mtu = req.mtu.get();
            if !(68..=9600).contains(&mtu) {
                return Err(HWRM_ERR_CODE_INVALID_PARAMS);
            }
            self.fw.mtu = mtu;
        }
        if en & FUNC_CFG_ENABLES_NUM_TX_RINGS != 0 {
            resv.tx = grant(req.num_tx_rings.get(), cfg.max_tx_rings, None);
        }
        if en & FUNC_CFG_ENABLES_NUM_RX_RINGS != 0 {
            resv.rx = grant(req.num_rx_rings.get(), cfg.max_rx_rings, self.fw.rx_grant_limit);
        }
        if en & FUNC_CFG_ENABLES_NUM_CMPL_RINGS != 0 {
            resv.cmpl = grant(req.num_cmpl_rings.get(), cfg.max_cp_rings, None);
        }
        if en & FUNC_CFG_ENABLES_NUM_STAT_CTXS != 0 {
            resv.stat = grant(req.num_stat_ctxs.get(), cfg.max_stat_ctxs, None);
        }
        if en & FUNC_CFG_ENABLES_NUM_VNICS != 0 {
            resv.vnic = grant(req.num_vnics.get(), cfg.max_vnics, None);
        }
        if en & FUNC_CFG_ENABLES_NUM_RSSCOS_CTXS != 0 {
            resv.rss = grant(req.num_rsscos_ctxs.get(), cfg.max_rsscos_ctxs, self.fw.rss_grant_limit);
        }
        if en & FUNC_CFG_ENABLES_NUM_HW_RING_GRPS != 0 {
            resv.grp = grant(req.num_hw_ring_grps.get(), cfg.max_ring_grps, None);
        }
        if en & FUNC_CFG_ENABLES_NUM_L2_CTXS != 0 {
            resv.l2 = grant(req.num_l2_ctxs.get(), cfg.max_l2_ctxs, None);
        }
        if en & FUNC_CFG_ENABLES_NUM_MSIX != 0 {
            resv.msix = grant(req.num_msix.get(), cfg.max_msix, None);
        }
        self.fw.resv = resv;
        empty()
    }

    fn func_resource_qcaps(&mut self) -> Result<Vec<u8>, u16> {
        let cfg = &self.cfg;
        let mut resp = FuncResourceQcapsOutput::new_zeroed();
        resp.max_vfs = Le16::new(cfg.max_vfs);
        resp.max_msix = Le16::new(cfg.max_msix);
        resp.min_cmpl_rings = Le16::new(1);
        resp.max_rsscos_ctx = Le16::new(cfg.max_rsscos_ctxs);
        resp.max_cmpl_rings = Le16::new(cfg.max_cp_rings);
        resp.max_tx_rings = Le16::new(cfg.max_tx_rings);
        resp.max_rx_rings = Le16::new(cfg.max_rx_rings);
        resp.max_l2_ctxs = Le16::new(cfg.max_l2_ctxs);
        resp.max_vnics = Le16::new(cfg.max_vnics);
        resp.max_stat_ctx = Le16::new(cfg.max_stat_ctxs);
        resp.max_hw_ring_grps = Le16::new(cfg.max_ring_grps);
        resp.max_nqs = Le16::new(cfg.max_nqs);
        resp.min_tx_rings = Le16::new(1);
        resp.min_rx_rings = Le16::new(1);
        resp.min_stat_ctx = Le16::new(1);
        response(&resp)
    }

    fn func_drv_rgtr(&mut self, req: FuncDrvRgtrInput) -> Result<Vec<u8>, u16> {
        self.fw.registered = true;
        let wants_recovery = req.flags.get() & FUNC_DRV_RGTR_FLAGS_ERROR_RECOVERY_SUPPORT != 0;
        let id = AsyncEventId::ErrorRecovery as u16;
        let forwarded = req.async_event_fwd[id as usize / 32].get() & (1 << (id % 32)) != 0;
        if self.cfg.error_recovery && wants_recovery && forwarded {
            let data1 = ERROR_RECOVERY_DATA1_MASTER_FUNC | ERROR_RECOVERY_DATA1_RECOVERY_ENABLED;
            self.fw.pending_events.push((id, data1, 0));
        }
        response(&FuncDrvRgtrOutput::new_zeroed())
    }

    fn func_drv_if_change(&mut self, req: FuncDrvIfChangeInput) -> Result<Vec<u8>, u16> {
        let mut resp = FuncDrvIfChangeOutput::new_zeroed();
        if req.flags.get() & FUNC_DRV_IF_CHANGE_REQ_FLAGS_UP != 0 {
            self.fw.if_up = true;
            if core::mem::take(&mut self.fw.hot_reset_done) {
                resp.flags = Le32::new(
                    FUNC_DRV_IF_CHANGE_RESP_FLAGS_HOT_FW_RESET_DONE | FUNC_DRV_IF_CHANGE_RESP_FLAGS_RESC_CHANGE
                );
            }
        } else {
            self.fw.if_up = false;
        }
        response(&resp)
    }

    fn backing_store_qcaps(&mut self) -> Result<Vec<u8>, u16> {
        if !self.cfg.chip().is_p5_plus() {
            return Err(HWRM_ERR_CODE_CMD_NOT_SUPPORTED);
        }
        let mut resp = FuncBackingStoreQcapsOutput::new_zeroed();
        // (max entries, entry size, init value, init offset in dwords)
        let caps: [(u32, u16, u8, u8); BACKING_STORE_TYPES] = [
            (256, 64, 0, BACKING_STORE_NO_INIT_OFFSET),
            (256, 64, 0, BACKING_STORE_NO_INIT_OFFSET),
            (512, 64, 0xff, 1),
            (64, 256, 0xa5, 0),
            (64, 32, 0, BACKING_STORE_NO_INIT_OFFSET),
        ];
        for (t, (entries, size, value, offset)) in resp.types.iter_mut().zip(caps.iter()) {
            t.max_entries = Le32::new(*entries);
            t.entry_size = Le16::new(*size);
            t.init_value = *value;
            t.init_offset = *offset;
        }
        response(&resp)
    }

    /// Checks that every entry of every configured backing store type carries its init pattern.
    fn backing_store_cfg(&mut self, req: FuncBackingStoreCfgInput) -> Result<Vec<u8>, u16> {
        let caps: FuncBackingStoreQcapsOutput = match self.backing_store_qcaps() {
            Ok(bytes) => parse(&bytes),
            Err(e) => return Err(e),
        };
        let enables = req.enables.get();
        for (i, t) in req.types.iter().enumerate() {
            if enables & (1 << i) == 0 {
                continue;
            }
            let cap = &caps.types[i];
            let entries = t.num_entries.get() as usize;
            let entry_size = t.entry_size.get() as usize;
            if entries == 0 || entries > cap.max_entries.get() as usize || entry_size != cap.entry_size.get() as usize {
                return Err(HWRM_ERR_CODE_INVALID_PARAMS);
            }
            if cap.init_offset == BACKING_STORE_NO_INIT_OFFSET {
                continue;
            }
            let depth = t.pg_info & 0xf;
            let base = t.page_dir.get();
            let init_byte = cap.init_offset as usize * 4;
            for e in 0..entries {
                let offset = e * entry_size + init_byte;
                let addr = self.resolve(base, depth, offset).ok_or(HWRM_ERR_CODE_INVALID_PARAMS)?;
                let mut b = [0u8; 1];
                self.mem.read(addr, &mut b);
                if b[0] != cap.init_value {
                    log::warn!("sim: backing store type {} entry {} not initialized", i, e);
                    return Err(HWRM_ERR_CODE_INVALID_PARAMS);
                }
            }
        }
        self.fw.backing_store = true;
        empty()
    }

    /// Translates a byte offset within a ring or context region to a bus address,
    /// walking `depth` levels of page tables.
    pub(crate) fn resolve(&self, base: u64, depth: u8, offset: usize) -> Option<u64> {
        let page = (offset / BNXT_PAGE_SIZE) as u64;
        let within = (offset % BNXT_PAGE_SIZE) as u64;
        let page_addr = match depth {
            0 => return Some(base + offset as u64),
            1 => self.pte(base, page)?,
            _ => {
                let per_table = MAX_CTX_PAGES as u64;
                let table = self.pte(base, page / per_table)?;
                self.pte(table, page % per_table)?
            }
        };
        Some(page_addr + within)
    }

    fn pte(&self, table: u64, index: u64) -> Option<u64> {
        let addr = table + index * 8;
        if !self.mem.is_live(addr, 8) {
            return None;
        }
        let entry = self.mem.read_u64(addr);
        if entry & PTU_PTE_VALID == 0 {
            return None;
        }
        Some(entry & !(BNXT_PAGE_SIZE as u64 - 1))
    }

    fn ring_alloc(&mut self, req: RingAllocInput) -> Result<Vec<u8>, u16> {
        let chip = self.cfg.chip();
        let ring_type = req.ring_type;
        let length = req.length.get();
        if length == 0 || !length.is_power_of_two() {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        let en = req.enables.get();
        let count = |t: u8| self.fw.rings.values().filter(|r| r.ring_type == t).count();
        let (limit, refs_ok) = match ring_type {
            RING_TYPE_NQ if chip.is_p5_plus() => (self.cfg.max_nqs as usize, true),
            RING_TYPE_L2_CMPL => {
                let nq_ok = !chip.is_p5_plus() || (en & RING_ALLOC_ENABLES_NQ_RING_ID_VALID != 0
                    && self.is_ring(req.nq_ring_id.get(), RING_TYPE_NQ));
                (self.cfg.max_cp_rings as usize, nq_ok)
            }
            RING_TYPE_TX => (self.cfg.max_tx_rings as usize, self.is_ring(req.cmpl_ring_id.get(), RING_TYPE_L2_CMPL)),
            RING_TYPE_RX => (self.cfg.max_rx_rings as usize, self.is_ring(req.cmpl_ring_id.get(), RING_TYPE_L2_CMPL)),
            RING_TYPE_RX_AGG => {
                let rx_ok = en & RING_ALLOC_ENABLES_RX_RING_ID_VALID != 0
                    && self.is_ring(req.rx_ring_id.get(), RING_TYPE_RX);
                (self.cfg.max_rx_rings as usize, rx_ok)
            }
            _ => return Err(HWRM_ERR_CODE_INVALID_PARAMS),
        };
        if !refs_ok {
            log::warn!("sim: RING_ALLOC type {} references a missing ring", ring_type);
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        if count(ring_type) >= limit {
            return Err(HWRM_ERR_CODE_RESOURCE_ALLOC_ERROR);
        }
        if en & RING_ALLOC_ENABLES_STAT_CTX_ID_VALID != 0 && !self.fw.stat_ctxs.contains_key(&req.stat_ctx_id.get()) {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }

        let flags = req.flags.get();
        let push_idx = if ring_type == RING_TYPE_TX && flags & RING_ALLOC_FLAGS_TX_PUSH_MODE != 0
            && chip.is_p7() && (self.cfg.push_mode || self.cfg.ppp_push)
        {
            let idx = self.fw.next_push_idx;
            self.fw.next_push_idx += 1;
            Some(idx)
        } else {
            None
        };

        let id = self.fw.alloc_id() as u16;
        let ring = SimRing {
            id,
            ring_type,
            logical_id:     req.logical_id.get(),
            length,
            page_tbl_addr:  req.page_tbl_addr.get(),
            page_tbl_depth: req.page_tbl_depth,
            cmpl_ring_id:   req.cmpl_ring_id.get(),
            rx_ring_id:     req.rx_ring_id.get(),
            nq_ring_id:     req.nq_ring_id.get(),
            stat_ctx_id:    req.stat_ctx_id.get(),
            rx_buf_size:    req.rx_buf_size.get(),
            push_idx,
            cq_handle:      req.cq_handle.get(),
            flags,
        };
        let stats = self.fw.stat_ctxs.get(&ring.stat_ctx_id).copied();
        self.eng.add_ring(&ring, stats);
        self.fw.rings.insert(id, ring);

        let is_async = match ring_type {
            RING_TYPE_NQ => true,
            RING_TYPE_L2_CMPL => !chip.is_p5_plus(),
            _ => false,
        };
        if is_async && self.eng.async_ring.is_none() {
            self.eng.async_ring = Some(id);
            for (event, d1, d2) in core::mem::take(&mut self.fw.pending_events) {
                self.post_async_event(event, d1, d2);
            }
        }

        let mut resp = RingAllocOutput::new_zeroed();
        resp.ring_id = Le16::new(id);
        resp.logical_ring_id = req.logical_id;
        resp.push_buffer_index = push_idx.unwrap_or(RING_ALLOC_NO_PUSH_BUFFER);
        response(&resp)
    }

    fn is_ring(&self, id: u16, ring_type: u8) -> bool {
        self.fw.rings.get(&id).map_or(false, |r| r.ring_type == ring_type)
    }

    fn ring_free(&mut self, req: RingFreeInput) -> Result<Vec<u8>, u16> {
        let id = req.ring_id.get();
        if !self.is_ring(id, req.ring_type) {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        let referenced = self.fw.rings.values().any(|r| {
            r.id != id && match req.ring_type {
                RING_TYPE_NQ => r.ring_type == RING_TYPE_L2_CMPL && r.nq_ring_id == id,
                RING_TYPE_L2_CMPL => (r.ring_type == RING_TYPE_TX || r.ring_type == RING_TYPE_RX) && r.cmpl_ring_id == id,
                RING_TYPE_RX => r.ring_type == RING_TYPE_RX_AGG && r.rx_ring_id == id,
                _ => false,
            }
        });
        if referenced {
            log::warn!("sim: RING_FREE of ring {} that other rings still use", id);
            return Err(HWRM_ERR_CODE_RESOURCE_ACCESS_DENIED);
        }
        self.fw.rings.remove(&id);
        self.eng.remove_ring(id);
        empty()
    }

    fn ring_reset(&mut self, req: RingResetInput) -> Result<Vec<u8>, u16> {
        let id = req.ring_id.get();
        if !self.cfg.chip().is_p5_plus() || req.ring_type != RING_TYPE_RX || !self.is_ring(id, RING_TYPE_RX) {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        let aggs: Vec<u16> = self.fw.rings.values()
            .filter(|r| r.ring_type == RING_TYPE_RX_AGG && r.rx_ring_id == id)
            .map(|r| r.id)
            .collect();
        self.eng.reset_ring(id);
        for agg in aggs {
            self.eng.reset_ring(agg);
        }
        empty()
    }

    fn vnic_cfg(&mut self, req: VnicCfgInput) -> Result<Vec<u8>, u16> {
        let en = req.enables.get();
        let id = u32::from(req.vnic_id.get());
        let chip = self.cfg.chip();
        if en & VNIC_CFG_ENABLES_DEFAULT_RX_RING_ID != 0 && !self.is_ring(req.default_rx_ring_id.get(), RING_TYPE_RX) {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        if en & VNIC_CFG_ENABLES_DFLT_RING_GRP != 0 && !chip.is_p5_plus()
            && !self.fw.ring_grps.contains_key(&u32::from(req.dflt_ring_grp.get()))
        {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        let vnic = self.fw.vnics.get_mut(&id).ok_or(HWRM_ERR_CODE_INVALID_PARAMS)?;
        if en & VNIC_CFG_ENABLES_DFLT_RING_GRP != 0 {
            vnic.dflt_ring_grp = req.dflt_ring_grp.get();
        }
        if en & VNIC_CFG_ENABLES_DEFAULT_RX_RING_ID != 0 {
            vnic.default_rx_ring_id = req.default_rx_ring_id.get();
        }
        if en & VNIC_CFG_ENABLES_DEFAULT_CMPL_RING_ID != 0 {
            vnic.default_cmpl_ring_id = req.default_cmpl_ring_id.get();
        }
        if en & VNIC_CFG_ENABLES_RSS_RULE != 0 {
            vnic.rss_rule = req.rss_rule.get();
        }
        if en & VNIC_CFG_ENABLES_MRU != 0 {
            vnic.mru = req.mru.get();
        }
        vnic.vlan_strip = req.flags.get() & VNIC_CFG_FLAGS_VLAN_STRIP_MODE != 0;
        empty()
    }

    fn vnic_rss_cfg(&mut self, req: VnicRssCfgInput) -> Result<Vec<u8>, u16> {
        const TABLE_ENTRIES: usize = 128;
        const KEY_LEN: usize = 40;
        let id = u32::from(req.vnic_id.get());
        if !self.fw.vnics.contains_key(&id) {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        let mut table = Vec::new();
        let tbl_addr = req.ring_grp_tbl_addr.get();
        if tbl_addr != 0 {
            if !self.mem.is_live(tbl_addr, TABLE_ENTRIES * 2) {
                return Err(HWRM_ERR_CODE_INVALID_PARAMS);
            }
            let mut raw = vec![0u8; TABLE_ENTRIES * 2];
            self.mem.read(tbl_addr, &mut raw);
            table = raw.chunks(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        }
        let mut key = Vec::new();
        let key_addr = req.hash_key_tbl_addr.get();
        if key_addr != 0 {
            if !self.mem.is_live(key_addr, KEY_LEN) {
                return Err(HWRM_ERR_CODE_INVALID_PARAMS);
            }
            key = vec![0u8; KEY_LEN];
            self.mem.read(key_addr, &mut key);
        }
        let vnic = self.fw.vnics.get_mut(&id).ok_or(HWRM_ERR_CODE_INVALID_PARAMS)?;
        vnic.rss_hash_type = req.hash_type.get();
        vnic.rss_table = table;
        vnic.rss_key = key;
        empty()
    }

    fn l2_filter_alloc(&mut self, req: CfaL2FilterAllocInput) -> Result<Vec<u8>, u16> {
        let en = req.enables.get();
        let dst_id = req.dst_id.get();
        if en & CFA_L2_FILTER_ALLOC_ENABLES_DST_ID == 0 || !self.fw.vnics.contains_key(&u32::from(dst_id)) {
            return Err(HWRM_ERR_CODE_INVALID_PARAMS);
        }
        if self.fw.l2_filters.len() >= self.cfg.max_l2_ctxs as usize {
            return Err(HWRM_ERR_CODE_RESOURCE_ALLOC_ERROR);
        }
        let id = u64::from(self.fw.alloc_id());
        let vlan = if en & CFA_L2_FILTER_ALLOC_ENABLES_L2_OVLAN != 0 {
            Some(req.l2_ovlan.get())
        } else {
            None
        };
        self.fw.l2_filters.insert(id, SimL2Filter {
            id,
            addr: req.l2_addr,
            mask: req.l2_addr_mask,
            vlan,
            dst_id,
        });
        let mut resp = CfaL2FilterAllocOutput::new_zeroed();
        resp.l2_filter_id = Le64::new(id);
        response(&resp)
    }

    fn error_recovery_qcfg(&mut self) -> Result<Vec<u8>, u16> {
        if !self.cfg.error_recovery {
            return Err(HWRM_ERR_CODE_CMD_NOT_SUPPORTED);
        }
        let grc = |addr: u32| Le32::new(addr | FW_HEALTH_REG_TYPE_GRC);
        let mut resp = ErrorRecoveryQcfgOutput::new_zeroed();
        resp.flags = Le32::new(if self.cfg.co_cpu_recovery {
            ERROR_RECOVERY_QCFG_FLAGS_CO_CPU
        } else {
            ERROR_RECOVERY_QCFG_FLAGS_HOST
        });
        resp.driver_polling_freq = Le32::new(self.cfg.polling_freq_ms);
        resp.master_func_wait_period = Le32::new(200);
        resp.normal_func_wait_period = Le32::new(300);
        resp.master_func_wait_period_after_reset = Le32::new(400);
        resp.max_bailout_time_after_reset = Le32::new(5000);
        resp.fw_health_status_reg = grc(GRC_FW_STATUS);
        resp.fw_heartbeat_reg = grc(GRC_FW_HEARTBEAT);
        resp.fw_reset_cnt_reg = grc(GRC_FW_RESET_CNT);
        resp.reset_inprogress_reg = grc(GRC_FW_RESET_INPROG);
        resp.reset_inprogress_reg_mask = Le32::new(1);
        resp.reg_array_cnt = 2;
        resp.reset_reg[0] = grc(GRC_RESET_ARM);
        resp.reset_reg_val[0] = Le32::new(1);
        resp.delay_after_reset[0] = 0;
        resp.reset_reg[1] = grc(GRC_RESET_GO);
        resp.reset_reg_val[1] = Le32::new(RESET_GO_KEY);
        resp.delay_after_reset[1] = 10;
        response(&resp)
    }
}
