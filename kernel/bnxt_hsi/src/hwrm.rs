//! HWRM (Host-Resident Management) firmware command messages.
//!
//! Every request starts with an [`HwrmInputHeader`] and every response starts with an
//! [`HwrmOutputHeader`] and ends with a `valid` byte, which firmware writes last.
//! Each request type implements [`HwrmMessage`], which ties it to its request type code
//! and its response layout.

use zerocopy::{AsBytes, FromBytes, FromZeroes};
use crate::{Le16, Le32, Le64};

/// A firmware command request. The request layout must begin with an [`HwrmInputHeader`].
pub trait HwrmMessage: AsBytes + FromBytes + Copy {
    /// The request type code written into the header.
    const REQ_TYPE: u16;
    /// The layout of the response; it must begin with an [`HwrmOutputHeader`].
    type Response: AsBytes + FromBytes + Copy;
}

macro_rules! hwrm_message {
    ($input:ty => $output:ty, $req_type:expr) => {
        impl HwrmMessage for $input {
            const REQ_TYPE: u16 = $req_type;
            type Response = $output;
        }
    };
}

pub const HWRM_VER_GET:                         u16 = 0x0000;
pub const HWRM_FUNC_VF_CFG:                     u16 = 0x000f;
pub const HWRM_FUNC_RESET:                      u16 = 0x0011;
pub const HWRM_FUNC_QCAPS:                      u16 = 0x0015;
pub const HWRM_FUNC_QCFG:                       u16 = 0x0016;
pub const HWRM_FUNC_CFG:                        u16 = 0x0017;
pub const HWRM_FUNC_DRV_UNRGTR:                 u16 = 0x001a;
pub const HWRM_FUNC_DRV_RGTR:                   u16 = 0x001d;
pub const HWRM_VNIC_ALLOC:                      u16 = 0x0040;
pub const HWRM_VNIC_FREE:                       u16 = 0x0041;
pub const HWRM_VNIC_CFG:                        u16 = 0x0042;
pub const HWRM_VNIC_TPA_CFG:                    u16 = 0x0044;
pub const HWRM_VNIC_RSS_CFG:                    u16 = 0x0046;
pub const HWRM_RING_ALLOC:                      u16 = 0x0050;
pub const HWRM_RING_FREE:                       u16 = 0x0051;
pub const HWRM_RING_CMPL_RING_CFG_AGGINT_PARAMS: u16 = 0x0053;
pub const HWRM_RING_RESET:                      u16 = 0x005e;
pub const HWRM_RING_GRP_ALLOC:                  u16 = 0x0060;
pub const HWRM_RING_GRP_FREE:                   u16 = 0x0061;
pub const HWRM_VNIC_RSS_COS_LB_CTX_ALLOC:       u16 = 0x0070;
pub const HWRM_VNIC_RSS_COS_LB_CTX_FREE:        u16 = 0x0071;
pub const HWRM_CFA_L2_FILTER_ALLOC:             u16 = 0x0090;
pub const HWRM_CFA_L2_FILTER_FREE:              u16 = 0x0091;
pub const HWRM_CFA_L2_SET_RX_MASK:              u16 = 0x0093;
pub const HWRM_CFA_NTUPLE_FILTER_ALLOC:         u16 = 0x0099;
pub const HWRM_CFA_NTUPLE_FILTER_FREE:          u16 = 0x009a;
pub const HWRM_STAT_CTX_ALLOC:                  u16 = 0x00b0;
pub const HWRM_STAT_CTX_FREE:                   u16 = 0x00b1;
pub const HWRM_FW_RESET:                        u16 = 0x00c0;
pub const HWRM_FUNC_DRV_IF_CHANGE:              u16 = 0x00d3;
pub const HWRM_ERROR_RECOVERY_QCFG:             u16 = 0x010c;
pub const HWRM_FUNC_ECHO_RESPONSE:              u16 = 0x010d;
pub const HWRM_FUNC_RESOURCE_QCAPS:             u16 = 0x0190;
pub const HWRM_FUNC_BACKING_STORE_CFG:          u16 = 0x0192;
pub const HWRM_FUNC_BACKING_STORE_QCAPS:        u16 = 0x0193;
pub const HWRM_FUNC_DBR_RECOVERY_COMPLETED:     u16 = 0x01ba;
pub const HWRM_DBG_READ_DIRECT:                 u16 = 0xff10;

/// The completion ring id meaning "do not post an HWRM-done completion".
pub const INVALID_HW_RING_ID:                   u16 = 0xffff;
/// The target id addressing the firmware function of the requester itself.
pub const HWRM_TARGET_ID_SELF:                  u16 = 0xffff;
/// The value firmware writes into the last byte of a response once it is complete.
pub const HWRM_RESP_VALID_KEY:                  u8 = 1;
/// The signature of a short command request.
pub const HWRM_SHORT_REQ_SIGNATURE:             u16 = 0x4321;

/// The size of the BAR0 request window before `VER_GET` reports the real one.
pub const HWRM_MAX_REQ_LEN:                     usize = 128;
pub const HWRM_MAX_RESP_LEN:                    usize = 280;
/// The BAR0 offset of the request window of the primary (ChiMP) firmware channel.
pub const GRCPF_REG_CHIMP_COMM:                 usize = 0x0;
/// The BAR0 offset of the register that tells firmware a request is ready.
pub const GRCPF_REG_CHIMP_COMM_TRIGGER:         usize = 0x100;
/// The BAR0 register that maps a 4KiB GRC window; window `n` maps through offset `4 * (n - 1)`.
pub const GRCPF_REG_WINDOW_BASE_OUT:            usize = 0x400;
/// The BAR0 offset of the GRC window used to access health registers.
pub const FW_HEALTH_WIN_BASE:                   usize = 0x3000;
pub const FW_HEALTH_WIN_MAP_OFF:                usize = 8;
/// The BAR0 offset of the GRC window used to write reset registers.
pub const FW_RESET_WIN_BASE:                    usize = 0x2000;
pub const FW_RESET_WIN_MAP_OFF:                 usize = 4;
/// The part of a GRC address selecting its 4KiB window.
pub const GRC_BASE_MASK:                        u32 = 0xffff_f000;
pub const GRC_OFFSET_MASK:                      u32 = 0x0000_0ffc;

pub const HWRM_ERR_CODE_SUCCESS:                u16 = 0x0;
pub const HWRM_ERR_CODE_FAIL:                   u16 = 0x1;
pub const HWRM_ERR_CODE_INVALID_PARAMS:         u16 = 0x2;
pub const HWRM_ERR_CODE_RESOURCE_ACCESS_DENIED: u16 = 0x3;
pub const HWRM_ERR_CODE_RESOURCE_ALLOC_ERROR:   u16 = 0x4;
pub const HWRM_ERR_CODE_INVALID_FLAGS:          u16 = 0x5;
pub const HWRM_ERR_CODE_INVALID_ENABLES:        u16 = 0x6;
pub const HWRM_ERR_CODE_NO_BUFFER:              u16 = 0x8;
pub const HWRM_ERR_CODE_HOT_RESET_PROGRESS:     u16 = 0xa;
pub const HWRM_ERR_CODE_BUSY:                   u16 = 0x10;
pub const HWRM_ERR_CODE_CMD_NOT_SUPPORTED:      u16 = 0xffff;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct HwrmInputHeader {
    pub req_type:           Le16,
    pub cmpl_ring:          Le16,
    pub seq_id:             Le16,
    pub target_id:          Le16,
    pub resp_addr:          Le64,
}

const_assert_eq!(core::mem::size_of::<HwrmInputHeader>(), 16);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct HwrmOutputHeader {
    pub error_code:         Le16,
    pub req_type:           Le16,
    pub seq_id:             Le16,
    pub resp_len:           Le16,
}

const_assert_eq!(core::mem::size_of::<HwrmOutputHeader>(), 8);

/// The response of every request that returns nothing beyond its status.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct HwrmEmptyOutput {
    pub hdr:                HwrmOutputHeader,
    pub unused_0:           [u8; 7],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<HwrmEmptyOutput>(), 16);

/// The indirection written into the request window when the full request lives in host memory.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct HwrmShortInput {
    pub req_type:           Le16,
    pub signature:          Le16,
    pub target_id:          Le16,
    pub size:               Le16,
    pub req_addr:           Le64,
}

const_assert_eq!(core::mem::size_of::<HwrmShortInput>(), 16);


/* ---------------------------------------- VER_GET ---------------------------------------- */

pub const HWRM_VERSION_MAJOR:   u8 = 1;
pub const HWRM_VERSION_MINOR:   u8 = 10;
pub const HWRM_VERSION_UPDATE:  u8 = 3;

pub const VER_GET_DEV_CAPS_CFG_SHORT_CMD_SUPPORTED: u32 = 1 << 2;
pub const VER_GET_DEV_CAPS_CFG_SHORT_CMD_REQUIRED:  u32 = 1 << 3;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VerGetInput {
    pub hdr:                HwrmInputHeader,
    pub hwrm_intf_maj:      u8,
    pub hwrm_intf_min:      u8,
    pub hwrm_intf_upd:      u8,
    pub unused_0:           [u8; 5],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VerGetOutput {
    pub hdr:                HwrmOutputHeader,
    pub hwrm_intf_maj:      u8,
    pub hwrm_intf_min:      u8,
    pub hwrm_intf_upd:      u8,
    pub hwrm_intf_rsvd:     u8,
    pub fw_maj:             u8,
    pub fw_min:             u8,
    pub fw_bld:             u8,
    pub fw_rsvd:            u8,
    pub dev_caps_cfg:       Le32,
    pub chip_num:           Le16,
    pub chip_rev:           u8,
    pub chip_metal:         u8,
    pub max_req_win_len:    Le16,
    pub max_resp_len:       Le16,
    /// The default request timeout, in milliseconds.
    pub def_req_timeout:    Le16,
    /// The maximum request timeout, in seconds.
    pub max_req_timeout:    Le16,
    pub max_ext_req_len:    Le16,
    pub unused_0:           [u8; 5],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<VerGetInput>(), 24);
const_assert_eq!(core::mem::size_of::<VerGetOutput>(), 40);
hwrm_message!(VerGetInput => VerGetOutput, HWRM_VER_GET);


/* ---------------------------------------- FUNC_* ---------------------------------------- */

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncResetInput {
    pub hdr:                HwrmInputHeader,
    pub enables:            Le32,
    pub vf_id:              Le16,
    pub func_reset_level:   u8,
    pub unused_0:           u8,
}

const_assert_eq!(core::mem::size_of::<FuncResetInput>(), 24);
hwrm_message!(FuncResetInput => HwrmEmptyOutput, HWRM_FUNC_RESET);

pub const FUNC_QCAPS_FLAGS_PUSH_MODE_SUPPORTED:         u32 = 1 << 1;
pub const FUNC_QCAPS_FLAGS_ERROR_RECOVERY_CAPABLE:      u32 = 1 << 18;
pub const FUNC_QCAPS_FLAGS_HOT_RESET_CAPABLE:           u32 = 1 << 15;
pub const FUNC_QCAPS_FLAGS_ERR_RECOVER_RELOAD:          u32 = 1 << 19;
pub const FUNC_QCAPS_FLAGS_EXT_PPP_PUSH_MODE_SUPPORTED: u32 = 1 << 2;
pub const FUNC_QCAPS_FLAGS_EXT_DBR_PACING_SUPPORTED:    u32 = 1 << 3;
pub const FUNC_QCAPS_FLAGS_EXT_HW_DBR_DROP_RECOV:       u32 = 1 << 4;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncQcapsInput {
    pub hdr:                HwrmInputHeader,
    pub fid:                Le16,
    pub unused_0:           [u8; 6],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncQcapsOutput {
    pub hdr:                HwrmOutputHeader,
    pub fid:                Le16,
    pub port_id:            Le16,
    pub flags:              Le32,
    pub flags_ext:          Le32,
    pub mac_address:        [u8; 6],
    pub max_rsscos_ctx:     Le16,
    pub max_cmpl_rings:     Le16,
    pub max_tx_rings:       Le16,
    pub max_rx_rings:       Le16,
    pub max_l2_ctxs:        Le16,
    pub max_vnics:          Le16,
    pub max_stat_ctx:       Le16,
    pub max_hw_ring_grps:   Le16,
    pub max_nqs:            Le16,
    pub max_tpa_aggs:       Le16,
    pub max_vfs:            Le16,
    pub unused_0:           [u8; 7],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<FuncQcapsInput>(), 24);
const_assert_eq!(core::mem::size_of::<FuncQcapsOutput>(), 56);
hwrm_message!(FuncQcapsInput => FuncQcapsOutput, HWRM_FUNC_QCAPS);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncQcfgInput {
    pub hdr:                HwrmInputHeader,
    pub fid:                Le16,
    pub unused_0:           [u8; 6],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncQcfgOutput {
    pub hdr:                HwrmOutputHeader,
    pub fid:                Le16,
    pub port_id:            Le16,
    pub vlan:               Le16,
    pub flags:              Le16,
    pub mac_address:        [u8; 6],
    pub alloc_rsscos_ctx:   Le16,
    pub alloc_cmpl_rings:   Le16,
    pub alloc_tx_rings:     Le16,
    pub alloc_rx_rings:     Le16,
    pub alloc_l2_ctx:       Le16,
    pub alloc_vnics:        Le16,
    pub alloc_stat_ctx:     Le16,
    pub alloc_hw_ring_grps: Le16,
    pub alloc_msix:         Le16,
    pub mtu:                Le16,
    pub registered_vfs:     Le16,
    pub legacy_l2_db_size_kb: Le16,
    pub unused_0:           u8,
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<FuncQcfgInput>(), 24);
const_assert_eq!(core::mem::size_of::<FuncQcfgOutput>(), 48);
hwrm_message!(FuncQcfgInput => FuncQcfgOutput, HWRM_FUNC_QCFG);

pub const FUNC_CFG_ENABLES_MTU:                 u32 = 1 << 0;
pub const FUNC_CFG_ENABLES_NUM_RSSCOS_CTXS:     u32 = 1 << 1;
pub const FUNC_CFG_ENABLES_NUM_CMPL_RINGS:      u32 = 1 << 2;
pub const FUNC_CFG_ENABLES_NUM_TX_RINGS:        u32 = 1 << 3;
pub const FUNC_CFG_ENABLES_NUM_RX_RINGS:        u32 = 1 << 4;
pub const FUNC_CFG_ENABLES_NUM_L2_CTXS:         u32 = 1 << 5;
pub const FUNC_CFG_ENABLES_NUM_VNICS:           u32 = 1 << 6;
pub const FUNC_CFG_ENABLES_NUM_STAT_CTXS:       u32 = 1 << 7;
pub const FUNC_CFG_ENABLES_NUM_HW_RING_GRPS:    u32 = 1 << 8;
pub const FUNC_CFG_ENABLES_NUM_MSIX:            u32 = 1 << 9;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncCfgInput {
    pub hdr:                HwrmInputHeader,
    pub fid:                Le16,
    pub unused_0:           [u8; 2],
    pub flags:              Le32,
    pub enables:            Le32,
    pub mtu:                Le16,
    pub num_rsscos_ctxs:    Le16,
    pub num_cmpl_rings:     Le16,
    pub num_tx_rings:       Le16,
    pub num_rx_rings:       Le16,
    pub num_l2_ctxs:        Le16,
    pub num_vnics:          Le16,
    pub num_stat_ctxs:      Le16,
    pub num_hw_ring_grps:   Le16,
    pub num_msix:           Le16,
}

const_assert_eq!(core::mem::size_of::<FuncCfgInput>(), 48);
hwrm_message!(FuncCfgInput => HwrmEmptyOutput, HWRM_FUNC_CFG);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncVfCfgInput {
    pub hdr:                HwrmInputHeader,
    pub enables:            Le32,
    pub mtu:                Le16,
    pub num_rsscos_ctxs:    Le16,
    pub num_cmpl_rings:     Le16,
    pub num_tx_rings:       Le16,
    pub num_rx_rings:       Le16,
    pub num_l2_ctxs:        Le16,
    pub num_vnics:          Le16,
    pub num_stat_ctxs:      Le16,
    pub num_hw_ring_grps:   Le16,
    pub unused_0:           [u8; 2],
}

const_assert_eq!(core::mem::size_of::<FuncVfCfgInput>(), 40);
hwrm_message!(FuncVfCfgInput => HwrmEmptyOutput, HWRM_FUNC_VF_CFG);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncResourceQcapsInput {
    pub hdr:                HwrmInputHeader,
    pub fid:                Le16,
    pub unused_0:           [u8; 6],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncResourceQcapsOutput {
    pub hdr:                HwrmOutputHeader,
    pub max_vfs:            Le16,
    pub max_msix:           Le16,
    pub vf_reservation_strategy: Le16,
    pub min_cmpl_rings:     Le16,
    pub max_rsscos_ctx:     Le16,
    pub max_cmpl_rings:     Le16,
    pub max_tx_rings:       Le16,
    pub max_rx_rings:       Le16,
    pub max_l2_ctxs:        Le16,
    pub max_vnics:          Le16,
    pub max_stat_ctx:       Le16,
    pub max_hw_ring_grps:   Le16,
    pub max_nqs:            Le16,
    pub min_tx_rings:       Le16,
    pub min_rx_rings:       Le16,
    pub min_stat_ctx:       Le16,
    pub unused_0:           [u8; 7],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<FuncResourceQcapsInput>(), 24);
const_assert_eq!(core::mem::size_of::<FuncResourceQcapsOutput>(), 48);
hwrm_message!(FuncResourceQcapsInput => FuncResourceQcapsOutput, HWRM_FUNC_RESOURCE_QCAPS);

pub const FUNC_DRV_RGTR_FLAGS_ERROR_RECOVERY_SUPPORT:   u32 = 1 << 5;
pub const FUNC_DRV_RGTR_FLAGS_MASTER_SUPPORT:           u32 = 1 << 6;
pub const FUNC_DRV_RGTR_FLAGS_ASYM_QUEUE_CFG_SUPPORT:   u32 = 1 << 8;
pub const FUNC_DRV_RGTR_ENABLES_OS_TYPE:                u32 = 1 << 0;
pub const FUNC_DRV_RGTR_ENABLES_VER:                    u32 = 1 << 1;
pub const FUNC_DRV_RGTR_ENABLES_ASYNC_EVENT_FWD:        u32 = 1 << 4;
pub const FUNC_DRV_RGTR_OS_TYPE_OTHER:                  u16 = 0x1;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncDrvRgtrInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub enables:            Le32,
    pub os_type:            Le16,
    pub ver_maj:            u8,
    pub ver_min:            u8,
    pub ver_upd:            u8,
    pub unused_0:           [u8; 3],
    /// A bitmap of async event ids, 32 ids per word.
    pub async_event_fwd:    [Le32; 8],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncDrvRgtrOutput {
    pub hdr:                HwrmOutputHeader,
    pub flags:              Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<FuncDrvRgtrInput>(), 64);
const_assert_eq!(core::mem::size_of::<FuncDrvRgtrOutput>(), 16);
hwrm_message!(FuncDrvRgtrInput => FuncDrvRgtrOutput, HWRM_FUNC_DRV_RGTR);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncDrvUnrgtrInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<FuncDrvUnrgtrInput>(), 24);
hwrm_message!(FuncDrvUnrgtrInput => HwrmEmptyOutput, HWRM_FUNC_DRV_UNRGTR);

pub const FUNC_DRV_IF_CHANGE_REQ_FLAGS_UP:                  u32 = 1 << 0;
pub const FUNC_DRV_IF_CHANGE_RESP_FLAGS_RESC_CHANGE:        u32 = 1 << 0;
pub const FUNC_DRV_IF_CHANGE_RESP_FLAGS_HOT_FW_RESET_DONE:  u32 = 1 << 1;
pub const FUNC_DRV_IF_CHANGE_RESP_FLAGS_CAPS_CHANGE:        u32 = 1 << 2;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncDrvIfChangeInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub unused_0:           [u8; 4],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncDrvIfChangeOutput {
    pub hdr:                HwrmOutputHeader,
    pub flags:              Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<FuncDrvIfChangeInput>(), 24);
const_assert_eq!(core::mem::size_of::<FuncDrvIfChangeOutput>(), 16);
hwrm_message!(FuncDrvIfChangeInput => FuncDrvIfChangeOutput, HWRM_FUNC_DRV_IF_CHANGE);

/// The context memory types firmware asks the host to back, in the order they appear
/// in the backing store messages.
pub const BACKING_STORE_TYPES: usize = 5;
pub const BACKING_STORE_TYPE_QP:    usize = 0;
pub const BACKING_STORE_TYPE_SRQ:   usize = 1;
pub const BACKING_STORE_TYPE_CQ:    usize = 2;
pub const BACKING_STORE_TYPE_VNIC:  usize = 3;
pub const BACKING_STORE_TYPE_STAT:  usize = 4;
/// An `init_offset` meaning that entries of this type need no init pattern.
pub const BACKING_STORE_NO_INIT_OFFSET: u8 = 0xff;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct BackingStoreTypeCaps {
    pub max_entries:        Le32,
    pub entry_size:         Le16,
    pub init_value:         u8,
    /// The offset of the byte to initialize within each entry, in 4-byte units.
    pub init_offset:        u8,
}

const_assert_eq!(core::mem::size_of::<BackingStoreTypeCaps>(), 8);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncBackingStoreQcapsInput {
    pub hdr:                HwrmInputHeader,
    pub unused_0:           [u8; 8],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncBackingStoreQcapsOutput {
    pub hdr:                HwrmOutputHeader,
    pub types:              [BackingStoreTypeCaps; BACKING_STORE_TYPES],
    pub unused_0:           [u8; 7],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<FuncBackingStoreQcapsInput>(), 24);
const_assert_eq!(core::mem::size_of::<FuncBackingStoreQcapsOutput>(), 56);
hwrm_message!(FuncBackingStoreQcapsInput => FuncBackingStoreQcapsOutput, HWRM_FUNC_BACKING_STORE_QCAPS);

/// `pg_info` packs the page table depth in bits 0..4 and log2(page size / 4KiB) in bits 4..8.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct BackingStoreTypeCfg {
    pub num_entries:        Le32,
    pub entry_size:         Le16,
    pub pg_info:            u8,
    pub unused_0:           u8,
    pub page_dir:           Le64,
}

const_assert_eq!(core::mem::size_of::<BackingStoreTypeCfg>(), 16);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncBackingStoreCfgInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    /// Bit `n` enables entry `n` of `types`.
    pub enables:            Le32,
    pub types:              [BackingStoreTypeCfg; BACKING_STORE_TYPES],
}

const_assert_eq!(core::mem::size_of::<FuncBackingStoreCfgInput>(), 104);
hwrm_message!(FuncBackingStoreCfgInput => HwrmEmptyOutput, HWRM_FUNC_BACKING_STORE_CFG);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncEchoResponseInput {
    pub hdr:                HwrmInputHeader,
    pub event_data1:        Le32,
    pub event_data2:        Le32,
}

const_assert_eq!(core::mem::size_of::<FuncEchoResponseInput>(), 24);
hwrm_message!(FuncEchoResponseInput => HwrmEmptyOutput, HWRM_FUNC_ECHO_RESPONSE);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FuncDbrRecoveryCompletedInput {
    pub hdr:                HwrmInputHeader,
    pub epoch:              Le32,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<FuncDbrRecoveryCompletedInput>(), 24);
hwrm_message!(FuncDbrRecoveryCompletedInput => HwrmEmptyOutput, HWRM_FUNC_DBR_RECOVERY_COMPLETED);


/* ---------------------------------------- RING_* ---------------------------------------- */

pub const RING_TYPE_L2_CMPL:    u8 = 0x0;
pub const RING_TYPE_TX:         u8 = 0x1;
pub const RING_TYPE_RX:         u8 = 0x2;
pub const RING_TYPE_RX_AGG:     u8 = 0x4;
pub const RING_TYPE_NQ:         u8 = 0x5;

pub const RING_ALLOC_ENABLES_STAT_CTX_ID_VALID:     u32 = 1 << 3;
pub const RING_ALLOC_ENABLES_RX_RING_ID_VALID:      u32 = 1 << 6;
pub const RING_ALLOC_ENABLES_NQ_RING_ID_VALID:      u32 = 1 << 7;
pub const RING_ALLOC_ENABLES_RX_BUF_SIZE_VALID:     u32 = 1 << 8;
pub const RING_ALLOC_FLAGS_DISABLE_CQ_OVERFLOW_DETECTION: u16 = 1 << 5;
pub const RING_ALLOC_FLAGS_TX_PUSH_MODE:            u16 = 1 << 6;
pub const RING_ALLOC_INT_MODE_MSIX:                 u8 = 0x2;
pub const RING_ALLOC_INT_MODE_POLL:                 u8 = 0x3;
/// The push buffer index returned when the ring has no push buffer.
pub const RING_ALLOC_NO_PUSH_BUFFER:                u8 = 0xff;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingAllocInput {
    pub hdr:                HwrmInputHeader,
    pub enables:            Le32,
    pub ring_type:          u8,
    pub unused_0:           u8,
    pub flags:              Le16,
    pub page_tbl_addr:      Le64,
    pub fbo:                Le32,
    pub page_size:          u8,
    pub page_tbl_depth:     u8,
    pub unused_1:           [u8; 2],
    pub length:             Le32,
    pub logical_id:         Le16,
    pub cmpl_ring_id:       Le16,
    pub queue_id:           Le16,
    pub rx_buf_size:        Le16,
    pub rx_ring_id:         Le16,
    pub nq_ring_id:         Le16,
    pub stat_ctx_id:        Le32,
    pub int_mode:           u8,
    pub unused_2:           [u8; 3],
    /// Echoed in the NQ notifications of a completion ring.
    pub cq_handle:          Le64,
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingAllocOutput {
    pub hdr:                HwrmOutputHeader,
    pub ring_id:            Le16,
    pub logical_ring_id:    Le16,
    pub push_buffer_index:  u8,
    pub unused_0:           [u8; 2],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<RingAllocInput>(), 72);
const_assert_eq!(core::mem::size_of::<RingAllocOutput>(), 16);
hwrm_message!(RingAllocInput => RingAllocOutput, HWRM_RING_ALLOC);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingFreeInput {
    pub hdr:                HwrmInputHeader,
    pub ring_type:          u8,
    pub flags:              u8,
    pub ring_id:            Le16,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<RingFreeInput>(), 24);
hwrm_message!(RingFreeInput => HwrmEmptyOutput, HWRM_RING_FREE);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingResetInput {
    pub hdr:                HwrmInputHeader,
    pub ring_type:          u8,
    pub unused_0:           u8,
    pub ring_id:            Le16,
    pub unused_1:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<RingResetInput>(), 24);
hwrm_message!(RingResetInput => HwrmEmptyOutput, HWRM_RING_RESET);

pub const AGGINT_FLAGS_TIMER_RESET:     u16 = 1 << 0;
pub const AGGINT_FLAGS_RING_IDLE:       u16 = 1 << 1;
pub const AGGINT_ENABLES_NUM_CMPL_DMA_AGGR:     u16 = 1 << 0;
pub const AGGINT_ENABLES_NUM_CMPL_DMA_AGGR_DURING_INT: u16 = 1 << 1;
pub const AGGINT_ENABLES_CMPL_AGGR_DMA_TMR:     u16 = 1 << 2;
pub const AGGINT_ENABLES_INT_LAT_TMR_MIN:       u16 = 1 << 3;
pub const AGGINT_ENABLES_INT_LAT_TMR_MAX:       u16 = 1 << 4;
pub const AGGINT_ENABLES_NUM_CMPL_AGGR_INT:     u16 = 1 << 5;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingCmplRingCfgAggintParamsInput {
    pub hdr:                HwrmInputHeader,
    pub ring_id:            Le16,
    pub flags:              Le16,
    pub num_cmpl_dma_aggr:  Le16,
    pub num_cmpl_dma_aggr_during_int: Le16,
    pub cmpl_aggr_dma_tmr:  Le16,
    pub cmpl_aggr_dma_tmr_during_int: Le16,
    pub int_lat_tmr_min:    Le16,
    pub int_lat_tmr_max:    Le16,
    pub num_cmpl_aggr_int:  Le16,
    pub enables:            Le16,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<RingCmplRingCfgAggintParamsInput>(), 40);
hwrm_message!(RingCmplRingCfgAggintParamsInput => HwrmEmptyOutput, HWRM_RING_CMPL_RING_CFG_AGGINT_PARAMS);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingGrpAllocInput {
    pub hdr:                HwrmInputHeader,
    pub cr:                 Le16,
    pub rr:                 Le16,
    pub ar:                 Le16,
    pub sc:                 Le16,
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingGrpAllocOutput {
    pub hdr:                HwrmOutputHeader,
    pub ring_group_id:      Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<RingGrpAllocInput>(), 24);
const_assert_eq!(core::mem::size_of::<RingGrpAllocOutput>(), 16);
hwrm_message!(RingGrpAllocInput => RingGrpAllocOutput, HWRM_RING_GRP_ALLOC);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RingGrpFreeInput {
    pub hdr:                HwrmInputHeader,
    pub ring_group_id:      Le32,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<RingGrpFreeInput>(), 24);
hwrm_message!(RingGrpFreeInput => HwrmEmptyOutput, HWRM_RING_GRP_FREE);


/* ---------------------------------------- STAT_CTX_* ---------------------------------------- */

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct StatCtxAllocInput {
    pub hdr:                HwrmInputHeader,
    pub stats_dma_addr:     Le64,
    pub update_period_ms:   Le32,
    pub stat_ctx_flags:     u8,
    pub unused_0:           u8,
    pub stats_dma_length:   Le16,
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct StatCtxAllocOutput {
    pub hdr:                HwrmOutputHeader,
    pub stat_ctx_id:        Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<StatCtxAllocInput>(), 32);
const_assert_eq!(core::mem::size_of::<StatCtxAllocOutput>(), 16);
hwrm_message!(StatCtxAllocInput => StatCtxAllocOutput, HWRM_STAT_CTX_ALLOC);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct StatCtxFreeInput {
    pub hdr:                HwrmInputHeader,
    pub stat_ctx_id:        Le32,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<StatCtxFreeInput>(), 24);
hwrm_message!(StatCtxFreeInput => HwrmEmptyOutput, HWRM_STAT_CTX_FREE);


/* ---------------------------------------- VNIC_* ---------------------------------------- */

pub const VNIC_ALLOC_FLAGS_DEFAULT:     u32 = 1 << 0;
/// The id firmware uses for "no VNIC / no ring group / no RSS context".
pub const INVALID_HW_ID:                u16 = 0xffff;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicAllocInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub unused_0:           [u8; 4],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicAllocOutput {
    pub hdr:                HwrmOutputHeader,
    pub vnic_id:            Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<VnicAllocInput>(), 24);
const_assert_eq!(core::mem::size_of::<VnicAllocOutput>(), 16);
hwrm_message!(VnicAllocInput => VnicAllocOutput, HWRM_VNIC_ALLOC);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicFreeInput {
    pub hdr:                HwrmInputHeader,
    pub vnic_id:            Le32,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<VnicFreeInput>(), 24);
hwrm_message!(VnicFreeInput => HwrmEmptyOutput, HWRM_VNIC_FREE);

pub const VNIC_CFG_FLAGS_VLAN_STRIP_MODE:       u32 = 1 << 2;
pub const VNIC_CFG_ENABLES_DFLT_RING_GRP:       u32 = 1 << 0;
pub const VNIC_CFG_ENABLES_RSS_RULE:            u32 = 1 << 1;
pub const VNIC_CFG_ENABLES_MRU:                 u32 = 1 << 4;
pub const VNIC_CFG_ENABLES_DEFAULT_RX_RING_ID:  u32 = 1 << 5;
pub const VNIC_CFG_ENABLES_DEFAULT_CMPL_RING_ID: u32 = 1 << 6;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicCfgInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub enables:            Le32,
    pub vnic_id:            Le16,
    pub dflt_ring_grp:      Le16,
    pub rss_rule:           Le16,
    pub cos_rule:           Le16,
    pub lb_rule:            Le16,
    pub mru:                Le16,
    pub default_rx_ring_id: Le16,
    pub default_cmpl_ring_id: Le16,
}

const_assert_eq!(core::mem::size_of::<VnicCfgInput>(), 40);
hwrm_message!(VnicCfgInput => HwrmEmptyOutput, HWRM_VNIC_CFG);

pub const VNIC_TPA_CFG_FLAGS_TPA:               u32 = 1 << 0;
pub const VNIC_TPA_CFG_FLAGS_ENCAP_TPA:         u32 = 1 << 1;
pub const VNIC_TPA_CFG_FLAGS_RSC_WND_UPDATE:    u32 = 1 << 2;
pub const VNIC_TPA_CFG_FLAGS_GRO:               u32 = 1 << 3;
pub const VNIC_TPA_CFG_FLAGS_AGG_WITH_ECN:      u32 = 1 << 4;
pub const VNIC_TPA_CFG_FLAGS_AGG_WITH_SAME_GRE_SEQ: u32 = 1 << 5;
pub const VNIC_TPA_CFG_ENABLES_MAX_AGG_SEGS:    u32 = 1 << 0;
pub const VNIC_TPA_CFG_ENABLES_MAX_AGGS:        u32 = 1 << 1;
pub const VNIC_TPA_CFG_ENABLES_MIN_AGG_LEN:     u32 = 1 << 3;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicTpaCfgInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub enables:            Le32,
    pub vnic_id:            Le16,
    pub max_agg_segs:       Le16,
    pub max_aggs:           Le16,
    pub unused_0:           [u8; 2],
    pub max_agg_timer:      Le32,
    pub min_agg_len:        Le32,
}

const_assert_eq!(core::mem::size_of::<VnicTpaCfgInput>(), 40);
hwrm_message!(VnicTpaCfgInput => HwrmEmptyOutput, HWRM_VNIC_TPA_CFG);

pub const VNIC_RSS_CFG_HASH_TYPE_IPV4:          u32 = 1 << 0;
pub const VNIC_RSS_CFG_HASH_TYPE_TCP_IPV4:      u32 = 1 << 1;
pub const VNIC_RSS_CFG_HASH_TYPE_UDP_IPV4:      u32 = 1 << 2;
pub const VNIC_RSS_CFG_HASH_TYPE_IPV6:          u32 = 1 << 3;
pub const VNIC_RSS_CFG_HASH_TYPE_TCP_IPV6:      u32 = 1 << 4;
pub const VNIC_RSS_CFG_HASH_TYPE_UDP_IPV6:      u32 = 1 << 5;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicRssCfgInput {
    pub hdr:                HwrmInputHeader,
    pub hash_type:          Le32,
    pub vnic_id:            Le16,
    pub ring_table_pair_index: u8,
    pub hash_mode_flags:    u8,
    pub ring_grp_tbl_addr:  Le64,
    pub hash_key_tbl_addr:  Le64,
    pub rss_ctx_idx:        Le16,
    pub unused_0:           [u8; 6],
}

const_assert_eq!(core::mem::size_of::<VnicRssCfgInput>(), 48);
hwrm_message!(VnicRssCfgInput => HwrmEmptyOutput, HWRM_VNIC_RSS_CFG);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicRssCosLbCtxAllocInput {
    pub hdr:                HwrmInputHeader,
    pub unused_0:           [u8; 8],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicRssCosLbCtxAllocOutput {
    pub hdr:                HwrmOutputHeader,
    pub rss_cos_lb_ctx_id:  Le16,
    pub unused_0:           [u8; 5],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<VnicRssCosLbCtxAllocInput>(), 24);
const_assert_eq!(core::mem::size_of::<VnicRssCosLbCtxAllocOutput>(), 16);
hwrm_message!(VnicRssCosLbCtxAllocInput => VnicRssCosLbCtxAllocOutput, HWRM_VNIC_RSS_COS_LB_CTX_ALLOC);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct VnicRssCosLbCtxFreeInput {
    pub hdr:                HwrmInputHeader,
    pub rss_cos_lb_ctx_id:  Le16,
    pub unused_0:           [u8; 6],
}

const_assert_eq!(core::mem::size_of::<VnicRssCosLbCtxFreeInput>(), 24);
hwrm_message!(VnicRssCosLbCtxFreeInput => HwrmEmptyOutput, HWRM_VNIC_RSS_COS_LB_CTX_FREE);


/* ---------------------------------------- CFA_* ---------------------------------------- */

pub const CFA_L2_FILTER_ALLOC_FLAGS_PATH_RX:        u32 = 1 << 0;
pub const CFA_L2_FILTER_ALLOC_FLAGS_OUTERMOST:      u32 = 1 << 2;
pub const CFA_L2_FILTER_ALLOC_ENABLES_L2_ADDR:      u32 = 1 << 0;
pub const CFA_L2_FILTER_ALLOC_ENABLES_L2_ADDR_MASK: u32 = 1 << 1;
pub const CFA_L2_FILTER_ALLOC_ENABLES_L2_OVLAN:     u32 = 1 << 2;
pub const CFA_L2_FILTER_ALLOC_ENABLES_L2_OVLAN_MASK: u32 = 1 << 3;
pub const CFA_L2_FILTER_ALLOC_ENABLES_DST_ID:       u32 = 1 << 4;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CfaL2FilterAllocInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub enables:            Le32,
    pub l2_addr:            [u8; 6],
    pub unused_0:           [u8; 2],
    pub l2_addr_mask:       [u8; 6],
    pub l2_ovlan:           Le16,
    pub l2_ovlan_mask:      Le16,
    pub dst_id:             Le16,
    pub unused_1:           [u8; 4],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CfaL2FilterAllocOutput {
    pub hdr:                HwrmOutputHeader,
    pub l2_filter_id:       Le64,
    pub flow_id:            Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<CfaL2FilterAllocInput>(), 48);
const_assert_eq!(core::mem::size_of::<CfaL2FilterAllocOutput>(), 24);
hwrm_message!(CfaL2FilterAllocInput => CfaL2FilterAllocOutput, HWRM_CFA_L2_FILTER_ALLOC);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CfaL2FilterFreeInput {
    pub hdr:                HwrmInputHeader,
    pub l2_filter_id:       Le64,
}

const_assert_eq!(core::mem::size_of::<CfaL2FilterFreeInput>(), 24);
hwrm_message!(CfaL2FilterFreeInput => HwrmEmptyOutput, HWRM_CFA_L2_FILTER_FREE);

pub const CFA_L2_SET_RX_MASK_MCAST:             u32 = 1 << 1;
pub const CFA_L2_SET_RX_MASK_ALL_MCAST:         u32 = 1 << 2;
pub const CFA_L2_SET_RX_MASK_BCAST:             u32 = 1 << 3;
pub const CFA_L2_SET_RX_MASK_PROMISCUOUS:       u32 = 1 << 4;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CfaL2SetRxMaskInput {
    pub hdr:                HwrmInputHeader,
    pub vnic_id:            Le32,
    pub mask:               Le32,
    pub mc_tbl_addr:        Le64,
    pub num_mc_entries:     Le32,
    pub unused_0:           [u8; 4],
}

const_assert_eq!(core::mem::size_of::<CfaL2SetRxMaskInput>(), 40);
hwrm_message!(CfaL2SetRxMaskInput => HwrmEmptyOutput, HWRM_CFA_L2_SET_RX_MASK);

pub const CFA_NTUPLE_FILTER_ALLOC_FLAGS_DROP:       u32 = 1 << 1;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_L2_FILTER_ID:     u32 = 1 << 0;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_ETHERTYPE:        u32 = 1 << 1;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_IP_ADDR_TYPE:     u32 = 1 << 2;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_IP_PROTOCOL:      u32 = 1 << 3;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_IPADDR:       u32 = 1 << 4;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_IPADDR_MASK:  u32 = 1 << 5;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_IPADDR:       u32 = 1 << 6;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_IPADDR_MASK:  u32 = 1 << 7;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_PORT:         u32 = 1 << 8;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_PORT_MASK:    u32 = 1 << 9;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_PORT:         u32 = 1 << 10;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_PORT_MASK:    u32 = 1 << 11;
pub const CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_ID:           u32 = 1 << 12;
pub const CFA_NTUPLE_FILTER_ALLOC_IP_ADDR_TYPE_IPV4:        u8 = 4;
pub const CFA_NTUPLE_FILTER_ALLOC_IP_ADDR_TYPE_IPV6:        u8 = 6;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CfaNtupleFilterAllocInput {
    pub hdr:                HwrmInputHeader,
    pub flags:              Le32,
    pub enables:            Le32,
    pub l2_filter_id:       Le64,
    pub ethertype:          Le16,
    pub ip_addr_type:       u8,
    pub ip_protocol:        u8,
    pub dst_id:             Le16,
    pub unused_0:           [u8; 2],
    /// Addresses and ports are in network byte order.
    pub src_ipaddr:         [u8; 16],
    pub src_ipaddr_mask:    [u8; 16],
    pub dst_ipaddr:         [u8; 16],
    pub dst_ipaddr_mask:    [u8; 16],
    pub src_port:           [u8; 2],
    pub src_port_mask:      [u8; 2],
    pub dst_port:           [u8; 2],
    pub dst_port_mask:      [u8; 2],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CfaNtupleFilterAllocOutput {
    pub hdr:                HwrmOutputHeader,
    pub ntuple_filter_id:   Le64,
    pub flow_id:            Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<CfaNtupleFilterAllocInput>(), 112);
const_assert_eq!(core::mem::size_of::<CfaNtupleFilterAllocOutput>(), 24);
hwrm_message!(CfaNtupleFilterAllocInput => CfaNtupleFilterAllocOutput, HWRM_CFA_NTUPLE_FILTER_ALLOC);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CfaNtupleFilterFreeInput {
    pub hdr:                HwrmInputHeader,
    pub ntuple_filter_id:   Le64,
}

const_assert_eq!(core::mem::size_of::<CfaNtupleFilterFreeInput>(), 24);
hwrm_message!(CfaNtupleFilterFreeInput => HwrmEmptyOutput, HWRM_CFA_NTUPLE_FILTER_FREE);


/* ---------------------------------------- FW_RESET / error recovery ---------------------------------------- */

pub const FW_RESET_EMBEDDED_PROC_TYPE_CHIP:     u8 = 0x6;
pub const FW_RESET_SELFRST_STATUS_ASAP:         u8 = 0x1;
pub const FW_RESET_FLAGS_RESET_GRACEFUL:        u8 = 0x1;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FwResetInput {
    pub hdr:                HwrmInputHeader,
    pub embedded_proc_type: u8,
    pub selfrst_status:     u8,
    pub host_idx:           u8,
    pub flags:              u8,
    pub unused_0:           [u8; 4],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FwResetOutput {
    pub hdr:                HwrmOutputHeader,
    pub selfrst_status:     u8,
    pub unused_0:           [u8; 6],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<FwResetInput>(), 24);
const_assert_eq!(core::mem::size_of::<FwResetOutput>(), 16);
hwrm_message!(FwResetInput => FwResetOutput, HWRM_FW_RESET);

pub const ERROR_RECOVERY_QCFG_FLAGS_HOST:       u32 = 1 << 0;
pub const ERROR_RECOVERY_QCFG_FLAGS_CO_CPU:     u32 = 1 << 1;
/// The maximum number of register writes in a reset sequence.
pub const ERROR_RECOVERY_MAX_RESET_REGS:        usize = 16;

/// The address space of a health register, encoded in its low 2 bits.
pub const FW_HEALTH_REG_TYPE_MASK:      u32 = 0x3;
pub const FW_HEALTH_REG_TYPE_CFG:       u32 = 0x0;
pub const FW_HEALTH_REG_TYPE_GRC:       u32 = 0x1;
pub const FW_HEALTH_REG_TYPE_BAR0:      u32 = 0x2;
pub const FW_HEALTH_REG_TYPE_BAR1:      u32 = 0x3;

/// Values of the firmware health status register.
pub const FW_STATUS_HEALTHY:            u32 = 0x8000;
pub const FW_STATUS_BOOTING_MASK:       u32 = 0xffff;
pub const FW_STATUS_RECOVERING:         u32 = 0x400003;
pub const FW_STATUS_SHUTDOWN:           u32 = 0x100000;
pub const FW_STATUS_CRASHED_NO_MASTER:  u32 = 0x20000;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct ErrorRecoveryQcfgInput {
    pub hdr:                HwrmInputHeader,
    pub unused_0:           [u8; 8],
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct ErrorRecoveryQcfgOutput {
    pub hdr:                HwrmOutputHeader,
    pub flags:              Le32,
    /// How often to sample the health registers, in milliseconds.
    pub driver_polling_freq: Le32,
    /// Wait periods, in milliseconds.
    pub master_func_wait_period: Le32,
    pub normal_func_wait_period: Le32,
    pub master_func_wait_period_after_reset: Le32,
    pub max_bailout_time_after_reset: Le32,
    pub fw_health_status_reg: Le32,
    pub fw_heartbeat_reg:   Le32,
    pub fw_reset_cnt_reg:   Le32,
    pub reset_inprogress_reg: Le32,
    pub reset_inprogress_reg_mask: Le32,
    pub unused_0:           [u8; 3],
    pub reg_array_cnt:      u8,
    pub reset_reg:          [Le32; ERROR_RECOVERY_MAX_RESET_REGS],
    pub reset_reg_val:      [Le32; ERROR_RECOVERY_MAX_RESET_REGS],
    /// Delays after each reset register write, in milliseconds.
    pub delay_after_reset:  [u8; ERROR_RECOVERY_MAX_RESET_REGS],
    pub unused_1:           [u8; 7],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<ErrorRecoveryQcfgInput>(), 24);
const_assert_eq!(core::mem::size_of::<ErrorRecoveryQcfgOutput>(), 208);
hwrm_message!(ErrorRecoveryQcfgInput => ErrorRecoveryQcfgOutput, HWRM_ERROR_RECOVERY_QCFG);


/* ---------------------------------------- DBG_* ---------------------------------------- */

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct DbgReadDirectInput {
    pub hdr:                HwrmInputHeader,
    pub host_dest_addr:     Le64,
    pub read_addr:          Le32,
    pub read_len32:         Le32,
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct DbgReadDirectOutput {
    pub hdr:                HwrmOutputHeader,
    pub crc32:              Le32,
    pub unused_0:           [u8; 3],
    pub valid:              u8,
}

const_assert_eq!(core::mem::size_of::<DbgReadDirectInput>(), 32);
const_assert_eq!(core::mem::size_of::<DbgReadDirectOutput>(), 16);
hwrm_message!(DbgReadDirectInput => DbgReadDirectOutput, HWRM_DBG_READ_DIRECT);
