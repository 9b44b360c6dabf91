//! Completion records written by the NIC into completion rings (CQs) and notification queues (NQs).
//!
//! Every record is 16 bytes, or 32 bytes for the RX and TPA records, which then occupy two
//! consecutive ring slots. The type of a record lives in the low 6 bits of its first dword,
//! and its valid bit in bit 0 of its third dword; the polarity of the valid bit flips each time
//! the ring wraps. A 32-bit record carries a second valid bit in the third dword of its second half.

use zerocopy::{AsBytes, FromBytes, FromZeroes};
use num_enum::TryFromPrimitive;
use bit_field::BitField;
use crate::{Le16, Le32};

/// The size of one completion ring slot.
pub const CMPL_SLOT_SIZE: usize = 16;
/// Byte offset of the dword carrying the valid bit, within every 16-byte slot.
pub const CMPL_VALID_OFFSET: usize = 8;
pub const CMPL_V: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CmplType {
    TxL2            = 0x00,
    TxL2Coal        = 0x02,
    RxL2            = 0x11,
    RxAgg           = 0x12,
    RxTpaStart      = 0x13,
    RxTpaEnd        = 0x15,
    RxTpaAgg        = 0x16,
    RxL2V3          = 0x17,
    RxTpaStartV3    = 0x19,
    Mpc             = 0x1e,
    HwrmDone        = 0x20,
    HwrmFwdReq      = 0x22,
    HwrmAsyncEvent  = 0x2e,
    CqNotification  = 0x30,
}

impl CmplType {
    /// The raw type field of a record, given its first dword.
    pub fn raw(dword0: u32) -> u8 {
        dword0.get_bits(0..6) as u8
    }

    /// Returns true if records of this type take two ring slots.
    pub fn is_32b(self) -> bool {
        matches!(self,
            CmplType::RxL2 | CmplType::RxL2V3 | CmplType::RxTpaStart |
            CmplType::RxTpaStartV3 | CmplType::RxTpaEnd
        )
    }
}

/// Checks a valid bit against the expected polarity for the pass identified by `raw_cons`.
///
/// `cp_bit` is the number of slots in the ring, so `raw_cons & cp_bit` flips on every wrap.
#[inline]
pub fn cmp_valid(valid_dword: u32, raw_cons: u32, cp_bit: u32) -> bool {
    (valid_dword & CMPL_V != 0) == (raw_cons & cp_bit == 0)
}

/// The layout shared by all 16-byte records, used to classify a record before reading it fully.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CmplBase {
    pub type_info:          Le32,
    pub info1:              Le32,
    pub info2_v:            Le32,
    pub info3:              Le32,
}

const_assert_eq!(core::mem::size_of::<CmplBase>(), 16);

impl CmplBase {
    pub fn cmpl_type(&self) -> u8 {
        CmplType::raw(self.type_info.get())
    }
}

pub const TX_CMP_FLAGS_ERROR:           u32 = 1 << 6;
pub const TX_CMP_FLAGS_PUSH:            u32 = 1 << 7;
pub const TX_CMP_SQ_CONS_IDX_MASK:      u32 = 0x00ff_ffff;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct TxCmp {
    pub flags_type:         Le32,
    pub opaque:             Le32,
    pub errors_v:           Le32,
    /// The consumer index of the send queue, for coalesced completions.
    pub sq_cons_idx:        Le32,
}

const_assert_eq!(core::mem::size_of::<TxCmp>(), 16);

pub const RX_CMP_FLAGS_ERROR:               u32 = 1 << 6;
pub const RX_CMP_FLAGS_PLACEMENT_MASK:      u32 = 0x7 << 7;
pub const RX_CMP_FLAGS_RSS_VALID:           u32 = 1 << 10;
pub const RX_CMP_FLAGS_ITYPES_SHIFT:        u32 = 12;
pub const RX_CMP_FLAGS_ITYPES_MASK:         u32 = 0xf << 12;
pub const RX_CMP_FLAGS_ITYPE_IP:            u32 = 1 << 12;
pub const RX_CMP_FLAGS_ITYPE_TCP:           u32 = 2 << 12;
pub const RX_CMP_FLAGS_ITYPE_UDP:           u32 = 3 << 12;
pub const RX_CMP_FLAGS_ITYPE_PTP_W_TS:      u32 = 9 << 12;
pub const RX_CMP_LEN_SHIFT:                 u32 = 16;

pub const RX_CMP_AGG_BUFS_SHIFT:            u32 = 1;
pub const RX_CMP_AGG_BUFS_MASK:             u32 = 0x1f << 1;
pub const RX_CMP_RSS_HASH_TYPE_SHIFT:       u32 = 9;
pub const RX_CMP_RSS_HASH_TYPE_MASK:        u32 = 0x7f << 9;
pub const RX_CMP_PAYLOAD_OFFSET_SHIFT:      u32 = 16;
pub const RX_CMP_PAYLOAD_OFFSET_MASK:       u32 = 0xff << 16;

/// First half of an L2 RX completion.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxCmp {
    pub len_flags_type:     Le32,
    pub opaque:             Le32,
    pub misc_v1:            Le32,
    pub rss_hash:           Le32,
}

const_assert_eq!(core::mem::size_of::<RxCmp>(), 16);

impl RxCmp {
    pub fn len(&self) -> u32 {
        self.len_flags_type.get() >> RX_CMP_LEN_SHIFT
    }

    pub fn flags(&self) -> u32 {
        self.len_flags_type.get()
    }

    pub fn agg_bufs(&self) -> u32 {
        (self.misc_v1.get() & RX_CMP_AGG_BUFS_MASK) >> RX_CMP_AGG_BUFS_SHIFT
    }

    pub fn itype(&self) -> u32 {
        self.len_flags_type.get() & RX_CMP_FLAGS_ITYPES_MASK
    }

    pub fn payload_offset(&self) -> u32 {
        (self.misc_v1.get() & RX_CMP_PAYLOAD_OFFSET_MASK) >> RX_CMP_PAYLOAD_OFFSET_SHIFT
    }
}

pub const RX_CMP_FLAGS2_IP_CS_CALC:         u32 = 1 << 0;
pub const RX_CMP_FLAGS2_L4_CS_CALC:         u32 = 1 << 1;
pub const RX_CMP_FLAGS2_T_IP_CS_CALC:       u32 = 1 << 2;
pub const RX_CMP_FLAGS2_T_L4_CS_CALC:       u32 = 1 << 3;
pub const RX_CMP_FLAGS2_META_FORMAT_VLAN:   u32 = 1 << 4;
pub const RX_CMP_FLAGS2_IP_TYPE_V6:         u32 = 1 << 8;

pub const RX_CMP_METADATA_VID_MASK:         u32 = 0xfff;
pub const RX_CMP_METADATA_TCI_MASK:         u32 = 0xffff;
pub const RX_CMP_METADATA_TPID_SHIFT:       u32 = 16;
pub const RX_CMP_METADATA_TPID_MASK:        u32 = 0x7 << 16;
pub const RX_CMP_METADATA_TPID_8021Q:       u32 = 1 << 16;

pub const RX_CMPL_ERRORS_BUFFER_ERROR_MASK: u32 = 0x7 << 1;
pub const RX_CMPL_ERRORS_IP_CS_ERROR:       u32 = 1 << 4;
pub const RX_CMPL_ERRORS_L4_CS_ERROR:       u32 = 1 << 5;
pub const RX_CMPL_ERRORS_T_IP_CS_ERROR:     u32 = 1 << 6;
pub const RX_CMPL_ERRORS_T_L4_CS_ERROR:     u32 = 1 << 7;
pub const RX_CMPL_ERRORS_CRC_ERROR:         u32 = 1 << 8;
/// Errors that mean the frame itself is bad, rather than just its checksums.
pub const RX_CMP_L2_ERRORS: u32 = RX_CMPL_ERRORS_BUFFER_ERROR_MASK | RX_CMPL_ERRORS_CRC_ERROR;
pub const RX_CMP_L4_CS_ERRORS: u32 = RX_CMPL_ERRORS_L4_CS_ERROR | RX_CMPL_ERRORS_T_L4_CS_ERROR;
pub const RX_CMP_CFA_CODE_SHIFT:            u32 = 16;

/// Second half of an L2 RX completion.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxCmpExt {
    pub flags2:             Le32,
    pub metadata:           Le32,
    pub cfa_code_errors_v2: Le32,
    pub timestamp:          Le32,
}

const_assert_eq!(core::mem::size_of::<RxCmpExt>(), 16);

impl RxCmpExt {
    pub fn errors(&self) -> u32 {
        self.cfa_code_errors_v2.get() & 0xfffe
    }

    /// The VLAN TCI and TPID selector, if the NIC stripped a tag.
    pub fn vlan(&self) -> Option<(u16, u32)> {
        if self.flags2.get() & RX_CMP_FLAGS2_META_FORMAT_VLAN == 0 {
            return None;
        }
        let meta = self.metadata.get();
        Some(((meta & RX_CMP_METADATA_TCI_MASK) as u16, meta & RX_CMP_METADATA_TPID_MASK))
    }

    pub fn is_ipv6(&self) -> bool {
        self.flags2.get() & RX_CMP_FLAGS2_IP_TYPE_V6 != 0
    }
}

pub const RX_AGG_CMP_LEN_SHIFT:             u32 = 16;
pub const RX_AGG_CMP_AGG_ID_SHIFT:          u32 = 16;

/// An aggregation buffer completion, for both plain AGG buffers and TPA aggregation buffers.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxAggCmp {
    pub len_flags_type:     Le32,
    pub opaque:             Le32,
    pub agg_id_v:           Le32,
    pub unused:             Le32,
}

const_assert_eq!(core::mem::size_of::<RxAggCmp>(), 16);

impl RxAggCmp {
    pub fn len(&self) -> u32 {
        self.len_flags_type.get() >> RX_AGG_CMP_LEN_SHIFT
    }

    pub fn agg_id(&self) -> u16 {
        self.agg_id_v.get().get_bits(16..28) as u16
    }
}

pub const RX_TPA_START_CMP_AGG_ID_SHIFT:    u32 = 16;

/// First half of a TPA start completion.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxTpaStartCmp {
    pub len_flags_type:     Le32,
    pub opaque:             Le32,
    pub misc_v1:            Le32,
    pub rss_hash:           Le32,
}

const_assert_eq!(core::mem::size_of::<RxTpaStartCmp>(), 16);

impl RxTpaStartCmp {
    pub fn len(&self) -> u32 {
        self.len_flags_type.get() >> RX_CMP_LEN_SHIFT
    }

    pub fn agg_id(&self) -> u16 {
        self.misc_v1.get().get_bits(16..28) as u16
    }

    pub fn hash_type(&self) -> u32 {
        (self.misc_v1.get() & RX_CMP_RSS_HASH_TYPE_MASK) >> RX_CMP_RSS_HASH_TYPE_SHIFT
    }
}

/// Second half of a TPA start completion.
///
/// `hdr_info` packs the inner L4 offset in bits 0..9, the inner L3 offset in bits 9..18
/// and the outer L3 offset (nonzero only for tunnels) in bits 18..27.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxTpaStartCmpExt {
    pub flags2:             Le32,
    pub metadata:           Le32,
    pub cfa_code_v2:        Le32,
    pub hdr_info:           Le32,
}

const_assert_eq!(core::mem::size_of::<RxTpaStartCmpExt>(), 16);

impl RxTpaStartCmpExt {
    pub fn inner_l4_off(&self) -> u32 {
        self.hdr_info.get().get_bits(0..9)
    }

    pub fn inner_l3_off(&self) -> u32 {
        self.hdr_info.get().get_bits(9..18)
    }

    pub fn outer_l3_off(&self) -> u32 {
        self.hdr_info.get().get_bits(18..27)
    }

    pub fn is_ipv6(&self) -> bool {
        self.flags2.get() & RX_CMP_FLAGS2_IP_TYPE_V6 != 0
    }

    pub fn l4_cs_calc(&self) -> bool {
        self.flags2.get() & RX_CMP_FLAGS2_L4_CS_CALC != 0
    }
}

/// First half of a TPA end completion.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxTpaEndCmp {
    pub len_flags_type:     Le32,
    pub opaque:             Le32,
    pub misc_v1:            Le32,
    pub tsdelta:            Le32,
}

const_assert_eq!(core::mem::size_of::<RxTpaEndCmp>(), 16);

impl RxTpaEndCmp {
    pub fn len(&self) -> u32 {
        self.len_flags_type.get() >> RX_CMP_LEN_SHIFT
    }

    pub fn agg_bufs(&self) -> u32 {
        (self.misc_v1.get() & RX_CMP_AGG_BUFS_MASK) >> RX_CMP_AGG_BUFS_SHIFT
    }

    pub fn agg_id(&self) -> u16 {
        self.misc_v1.get().get_bits(16..28) as u16
    }
}

/// Second half of a TPA end completion.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxTpaEndCmpExt {
    pub tpa_segs:           Le32,
    pub seg_len:            Le32,
    pub errors_v2:          Le32,
    pub start_opaque:       Le32,
}

const_assert_eq!(core::mem::size_of::<RxTpaEndCmpExt>(), 16);

impl RxTpaEndCmpExt {
    pub fn segs(&self) -> u32 {
        self.tpa_segs.get().get_bits(0..8)
    }

    pub fn gso_size(&self) -> u32 {
        self.seg_len.get().get_bits(0..16)
    }

    pub fn errors(&self) -> u32 {
        self.errors_v2.get() & 0xfffe
    }
}

pub const NQ_CN_TOGGLE_SHIFT: u32 = 6;

/// A notification queue entry pointing at a completion ring that has work.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct NqCn {
    pub type_toggle:        Le16,
    pub reserved16:         Le16,
    pub cq_handle_low:      Le32,
    pub v:                  Le32,
    pub cq_handle_high:     Le32,
}

const_assert_eq!(core::mem::size_of::<NqCn>(), 16);

impl NqCn {
    pub fn cq_handle(&self) -> u64 {
        (self.cq_handle_high.get() as u64) << 32 | self.cq_handle_low.get() as u64
    }

    /// The CQ toggle value to echo in the CQ's next ARM doorbell (P7 only).
    pub fn toggle(&self) -> u8 {
        self.type_toggle.get().get_bits(6..8) as u8
    }
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct HwrmDoneCmp {
    pub cmpl_type:          Le16,
    pub sequence_id:        Le16,
    pub unused_0:           Le32,
    pub v:                  Le32,
    pub unused_1:           Le32,
}

const_assert_eq!(core::mem::size_of::<HwrmDoneCmp>(), 16);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct HwrmAsyncEventCmp {
    pub cmpl_type:          Le16,
    pub event_id:           Le16,
    pub event_data2:        Le32,
    pub opaque_v:           u8,
    pub timestamp_lo:       u8,
    pub timestamp_hi:       Le16,
    pub event_data1:        Le32,
}

const_assert_eq!(core::mem::size_of::<HwrmAsyncEventCmp>(), 16);

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct HwrmFwdReqCmp {
    pub req_len_type:       Le16,
    pub source_id:          Le16,
    pub unused_0:           Le32,
    pub req_buf_addr_v:     [Le32; 2],
}

const_assert_eq!(core::mem::size_of::<HwrmFwdReqCmp>(), 16);
