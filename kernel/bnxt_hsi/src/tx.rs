//! Transmit buffer descriptors.
//!
//! A normal packet is posted as a long TX BD followed by its extension BD, then one
//! long TX BD per fragment. All of them are 16 bytes, so a TX ring page holds 256 BDs.

use zerocopy::{AsBytes, FromBytes, FromZeroes};
use bit_field::BitField;
use crate::{Le32, Le64};

pub const TX_BD_TYPE_SHORT_TX_BD:       u32 = 0x00;
pub const TX_BD_TYPE_LONG_TX_BD:        u32 = 0x10;
pub const TX_BD_TYPE_TIMEDTX_BD:        u32 = 0x1c;

pub const TX_BD_FLAGS_PACKET_END:       u32 = 1 << 6;
pub const TX_BD_FLAGS_NO_CMPL:          u32 = 1 << 7;
pub const TX_BD_FLAGS_BD_CNT_SHIFT:     u32 = 8;
pub const TX_BD_FLAGS_BD_CNT_MASK:      u32 = 0x1f << 8;
pub const TX_BD_FLAGS_LHINT_SHIFT:      u32 = 13;
pub const TX_BD_FLAGS_LHINT_512_AND_SMALLER:    u32 = 0 << 13;
pub const TX_BD_FLAGS_LHINT_512_TO_1023:        u32 = 1 << 13;
pub const TX_BD_FLAGS_LHINT_1024_TO_2047:       u32 = 2 << 13;
pub const TX_BD_FLAGS_LHINT_2048_AND_LARGER:    u32 = 3 << 13;
pub const TX_BD_FLAGS_COAL_NOW:         u32 = 1 << 15;
pub const TX_BD_LEN_SHIFT:              u32 = 16;

/// Length hints indexed by `len >> 9`, for lengths below 2048 bytes.
pub const LHINT_TABLE: [u32; 4] = [
    TX_BD_FLAGS_LHINT_512_AND_SMALLER,
    TX_BD_FLAGS_LHINT_512_TO_1023,
    TX_BD_FLAGS_LHINT_1024_TO_2047,
    TX_BD_FLAGS_LHINT_1024_TO_2047,
];

/// Returns the length hint flag for a packet of `len` bytes.
pub fn length_hint(len: u32) -> u32 {
    if len >= 2048 {
        TX_BD_FLAGS_LHINT_2048_AND_LARGER
    } else {
        LHINT_TABLE[(len >> 9) as usize]
    }
}

pub const TX_BD_FLAGS_TCP_UDP_CHKSUM:   u32 = 1 << 0;
pub const TX_BD_FLAGS_IP_CKSUM:         u32 = 1 << 1;
pub const TX_BD_FLAGS_NO_CRC:           u32 = 1 << 2;
pub const TX_BD_FLAGS_STAMP:            u32 = 1 << 3;
pub const TX_BD_FLAGS_T_IP_CHKSUM:      u32 = 1 << 4;
pub const TX_BD_FLAGS_LSO:              u32 = 1 << 5;
pub const TX_BD_FLAGS_T_IPID:           u32 = 1 << 7;
pub const TX_BD_HSIZE_SHIFT:            u32 = 16;
pub const TX_BD_MSS_MASK:               u32 = 0x3fff;

pub const TX_BD_CFA_ACTION_SHIFT:       u32 = 16;
pub const TX_BD_CFA_META_VID_MASK:      u32 = 0xfff;
pub const TX_BD_CFA_META_PRI_SHIFT:     u32 = 13;
pub const TX_BD_CFA_META_TPID_SHIFT:    u32 = 16;
pub const TX_BD_CFA_META_TPID_8021Q:    u32 = 1 << 16;
pub const TX_BD_CFA_META_TPID_8021AD:   u32 = 0;
pub const TX_BD_CFA_META_KEY_VLAN:      u32 = 1 << 28;

/// The first BD of every packet, and the BD of every fragment.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct TxBd {
    pub len_flags_type:     Le32,
    pub opaque:             Le32,
    pub haddr:              Le64,
}

const_assert_eq!(core::mem::size_of::<TxBd>(), 16);

impl TxBd {
    pub fn new(len_flags_type: u32, opaque: u32, haddr: u64) -> TxBd {
        TxBd {
            len_flags_type: Le32::new(len_flags_type),
            opaque: Le32::new(opaque),
            haddr: Le64::new(haddr),
        }
    }

    pub fn bd_type(&self) -> u32 {
        self.len_flags_type.get().get_bits(0..6)
    }

    pub fn len(&self) -> u32 {
        self.len_flags_type.get() >> TX_BD_LEN_SHIFT
    }

    pub fn bd_count(&self) -> u32 {
        (self.len_flags_type.get() & TX_BD_FLAGS_BD_CNT_MASK) >> TX_BD_FLAGS_BD_CNT_SHIFT
    }

    pub fn is_packet_end(&self) -> bool {
        self.len_flags_type.get() & TX_BD_FLAGS_PACKET_END != 0
    }
}

/// The extension BD that always follows the first [`TxBd`] of a packet.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct TxBdExt {
    pub hsize_lflags:       Le32,
    pub kid_mss:            Le32,
    pub cfa_action:         Le32,
    pub cfa_meta:           Le32,
}

const_assert_eq!(core::mem::size_of::<TxBdExt>(), 16);

impl TxBdExt {
    pub fn lflags(&self) -> u32 {
        self.hsize_lflags.get().get_bits(0..16)
    }

    /// The header length in bytes (the field holds it in 2-byte units).
    pub fn hdr_len(&self) -> u32 {
        (self.hsize_lflags.get() >> TX_BD_HSIZE_SHIFT) * 2
    }

    pub fn mss(&self) -> u32 {
        self.kid_mss.get() & TX_BD_MSS_MASK
    }

    /// Returns the VLAN TCI if the metadata carries a VLAN tag.
    pub fn vlan_tci(&self) -> Option<u16> {
        let meta = self.cfa_meta.get();
        if meta & TX_BD_CFA_META_KEY_VLAN != 0 {
            Some(meta.get_bits(0..16) as u16)
        } else {
            None
        }
    }
}

/// The optional BD that carries a launch time for scheduled transmit.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct TxBdTimed {
    pub flags_type:         Le32,
    pub rsvd:               Le32,
    pub tx_time:            Le64,
}

const_assert_eq!(core::mem::size_of::<TxBdTimed>(), 16);

/// The doorbell record and BDs that precede inline packet data in a legacy push.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct TxPushBd {
    pub doorbell:           Le32,
    pub len_flags_type:     Le32,
    pub opaque:             Le32,
    pub rsvd:               Le32,
    pub ext:                TxBdExt,
}

const_assert_eq!(core::mem::size_of::<TxPushBd>(), 32);
