//! Receive buffer descriptors, posted to RX rings and aggregation (AGG) rings.

use zerocopy::{AsBytes, FromBytes, FromZeroes};
use crate::{Le32, Le64};

pub const RX_BD_TYPE_RX_PACKET_BD:      u32 = 0x4;
pub const RX_BD_TYPE_RX_BUFFER_BD:      u32 = 0x5;
pub const RX_BD_TYPE_RX_AGG_BD:         u32 = 0x6;

pub const RX_BD_FLAGS_SOP:              u32 = 1 << 6;
pub const RX_BD_FLAGS_EOP:              u32 = 1 << 7;
pub const RX_BD_LEN_SHIFT:              u32 = 16;

/// An RX or AGG buffer descriptor.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct RxBd {
    pub len_flags_type:     Le32,
    pub opaque:             Le32,
    pub haddr:              Le64,
}

const_assert_eq!(core::mem::size_of::<RxBd>(), 16);

impl RxBd {
    /// Returns the length/flags/type word that every BD of a ring shares,
    /// which is written once when the ring is initialized.
    pub fn len_flags_type_for(bd_type: u32, buf_size: u32) -> u32 {
        (buf_size << RX_BD_LEN_SHIFT) | bd_type | RX_BD_FLAGS_SOP | RX_BD_FLAGS_EOP
    }

    pub fn buf_len(&self) -> u32 {
        self.len_flags_type.get() >> RX_BD_LEN_SHIFT
    }
}
