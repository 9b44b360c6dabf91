//! Doorbell encodings.
//!
//! P5 and newer chips take a single 64-bit doorbell per update: the upper 32 bits are a per-ring
//! key (path, type, valid bit and ring id, the "xid") and the lower 32 bits carry the index,
//! plus the epoch and toggle bits on P7 chips. Older P4 chips take 32-bit doorbells whose key
//! lives in the top nibble, written to a per-ring doorbell cell.

pub const DBR_INDEX_MASK:       u64 = 0x00ff_ffff;
pub const DBR_EPOCH_SHIFT:      u32 = 24;
pub const DBR_EPOCH_MASK:       u64 = 1 << 24;
pub const DBR_TOGGLE_SHIFT:     u32 = 25;
pub const DBR_TOGGLE_MASK:      u64 = 0x3 << 25;
pub const DBR_XID_SHIFT:        u32 = 32;
pub const DBR_XID_MASK:         u64 = 0xfffff << 32;
pub const DBR_PATH_L2:          u64 = 1 << 56;
pub const DBR_VALID:            u64 = 1 << 58;
pub const DBR_TYPE_SHIFT:       u32 = 60;
pub const DBR_TYPE_MASK:        u64 = 0xf << 60;

pub const DBR_TYPE_SQ:          u64 = 0x0 << 60;
pub const DBR_TYPE_RQ:          u64 = 0x1 << 60;
pub const DBR_TYPE_SRQ:         u64 = 0x2 << 60;
pub const DBR_TYPE_SRQ_ARM:     u64 = 0x3 << 60;
pub const DBR_TYPE_CQ:          u64 = 0x4 << 60;
pub const DBR_TYPE_CQ_ARMSE:    u64 = 0x5 << 60;
pub const DBR_TYPE_CQ_ARMALL:   u64 = 0x6 << 60;
pub const DBR_TYPE_CQ_ARMENA:   u64 = 0x7 << 60;
pub const DBR_TYPE_NQ:          u64 = 0xa << 60;
pub const DBR_TYPE_NQ_ARM:      u64 = 0xb << 60;
pub const DBR_TYPE_PUSH_START:  u64 = 0xc << 60;
pub const DBR_TYPE_PUSH_END:    u64 = 0xd << 60;
pub const DBR_TYPE_NQ_MASK:     u64 = 0xe << 60;
pub const DBR_TYPE_NULL:        u64 = 0xf << 60;

/// Builds the 64-bit key of a ring: path, type, valid bit and ring id.
pub fn db_key64(db_type: u64, xid: u32) -> u64 {
    DBR_PATH_L2 | db_type | DBR_VALID | ((xid as u64) << DBR_XID_SHIFT & DBR_XID_MASK)
}

/// Replaces the type of an existing 64-bit key.
pub fn db_key64_with_type(key: u64, db_type: u64) -> u64 {
    (key & !DBR_TYPE_MASK) | db_type
}

/// Extracts the type of a 64-bit doorbell.
pub fn db_type64(value: u64) -> u64 {
    value & DBR_TYPE_MASK
}

/// Extracts the ring id of a 64-bit doorbell.
pub fn db_xid64(value: u64) -> u32 {
    ((value & DBR_XID_MASK) >> DBR_XID_SHIFT) as u32
}

/// Extracts the index of a 64-bit doorbell.
pub fn db_index64(value: u64) -> u32 {
    (value & DBR_INDEX_MASK) as u32
}

pub const DB_IDX_MASK:          u32 = 0x00ff_ffff;
pub const DB_IDX_VALID:         u32 = 1 << 26;
pub const DB_IRQ_DIS:           u32 = 1 << 27;
pub const DB_KEY_TX:            u32 = 0x0 << 28;
pub const DB_KEY_RX:            u32 = 0x1 << 28;
pub const DB_KEY_CP:            u32 = 0x2 << 28;
pub const DB_KEY_ST:            u32 = 0x3 << 28;
pub const DB_KEY_TX_PUSH:       u32 = 0x4 << 28;
pub const DB_LONG_TX_PUSH:      u32 = 0x2 << 24;
pub const DB_KEY_MASK:          u32 = 0xf << 28;

/// The spacing between the per-ring doorbell cells of a P4 chip, in BAR1.
pub const DB_LEGACY_STRIDE:     usize = 0x80;
/// The offset of the 64-bit doorbell page of a P5+ physical function, in BAR1.
pub const DB_PF_OFFSET_P5:      usize = 0x10000;
/// The offset of the 64-bit doorbell page of a P5+ virtual function, in BAR1.
pub const DB_VF_OFFSET_P5:      usize = 0x4000;

/// The size of one WCB/PPP push window in BAR2.
pub const DB_PUSH_PAGE_SIZE:    usize = 0x1000;
/// The size of each half of a ping-pong push page.
pub const DB_PPP_SIZE:          usize = 0x800;
