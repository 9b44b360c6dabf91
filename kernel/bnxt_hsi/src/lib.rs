//! This crate defines the layout of memory objects that make up the hardware/software interface (HSI)
//! between Broadcom NetXtreme-C/E (bnxt) NICs and their driver, as well as helpers to access their fields.
//!
//! Three groups of objects live here:
//! * the descriptor rings shared with the NIC: transmit and receive buffer descriptors ([`tx`], [`rx`]),
//!   completion records ([`cmpl`]) and the page tables that describe multi-page rings,
//! * the doorbell encodings used to publish ring indices to the NIC ([`db`]),
//! * the firmware command (HWRM) messages and asynchronous events ([`hwrm`], [`event`]).
//!
//! All multi-byte fields are little-endian on the wire, so every layout is built from
//! the [`Le16`], [`Le32`] and [`Le64`] types, which also makes every layout byte-aligned.

#![no_std]

#[macro_use] extern crate static_assertions;
extern crate zerocopy;
extern crate num_enum;
extern crate bit_field;

pub mod tx;
pub mod rx;
pub mod cmpl;
pub mod db;
pub mod event;
pub mod hwrm;

#[cfg(test)]
mod test;

use zerocopy::{AsBytes, FromBytes, FromZeroes};
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};

pub type Le16 = U16<LittleEndian>;
pub type Le32 = U32<LittleEndian>;
pub type Le64 = U64<LittleEndian>;

/// The page size the NIC uses for ring memory, independent of the host page size.
pub const BNXT_PAGE_SHIFT: u32 = 12;
pub const BNXT_PAGE_SIZE: usize = 1 << BNXT_PAGE_SHIFT;

/// Page table entry flags, encoded in the low bits of each 64-bit page address.
pub const PTU_PTE_VALID:            u64 = 0x1;
pub const PTU_PTE_LAST:             u64 = 0x2;
pub const PTU_PTE_NEXT_TO_LAST:     u64 = 0x4;

/// The maximum number of pages a single-level page table can describe.
pub const MAX_CTX_PAGES: usize = BNXT_PAGE_SIZE / 8;
/// The maximum number of pages a two-level page table can describe.
pub const MAX_CTX_TOTAL_PAGES: usize = MAX_CTX_PAGES * MAX_CTX_PAGES;

/// Encodes a page table entry for the page at `addr`.
///
/// # Arguments
/// * `addr`: the bus address of the page, which must be page-aligned.
/// * `index`: the position of this page within the table.
/// * `count`: the total number of pages described by the table.
pub fn pte(addr: u64, index: usize, count: usize) -> u64 {
    let mut entry = addr | PTU_PTE_VALID;
    if index + 1 == count {
        entry |= PTU_PTE_LAST;
    } else if index + 2 == count {
        entry |= PTU_PTE_NEXT_TO_LAST;
    }
    entry
}

/// The generations of bnxt silicon, which differ in their doorbell format and ring topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChipKind {
    /// 5730x/5740x: 32-bit doorbells, no notification queues, ring groups.
    P4,
    /// 5750x: notification queues and 64-bit doorbells.
    P5,
    /// 5760x: like P5, plus doorbell epoch/toggle bits and WCB/PPP push.
    P7,
}

impl ChipKind {
    /// Classifies a chip by the `chip_num` reported in `VER_GET`.
    pub fn from_chip_num(chip_num: u16) -> ChipKind {
        match chip_num {
            CHIP_NUM_57508 | CHIP_NUM_57504 | CHIP_NUM_57502 => ChipKind::P5,
            CHIP_NUM_57608 => ChipKind::P7,
            _ => ChipKind::P4,
        }
    }

    /// Returns true if this chip uses notification queues and 64-bit doorbells.
    pub fn is_p5_plus(self) -> bool {
        self >= ChipKind::P5
    }

    /// Returns true if this chip carries epoch and toggle bits in its doorbells.
    pub fn is_p7(self) -> bool {
        self == ChipKind::P7
    }
}

pub const CHIP_NUM_57301:   u16 = 0x16c8;
pub const CHIP_NUM_57414:   u16 = 0x16d7;
pub const CHIP_NUM_57508:   u16 = 0x1750;
pub const CHIP_NUM_57504:   u16 = 0x1751;
pub const CHIP_NUM_57502:   u16 = 0x1752;
pub const CHIP_NUM_57608:   u16 = 0x1760;

/// PCI device IDs of virtual functions.
pub const VF_DEVICE_IDS: [u16; 9] = [0x16c1, 0x16cb, 0x16d3, 0x16dc, 0x1806, 0x1807, 0x1808, 0x1809, 0x1819];

/// Returns true if `device_id` belongs to a virtual function.
pub fn is_vf_device(device_id: u16) -> bool {
    VF_DEVICE_IDS.contains(&device_id)
}

/// Per-context hardware statistics that firmware DMAs into host memory.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct CtxHwStats {
    pub rx_ucast_pkts:      Le64,
    pub rx_mcast_pkts:      Le64,
    pub rx_bcast_pkts:      Le64,
    pub rx_discard_pkts:    Le64,
    pub rx_error_pkts:      Le64,
    pub rx_ucast_bytes:     Le64,
    pub rx_mcast_bytes:     Le64,
    pub rx_bcast_bytes:     Le64,
    pub tx_ucast_pkts:      Le64,
    pub tx_mcast_pkts:      Le64,
    pub tx_bcast_pkts:      Le64,
    pub tx_error_pkts:      Le64,
    pub tx_discard_pkts:    Le64,
    pub tx_ucast_bytes:     Le64,
    pub tx_mcast_bytes:     Le64,
    pub tx_bcast_bytes:     Le64,
    pub tpa_pkts:           Le64,
    pub tpa_bytes:          Le64,
    pub tpa_events:         Le64,
    pub tpa_aborts:         Le64,
}

const_assert_eq!(core::mem::size_of::<CtxHwStats>(), 160);

