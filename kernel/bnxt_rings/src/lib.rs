//! The rings of a bnxt NIC, as seen from the host.
//!
//! Every ring lives in DMA-coherent [`RingMem`] made of 4 KiB pages, described to firmware
//! either by a direct pointer or by a page table. The host publishes new producer or
//! consumer indices through a [`Doorbell`], and small packets can be pushed straight
//! through the doorbell window with a [`PushBuffer`].
//!
//! On top of that memory this crate keeps the software side of each ring:
//! * [`TxRing`]: the BD ring and its shadow array of in-flight packets,
//! * [`RxRing`]: the RX BD ring, its optional aggregation (AGG) ring, their posted buffers,
//!   and the [`TpaTable`] of open hardware aggregations,
//! * [`CpRing`]: a completion ring or notification queue, read by the poll loop.
//!
//! None of these types talk to firmware; allocating and binding rings through HWRM is
//! done by the `bnxt` crate, which then hands each ring its firmware id and doorbell.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate spin;
extern crate bit_field;
extern crate zerocopy;
extern crate nic_hal;
extern crate nic_buffers;
extern crate bnxt_hsi;

mod mem;
mod doorbell;
mod tx;
mod rx;
mod cp;
mod tpa;

#[cfg(test)]
mod test;

pub use mem::{RingMem, InitPattern};
pub use doorbell::{Doorbell, DbKind, PushMode, PushBuffer, PUSH_THRESH_LEGACY, PUSH_THRESH_WCB};
pub use tx::{TxRing, TxSoftDesc, tx_opaque, tx_opaque_idx, tx_opaque_bds, tx_opaque_napi};
pub use rx::{RxRing, RxRingParams};
pub use cp::{CpRing, CpKind};
pub use tpa::{TpaTable, TpaInfo, AggIdMap, MAX_TPA_HW};

use core::fmt;

/// The number of descriptor slots in one ring page.
pub const DESC_PER_PAGE: usize = bnxt_hsi::BNXT_PAGE_SIZE / DESC_SIZE;
/// Every descriptor and completion slot is 16 bytes.
pub const DESC_SIZE: usize = 16;

/// Possible reasons for failure when creating or sizing a ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingError {
    /// DMA memory for the ring or its buffers could not be allocated.
    OutOfMemory,
    /// The requested ring size is zero, not a power of two, or too large.
    InvalidSize,
}

impl From<RingError> for &'static str {
    fn from(error: RingError) -> Self {
        match error {
            RingError::OutOfMemory => "Failed to allocate ring memory",
            RingError::InvalidSize => "Invalid ring size",
        }
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(<&'static str>::from(*self))
    }
}

/// Rounds a requested ring size up to a power of two, which is all firmware accepts.
pub fn ring_size(requested: usize, max: usize) -> Result<usize, RingError> {
    let size = requested.checked_next_power_of_two().ok_or(RingError::InvalidSize)?;
    if requested == 0 || size > max {
        return Err(RingError::InvalidSize);
    }
    Ok(size)
}
