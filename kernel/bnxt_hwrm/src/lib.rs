//! The HWRM channel: the synchronous request/response mailbox between the bnxt driver
//! and the NIC firmware.
//!
//! A request is built in host memory, copied into the BAR0 request window (or, when it does
//! not fit, referenced from the window through a short command), and kicked off by a write
//! to the trigger register. Firmware DMAs its response back into host memory, writing the
//! `valid` byte last. Only one request is in the mailbox at any time.
//!
//! ```ignore
//! let mut req = channel.req_init::<FuncQcfgInput>()?;
//! req.req.fid = Le16::new(0xffff);
//! let resp = req.send()?;
//! ```

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate spin;
extern crate zerocopy;
extern crate nic_hal;
extern crate bnxt_hsi;

mod channel;
mod request;

#[cfg(test)]
mod test;

pub use channel::{HwrmChannel, HwrmCaps, HwrmToken, TokenState};
pub use request::HwrmRequest;

use core::fmt;

/// Size of the DMA buffer backing each request: the request itself, then its response.
pub const HWRM_DMA_SIZE:            usize = 4096;
/// Offset of the response within a request's DMA buffer.
pub const HWRM_RESP_OFFSET:         usize = 2048;
/// The largest request body a DMA buffer can carry.
pub const HWRM_MAX_DMA_REQ_LEN:     usize = HWRM_RESP_OFFSET;
/// The largest response a DMA buffer can receive.
pub const HWRM_MAX_DMA_RESP_LEN:    usize = HWRM_DMA_SIZE - HWRM_RESP_OFFSET;

/// Length of the request header that precedes every request body.
pub const HWRM_HDR_LEN:             usize = 16;
/// Length of the response header that precedes every response body.
pub const HWRM_OUT_HDR_LEN:         usize = 8;
/// Offset of `resp_len` within the response header.
pub const HWRM_RESP_LEN_OFFSET:     usize = 6;

/// The default request timeout until firmware reports its own, in milliseconds.
pub const DFLT_HWRM_CMD_TIMEOUT_MS: u32 = 20_000;
/// The cap on any request timeout, in milliseconds.
pub const HWRM_CMD_MAX_TIMEOUT_MS:  u32 = 40_000;
/// The number of fast polls before the channel starts sleeping between polls.
pub const HWRM_SHORT_POLLS:         u32 = 20;
pub const HWRM_SHORT_POLL_US:       u64 = 3;
pub const HWRM_POLL_US:             u64 = 1000;
/// The number of request buffers kept around for reuse.
pub const HWRM_POOL_SIZE:           usize = 8;

/// Possible reasons for failure when executing a firmware request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwrmError {
    /// Firmware did not respond within the request's timeout.
    Timeout,
    /// The channel was cancelled, e.g., because the device is being reset.
    Cancelled,
    /// Firmware completed the request with a nonzero status.
    FirmwareStatus(u16),
    /// The response did not match the request.
    InvalidResponse,
    /// A DMA buffer for the request could not be allocated.
    NoBuffer,
    /// The request is larger than firmware accepts.
    TooLarge,
    /// The device is not accessible.
    ChannelDown,
}

impl HwrmError {
    /// Returns the firmware status code, if this error carries one.
    pub fn firmware_status(&self) -> Option<u16> {
        match self {
            HwrmError::FirmwareStatus(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<HwrmError> for &'static str {
    fn from(error: HwrmError) -> Self {
        match error {
            HwrmError::Timeout => "HWRM request timed out",
            HwrmError::Cancelled => "HWRM channel was cancelled",
            HwrmError::FirmwareStatus(_) => "HWRM request failed in firmware",
            HwrmError::InvalidResponse => "HWRM response did not match its request",
            HwrmError::NoBuffer => "Failed to allocate an HWRM DMA buffer",
            HwrmError::TooLarge => "HWRM request exceeds the firmware request length",
            HwrmError::ChannelDown => "HWRM channel is down",
        }
    }
}

impl fmt::Display for HwrmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HwrmError::FirmwareStatus(code) => write!(f, "HWRM request failed with firmware status {:#x}", code),
            other => f.write_str(<&'static str>::from(*other)),
        }
    }
}
