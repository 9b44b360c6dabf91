//! The errors returned by the control plane of a bnxt device.

use core::fmt;
use bnxt_hsi::hwrm::*;
use bnxt_hwrm::HwrmError;
use bnxt_rings::RingError;

pub const EIO:       i32 = 5;
pub const EAGAIN:    i32 = 11;
pub const ENOMEM:    i32 = 12;
pub const EACCES:    i32 = 13;
pub const EBUSY:     i32 = 16;
pub const ENODEV:    i32 = 19;
pub const EINVAL:    i32 = 22;
pub const ENOSPC:    i32 = 28;
pub const EOPNOTSUPP: i32 = 95;
pub const ETIMEDOUT: i32 = 110;

/// Possible reasons for failure of a bnxt control operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BnxtError {
    /// Firmware granted fewer rings, contexts or filters than needed.
    ResourceExhausted,
    /// A buffer could not be mapped for DMA.
    DmaMappingFailed,
    /// A ring's consumer index did not match what the driver expected.
    RingCorruption,
    /// A firmware command timed out.
    HwrmTimeout,
    /// Firmware stopped responding or crashed; the device is being reset.
    FirmwareFatal,
    /// The NIC reported a buffer error on a received packet.
    BufferError,
    /// Firmware sent an async event the driver does not know.
    AsyncEventUnknown,
    /// The operation cannot run right now; retry later.
    Busy,
    /// The device is gone, or is being reset.
    NoDevice,
    /// An argument was out of the range the device supports.
    InvalidArgument,
    /// Host memory could not be allocated.
    OutOfMemory,
    /// A generic I/O failure.
    Io,
    /// The device does not support the operation.
    NotSupported,
    /// A firmware command failed.
    Hwrm(HwrmError),
}

impl BnxtError {
    /// The negative errno value reported for this error.
    pub fn to_errno(self) -> i32 {
        -match self {
            BnxtError::ResourceExhausted => ENOSPC,
            BnxtError::DmaMappingFailed  => ENOMEM,
            BnxtError::RingCorruption    => EIO,
            BnxtError::HwrmTimeout       => ETIMEDOUT,
            BnxtError::FirmwareFatal     => ENODEV,
            BnxtError::BufferError       => EIO,
            BnxtError::AsyncEventUnknown => EINVAL,
            BnxtError::Busy              => EBUSY,
            BnxtError::NoDevice          => ENODEV,
            BnxtError::InvalidArgument   => EINVAL,
            BnxtError::OutOfMemory       => ENOMEM,
            BnxtError::Io                => EIO,
            BnxtError::NotSupported      => EOPNOTSUPP,
            BnxtError::Hwrm(e) => match e {
                HwrmError::Timeout => ETIMEDOUT,
                HwrmError::Cancelled | HwrmError::ChannelDown => EIO,
                HwrmError::NoBuffer => ENOMEM,
                HwrmError::TooLarge | HwrmError::InvalidResponse => EINVAL,
                HwrmError::FirmwareStatus(code) => match code {
                    HWRM_ERR_CODE_RESOURCE_ACCESS_DENIED => EACCES,
                    HWRM_ERR_CODE_RESOURCE_ALLOC_ERROR => ENOSPC,
                    HWRM_ERR_CODE_INVALID_PARAMS
                    | HWRM_ERR_CODE_INVALID_FLAGS
                    | HWRM_ERR_CODE_INVALID_ENABLES => EINVAL,
                    HWRM_ERR_CODE_NO_BUFFER => ENOMEM,
                    HWRM_ERR_CODE_HOT_RESET_PROGRESS | HWRM_ERR_CODE_BUSY => EAGAIN,
                    HWRM_ERR_CODE_CMD_NOT_SUPPORTED => EOPNOTSUPP,
                    _ => EIO,
                },
            },
        }
    }

    /// The firmware status code, if this error carries one.
    pub fn firmware_status(self) -> Option<u16> {
        match self {
            BnxtError::Hwrm(HwrmError::FirmwareStatus(code)) => Some(code),
            _ => None,
        }
    }
}

impl From<HwrmError> for BnxtError {
    fn from(e: HwrmError) -> Self {
        match e {
            HwrmError::Timeout => BnxtError::HwrmTimeout,
            e => BnxtError::Hwrm(e),
        }
    }
}

impl From<RingError> for BnxtError {
    fn from(e: RingError) -> Self {
        match e {
            RingError::OutOfMemory => BnxtError::OutOfMemory,
            RingError::InvalidSize => BnxtError::InvalidArgument,
        }
    }
}

impl From<BnxtError> for &'static str {
    fn from(error: BnxtError) -> Self {
        match error {
            BnxtError::ResourceExhausted => "Firmware did not grant enough resources",
            BnxtError::DmaMappingFailed  => "DMA mapping failed",
            BnxtError::RingCorruption    => "Ring state is inconsistent",
            BnxtError::HwrmTimeout       => "Firmware command timed out",
            BnxtError::FirmwareFatal     => "Firmware is in a fatal state",
            BnxtError::BufferError       => "NIC reported a receive buffer error",
            BnxtError::AsyncEventUnknown => "Unknown async event",
            BnxtError::Busy              => "Device is busy",
            BnxtError::NoDevice          => "Device is not available",
            BnxtError::InvalidArgument   => "Invalid argument",
            BnxtError::OutOfMemory       => "Out of memory",
            BnxtError::Io                => "I/O error",
            BnxtError::NotSupported      => "Operation not supported",
            BnxtError::Hwrm(e)           => e.into(),
        }
    }
}

impl fmt::Display for BnxtError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BnxtError::Hwrm(HwrmError::FirmwareStatus(code)) => write!(f, "Firmware command failed with status {:#x}", code),
            _ => f.write_str(<&'static str>::from(*self)),
        }
    }
}
