//! Asynchronous event identifiers and their payload encodings.
//!
//! Firmware delivers these as [`HwrmAsyncEventCmp`](crate::cmpl::HwrmAsyncEventCmp) records on the
//! completion ring the driver designated as the async event ring.

use num_enum::TryFromPrimitive;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u16)]
pub enum AsyncEventId {
    LinkStatusChange        = 0x00,
    LinkMtuChange           = 0x01,
    LinkSpeedChange         = 0x02,
    PortConnNotAllowed      = 0x04,
    LinkSpeedCfgChange      = 0x06,
    PortPhyCfgChange        = 0x07,
    ResetNotify             = 0x08,
    ErrorRecovery           = 0x09,
    VfFlr                   = 0x30,
    VfCfgChange             = 0x33,
    DebugNotification       = 0x37,
    DeferredResponse        = 0x40,
    EchoRequest             = 0x42,
    PhcUpdate               = 0x43,
    PpsTimestamp            = 0x44,
    ErrorReport             = 0x45,
    DoorbellPacingThreshold = 0x46,
    UdccSessionChange       = 0x47,
    DbgBufProducer          = 0x4c,
}

impl AsyncEventId {
    /// All event ids the driver asks firmware to forward in `FUNC_DRV_RGTR`.
    pub const ALL: [AsyncEventId; 19] = [
        AsyncEventId::LinkStatusChange,
        AsyncEventId::LinkMtuChange,
        AsyncEventId::LinkSpeedChange,
        AsyncEventId::PortConnNotAllowed,
        AsyncEventId::LinkSpeedCfgChange,
        AsyncEventId::PortPhyCfgChange,
        AsyncEventId::ResetNotify,
        AsyncEventId::ErrorRecovery,
        AsyncEventId::VfFlr,
        AsyncEventId::VfCfgChange,
        AsyncEventId::DebugNotification,
        AsyncEventId::DeferredResponse,
        AsyncEventId::EchoRequest,
        AsyncEventId::PhcUpdate,
        AsyncEventId::PpsTimestamp,
        AsyncEventId::ErrorReport,
        AsyncEventId::DoorbellPacingThreshold,
        AsyncEventId::UdccSessionChange,
        AsyncEventId::DbgBufProducer,
    ];
}

pub const LINK_STATUS_DATA1_LINK_UP:            u32 = 1 << 0;

pub const RESET_NOTIFY_DATA1_DRIVER_ACTION_MASK:    u32 = 0xff;
pub const RESET_NOTIFY_DRIVER_STOP_TX:              u32 = 0x1;
pub const RESET_NOTIFY_DRIVER_IFDOWN:               u32 = 0x2;
pub const RESET_NOTIFY_DATA1_REASON_SHIFT:          u32 = 8;
pub const RESET_NOTIFY_DATA1_REASON_MASK:           u32 = 0xff << 8;
pub const RESET_NOTIFY_REASON_MGMT_RESET:           u32 = 0x1;
pub const RESET_NOTIFY_REASON_FW_EXCEPTION_FATAL:   u32 = 0x2;
pub const RESET_NOTIFY_REASON_FW_EXCEPTION_NON_FATAL: u32 = 0x3;
pub const RESET_NOTIFY_REASON_FAST_RESET:           u32 = 0x4;
pub const RESET_NOTIFY_REASON_FW_ACTIVATION:        u32 = 0x5;
/// `event_data2` carries the minimum wait in bits 0..16 and the maximum wait in bits 16..32,
/// both in units of 100ms.
pub const RESET_NOTIFY_DATA2_MIN_DSECS_MASK:        u32 = 0xffff;
pub const RESET_NOTIFY_DATA2_MAX_DSECS_SHIFT:       u32 = 16;

pub const ERROR_RECOVERY_DATA1_MASTER_FUNC:         u32 = 1 << 0;
pub const ERROR_RECOVERY_DATA1_RECOVERY_ENABLED:    u32 = 1 << 1;

pub const DEFERRED_RESPONSE_DATA1_SEQ_ID_MASK:      u32 = 0xffff;

pub const PHC_UPDATE_DATA1_FLAGS_MASK:              u32 = 0xf;
pub const PHC_UPDATE_FLAGS_PHC_MASTER:              u32 = 0x1;
pub const PHC_UPDATE_FLAGS_PHC_SECONDARY:           u32 = 0x2;
pub const PHC_UPDATE_FLAGS_PHC_FAILOVER:            u32 = 0x3;
pub const PHC_UPDATE_FLAGS_PHC_RTC_UPDATE:          u32 = 0x4;

pub const ERROR_REPORT_DATA1_TYPE_MASK:             u32 = 0xff;

/// Subtypes of [`AsyncEventId::ErrorReport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ErrorReportType {
    PauseStorm          = 0x1,
    InvalidSignal       = 0x2,
    Nvm                 = 0x3,
    DoorbellDrop        = 0x4,
    ThermalEvent        = 0x5,
    DualDataRate        = 0x6,
}

pub const DBR_THRESHOLD_DATA1_EPOCH_MASK:           u32 = 0x00ff_ffff;

pub const DBG_BUF_PRODUCER_DATA1_TYPE_MASK:         u32 = 0xffff;
