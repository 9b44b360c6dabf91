//! Firmware async events and the deferred work they schedule.
//!
//! Events arrive as completions in the poll loop. Most only set a bit in the device's
//! sp-event mask for [`Bnxt::sp_task()`] to act on; the few that cannot wait are
//! handled inline.

use core::convert::TryFrom;
use core::sync::atomic::Ordering;
use alloc::vec::Vec;
use bnxt_hsi::cmpl::HwrmAsyncEventCmp;
use bnxt_hsi::event::*;
use bnxt_hsi::hwrm::FuncEchoResponseInput;
use bnxt_hsi::Le32;
use crate::{Bnxt, BnxtError, DevState};

bitflags! {
    /// Work queued for [`Bnxt::sp_task()`].
    pub struct SpEvents: u32 {
        const LINK_CHNG             = 1 << 0;
        const LINK_SPEED_CFG        = 1 << 1;
        const PORT_CONN_NOT_ALLOWED = 1 << 2;
        const PHY_CFG_CHANGE        = 1 << 3;
        const VF_CFG_CHNG           = 1 << 4;
        const FW_RESET_NOTIFY       = 1 << 5;
        const FW_EXCEPTION          = 1 << 6;
        const ECHO_REQUEST          = 1 << 7;
        const DBR_RECOVERY          = 1 << 8;
        const RESET_RING            = 1 << 9;
        const DIM                   = 1 << 10;
        const ERR_REPORT            = 1 << 11;
        const PHC_UPDATE            = 1 << 12;
        const UDCC_SESSION          = 1 << 13;
    }
}

/// Data that events hand to the sp task.
#[derive(Default)]
pub(crate) struct PendingWork {
    pub echo: Option<(u32, u32)>,
    pub err_reports: Vec<ErrorReportType>,
    /// RX rings to re-initialize.
    pub rx_ring_resets: Vec<u16>,
    /// A TX ring faulted, which only a full close and open recovers from.
    pub tx_fault: bool,
    pub phc_flags: u32,
    /// Producer offsets reported by debug buffer events, by buffer type.
    pub dbg_buf_prod: Vec<(u16, u32)>,
}

impl Bnxt {
    pub(crate) fn queue_sp_event(&self, events: SpEvents) {
        self.sp_events.fetch_or(events.bits(), Ordering::AcqRel);
    }

    /// The sp-event bits that are queued.
    pub fn pending_sp_events(&self) -> SpEvents {
        SpEvents::from_bits_truncate(self.sp_events.load(Ordering::Acquire))
    }

    /// Handles an async event completion from the poll loop.
    pub(crate) fn async_event(&self, cmpl: &HwrmAsyncEventCmp) {
        let id = cmpl.event_id.get();
        let data1 = cmpl.event_data1.get();
        let data2 = cmpl.event_data2.get();
        let event = match AsyncEventId::try_from(id) {
            Ok(event) => event,
            Err(_) => {
                debug!("bnxt: {} {:#x}", <&'static str>::from(BnxtError::AsyncEventUnknown), id);
                return;
            }
        };
        trace!("bnxt: async event {:?} data1 {:#x} data2 {:#x}", event, data1, data2);

        let sp = match event {
            AsyncEventId::LinkStatusChange => {
                self.link_up.store(data1 & LINK_STATUS_DATA1_LINK_UP != 0, Ordering::Release);
                SpEvents::LINK_CHNG
            }
            AsyncEventId::LinkMtuChange => {
                info!("bnxt: link MTU changed to {}", data1 & 0xffff);
                return;
            }
            AsyncEventId::LinkSpeedChange | AsyncEventId::LinkSpeedCfgChange => SpEvents::LINK_SPEED_CFG,
            AsyncEventId::PortConnNotAllowed => SpEvents::PORT_CONN_NOT_ALLOWED,
            AsyncEventId::PortPhyCfgChange => SpEvents::PHY_CFG_CHANGE,
            AsyncEventId::ResetNotify => {
                self.reset_notify(data1, data2);
                SpEvents::FW_RESET_NOTIFY
            }
            AsyncEventId::ErrorRecovery => {
                self.error_recovery_event(data1);
                return;
            }
            AsyncEventId::VfFlr | AsyncEventId::VfCfgChange => SpEvents::VF_CFG_CHNG,
            AsyncEventId::DebugNotification => {
                debug!("bnxt: firmware debug notification {:#x} {:#x}", data1, data2);
                return;
            }
            AsyncEventId::DeferredResponse => {
                self.hwrm.on_deferred((data1 & DEFERRED_RESPONSE_DATA1_SEQ_ID_MASK) as u16);
                return;
            }
            AsyncEventId::EchoRequest => {
                self.pending.lock().echo = Some((data1, data2));
                SpEvents::ECHO_REQUEST
            }
            AsyncEventId::PhcUpdate => {
                self.pending.lock().phc_flags = data1 & PHC_UPDATE_DATA1_FLAGS_MASK;
                SpEvents::PHC_UPDATE
            }
            AsyncEventId::PpsTimestamp => {
                trace!("bnxt: PPS timestamp {:#x}:{:#x}", data2, data1);
                return;
            }
            AsyncEventId::ErrorReport => {
                let raw = (data1 & ERROR_REPORT_DATA1_TYPE_MASK) as u8;
                match ErrorReportType::try_from(raw) {
                    Ok(kind) => self.pending.lock().err_reports.push(kind),
                    Err(_) => {
                        warn!("bnxt: unknown error report type {}", raw);
                        return;
                    }
                }
                SpEvents::ERR_REPORT
            }
            AsyncEventId::DoorbellPacingThreshold => {
                self.dbr_event(data1 & DBR_THRESHOLD_DATA1_EPOCH_MASK);
                SpEvents::DBR_RECOVERY
            }
            AsyncEventId::UdccSessionChange => SpEvents::UDCC_SESSION,
            AsyncEventId::DbgBufProducer => {
                let kind = (data1 & DBG_BUF_PRODUCER_DATA1_TYPE_MASK) as u16;
                let mut pending = self.pending.lock();
                match pending.dbg_buf_prod.iter_mut().find(|(k, _)| *k == kind) {
                    Some(entry) => entry.1 = data2,
                    None => pending.dbg_buf_prod.push((kind, data2)),
                }
                return;
            }
        };
        self.queue_sp_event(sp);
    }

    /// Records what a `RESET_NOTIFY` event says about the coming reset.
    fn reset_notify(&self, data1: u32, data2: u32) {
        let reason = (data1 & RESET_NOTIFY_DATA1_REASON_MASK) >> RESET_NOTIFY_DATA1_REASON_SHIFT;
        let min_dsecs = data2 & RESET_NOTIFY_DATA2_MIN_DSECS_MASK;
        let max_dsecs = data2 >> RESET_NOTIFY_DATA2_MAX_DSECS_SHIFT;
        self.set_reset_window(min_dsecs, max_dsecs);
        if reason == RESET_NOTIFY_REASON_FW_EXCEPTION_FATAL {
            warn!("bnxt: firmware fatal reset event received");
            self.set_state(DevState::FW_FATAL_COND);
        } else {
            info!("bnxt: firmware reset event received (reason {})", reason);
            self.set_state(DevState::FW_NON_FATAL_COND);
        }
    }

    /// Runs the work queued by events, the timer and the datapath.
    pub fn sp_task(&self) {
        let events = SpEvents::from_bits_truncate(self.sp_events.swap(0, Ordering::AcqRel));
        if events.is_empty() {
            return;
        }
        trace!("bnxt: sp task {:?}", events);

        if events.intersects(SpEvents::LINK_CHNG | SpEvents::LINK_SPEED_CFG | SpEvents::PHY_CFG_CHANGE) {
            info!("bnxt: link is {}", if self.link_up() { "up" } else { "down" });
        }
        if events.contains(SpEvents::PORT_CONN_NOT_ALLOWED) {
            warn!("bnxt: the attached module is not supported by this port");
        }
        if events.contains(SpEvents::VF_CFG_CHNG) {
            debug!("bnxt: VF configuration changed");
        }
        if events.contains(SpEvents::ECHO_REQUEST) {
            self.echo_response();
        }
        if events.contains(SpEvents::ERR_REPORT) {
            let reports = core::mem::take(&mut self.pending.lock().err_reports);
            for report in reports {
                self.error_report(report);
            }
        }
        if events.contains(SpEvents::PHC_UPDATE) {
            debug!("bnxt: PHC update, flags {:#x}", self.pending.lock().phc_flags);
        }
        if events.contains(SpEvents::UDCC_SESSION) {
            debug!("bnxt: UDCC session changed");
        }
        if events.contains(SpEvents::DBR_RECOVERY) {
            self.dbr_recover();
        }
        if events.contains(SpEvents::DIM) {
            self.apply_dim();
        }
        if events.contains(SpEvents::RESET_RING) {
            self.reset_faulted_rings();
        }
        if events.contains(SpEvents::FW_EXCEPTION) {
            self.fw_exception();
        } else if events.contains(SpEvents::FW_RESET_NOTIFY) {
            self.fw_reset();
        }
    }

    fn echo_response(&self) {
        let Some((data1, data2)) = self.pending.lock().echo.take() else { return };
        let result = self.hwrm.req_init::<FuncEchoResponseInput>().and_then(|mut req| {
            req.req.event_data1 = Le32::new(data1);
            req.req.event_data2 = Le32::new(data2);
            req.send()
        });
        if let Err(e) = result {
            warn!("bnxt: FUNC_ECHO_RESPONSE failed: {}", e);
        }
    }

    fn error_report(&self, report: ErrorReportType) {
        match report {
            ErrorReportType::PauseStorm => warn!("bnxt: pause storm detected"),
            ErrorReportType::InvalidSignal => warn!("bnxt: invalid PPS signal detected"),
            ErrorReportType::Nvm => error!("bnxt: NVM error reported by firmware"),
            ErrorReportType::DoorbellDrop => warn!("bnxt: doorbell drop threshold reached"),
            ErrorReportType::ThermalEvent => warn!("bnxt: thermal threshold crossed"),
            ErrorReportType::DualDataRate => warn!("bnxt: dual data rate transceiver mismatch"),
        }
    }
}
