extern crate std;
extern crate bnxt_sim;

use std::boxed::Box;
use std::sync::Arc;
use bnxt_hsi::*;
use bnxt_hsi::hwrm::*;
use bnxt_sim::{Sim, SimConfig};
use super::*;

fn setup(cfg: SimConfig) -> (Arc<Sim>, Arc<HwrmChannel>) {
    let sim = Sim::new(cfg);
    let channel = Arc::new(HwrmChannel::new(sim.hal()));
    (sim, channel)
}

#[test]
fn ver_get_sets_caps() {
    let (sim, channel) = setup(SimConfig::default());
    let resp = channel.req_init::<VerGetInput>().unwrap().send().unwrap();
    assert_eq!(resp.chip_num.get(), CHIP_NUM_57508);

    let caps = HwrmCaps::from_ver_get(&resp);
    assert_eq!(caps.max_req_win_len, 128);
    assert_eq!(caps.max_ext_req_len, 1024);
    assert_eq!(caps.default_timeout_ms, 500);
    assert_eq!(caps.max_timeout_ms, 40_000);
    assert!(!caps.short_cmd);
    assert_eq!(sim.requests_seen(), [HWRM_VER_GET]);
    assert_eq!(channel.in_flight(), None);
}

#[test]
fn firmware_status_is_reported() {
    let (sim, channel) = setup(SimConfig::default());
    sim.fail_next_hwrm(HWRM_FUNC_QCFG, HWRM_ERR_CODE_INVALID_PARAMS, 1);

    let mut req = channel.req_init::<FuncQcfgInput>().unwrap();
    req.req.fid = Le16::new(0xffff);
    let err = req.send().unwrap_err();
    assert_eq!(err, HwrmError::FirmwareStatus(HWRM_ERR_CODE_INVALID_PARAMS));
    assert_eq!(err.firmware_status(), Some(HWRM_ERR_CODE_INVALID_PARAMS));

    let resp = req.send().unwrap();
    assert_eq!(resp.mac_address, SimConfig::default().mac);
}

#[test]
fn silent_failure_still_fails() {
    let (sim, channel) = setup(SimConfig::default());
    sim.set_hwrm_error(HWRM_FUNC_QCAPS, HWRM_ERR_CODE_CMD_NOT_SUPPORTED);
    let err = channel.req_init::<FuncQcapsInput>().unwrap().send_silent().unwrap_err();
    assert_eq!(err.firmware_status(), Some(HWRM_ERR_CODE_CMD_NOT_SUPPORTED));
}

#[test]
fn unanswered_request_times_out() {
    let (sim, channel) = setup(SimConfig::default());
    sim.drop_hwrm(HWRM_FUNC_QCAPS, true);
    let start = sim.now();

    let mut req = channel.req_init::<FuncQcapsInput>().unwrap();
    req.set_timeout(10);
    assert_eq!(req.send().unwrap_err(), HwrmError::Timeout);
    assert!(sim.now() - start >= 10_000);
    assert_eq!(channel.in_flight(), None);

    // The mailbox is usable again.
    sim.drop_hwrm(HWRM_FUNC_QCAPS, false);
    assert!(req.send().is_ok());
}

#[test]
fn deferred_response_extends_the_timeout() {
    let (sim, channel) = setup(SimConfig::default());
    let hook_channel = channel.clone();
    sim.on_hwrm_request(Some(Box::new(move |req_type, seq_id| {
        if req_type == HWRM_FUNC_QCFG {
            hook_channel.on_deferred(seq_id);
        }
    })));
    sim.defer_hwrm(HWRM_FUNC_QCFG, Some(50_000));

    let mut req = channel.req_init::<FuncQcfgInput>().unwrap();
    req.set_timeout(10);
    assert!(req.send().is_ok());

    sim.on_hwrm_request(None);
}

#[test]
fn late_response_without_deferral_times_out() {
    let (sim, channel) = setup(SimConfig::default());
    sim.defer_hwrm(HWRM_FUNC_QCFG, Some(50_000));

    let mut req = channel.req_init::<FuncQcfgInput>().unwrap();
    req.set_timeout(10);
    assert_eq!(req.send().unwrap_err(), HwrmError::Timeout);

    // Let the stale response land before the next request.
    sim.advance_clock(100_000);
    sim.defer_hwrm(HWRM_FUNC_QCFG, None);
    assert!(req.send().is_ok());
}

#[test]
fn cancel_all_closes_the_channel() {
    let (sim, channel) = setup(SimConfig::default());
    channel.cancel_all();
    assert!(channel.is_down());
    assert_eq!(channel.req_init::<VerGetInput>().unwrap().send().unwrap_err(), HwrmError::ChannelDown);
    assert!(sim.requests_seen().is_empty());

    channel.reopen();
    assert!(channel.req_init::<VerGetInput>().unwrap().send().is_ok());
}

#[test]
fn cancel_interrupts_a_waiting_request() {
    let (sim, channel) = setup(SimConfig::default());
    let hook_channel = channel.clone();
    sim.on_hwrm_request(Some(Box::new(move |_, _| hook_channel.cancel_all())));
    sim.drop_hwrm(HWRM_FUNC_QCAPS, true);

    let err = channel.req_init::<FuncQcapsInput>().unwrap().send().unwrap_err();
    assert_eq!(err, HwrmError::Cancelled);
    assert_eq!(channel.in_flight(), None);

    sim.on_hwrm_request(None);
}

#[test]
fn short_command_when_required() {
    let cfg = SimConfig { short_cmd_required: true, ..SimConfig::default() };
    let (sim, channel) = setup(cfg);
    let resp = channel.req_init::<VerGetInput>().unwrap().send().unwrap();
    channel.set_caps(HwrmCaps::from_ver_get(&resp));
    assert!(channel.caps().short_cmd);
    assert_eq!(sim.short_cmd_count(), 0);

    assert!(channel.req_init::<FuncQcfgInput>().unwrap().send().is_ok());
    assert_eq!(sim.short_cmd_count(), 1);
}

#[test]
fn short_command_for_long_requests() {
    let (sim, channel) = setup(SimConfig::default());
    channel.set_caps(HwrmCaps { max_req_win_len: 32, max_ext_req_len: 1024, ..HwrmCaps::default() });

    assert!(channel.req_init::<FuncQcfgInput>().unwrap().send().is_ok());
    assert_eq!(sim.short_cmd_count(), 0);

    let mut req = channel.req_init::<FuncDrvRgtrInput>().unwrap();
    req.req.os_type = Le16::new(FUNC_DRV_RGTR_OS_TYPE_OTHER);
    req.req.enables = Le32::new(FUNC_DRV_RGTR_ENABLES_OS_TYPE);
    assert!(req.send().is_ok());
    assert_eq!(sim.short_cmd_count(), 1);
    assert!(sim.registered());
}

#[test]
fn oversized_request_is_refused() {
    let (sim, channel) = setup(SimConfig::default());
    channel.set_caps(HwrmCaps { short_cmd: true, max_ext_req_len: 32, ..HwrmCaps::default() });

    let err = channel.req_init::<FuncDrvRgtrInput>().unwrap().send().unwrap_err();
    assert_eq!(err, HwrmError::TooLarge);
    assert!(sim.requests_seen().is_empty());
}

#[test]
fn held_request_keeps_its_slices() {
    let (sim, channel) = setup(SimConfig::default());
    sim.set_grc(0x31000, 0xdead_beef);
    sim.set_grc(0x31004, 0x0bad_f00d);

    let mut req = channel.req_init::<DbgReadDirectInput>().unwrap();
    let dest = req.dma_slice(64).unwrap();
    req.req.host_dest_addr = Le64::new(dest.value());
    req.req.read_addr = Le32::new(0x31000);
    req.req.read_len32 = Le32::new(2);
    req.hold().send().unwrap();

    assert!(req.response().is_some());
    assert_eq!(req.slices().len(), 1);
    assert_eq!(req.slices()[0].read::<u32>(0), 0xdead_beef);
    assert_eq!(req.slices()[0].read::<u32>(4), 0x0bad_f00d);

    let allocs = sim.live_dma_allocations();
    drop(req);
    assert_eq!(sim.live_dma_allocations(), allocs - 1);
}

#[test]
fn request_buffers_are_pooled() {
    let (sim, channel) = setup(SimConfig::default());
    for _ in 0..20 {
        assert!(channel.req_init::<FuncQcfgInput>().unwrap().send().is_ok());
    }
    assert_eq!(sim.live_dma_allocations(), 1);
    assert_eq!(sim.request_count(HWRM_FUNC_QCFG), 20);

    drop(channel);
    assert_eq!(sim.live_dma_allocations(), 0);
}
