extern crate std;
extern crate bnxt_sim;

use std::sync::Arc;
use std::vec::Vec;
use spin::Mutex;
use nic_buffers::{GsoInfo, GsoType, HeaderOffsets, ReceivedPacket, TransmitPacket, TxFrag};
use bnxt_hsi::event::AsyncEventId;
use bnxt_hsi::hwrm::*;
use bnxt_sim::{Sim, SimConfig, SimRxPacket};
use super::*;
use crate::config::*;

#[derive(Default)]
struct Collector {
    packets: Mutex<Vec<(u16, usize)>>,
    /// The fragment count and GSO info of each delivered packet.
    shapes: Mutex<Vec<(usize, Option<GsoInfo>)>>,
}

impl PacketSink for Collector {
    fn deliver(&self, napi: u16, pkt: ReceivedPacket) {
        self.packets.lock().push((napi, pkt.len()));
        self.shapes.lock().push((pkt.nr_frags(), pkt.gso));
    }
}

fn small_config() -> BnxtConfig {
    BnxtConfig {
        tx_rings: 2,
        rx_rings: 2,
        tx_ring_size: 64,
        rx_ring_size: 64,
        ..Default::default()
    }
}

fn setup(sim_cfg: SimConfig) -> (Arc<Sim>, Arc<Bnxt>, Arc<Collector>) {
    setup_with(sim_cfg, small_config())
}

fn setup_with(sim_cfg: SimConfig, cfg: BnxtConfig) -> (Arc<Sim>, Arc<Bnxt>, Arc<Collector>) {
    let sim = Sim::new(sim_cfg);
    let sink = Arc::new(Collector::default());
    let bnxt = Bnxt::probe(sim.hal(), cfg, sink.clone()).expect("device bring-up failed");
    (sim, bnxt, sink)
}

fn open(sim_cfg: SimConfig) -> (Arc<Sim>, Arc<Bnxt>, Arc<Collector>) {
    let (sim, bnxt, sink) = setup(sim_cfg);
    bnxt.open().expect("open failed");
    bnxt.poll(0, 64);
    (sim, bnxt, sink)
}

/// Buffers posted on RX ring 0 and not yet consumed, as the driver counts them.
fn rx_outstanding(bnxt: &Bnxt) -> u32 {
    let info = bnxt.dbg_ring_info(RingKind::Rx, 0).unwrap();
    info.producer.wrapping_sub(info.consumer)
}

fn poll_all(bnxt: &Bnxt, budget: usize) -> usize {
    (0..bnxt.ring_counts().napis() as usize).map(|n| bnxt.poll(n, budget)).sum()
}

fn run_reset(sim: &Sim, bnxt: &Bnxt) -> Vec<FwResetState> {
    let mut states = std::vec![bnxt.fw_reset_state()];
    let mut steps = 0;
    while let Some(ms) = bnxt.fw_reset_task() {
        sim.advance_clock(ms * 1000);
        let state = bnxt.fw_reset_state();
        if states.last() != Some(&state) {
            states.push(state);
        }
        steps += 1;
        assert!(steps < 10_000, "reset stuck in {:?}", state);
    }
    let state = bnxt.fw_reset_state();
    if states.last() != Some(&state) {
        states.push(state);
    }
    states
}

fn frame(len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| i as u8).collect();
    data[..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
    data[12] = 0x08;
    data[13] = 0x00;
    data
}

#[test]
fn open_close_leaves_nothing_behind() {
    let (sim, bnxt, _) = setup(SimConfig::default());
    let dma_before = sim.live_dma_allocations();
    bnxt.open().unwrap();
    assert!(bnxt.is_open());
    assert!(sim.if_up());
    assert!(sim.ring_count() > 0);
    assert!(!sim.vnics().is_empty());

    bnxt.close();
    assert!(!bnxt.is_open());
    assert!(!sim.if_up());
    assert_eq!(sim.ring_count(), 0);
    assert_eq!(sim.stat_ctx_count(), 0);
    assert!(sim.vnics().is_empty());
    assert!(sim.l2_filters().is_empty());
    assert_eq!(sim.live_dma_allocations(), dma_before);
    assert_eq!(sim.live_dma_mappings(), 0);
}

#[test]
fn open_close_on_p4() {
    let (sim, bnxt, _) = setup(SimConfig::p4());
    bnxt.open().unwrap();
    assert!(sim.ring_grp_count() > 0);
    bnxt.close();
    assert_eq!(sim.ring_grp_count(), 0);
    assert_eq!(sim.ring_count(), 0);
}

#[test]
fn mtu_changes_are_bounded() {
    let (_sim, bnxt, _) = open(SimConfig::default());
    bnxt.change_mtu(4000).unwrap();
    assert_eq!(bnxt.get_mtu(), 4000);
    assert!(bnxt.is_open());
    assert!(bnxt.change_mtu(BNXT_MIN_MTU - 1).is_err());
    assert!(bnxt.change_mtu(BNXT_MAX_MTU + 1).is_err());
    assert_eq!(bnxt.get_mtu(), 4000);
}

#[test]
fn l2_filter_round_trip() {
    let (sim, bnxt, _) = open(SimConfig::default());
    let before = sim.l2_filters().len();
    let addr = [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee];
    let handle = bnxt.alloc_l2_filter(L2FilterKey { addr, vlan: Some(10) }).unwrap();
    let filters = sim.l2_filters();
    assert_eq!(filters.len(), before + 1);
    assert!(filters.iter().any(|f| f.addr == addr && f.vlan == Some(10)));

    bnxt.free_l2_filter(handle).unwrap();
    assert_eq!(sim.l2_filters().len(), before);
    assert!(bnxt.free_l2_filter(handle).is_err());
}

#[test]
fn l2_filter_with_ntuple_cannot_be_freed() {
    let (sim, bnxt, _) = open(SimConfig::default());
    let l2 = bnxt.alloc_l2_filter(L2FilterKey { addr: [0x02, 1, 2, 3, 4, 5], vlan: None }).unwrap();
    let key = NtupleKey { ip_protocol: 6, dst_port: Some(80), ..Default::default() };
    let nt = bnxt.alloc_ntuple_filter(l2, &key, NtupleAction::Drop).unwrap();
    assert_eq!(sim.ntuple_filters().len(), 1);
    assert_eq!(bnxt.free_l2_filter(l2), Err(BnxtError::Busy));
    bnxt.free_ntuple_filter(nt).unwrap();
    assert!(sim.ntuple_filters().is_empty());
    bnxt.free_l2_filter(l2).unwrap();
}

#[test]
fn rx_mode_goes_promiscuous_for_foreign_unicast() {
    let (sim, bnxt, _) = open(SimConfig::default());
    bnxt.set_rx_mode(RxMask::empty(), &[[0x02, 9, 9, 9, 9, 9]], &[]).unwrap();
    let (mask, _) = sim.rx_mask().unwrap();
    assert_ne!(mask & CFA_L2_SET_RX_MASK_PROMISCUOUS, 0);
    assert_ne!(mask & CFA_L2_SET_RX_MASK_BCAST, 0);
}

#[test]
fn transmit_reaches_the_wire() {
    let (sim, bnxt, _) = open(SimConfig::default());
    let data = frame(128);
    let status = bnxt.start_xmit(TransmitPacket::new(data.clone()));
    assert!(matches!(status, XmitStatus::Queued));
    let sent = sim.take_transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0].data[..128], &data[..]);

    for n in 0..bnxt.ring_counts().napis() as usize {
        bnxt.poll(n, 64);
    }
    let stats = bnxt.get_stats();
    assert_eq!(stats.tx_packets, 1);
    assert_eq!(stats.tx_bytes, 128);
}

#[test]
fn received_packets_are_delivered() {
    let (sim, bnxt, sink) = open(SimConfig::default());
    sim.inject_rx(0, &SimRxPacket::new(frame(100))).unwrap();
    sim.inject_rx(0, &SimRxPacket::new(frame(1000))).unwrap();
    let napi = bnxt.ring_counts().napis() as usize;
    let work: usize = (0..napi).map(|n| bnxt.poll(n, 64)).sum();
    assert_eq!(work, 2);
    let lens: Vec<usize> = sink.packets.lock().iter().map(|&(_, len)| len).collect();
    assert_eq!(lens, [100, 1000]);
    assert_eq!(bnxt.get_stats().rx_packets, 2);
}

#[test]
fn echo_request_is_answered() {
    let (sim, bnxt, _) = open(SimConfig::default());
    assert!(sim.inject_async_event(AsyncEventId::EchoRequest as u16, 0x1234, 0x5678));
    bnxt.poll(0, 64);
    assert!(bnxt.pending_sp_events().contains(SpEvents::ECHO_REQUEST));
    bnxt.sp_task();
    assert_eq!(sim.echo_responses(), [(0x1234, 0x5678)]);
}

#[test]
fn doorbell_recovery_runs_once_per_epoch() {
    let (sim, bnxt, _) = open(SimConfig::default());
    assert!(sim.inject_async_event(AsyncEventId::DoorbellPacingThreshold as u16, 5, 0));
    bnxt.poll(0, 64);
    bnxt.sp_task();
    assert_eq!(bnxt.dbr_epoch(), 5);
    assert_eq!(sim.dbr_recovery_completions(), [5]);

    assert!(sim.inject_async_event(AsyncEventId::DoorbellPacingThreshold as u16, 5, 0));
    bnxt.poll(0, 64);
    bnxt.sp_task();
    assert_eq!(sim.dbr_recovery_completions(), [5]);

    assert!(sim.inject_async_event(AsyncEventId::DoorbellPacingThreshold as u16, 7, 0));
    bnxt.poll(0, 64);
    bnxt.sp_task();
    assert_eq!(bnxt.dbr_epoch(), 7);
    assert_eq!(sim.dbr_recovery_completions(), [5, 7]);
}

#[test]
fn ring_diagnostics() {
    let (_sim, bnxt, _) = open(SimConfig::default());
    let tx = bnxt.dbg_ring_info(RingKind::Tx, 0).unwrap();
    assert_eq!(tx.producer, tx.consumer);
    let rx = bnxt.dbg_ring_info(RingKind::Rx, 0).unwrap();
    assert!(rx.len >= 64);
    assert!(bnxt.dbg_ring_info(RingKind::Rx, 99).is_err());
}

#[test]
fn ring_trimming() {
    let (mut rx, mut tx) = (8, 8);
    resv::trim_rings(&mut rx, &mut tx, 8, false).unwrap();
    assert!(rx + tx <= 8);
    assert!(rx >= 1 && tx >= 1);

    let (mut rx, mut tx) = (8, 8);
    resv::trim_rings(&mut rx, &mut tx, 4, true).unwrap();
    assert!(rx <= 4 && tx <= 4);

    let (mut rx, mut tx) = (1, 1);
    assert_eq!(resv::trim_rings(&mut rx, &mut tx, 1, false), Err(BnxtError::ResourceExhausted));
}

#[test]
fn firmware_reset_reopens_an_open_device() {
    let (sim, bnxt, _) = open(SimConfig::default());
    bnxt.fw_reset();
    assert!(bnxt.state().contains(DevState::IN_FW_RESET));

    let mut steps = 0;
    while let Some(ms) = bnxt.fw_reset_task() {
        sim.advance_clock(ms * 1000);
        steps += 1;
        assert!(steps < 10_000, "reset stuck in {:?}", bnxt.fw_reset_state());
    }
    assert_eq!(bnxt.fw_reset_state(), FwResetState::Idle);
    assert!(!bnxt.state().intersects(DevState::IN_FW_RESET | DevState::FW_FATAL_COND | DevState::ABORT_ERR));
    assert!(bnxt.is_open());
    assert!(sim.registered());
    assert!(sim.ring_count() > 0);
}

#[test]
fn control_plane_refuses_dead_firmware() {
    let (_sim, bnxt, _) = open(SimConfig::default());
    let l2 = bnxt.alloc_l2_filter(L2FilterKey { addr: [0x02, 1, 2, 3, 4, 5], vlan: None }).unwrap();
    bnxt.set_state(DevState::FW_FATAL_COND);

    assert_eq!(bnxt.set_rx_mode(RxMask::empty(), &[], &[]), Err(BnxtError::NoDevice));
    assert_eq!(bnxt.change_mtu(3000), Err(BnxtError::NoDevice));
    assert_eq!(bnxt.change_mac([0x02, 9, 8, 7, 6, 5]), Err(BnxtError::NoDevice));
    assert_eq!(bnxt.set_features(NetFeatures::default()), Err(BnxtError::NoDevice));
    assert!(matches!(bnxt.attach_xdp(None), Err(BnxtError::NoDevice)));
    let key = L2FilterKey { addr: [0x02, 6, 6, 6, 6, 6], vlan: None };
    assert_eq!(bnxt.alloc_l2_filter(key), Err(BnxtError::NoDevice));
    let nt = NtupleKey { ip_protocol: 17, ..Default::default() };
    assert_eq!(bnxt.alloc_ntuple_filter(l2, &nt, NtupleAction::Drop), Err(BnxtError::NoDevice));
    assert_eq!(bnxt.free_l2_filter(l2), Err(BnxtError::NoDevice));
    assert_eq!(bnxt.get_mtu(), BNXT_DEFAULT_MTU);
}

#[test]
fn push_and_push_completion() {
    for sim_cfg in [SimConfig::p7(), SimConfig { ppp_push: true, ..SimConfig::p7() }] {
        let cfg = BnxtConfig {
            tx_ring_size: 32,
            enable_wcb_push: true,
            tx_push_thresh: bnxt_rings::PUSH_THRESH_WCB,
            ..small_config()
        };
        let (sim, bnxt, _) = setup_with(sim_cfg, cfg);
        bnxt.open().unwrap();
        poll_all(&bnxt, 64);
        sim.hold_tx_completions(true);

        let data = frame(200);
        assert!(matches!(bnxt.start_xmit(TransmitPacket::new(data.clone())), XmitStatus::Queued));
        let sent = sim.take_transmitted();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].push);
        assert_eq!(&sent[0].data[..200], &data[..]);
        // 15 slots of a 32 entry ring leave less than a full packet's worth free.
        assert!(matches!(bnxt.start_xmit(TransmitPacket::new(frame(64))), XmitStatus::Busy(_)));
        assert_eq!(sim.doorbell_errors(), 0);

        sim.hold_tx_completions(false);
        poll_all(&bnxt, 64);
        let stats = bnxt.get_ring_stats();
        assert_eq!(stats.iter().map(|r| r.tx_push).sum::<u64>(), 1);
        assert_eq!(stats.iter().map(|r| r.tx_push_cmpl).sum::<u64>(), 1);
        assert!(matches!(bnxt.start_xmit(TransmitPacket::new(frame(64))), XmitStatus::Queued));
    }
}

#[test]
fn lso_with_four_fragments() {
    let (sim, bnxt, _) = open(SimConfig::default());
    let mappings = sim.live_dma_mappings();
    let frags = (0..4).map(|i| TxFrag::Heap(std::vec![i as u8; 16 * 1024])).collect();
    let mut pkt = TransmitPacket::new(frame(66)).with_frags(frags);
    pkt.gso = Some(GsoInfo { kind: GsoType::TcpV4, size: 1460, segs: 0, tunnel: false });
    pkt.csum_partial = true;
    pkt.offsets = HeaderOffsets { network: 14, transport: 34, tcp_hdr_len: 32, ..Default::default() };
    let len = pkt.len();

    assert!(matches!(bnxt.start_xmit(pkt), XmitStatus::Queued));
    let sent = sim.take_transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bds, 6);
    assert_eq!(sent[0].nr_frags, 4);
    assert_eq!(sent[0].mss, 1460);
    assert_eq!(sent[0].data.len(), len);

    poll_all(&bnxt, 64);
    let tx = bnxt.dbg_ring_info(RingKind::Tx, 0).unwrap();
    assert_eq!(tx.producer, tx.consumer);
    assert_eq!(bnxt.get_stats().tx_packets, 1);
    assert_eq!(sim.live_dma_mappings(), mappings);
}

#[test]
fn tpa_aggregation_becomes_one_gso_packet() {
    let (sim, bnxt, sink) = open(SimConfig::default());
    sim.tpa_start(0, 5, &SimRxPacket::new(frame(200))).unwrap();
    sim.tpa_agg(0, 5, &[0x5a; 1448]).unwrap();
    sim.tpa_agg(0, 5, &[0xa5; 1448]).unwrap();
    sim.tpa_end(0, 5, 3, 1448).unwrap();
    assert_eq!(bnxt.poll(0, 64), 1);

    assert_eq!(sink.packets.lock()[..], [(0, 200 + 2 * 1448)]);
    let (nr_frags, gso) = sink.shapes.lock()[0];
    assert_eq!(nr_frags, 2);
    let gso = gso.expect("aggregate without GSO info");
    assert_eq!(gso.size, 1448);
    assert_eq!(gso.segs, 3);
    assert_eq!(gso.kind, GsoType::TcpV4);
    assert_eq!(bnxt.get_stats().sw.rx_tpa_pkts, 1);

    let fabric = bnxt.fabric().unwrap();
    let napi = fabric.napis[fabric.rx_napi(0)].lock();
    let tpa = napi.rx.as_ref().unwrap().tpa.as_ref().unwrap();
    assert_eq!(tpa.ids().in_use(), 0);
    assert!(!tpa.ids().is_set(5));
    drop(napi);

    assert_eq!(rx_outstanding(&bnxt), 63);
    assert_eq!(sim.rx_buffers_posted(0), (63, 255));
    assert_eq!(sim.doorbell_errors(), 0);
}

#[test]
fn netpoll_drops_receives_without_overfilling() {
    let (sim, bnxt, sink) = open(SimConfig::default());
    sim.inject_rx(0, &SimRxPacket::new(frame(100))).unwrap();
    sim.tpa_start(0, 5, &SimRxPacket::new(frame(200))).unwrap();
    sim.tpa_agg(0, 5, &[1; 1000]).unwrap();
    sim.tpa_agg(0, 5, &[2; 1000]).unwrap();
    sim.tpa_end(0, 5, 2, 1000).unwrap();

    bnxt.poll(0, 0);
    assert!(sink.packets.lock().is_empty());
    assert_eq!(bnxt.get_stats().sw.rx_netpoll_discards, 2);
    assert!(rx_outstanding(&bnxt) <= 63);
    assert_eq!(rx_outstanding(&bnxt), 63);
    assert_eq!(sim.rx_buffers_posted(0), (63, 255));
    assert_eq!(sim.doorbell_errors(), 0);

    sim.inject_rx(0, &SimRxPacket::new(frame(100))).unwrap();
    assert_eq!(bnxt.poll(0, 64), 1);
    assert_eq!(sink.packets.lock().len(), 1);
}

#[test]
fn tpa_start_without_memory_discards_the_aggregation() {
    let (sim, bnxt, sink) = open(SimConfig::default());
    sim.tpa_start(0, 5, &SimRxPacket::new(frame(200))).unwrap();
    sim.tpa_agg(0, 5, &[1; 1000]).unwrap();
    sim.tpa_agg(0, 5, &[2; 1000]).unwrap();
    sim.tpa_end(0, 5, 2, 1000).unwrap();
    sim.fail_next_dma_maps(1);

    bnxt.poll(0, 64);
    assert!(sink.packets.lock().is_empty());
    assert_eq!(bnxt.get_stats().sw.rx_oom_discards, 1);
    assert_eq!(rx_outstanding(&bnxt), 63);
    assert_eq!(sim.rx_buffers_posted(0), (63, 255));
    assert_eq!(sim.doorbell_errors(), 0);

    sim.tpa_start(0, 5, &SimRxPacket::new(frame(200))).unwrap();
    sim.tpa_agg(0, 5, &[1; 1000]).unwrap();
    sim.tpa_end(0, 5, 2, 600).unwrap();
    assert_eq!(bnxt.poll(0, 64), 1);
    assert_eq!(sink.packets.lock()[..], [(0, 1200)]);
}

#[test]
fn agg_replacement_is_all_or_nothing() {
    let (sim, bnxt, sink) = open(SimConfig::default());
    // Two AGG buffers come back to the pool once the sink drops this packet.
    sim.inject_rx(0, &SimRxPacket::new(frame(5000))).unwrap();
    assert_eq!(bnxt.poll(0, 64), 1);
    assert_eq!(sink.shapes.lock()[0].0, 2);

    // Three replacements are needed: two come from the pool, the third cannot be mapped.
    sim.inject_rx(0, &SimRxPacket::new(frame(9000))).unwrap();
    sim.fail_next_dma_maps(1);
    bnxt.poll(0, 64);
    assert_eq!(sink.packets.lock().len(), 1);
    assert_eq!(bnxt.get_stats().sw.rx_oom_discards, 1);
    assert_eq!(rx_outstanding(&bnxt), 63);
    assert_eq!(sim.rx_buffers_posted(0), (63, 255));
    assert_eq!(sim.doorbell_errors(), 0);

    sim.inject_rx(0, &SimRxPacket::new(frame(9000))).unwrap();
    assert_eq!(bnxt.poll(0, 64), 1);
    let lens: Vec<usize> = sink.packets.lock().iter().map(|&(_, len)| len).collect();
    assert_eq!(lens, [5000, 9000]);
    assert_eq!(sim.rx_buffers_posted(0), (63, 255));
}

struct DropAll {
    frags_seen: Mutex<Vec<usize>>,
    frags: bool,
}

impl XdpProgram for DropAll {
    fn run(&self, _head: &[u8], frags: &[&[u8]]) -> XdpAction {
        self.frags_seen.lock().push(frags.len());
        XdpAction::Drop
    }

    fn supports_frags(&self) -> bool {
        self.frags
    }
}

#[test]
fn xdp_drop_recycles_every_buffer_of_a_jumbo_frame() {
    let (sim, bnxt, sink) = open(SimConfig::default());
    let prog = Arc::new(DropAll { frags_seen: Mutex::new(Vec::new()), frags: true });
    bnxt.attach_xdp(Some(prog.clone())).unwrap();
    bnxt.change_mtu(9000).unwrap();
    poll_all(&bnxt, 64);
    assert!(bnxt.ring_counts().agg);

    sim.inject_rx(0, &SimRxPacket::new(frame(16000))).unwrap();
    assert_eq!(bnxt.poll(0, 64), 1);
    assert_eq!(prog.frags_seen.lock()[..], [3]);
    assert!(sink.packets.lock().is_empty());
    assert_eq!(bnxt.get_stats().sw.xdp_drops, 1);
    assert_eq!(rx_outstanding(&bnxt), 63);
    assert_eq!(sim.rx_buffers_posted(0), (63, 255));
    assert_eq!(sim.doorbell_errors(), 0);
}

#[test]
fn single_buffer_xdp_caps_the_mtu() {
    let (_sim, bnxt, _) = open(SimConfig::default());
    bnxt.change_mtu(9000).unwrap();
    let prog = Arc::new(DropAll { frags_seen: Mutex::new(Vec::new()), frags: false });
    assert!(matches!(bnxt.attach_xdp(Some(prog.clone())), Err(BnxtError::InvalidArgument)));
    bnxt.change_mtu(1500).unwrap();
    bnxt.attach_xdp(Some(prog)).unwrap();
    assert_eq!(bnxt.change_mtu(9000), Err(BnxtError::InvalidArgument));
}

#[test]
fn fatal_error_waits_for_vfs() {
    let (sim, bnxt, _) = open(SimConfig::default());
    sim.set_registered_vfs(2);
    bnxt.fw_exception();
    assert_eq!(bnxt.fw_reset_state(), FwResetState::PollVf);
    assert!(bnxt.state().contains(DevState::FW_FATAL_COND));

    // VFs unbind after a few polls.
    for _ in 0..3 {
        let ms = bnxt.fw_reset_task().unwrap();
        assert_eq!(ms, BNXT_FW_RESET_VF_POLL_MS);
        assert_eq!(bnxt.fw_reset_state(), FwResetState::PollVf);
        sim.advance_clock(ms * 1000);
    }
    sim.set_registered_vfs(0);

    let states = run_reset(&sim, &bnxt);
    assert_eq!(states, [
        FwResetState::PollVf,
        FwResetState::Close,
        FwResetState::PollFwDown,
        FwResetState::ResetFw,
        FwResetState::EnableDev,
        FwResetState::PollFw,
        FwResetState::Opening,
        FwResetState::Idle,
    ]);
    assert!(!bnxt.state().intersects(DevState::IN_FW_RESET | DevState::FW_FATAL_COND | DevState::ABORT_ERR));
    assert!(bnxt.is_open());
    assert!(sim.ring_count() > 0);
}

#[test]
fn hwrm_timeout_aborts_reset_until_next_open() {
    let (sim, bnxt, _) = open(SimConfig::default());
    bnxt.fw_reset();
    sim.drop_hwrm(HWRM_VER_GET, true);
    let states = run_reset(&sim, &bnxt);
    assert_eq!(states.last(), Some(&FwResetState::Abort));
    assert!(states.contains(&FwResetState::PollFw));
    assert!(bnxt.state().contains(DevState::ABORT_ERR));
    assert!(!bnxt.state().contains(DevState::IN_FW_RESET));
    assert!(!bnxt.is_open());

    sim.drop_hwrm(HWRM_VER_GET, false);
    bnxt.open().unwrap();
    assert!(bnxt.is_open());
    assert!(!bnxt.state().contains(DevState::ABORT_ERR));
    assert_eq!(bnxt.fw_reset_state(), FwResetState::Idle);
    assert!(sim.registered());

    sim.inject_rx(0, &SimRxPacket::new(frame(100))).unwrap();
    assert_eq!(poll_all(&bnxt, 64), 1);
}

#[test]
fn buffer_errors_reset_the_rx_ring() {
    let (sim, bnxt, sink) = open(SimConfig::default());
    let bad = SimRxPacket { buffer_error: true, ..SimRxPacket::new(frame(100)) };
    for _ in 0..BNXT_BUF_ERR_RESET_THRESH {
        sim.inject_rx(0, &bad).unwrap();
    }
    bnxt.poll(0, 64);
    assert!(sink.packets.lock().is_empty());
    assert_eq!(bnxt.get_stats().sw.rx_buf_errors, BNXT_BUF_ERR_RESET_THRESH);
    assert!(bnxt.pending_sp_events().contains(SpEvents::RESET_RING));

    bnxt.sp_task();
    assert_eq!(bnxt.get_stats().sw.rx_resets, 1);
    assert_eq!(rx_outstanding(&bnxt), 63);
    assert_eq!(sim.rx_buffers_posted(0).0, 63);

    sim.inject_rx(0, &SimRxPacket::new(frame(100))).unwrap();
    assert_eq!(bnxt.poll(0, 64), 1);
    assert_eq!(sink.packets.lock().len(), 1);
}

#[test]
fn fewer_rx_rings_granted() {
    let (sim, bnxt, sink) = setup(SimConfig::default());
    sim.limit_rx_grant(Some(2));
    bnxt.open().unwrap();
    let counts = bnxt.ring_counts();
    assert_eq!(counts.rx, 1);
    assert!(counts.agg);
    sim.inject_rx(0, &SimRxPacket::new(frame(300))).unwrap();
    assert_eq!(poll_all(&bnxt, 64), 1);
    assert_eq!(sink.packets.lock().len(), 1);

    let (sim, bnxt, _) = setup(SimConfig::default());
    sim.limit_rx_grant(Some(1));
    bnxt.open().unwrap();
    let counts = bnxt.ring_counts();
    assert_eq!(counts.rx, 1);
    assert!(!counts.agg);
    assert!(bnxt.dbg_ring_info(RingKind::RxAgg, 0).is_err());
}

#[test]
fn dma_map_failure_drops_without_advancing() {
    let (sim, bnxt, _) = open(SimConfig::default());
    let before = bnxt.dbg_ring_info(RingKind::Tx, 0).unwrap();
    let mappings = sim.live_dma_mappings();
    sim.fail_next_dma_maps(1);

    assert!(matches!(bnxt.start_xmit(TransmitPacket::new(frame(128))), XmitStatus::Dropped));
    assert_eq!(bnxt.dbg_ring_info(RingKind::Tx, 0).unwrap().producer, before.producer);
    assert!(sim.take_transmitted().is_empty());
    assert_eq!(sim.live_dma_mappings(), mappings);
    assert_eq!(bnxt.get_stats().tx_dropped, 1);

    assert!(matches!(bnxt.start_xmit(TransmitPacket::new(frame(128))), XmitStatus::Queued));
    assert_eq!(sim.take_transmitted().len(), 1);
}

#[test]
fn failed_recovery_completion_is_retried() {
    let (sim, bnxt, _) = open(SimConfig::default());
    sim.fail_next_hwrm(HWRM_FUNC_DBR_RECOVERY_COMPLETED, HWRM_ERR_CODE_FAIL, 1);
    assert!(sim.inject_async_event(AsyncEventId::DoorbellPacingThreshold as u16, 5, 0));
    bnxt.poll(0, 64);
    bnxt.sp_task();
    assert_eq!(bnxt.dbr_epoch(), 0);
    assert!(sim.dbr_recovery_completions().is_empty());

    assert!(sim.inject_async_event(AsyncEventId::DoorbellPacingThreshold as u16, 5, 0));
    bnxt.poll(0, 64);
    bnxt.sp_task();
    assert_eq!(bnxt.dbr_epoch(), 5);
    assert_eq!(sim.dbr_recovery_completions(), [5]);
}
