extern crate std;
extern crate bnxt_sim;

use std::sync::Arc;
use nic_hal::{Bar, DmaDirection, HalRef};
use nic_buffers::{BufferPool, RxBufferMode};
use bnxt_hsi::*;
use bnxt_hsi::cmpl::*;
use bnxt_hsi::db::*;
use bnxt_hsi::rx::*;
use bnxt_sim::{DoorbellWrite, Sim, SimConfig};
use super::*;

fn setup(cfg: SimConfig) -> (Arc<Sim>, HalRef) {
    let sim = Sim::new(cfg);
    let hal = sim.hal();
    (sim, hal)
}

#[test]
fn single_page_ring_has_no_table() {
    let (_sim, hal) = setup(SimConfig::default());
    let mem = RingMem::for_ring(&hal, 256).unwrap();
    assert_eq!(mem.depth(), 0);
    assert_eq!(mem.nr_pages(), 1);
    assert_eq!(mem.base_addr(), mem.page(0).unwrap().phys_addr());
}

#[test]
fn multi_page_ring_gets_a_page_table() {
    let (sim, hal) = setup(SimConfig::default());
    let before = sim.live_dma_allocations();
    let mem = RingMem::for_ring(&hal, 1024).unwrap();
    assert_eq!(mem.depth(), 1);
    assert_eq!(mem.nr_pages(), 4);
    // Four pages plus the table.
    assert_eq!(sim.live_dma_allocations(), before + 5);

    // Read the table back through its bus address, which the simulator maps 1:1.
    let base = mem.base_addr().value() as *const u64;
    let entries: std::vec::Vec<u64> = (0..4).map(|i| unsafe { u64::from_le(base.add(i).read()) }).collect();
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry & !0xfff, mem.page(i).unwrap().phys_addr().value());
        assert_ne!(entry & PTU_PTE_VALID, 0);
    }
    assert_ne!(entries[3] & PTU_PTE_LAST, 0);
    assert_ne!(entries[2] & PTU_PTE_NEXT_TO_LAST, 0);
    assert_eq!(entries[0] & (PTU_PTE_LAST | PTU_PTE_NEXT_TO_LAST), 0);

    drop(mem);
    assert_eq!(sim.live_dma_allocations(), before);
}

#[test]
fn large_memory_uses_two_levels() {
    let (sim, hal) = setup(SimConfig::default());
    let before = sim.live_dma_allocations();
    let mem = RingMem::new(&hal, MAX_CTX_PAGES + 2, false, None).unwrap();
    assert_eq!(mem.depth(), 2);
    // Pages, two level-1 tables and the directory.
    assert_eq!(sim.live_dma_allocations(), before + MAX_CTX_PAGES + 2 + 3);
    drop(mem);
    assert_eq!(sim.live_dma_allocations(), before);
}

#[test]
fn init_pattern_seeds_every_entry() {
    let (_sim, hal) = setup(SimConfig::default());
    let pattern = InitPattern { entry_size: 64, value: 0xa5, offset: Some(8) };
    let mem = RingMem::new(&hal, 2, true, Some(pattern)).unwrap();
    assert_eq!(mem.depth(), 1);
    for p in 0..2 {
        let page = mem.page(p).unwrap();
        for entry in (0..BNXT_PAGE_SIZE).step_by(64) {
            assert_eq!(page.read::<u8>(entry + 8), 0xa5);
            assert_eq!(page.read::<u8>(entry), 0);
        }
    }

    let fill = InitPattern { entry_size: 32, value: 0xff, offset: None };
    let mem = RingMem::new(&hal, 1, false, Some(fill)).unwrap();
    assert_eq!(mem.page(0).unwrap().read::<u32>(100 * 4), 0xffff_ffff);
    mem.reset();
    assert_eq!(mem.page(0).unwrap().read::<u32>(100 * 4), 0xffff_ffff);
}

#[test]
fn allocation_failure_leaves_nothing_behind() {
    let (sim, hal) = setup(SimConfig::default());
    let before = sim.live_dma_allocations();
    sim.fail_next_dma_allocs(1);
    assert_eq!(RingMem::for_ring(&hal, 2048).unwrap_err(), RingError::OutOfMemory);
    assert_eq!(sim.live_dma_allocations(), before);
    assert_eq!(RingMem::for_ring(&hal, 100).unwrap_err(), RingError::InvalidSize);
}

#[test]
fn ring_sizes_round_up() {
    assert_eq!(ring_size(300, 2048), Ok(512));
    assert_eq!(ring_size(512, 2048), Ok(512));
    assert_eq!(ring_size(0, 2048), Err(RingError::InvalidSize));
    assert_eq!(ring_size(3000, 2048), Err(RingError::InvalidSize));
}

#[test]
fn p5_doorbells_carry_key_and_index() {
    let (sim, hal) = setup(SimConfig::default());
    let db = Doorbell::new(&hal, ChipKind::P5, DbKind::Tx, 0x21, 0, 256, false);
    db.write(300);
    let records = sim.doorbells();
    let last = records.last().unwrap();
    assert_eq!(last.bar, Bar::Bar1);
    assert_eq!(last.offset, DB_PF_OFFSET_P5);
    match last.write {
        DoorbellWrite::Db64(value) => {
            assert_eq!(db_type64(value), DBR_TYPE_SQ);
            assert_eq!(db_xid64(value), 0x21);
            assert_eq!(db_index64(value), 300 & 255);
            assert_eq!(value & DBR_EPOCH_MASK, 0);
            assert_ne!(value & DBR_VALID, 0);
            assert_ne!(value & DBR_PATH_L2, 0);
        }
        other => panic!("unexpected doorbell {:?}", other),
    }
    assert_eq!(db.last(), 300);
}

#[test]
fn p7_doorbells_carry_epoch_and_toggle() {
    let (sim, hal) = setup(SimConfig::p7());
    let db = Doorbell::new(&hal, ChipKind::P7, DbKind::Cq, 0x30, 0, 64, false);
    db.set_toggle(3);
    db.cq(64 + 5, true);
    match sim.doorbells().last().unwrap().write {
        DoorbellWrite::Db64(value) => {
            assert_eq!(db_type64(value), DBR_TYPE_CQ_ARMALL);
            assert_eq!(db_index64(value) & 0x3f, 5);
            assert_ne!(value & DBR_EPOCH_MASK, 0);
            assert_eq!((value & DBR_TOGGLE_MASK) >> DBR_TOGGLE_SHIFT, 3);
        }
        other => panic!("unexpected doorbell {:?}", other),
    }

    db.cq(7, false);
    match sim.doorbells().last().unwrap().write {
        DoorbellWrite::Db64(value) => {
            assert_eq!(db_type64(value), DBR_TYPE_CQ);
            assert_eq!(value & DBR_EPOCH_MASK, 0);
        }
        other => panic!("unexpected doorbell {:?}", other),
    }
}

#[test]
fn p4_doorbells_use_per_ring_cells() {
    let (sim, hal) = setup(SimConfig::p4());
    let tx = Doorbell::new(&hal, ChipKind::P4, DbKind::Tx, 0x40, 3, 256, false);
    tx.write(258);
    let cp = Doorbell::new(&hal, ChipKind::P4, DbKind::Cq, 0x41, 2, 1024, false);
    cp.cq(10, false);
    cp.cq(11, true);

    let records = sim.doorbells();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].offset, 3 * DB_LEGACY_STRIDE);
    assert_eq!(records[0].write, DoorbellWrite::Db32(DB_KEY_TX | 2));
    assert_eq!(records[1].offset, 2 * DB_LEGACY_STRIDE);
    assert_eq!(records[1].write, DoorbellWrite::Db32(DB_KEY_CP | DB_IDX_VALID | DB_IRQ_DIS | 10));
    assert_eq!(records[2].write, DoorbellWrite::Db32(DB_KEY_CP | DB_IDX_VALID | 11));
    assert!(cp.is_armed());
}

#[test]
fn replay_rewrites_the_last_index() {
    let (sim, hal) = setup(SimConfig::default());
    let nq = Doorbell::new(&hal, ChipKind::P5, DbKind::Nq, 0x10, 0, 128, false);
    nq.nq(17, false);
    sim.clear_doorbells();
    nq.replay();
    let records = sim.doorbells();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].db_type(), Some(DBR_TYPE_NQ_ARM));
    assert_eq!(records[0].write, DoorbellWrite::Db64(db_key64(DBR_TYPE_NQ_ARM, 0x10) | 17));
}

#[test]
fn ppp_push_alternates_halves() {
    let (sim, hal) = setup(SimConfig::p7());
    let db = Doorbell::new(&hal, ChipKind::P7, DbKind::Tx, 0x50, 0, 256, false);
    let push = PushBuffer::page(&hal, 2, true);
    assert_eq!(push.mode(), PushMode::Ppp);
    assert_eq!(push.threshold(), PUSH_THRESH_WCB);
    push.push(&db, 4, &[0u8; 48]);
    push.push(&db, 8, &[0u8; 48]);

    let records = sim.doorbells();
    let copies: std::vec::Vec<_> = records.iter().filter(|r| r.bar == Bar::Bar2).collect();
    assert_eq!(copies.len(), 2);
    assert_eq!(copies[0].offset, 2 * DB_PUSH_PAGE_SIZE);
    assert_eq!(copies[1].offset, 2 * DB_PUSH_PAGE_SIZE + DB_PPP_SIZE);
    assert_eq!(copies[0].write, DoorbellWrite::WcCopy(48));

    let types: std::vec::Vec<_> = records.iter().filter_map(|r| r.db_type()).collect();
    assert_eq!(types, [DBR_TYPE_PUSH_START, DBR_TYPE_PUSH_END, DBR_TYPE_PUSH_START, DBR_TYPE_PUSH_END]);
    assert_eq!(db.last(), 8);
}

#[test]
fn tx_opaque_round_trips() {
    let opaque = tx_opaque(3, 6, 0x1234_5);
    assert_eq!(tx_opaque_napi(opaque), 3);
    assert_eq!(tx_opaque_bds(opaque), 6);
    assert_eq!(tx_opaque_idx(opaque), 0x2345);
}

#[test]
fn tx_ring_accounting() {
    let (_sim, hal) = setup(SimConfig::default());
    let ring = TxRing::new(&hal, 0, 0, 256).unwrap();
    assert_eq!(ring.avail(), 255);
    ring.publish(10);
    assert_eq!(ring.in_flight(), 10);
    assert_eq!(ring.avail(), 245);
    ring.complete(10);
    assert_eq!(ring.avail(), 255);

    // Indices are free-running and wrap.
    ring.complete(u32::MAX - 1);
    ring.publish(3);
    assert_eq!(ring.in_flight(), 5);
    assert_eq!(ring.slot(3), 3);
    assert_eq!(ring.slot(u32::MAX), 255);
}

#[test]
fn tx_drain_unmaps_in_flight_packets() {
    let (sim, hal) = setup(SimConfig::default());
    let ring = TxRing::new(&hal, 0, 0, 64).unwrap();
    let mappings = sim.live_dma_mappings();
    {
        let _guard = ring.lock_xmit();
        let desc = unsafe { ring.soft_desc(0) };
        let pkt = nic_buffers::TransmitPacket::new(std::vec![0u8; 100]);
        desc.head_map = nic_hal::DmaMapping::map(&*hal, &pkt.head, DmaDirection::ToDevice);
        desc.packet = Some(pkt);
        desc.nr_bds = 2;
        ring.publish(2);
    }
    assert_eq!(sim.live_dma_mappings(), mappings + 1);
    assert_eq!(ring.drain(), 1);
    assert_eq!(sim.live_dma_mappings(), mappings);
    assert_eq!(ring.cons(), 2);
}

fn rx_ring(hal: &HalRef, agg: usize, tpa: usize) -> RxRing {
    let pool = BufferPool::new(hal.clone(), RxBufferMode::Frag, 2048, 64, DmaDirection::FromDevice);
    let agg_pool = BufferPool::new(hal.clone(), RxBufferMode::PagePool, 4096, 0, DmaDirection::FromDevice);
    let params = RxRingParams { index: 0, entries: 16, agg_entries: agg, max_tpa: tpa };
    RxRing::new(hal, params, pool, Some(agg_pool)).unwrap()
}

#[test]
fn rx_fill_posts_all_but_one_slot() {
    let (_sim, hal) = setup(SimConfig::default());
    let mut ring = rx_ring(&hal, 32, 0);
    assert_eq!(ring.fill(), 15);
    assert_eq!(ring.rx_prod(), 15);
    assert_eq!(ring.rx_posted(), 15);
    assert_eq!(ring.agg_prod(), 31);
    assert_eq!(ring.agg_posted(), 31);

    let bd: RxBd = ring.mem().read_slot(4);
    assert_eq!(bd.opaque.get(), 4);
    assert_eq!(bd.buf_len(), 2048 - 64);
    assert_eq!(bd.len_flags_type.get() & 0x3f, RX_BD_TYPE_RX_PACKET_BD);
}

#[test]
fn rx_buffers_cycle_through_the_ring() {
    let (_sim, hal) = setup(SimConfig::default());
    let mut ring = rx_ring(&hal, 0, 0);
    ring.fill();
    let buf = ring.take_rx(0).unwrap();
    assert_eq!(ring.rx_next_cons(), 1);
    assert!(ring.take_rx(0).is_none());
    ring.reuse_rx(buf);
    assert_eq!(ring.rx_prod(), 16);
    let bd: RxBd = ring.mem().read_slot(15);
    assert_eq!(bd.opaque.get(), 15);
    assert_eq!(ring.rx_posted(), 15);

    ring.reset();
    assert_eq!(ring.rx_posted(), 0);
    assert_eq!(ring.rx_prod(), 0);
    assert_eq!(ring.fill(), 15);
}

#[test]
fn agg_slots_are_tracked_by_bitmap() {
    let (_sim, hal) = setup(SimConfig::default());
    let mut ring = rx_ring(&hal, 8, 4);
    ring.fill();
    assert_eq!(ring.agg_posted(), 7);

    // Take slots out of order, as TPA does.
    let b3 = ring.take_agg(3).unwrap();
    let b1 = ring.take_agg(1).unwrap();
    assert!(ring.take_agg(3).is_none());
    // Position 7 still has its own slot free; the next post wraps to position 0 and
    // takes the first free slot after it.
    ring.reuse_agg(b3);
    let bd: RxBd = ring.agg_mem().unwrap().read_slot(7);
    assert_eq!(bd.opaque.get(), 7);
    ring.reuse_agg(b1);
    let bd: RxBd = ring.agg_mem().unwrap().read_slot(0);
    assert_eq!(bd.opaque.get(), 1);
    assert_eq!(ring.agg_posted(), 7);
}

#[test]
fn tpa_ids_are_exclusive() {
    let mut table = TpaTable::new(64);
    table.start(5).unwrap().len = 100;
    assert!(table.ids().is_set(5));

    // Hardware id 69 wants slot 5 as well and is moved to the first free one.
    table.start(69).unwrap().len = 200;
    assert!(table.ids().is_set(0));
    assert_eq!(table.get_mut(69).unwrap().len, 200);
    assert_eq!(table.get_mut(5).unwrap().len, 100);

    let info = table.end(5).unwrap();
    assert_eq!(info.len, 100);
    assert!(!table.ids().is_set(5));
    assert!(table.get_mut(5).is_none());
    assert_eq!(table.ids().in_use(), 1);
    assert_eq!(table.clear(), 1);
    assert_eq!(table.ids().in_use(), 0);
}

#[test]
fn completion_validity_follows_the_pass() {
    let (_sim, hal) = setup(SimConfig::default());
    let mut cp = CpRing::new(&hal, CpKind::Cq, 4).unwrap();
    assert!(!cp.is_valid(0));
    assert_eq!(cp.peek_type(), None);

    let cmp = TxCmp {
        flags_type: Le32::new(CmplType::TxL2 as u32),
        opaque: Le32::new(0xabcd),
        errors_v: Le32::new(CMPL_V),
        sq_cons_idx: Le32::new(2),
    };
    cp.mem().write_slot(0, &cmp);
    assert!(cp.is_valid(0));
    assert_eq!(cp.peek_type(), Some(CmplType::TxL2 as u8));
    assert_eq!(cp.read::<TxCmp>(0).opaque.get(), 0xabcd);

    // On the second pass the same slot needs a clear valid bit.
    assert!(!cp.is_valid(4));
    cp.advance(4);
    assert_eq!(cp.peek_type(), None);
    let stale = TxCmp { errors_v: Le32::new(0), ..cmp };
    cp.mem().write_slot(0, &stale);
    assert_eq!(cp.peek_type(), Some(CmplType::TxL2 as u8));
}
