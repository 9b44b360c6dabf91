extern crate std;

use super::*;
use alloc::{vec, vec::Vec};
use bnxt_sim::{Sim, SimConfig};
use nic_hal::DmaDirection;

fn sim() -> Arc<Sim> {
    Sim::new(SimConfig::default())
}

#[test]
fn receive_buffer_returns_to_pool_on_drop() {
    let sim = sim();
    let pool = BufferPool::new(sim.hal(), RxBufferMode::Frag, 2048, 64, DmaDirection::FromDevice);
    let mut buf = pool.alloc().unwrap();
    assert_eq!(pool.outstanding(), 1);
    assert_eq!(buf.capacity(), 2048 - 64);
    assert_eq!(buf.dma_addr(), buf.phys_addr() + 64);

    buf.set_received_len(100).unwrap();
    assert_eq!(buf.len(), 100);
    assert!(buf.set_data(2000, 100).is_err());

    let paddr = buf.phys_addr();
    drop(buf);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.available(), 1);

    // the recycled buffer keeps its mapping
    let again = pool.alloc().unwrap();
    assert_eq!(again.phys_addr(), paddr);
    assert_eq!(again.len(), 0);
}

#[test]
fn page_pool_buffers_are_pages() {
    let sim = sim();
    let pool = BufferPool::new(sim.hal(), RxBufferMode::PagePool, 1024, 256, DmaDirection::Bidirectional);
    assert_eq!(pool.buf_size(), nic_hal::PAGE_SIZE);
    let buf = pool.alloc().unwrap();
    assert_eq!(buf.truesize(), nic_hal::PAGE_SIZE);
}

#[test]
fn closed_pool_unmaps_everything() {
    let sim = sim();
    let pool = BufferPool::new(sim.hal(), RxBufferMode::Frag, 512, 0, DmaDirection::FromDevice);
    let a = pool.alloc().unwrap();
    let b = pool.alloc().unwrap();
    drop(a);
    assert_eq!(sim.live_dma_mappings(), 2);
    pool.close();
    assert_eq!(sim.live_dma_mappings(), 1);
    assert!(pool.alloc().is_none());
    drop(b);
    assert_eq!(sim.live_dma_mappings(), 0);
    assert_eq!(pool.available(), 0);
}

#[test]
fn xsk_pool_never_grows() {
    let sim = sim();
    let pool = BufferPool::new_xsk(sim.hal(), 2048, 256, 2).unwrap();
    let a = pool.alloc().unwrap();
    let _b = pool.alloc().unwrap();
    assert!(pool.alloc().is_none());
    drop(a);
    assert!(pool.alloc().is_some());
}

#[test]
fn mapping_failure_fails_allocation() {
    let sim = sim();
    let pool = BufferPool::new(sim.hal(), RxBufferMode::Frag, 512, 0, DmaDirection::FromDevice);
    sim.fail_next_dma_maps(1);
    assert!(pool.alloc().is_none());
    assert!(pool.alloc().is_some());
}

#[test]
fn transmit_packet_lengths_and_lso_headers() {
    let mut pkt = TransmitPacket::new(vec![0u8; 54])
        .with_frags(vec![TxFrag::Heap(vec![1u8; 1000]), TxFrag::Heap(vec![2u8; 500])]);
    assert_eq!(pkt.len(), 1554);
    assert_eq!(pkt.nr_frags(), 2);
    assert_eq!(pkt.lso_header_len(), 0);

    pkt.offsets = HeaderOffsets { network: 14, transport: 34, tcp_hdr_len: 20, ..Default::default() };
    pkt.gso = Some(GsoInfo { kind: GsoType::TcpV4, size: 1460, segs: 0, tunnel: false });
    assert_eq!(pkt.lso_header_len(), 54);

    pkt.gso = Some(GsoInfo { kind: GsoType::UdpL4, size: 1400, segs: 0, tunnel: false });
    assert_eq!(pkt.lso_header_len(), 42);

    pkt.encapsulated = true;
    pkt.offsets.inner_transport = 84;
    pkt.offsets.inner_tcp_hdr_len = 32;
    pkt.gso = Some(GsoInfo { kind: GsoType::TcpV6, size: 1400, segs: 0, tunnel: true });
    assert_eq!(pkt.lso_header_len(), 116);
}

#[test]
fn padding_linearizes_short_packets() {
    let mut pkt = TransmitPacket::new(vec![0xaa; 20]).with_frags(vec![TxFrag::Heap(vec![0xbb; 10])]);
    pkt.pad_to(ETH_ZLEN);
    assert_eq!(pkt.nr_frags(), 0);
    assert_eq!(pkt.head.len(), ETH_ZLEN);
    assert_eq!(&pkt.head[20..30], &[0xbb; 10]);
    assert!(pkt.head[30..].iter().all(|b| *b == 0));

    let mut long = TransmitPacket::new(vec![0; 100]);
    long.pad_to(ETH_ZLEN);
    assert_eq!(long.len(), 100);
}

#[test]
fn received_packet_accounting() {
    let sim = sim();
    let pool = BufferPool::new(sim.hal(), RxBufferMode::PagePool, 0, 0, DmaDirection::FromDevice);
    let mut head = pool.alloc().unwrap();
    head.raw_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
    head.set_received_len(4).unwrap();
    let mut pkt = ReceivedPacket::new(PacketHead::Buffer(head));
    let mut frag = pool.alloc().unwrap();
    frag.raw_mut()[..2].copy_from_slice(&[5, 6]);
    frag.set_received_len(2).unwrap();
    pkt.push_frag(frag);

    assert_eq!(pkt.len(), 6);
    assert_eq!(pkt.data_len(), 2);
    assert_eq!(pkt.truesize(), 2 * nic_hal::PAGE_SIZE);
    assert_eq!(pkt.to_vec(), vec![1, 2, 3, 4, 5, 6]);
    assert!(!pkt.is_copied());

    drop(pkt);
    assert_eq!(pool.available(), 2);

    let copied = ReceivedPacket::new(PacketHead::Copied(Vec::from(&[9u8; 3][..])));
    assert!(copied.is_copied());
    assert_eq!(copied.head(), &[9, 9, 9]);
}

#[test]
fn buffers_come_back_from_other_threads() {
    let sim = sim();
    let pool = BufferPool::new_xsk(sim.hal(), 2048, 0, 3).unwrap();
    assert_eq!(pool.available(), 3);
    let bufs: Vec<ReceiveBuffer> = (0..3).map(|_| pool.alloc().unwrap()).collect();
    assert_eq!(pool.available(), 0);

    let handle = std::thread::spawn(move || drop(bufs));
    handle.join().unwrap();
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.outstanding(), 0);
    assert!(pool.alloc().is_some());
}
