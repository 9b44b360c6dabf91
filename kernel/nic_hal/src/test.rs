extern crate std;

use super::*;
use alloc::vec::Vec;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::Mutex;

/// A minimal heap-backed Hal with identity bus addresses.
#[derive(Default)]
struct HeapHal {
    live: Mutex<Vec<(u64, usize)>>,
    writes: Mutex<Vec<(Bar, usize, u64)>>,
}

impl Hal for HeapHal {
    fn dma_alloc_coherent(&self, size: usize) -> Option<(PhysicalAddress, NonNull<u8>)> {
        let layout = Layout::from_size_align(size, PAGE_SIZE).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        self.live.lock().unwrap().push((ptr.as_ptr() as u64, size));
        Some((PhysicalAddress::new(ptr.as_ptr() as u64), ptr))
    }
    unsafe fn dma_free_coherent(&self, paddr: PhysicalAddress, vaddr: NonNull<u8>, size: usize) {
        let mut live = self.live.lock().unwrap();
        let idx = live.iter().position(|&(p, s)| p == paddr.value() && s == size).expect("double free");
        live.remove(idx);
        dealloc(vaddr.as_ptr(), Layout::from_size_align(size, PAGE_SIZE).unwrap());
    }
    fn dma_map(&self, vaddr: NonNull<u8>, _len: usize, _dir: DmaDirection) -> Option<PhysicalAddress> {
        Some(PhysicalAddress::new(vaddr.as_ptr() as u64))
    }
    fn dma_unmap(&self, _paddr: PhysicalAddress, _len: usize, _dir: DmaDirection) {}
    fn read32(&self, _bar: Bar, _offset: usize) -> u32 { 0 }
    fn write32(&self, bar: Bar, offset: usize, value: u32) {
        self.writes.lock().unwrap().push((bar, offset, value as u64));
    }
    fn write64(&self, bar: Bar, offset: usize, value: u64) {
        self.writes.lock().unwrap().push((bar, offset, value));
    }
    fn wc_copy(&self, bar: Bar, offset: usize, data: &[u64]) {
        for (i, q) in data.iter().enumerate() {
            self.write64(bar, offset + i * 8, *q);
        }
    }
    fn pci_read_config16(&self, _offset: u16) -> u16 { 0xffff }
    fn pci_enable_device(&self) -> Result<(), &'static str> { Ok(()) }
    fn pci_disable_device(&self) {}
    fn pci_set_master(&self, _enable: bool) {}
    fn delay_us(&self, _us: u64) {}
    fn now_us(&self) -> u64 { 0 }
}

#[test]
fn region_is_zeroed_and_freed() {
    let hal = Arc::new(HeapHal::default());
    let hal_ref: HalRef = hal.clone();
    {
        let region = DmaRegion::new(&hal_ref, 8192).unwrap();
        assert_eq!(region.size_in_bytes(), 8192);
        assert_eq!(region.phys_addr().page_offset(), 0);
        assert!(region.as_slice(0, 8192).unwrap().iter().all(|b| *b == 0));
        assert_eq!(hal.live.lock().unwrap().len(), 1);
    }
    assert!(hal.live.lock().unwrap().is_empty());
}

#[test]
fn typed_access_and_bounds() {
    let hal: HalRef = Arc::new(HeapHal::default());
    let mut region = DmaRegion::new(&hal, 64).unwrap();
    region.write::<u64>(8, 0x1122_3344_5566_7788);
    assert_eq!(region.read::<u32>(8), 0x5566_7788);
    assert_eq!(region.read::<u32>(12), 0x1122_3344);

    region.copy_from(60, &[1, 2, 3, 4]);
    let mut out = [0u8; 4];
    region.copy_to(60, &mut out);
    assert_eq!(out, [1, 2, 3, 4]);

    assert!(region.as_slice(60, 5).is_err());
    assert!(region.as_slice_mut(usize::MAX, 2).is_err());
    region.fill(0xab);
    assert_eq!(region.read::<u8>(0), 0xab);
}

#[test]
#[should_panic]
fn out_of_bounds_read_panics() {
    let hal: HalRef = Arc::new(HeapHal::default());
    let region = DmaRegion::new(&hal, 16).unwrap();
    let _ = region.read::<u64>(12);
}

#[test]
fn zero_sized_region_is_rejected() {
    let hal: HalRef = Arc::new(HeapHal::default());
    assert!(DmaRegion::new(&hal, 0).is_err());
}

#[test]
fn mmio_copy_helpers_pad_the_tail() {
    let hal = HeapHal::default();
    iowrite32_copy(&hal, Bar::Bar0, 0x100, &[1, 0, 0, 0, 2, 3]);
    let writes = hal.writes.lock().unwrap().clone();
    assert_eq!(writes, std::vec![(Bar::Bar0, 0x100, 1), (Bar::Bar0, 0x104, 0x0302)]);

    let mut qwords = Vec::new();
    to_qwords(&[0xff; 10], &mut qwords);
    assert_eq!(qwords, std::vec![u64::MAX, 0xffff]);
}

#[test]
fn streaming_mapping_identity() {
    let hal = HeapHal::default();
    let buf = [0u8; 32];
    let map = DmaMapping::map(&hal, &buf, DmaDirection::ToDevice).unwrap();
    assert_eq!(map.phys_addr().value(), buf.as_ptr() as u64);
    assert_eq!(map.len(), 32);
    map.unmap(&hal);
}
