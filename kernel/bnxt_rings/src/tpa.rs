//! State of the hardware receive aggregations (TPA) open on an RX ring.

use alloc::vec::Vec;
use bit_field::BitField;
use nic_buffers::ReceiveBuffer;
use bnxt_hsi::cmpl::RxAggCmp;

/// The number of aggregation ids the hardware may use.
pub const MAX_TPA_HW: usize = 1024;

/// Maps the aggregation ids chosen by hardware onto a dense range of software slots.
///
/// A hardware id takes the slot of the same number when it is free, otherwise the first
/// free slot. A slot is only reused after the aggregation that held it has ended.
pub struct AggIdMap {
    bmap: Vec<u64>,
    map: Vec<u16>,
    slots: usize,
}

impl AggIdMap {
    pub fn new(slots: usize) -> AggIdMap {
        let slots = slots.max(1).next_power_of_two();
        AggIdMap {
            bmap: alloc::vec![0; (slots + 63) / 64],
            map: alloc::vec![u16::MAX; MAX_TPA_HW],
            slots,
        }
    }

    pub fn is_set(&self, slot: usize) -> bool {
        slot < self.slots && self.bmap[slot / 64].get_bit(slot % 64)
    }

    fn set(&mut self, slot: usize, value: bool) {
        self.bmap[slot / 64].set_bit(slot % 64, value);
    }

    /// Assigns a slot to hardware id `hw_id`. Returns `None` when every slot is taken.
    pub fn alloc(&mut self, hw_id: u16) -> Option<u16> {
        let hw = hw_id as usize % MAX_TPA_HW;
        let mut slot = hw & (self.slots - 1);
        if self.is_set(slot) {
            slot = (0..self.slots).find(|s| !self.is_set(*s))?;
        }
        self.set(slot, true);
        self.map[hw] = slot as u16;
        Some(slot as u16)
    }

    /// The slot currently assigned to hardware id `hw_id`.
    pub fn lookup(&self, hw_id: u16) -> Option<u16> {
        let slot = self.map[hw_id as usize % MAX_TPA_HW];
        if self.is_set(slot as usize) {
            Some(slot)
        } else {
            None
        }
    }

    pub fn free(&mut self, slot: u16) {
        if (slot as usize) < self.slots {
            self.set(slot as usize, false);
        }
    }

    /// The number of slots in use.
    pub fn in_use(&self) -> usize {
        self.bmap.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        for word in self.bmap.iter_mut() {
            *word = 0;
        }
    }
}

/// One open aggregation: its first buffer, the metadata from its TPA start completion, and
/// the aggregation buffers reported so far.
#[derive(Default)]
pub struct TpaInfo {
    pub data: Option<ReceiveBuffer>,
    pub len: u32,
    /// The flags word of the TPA start completion (RSS valid, itype).
    pub flags: u32,
    pub rss_hash: u32,
    pub hash_type: u32,
    pub flags2: u32,
    pub metadata: u32,
    pub hdr_info: u32,
    pub aggs: Vec<RxAggCmp>,
}

pub struct TpaTable {
    infos: Vec<TpaInfo>,
    ids: AggIdMap,
}

impl TpaTable {
    pub fn new(max_aggs: usize) -> TpaTable {
        let ids = AggIdMap::new(max_aggs);
        let infos = (0..ids.slots).map(|_| TpaInfo::default()).collect();
        TpaTable { infos, ids }
    }

    pub fn ids(&self) -> &AggIdMap {
        &self.ids
    }

    pub fn max_aggs(&self) -> usize {
        self.infos.len()
    }

    /// Opens an aggregation for hardware id `hw_id`.
    pub fn start(&mut self, hw_id: u16) -> Option<&mut TpaInfo> {
        let slot = self.ids.alloc(hw_id)?;
        let info = &mut self.infos[slot as usize];
        info.aggs.clear();
        Some(info)
    }

    /// The open aggregation of hardware id `hw_id`.
    pub fn get_mut(&mut self, hw_id: u16) -> Option<&mut TpaInfo> {
        let slot = self.ids.lookup(hw_id)?;
        Some(&mut self.infos[slot as usize])
    }

    /// Closes the aggregation of hardware id `hw_id` and returns its state.
    pub fn end(&mut self, hw_id: u16) -> Option<TpaInfo> {
        let slot = self.ids.lookup(hw_id)?;
        self.ids.free(slot);
        Some(core::mem::take(&mut self.infos[slot as usize]))
    }

    /// Drops every open aggregation, returning their buffers to their pools.
    pub fn clear(&mut self) -> usize {
        let open = self.ids.in_use();
        for info in self.infos.iter_mut() {
            *info = TpaInfo::default();
        }
        self.ids.clear();
        open
    }
}
