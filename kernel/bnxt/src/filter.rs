//! Firmware-owned L2 and n-tuple classification filters.

use alloc::collections::BTreeMap;
use bnxt_hsi::{Le16, Le32, Le64};
use bnxt_hsi::hwrm::*;
use crate::{Bnxt, BnxtError};

/// Matches frames by destination MAC and, optionally, outer VLAN.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct L2FilterKey {
    pub addr: [u8; 6],
    pub vlan: Option<u16>,
}

/// A 5-tuple match. Unset fields match anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NtupleKey {
    pub ipv6: bool,
    pub ip_protocol: u8,
    pub src_ip: [u8; 16],
    pub src_ip_mask: [u8; 16],
    pub dst_ip: [u8; 16],
    pub dst_ip_mask: [u8; 16],
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NtupleAction {
    /// Steer matching packets to an RX ring.
    Steer(u16),
    Drop,
}

/// Identifies an installed filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FilterHandle(u32);

#[derive(Clone, Copy, Debug)]
enum FilterEntry {
    L2 { fw_id: u64 },
    Ntuple { fw_id: u64, l2: FilterHandle },
}

#[derive(Debug, Default)]
pub(crate) struct FilterTable {
    next: u32,
    entries: BTreeMap<FilterHandle, FilterEntry>,
}

impl FilterTable {
    fn insert(&mut self, entry: FilterEntry) -> FilterHandle {
        self.next = self.next.wrapping_add(1);
        let handle = FilterHandle(self.next);
        self.entries.insert(handle, entry);
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Bnxt {
    /// Installs an RX L2 filter that sends matching frames to the default VNIC.
    pub fn alloc_l2_filter(&self, key: L2FilterKey) -> Result<FilterHandle, BnxtError> {
        self.check_alive()?;
        let vnic_id = self.vnic.lock().default_id().ok_or(BnxtError::NoDevice)?;
        let fw_id = self.hwrm_l2_filter_alloc(vnic_id, &key)?;
        let handle = self.filters.lock().insert(FilterEntry::L2 { fw_id });
        debug!("bnxt: L2 filter {:?} for {:x?} installed", handle, key.addr);
        Ok(handle)
    }

    pub(crate) fn hwrm_l2_filter_alloc(&self, vnic_id: u16, key: &L2FilterKey) -> Result<u64, BnxtError> {
        let mut req = self.hwrm.req_init::<CfaL2FilterAllocInput>()?;
        let mut enables = CFA_L2_FILTER_ALLOC_ENABLES_L2_ADDR
            | CFA_L2_FILTER_ALLOC_ENABLES_L2_ADDR_MASK
            | CFA_L2_FILTER_ALLOC_ENABLES_DST_ID;
        req.req.flags = Le32::new(CFA_L2_FILTER_ALLOC_FLAGS_PATH_RX | CFA_L2_FILTER_ALLOC_FLAGS_OUTERMOST);
        req.req.l2_addr = key.addr;
        req.req.l2_addr_mask = [0xff; 6];
        req.req.dst_id = Le16::new(vnic_id);
        if let Some(vlan) = key.vlan {
            enables |= CFA_L2_FILTER_ALLOC_ENABLES_L2_OVLAN | CFA_L2_FILTER_ALLOC_ENABLES_L2_OVLAN_MASK;
            req.req.l2_ovlan = Le16::new(vlan);
            req.req.l2_ovlan_mask = Le16::new(0x0fff);
        }
        req.req.enables = Le32::new(enables);
        Ok(req.send()?.l2_filter_id.get())
    }

    pub(crate) fn hwrm_l2_filter_free(&self, fw_id: u64) -> Result<(), BnxtError> {
        let mut req = self.hwrm.req_init::<CfaL2FilterFreeInput>()?;
        req.req.l2_filter_id = Le64::new(fw_id);
        req.send()?;
        Ok(())
    }

    /// Removes an L2 filter. N-tuple filters built on it must be freed first.
    pub fn free_l2_filter(&self, handle: FilterHandle) -> Result<(), BnxtError> {
        self.check_alive()?;
        let mut filters = self.filters.lock();
        let Some(&FilterEntry::L2 { fw_id }) = filters.entries.get(&handle) else {
            return Err(BnxtError::InvalidArgument);
        };
        let in_use = filters.entries.values().any(|e| matches!(e, FilterEntry::Ntuple { l2, .. } if *l2 == handle));
        if in_use {
            return Err(BnxtError::Busy);
        }
        self.hwrm_l2_filter_free(fw_id)?;
        filters.entries.remove(&handle);
        Ok(())
    }

    /// Installs an n-tuple filter on top of L2 filter `l2`.
    pub fn alloc_ntuple_filter(&self, l2: FilterHandle, key: &NtupleKey, action: NtupleAction) -> Result<FilterHandle, BnxtError> {
        self.check_alive()?;
        let l2_fw_id = match self.filters.lock().entries.get(&l2) {
            Some(&FilterEntry::L2 { fw_id }) => fw_id,
            _ => return Err(BnxtError::InvalidArgument),
        };
        let mut req = self.hwrm.req_init::<CfaNtupleFilterAllocInput>()?;
        let mut enables = CFA_NTUPLE_FILTER_ALLOC_ENABLES_L2_FILTER_ID
            | CFA_NTUPLE_FILTER_ALLOC_ENABLES_ETHERTYPE
            | CFA_NTUPLE_FILTER_ALLOC_ENABLES_IP_ADDR_TYPE
            | CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_IPADDR
            | CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_IPADDR_MASK
            | CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_IPADDR
            | CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_IPADDR_MASK;
        req.req.l2_filter_id = Le64::new(l2_fw_id);
        if key.ipv6 {
            req.req.ethertype = Le16::new(0x86dd);
            req.req.ip_addr_type = CFA_NTUPLE_FILTER_ALLOC_IP_ADDR_TYPE_IPV6;
        } else {
            req.req.ethertype = Le16::new(0x0800);
            req.req.ip_addr_type = CFA_NTUPLE_FILTER_ALLOC_IP_ADDR_TYPE_IPV4;
        }
        if key.ip_protocol != 0 {
            enables |= CFA_NTUPLE_FILTER_ALLOC_ENABLES_IP_PROTOCOL;
            req.req.ip_protocol = key.ip_protocol;
        }
        req.req.src_ipaddr = key.src_ip;
        req.req.src_ipaddr_mask = key.src_ip_mask;
        req.req.dst_ipaddr = key.dst_ip;
        req.req.dst_ipaddr_mask = key.dst_ip_mask;
        if let Some(port) = key.src_port {
            enables |= CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_PORT | CFA_NTUPLE_FILTER_ALLOC_ENABLES_SRC_PORT_MASK;
            req.req.src_port = port.to_be_bytes();
            req.req.src_port_mask = [0xff; 2];
        }
        if let Some(port) = key.dst_port {
            enables |= CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_PORT | CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_PORT_MASK;
            req.req.dst_port = port.to_be_bytes();
            req.req.dst_port_mask = [0xff; 2];
        }
        match action {
            NtupleAction::Drop => req.req.flags = Le32::new(CFA_NTUPLE_FILTER_ALLOC_FLAGS_DROP),
            NtupleAction::Steer(ring) => {
                let dst = self.rfs_vnic(ring).ok_or(BnxtError::InvalidArgument)?;
                enables |= CFA_NTUPLE_FILTER_ALLOC_ENABLES_DST_ID;
                req.req.dst_id = Le16::new(dst);
            }
        }
        req.req.enables = Le32::new(enables);
        let fw_id = req.send()?.ntuple_filter_id.get();
        Ok(self.filters.lock().insert(FilterEntry::Ntuple { fw_id, l2 }))
    }

    pub fn free_ntuple_filter(&self, handle: FilterHandle) -> Result<(), BnxtError> {
        self.check_alive()?;
        let mut filters = self.filters.lock();
        let Some(&FilterEntry::Ntuple { fw_id, .. }) = filters.entries.get(&handle) else {
            return Err(BnxtError::InvalidArgument);
        };
        let mut req = self.hwrm.req_init::<CfaNtupleFilterFreeInput>()?;
        req.req.ntuple_filter_id = Le64::new(fw_id);
        req.send()?;
        filters.entries.remove(&handle);
        Ok(())
    }

    /// Forgets every user filter. Firmware drops them along with their VNICs on close.
    pub(crate) fn clear_filters(&self) {
        let mut filters = self.filters.lock();
        if filters.len() > 0 {
            debug!("bnxt: dropping {} filters", filters.len());
        }
        filters.entries.clear();
    }
}
