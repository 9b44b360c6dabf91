//! The rings of an open device, grouped into NAPI contexts.

use core::sync::atomic::{AtomicBool, AtomicU64};
use alloc::{sync::Arc, vec::Vec};
use spin::Mutex;
use nic_hal::DmaRegion;
use bnxt_rings::{CpRing, PushMode, RxRing, TxRing};
use crate::{NetFeatures, RingCounts, XdpProgram};
use crate::dim::Dim;
use crate::stats::RingSwStats;

/// Counters of a TX ring, updated from both the transmit path and the poll loop.
#[derive(Default)]
pub(crate) struct TxQueueStats {
    pub dropped: AtomicU64,
    pub push: AtomicU64,
    pub push_cmpl: AtomicU64,
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
    /// A completion did not match the ring's shadow state.
    pub fault: AtomicBool,
}

pub(crate) struct TxQueue {
    pub ring: TxRing,
    /// The ring's position in its NAPI's TX list, carried in the opaque of its packets.
    pub napi_slot: u16,
    pub stats: TxQueueStats,
}

/// A statistics context: the DMA block firmware writes ring counters into.
pub(crate) struct StatCtx {
    pub mem: DmaRegion,
    pub fw_id: u32,
}

/// Datapath parameters fixed for as long as the rings exist.
pub(crate) struct DataParams {
    pub rx_copy_thresh: usize,
    pub tx_push_thresh: usize,
    pub push: PushMode,
    pub features: NetFeatures,
    pub xdp: Option<Arc<dyn XdpProgram>>,
    /// A stopped TX queue is woken once this many descriptors are free.
    pub tx_wake_thresh: u32,
}

/// One poll context: a completion ring (behind a notification queue on P5 and newer chips)
/// and the RX and TX rings it serves.
pub(crate) struct Napi {
    pub index: u16,
    pub nq: Option<CpRing>,
    pub cq: CpRing,
    pub rx: Option<RxRing>,
    /// Indices into [`Fabric::txq`].
    pub tx: Vec<usize>,
    pub sw: RingSwStats,
    pub dim: Dim,
    /// Consecutive buffer errors seen on the RX ring.
    pub buf_errors: u64,
    /// The RX ring needs a reset; the poll loop leaves it alone until then.
    pub rx_fault: bool,
}

/// Everything that exists only while the device is open.
pub(crate) struct Fabric {
    pub counts: RingCounts,
    pub txq: Vec<TxQueue>,
    pub napis: Vec<Mutex<Napi>>,
    pub stat_ctxs: Vec<StatCtx>,
    /// Ring groups (P4 only), one per RX ring.
    pub grps: Vec<u32>,
    pub params: DataParams,
}

impl Fabric {
    /// The NAPI that serves RX ring `rx`.
    pub fn rx_napi(&self, rx: usize) -> usize {
        rx
    }

    /// The NAPI that serves TX ring `tx`.
    pub fn tx_napi(&self, tx: usize) -> usize {
        if self.counts.shared { tx } else { self.counts.rx as usize + tx }
    }
}
