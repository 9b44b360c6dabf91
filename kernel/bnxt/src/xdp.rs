//! The hooks the datapath calls into: packet delivery and XDP programs.

use alloc::vec::Vec;
use nic_buffers::{ReceivedPacket, TransmitPacket};
use crate::Bnxt;
use crate::napi::Fabric;

/// The verdict of an [`XdpProgram`] on one received frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XdpAction {
    /// Hand the frame to the stack as usual.
    Pass,
    Drop,
    /// Send the frame back out of the device.
    Tx,
    /// Hand the frame to [`PacketSink::xdp_redirect()`].
    Redirect,
    /// The program failed; the frame is dropped.
    Aborted,
}

/// A program run on every received frame before it becomes a packet.
pub trait XdpProgram: Send + Sync {
    /// `head` is the data of the first buffer; `frags` are the rest of a multi-buffer frame.
    fn run(&self, head: &[u8], frags: &[&[u8]]) -> XdpAction;

    /// Whether the program handles frames spread over several buffers. Without it the
    /// MTU is capped so every frame fits one page.
    fn supports_frags(&self) -> bool {
        false
    }
}

/// The host network stack, as the datapath sees it.
pub trait PacketSink: Send + Sync {
    /// Delivers a received packet from NAPI context `napi`.
    fn deliver(&self, napi: u16, pkt: ReceivedPacket);

    /// Takes a frame an XDP program redirected. Returns false if it was not consumed.
    fn xdp_redirect(&self, _napi: u16, _frame: &[u8]) -> bool {
        false
    }
}

/// The TX ring XDP_TX frames of `napi` go out on: the NAPI's own TX ring when it has
/// one, otherwise one picked by RX ring index.
pub(crate) fn xdp_tx_ring(fabric: &Fabric, napi_tx: &[usize], rx: usize) -> Option<usize> {
    if let Some(&t) = napi_tx.first() {
        return Some(t);
    }
    let nr = fabric.txq.len();
    if nr == 0 { None } else { Some(rx % nr) }
}

impl Bnxt {
    /// Transmits a frame an XDP program bounced back. Returns false if it was dropped.
    pub(crate) fn xdp_xmit(&self, fabric: &Fabric, tx: usize, frame: Vec<u8>) -> bool {
        let Some(q) = fabric.txq.get(tx) else { return false };
        let ring = &q.ring;
        let _guard = ring.lock_xmit();
        if ring.is_stopped() || ring.avail() < crate::config::BNXT_TX_BD_BASE_CNT {
            trace!("bnxt: TX ring {} is full, dropping XDP_TX frame", tx);
            return false;
        }
        let pkt = TransmitPacket::new(frame).on_queue(tx as u16);
        if !self.xmit_bds(q, pkt) {
            return false;
        }
        ring.defer_kick();
        true
    }
}
