//! skb-like packet handles.

use core::ops::Deref;
use alloc::vec::Vec;
use crate::{ReceiveBuffer, TransmitBuffer};

/// The kind of segmentation offload requested for, or performed on, a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GsoType {
    TcpV4,
    TcpV6,
    UdpL4,
}

/// Segmentation offload parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GsoInfo {
    pub kind: GsoType,
    /// The payload size of each segment (the MSS for TCP).
    pub size: u16,
    /// The number of segments; only meaningful on received aggregates.
    pub segs: u16,
    /// True if the segments are encapsulated in a tunnel.
    pub tunnel: bool,
}

/// An 802.1Q or 802.1ad tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VlanTag {
    pub tci: u16,
    pub proto: u16,
}

pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_8021AD: u16 = 0x88a8;
pub const ETH_HLEN: usize = 14;
pub const ETH_ZLEN: usize = 60;
pub const UDP_HLEN: usize = 8;

/// Header offsets of a packet, from the start of its data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderOffsets {
    pub network: u16,
    pub transport: u16,
    /// Length of the TCP header, including options.
    pub tcp_hdr_len: u16,
    /// Offsets of the inner headers of an encapsulated packet.
    pub inner_network: u16,
    pub inner_transport: u16,
    pub inner_tcp_hdr_len: u16,
}

/// A fragment of a packet to transmit.
pub enum TxFrag {
    /// Ordinary memory that the driver maps for DMA.
    Heap(Vec<u8>),
    /// Memory that is already DMA-addressable.
    Dma(TransmitBuffer),
}

impl TxFrag {
    pub fn len(&self) -> usize {
        match self {
            TxFrag::Heap(v) => v.len(),
            TxFrag::Dma(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Deref for TxFrag {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            TxFrag::Heap(v) => &v[..],
            TxFrag::Dma(b) => &b[..],
        }
    }
}

/// A packet handed to the driver for transmission.
pub struct TransmitPacket {
    /// The linear part, which holds at least the headers.
    pub head: Vec<u8>,
    pub frags: Vec<TxFrag>,
    /// The transmit queue the stack selected.
    pub queue_index: u16,
    pub gso: Option<GsoInfo>,
    /// The stack asks the NIC to fill in L4 (and L3) checksums.
    pub csum_partial: bool,
    pub encapsulated: bool,
    pub offsets: HeaderOffsets,
    /// A VLAN tag to insert.
    pub vlan: Option<VlanTag>,
    /// The stack asks for a hardware transmit timestamp.
    pub hw_timestamp: bool,
    /// A launch time in nanoseconds, for scheduled transmit.
    pub launch_time: Option<u64>,
    /// More packets follow immediately, so the doorbell may be deferred.
    pub xmit_more: bool,
    /// The CFA action for traffic sent on behalf of a VF representor.
    pub cfa_action: u16,
}

impl TransmitPacket {
    /// Creates a packet whose data is entirely linear, with no offloads requested.
    pub fn new(head: Vec<u8>) -> TransmitPacket {
        TransmitPacket {
            head,
            frags: Vec::new(),
            queue_index: 0,
            gso: None,
            csum_partial: false,
            encapsulated: false,
            offsets: HeaderOffsets::default(),
            vlan: None,
            hw_timestamp: false,
            launch_time: None,
            xmit_more: false,
            cfa_action: 0,
        }
    }

    pub fn with_frags(mut self, frags: Vec<TxFrag>) -> TransmitPacket {
        self.frags = frags;
        self
    }

    pub fn on_queue(mut self, queue_index: u16) -> TransmitPacket {
        self.queue_index = queue_index;
        self
    }

    /// The total length of the packet.
    pub fn len(&self) -> usize {
        self.head.len() + self.frags.iter().map(|f| f.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nr_frags(&self) -> usize {
        self.frags.len()
    }

    /// The length of all headers that precede the segmented payload of a GSO packet.
    ///
    /// For encapsulated packets this covers the inner TCP header; for UDP segmentation it
    /// ends after the UDP header.
    pub fn lso_header_len(&self) -> usize {
        let o = &self.offsets;
        match self.gso {
            Some(GsoInfo { kind: GsoType::UdpL4, .. }) => o.transport as usize + UDP_HLEN,
            Some(_) if self.encapsulated => o.inner_transport as usize + o.inner_tcp_hdr_len as usize,
            Some(_) => o.transport as usize + o.tcp_hdr_len as usize,
            None => 0,
        }
    }

    /// Moves all fragment data into the linear head.
    pub fn linearize(&mut self) {
        for frag in self.frags.drain(..) {
            self.head.extend_from_slice(&frag);
        }
    }

    /// Pads the packet with zeros up to `min_len` bytes, linearizing it first if needed.
    pub fn pad_to(&mut self, min_len: usize) {
        if self.len() >= min_len {
            return;
        }
        self.linearize();
        self.head.resize(min_len, 0);
    }

    /// Copies the whole packet into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.head);
        for frag in &self.frags {
            out.extend_from_slice(frag);
        }
        out
    }
}


/// The checksum verdict attached to a received packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumStatus {
    /// The stack must verify checksums itself.
    None,
    /// The NIC verified the checksums; `level` counts verified encapsulation levels beyond the first.
    Unnecessary { level: u8 },
}

/// The RSS hash attached to a received packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RssHash {
    pub value: u32,
    /// True if the hash covered L4 ports, false if only L3 addresses.
    pub l4: bool,
}

/// The linear part of a received packet.
pub enum PacketHead {
    /// Small packets are copied out so their receive buffer can be reused immediately.
    Copied(Vec<u8>),
    /// Larger packets are built around the receive buffer itself.
    Buffer(ReceiveBuffer),
}

impl Deref for PacketHead {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            PacketHead::Copied(v) => &v[..],
            PacketHead::Buffer(b) => &b[..],
        }
    }
}

/// A network packet that has been received by the NIC.
pub struct ReceivedPacket {
    head: PacketHead,
    frags: Vec<ReceiveBuffer>,
    truesize: usize,
    pub rss_hash: Option<RssHash>,
    pub vlan: Option<VlanTag>,
    pub csum: ChecksumStatus,
    /// A hardware receive timestamp, in nanoseconds.
    pub hw_timestamp: Option<u64>,
    /// Set on aggregated (TPA/GRO) packets.
    pub gso: Option<GsoInfo>,
    pub queue_index: u16,
}

impl ReceivedPacket {
    pub fn new(head: PacketHead) -> ReceivedPacket {
        let truesize = match &head {
            PacketHead::Copied(v) => v.capacity(),
            PacketHead::Buffer(b) => b.truesize(),
        };
        ReceivedPacket {
            head,
            frags: Vec::new(),
            truesize,
            rss_hash: None,
            vlan: None,
            csum: ChecksumStatus::None,
            hw_timestamp: None,
            gso: None,
            queue_index: 0,
        }
    }

    /// Appends an aggregation buffer as a fragment.
    pub fn push_frag(&mut self, frag: ReceiveBuffer) {
        self.truesize += frag.truesize();
        self.frags.push(frag);
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Mutable access to the linear part, used to fix up headers.
    pub fn head_mut(&mut self) -> &mut [u8] {
        match &mut self.head {
            PacketHead::Copied(v) => &mut v[..],
            PacketHead::Buffer(b) => &mut b[..],
        }
    }

    pub fn frags(&self) -> &[ReceiveBuffer] {
        &self.frags
    }

    pub fn nr_frags(&self) -> usize {
        self.frags.len()
    }

    /// The total length of the packet.
    pub fn len(&self) -> usize {
        self.head.len() + self.data_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The length of the non-linear part.
    pub fn data_len(&self) -> usize {
        self.frags.iter().map(|f| f.len()).sum()
    }

    /// The memory this packet accounts for.
    pub fn truesize(&self) -> usize {
        self.truesize
    }

    /// Returns true if the head was copied out of its receive buffer.
    pub fn is_copied(&self) -> bool {
        matches!(self.head, PacketHead::Copied(_))
    }

    /// Copies the whole packet into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.head);
        for frag in &self.frags {
            out.extend_from_slice(frag);
        }
        out
    }

    /// Splits the packet into its buffers, e.g., to recycle them.
    pub fn into_parts(self) -> (PacketHead, Vec<ReceiveBuffer>) {
        (self.head, self.frags)
    }
}
