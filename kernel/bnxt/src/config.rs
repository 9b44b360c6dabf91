//! Compile-time limits and the run-time configuration of a bnxt device.

use nic_buffers::RxBufferMode;

pub const BNXT_MIN_MTU:             u16 = 68;
pub const BNXT_MAX_MTU:             u16 = 9500;
pub const BNXT_DEFAULT_MTU:         u16 = 1500;

/// The largest MTU an XDP program can be attached with while RX stays single-buffer.
pub const BNXT_MAX_PAGE_MODE_MTU:   u16 = 3840 - 14 - 4;

pub const BNXT_MAX_TX_RING_SIZE:    usize = 2048;
pub const BNXT_MAX_RX_RING_SIZE:    usize = 2048;
pub const BNXT_MAX_AGG_RING_SIZE:   usize = 8192;
pub const BNXT_MAX_CP_RING_SIZE:    usize = 16384;
pub const BNXT_DEFAULT_RING_SIZE:   usize = 512;
/// AGG ring entries per RX ring entry.
pub const BNXT_AGG_RING_FACTOR:     usize = 4;
/// A TX ring must hold at least one maximally fragmented packet.
pub const BNXT_MIN_TX_DESC_CNT:     usize = MAX_SKB_FRAGS + 3;

pub const BNXT_RX_COPY_THRESH:      usize = 256;
pub const BNXT_RX_HEADROOM:         usize = 64;
pub const XDP_PACKET_HEADROOM:      usize = 256;
/// Every AGG buffer is one page.
pub const BNXT_RX_PAGE_SIZE:        usize = 4096;
pub const VLAN_HLEN:                usize = 4;

/// Frames shorter than this are padded before they are handed to the NIC.
pub const BNXT_MIN_PKT_SIZE:        usize = 52;
pub const MAX_SKB_FRAGS:            usize = 17;
/// The number of descriptors every packet needs besides one per fragment.
pub const BNXT_TX_BD_BASE_CNT:      u32 = 2;

pub const BNXT_MAX_TPA:             u16 = 64;
pub const BNXT_MAX_TPA_SEGS:        u16 = 0x3f;

pub const BNXT_RSS_TABLE_ENTRIES:   usize = 128;
pub const BNXT_RSS_KEY_SIZE:        usize = 40;
/// RX rings one RSS context can spread over on P5 and newer chips.
pub const BNXT_RSS_RINGS_PER_CTX:   usize = 64;

/// Period of [`Bnxt::timer()`](crate::Bnxt::timer), in milliseconds.
pub const BNXT_TIMER_INTERVAL_MS:   u32 = 10;

pub const BNXT_DFLT_FW_RST_MIN_DSECS: u32 = 20;
pub const BNXT_DFLT_FW_RST_MAX_DSECS: u32 = 60;
/// How often the reset path polls for VFs to unbind, in milliseconds.
pub const BNXT_FW_RESET_VF_POLL_MS: u64 = 100;
/// How often the reset path polls for firmware to shut down, in milliseconds.
pub const BNXT_FW_DOWN_POLL_MS:     u64 = 200;
/// How often the reset path polls for firmware to come back, in milliseconds.
pub const BNXT_FW_UP_POLL_MS:       u64 = 50;
/// Timeout of each firmware poll while it is coming back, in milliseconds.
pub const SHORT_HWRM_CMD_TIMEOUT_MS: u32 = 20;
pub const BNXT_RESET_RETRY_MS:      u64 = 1;

/// A ring is reset after this many buffer errors.
pub const BNXT_BUF_ERR_RESET_THRESH: u64 = 4;

bitflags! {
    /// Offloads and features that can be toggled at run time.
    pub struct NetFeatures: u32 {
        const RXCSUM     = 1 << 0;
        const TXCSUM     = 1 << 1;
        const SG         = 1 << 2;
        const TSO        = 1 << 3;
        const LRO        = 1 << 4;
        const GRO_HW     = 1 << 5;
        const RXHASH     = 1 << 6;
        const HW_VLAN_RX = 1 << 7;
        const HW_VLAN_TX = 1 << 8;
        const NTUPLE     = 1 << 9;
    }
}

impl NetFeatures {
    /// Either form of hardware receive aggregation.
    pub fn tpa(&self) -> bool {
        self.intersects(NetFeatures::LRO | NetFeatures::GRO_HW)
    }
}

impl Default for NetFeatures {
    fn default() -> Self {
        NetFeatures::RXCSUM | NetFeatures::TXCSUM | NetFeatures::SG | NetFeatures::TSO
            | NetFeatures::GRO_HW | NetFeatures::RXHASH | NetFeatures::HW_VLAN_RX | NetFeatures::HW_VLAN_TX
    }
}

/// Interrupt coalescing of one completion ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoalesceParams {
    /// Interrupt latency target, in microseconds.
    pub usecs: u16,
    /// Completions to aggregate before an interrupt.
    pub frames: u16,
}

impl CoalesceParams {
    pub const fn new(usecs: u16, frames: u16) -> CoalesceParams {
        CoalesceParams { usecs, frames }
    }
}

/// The run-time configuration consumed by [`Bnxt::probe()`](crate::Bnxt::probe)
/// and changed through the control plane.
#[derive(Clone, Debug)]
pub struct BnxtConfig {
    /// Requested number of TX rings.
    pub tx_rings: u16,
    /// Requested number of RX rings.
    pub rx_rings: u16,
    /// Service a TX ring and an RX ring from the same completion ring.
    pub shared_cp: bool,
    pub tx_ring_size: usize,
    pub rx_ring_size: usize,
    pub mtu: u16,
    /// Packets up to this length are copied out of their receive buffer.
    pub rx_copy_thresh: usize,
    /// Packets up to this length are pushed through the doorbell window.
    pub tx_push_thresh: usize,
    /// How receive buffers are allocated when neither XDP nor a large MTU dictates it.
    pub rx_buf_mode: RxBufferMode,
    /// The number of frames in each RX ring's XSK pool, when `rx_buf_mode` is `Xsk`.
    pub xsk_frames: usize,
    pub max_tpa: u16,
    pub features: NetFeatures,
    pub rx_coal: CoalesceParams,
    pub tx_coal: CoalesceParams,
    /// Let the DIM sampler adjust RX coalescing.
    pub adaptive_rx: bool,
    /// Use WCB push on chips that advertise it.
    pub enable_wcb_push: bool,
    /// Steer flows to RX rings with ntuple filters and one VNIC per ring.
    pub rfs: bool,
    pub rss_key: [u8; BNXT_RSS_KEY_SIZE],
}

impl Default for BnxtConfig {
    fn default() -> Self {
        BnxtConfig {
            tx_rings:        4,
            rx_rings:        4,
            shared_cp:       true,
            tx_ring_size:    BNXT_DEFAULT_RING_SIZE,
            rx_ring_size:    BNXT_DEFAULT_RING_SIZE,
            mtu:             BNXT_DEFAULT_MTU,
            rx_copy_thresh:  BNXT_RX_COPY_THRESH,
            tx_push_thresh:  bnxt_rings::PUSH_THRESH_LEGACY,
            rx_buf_mode:     RxBufferMode::Frag,
            xsk_frames:      0,
            max_tpa:         BNXT_MAX_TPA,
            features:        NetFeatures::default(),
            rx_coal:         CoalesceParams::new(6, 6),
            tx_coal:         CoalesceParams::new(28, 30),
            adaptive_rx:     true,
            enable_wcb_push: false,
            rfs:             false,
            rss_key:         DEFAULT_RSS_KEY,
        }
    }
}

/// The Toeplitz key used when none is configured.
pub const DEFAULT_RSS_KEY: [u8; BNXT_RSS_KEY_SIZE] = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2, 0x41, 0x67,
    0x25, 0x3d, 0x43, 0xa3, 0x8f, 0xb0, 0xd0, 0xca, 0x2b, 0xcb,
    0xae, 0x7b, 0x30, 0xb4, 0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30,
    0xf2, 0x0c, 0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
];
