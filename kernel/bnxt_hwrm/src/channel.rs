//! The mailbox transport and the table of in-flight request tokens.

use alloc::{sync::Arc, vec, vec::Vec};
use core::sync::atomic::{fence, AtomicBool, AtomicU16, AtomicU8, Ordering};
use spin::Mutex;
use zerocopy::AsBytes;
use nic_hal::{iowrite32_copy, Bar, DmaRegion, HalRef};
use bnxt_hsi::{Le16, Le64};
use bnxt_hsi::hwrm::*;
use crate::*;

/// The lifecycle of one in-flight request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenState {
    /// Sent; waiting for firmware.
    Pending   = 0,
    /// Firmware announced that the response will come later.
    Deferred  = 1,
    /// Firmware posted an HWRM-done completion for this request.
    Complete  = 2,
    /// The channel was torn down while the request was in flight.
    Cancelled = 3,
}

impl TokenState {
    fn from_raw(raw: u8) -> TokenState {
        match raw {
            0 => TokenState::Pending,
            1 => TokenState::Deferred,
            2 => TokenState::Complete,
            _ => TokenState::Cancelled,
        }
    }
}

/// One in-flight firmware request, identified by its sequence id.
#[derive(Debug)]
pub struct HwrmToken {
    seq_id: u16,
    state: AtomicU8,
}

impl HwrmToken {
    fn new(seq_id: u16) -> HwrmToken {
        HwrmToken { seq_id, state: AtomicU8::new(TokenState::Pending as u8) }
    }

    pub fn seq_id(&self) -> u16 {
        self.seq_id
    }

    pub fn state(&self) -> TokenState {
        TokenState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Moves the token from `from` to `to`; a cancelled token never changes state again.
    fn transition(&self, from: TokenState, to: TokenState) -> bool {
        self.state.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn cancel(&self) {
        self.state.store(TokenState::Cancelled as u8, Ordering::Release);
    }
}

/// What firmware told us about its mailbox in `VER_GET`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwrmCaps {
    /// Length of the BAR0 request window.
    pub max_req_win_len:    usize,
    /// Largest request firmware accepts through a short command.
    pub max_ext_req_len:    usize,
    /// Every request must go through the short command indirection.
    pub short_cmd:          bool,
    pub default_timeout_ms: u32,
    pub max_timeout_ms:     u32,
}

impl Default for HwrmCaps {
    fn default() -> Self {
        HwrmCaps {
            max_req_win_len:    HWRM_MAX_REQ_LEN,
            max_ext_req_len:    HWRM_MAX_REQ_LEN,
            short_cmd:          false,
            default_timeout_ms: DFLT_HWRM_CMD_TIMEOUT_MS,
            max_timeout_ms:     HWRM_CMD_MAX_TIMEOUT_MS,
        }
    }
}

impl HwrmCaps {
    /// Derives the channel capabilities from a `VER_GET` response.
    pub fn from_ver_get(resp: &VerGetOutput) -> HwrmCaps {
        let dev_caps = resp.dev_caps_cfg.get();
        let short_cmd = dev_caps & VER_GET_DEV_CAPS_CFG_SHORT_CMD_SUPPORTED != 0
            && dev_caps & VER_GET_DEV_CAPS_CFG_SHORT_CMD_REQUIRED != 0;

        let max_req_win_len = match resp.max_req_win_len.get() as usize {
            0 => HWRM_MAX_REQ_LEN,
            len => len,
        };
        let max_ext_req_len = match resp.max_ext_req_len.get() as usize {
            0 => HWRM_MAX_REQ_LEN,
            len => len.min(HWRM_MAX_DMA_REQ_LEN),
        };
        let default_timeout_ms = match resp.def_req_timeout.get() as u32 {
            0 => DFLT_HWRM_CMD_TIMEOUT_MS,
            ms => ms,
        };
        let max_timeout_ms = (resp.max_req_timeout.get() as u32 * 1000)
            .min(HWRM_CMD_MAX_TIMEOUT_MS)
            .max(default_timeout_ms);

        HwrmCaps { max_req_win_len, max_ext_req_len, short_cmd, default_timeout_ms, max_timeout_ms }
    }
}

/// The firmware command channel of one PCI function.
///
/// Requests are serialized by the mailbox lock. The token table has its own lock so that
/// the completion path and the reset path can update tokens while a sender is waiting.
pub struct HwrmChannel {
    hal:      HalRef,
    caps:     Mutex<HwrmCaps>,
    mailbox:  Mutex<()>,
    tokens:   Mutex<Vec<Arc<HwrmToken>>>,
    pool:     Mutex<Vec<DmaRegion>>,
    next_seq: AtomicU16,
    down:     AtomicBool,
}

impl HwrmChannel {
    pub fn new(hal: HalRef) -> HwrmChannel {
        HwrmChannel {
            hal,
            caps:     Mutex::new(HwrmCaps::default()),
            mailbox:  Mutex::new(()),
            tokens:   Mutex::new(Vec::new()),
            pool:     Mutex::new(Vec::new()),
            next_seq: AtomicU16::new(0),
            down:     AtomicBool::new(false),
        }
    }

    pub fn hal(&self) -> &HalRef {
        &self.hal
    }

    pub fn caps(&self) -> HwrmCaps {
        *self.caps.lock()
    }

    pub fn set_caps(&self, caps: HwrmCaps) {
        debug!("HWRM caps: {:?}", caps);
        *self.caps.lock() = caps;
    }

    /// Returns the sequence id of the request currently in the mailbox, if any.
    pub fn in_flight(&self) -> Option<u16> {
        self.tokens.lock().first().map(|t| t.seq_id())
    }

    /// Marks the token of `seq_id` complete in response to an HWRM-done completion.
    pub fn on_hwrm_done(&self, seq_id: u16) {
        match self.find(seq_id) {
            Some(token) => {
                if !token.transition(TokenState::Pending, TokenState::Complete) {
                    token.transition(TokenState::Deferred, TokenState::Complete);
                }
            }
            None => trace!("HWRM done for unknown seq {}", seq_id),
        }
    }

    /// Extends the wait of `seq_id` to the maximum timeout; firmware will respond later.
    pub fn on_deferred(&self, seq_id: u16) {
        match self.find(seq_id) {
            Some(token) => {
                if token.transition(TokenState::Pending, TokenState::Deferred) {
                    debug!("HWRM seq {} deferred", seq_id);
                }
            }
            None => warn!("deferred response for unknown HWRM seq {}", seq_id),
        }
    }

    /// Cancels every in-flight request and refuses new ones until [`reopen()`](Self::reopen).
    pub fn cancel_all(&self) {
        self.down.store(true, Ordering::Release);
        let tokens = self.tokens.lock();
        for token in tokens.iter() {
            token.cancel();
        }
        if !tokens.is_empty() {
            warn!("cancelled {} in-flight HWRM request(s)", tokens.len());
        }
    }

    pub fn reopen(&self) {
        self.down.store(false, Ordering::Release);
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    fn find(&self, seq_id: u16) -> Option<Arc<HwrmToken>> {
        self.tokens.lock().iter().find(|t| t.seq_id() == seq_id).cloned()
    }

    pub(crate) fn alloc_buffer(&self) -> Result<DmaRegion, HwrmError> {
        if let Some(buf) = self.pool.lock().pop() {
            return Ok(buf);
        }
        DmaRegion::new(&self.hal, HWRM_DMA_SIZE).map_err(|e| {
            error!("HWRM: {}", e);
            HwrmError::NoBuffer
        })
    }

    pub(crate) fn free_buffer(&self, buf: DmaRegion) {
        let mut pool = self.pool.lock();
        if pool.len() < HWRM_POOL_SIZE {
            pool.push(buf);
        }
    }

    /// Sends the request in `body` through `buf` and waits for its response, which is copied into `resp`.
    ///
    /// The first 16 bytes of `body` are overwritten with the request header.
    pub(crate) fn exchange(
        &self,
        buf: &DmaRegion,
        body: &mut [u8],
        resp: &mut [u8],
        req_type: u16,
        timeout_ms: Option<u32>,
        silent: bool,
    ) -> Result<(), HwrmError> {
        if self.is_down() {
            return Err(HwrmError::ChannelDown);
        }
        let caps = self.caps();
        let len = body.len();
        let short = caps.short_cmd || len > caps.max_req_win_len;
        if len > HWRM_MAX_DMA_REQ_LEN || (short && len > caps.max_ext_req_len) {
            error!("HWRM req_type {:#x} of {} bytes exceeds the {} byte limit", req_type, len, caps.max_ext_req_len);
            return Err(HwrmError::TooLarge);
        }

        let _mailbox = self.mailbox.lock();
        let seq_id = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = Arc::new(HwrmToken::new(seq_id));
        self.tokens.lock().push(token.clone());

        let result = self.exchange_locked(buf, body, resp, req_type, seq_id, &token, &caps, short, timeout_ms, silent);

        self.tokens.lock().retain(|t| t.seq_id() != seq_id);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn exchange_locked(
        &self,
        buf: &DmaRegion,
        body: &mut [u8],
        resp: &mut [u8],
        req_type: u16,
        seq_id: u16,
        token: &HwrmToken,
        caps: &HwrmCaps,
        short: bool,
        timeout_ms: Option<u32>,
        silent: bool,
    ) -> Result<(), HwrmError> {
        let resp_addr = buf.phys_addr() + HWRM_RESP_OFFSET;
        let hdr = HwrmInputHeader {
            req_type:  Le16::new(req_type),
            cmpl_ring: Le16::new(INVALID_HW_RING_ID),
            seq_id:    Le16::new(seq_id),
            target_id: Le16::new(HWRM_TARGET_ID_SELF),
            resp_addr: Le64::new(resp_addr.value()),
        };
        body[..HWRM_HDR_LEN].copy_from_slice(hdr.as_bytes());

        buf.copy_from(HWRM_RESP_OFFSET, &[0u8; HWRM_MAX_RESP_LEN]);
        buf.copy_from(0, body);

        let mut window = vec![0u8; caps.max_req_win_len.max(HWRM_HDR_LEN)];
        if short {
            let short_input = HwrmShortInput {
                req_type:  Le16::new(req_type),
                signature: Le16::new(HWRM_SHORT_REQ_SIGNATURE),
                target_id: Le16::new(HWRM_TARGET_ID_SELF),
                size:      Le16::new(body.len() as u16),
                req_addr:  Le64::new(buf.phys_addr().value()),
            };
            window[..HWRM_HDR_LEN].copy_from_slice(short_input.as_bytes());
        } else {
            window[..body.len()].copy_from_slice(body);
        }

        fence(Ordering::Release);
        iowrite32_copy(&*self.hal, Bar::Bar0, GRCPF_REG_CHIMP_COMM, &window);
        self.hal.write32(Bar::Bar0, GRCPF_REG_CHIMP_COMM_TRIGGER, 1);
        trace!("HWRM send req_type {:#x} seq {} len {}{}", req_type, seq_id, body.len(), if short { " (short)" } else { "" });

        let mut timeout = timeout_ms.unwrap_or(caps.default_timeout_ms);
        let start = self.hal.now_us();
        let mut polls = 0u32;
        let resp_len = loop {
            let now = self.hal.now_us();
            match token.state() {
                TokenState::Cancelled => return Err(HwrmError::Cancelled),
                TokenState::Deferred => timeout = timeout.max(caps.max_timeout_ms),
                _ => {}
            }

            let len = u16::from_le(buf.read::<u16>(HWRM_RESP_OFFSET + HWRM_RESP_LEN_OFFSET)) as usize;
            if len >= HWRM_OUT_HDR_LEN && len <= HWRM_MAX_DMA_RESP_LEN
                && buf.read::<u8>(HWRM_RESP_OFFSET + len - 1) == HWRM_RESP_VALID_KEY
            {
                fence(Ordering::Acquire);
                break len;
            }

            if now.saturating_sub(start) >= timeout as u64 * 1000 {
                if !silent {
                    error!("HWRM req_type {:#x} seq {} timed out after {} ms", req_type, seq_id, timeout);
                }
                return Err(HwrmError::Timeout);
            }

            if polls < HWRM_SHORT_POLLS {
                polls += 1;
                self.hal.delay_us(HWRM_SHORT_POLL_US);
            } else {
                self.hal.delay_us(HWRM_POLL_US);
            }
        };

        let out_hdr: HwrmOutputHeader = buf.read(HWRM_RESP_OFFSET);
        // Clear the valid byte so a stale response is never mistaken for a new one.
        buf.write::<u8>(HWRM_RESP_OFFSET + resp_len - 1, 0);

        if out_hdr.seq_id.get() != seq_id {
            error!("HWRM req_type {:#x}: response seq {} does not match {}", req_type, out_hdr.seq_id.get(), seq_id);
            return Err(HwrmError::InvalidResponse);
        }
        let copy_len = resp_len.min(resp.len());
        buf.copy_to(HWRM_RESP_OFFSET, &mut resp[..copy_len]);

        match out_hdr.error_code.get() {
            HWRM_ERR_CODE_SUCCESS => Ok(()),
            code => {
                if !silent {
                    error!("HWRM req_type {:#x} seq {} failed with status {:#x}", req_type, seq_id, code);
                }
                Err(HwrmError::FirmwareStatus(code))
            }
        }
    }
}

impl Drop for HwrmChannel {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
