//! A single firmware request and the DMA memory that backs it.

use alloc::vec::Vec;
use core::mem::size_of;
use zerocopy::{AsBytes, FromZeroes};
use nic_hal::{DmaRegion, PhysicalAddress};
use bnxt_hsi::hwrm::HwrmMessage;
use crate::{HwrmChannel, HwrmError};

/// A request of type `M` being prepared, sent, and possibly held for inspection.
///
/// The request body is edited through the public `req` field. Unless [`hold()`](Self::hold)
/// is called, the DMA buffer and every [`dma_slice()`](Self::dma_slice) are released as soon
/// as `send()` returns. Dropping the request releases everything.
pub struct HwrmRequest<'c, M: HwrmMessage> {
    channel:    &'c HwrmChannel,
    pub req:    M,
    buf:        Option<DmaRegion>,
    slices:     Vec<DmaRegion>,
    resp:       Option<M::Response>,
    timeout_ms: Option<u32>,
    held:       bool,
}

impl HwrmChannel {
    /// Prepares a zeroed request of type `M` backed by a buffer from the DMA pool.
    pub fn req_init<M: HwrmMessage>(&self) -> Result<HwrmRequest<'_, M>, HwrmError> {
        let buf = self.alloc_buffer()?;
        Ok(HwrmRequest {
            channel:    self,
            req:        M::new_zeroed(),
            buf:        Some(buf),
            slices:     Vec::new(),
            resp:       None,
            timeout_ms: None,
            held:       false,
        })
    }
}

impl<'c, M: HwrmMessage> HwrmRequest<'c, M> {
    /// Sends the request and waits for its response.
    pub fn send(&mut self) -> Result<M::Response, HwrmError> {
        self.send_inner(false)
    }

    /// Like [`send()`](Self::send), but a failure is not logged.
    pub fn send_silent(&mut self) -> Result<M::Response, HwrmError> {
        self.send_inner(true)
    }

    /// Keeps the DMA buffer, the slices and the response alive after `send()`.
    pub fn hold(&mut self) -> &mut Self {
        self.held = true;
        self
    }

    /// Overrides the channel's default timeout for this request.
    pub fn set_timeout(&mut self, timeout_ms: u32) -> &mut Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Allocates a zeroed DMA buffer of `size` bytes that lives as long as the request,
    /// for requests that point firmware at host memory.
    pub fn dma_slice(&mut self, size: usize) -> Result<PhysicalAddress, HwrmError> {
        let region = DmaRegion::new(self.channel.hal(), size).map_err(|e| {
            error!("HWRM DMA slice of {} bytes: {}", size, e);
            HwrmError::NoBuffer
        })?;
        let paddr = region.phys_addr();
        self.slices.push(region);
        Ok(paddr)
    }

    /// The DMA slices allocated so far, in allocation order.
    pub fn slices(&self) -> &[DmaRegion] {
        &self.slices
    }

    /// The last response received by a held request.
    pub fn response(&self) -> Option<&M::Response> {
        self.resp.as_ref()
    }

    fn send_inner(&mut self, silent: bool) -> Result<M::Response, HwrmError> {
        let buf = match self.buf.take() {
            Some(buf) => buf,
            None => self.channel.alloc_buffer()?,
        };

        let mut body = self.req.as_bytes().to_vec();
        let mut resp = M::Response::new_zeroed();
        let result = self.channel.exchange(
            &buf,
            &mut body,
            resp.as_bytes_mut(),
            M::REQ_TYPE,
            self.timeout_ms,
            silent,
        );
        debug_assert!(size_of::<M>() == body.len());

        if self.held {
            self.buf = Some(buf);
            self.resp = Some(resp);
        } else {
            self.channel.free_buffer(buf);
            self.slices.clear();
        }
        result.map(|_| resp)
    }
}

impl<'c, M: HwrmMessage> Drop for HwrmRequest<'c, M> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.channel.free_buffer(buf);
        }
    }
}
