//! An in-memory stand-in for a real FEL target, used by the `#[cfg(test)]`
//! modules throughout this crate. Implements [usb::BulkChannel] against a
//! scriptable byte queue instead of a kernel `usbfs` node, so the whole
//! transport stack above it can be exercised without hardware (spec §8).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use common::errors::*;
use usb::BulkChannel;

use crate::awusb::{AWUS_SIZE, ENDPOINT_IN};

/// A queue of bytes to hand back from `bulk_recv`, plus a log of everything
/// sent via `bulk_send`. Every `bulk_recv` call reads from the same flat
/// byte stream regardless of which [stage_*][MockChannel::stage_raw_in]
/// call staged it, since the real device never pipelines replies either.
pub struct MockChannel {
    input: RefCell<VecDeque<u8>>,
    sent: RefCell<Vec<Vec<u8>>>,
    recv_log: RefCell<Vec<Vec<u8>>>,
    /// When set, caps how many bytes a single `bulk_recv` call hands back,
    /// to model a device that completes a transfer over several partial
    /// reads (spec §8: "a mock that returns one byte per call must still
    /// complete").
    recv_chunk_limit: Cell<Option<usize>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            input: RefCell::new(VecDeque::new()),
            sent: RefCell::new(Vec::new()),
            recv_log: RefCell::new(Vec::new()),
            recv_chunk_limit: Cell::new(None),
        }
    }

    /// Appends raw bytes to the input stream that future `bulk_recv` calls
    /// will drain from, in order.
    pub fn stage_raw_in(&self, bytes: Vec<u8>) {
        self.input.borrow_mut().extend(bytes);
    }

    /// Stages a complete 13-byte `AWUS` response frame carrying `status`.
    pub fn stage_awus_status(&self, status: u32) {
        let mut frame = [0u8; AWUS_SIZE];
        frame[0..4].copy_from_slice(b"AWUS");
        frame[8..12].copy_from_slice(&status.to_le_bytes());
        self.stage_raw_in(frame.to_vec());
    }

    /// Limits every subsequent `bulk_recv` to at most `n` bytes, to force
    /// multi-call completion of larger transfers.
    pub fn set_recv_chunk_limit(&self, n: usize) {
        self.recv_chunk_limit.set(Some(n));
    }

    /// Every buffer handed to `bulk_send`, oldest first.
    pub fn sent_log(&self) -> Vec<Vec<u8>> {
        self.sent.borrow().clone()
    }

    /// The most recently sent buffer. In the common case of an AWUSB
    /// `write()` (header, then payload, then a read), this is the payload.
    pub fn take_written_payload(&self) -> Vec<u8> {
        self.sent
            .borrow_mut()
            .pop()
            .expect("MockChannel: nothing was sent")
    }

    /// How many `bulk_recv` calls have completed so far, for asserting the
    /// exact number of polling iterations a routine like
    /// `poll_0203_until_ok` performed.
    pub fn recv_call_count(&self) -> usize {
        self.recv_log.borrow().len()
    }

    pub fn input_remaining(&self) -> usize {
        self.input.borrow().len()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkChannel for MockChannel {
    fn bulk_send(&self, _endpoint: u8, buf: &[u8]) -> Result<()> {
        self.sent.borrow_mut().push(buf.to_vec());
        Ok(())
    }

    fn bulk_recv(&self, endpoint: u8, buf: &mut [u8]) -> Result<()> {
        let _ = endpoint; // every logical reply arrives on ENDPOINT_IN in this mock.
        debug_assert_eq!(endpoint, ENDPOINT_IN);

        let want = buf.len();
        let chunk = self.recv_chunk_limit.get().unwrap_or(want).min(want);

        let mut input = self.input.borrow_mut();
        if input.len() < chunk.max(1) && input.len() < want {
            return Err(err_msg("MockChannel: input exhausted"));
        }

        let mut got = Vec::with_capacity(chunk);
        for i in 0..chunk {
            match input.pop_front() {
                Some(b) => {
                    buf[i] = b;
                    got.push(b);
                }
                None => break,
            }
        }
        self.recv_log.borrow_mut().push(got);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_recv_honors_chunk_limit() {
        let mock = MockChannel::new();
        mock.stage_raw_in(vec![1, 2, 3, 4]);
        mock.set_recv_chunk_limit(1);

        let mut buf = [0u8; 4];
        for i in 0..4 {
            let mut one = [0u8; 1];
            mock.bulk_recv(ENDPOINT_IN, &mut one).unwrap();
            buf[i] = one[0];
        }
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(mock.recv_call_count(), 4);
    }

    #[test]
    fn bulk_recv_errors_when_exhausted() {
        let mock = MockChannel::new();
        let mut buf = [0u8; 4];
        assert!(mock.bulk_recv(ENDPOINT_IN, &mut buf).is_err());
    }
}
