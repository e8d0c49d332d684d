//! The FEL-2 command set, active once the in-RAM loader is running (spec
//! §4.4).

use std::time::Duration;

use common::async_std::task;
use common::errors::*;
use usb::BulkChannel;

use crate::awusb::Awusb;
use crate::events::EventSink;
use crate::frame::{check_status, encode_request, STATUS_LEN};

const CMD_RDWR: u32 = 0x0201;
const CMD_EXEC: u32 = 0x0202;
const CMD_0203: u32 = 0x0203;
const CMD_0204: u32 = 0x0204;
const CMD_0205: u32 = 0x0205;

const TARGET_NAND: u32 = 0x20;
const FLAG_WRITE: u32 = 0x1000;
const FLAG_READ: u32 = 0x2000;
const DIRECTION_MASK: u32 = 0x3000;
pub const FLAG_FIRST: u32 = 0x4000;
pub const FLAG_LAST: u32 = 0x8000;

/// How often `poll_0203_until_ok` retries while waiting for the loader's
/// reply, and how much it lets one round of polling run for before giving
/// a test a chance to bound it. Exposed so tests can shrink it well below
/// the real device's latency.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Dram,
    Nand,
}

pub struct Fel2<'a, C: BulkChannel> {
    awusb: Awusb<'a, C>,
    poll_interval: Duration,
}

impl<'a, C: BulkChannel> Fel2<'a, C> {
    pub fn new(channel: &'a C) -> Self {
        Self {
            awusb: Awusb::new(channel),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the `poll_0203_until_ok` retry interval. Tests use this to
    /// avoid real sleeps; production call sites leave the default.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn status_direction_bits(direction: Direction) -> u32 {
        match direction {
            Direction::Read => FLAG_READ,
            Direction::Write => FLAG_WRITE,
        }
    }

    /// `rdwr` with an explicit direction and target; `chunk_flags` carries
    /// FIRST/LAST for multi-chunk partition transfers (spec §4.6.3) and is
    /// zero for everything else.
    pub fn rdwr(
        &self,
        address: u32,
        buf: &mut [u8],
        target: Target,
        direction: Direction,
        chunk_flags: u32,
    ) -> Result<()> {
        let mut pad = chunk_flags & (FLAG_FIRST | FLAG_LAST);
        if target == Target::Nand {
            pad |= TARGET_NAND;
        }
        pad |= Self::status_direction_bits(direction);
        debug_assert_eq!(pad & DIRECTION_MASK, Self::status_direction_bits(direction));

        let request = encode_request(CMD_RDWR, address, buf.len() as u32, pad);
        self.awusb.write(&request)?;
        match direction {
            Direction::Read => {
                self.awusb.read(buf)?;
            }
            Direction::Write => {
                self.awusb.write(buf)?;
            }
        }

        let mut trailer = [0u8; STATUS_LEN];
        self.awusb.read(&mut trailer)?;
        check_status(&trailer)
    }

    pub fn wr(&self, address: u32, buf: &[u8], target: Target) -> Result<()> {
        let mut scratch = buf.to_vec();
        self.rdwr(address, &mut scratch, target, Direction::Write, 0)
    }

    pub fn rd(&self, address: u32, buf: &mut [u8], target: Target) -> Result<()> {
        self.rdwr(address, buf, target, Direction::Read, 0)
    }

    /// Starts execution of the loader at `address` with auxiliary value
    /// `p1`. Issued without reading a status trailer: the running loader
    /// only replies to explicit polls from here on.
    pub fn exec2(&self, address: u32, p1: u32) -> Result<()> {
        let request = encode_request(CMD_EXEC, address, p1, 0);
        self.awusb.write(&request)?;
        Ok(())
    }

    pub fn op_0203(&self) -> Result<()> {
        let request = encode_request(CMD_0203, 0, 0, 0);
        self.awusb.write(&request)?;
        Ok(())
    }

    pub fn op_0204(&self, length: u32) -> Result<()> {
        let request = encode_request(CMD_0204, length, 0, 0);
        self.awusb.write(&request)?;
        Ok(())
    }

    pub fn op_0205(&self) -> Result<()> {
        let request = encode_request(CMD_0205, 0, 0, 0);
        self.awusb.write(&request)?;
        let mut trailer = [0u8; STATUS_LEN];
        self.awusb.read(&mut trailer)?;
        check_status(&trailer)
    }

    /// Repeatedly issues `op_0203`, then reads 32 bytes directly with no
    /// status trailer, until the first two bytes are `00 01`. Unbounded
    /// beyond the per-transfer timeout; pumps `events` so progress is
    /// visible while it spins.
    pub async fn poll_0203_until_ok(&self, events: &EventSink) -> Result<()> {
        loop {
            self.op_0203()?;
            let mut reply = [0u8; 32];
            self.awusb.read(&mut reply)?;
            events.urb();
            if reply[0] == 0x00 && reply[1] == 0x01 {
                return Ok(());
            }
            task::sleep(self.poll_interval).await;
        }
    }

    /// A raw AWUSB payload read followed by the FEL status trailer; used
    /// after commands that initiate a device-side payload exchange.
    pub fn pad_read(&self, buf: &mut [u8]) -> Result<()> {
        self.awusb.read(buf)?;
        let mut trailer = [0u8; STATUS_LEN];
        self.awusb.read(&mut trailer)?;
        check_status(&trailer)
    }

    pub fn pad_write(&self, buf: &[u8]) -> Result<()> {
        self.awusb.write(buf)?;
        let mut trailer = [0u8; STATUS_LEN];
        self.awusb.read(&mut trailer)?;
        check_status(&trailer)
    }

    /// A bare AWUSB write of four little-endian `u32` words followed by the
    /// FEL status trailer. No FEL-2 RDWR request frame precedes it: the
    /// loader isn't reading this into a target address, it's consuming the
    /// words directly off the wire. `param1` is a plain parameter, not an
    /// address.
    pub fn send_4uints(&self, param1: u32, b: u32, c: u32, d: u32) -> Result<()> {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&param1.to_le_bytes());
        buf[4..8].copy_from_slice(&b.to_le_bytes());
        buf[8..12].copy_from_slice(&c.to_le_bytes());
        buf[12..16].copy_from_slice(&d.to_le_bytes());
        self.pad_write(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;

    #[test]
    fn rdwr_write_sets_target_and_direction_bits() {
        let mock = MockChannel::new();
        mock.stage_awus_status(0); // request frame AWUS
        mock.stage_awus_status(0); // payload AWUS
        mock.stage_raw_in(vec![0xFF, 0xFF, 0, 0, 0, 0, 0, 0]); // trailer
        mock.stage_awus_status(0);

        let fel2 = Fel2::new(&mock);
        fel2.wr(0x40a00000, &[1, 2, 3, 4], Target::Nand).unwrap();

        let sent = mock.sent_log();
        // sent[0] is the 32-byte AWUC envelope header; sent[1] is the
        // 16-byte FEL2 request frame itself.
        let request = &sent[1];
        let pad = u32::from_le_bytes(request[12..16].try_into().unwrap());
        assert_eq!(pad & TARGET_NAND, TARGET_NAND);
        assert_eq!(pad & DIRECTION_MASK, FLAG_WRITE);
    }

    #[test]
    fn poll_0203_until_ok_converges_after_four_failures() {
        let mock = MockChannel::new();
        for _ in 0..4 {
            mock.stage_awus_status(0); // op_0203 request AWUS
            mock.stage_raw_in(vec![0xFFu8; 32]); // not-ready reply
            mock.stage_awus_status(0); // reply AWUS
        }
        mock.stage_awus_status(0);
        let mut ok_reply = vec![0u8; 32];
        ok_reply[0] = 0x00;
        ok_reply[1] = 0x01;
        mock.stage_raw_in(ok_reply);
        mock.stage_awus_status(0);

        let fel2 = Fel2::new(&mock).with_poll_interval(Duration::from_millis(1));
        let (events, _receiver) = EventSink::channel(false);

        task::block_on(async {
            fel2.poll_0203_until_ok(&events).await.unwrap();
        });

        // Each iteration issues one op_0203 request (one sent frame).
        let request_count = mock
            .sent_log()
            .iter()
            .filter(|frame| frame.len() == crate::frame::REQUEST_LEN)
            .count();
        assert_eq!(request_count, 5);
    }

    #[test]
    fn send_4uints_is_a_bare_write_with_no_rdwr_frame() {
        let mock = MockChannel::new();
        mock.stage_awus_status(0); // payload write AWUS
        mock.stage_raw_in(vec![0xFF, 0xFF, 0, 0, 0, 0, 0, 0]); // trailer
        mock.stage_awus_status(0); // trailer read AWUS

        let fel2 = Fel2::new(&mock);
        fel2.send_4uints(0x40a00000, 0x40a01000, 0, 0).unwrap();

        // No FEL-2 RDWR request frame precedes the payload: the only
        // 16-byte buffer ever sent is the 4-uint payload itself.
        let sent = mock.sent_log();
        let sixteen_byte_frames: Vec<&Vec<u8>> =
            sent.iter().filter(|f| f.len() == 16).collect();
        assert_eq!(sixteen_byte_frames.len(), 1);
        let payload = sixteen_byte_frames[0];
        assert_eq!(
            u32::from_le_bytes(payload[0..4].try_into().unwrap()),
            0x40a00000
        );
    }
}
