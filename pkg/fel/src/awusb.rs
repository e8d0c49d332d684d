//! The AWUSB envelope: every logical FEL transfer is a 32-byte `AWUC`
//! request, the payload in the indicated direction, then a 13-byte `AWUS`
//! response carrying a status word (spec §3, §4.2).

use common::errors::*;
use common::Fail;
use usb::BulkChannel;

/// Bulk-OUT endpoint the FEL target exposes on interface 0.
pub const ENDPOINT_OUT: u8 = 0x01;
/// Bulk-IN endpoint the FEL target exposes on interface 0.
pub const ENDPOINT_IN: u8 = 0x82;

const AWUC_MAGIC: [u8; 4] = *b"AWUC";
const AWUS_MAGIC: [u8; 4] = *b"AWUS";

pub const AWUC_SIZE: usize = 32;
pub const AWUS_SIZE: usize = 13;

const AW_USB_READ: u16 = 0x11;
const AW_USB_WRITE: u16 = 0x12;

#[derive(Debug, Fail)]
pub enum AwusbError {
    #[fail(display = "AWUS response had the wrong magic: {:?}", got)]
    BadResponseMagic { got: [u8; 4] },
}

fn encode_awuc(request_type: u16, size: u64) -> [u8; AWUC_SIZE] {
    let mut frame = [0u8; AWUC_SIZE];
    frame[0..4].copy_from_slice(&AWUC_MAGIC);
    // offset 4..7 are left zero.
    frame[8..16].copy_from_slice(&size.to_le_bytes());
    frame[16..18].copy_from_slice(&request_type.to_le_bytes());
    // offset 18..31 is reserved and intentionally left zero: the reference
    // implementation this was ported from re-derives the upper 32 bits of
    // `size` into these bytes, but the device ignores them, so a clean
    // implementation leaves them at zero (see DESIGN.md).
    frame
}

fn decode_awus(frame: &[u8; AWUS_SIZE]) -> Result<u32> {
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&frame[0..4]);
    if magic != AWUS_MAGIC {
        return Err(AwusbError::BadResponseMagic { got: magic }.into());
    }
    Ok(u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]))
}

/// The AWUSB envelope layer, generic over any [BulkChannel] so it can be
/// driven against real hardware or an in-memory mock in tests.
pub struct Awusb<'a, C: BulkChannel> {
    channel: &'a C,
}

impl<'a, C: BulkChannel> Awusb<'a, C> {
    pub fn new(channel: &'a C) -> Self {
        Self { channel }
    }

    /// Sends `payload` to the device: AWUC(WRITE) + payload + AWUS.
    /// Returns the AWUS status word (not itself treated as a hard error —
    /// the FEL status trailer is authoritative per spec §4.2).
    pub fn write(&self, payload: &[u8]) -> Result<u32> {
        let request = encode_awuc(AW_USB_WRITE, payload.len() as u64);
        self.channel.bulk_send(ENDPOINT_OUT, &request)?;
        self.channel.bulk_send(ENDPOINT_OUT, payload)?;
        self.read_awus()
    }

    /// Receives `buf.len()` bytes from the device: AWUC(READ) + payload +
    /// AWUS.
    pub fn read(&self, buf: &mut [u8]) -> Result<u32> {
        let request = encode_awuc(AW_USB_READ, buf.len() as u64);
        self.channel.bulk_send(ENDPOINT_OUT, &request)?;
        self.channel.bulk_recv(ENDPOINT_IN, buf)?;
        self.read_awus()
    }

    fn read_awus(&self) -> Result<u32> {
        let mut frame = [0u8; AWUS_SIZE];
        self.channel.bulk_recv(ENDPOINT_IN, &mut frame)?;
        decode_awus(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;

    #[test]
    fn encode_decode_round_trip() {
        let frame = encode_awuc(AW_USB_WRITE, 0x1234);
        assert_eq!(&frame[0..4], b"AWUC");
        assert_eq!(
            u64::from_le_bytes(frame[8..16].try_into().unwrap()),
            0x1234
        );
        assert_eq!(u16::from_le_bytes(frame[16..18].try_into().unwrap()), 0x12);
        assert_eq!(&frame[18..32], &[0u8; 14]);
    }

    #[test]
    fn write_then_read_round_trips_through_mock() {
        let mock = MockChannel::new();
        mock.stage_awus_status(0);
        mock.stage_awus_status(0);

        let awusb = Awusb::new(&mock);
        let payload = b"hello fel".to_vec();
        awusb.write(&payload).unwrap();

        assert_eq!(mock.take_written_payload(), payload);
    }

    #[test]
    fn rejects_bad_awus_magic() {
        let mock = MockChannel::new();
        mock.stage_raw_in(vec![0u8; 4]); // the payload read() asks for
        mock.stage_raw_in(vec![b'X', b'X', b'X', b'X', 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let awusb = Awusb::new(&mock);
        let err = awusb.read(&mut [0u8; 4]).unwrap_err();
        assert!(format!("{}", err).contains("AWUS"));
    }
}
