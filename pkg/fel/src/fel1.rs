//! The FEL-1 command set, active while the target is still running in
//! boot ROM (spec §4.3).

use common::errors::*;
use usb::BulkChannel;

use crate::awusb::Awusb;
use crate::frame::{check_status, encode_request, STATUS_LEN};
use crate::version::{VersionRecord, VERSION_RECORD_LEN};

const CMD_VERSION: u32 = 0x0001;
const CMD_WRITE: u32 = 0x0101;
const CMD_EXEC: u32 = 0x0102;
const CMD_READ: u32 = 0x0103;

pub struct Fel1<'a, C: BulkChannel> {
    awusb: Awusb<'a, C>,
}

impl<'a, C: BulkChannel> Fel1<'a, C> {
    pub fn new(channel: &'a C) -> Self {
        Self {
            awusb: Awusb::new(channel),
        }
    }

    fn read_status(&self) -> Result<()> {
        let mut trailer = [0u8; STATUS_LEN];
        self.awusb.read(&mut trailer)?;
        check_status(&trailer)
    }

    pub fn version(&self) -> Result<VersionRecord> {
        let request = encode_request(CMD_VERSION, 0, 0, 0);
        self.awusb.write(&request)?;

        let mut raw = [0u8; VERSION_RECORD_LEN];
        self.awusb.read(&mut raw)?;
        self.read_status()?;

        Ok(VersionRecord::parse(&raw))
    }

    pub fn read(&self, address: u32, buf: &mut [u8]) -> Result<()> {
        let request = encode_request(CMD_READ, address, buf.len() as u32, 0);
        self.awusb.write(&request)?;
        self.awusb.read(buf)?;
        self.read_status()
    }

    pub fn write(&self, address: u32, buf: &[u8]) -> Result<()> {
        let request = encode_request(CMD_WRITE, address, buf.len() as u32, 0);
        self.awusb.write(&request)?;
        self.awusb.write(buf)?;
        self.read_status()
    }

    /// Starts execution at `address`. Returns once the boot ROM has
    /// accepted the jump; the device-side transfer of control happens
    /// asynchronously after that.
    pub fn exec(&self, address: u32, p1: u32, p2: u32) -> Result<()> {
        let request = encode_request(CMD_EXEC, address, p1, p2);
        self.awusb.write(&request)?;
        self.read_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;

    fn stage_ok_version(mock: &MockChannel, soc_id: u32, scratchpad: u32) {
        let mut record = [0u8; VERSION_RECORD_LEN];
        record[0..8].copy_from_slice(b"AWUSBFEL");
        record[8..12].copy_from_slice(&soc_id.to_le_bytes());
        record[20..24].copy_from_slice(&scratchpad.to_le_bytes());
        mock.stage_awus_status(0); // AWUS for the VERSION request write
        mock.stage_raw_in(record.to_vec()); // the version record itself
        mock.stage_awus_status(0); // AWUS for the record read
        mock.stage_raw_in(vec![0xFF, 0xFF, 0, 0, 0, 0, 0, 0]); // status trailer
        mock.stage_awus_status(0); // AWUS for the trailer read
    }

    #[test]
    fn version_reports_chip_and_scratchpad() {
        let mock = MockChannel::new();
        stage_ok_version(&mock, 0x1651_00, 0x7e00);

        let fel1 = Fel1::new(&mock);
        let version = fel1.version().unwrap();
        assert_eq!(version.chip_id(), 0x1651);
        assert_eq!(version.scratchpad, 0x7e00);
    }

    #[test]
    fn rejects_bad_status_trailer() {
        let mock = MockChannel::new();
        mock.stage_awus_status(0);
        mock.stage_raw_in(vec![0u8; VERSION_RECORD_LEN]);
        mock.stage_awus_status(0);
        mock.stage_raw_in(vec![0u8; STATUS_LEN]); // not the success literal
        mock.stage_awus_status(0);

        let fel1 = Fel1::new(&mock);
        assert!(fel1.version().is_err());
    }
}
