//! The 16-byte FEL-1/FEL-2 request frame and 8-byte status trailer (spec
//! §3). FEL-1 and FEL-2 share this wire shape and differ only in which
//! bits of `pad` the caller sets, so both command layers build on it.

use common::errors::*;
use common::Fail;

pub const REQUEST_LEN: usize = 16;
pub const STATUS_LEN: usize = 8;
pub const STATUS_OK: [u8; STATUS_LEN] = [0xFF, 0xFF, 0, 0, 0, 0, 0, 0];

#[derive(Debug, Fail)]
pub enum FelError {
    #[fail(display = "FEL status trailer was not the success literal: {:?}", got)]
    BadStatus { got: [u8; STATUS_LEN] },
}

pub fn encode_request(command: u32, address: u32, length: u32, pad: u32) -> [u8; REQUEST_LEN] {
    let mut frame = [0u8; REQUEST_LEN];
    frame[0..4].copy_from_slice(&command.to_le_bytes());
    frame[4..8].copy_from_slice(&address.to_le_bytes());
    frame[8..12].copy_from_slice(&length.to_le_bytes());
    frame[12..16].copy_from_slice(&pad.to_le_bytes());
    frame
}

pub fn check_status(trailer: &[u8; STATUS_LEN]) -> Result<()> {
    if *trailer != STATUS_OK {
        return Err(FelError::BadStatus { got: *trailer }.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_little_endian() {
        let frame = encode_request(0x0102, 0x00007220, 0x11, 0x22);
        assert_eq!(u32::from_le_bytes(frame[0..4].try_into().unwrap()), 0x0102);
        assert_eq!(
            u32::from_le_bytes(frame[4..8].try_into().unwrap()),
            0x00007220
        );
        assert_eq!(u32::from_le_bytes(frame[8..12].try_into().unwrap()), 0x11);
        assert_eq!(u32::from_le_bytes(frame[12..16].try_into().unwrap()), 0x22);
    }

    #[test]
    fn accepts_only_the_success_literal() {
        assert!(check_status(&STATUS_OK).is_ok());
        let mut bad = STATUS_OK;
        bad[2] = 1;
        assert!(check_status(&bad).is_err());
    }
}
