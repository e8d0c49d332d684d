//! Partition streaming, designed but disabled by default (spec §4.6.3).
//!
//! Streams a raw partition image to NAND in 64 KiB-aligned chunks, each an
//! exact multiple of the 512-byte sector size, via FEL-2 RDWR with
//! `target=NAND`, the WRITE direction bit, and FIRST/LAST set on the
//! opening and closing chunk respectively.

use usb::BulkChannel;

use common::errors::*;

use crate::fel2::{Direction, Fel2, Target, FLAG_FIRST, FLAG_LAST};

pub const CHUNK_SIZE: usize = 64 * 1024;
pub const SECTOR_SIZE: usize = 512;

/// Writes `image` to NAND starting at `address`, one `CHUNK_SIZE`-aligned
/// chunk at a time. `image.len()` need not be a multiple of `CHUNK_SIZE`;
/// the final chunk is whatever remains and still gets the LAST flag.
pub fn send_partition<C: BulkChannel>(fel2: &Fel2<C>, address: u32, image: &[u8]) -> Result<()> {
    if image.len() % SECTOR_SIZE != 0 {
        return Err(err_msg(
            "partition image length must be a multiple of the 512-byte sector size",
        ));
    }

    let mut offset = 0usize;
    let mut addr = address;
    while offset < image.len() {
        let end = (offset + CHUNK_SIZE).min(image.len());
        let mut chunk = image[offset..end].to_vec();

        let mut flags = 0u32;
        if offset == 0 {
            flags |= FLAG_FIRST;
        }
        if end == image.len() {
            flags |= FLAG_LAST;
        }

        fel2.rdwr(addr, &mut chunk, Target::Nand, Direction::Write, flags)?;

        addr += chunk.len() as u32;
        offset = end;
    }

    Ok(())
}
