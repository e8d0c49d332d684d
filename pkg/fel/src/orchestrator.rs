//! The flashing state machine (spec §4.6): drives a Cubietruck from
//! power-on FEL through a running Stage-2 programming environment and
//! installs BOOT0/U-Boot, then restores the system to boot normally.

use std::future::Future;
use std::time::{Duration, Instant};

use common::errors::*;
use common::Fail;
use usb::BulkChannel;

use crate::blob::BlobProvider;
use crate::events::EventSink;
use crate::fel1::Fel1;
use crate::fel2::{Fel2, Target};

const SCRATCHPAD_FILL: u8 = 0xCC;
const DRAM0: [u8; 16] = [
    b'D', b'R', b'A', b'M', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];
const DRAM1: [u8; 16] = [
    b'D', b'R', b'A', b'M', 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

const ADDR_DRAM_HANDSHAKE: u32 = 0x7210;
const ADDR_FES_1_1_LOAD: u32 = 0x7010;
const ADDR_FES_1_1_ENTRY: u32 = 0x7220;
const ADDR_FES_1_2_ENTRY: u32 = 0x2000;
const ADDR_CRC_TABLE: u32 = 0x40100000;
const ADDR_FES_STAGE2_LOAD: u32 = 0x40200000;
const ADDR_FES2_ENTRY: u32 = 0x00007220;
const ADDR_MAGIC_BRACKET: u32 = 0x40360000;
const ADDR_LOADER_ENTRY: u32 = 0x40430000;
const ADDR_DRAM_SCRATCH: u32 = 0x40600000;
const ADDR_UBOOT_TRACE_1: u32 = 0x40400000;
const ADDR_UBOOT_TRACE_2: u32 = 0x40410000;
const ADDR_FED_NAND_STAGING: u32 = 0x40a00000;

const UPDATE_OK_MARKER: &[u8; 16] = b"updateBootxOk000";

const DEFAULT_SEND_FILE_CHUNK: usize = 65536;

#[derive(Debug, Fail)]
pub enum OrchestratorError {
    #[fail(display = "expected chip id {:#x}, VERSION reported {:#x}", expected, got)]
    ChipMismatch { expected: u32, got: u32 },
    #[fail(display = "scratchpad byte at offset {} was {:#x}, expected 0xcc", offset, byte)]
    ScratchpadMismatch { offset: usize, byte: u8 },
    #[fail(
        display = "DRAM handshake marker mismatch: expected {:?}, got {:?}",
        expected, got
    )]
    DramHandshakeMismatch { expected: Vec<u8>, got: Vec<u8> },
    #[fail(display = "readback of '{}' did not match the bytes written", what)]
    ReadbackMismatch { what: String },
    #[fail(display = "terminal reply did not contain the expected completion marker")]
    TerminalCheckFailed,
    #[fail(display = "device did not re-enumerate within the inter-stage gap")]
    ReenumerationTimeout,
}

/// A command layer able to write a buffer at an arbitrary address, common
/// to both FEL-1 and FEL-2 so `send_file` works against either.
pub trait Writer {
    fn write_at(&self, address: u32, buf: &[u8]) -> Result<()>;
}

impl<'a, C: BulkChannel> Writer for Fel1<'a, C> {
    fn write_at(&self, address: u32, buf: &[u8]) -> Result<()> {
        self.write(address, buf)
    }
}

impl<'a, C: BulkChannel> Writer for Fel2<'a, C> {
    fn write_at(&self, address: u32, buf: &[u8]) -> Result<()> {
        self.wr(address, buf, Target::Dram)
    }
}

/// Writes `name`'s contents at `address` in chunks, zero-padding the tail
/// up to `min_bytes` (spec §4.6.4). `address` advances by the size of
/// each written chunk (file bytes plus any padding it carried), so
/// successive chunks cover disjoint, contiguous device memory.
pub fn send_file<W: Writer>(
    writer: &W,
    blobs: &dyn BlobProvider,
    address: u32,
    name: &str,
    chunk: usize,
    min_bytes: usize,
    events: &EventSink,
) -> Result<()> {
    let file = blobs.get(name)?;
    let file_size = file.len();
    let mut remaining = min_bytes.max(file_size);
    let mut addr = address;
    let mut offset = 0usize;
    let mut total_written = 0usize;

    while remaining > 0 {
        let want = remaining.min(chunk);
        let available = file_size.saturating_sub(offset);
        let bytes_read = available.min(want);

        let mut buf = vec![0u8; want];
        buf[..bytes_read].copy_from_slice(&file[offset..offset + bytes_read]);

        writer
            .write_at(addr, &buf)
            .map_err(|e| err_msg(format!("send_file({}): write at offset {} failed: {}", name, offset, e)))?;

        addr += buf.len() as u32;
        offset += bytes_read;
        total_written += buf.len();
        remaining -= buf.len();

        if file_size > 0 {
            events.progress(((100 * total_written) / file_size).min(100) as u8);
        }
    }

    Ok(())
}

fn require_chip(got: u32, expected: u32) -> Result<()> {
    if got != expected {
        return Err(OrchestratorError::ChipMismatch { expected, got }.into());
    }
    Ok(())
}

fn require_handshake(got: &[u8], expected: &[u8; 16]) -> Result<()> {
    if got != expected.as_slice() {
        return Err(OrchestratorError::DramHandshakeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
        .into());
    }
    Ok(())
}

fn magic_bracket<C: BulkChannel>(
    fel2: &Fel2<C>,
    blobs: &dyn BlobProvider,
    name: &str,
    events: &EventSink,
) -> Result<()> {
    send_file(
        fel2,
        blobs,
        ADDR_MAGIC_BRACKET,
        name,
        DEFAULT_SEND_FILE_CHUNK,
        0,
        events,
    )
}

/// `VERSION` → require the boot-ROM SoC id; caches the reported
/// scratchpad address. Read 256 bytes there; require every byte `0xCC`.
/// Write four zero bytes; VERSION again to confirm the target is still
/// responsive.
pub fn stage1_prep<C: BulkChannel>(fel1: &Fel1<C>, events: &EventSink) -> Result<u32> {
    let version = fel1.version()?;
    require_chip(version.chip_id(), 0x1651)?;
    let scratchpad = version.scratchpad;

    let mut buf = [0u8; 256];
    fel1.read(scratchpad, &mut buf)?;
    for (offset, byte) in buf.iter().enumerate() {
        if *byte != SCRATCHPAD_FILL {
            return Err(OrchestratorError::ScratchpadMismatch {
                offset,
                byte: *byte,
            }
            .into());
        }
    }

    fel1.write(scratchpad, &[0u8; 4])?;

    let confirm = fel1.version()?;
    require_chip(confirm.chip_id(), 0x1651)?;

    events.status("stage1: PREP ok");
    Ok(scratchpad)
}

pub async fn install_fes_1_1<C: BulkChannel>(
    fel1: &Fel1<C>,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    let pt_000063 = blobs.decode_trace("pt1_000063", 0x200)?;
    fel1.write(ADDR_FES_1_1_LOAD, &pt_000063)?;

    fel1.write(ADDR_DRAM_HANDSHAKE, &[0u8; 16])?;

    let pt_000081 = blobs.decode_trace("pt1_000081", 0x0AE0)?;
    let fes_1_1 = blobs.get("fes_1-1.fex")?;
    if pt_000081[..fes_1_1.len().min(pt_000081.len())] != fes_1_1[..fes_1_1.len().min(pt_000081.len())] {
        return Err(OrchestratorError::ReadbackMismatch {
            what: "pt1_000081 vs fes_1-1.fex".into(),
        }
        .into());
    }

    send_file(
        fel1,
        blobs,
        ADDR_FES_1_1_ENTRY,
        "fes_1-1.fex",
        4000,
        2784,
        events,
    )?;

    let mut readback = vec![0u8; fes_1_1.len().min(2784)];
    fel1.read(ADDR_FES_1_1_ENTRY, &mut readback)?;
    if readback != fes_1_1[..readback.len()] {
        return Err(OrchestratorError::ReadbackMismatch {
            what: "fes_1-1.fex".into(),
        }
        .into());
    }

    fel1.exec(ADDR_FES_1_1_ENTRY, 0, 0)?;
    common::async_std::task::sleep(Duration::from_millis(500)).await;
    events.progress(1);

    let mut handshake = [0u8; 16];
    fel1.read(ADDR_DRAM_HANDSHAKE, &mut handshake)?;
    require_handshake(&handshake, &DRAM0)?;

    events.status("stage1: INSTALL_FES_1_1 ok");
    Ok(())
}

pub fn install_fes_1_2<C: BulkChannel>(
    fel1: &Fel1<C>,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    fel1.write(ADDR_DRAM_HANDSHAKE, &[0u8; 16])?;
    send_file(fel1, blobs, ADDR_FES_1_2_ENTRY, "fes_1-2.fex", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    fel1.exec(ADDR_FES_1_2_ENTRY, 0, 0)?;

    let mut handshake = [0u8; 16];
    fel1.read(ADDR_DRAM_HANDSHAKE, &mut handshake)?;
    require_handshake(&handshake, &DRAM1)?;

    let expected = blobs.decode_trace("pt1_000138", 0x200)?;
    let mut got = vec![0u8; expected.len()];
    fel1.read(ADDR_FES_1_1_LOAD, &mut got)?;
    if got != expected {
        return Err(OrchestratorError::ReadbackMismatch {
            what: "pt1_000138".into(),
        }
        .into());
    }

    events.status("stage1: INSTALL_FES_1_2 ok");
    Ok(())
}

pub fn send_crc_table<C: BulkChannel>(
    fel1: &Fel1<C>,
    blobs: &dyn BlobProvider,
) -> Result<()> {
    let table = blobs.decode_trace("pt1_000147", 0x2000)?;
    fel1.write(ADDR_CRC_TABLE, &table)?;

    let mut readback = vec![0u8; table.len()];
    fel1.read(ADDR_CRC_TABLE, &mut readback)?;
    if readback != table {
        return Err(OrchestratorError::ReadbackMismatch {
            what: "pt1_000147 (CRC table)".into(),
        }
        .into());
    }

    Ok(())
}

pub fn install_fes_2<C: BulkChannel>(
    fel1: &Fel1<C>,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    fel1.write(ADDR_DRAM_HANDSHAKE, &[0u8; 16])?;
    send_file(fel1, blobs, ADDR_FES_STAGE2_LOAD, "fes.fex", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    send_file(fel1, blobs, ADDR_FES2_ENTRY, "fes_2.fex", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    fel1.exec(ADDR_FES_1_1_ENTRY, 0, 0)?;

    events.status("stage1: INSTALL_FES_2 ok, device about to re-enumerate");
    Ok(())
}

/// Runs the full Stage-1 (FEL-1 world) sequence (spec §4.6.1) over an
/// already-opened channel.
pub async fn run_stage1<C: BulkChannel>(
    channel: &C,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    let fel1 = Fel1::new(channel);
    stage1_prep(&fel1, events)?;
    install_fes_1_1(&fel1, blobs, events).await?;
    install_fes_1_2(&fel1, blobs, events)?;
    send_crc_table(&fel1, blobs)?;
    install_fes_2(&fel1, blobs, events)?;
    Ok(())
}

/// Waits for the target to disappear from and then reappear on the USB
/// bus between Stage 1 and Stage 2 (spec §4.6.1's inter-stage gap): polls
/// `poll_present` after an initial `first_wait`, then every `interval`
/// until `total` has elapsed, emitting roughly linear progress along the
/// way. `total`/`first_wait`/`interval` are parameters (20s/1s/250ms in
/// production) so tests can shrink them far below real device latency.
pub async fn wait_for_reenumeration<F, Fut>(
    mut poll_present: F,
    events: &EventSink,
    total: Duration,
    first_wait: Duration,
    interval: Duration,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    common::async_std::task::sleep(first_wait).await;

    let start = Instant::now();
    loop {
        if poll_present().await? {
            events.progress(100);
            return Ok(());
        }

        let elapsed = start.elapsed() + first_wait;
        if elapsed >= total {
            return Err(OrchestratorError::ReenumerationTimeout.into());
        }

        let pct = ((elapsed.as_millis() * 100) / total.as_millis().max(1)) as u8;
        events.progress(pct.min(99));
        common::async_std::task::sleep(interval).await;
    }
}

pub fn stage2_prep<C: BulkChannel>(
    fel1: &Fel1<C>,
    fel2: &Fel2<C>,
    events: &EventSink,
) -> Result<u32> {
    let version = fel1.version()?;
    require_chip(version.chip_id(), 0x1610)?;
    let scratchpad = version.scratchpad;

    let mut buf = [0u8; 256];
    fel2.rd(scratchpad, &mut buf, Target::Dram)?;
    if buf[0..4] != [0, 0, 0, 0] {
        return Err(OrchestratorError::ScratchpadMismatch {
            offset: 0,
            byte: buf[0],
        }
        .into());
    }
    for (i, byte) in buf[4..].iter().enumerate() {
        if *byte != SCRATCHPAD_FILL {
            return Err(OrchestratorError::ScratchpadMismatch {
                offset: i + 4,
                byte: *byte,
            }
            .into());
        }
    }

    fel2.wr(scratchpad, &buf, Target::Dram)?;

    events.status("stage2: PREP ok");
    Ok(scratchpad)
}

pub async fn install_fed_nand<C: BulkChannel>(
    fel2: &Fel2<C>,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    let pt2_000054 = blobs.decode_trace("pt2_000054", 0x2760)?;
    fel2.wr(ADDR_FED_NAND_STAGING, &pt2_000054, Target::Dram)?;

    magic_bracket(fel2, blobs, "magic_de_start.fex", events)?;
    send_file(fel2, blobs, ADDR_LOADER_ENTRY, "FED_NAND_0000000", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    magic_bracket(fel2, blobs, "magic_de_end.fex", events)?;

    fel2.exec2(ADDR_LOADER_ENTRY, 0x31)?;
    fel2.send_4uints(ADDR_FED_NAND_STAGING, ADDR_FED_NAND_STAGING + 0x1000, 0, 0)?;

    fel2.poll_0203_until_ok(events).await?;
    fel2.op_0204(0x0400)?;

    let mut reply = vec![0u8; 0x0400];
    fel2.pad_read(&mut reply)?;

    events.status("stage2: INSTALL_FED_NAND ok");
    Ok(())
}

fn check_update_ok(reply: &[u8]) -> Result<()> {
    if reply.len() < 40 || &reply[24..40] != UPDATE_OK_MARKER {
        return Err(OrchestratorError::TerminalCheckFailed.into());
    }
    Ok(())
}

pub async fn install_uboot<C: BulkChannel>(
    fel2: &Fel2<C>,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    send_file(fel2, blobs, ADDR_DRAM_SCRATCH, "UBOOT_0000000000", DEFAULT_SEND_FILE_CHUNK, 0, events)?;

    let pt_113307 = blobs.decode_trace("pt2_113307", 0x2760)?;
    fel2.wr(ADDR_UBOOT_TRACE_1, &pt_113307, Target::Dram)?;
    let pt_113316 = blobs.decode_trace("pt2_113316", 0x00AC)?;
    fel2.wr(ADDR_UBOOT_TRACE_2, &pt_113316, Target::Dram)?;

    magic_bracket(fel2, blobs, "magic_de_start.fex", events)?;
    send_file(fel2, blobs, ADDR_LOADER_ENTRY, "UPDATE_BOOT1_000", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    magic_bracket(fel2, blobs, "magic_de_end.fex", events)?;

    fel2.exec2(ADDR_LOADER_ENTRY, 0x11)?;
    fel2.send_4uints(ADDR_DRAM_SCRATCH, ADDR_UBOOT_TRACE_1, ADDR_UBOOT_TRACE_2, 0)?;

    fel2.poll_0203_until_ok(events).await?;
    fel2.op_0204(0x0400)?;

    let mut reply = vec![0u8; 0x0400];
    fel2.pad_read(&mut reply)?;
    check_update_ok(&reply)?;

    events.status("stage2: INSTALL_UBOOT ok");
    Ok(())
}

pub async fn install_boot0<C: BulkChannel>(
    fel2: &Fel2<C>,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    magic_bracket(fel2, blobs, "magic_de_start.fex", events)?;
    send_file(fel2, blobs, ADDR_DRAM_SCRATCH, "BOOT0_0000000000", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    magic_bracket(fel2, blobs, "magic_de_end.fex", events)?;

    let pt_113541 = blobs.decode_trace("pt2_113541", 0x2760)?;
    fel2.wr(ADDR_UBOOT_TRACE_1, &pt_113541, Target::Dram)?;
    let pt_113550 = blobs.decode_trace("pt2_113550", 0x00AC)?;
    fel2.wr(ADDR_UBOOT_TRACE_2, &pt_113550, Target::Dram)?;

    magic_bracket(fel2, blobs, "magic_de_start.fex", events)?;
    send_file(fel2, blobs, ADDR_LOADER_ENTRY, "UPDATE_BOOT0_000", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    magic_bracket(fel2, blobs, "magic_de_end.fex", events)?;

    fel2.exec2(ADDR_LOADER_ENTRY, 0x11)?;
    fel2.send_4uints(ADDR_DRAM_SCRATCH, ADDR_UBOOT_TRACE_1, ADDR_UBOOT_TRACE_2, 0)?;

    fel2.poll_0203_until_ok(events).await?;
    fel2.op_0204(0x0400)?;

    let mut reply = vec![0u8; 0x0400];
    fel2.pad_read(&mut reply)?;
    check_update_ok(&reply)?;

    events.status("stage2: INSTALL_BOOT0 ok");
    Ok(())
}

pub fn restore_system<C: BulkChannel>(
    fel1: &Fel1<C>,
    fel2: &Fel2<C>,
    blobs: &dyn BlobProvider,
    scratchpad: u32,
    events: &EventSink,
) -> Result<()> {
    let _version = fel1.version()?; // observational only

    fel2.wr(scratchpad + 4, &[0xCD, 0xA5, 0x34, 0x12], Target::Dram)?;

    magic_bracket(fel2, blobs, "magic_de_start.fex", events)?;
    send_file(fel2, blobs, ADDR_LOADER_ENTRY, "FET_RESTORE_0000", DEFAULT_SEND_FILE_CHUNK, 0, events)?;
    magic_bracket(fel2, blobs, "magic_de_end.fex", events)?;

    fel2.exec2(ADDR_LOADER_ENTRY, 0x11)?;
    fel2.pad_write(&[0u8; 16])?;

    events.status("All done");
    Ok(())
}

/// Runs the full Stage-2 (FEL-2 world) sequence (spec §4.6.2) over an
/// already-opened channel.
pub async fn run_stage2<C: BulkChannel>(
    channel: &C,
    blobs: &dyn BlobProvider,
    events: &EventSink,
) -> Result<()> {
    let fel1 = Fel1::new(channel);
    let fel2 = Fel2::new(channel);

    let scratchpad = stage2_prep(&fel1, &fel2, events)?;
    install_fed_nand(&fel2, blobs, events).await?;
    install_uboot(&fel2, blobs, events).await?;
    install_boot0(&fel2, blobs, events).await?;
    restore_system(&fel1, &fel2, blobs, scratchpad, events)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use common::async_std::task;

    fn stage_version(mock: &MockChannel, soc_id: u32, scratchpad: u32) {
        let mut record = [0u8; crate::version::VERSION_RECORD_LEN];
        record[0..8].copy_from_slice(b"AWUSBFEL");
        record[8..12].copy_from_slice(&soc_id.to_le_bytes());
        record[20..24].copy_from_slice(&scratchpad.to_le_bytes());
        mock.stage_awus_status(0);
        mock.stage_raw_in(record.to_vec());
        mock.stage_awus_status(0);
        mock.stage_raw_in(vec![0xFF, 0xFF, 0, 0, 0, 0, 0, 0]);
        mock.stage_awus_status(0);
    }

    fn stage_read(mock: &MockChannel, bytes: &[u8]) {
        mock.stage_awus_status(0);
        mock.stage_raw_in(bytes.to_vec());
        mock.stage_awus_status(0);
        mock.stage_raw_in(vec![0xFF, 0xFF, 0, 0, 0, 0, 0, 0]);
        mock.stage_awus_status(0);
    }

    #[test]
    fn version_happy_path_reports_a20_and_scratchpad() {
        let mock = MockChannel::new();
        stage_version(&mock, 0x1651_00, 0x7e00);

        let fel1 = Fel1::new(&mock);
        let version = fel1.version().unwrap();
        assert_eq!(version.chip_id(), 0x1651);
        assert_eq!(version.scratchpad, 0x7e00);
    }

    #[test]
    fn prep_rejects_scratchpad_mismatch_at_offset_17() {
        let mock = MockChannel::new();
        stage_version(&mock, 0x1651_00, 0x7e00);
        let mut scratch = vec![0xCCu8; 256];
        scratch[17] = 0xAB;
        stage_read(&mock, &scratch);

        let fel1 = Fel1::new(&mock);
        let (events, _rx) = EventSink::channel(false);
        let err = stage1_prep(&fel1, &events).unwrap_err();
        assert!(format!("{}", err).contains("17"));
    }

    #[test]
    fn dram_handshake_marker_zero_succeeds_marker_two_fails() {
        assert!(require_handshake(&DRAM0, &DRAM0).is_ok());
        let bad = [
            b'D', b'R', b'A', b'M', 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        assert!(require_handshake(&bad, &DRAM0).is_err());
    }

    #[test]
    fn inter_stage_gap_reports_progress_then_succeeds() {
        task::block_on(async {
            let (events, receiver) = EventSink::channel(false);
            let start = Instant::now();
            let mut calls = 0u32;

            wait_for_reenumeration(
                || {
                    calls += 1;
                    let now_ready = calls >= 3;
                    async move { Ok(now_ready) }
                },
                &events,
                Duration::from_millis(60),
                Duration::from_millis(5),
                Duration::from_millis(10),
            )
            .await
            .unwrap();

            assert!(start.elapsed() < Duration::from_secs(1));

            let mut saw_partial_progress = false;
            while let Ok(event) = receiver.try_recv() {
                if let crate::events::Event::Progress(p) = event {
                    if p > 0 && p < 100 {
                        saw_partial_progress = true;
                    }
                }
            }
            assert!(saw_partial_progress);
        });
    }

    #[test]
    fn inter_stage_gap_times_out_if_never_ready() {
        task::block_on(async {
            let (events, _rx) = EventSink::channel(false);
            let result = wait_for_reenumeration(
                || async { Ok(false) },
                &events,
                Duration::from_millis(20),
                Duration::from_millis(5),
                Duration::from_millis(5),
            )
            .await;
            assert!(result.is_err());
        });
    }

    #[test]
    fn uboot_terminal_check_requires_exact_marker() {
        let mut reply = vec![0u8; 0x0400];
        reply[24..40].copy_from_slice(UPDATE_OK_MARKER);
        assert!(check_update_ok(&reply).is_ok());

        reply[24] = b'x';
        assert!(check_update_ok(&reply).is_err());
    }
}
