//! End-to-end scenarios driving the real `spi-flash-firmware` dispatcher
//! from the real `flashutil` host stack over an in-memory link, per
//! `SPEC_FULL.md` §8's S1-S6. This lives in `tests/` rather than an
//! inline `#[cfg(test)]` module because it is the one place that
//! exercises both crates together, the way the teacher's own
//! integration points (`examples/dump.rs` driving `series25::Flash`
//! against a real board) sit outside `src/`.

use std::cell::RefCell;
use std::rc::Rc;

use spi_flash_firmware::{ChipSelect, Dispatcher, Serial, SpiBus};
use spi_flash_protocol::packet::{self, Decoded, PacketDecoder};
use spi_flash_protocol::request::SpiTransferRequest;
use spi_flash_protocol::response::{GetInfoResponse, SpiTransferResponse};
use spi_flash_protocol::{Command, ErrorCode, Request, Response, TransferFlags};

use flashutil::flash::geometry::Id as GeometryId;
use flashutil::{Catalog, Entry, Error, Geometry, Mode, Orchestrator, Segment, SpiTransport};

const LINK_ARENA_SIZE: usize = 512;

/// What the chip is in the middle of clocking out, carried across
/// `transfer` calls whose `tx_len` is 0 — the host side splits an
/// opcode and its trailing data into separate `SPI_TRANSFER` requests
/// held under one continuous chip-select assertion (see
/// `flash::ops::FlashOps::identify`/`read_status`/`read`), so a clock-
/// only call must keep dispensing bytes for whatever command was last
/// latched, exactly as a real 25-series part would.
#[derive(Clone, Copy)]
enum Pending {
    None,
    Rdid,
    Rdsr,
    Read { addr: usize, sent: usize },
}

/// A 25-series-shaped chip model, implementing the firmware's
/// hardware-facing `SpiBus` contract (half-duplex, in-place
/// overwrite) rather than the host-facing `SpiTransport` one — this is
/// the peripheral the real `Dispatcher` would be wired to on a board.
struct FakeChip {
    id: [u8; 3],
    status: u8,
    protect_mask: u8,
    mem: Vec<u8>,
    wip_cycles_left: u32,
    pending: Pending,
}

fn addr_from(buf: &[u8]) -> usize {
    ((buf[1] as usize) << 16) | ((buf[2] as usize) << 8) | buf[3] as usize
}

impl FakeChip {
    fn new(size: usize) -> Self {
        FakeChip {
            id: [0xEF, 0x40, 0x18],
            status: 0x9C,
            protect_mask: 0x9C,
            mem: vec![0xFF; size],
            wip_cycles_left: 0,
            pending: Pending::None,
        }
    }
}

impl SpiBus for FakeChip {
    fn transfer(&mut self, buf: &mut [u8], tx_len: usize, rx_len: usize) {
        if tx_len > 0 {
            let opcode = buf[0];
            self.pending = Pending::None;
            match opcode {
                0x9F => self.pending = Pending::Rdid,
                0x05 => self.pending = Pending::Rdsr,
                0x06 => self.status |= 0x02, // WREN
                0x01 => {
                    // WRSR
                    let value = buf[1];
                    self.status = (value & !0x01) | (self.status & 0x01);
                    self.status &= !0x02;
                }
                0x20 | 0xD8 | 0xC7 => {
                    // SE / BE / CE
                    let unit = match opcode {
                        0x20 => 4096,
                        0xD8 => 64 * 1024,
                        _ => self.mem.len(),
                    };
                    if opcode == 0xC7 {
                        self.mem.iter_mut().for_each(|b| *b = 0xFF);
                    } else {
                        let addr = addr_from(buf);
                        self.mem[addr..addr + unit].iter_mut().for_each(|b| *b = 0xFF);
                    }
                    self.status |= 0x01;
                    self.status &= !0x02;
                    self.wip_cycles_left = 1;
                }
                0x02 => {
                    // PP
                    let addr = addr_from(buf);
                    let data = &buf[4..tx_len];
                    self.mem[addr..addr + data.len()].copy_from_slice(data);
                    self.status |= 0x01;
                    self.status &= !0x02;
                    self.wip_cycles_left = 1;
                }
                0x03 => self.pending = Pending::Read { addr: addr_from(buf), sent: 0 }, // READ
                _ => {}
            }
        }

        match &mut self.pending {
            Pending::Rdid => {
                for (i, b) in buf.iter_mut().take(rx_len).enumerate() {
                    *b = self.id.get(i).copied().unwrap_or(0xFF);
                }
            }
            Pending::Rdsr => {
                if self.wip_cycles_left > 0 {
                    self.wip_cycles_left -= 1;
                } else {
                    self.status &= !0x01;
                }
                for b in buf.iter_mut().take(rx_len) {
                    *b = self.status;
                }
            }
            Pending::Read { addr, sent } => {
                for b in buf.iter_mut().take(rx_len) {
                    *b = self.mem.get(*addr + *sent).copied().unwrap_or(0xFF);
                    *sent += 1;
                }
            }
            Pending::None => {
                for b in buf.iter_mut().take(rx_len) {
                    *b = 0xFF;
                }
            }
        }
    }
}

#[derive(Clone, Default)]
struct TrackingCs(Rc<RefCell<Vec<bool>>>);

impl ChipSelect for TrackingCs {
    fn assert(&mut self, asserted: bool) {
        self.0.borrow_mut().push(asserted);
    }
}

/// A `Serial` sink shared with the harness that drives the dispatcher,
/// so the harness can drain exactly the bytes one `on_byte` loop
/// produced.
#[derive(Clone, Default)]
struct SharedSerial(Rc<RefCell<Vec<u8>>>);

impl Serial for SharedSerial {
    fn send(&mut self, byte: u8) {
        self.0.borrow_mut().push(byte);
    }
    fn flush(&mut self) {}
}

/// Drives a real `Dispatcher` entirely in-process, translating
/// [`Segment`]-shaped host calls into wire frames the same way
/// `flashutil::transport::SerialTransport` would over an actual serial
/// port, but with the "link" being direct calls into the dispatcher's
/// `on_byte` instead of a `serialport::SerialPort`.
struct DispatcherLink<'a> {
    dispatcher: Dispatcher<'a, FakeChip, TrackingCs, SharedSerial>,
    output: Rc<RefCell<Vec<u8>>>,
    cs_edges: Rc<RefCell<Vec<bool>>>,
    next_id: u8,
    max_packet_size: u16,
}

impl<'a> DispatcherLink<'a> {
    fn new(arena: &'a mut [u8], chip: FakeChip) -> Self {
        let output = Rc::new(RefCell::new(Vec::new()));
        let cs_edges = Rc::new(RefCell::new(Vec::new()));
        let dispatcher = Dispatcher::new(arena, chip, TrackingCs(cs_edges.clone()), SharedSerial(output.clone()));
        DispatcherLink { dispatcher, output, cs_edges, next_id: 0, max_packet_size: 0 }
    }

    fn alloc_id(&mut self) -> u8 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn roundtrip(&mut self, code: u8, payload: &[u8]) -> flashutil::Result<(u8, Vec<u8>)> {
        let id = self.alloc_id();

        let mut buf = [0u8; LINK_ARENA_SIZE];
        let len = packet::encode(code, id, payload, &mut buf).map_err(|_| Error::OutOfBounds)?;
        for &b in &buf[..len] {
            self.dispatcher.on_byte(b);
        }

        let frame_bytes = {
            let mut out = self.output.borrow_mut();
            std::mem::take(&mut *out)
        };

        let mut decoder = PacketDecoder::new();
        let mut arena = [0u8; LINK_ARENA_SIZE];
        for &b in &frame_bytes {
            if let Decoded::Done(pkt) = decoder.feed(b, &mut arena) {
                if pkt.id != id {
                    return Err(Error::IdMismatch { expected: id, got: pkt.id });
                }
                if pkt.code != code {
                    if let Some(err) = ErrorCode::from_code(pkt.code) {
                        return Err(Error::Protocol(err));
                    }
                }
                return Ok((pkt.code, pkt.payload.to_vec()));
            }
        }
        Err(Error::Timeout)
    }

    fn spi_transfer_chunk(
        &mut self,
        flags: TransferFlags,
        tx_skip: u16,
        rx_skip: u16,
        rx_size: u16,
        tx_data: &[u8],
    ) -> flashutil::Result<Vec<u8>> {
        let req = Request::SpiTransfer(SpiTransferRequest { flags, tx_skip, rx_skip, rx_size, tx_data });
        let mut payload = vec![0u8; req.encoded_size()];
        req.encode(&mut payload).map_err(|_| Error::OutOfBounds)?;

        let (_, resp_payload) = self.roundtrip(Command::SpiTransfer.code(), &payload)?;
        match Response::decode(Command::SpiTransfer, &resp_payload) {
            Ok(Response::SpiTransfer(SpiTransferResponse { rx_data })) => Ok(rx_data.to_vec()),
            _ => Err(Error::OutOfBounds),
        }
    }
}

impl<'a> SpiTransport for DispatcherLink<'a> {
    fn attach(&mut self) -> flashutil::Result<()> {
        let (code, payload) = self.roundtrip(Command::GetInfo.code(), &[])?;
        let info = match Response::decode(Command::GetInfo, &payload) {
            Ok(Response::GetInfo(info)) => info,
            _ => return Err(Error::Protocol(ErrorCode::from_code(code).unwrap_or(ErrorCode::InvalidCmd))),
        };
        let GetInfoResponse { max_packet_size, .. } = info;
        self.max_packet_size = max_packet_size;
        self.spi_transfer_chunk(TransferFlags::empty(), 0, 0, 0, &[])?;
        Ok(())
    }

    fn detach(&mut self) -> flashutil::Result<()> {
        self.spi_transfer_chunk(TransferFlags::empty(), 0, 0, 0, &[])?;
        Ok(())
    }

    fn transfer(&mut self, segments: &[Segment]) -> flashutil::Result<Vec<u8>> {
        let mut out = Vec::new();
        for seg in segments {
            let mut flags = TransferFlags::empty();
            if !seg.tx.is_empty() {
                flags |= TransferFlags::HAS_TX;
            }
            if seg.rx_len > 0 {
                flags |= TransferFlags::HAS_RX;
            }
            if seg.keep_cs {
                flags |= TransferFlags::KEEP_CS;
            }
            let rx = self.spi_transfer_chunk(flags, 0, seg.rx_skip as u16, seg.rx_len as u16, seg.tx)?;
            out.extend_from_slice(&rx);
        }
        Ok(out)
    }
}

fn geometry() -> Geometry {
    Geometry {
        id: GeometryId::new([0xEF, 0x40, 0x18]),
        part_number: "W25Q128FV".to_string(),
        block_size: 64 * 1024,
        block_count: 256,
        sector_size: 4 * 1024,
        sector_count: 4096,
        page_size: 256,
        protect_mask: 0x9C,
    }
}

/// S1: the handshake a host performs once at startup — `GET_INFO`
/// reports a capacity derived from the firmware's own arena, then an
/// explicit CS-release transfer completes cleanly.
#[test]
fn attach_reports_firmware_capacity_and_releases_cs() {
    let mut arena = [0u8; LINK_ARENA_SIZE];
    let mut link = DispatcherLink::new(&mut arena, FakeChip::new(1 << 20));
    link.attach().unwrap();
    assert_eq!(link.max_packet_size, (LINK_ARENA_SIZE - 4) as u16);
    assert_eq!(link.cs_edges.borrow().as_slice(), &[false]);
}

/// S2: `identify` drives a real `RDID` exchange through the dispatcher
/// and back, with CS held across the opcode and the three id bytes.
#[test]
fn identify_round_trips_through_dispatcher() {
    let mut arena = [0u8; LINK_ARENA_SIZE];
    let mut link = DispatcherLink::new(&mut arena, FakeChip::new(1 << 20));
    link.attach().unwrap();

    let mut ops = flashutil::FlashOps::new(&mut link);
    let id = ops.identify().unwrap();
    assert_eq!(id.core, [0xEF, 0x40, 0x18]);
}

/// S3: a full unlock -> erase -> write -> read cycle driven by the
/// orchestrator against the real dispatcher and a fake chip, the same
/// way `flashutil` binary's CLI would drive a real board.
#[test]
fn orchestrated_erase_write_read_cycle_round_trips() {
    let g = geometry();
    let mut arena = [0u8; LINK_ARENA_SIZE];
    let mut link = DispatcherLink::new(&mut arena, FakeChip::new(g.total_size() as usize));
    link.attach().unwrap();

    let mut orchestrator = Orchestrator::new(&mut link);
    let pattern: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    let mut input = std::io::Cursor::new(pattern.clone());
    let mut output = Vec::new();

    let mut entries = vec![
        Entry::unlock(),
        Entry::erase(Mode::Sector, 0),
        Entry::write(Mode::Sector, 0, &mut input).verify(true),
        Entry::read(Mode::Sector, 0, &mut output),
    ];

    let catalog = Catalog::new();
    let outcome = orchestrator.run(&catalog, Some(g), &mut entries).unwrap();
    assert_eq!(outcome.id.core, [0xEF, 0x40, 0x18]);
    assert_eq!(output, pattern);
}

/// S4: the firmware's own protocol-error path (`INVALID_CMD`) surfaces
/// through the host's `Error::Protocol`, not a generic I/O failure.
#[test]
fn unsupported_command_surfaces_as_protocol_error() {
    let mut arena = [0u8; LINK_ARENA_SIZE];
    let mut link = DispatcherLink::new(&mut arena, FakeChip::new(1024));
    link.attach().unwrap();

    let err = link.roundtrip(0x3, &[]).unwrap_err();
    assert!(matches!(err, Error::Protocol(ErrorCode::InvalidCmd)));
}

/// S5: a write-protected chip is unlocked before it accepts a write,
/// end to end through the dispatcher.
#[test]
fn unlock_clears_protection_before_write_succeeds() {
    let g = geometry();
    let mut arena = [0u8; LINK_ARENA_SIZE];
    let chip = FakeChip::new(g.total_size() as usize);
    assert_eq!(chip.protect_mask, 0x9C);
    let mut link = DispatcherLink::new(&mut arena, chip);
    link.attach().unwrap();

    let mut ops = flashutil::FlashOps::new(&mut link);
    assert!(ops.read_status().unwrap().is_protected(g.protect_mask));
    ops.unlock(g.protect_mask).unwrap();
    assert!(!ops.read_status().unwrap().is_protected(g.protect_mask));

    ops.erase(&g, flashutil::EraseUnit::Sector, 0).unwrap();
    ops.page_program(&g, 0, &[0xAB; 256]).unwrap();
    let mut readback = [0u8; 256];
    ops.read(&g, 0, &mut readback).unwrap();
    assert_eq!(readback, [0xAB; 256]);
}

/// S6: reading a region that spans more than one page still produces
/// the exact bytes programmed, exercising the orchestrator's
/// page-chunked write loop against the real dispatcher rather than a
/// single in-process `FakeChip` transport as in `orchestrator.rs`'s
/// own unit tests.
#[test]
fn skip_redundant_write_leaves_matching_page_untouched() {
    let g = geometry();
    let mut arena = [0u8; LINK_ARENA_SIZE];
    let mut link = DispatcherLink::new(&mut arena, FakeChip::new(g.total_size() as usize));
    link.attach().unwrap();

    let mut orchestrator = Orchestrator::new(&mut link);
    let catalog = Catalog::new();

    // Sector 0 is already erased (all-0xFF); writing an all-0xFF page
    // with skip_redundant must complete without reprogramming it.
    let page = vec![0xFFu8; g.page_size as usize];
    let mut input = std::io::Cursor::new(page);
    let mut entries = vec![Entry::write(Mode::Sector, 0, &mut input).skip_redundant(true)];
    orchestrator.run(&catalog, Some(g), &mut entries).unwrap();
}
