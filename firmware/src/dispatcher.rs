//! The firmware request dispatcher (C5).
//!
//! `Dispatcher` owns a single contiguous arena used both as the
//! incoming-frame deserialization buffer and, once a `SPI_TRANSFER`
//! request has been decoded, as the in-place TX/RX scratch for the bus
//! transaction itself — mirroring the original C `Programmer`'s single
//! `memory`/`memorySize` pair. Outgoing frames are never assembled
//! into a second buffer; they are streamed byte-by-byte through
//! [`Serial::send`], CRC accumulated as they go, the same way
//! `common/src/common/protocol/server.c`'s `_response()` does.

use spi_flash_protocol::packet::{DecodeError, Decoded, PacketDecoder};
use spi_flash_protocol::protocol::{
    CMD_NIBBLE_MASK, FRAME_MIN_SIZE, PROTO_VERSION_MAJOR, PROTO_VERSION_MINOR, SYNC_NIBBLE,
};
use spi_flash_protocol::{varint, Command, ErrorCode, Request, TransferFlags};
use spi_flash_protocol::crc8::{crc8_byte, PROTO_CRC8_POLY, PROTO_CRC8_START};

/// Number of idle ticks (`on_idle` calls with no byte received) before
/// a mid-frame decode is abandoned with a `TIMEOUT` response.
pub const IDLE_THRESHOLD: u32 = 60_000;

/// A half-duplex SPI peripheral, driven exactly like the original's
/// `SpiTransferCallback`: `buf[..tx_len]` holds bytes to clock out; on
/// return `buf[..rx_len]` holds the bytes clocked in, overwriting the
/// TX content in place.
pub trait SpiBus {
    fn transfer(&mut self, buf: &mut [u8], tx_len: usize, rx_len: usize);
}

/// The chip-select line gating the attached flash chip.
pub trait ChipSelect {
    fn assert(&mut self, asserted: bool);
}

/// The byte-oriented link the dispatcher emits response frames over.
pub trait Serial {
    fn send(&mut self, byte: u8);
    fn flush(&mut self);
}

/// Turns framed serial bytes into SPI bus transactions and back.
///
/// Constructed once over a `'a`-lived arena and the three hardware
/// capabilities; fed one byte at a time from the serial receive path
/// via [`Dispatcher::on_byte`], with [`Dispatcher::on_idle`] called
/// whenever no byte is currently available (so a truncated frame
/// cannot stall the dispatcher forever).
pub struct Dispatcher<'a, SPI, CS, SER> {
    arena: &'a mut [u8],
    spi: SPI,
    cs: CS,
    serial: SER,
    decoder: PacketDecoder,
    idle_counter: u32,
    cs_asserted: bool,
}

impl<'a, SPI, CS, SER> Dispatcher<'a, SPI, CS, SER>
where
    SPI: SpiBus,
    CS: ChipSelect,
    SER: Serial,
{
    pub fn new(arena: &'a mut [u8], spi: SPI, cs: CS, serial: SER) -> Self {
        Dispatcher {
            arena,
            spi,
            cs,
            serial,
            decoder: PacketDecoder::new(),
            idle_counter: 0,
            cs_asserted: false,
        }
    }

    /// Usable payload capacity advertised by `GET_INFO`: the arena
    /// minus the fixed frame overhead (sync/code, id, 1-byte length,
    /// CRC), matching `memorySize - PROTO_FRAME_MIN_SIZE` in
    /// `common/src/common/protocol/server.c`.
    pub fn max_packet_size(&self) -> u16 {
        self.arena.len().saturating_sub(FRAME_MIN_SIZE) as u16
    }

    /// Feeds one byte received from the serial link.
    pub fn on_byte(&mut self, byte: u8) {
        self.idle_counter = 0;

        match self.decoder.feed(byte, &mut *self.arena) {
            Decoded::Idle => {}
            Decoded::Error(err, id) => {
                let code = match err {
                    DecodeError::InvalidCrc => ErrorCode::InvalidCrc,
                    DecodeError::InvalidLength => ErrorCode::InvalidLength,
                };
                warn!("protocol error on frame id={}: {:?}", id, code);
                self.emit_error(id, code);
            }
            Decoded::Done(pkt) => {
                let code = pkt.code;
                let id = pkt.id;
                let payload_len = pkt.payload.len();

                // Every field we need past this point is copied out of
                // `pkt` as owned, `Copy` data — once this computation
                // is done, `pkt` (and the borrow of `self.arena` that
                // `feed` returned) is no longer referenced, so the
                // arena is free to be reused below.
                let spi_request = if code == Command::SpiTransfer.code() {
                    match Request::decode(Command::SpiTransfer, pkt.payload) {
                        Ok(Request::SpiTransfer(req)) => {
                            let tx_size = req.tx_data.len();
                            Some(Ok((
                                req.flags,
                                req.tx_skip as usize,
                                payload_len - tx_size,
                                tx_size,
                                req.rx_skip as usize,
                                req.rx_size as usize,
                            )))
                        }
                        _ => Some(Err(())),
                    }
                } else {
                    None
                };

                match Command::from_code(code) {
                    Some(Command::GetInfo) => {
                        trace!("GET_INFO id={}", id);
                        self.emit_get_info(id);
                    }
                    Some(Command::SpiTransfer) => match spi_request {
                        Some(Ok((flags, tx_skip, header_len, tx_size, rx_skip, rx_size))) => {
                            self.handle_spi_transfer(
                                id, flags, tx_skip, header_len, tx_size, rx_skip, rx_size,
                            );
                        }
                        _ => self.emit_error(id, ErrorCode::InvalidLength),
                    },
                    None => {
                        warn!("INVALID_CMD code={}", code);
                        self.emit_error(id, ErrorCode::InvalidCmd);
                    }
                }
            }
        }
    }

    /// Called when no byte is currently available from the serial
    /// link. Guards against a truncated frame stalling the dispatcher.
    pub fn on_idle(&mut self) {
        self.idle_counter += 1;
        if self.idle_counter >= IDLE_THRESHOLD {
            self.idle_counter = 0;
            if !self.decoder.is_waiting_for_sync() {
                let id = self.decoder.current_id();
                self.decoder.reset();
                warn!("idle timeout, resetting mid-frame decode (id={})", id);
                self.emit_error(id, ErrorCode::Timeout);
            }
        }
    }

    fn handle_spi_transfer(
        &mut self,
        id: u8,
        flags: TransferFlags,
        tx_skip: usize,
        header_len: usize,
        tx_size: usize,
        rx_skip: usize,
        rx_size: usize,
    ) {
        let tx_len = tx_skip + tx_size;
        let rx_len = rx_skip + rx_size;
        let transfer_len = tx_len.max(rx_len);

        if transfer_len > self.arena.len() {
            self.emit_error(id, ErrorCode::InvalidLength);
            return;
        }

        // Slide the already-decoded TX payload from right after the
        // request header into its transfer-relative position, then
        // zero-fill the skipped (dummy-clock) prefix ahead of it.
        if tx_size > 0 && header_len != tx_skip {
            self.arena.copy_within(header_len..header_len + tx_size, tx_skip);
        }
        for b in &mut self.arena[..tx_skip] {
            *b = 0;
        }

        if !self.cs_asserted {
            self.cs.assert(true);
            self.cs_asserted = true;
        }

        self.spi.transfer(&mut self.arena[..transfer_len], tx_len, rx_len);

        if !flags.contains(TransferFlags::KEEP_CS) {
            self.cs.assert(false);
            self.cs_asserted = false;
        }

        self.emit_spi_transfer(id, rx_skip, rx_size);
    }

    fn emit_error(&mut self, id: u8, err: ErrorCode) {
        let crc = emit_header(&mut self.serial, err.code(), id, 0);
        self.serial.send(crc);
        self.serial.flush();
    }

    fn emit_get_info(&mut self, id: u8) {
        let max_packet_size = self.max_packet_size();
        let version_byte = (PROTO_VERSION_MAJOR << 4) | (PROTO_VERSION_MINOR & 0x0F);

        let mut vbuf = [0u8; 2];
        let vlen = varint::encode(max_packet_size, &mut vbuf);
        let payload_len = 1 + vlen;

        let mut crc = emit_header(&mut self.serial, Command::GetInfo.code(), id, payload_len);
        crc = send_tracked(&mut self.serial, version_byte, crc);
        for &b in &vbuf[..vlen] {
            crc = send_tracked(&mut self.serial, b, crc);
        }
        self.serial.send(crc);
        self.serial.flush();
    }

    fn emit_spi_transfer(&mut self, id: u8, rx_start: usize, rx_size: usize) {
        let mut vbuf = [0u8; 2];
        let vlen = varint::encode(rx_size as u16, &mut vbuf);
        let payload_len = vlen + rx_size;

        let mut crc = emit_header(&mut self.serial, Command::SpiTransfer.code(), id, payload_len);
        for &b in &vbuf[..vlen] {
            crc = send_tracked(&mut self.serial, b, crc);
        }
        for &b in &self.arena[rx_start..rx_start + rx_size] {
            crc = send_tracked(&mut self.serial, b, crc);
        }
        self.serial.send(crc);
        self.serial.flush();
    }
}

fn send_tracked<SER: Serial>(serial: &mut SER, byte: u8, crc: u8) -> u8 {
    serial.send(byte);
    crc8_byte(byte, PROTO_CRC8_POLY, crc)
}

/// Streams the sync/code byte, id, and varint length prefix of a
/// response frame, returning the running CRC so the caller can keep
/// folding payload bytes into it before sending the trailer.
fn emit_header<SER: Serial>(serial: &mut SER, code: u8, id: u8, payload_len: usize) -> u8 {
    let mut crc = PROTO_CRC8_START;
    crc = send_tracked(serial, (SYNC_NIBBLE << 4) | (code & CMD_NIBBLE_MASK), crc);
    crc = send_tracked(serial, id, crc);
    if payload_len > 127 {
        crc = send_tracked(serial, 0x80 | ((payload_len >> 8) as u8), crc);
    }
    send_tracked(serial, (payload_len & 0xFF) as u8, crc)
}
