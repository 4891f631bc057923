//! Host SPI transport (C6).
//!
//! Translates an abstract multi-segment SPI message into one or more
//! `SPI_TRANSFER` packets sized to the firmware's advertised
//! `max-packet-size`, preserving chip-select continuity across chunk
//! boundaries the way `spec.md` §4.6 describes. Grounded on
//! `original_source/flashutil/include/flashutil/spi.h`'s
//! `Spi::Message`/`SendOpts`/`RecvOpts` abstraction (here flattened
//! into one `Segment` struct, since Rust slices make the "send bytes +
//! skip count + recv count" triad a plain value type rather than a
//! builder) and `flashutil/include/flashutil/spi/serial.h`'s
//! `SerialSpi`, the concrete transport actually used in production.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use spi_flash_protocol::packet::{self, Decoded, PacketDecoder};
use spi_flash_protocol::request::SpiTransferRequest;
use spi_flash_protocol::response::{GetInfoResponse, SpiTransferResponse};
use spi_flash_protocol::{Command, ErrorCode, Request, Response, TransferFlags};

use crate::error::{Error, Result};

/// Wall-clock budget for one request/response round trip.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Size of the scratch buffer used to decode one response frame.
/// Generously larger than any packet the firmware is expected to
/// advertise, so it never becomes the limiting factor.
const RX_ARENA: usize = 4096;

/// One segment of an abstract SPI message: clock out `tx`, then keep
/// bytes `[rx_skip, rx_skip + rx_len)` of what was clocked in over the
/// `max(tx.len(), rx_skip + rx_len)`-cycle window. `keep_cs` mirrors
/// the wire flag of the same name: `true` keeps CS asserted into the
/// next segment (or the next `transfer` call), `false` releases it at
/// the end of this segment.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub tx: &'a [u8],
    pub rx_skip: usize,
    pub rx_len: usize,
    pub keep_cs: bool,
}

impl<'a> Segment<'a> {
    pub fn send(tx: &'a [u8]) -> Self {
        Segment { tx, rx_skip: 0, rx_len: 0, keep_cs: false }
    }

    pub fn recv(rx_skip: usize, rx_len: usize) -> Self {
        Segment { tx: &[], rx_skip, rx_len, keep_cs: false }
    }

    pub fn keep_cs(mut self, keep: bool) -> Self {
        self.keep_cs = keep;
        self
    }
}

/// The host-side abstraction flash operations are built on: an SPI bus
/// reachable only through the wire protocol.
pub trait SpiTransport {
    /// Learns the firmware's buffer size; must be called once before
    /// the first `transfer`.
    fn attach(&mut self) -> Result<()>;

    /// Releases CS via a zero-byte transfer with flags = 0.
    fn detach(&mut self) -> Result<()>;

    /// Runs a multi-segment SPI message, returning the concatenation
    /// of every kept receive byte across all segments, in order.
    fn transfer(&mut self, segments: &[Segment]) -> Result<Vec<u8>>;
}

/// Chunks one (possibly multi-segment) SPI message into
/// `SPI_TRANSFER` packets over a real OS serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    next_id: u8,
    max_packet_size: u16,
    timeout: Duration,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;
        Ok(SerialTransport {
            port,
            next_id: 0,
            max_packet_size: 0,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Usable payload capacity per chunk once the fixed
    /// `SPI_TRANSFER` request header (flags byte plus four varints,
    /// worst case two bytes each) is subtracted.
    fn max_chunk(&self) -> usize {
        (self.max_packet_size as usize).saturating_sub(1 + 4 * 2).max(1)
    }

    fn alloc_id(&mut self) -> u8 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn roundtrip(&mut self, code: u8, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
        let id = self.alloc_id();

        let mut frame = [0u8; RX_ARENA];
        let len = packet::encode(code, id, payload, &mut frame)
            .map_err(|_| Error::OutOfBounds)?;
        self.port.write_all(&frame[..len])?;

        let mut decoder = PacketDecoder::new();
        let mut arena = [0u8; RX_ARENA];
        let deadline = Instant::now() + self.timeout;
        let mut byte = [0u8; 1];

        loop {
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(Error::Io(e)),
            }

            match decoder.feed(byte[0], &mut arena) {
                Decoded::Idle => continue,
                Decoded::Error(err, got_id) => {
                    if got_id != id {
                        // Stale frame from an earlier, already-abandoned
                        // exchange; keep waiting for ours.
                        continue;
                    }
                    return Err(match err {
                        spi_flash_protocol::packet::DecodeError::InvalidCrc => Error::Crc,
                        spi_flash_protocol::packet::DecodeError::InvalidLength => Error::OutOfBounds,
                    });
                }
                Decoded::Done(pkt) => {
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
        }
    }

    fn spi_transfer_chunk(
        &mut self,
        flags: TransferFlags,
        tx_skip: u16,
        rx_skip: u16,
        rx_size: u16,
        tx_data: &[u8],
    ) -> Result<Vec<u8>> {
        let req = Request::SpiTransfer(SpiTransferRequest {
            flags,
            tx_skip,
            rx_skip,
            rx_size,
            tx_data,
        });
        let mut payload = vec![0u8; req.encoded_size()];
        req.encode(&mut payload).map_err(|_| Error::OutOfBounds)?;

        let (_, resp_payload) = self.roundtrip(Command::SpiTransfer.code(), &payload)?;
        match Response::decode(Command::SpiTransfer, &resp_payload) {
            Ok(Response::SpiTransfer(SpiTransferResponse { rx_data })) => Ok(rx_data.to_vec()),
            _ => Err(Error::OutOfBounds),
        }
    }
}

impl SpiTransport for SerialTransport {
    fn attach(&mut self) -> Result<()> {
        let (code, payload) = self.roundtrip(Command::GetInfo.code(), &[])?;
        let resp = match Response::decode(Command::GetInfo, &payload) {
            Ok(Response::GetInfo(info)) => info,
            _ => return Err(Error::Protocol(ErrorCode::from_code(code).unwrap_or(ErrorCode::InvalidCmd))),
        };
        let GetInfoResponse { max_packet_size, .. } = resp;
        self.max_packet_size = max_packet_size;

        // Explicit CS release: a zero-byte transfer with flags = 0.
        self.spi_transfer_chunk(TransferFlags::empty(), 0, 0, 0, &[])?;
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.spi_transfer_chunk(TransferFlags::empty(), 0, 0, 0, &[])?;
        Ok(())
    }

    fn transfer(&mut self, segments: &[Segment]) -> Result<Vec<u8>> {
        let max_chunk = self.max_chunk();
        let mut out = Vec::new();

        let last_segment = segments.len().saturating_sub(1);
        for (seg_idx, seg) in segments.iter().enumerate() {
            let n = seg.tx.len().max(seg.rx_skip + seg.rx_len);
            let keep_range_end = seg.rx_skip + seg.rx_len;

            let mut pos = 0usize;
            loop {
                let remaining = n.saturating_sub(pos);
                let chunk_len = remaining.min(max_chunk);
                // A zero-length segment still needs exactly one chunk.
                let is_first_chunk = pos == 0;
                if remaining == 0 && !(is_first_chunk && n == 0) {
                    break;
                }

                let tx_abs_start = pos.max(0).min(seg.tx.len());
                let tx_abs_end = (pos + chunk_len).min(seg.tx.len());
                let (tx_skip, tx_chunk): (usize, &[u8]) = if tx_abs_start < tx_abs_end {
                    (tx_abs_start - pos, &seg.tx[tx_abs_start..tx_abs_end])
                } else {
                    (0, &[])
                };

                let keep_abs_start = pos.max(seg.rx_skip);
                let keep_abs_end = (pos + chunk_len).min(keep_range_end);
                let (rx_skip, rx_size) = if keep_abs_start < keep_abs_end {
                    (keep_abs_start - pos, keep_abs_end - keep_abs_start)
                } else {
                    (0, 0)
                };

                let is_last_chunk_of_segment = pos + chunk_len >= n;
                let is_terminal_chunk =
                    is_last_chunk_of_segment && (seg_idx == last_segment && !seg.keep_cs || !seg.keep_cs);
                let chunk_keep_cs = !is_terminal_chunk;

                let mut flags = TransferFlags::empty();
                if !tx_chunk.is_empty() {
                    flags |= TransferFlags::HAS_TX;
                }
                if rx_size > 0 {
                    flags |= TransferFlags::HAS_RX;
                }
                if chunk_keep_cs {
                    flags |= TransferFlags::KEEP_CS;
                }

                let rx = self.spi_transfer_chunk(
                    flags,
                    tx_skip as u16,
                    rx_skip as u16,
                    rx_size as u16,
                    tx_chunk,
                )?;
                out.extend_from_slice(&rx);

                pos += chunk_len.max(1).min(n.saturating_sub(pos).max(chunk_len));
                if chunk_len == 0 {
                    break;
                }
            }
        }

        Ok(out)
    }
}
