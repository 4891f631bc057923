//! Whole-frame serializer and incremental, push-one-byte deserializer.
//!
//! A [`Packet`] never owns its payload: it is always a view into a
//! caller-supplied buffer, mirroring the original C `ProtoPkt`'s
//! payload pointer without the `unsafe`. Unlike that struct, the
//! [`PacketDecoder`] itself owns no buffer at all — the caller hands
//! one to every [`PacketDecoder::feed`] call. This lets a single-arena
//! caller (the firmware dispatcher, in particular) decode a frame's
//! payload into its arena and, once the borrow returned by `feed` has
//! been consumed, reuse that same memory for an SPI transfer or an
//! outgoing response without a second buffer.

use crate::crc8::{crc8_byte, PROTO_CRC8_POLY, PROTO_CRC8_START};
use crate::protocol::{CMD_NIBBLE_MASK, SYNC_NIBBLE, SYNC_NIBBLE_MASK};
use crate::varint;

/// An in-memory frame: command/error code, id, and a borrowed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub code: u8,
    pub id: u8,
    pub payload: &'a [u8],
}

/// Reasons a buffer-full serialize can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    BufferTooSmall,
}

/// Serializes `code`/`id`/`payload` into `buffer`, returning the
/// number of bytes written.
pub fn encode(code: u8, id: u8, payload: &[u8], buffer: &mut [u8]) -> Result<usize, EncodeError> {
    let len = payload.len();
    debug_assert!(len <= varint::MAX_VALUE as usize);

    let needed = 3 + varint::encoded_len(len as u16) + len;
    if buffer.len() < needed {
        return Err(EncodeError::BufferTooSmall);
    }

    let mut pos = 0;
    buffer[pos] = SYNC_NIBBLE << 4 | (code & CMD_NIBBLE_MASK);
    pos += 1;
    buffer[pos] = id;
    pos += 1;

    let mut vbuf = [0u8; 2];
    let vlen = varint::encode(len as u16, &mut vbuf);
    buffer[pos..pos + vlen].copy_from_slice(&vbuf[..vlen]);
    pos += vlen;

    buffer[pos..pos + len].copy_from_slice(payload);
    pos += len;

    buffer[pos] = crc8::crc8_of(&buffer[..pos]);
    pos += 1;

    Ok(pos)
}

mod crc8 {
    use super::*;
    pub fn crc8_of(buf: &[u8]) -> u8 {
        crate::crc8::crc8(buf, PROTO_CRC8_POLY, PROTO_CRC8_START)
    }
}

/// Result of feeding one byte to a [`PacketDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// Need more bytes before a frame (or error) can be produced.
    Idle,
    /// A well-formed frame completed.
    Done(Packet<'a>),
    /// A malformed frame was detected; the decoder has already reset.
    /// Carries the id latched for the frame that failed, so a caller
    /// can address an error response to it.
    Error(DecodeError, u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    InvalidCrc,
    InvalidLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitSync,
    Id,
    VlenHi,
    VlenLo,
    Payload,
    Crc,
}

/// Incremental byte-fed frame deserializer.
///
/// Holds only the state machine — code, id, running CRC, declared
/// length, bytes read so far — and no backing storage. Every call to
/// [`PacketDecoder::feed`] is given the buffer to decode payload bytes
/// into; passing the same buffer on every call reconstructs the
/// "reused arena" behavior of the original C deserializer, while
/// leaving the caller free to reclaim that buffer for something else
/// the instant the returned [`Decoded`] is no longer needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDecoder {
    state: State,
    id: u8,
    code: u8,
    crc: u8,
    data_size: u16,
    bytes_read: u16,
    vlen_hi: u8,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    pub fn new() -> Self {
        let mut this = PacketDecoder {
            state: State::WaitSync,
            id: 0,
            code: 0,
            crc: PROTO_CRC8_START,
            data_size: 0,
            bytes_read: 0,
            vlen_hi: 0,
        };
        this.reset();
        this
    }

    /// `true` once a reset has put the decoder back at frame start.
    pub fn is_waiting_for_sync(&self) -> bool {
        self.state == State::WaitSync
    }

    /// The id latched for the frame currently (or most recently) being
    /// decoded; `0` before any `Id` byte has been consumed.
    pub fn current_id(&self) -> u8 {
        self.id
    }

    pub fn reset(&mut self) {
        self.state = State::WaitSync;
        self.crc = PROTO_CRC8_START;
        self.id = 0;
        self.code = 0;
        self.bytes_read = 0;
        self.data_size = 0;
    }

    /// Feeds one byte to the deserializer, storing payload bytes into
    /// `buf` as they arrive. `buf` must be the same buffer across the
    /// whole frame; its length is also the capacity used for the
    /// `INVALID_LENGTH` check.
    pub fn feed<'b>(&mut self, byte: u8, buf: &'b mut [u8]) -> Decoded<'b> {
        let mut error = None;

        match self.state {
            State::WaitSync => {
                if byte & SYNC_NIBBLE_MASK == SYNC_NIBBLE << 4 {
                    self.code = byte & CMD_NIBBLE_MASK;
                    self.crc = crc8_byte(byte, PROTO_CRC8_POLY, PROTO_CRC8_START);
                    self.state = State::Id;
                }
                // Any other byte is silently discarded; we stay in WaitSync.
            }
            State::Id => {
                self.id = byte;
                self.crc = crc8_byte(byte, PROTO_CRC8_POLY, self.crc);
                self.state = State::VlenHi;
            }
            State::VlenHi => {
                self.crc = crc8_byte(byte, PROTO_CRC8_POLY, self.crc);
                if varint::probe(byte) == 1 {
                    self.data_size = varint::decode1(byte);
                    self.state = if self.data_size == 0 {
                        State::Crc
                    } else {
                        State::Payload
                    };
                } else {
                    self.vlen_hi = byte;
                    self.state = State::VlenLo;
                }
            }
            State::VlenLo => {
                self.crc = crc8_byte(byte, PROTO_CRC8_POLY, self.crc);
                self.data_size = varint::decode2([self.vlen_hi, byte]);
                self.state = State::Payload;
            }
            State::Payload => {
                self.crc = crc8_byte(byte, PROTO_CRC8_POLY, self.crc);
                buf[self.bytes_read as usize] = byte;
                self.bytes_read += 1;
                if self.bytes_read == self.data_size {
                    self.state = State::Crc;
                }
            }
            State::Crc => {
                if self.crc != byte {
                    error = Some(DecodeError::InvalidCrc);
                } else {
                    let result = Packet {
                        code: self.code,
                        id: self.id,
                        payload: &buf[..self.data_size as usize],
                    };
                    self.reset();
                    return Decoded::Done(result);
                }
            }
        }

        // CHECK_PAYLOAD: a synthetic tick right after a length becomes
        // known, before we start accepting payload bytes into `buf`.
        if self.state == State::Payload && self.bytes_read == 0 && self.data_size > 0 {
            if self.data_size as usize > buf.len() {
                error = Some(DecodeError::InvalidLength);
            }
        }

        if let Some(err) = error {
            let id = self.id;
            self.reset();
            return Decoded::Error(err, id);
        }

        Decoded::Idle
    }
}
