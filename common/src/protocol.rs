//! Wire-level constants shared by every layer of the protocol.

/// Protocol version advertised by `GET_INFO` responses.
pub const PROTO_VERSION_MAJOR: u8 = 1;
/// Protocol version advertised by `GET_INFO` responses.
pub const PROTO_VERSION_MINOR: u8 = 0;

/// High nibble present on every frame's first byte.
pub const SYNC_NIBBLE: u8 = 0xD;
/// Mask isolating the sync nibble from the first frame byte.
pub const SYNC_NIBBLE_MASK: u8 = 0xF0;
/// Mask isolating the command/error code from the first frame byte.
pub const CMD_NIBBLE_MASK: u8 = 0x07;

/// Minimum legal frame size: sync+code byte, id byte, 1-byte varint, CRC.
pub const FRAME_MIN_SIZE: usize = 4;

/// Command codes, carried in the low 3 bits of a frame's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetInfo = 0x0,
    SpiTransfer = 0x1,
}

impl Command {
    /// Recovers a `Command` from a raw 3-bit code, if it names one.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0 => Some(Command::GetInfo),
            0x1 => Some(Command::SpiTransfer),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Error codes, carried in the same 4-bit field as `Command` on the
/// response path; context (request vs. response) disambiguates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError = 0,
    InvalidSync = 1,
    InvalidCmd = 2,
    Timeout = 3,
    InvalidLength = 4,
    InvalidCrc = 5,
}

impl ErrorCode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::NoError),
            1 => Some(ErrorCode::InvalidSync),
            2 => Some(ErrorCode::InvalidCmd),
            3 => Some(ErrorCode::Timeout),
            4 => Some(ErrorCode::InvalidLength),
            5 => Some(ErrorCode::InvalidCrc),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

bitflags::bitflags! {
    /// Flag bits of the `SPI_TRANSFER` request's `flags` byte.
    pub struct TransferFlags: u8 {
        /// The request carries `tx_size` bytes of TX data.
        const HAS_TX = 0x01;
        /// The request wants `rx_size` bytes of RX data back.
        const HAS_RX = 0x02;
        /// Keep CS asserted after this chunk — more chunks of the same
        /// logical transfer follow.
        const KEEP_CS = 0x04;
    }
}
