//! The error type used by this crate.
//!
//! A hand-rolled enum with manual `Display`/`Debug`, in the teacher
//! crate's `error.rs` style, rather than an error-derive crate — the
//! teacher never reaches for one, so neither do we.

use std::fmt;

use spi_flash_protocol::ErrorCode;

/// Everything that can go wrong between the CLI and the flash chip.
pub enum Error {
    /// The underlying serial port failed.
    Io(std::io::Error),

    /// A response frame's CRC trailer did not match.
    Crc,

    /// No response was seen within the wire timeout.
    Timeout,

    /// A response frame's id did not match the request that was sent.
    IdMismatch { expected: u8, got: u8 },

    /// The firmware reported a protocol-level error.
    Protocol(ErrorCode),

    /// `RDID` returned an all-zero or all-one identifier.
    NoDevice,

    /// Identify succeeded but the catalog has no matching geometry and
    /// none was supplied by the caller.
    UnknownGeometry,

    /// The chip is software write-protected and `unlock` was not
    /// requested.
    Protected,

    /// The requested address range exceeds the flash's total size.
    OutOfBounds,

    /// The requested address is not aligned to the operation's unit.
    Alignment,

    /// A write-in-progress poll exceeded its deadline.
    WriteTimeout,

    /// A post-write read-back did not match what was written.
    VerifyFailed,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "Error::Io({:?})", e),
            Error::Crc => f.write_str("Error::Crc"),
            Error::Timeout => f.write_str("Error::Timeout"),
            Error::IdMismatch { expected, got } => {
                write!(f, "Error::IdMismatch {{ expected: {}, got: {} }}", expected, got)
            }
            Error::Protocol(code) => write!(f, "Error::Protocol({:?})", code),
            Error::NoDevice => f.write_str("Error::NoDevice"),
            Error::UnknownGeometry => f.write_str("Error::UnknownGeometry"),
            Error::Protected => f.write_str("Error::Protected"),
            Error::OutOfBounds => f.write_str("Error::OutOfBounds"),
            Error::Alignment => f.write_str("Error::Alignment"),
            Error::WriteTimeout => f.write_str("Error::WriteTimeout"),
            Error::VerifyFailed => f.write_str("Error::VerifyFailed"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "serial I/O error: {}", e),
            Error::Crc => f.write_str("response CRC mismatch"),
            Error::Timeout => f.write_str("timed out waiting for a response"),
            Error::IdMismatch { expected, got } => write!(
                f,
                "response id {} did not match request id {}",
                got, expected
            ),
            Error::Protocol(code) => write!(f, "firmware reported error {:?}", code),
            Error::NoDevice => f.write_str("no device detected (RDID returned all-0x00 or all-0xFF)"),
            Error::UnknownGeometry => f.write_str("identify succeeded but geometry is unknown"),
            Error::Protected => f.write_str("chip is write-protected; run unlock first"),
            Error::OutOfBounds => f.write_str("address range exceeds the flash's total size"),
            Error::Alignment => f.write_str("address is not aligned to the operation's unit"),
            Error::WriteTimeout => f.write_str("write-in-progress never cleared"),
            Error::VerifyFailed => f.write_str("read-back did not match what was written"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
