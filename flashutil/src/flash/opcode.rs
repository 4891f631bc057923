//! JEDEC opcodes used by the flash-operations layer (C7).
//!
//! Grounded on `original_source/flashutil/include/flash/opcode.h`
//! (which only names the one opcode the original's `FlashOpcode` enum
//! had grown so far, `X_9F_GET_JEDEC_ID`) and spec.md §4.7's full
//! opcode table. The teacher crate's own `series25::Opcode` enum
//! (`examples/jonas-schievink-spi-memory/src/series25.rs`) uses the
//! same numeric values; this is that enum, widened to the erase
//! granularities and chip-erase spec.md names.

/// A single-byte JEDEC command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Read JEDEC manufacturer/device id (3 bytes).
    Rdid = 0x9F,
    /// Read the status register (1 byte).
    Rdsr = 0x05,
    /// Write the status register (1 byte).
    Wrsr = 0x01,
    /// Set the write-enable latch.
    Wren = 0x06,
    /// Read data starting at a 3-byte big-endian address.
    Read = 0x03,
    /// Program up to one page at a 3-byte big-endian address.
    Pp = 0x02,
    /// Erase a sector at a 3-byte big-endian address.
    Se = 0x20,
    /// Erase a block at a 3-byte big-endian address.
    Be = 0xD8,
    /// Erase the whole chip.
    Ce = 0xC7,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Splits a 24-bit flash address into the big-endian 3-byte form every
/// addressed opcode (`READ`, `PP`, `SE`, `BE`) carries after itself.
pub fn address_bytes(addr: u32) -> [u8; 3] {
    [(addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}
