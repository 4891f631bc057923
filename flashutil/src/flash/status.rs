//! The flash status register (§3 "Flash status byte").
//!
//! Grounded on `original_source/flashutil/include/flashutil/flash/status.h`'s
//! `FlashStatus` (bit 0 write-in-progress, bit 1 write-enable-latch),
//! expressed as a `bitflags!` type in the teacher crate's own
//! `series25::Status` idiom rather than the original's getter/setter
//! class — the original's `setWriteEnableLatch`/`setBusy` are stubs
//! that mutate nothing real (per spec.md §9, DESIGN NOTES, these are
//! not preserved). Protection is chip-specific (the mask lives on
//! [`crate::flash::geometry::Geometry`]), so it is not a fixed bit of
//! this type the way `series25::Status::PROT` is.

bitflags::bitflags! {
    /// Status register bits defined by spec.md §3, independent of any
    /// particular chip's protect-mask.
    pub struct Status: u8 {
        /// Erase or program in progress.
        const BUSY = 1 << 0;
        /// Write-enable latch, set by `WREN` and cleared by a
        /// successful write/erase.
        const WEL = 1 << 1;
    }
}

impl Status {
    pub fn is_write_in_progress(self) -> bool {
        self.contains(Status::BUSY)
    }

    pub fn is_write_enable_latch_set(self) -> bool {
        self.contains(Status::WEL)
    }

    /// `true` iff any bit of `mask` (the chip's protect-mask) is set in
    /// this status value. A zero mask means the chip has no software
    /// write protection, so this is always `false`.
    pub fn is_protected(self, mask: u8) -> bool {
        self.bits() & mask != 0
    }
}
