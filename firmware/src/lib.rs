//! Request dispatcher turning framed serial bytes into SPI bus
//! transactions (C5).
//!
//! [`Dispatcher`] is generic over three small hardware-capability
//! traits — [`SpiBus`], [`ChipSelect`], [`Serial`] — the Rust
//! expression of the original firmware's callback-plus-userdata-
//! pointer idiom. A concrete board support crate implements those
//! traits over its real peripherals; see `examples/nucleo_f401.rs` for
//! a Cortex-M target that does so over `stm32f4xx-hal`.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
pub mod dispatcher;

pub use dispatcher::{ChipSelect, Dispatcher, Serial, SpiBus};
