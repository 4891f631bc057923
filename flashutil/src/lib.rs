//! Host-side SPI transport, JEDEC flash operations, chip catalog, and
//! workflow orchestrator for the SPI-flash programmer (C6-C9).
//!
//! Layering, bottom to top: [`transport`] chunks an abstract
//! multi-segment SPI message into `SPI_TRANSFER` packets over a real
//! serial port; [`flash::ops`] sequences JEDEC opcodes on top of a
//! transport; [`catalog`] resolves a JEDEC id to a [`flash::Geometry`];
//! [`orchestrator`] sequences user-level workflows
//! (identify -> unlock/erase/write/read) over an ops layer and a
//! resolved geometry. The `util` binary (`src/util.rs`, built only
//! with the `util` feature) is the CLI front end.

pub mod catalog;
pub mod error;
pub mod flash;
pub mod orchestrator;
pub mod transport;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use flash::{EraseUnit, FlashOps, Geometry, Id, Status};
pub use orchestrator::{Entry, IdentifyOutcome, Mode, Operation, Orchestrator};
pub use transport::{SerialTransport, Segment, SpiTransport};
