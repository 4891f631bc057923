//! Sequences user-requested flash workflows (C9).
//!
//! Grounded on `original_source/flashutil/include/flashutil/entryPoint.h`'s
//! `EntryPoint::Parameters` (`index`, `mode`, `operation`,
//! `omitRedundantWrites`, `verify`, `inStream`/`outStream`) and
//! `EntryPoint::Mode`/`Operation` enums — renamed to the Rust
//! idiom (`Entry`, `Mode`, `Operation`) but the same shape. As
//! spec.md §4.9 directs, the first step run is always an implicit
//! identify; `Orchestrator::run` performs it once up front and hands
//! every entry the resulting [`Geometry`].

use std::io::{Read as IoRead, Write as IoWrite};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::flash::geometry::{Geometry, Id};
use crate::flash::ops::{EraseUnit, FlashOps};
use crate::transport::SpiTransport;

/// Erase/write/read granularity, mirroring `EntryPoint::Mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Chip,
    Block,
    Sector,
}

/// The workflow step to perform, mirroring `EntryPoint::Operation`
/// (`NO_OPERATION` has no Rust analogue — an empty entry list is just
/// an empty slice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Erase,
    Unlock,
    Write,
    Read,
}

/// One step of an orchestrated session, equivalent to one
/// `EntryPoint::Parameters` value. `index` addresses the block/sector
/// within the chosen `mode` (ignored for `Mode::Chip`); `input`/
/// `output` are used by `Write`/`Read` respectively.
pub struct Entry<'a> {
    pub operation: Operation,
    pub mode: Mode,
    pub index: u32,
    pub input: Option<&'a mut dyn IoRead>,
    pub output: Option<&'a mut dyn IoWrite>,
    pub verify: bool,
    pub skip_redundant: bool,
}

impl<'a> Entry<'a> {
    pub fn erase(mode: Mode, index: u32) -> Self {
        Entry { operation: Operation::Erase, mode, index, input: None, output: None, verify: false, skip_redundant: false }
    }

    pub fn unlock() -> Self {
        Entry { operation: Operation::Unlock, mode: Mode::Chip, index: 0, input: None, output: None, verify: false, skip_redundant: false }
    }

    pub fn write(mode: Mode, index: u32, input: &'a mut dyn IoRead) -> Self {
        Entry { operation: Operation::Write, mode, index, input: Some(input), output: None, verify: false, skip_redundant: false }
    }

    pub fn read(mode: Mode, index: u32, output: &'a mut dyn IoWrite) -> Self {
        Entry { operation: Operation::Read, mode, index, input: None, output: Some(output), verify: false, skip_redundant: false }
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn skip_redundant(mut self, skip: bool) -> Self {
        self.skip_redundant = skip;
        self
    }
}

/// Outcome of the implicit identify step run at the start of every
/// [`Orchestrator::run`] call.
#[derive(Debug, Clone)]
pub struct IdentifyOutcome {
    pub id: Id,
    pub geometry: Option<Geometry>,
}

fn region(geometry: &Geometry, mode: Mode, index: u32) -> (u32, u32) {
    match mode {
        Mode::Chip => (0, geometry.total_size()),
        Mode::Block => (index * geometry.block_size, geometry.block_size),
        Mode::Sector => (index * geometry.sector_size, geometry.sector_size),
    }
}

/// Drives `identify -> [unlock | erase | write | read]*` against a
/// chip reachable through an [`SpiTransport`].
pub struct Orchestrator<'t, T: SpiTransport> {
    ops: FlashOps<'t, T>,
}

impl<'t, T: SpiTransport> Orchestrator<'t, T> {
    pub fn new(transport: &'t mut T) -> Self {
        Orchestrator { ops: FlashOps::new(transport) }
    }

    /// Runs the implicit identify, then every entry in order against
    /// the resolved geometry. `override_geometry`, when set, is used
    /// in place of a catalog lookup (and is required if `catalog` has
    /// no entry for the identified chip).
    pub fn run(
        &mut self,
        catalog: &Catalog,
        override_geometry: Option<Geometry>,
        entries: &mut [Entry],
    ) -> Result<IdentifyOutcome> {
        let id = self.ops.identify()?;
        let geometry = override_geometry.or_else(|| catalog.lookup(&id).cloned());

        for entry in entries.iter_mut() {
            let geometry = geometry.as_ref().ok_or(Error::UnknownGeometry)?;
            self.run_entry(geometry, entry)?;
        }

        Ok(IdentifyOutcome { id, geometry })
    }

    fn run_entry(&mut self, geometry: &Geometry, entry: &mut Entry) -> Result<()> {
        match entry.operation {
            Operation::Unlock => self.ops.unlock(geometry.protect_mask),
            Operation::Erase => self.run_erase(geometry, entry),
            Operation::Write => self.run_write(geometry, entry),
            Operation::Read => self.run_read(geometry, entry),
        }
    }

    fn run_erase(&mut self, geometry: &Geometry, entry: &mut Entry) -> Result<()> {
        let unit = match entry.mode {
            Mode::Chip => EraseUnit::Chip,
            Mode::Block => EraseUnit::Block,
            Mode::Sector => EraseUnit::Sector,
        };
        let (addr, len) = region(geometry, entry.mode, entry.index);

        if entry.skip_redundant && self.region_is_erased(geometry, addr, len)? {
            return Ok(());
        }

        self.ops.erase(geometry, unit, addr)
    }

    fn run_write(&mut self, geometry: &Geometry, entry: &mut Entry) -> Result<()> {
        let (base_addr, region_len) = region(geometry, entry.mode, entry.index);
        let input = entry.input.as_mut().expect("write entry needs an input stream");

        let mut data = Vec::new();
        input.read_to_end(&mut data).map_err(Error::Io)?;
        if data.len() as u32 > region_len {
            return Err(Error::OutOfBounds);
        }

        let page_size = geometry.page_size;
        let mut offset = 0u32;
        while (offset as usize) < data.len() {
            let end = ((offset + page_size) as usize).min(data.len());
            let mut page = data[offset as usize..end].to_vec();
            if page.len() < page_size as usize && end == data.len() {
                page.resize(page_size as usize, 0xFF);
            }
            let addr = base_addr + offset;

            let skip = entry.skip_redundant && self.page_already_matches(geometry, addr, &page)?;
            if !skip {
                self.ops.page_program(geometry, addr, &page)?;
            }

            offset += page_size;
        }

        if entry.verify {
            let mut readback = vec![0u8; data.len()];
            self.ops.read(geometry, base_addr, &mut readback)?;
            if readback != data {
                return Err(Error::VerifyFailed);
            }
        }

        Ok(())
    }

    fn run_read(&mut self, geometry: &Geometry, entry: &mut Entry) -> Result<()> {
        let (addr, len) = region(geometry, entry.mode, entry.index);
        let output = entry.output.as_mut().expect("read entry needs an output stream");

        let mut buf = vec![0u8; len as usize];
        self.ops.read(geometry, addr, &mut buf)?;
        output.write_all(&buf).map_err(Error::Io)
    }

    /// Compares a whole region against an expected fill value of
    /// `0xFF` (the post-erase state), per `SPEC_FULL.md` Open Question
    /// Decision 4: region-granularity comparisons, not byte-by-byte,
    /// to bound the number of `READ` transactions issued.
    fn region_is_erased(&mut self, geometry: &Geometry, addr: u32, len: u32) -> Result<bool> {
        let mut buf = vec![0u8; len as usize];
        self.ops.read(geometry, addr, &mut buf)?;
        Ok(buf.iter().all(|&b| b == 0xFF))
    }

    fn page_already_matches(&mut self, geometry: &Geometry, addr: u32, page: &[u8]) -> Result<bool> {
        let mut buf = vec![0u8; page.len()];
        self.ops.read(geometry, addr, &mut buf)?;
        Ok(buf == page)
    }
}
