//! CLI front end: `flashutil info|identify|read|write|erase|unlock|dump|load`.
//!
//! Grounded on the teacher crate's own `src/util.rs`
//! (`structopt`-derived `Options`/`Operations`, `simplelog::TermLogger`
//! init, `ihex` dump/load) — same flag names where the concept
//! carries over (`--log-level` with an `env` fallback), same
//! subcommand set extended with `identify`/`unlock` for the two-node
//! protocol this crate actually drives, per `SPEC_FULL.md` §6.

use std::fs;

use ihex::{Record, Reader};
use log::{error, info};
use simplelog::{LevelFilter, TermLogger, TerminalMode};
use structopt::StructOpt;

use flashutil::flash::geometry::Geometry;
use flashutil::{Catalog, EraseUnit, Entry, FlashOps, Orchestrator, SerialTransport, SpiTransport};

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(subcommand)]
    operation: Operations,

    /// Serial port the firmware node is attached to.
    #[structopt(long, default_value = "/dev/ttyUSB0", env = "FLASH_PORT")]
    port: String,

    /// Serial baud rate.
    #[structopt(long, default_value = "115200", env = "FLASH_BAUD")]
    baud: u32,

    /// Log level.
    #[structopt(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: LevelFilter,
}

#[derive(Debug, StructOpt)]
enum Operations {
    /// Report the firmware's protocol version and max packet size.
    Info,
    /// Read the JEDEC id and resolve it against the catalog.
    Identify,
    /// Read `length` bytes starting at `address` and print them.
    Read {
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,
        length: u32,
    },
    /// Write hex-encoded `data` starting at `address`.
    Write {
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,
        #[structopt(long, parse(try_from_str = parse_hex_data))]
        data: Vec<u8>,
    },
    /// Erase one unit (sector, block, or the whole chip).
    Erase {
        #[structopt(long, possible_values = &["sector", "block", "chip"], default_value = "sector")]
        unit: String,
        /// Index of the unit to erase (ignored for `chip`).
        #[structopt(long, default_value = "0")]
        index: u32,
    },
    /// Clear the chip's software write-protection bits.
    Unlock,
    /// Read `length` bytes from `address` into an Intel HEX file.
    Dump {
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,
        length: u32,
        #[structopt(long, default_value = "dump.ihex")]
        file: String,
    },
    /// Program flash from an Intel HEX file's data records.
    Load { file: String },
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn parse_hex_data(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s)
}

/// Programs `data` starting at `addr`, chunked to the geometry's page
/// size and zero-padded (0xFF) on the final short page, the same
/// chunk-and-pad policy `orchestrator::Orchestrator::run_write` uses
/// for mode-indexed writes.
fn write_region<T: SpiTransport>(
    ops: &mut FlashOps<T>,
    geometry: &Geometry,
    addr: u32,
    data: &[u8],
) -> flashutil::Result<()> {
    let page_size = geometry.page_size;
    let mut offset = 0u32;
    while (offset as usize) < data.len() {
        let end = ((offset + page_size) as usize).min(data.len());
        let mut page = data[offset as usize..end].to_vec();
        if page.len() < page_size as usize && end == data.len() {
            page.resize(page_size as usize, 0xFF);
        }
        ops.page_program(geometry, addr + offset, &page)?;
        offset += page_size;
    }
    Ok(())
}

fn resolve_geometry<T: SpiTransport>(
    ops: &mut FlashOps<T>,
    catalog: &Catalog,
) -> flashutil::Result<(flashutil::Id, Geometry)> {
    let id = ops.identify()?;
    let geometry = catalog
        .lookup(&id)
        .cloned()
        .ok_or(flashutil::Error::UnknownGeometry)?;
    Ok((id, geometry))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Options::from_args();

    TermLogger::init(opts.log_level, simplelog::Config::default(), TerminalMode::Mixed)?;

    let mut transport = SerialTransport::open(&opts.port, opts.baud)?;
    transport.attach()?;
    let catalog = Catalog::with_builtin_entries();

    match opts.operation {
        Operations::Info => {
            info!("attached to firmware on {} @ {} baud", opts.port, opts.baud);
        }
        Operations::Identify => {
            let mut ops = FlashOps::new(&mut transport);
            match resolve_geometry(&mut ops, &catalog) {
                Ok((id, geometry)) => info!("id {} -> {}", id, geometry.part_number),
                Err(flashutil::Error::UnknownGeometry) => {
                    let id = ops.identify()?;
                    info!("id {} has no catalog entry", id);
                }
                Err(e) => {
                    error!("identify failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Operations::Read { address, length } => {
            let mut ops = FlashOps::new(&mut transport);
            let (_, geometry) = resolve_geometry(&mut ops, &catalog)?;
            let mut buf = vec![0u8; length as usize];
            ops.read(&geometry, address, &mut buf)?;
            info!("read {} bytes at 0x{:06x}: {:02x?}", length, address, buf);
        }
        Operations::Write { address, data } => {
            let mut ops = FlashOps::new(&mut transport);
            let (_, geometry) = resolve_geometry(&mut ops, &catalog)?;
            write_region(&mut ops, &geometry, address, &data)?;
            info!("wrote {} bytes at 0x{:06x}", data.len(), address);
        }
        Operations::Erase { unit, index } => {
            let mut ops = FlashOps::new(&mut transport);
            let (_, geometry) = resolve_geometry(&mut ops, &catalog)?;
            let erase_unit = match unit.as_str() {
                "block" => EraseUnit::Block,
                "chip" => EraseUnit::Chip,
                _ => EraseUnit::Sector,
            };
            let addr = match erase_unit {
                EraseUnit::Sector => index * geometry.sector_size,
                EraseUnit::Block => index * geometry.block_size,
                EraseUnit::Chip => 0,
            };
            ops.erase(&geometry, erase_unit, addr)?;
            info!("erased {:?} at index {}", erase_unit, index);
        }
        Operations::Unlock => {
            let mut orchestrator = Orchestrator::new(&mut transport);
            let mut entries = vec![Entry::unlock()];
            orchestrator.run(&catalog, None, &mut entries)?;
            info!("unlock complete");
        }
        Operations::Dump { address, length, file } => {
            let mut ops = FlashOps::new(&mut transport);
            let (_, geometry) = resolve_geometry(&mut ops, &catalog)?;
            let mut buf = vec![0u8; length as usize];
            ops.read(&geometry, address, &mut buf)?;

            let mut records = Vec::new();
            for (c, chunk) in buf.chunks(32).enumerate() {
                records.push(Record::Data {
                    offset: (address as usize + c * 32) as u16,
                    value: chunk.to_vec(),
                });
            }
            records.push(Record::EndOfFile);
            let data = ihex::create_object_file_representation(&records)
                .map_err(|e| format!("ihex encode error: {:?}", e))?;
            fs::write(&file, data)?;
            info!("dumped {} bytes to {}", length, file);
        }
        Operations::Load { file } => {
            let mut ops = FlashOps::new(&mut transport);
            let (_, geometry) = resolve_geometry(&mut ops, &catalog)?;
            let text = fs::read_to_string(&file)?;
            for record in Reader::new(&text) {
                match record {
                    Ok(Record::Data { offset, value }) => {
                        write_region(&mut ops, &geometry, offset as u32, &value)?;
                    }
                    Ok(Record::EndOfFile) => {}
                    Ok(other) => info!("skipping unsupported record: {:?}", other),
                    Err(e) => {
                        error!("hex reader error: {:?}", e);
                        return Err(format!("hex reader error: {:?}", e).into());
                    }
                }
            }
            info!("load complete");
        }
    }

    transport.detach()?;
    Ok(())
}
