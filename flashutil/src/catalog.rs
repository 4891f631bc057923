//! Flash-chip catalog: an immutable id-to-geometry registry (C8).
//!
//! Grounded on `original_source/flashutil/include/flash/registry.h`'s
//! `FlashRegistry` (`addFlash`/`getById`) and, for the JSON loader, the
//! shape implied by `flashutil/include/flashutil/flash/registry/reader/json.h`
//! (a `FlashRegistryReader` that parses a stream into entries). The
//! loader format itself is out of spec.md's core scope (§1); what's in
//! scope and implemented is the merge-at-startup behavior and the
//! "catalog miss is not fatal" contract.

use std::collections::HashMap;

use crate::flash::geometry::{Geometry, Id};

/// An id-to-geometry registry, built once and looked up by value.
///
/// A miss is not an error — spec.md §4.9/§7 treat "identify succeeded,
/// catalog has nothing for this id" as a recoverable, user-visible
/// condition (`UnknownGeometry`), not a fatal one.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    by_id: HashMap<[u8; 3], Geometry>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog { by_id: HashMap::new() }
    }

    /// The built-in catalog: a small table of well-known 25-series
    /// parts, seeded from JEDEC ids used in the teacher crate's own
    /// test fixtures (`series25::tests::test_decode_jedec_id`'s
    /// Cypress part) and from common Winbond/Macronix 25-series
    /// geometries.
    pub fn with_builtin_entries() -> Self {
        let mut catalog = Catalog::new();
        for entry in BUILTIN_PARTS {
            catalog.add(entry.to_geometry());
        }
        catalog
    }

    /// Adds or replaces the entry for `geometry.id.core`.
    pub fn add(&mut self, geometry: Geometry) {
        self.by_id.insert(geometry.id.core, geometry);
    }

    /// Looks up a geometry by its 3-byte core JEDEC id (per
    /// `SPEC_FULL.md` Open Question Decision 3, extended/continuation
    /// bytes are never part of the lookup key).
    pub fn lookup(&self, id: &Id) -> Option<&Geometry> {
        self.by_id.get(&id.core)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Merges externally-supplied entries on top of whatever this
    /// catalog already has (later entries win on id collision).
    #[cfg(feature = "catalog-json")]
    pub fn merge_json(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let entries: Vec<JsonEntry> = serde_json::from_str(json)?;
        for entry in entries {
            self.add(entry.into_geometry());
        }
        Ok(())
    }
}

struct BuiltinPart {
    id: [u8; 3],
    part_number: &'static str,
    block_size: u32,
    block_count: u32,
    sector_size: u32,
    sector_count: u32,
    page_size: u32,
    protect_mask: u8,
}

impl BuiltinPart {
    fn to_geometry(&self) -> Geometry {
        Geometry {
            id: Id::new(self.id),
            part_number: self.part_number.to_string(),
            block_size: self.block_size,
            block_count: self.block_count,
            sector_size: self.sector_size,
            sector_count: self.sector_count,
            page_size: self.page_size,
            protect_mask: self.protect_mask,
        }
    }
}

/// 64 KiB block / 4 KiB sector / 256-byte page is the overwhelming
/// norm for this family; `protect_mask` is the status register's
/// BP0..BP2 + SRWD region the way the teacher's `series25::Status`
/// documents it (`0b0001_1100` block-protect bits plus `SRWD` at bit
/// 7 for parts that expose it).
const BUILTIN_PARTS: &[BuiltinPart] = &[
    BuiltinPart {
        id: [0xEF, 0x40, 0x18],
        part_number: "W25Q128FV",
        block_size: 64 * 1024,
        block_count: 256,
        sector_size: 4 * 1024,
        sector_count: 4096,
        page_size: 256,
        protect_mask: 0x9C,
    },
    BuiltinPart {
        id: [0xEF, 0x40, 0x16],
        part_number: "W25Q32FV",
        block_size: 64 * 1024,
        block_count: 64,
        sector_size: 4 * 1024,
        sector_count: 1024,
        page_size: 256,
        protect_mask: 0x9C,
    },
    BuiltinPart {
        id: [0xC2, 0x20, 0x17],
        part_number: "MX25L6406E",
        block_size: 64 * 1024,
        block_count: 128,
        sector_size: 4 * 1024,
        sector_count: 2048,
        page_size: 256,
        protect_mask: 0x3C,
    },
    BuiltinPart {
        id: [0xC2, 0x22, 0x08],
        part_number: "FM25V02A",
        block_size: 64 * 1024,
        block_count: 4,
        sector_size: 4 * 1024,
        sector_count: 64,
        page_size: 256,
        protect_mask: 0x0C,
    },
];

#[cfg(feature = "catalog-json")]
#[derive(serde::Deserialize)]
struct JsonEntry {
    id: [u8; 3],
    part_number: String,
    block_size: u32,
    block_count: u32,
    sector_size: u32,
    sector_count: u32,
    #[serde(default = "crate::flash::geometry::default_page_size")]
    page_size: u32,
    #[serde(default)]
    protect_mask: u8,
}

#[cfg(feature = "catalog-json")]
impl JsonEntry {
    fn into_geometry(self) -> Geometry {
        Geometry {
            id: Id::new(self.id),
            part_number: self.part_number,
            block_size: self.block_size,
            block_count: self.block_count,
            sector_size: self.sector_size,
            sector_count: self.sector_count,
            page_size: self.page_size,
            protect_mask: self.protect_mask,
        }
    }
}
