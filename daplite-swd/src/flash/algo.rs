// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash algorithm and region descriptors
//!
//! These are configuration data, supplied per target device and treated as
//! immutable by the programming orchestrator.  A [`FlashAlgorithm`]
//! describes a target-side routine blob in the CMSIS-Pack style: entry
//! point addresses (as they will sit in target RAM after download), a
//! scratch buffer for page data, a stack, and a static base for the
//! routines' data addressing.

use alloc::vec::Vec;
use core::fmt;

/// Behaviour flags for a flash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlgoFlags {
    /// `init`/`uninit` apply once across the whole programming session
    /// rather than around each function kind.
    pub single_init: bool,

    /// Skip this algorithm's region during a chip erase.  Used for aliased
    /// or mirrored regions that are erased through their primary mapping.
    pub skip_chip_erase: bool,

    /// The `verify` routine returns the address one past the verified
    /// buffer on success, rather than zero.
    pub verify_returns_pointer: bool,
}

/// A sector size table entry.  Applies from `start` until the next entry's
/// start address - sector sizes are not uniform across a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorInfo {
    /// First address this sector size applies from
    pub start: u32,
    /// Sector size in bytes
    pub size: u32,
}

/// A target-side flash algorithm
///
/// All addresses are target addresses, valid once the blob has been
/// downloaded to `load_address`.  Loaded once per region and shared by
/// reference; at most one algorithm is resident in target RAM at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashAlgorithm {
    /// Name, for logs
    pub name: &'static str,

    /// Where the blob is downloaded in target RAM
    pub load_address: u32,

    /// The routine blob
    pub code: Vec<u8>,

    /// `Init(address, clock, function)` entry, if the algorithm has one
    pub init: Option<u32>,

    /// `UnInit(function)` entry, if the algorithm has one
    pub uninit: Option<u32>,

    /// `EraseChip()` entry, if the algorithm has one
    pub erase_chip: Option<u32>,

    /// `EraseSector(address)` entry
    pub erase_sector: u32,

    /// `ProgramPage(address, count, buffer)` entry
    pub program_page: u32,

    /// `Verify(address, count, buffer)` entry, if the algorithm has one
    pub verify: Option<u32>,

    /// Static base register value for the routines (r9)
    pub static_base: u32,

    /// Initial stack pointer for the routines
    pub stack_pointer: u32,

    /// Address of the exit breakpoint the routines return to
    pub exit_breakpoint: u32,

    /// Scratch buffer in target RAM for page data
    pub buffer_address: u32,

    /// Scratch buffer size - the maximum chunk per `ProgramPage` call
    pub buffer_size: u32,

    /// Minimum programming unit
    pub page_size: u32,

    /// Sector size table, ordered by start address
    pub sectors: Vec<SectorInfo>,

    /// Behaviour flags
    pub flags: AlgoFlags,
}

impl FlashAlgorithm {
    /// Sector table entry covering the given address: the highest entry
    /// whose start is at or below it.  `None` if the address precedes the
    /// whole table.
    pub fn sector_info(&self, addr: u32) -> Option<SectorInfo> {
        self.sectors.iter().rev().find(|s| s.start <= addr).copied()
    }

    /// Sector size covering the given address - see [`Self::sector_info()`].
    pub fn sector_size(&self, addr: u32) -> Option<u32> {
        self.sector_info(addr).map(|s| s.size)
    }
}

impl fmt::Display for FlashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ 0x{:08X} ({} bytes)",
            self.name,
            self.load_address,
            self.code.len()
        )
    }
}

/// A flash region
///
/// The region table is an ordered, non-overlapping set.  At most one region
/// carries the `is_default` flag; it catches addresses outside every
/// region's range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRegion<'a> {
    /// First address in the region
    pub start: u32,

    /// One past the last address in the region
    pub end: u32,

    /// The algorithm that programs this region, if any
    pub algo: Option<&'a FlashAlgorithm>,

    /// Catch-all for addresses outside every region
    pub is_default: bool,
}

impl<'a> FlashRegion<'a> {
    /// Whether the region contains the given address.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl fmt::Display for FlashRegion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}-0x{:08X}", self.start, self.end)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        Ok(())
    }
}
