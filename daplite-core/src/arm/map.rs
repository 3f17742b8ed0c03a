// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM MEM-AP Registers
//!
//! The MEM-AP exposes the target's memory system through three registers:
//! CSW configures the transfer size and address increment behaviour, TAR
//! holds the target address, and DRW moves the data.

use crate::arm::register::{ApRegister, ReadableRegister, RegisterDescriptor, WritableRegister};
use crate::register_data_rw;
use core::fmt;

/// CSW Register descriptor (read-write)
pub struct CswRegister;

impl RegisterDescriptor for CswRegister {
    const ADDRESS: u8 = 0x00;
    type Value = Csw;
}

impl ReadableRegister for CswRegister {}
impl WritableRegister for CswRegister {}
impl ApRegister for CswRegister {}

/// MEM-AP Control/Status Word register data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csw(u32);

// Standard register data impls
register_data_rw!(Csw);

impl Csw {
    const SIZE_MASK: u32 = 0x7;
    const ADDRINC_MASK: u32 = 0x3 << 4;

    /// 8-bit transfer size
    pub const SIZE_8BIT: u32 = 0x0;
    /// 32-bit transfer size
    pub const SIZE_32BIT: u32 = 0x2;

    /// No address auto-increment
    pub const ADDRINC_OFF: u32 = 0x0 << 4;
    /// Auto-increment TAR by the transfer size after each access
    pub const ADDRINC_SINGLE: u32 = 0x1 << 4;

    // Common control bits expected by MEM-APs on Cortex-M parts.  DBGSWEN,
    // HPROT1 (privileged) and MSTRDBG.
    const DEFAULT_CTRL: u32 = (1 << 31) | (1 << 25) | (1 << 29);

    /// Create a CSW value with the given transfer size and increment mode
    pub fn with_size_inc(size: u32, addrinc: u32) -> Self {
        Csw(Self::DEFAULT_CTRL | (addrinc & Self::ADDRINC_MASK) | (size & Self::SIZE_MASK))
    }

    /// Get transfer size field
    pub fn size(&self) -> u32 {
        self.0 & Self::SIZE_MASK
    }

    /// Get address increment field
    pub fn addrinc(&self) -> u32 {
        self.0 & Self::ADDRINC_MASK
    }
}

impl Default for Csw {
    /// 32-bit transfers with single auto-increment - the configuration used
    /// for bulk memory access.
    fn default() -> Self {
        Self::with_size_inc(Self::SIZE_32BIT, Self::ADDRINC_SINGLE)
    }
}

/// TAR Register descriptor (read-write)
pub struct TarRegister;

impl RegisterDescriptor for TarRegister {
    const ADDRESS: u8 = 0x04;
    type Value = Tar;
}

impl ReadableRegister for TarRegister {}
impl WritableRegister for TarRegister {}
impl ApRegister for TarRegister {}

/// MEM-AP Transfer Address Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tar(u32);

// Standard register data impls
register_data_rw!(Tar);

impl Tar {
    pub fn new(addr: u32) -> Self {
        Tar(addr)
    }

    /// Get address value
    pub fn addr(&self) -> u32 {
        self.0
    }
}

/// DRW Register descriptor (read-write)
pub struct DrwRegister;

impl RegisterDescriptor for DrwRegister {
    const ADDRESS: u8 = 0x0C;
    type Value = Drw;
}

impl ReadableRegister for DrwRegister {}
impl WritableRegister for DrwRegister {}
impl ApRegister for DrwRegister {}

/// MEM-AP Data Read/Write register data
///
/// A read of DRW initiates a memory read at the current TAR; a write
/// initiates a memory write.  For sub-word transfer sizes the data is
/// carried in the byte lane selected by TAR[1:0].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drw(u32);

// Standard register data impls
register_data_rw!(Drw);

impl Drw {
    pub fn new(data: u32) -> Self {
        Drw(data)
    }

    /// Get data value
    pub fn data(&self) -> u32 {
        self.0
    }
}
