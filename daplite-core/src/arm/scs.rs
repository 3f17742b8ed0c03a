// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Cortex-M System Control Space debug registers
//!
//! These are memory-mapped registers, accessed through the MEM-AP rather
//! than directly over the wire, so they carry a 32-bit memory `ADDRESS`
//! instead of a register descriptor.
//!
//! Covers the debug control registers needed to halt, resume, reset and
//! access the core registers of a Cortex-M target:
//! - [`Dhcsr`] - Debug Halting Control and Status
//! - [`Dcrsr`] / [`Dcrdr`] - core register transfer
//! - [`Demcr`] - Debug Exception and Monitor Control
//! - [`Aircr`] - Application Interrupt and Reset Control

use crate::register_data_rw;
use core::fmt;
use static_assertions::const_assert_eq;

/// Debug Halting Control and Status Register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dhcsr(u32);

// Standard register data impls
register_data_rw!(Dhcsr);

impl Dhcsr {
    pub const ADDRESS: u32 = 0xE000_EDF0;

    /// Key required in bits 31:16 for any write to take effect
    pub const DBGKEY: u32 = 0xA05F_0000;

    const C_DEBUGEN: u32 = 1 << 0;
    const C_HALT: u32 = 1 << 1;
    const C_MASKINTS: u32 = 1 << 3;
    const S_REGRDY: u32 = 1 << 16;
    const S_HALT: u32 = 1 << 17;
    const S_LOCKUP: u32 = 1 << 19;

    /// A write value enabling debug, with the given halt and interrupt
    /// masking control bits.  Includes the debug key.
    pub fn control(halt: bool, maskints: bool) -> Self {
        let mut value = Self::DBGKEY | Self::C_DEBUGEN;
        if halt {
            value |= Self::C_HALT;
        }
        if maskints {
            value |= Self::C_MASKINTS;
        }
        Dhcsr(value)
    }

    /// A write value disabling debug entirely
    pub fn disable() -> Self {
        Dhcsr(Self::DBGKEY)
    }

    /// Whether debug is enabled
    pub fn c_debugen(&self) -> bool {
        self.0 & Self::C_DEBUGEN != 0
    }

    /// Whether the core register transfer interface is ready
    pub fn s_regrdy(&self) -> bool {
        self.0 & Self::S_REGRDY != 0
    }

    /// Whether the core is halted
    pub fn s_halt(&self) -> bool {
        self.0 & Self::S_HALT != 0
    }

    /// Whether the core is in lockup state
    pub fn s_lockup(&self) -> bool {
        self.0 & Self::S_LOCKUP != 0
    }
}

/// Debug Core Register Selector Register
///
/// Writing a register number initiates a transfer between that core
/// register and DCRDR.  Bit 16 selects the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dcrsr(u32);

// Standard register data impls
register_data_rw!(Dcrsr);

impl Dcrsr {
    pub const ADDRESS: u32 = 0xE000_EDF4;

    const REGWNR: u32 = 1 << 16;

    /// A value selecting a core register read
    pub fn read(reg: CoreRegister) -> Self {
        Dcrsr(reg.id() as u32)
    }

    /// A value selecting a core register write
    pub fn write(reg: CoreRegister) -> Self {
        Dcrsr(Self::REGWNR | reg.id() as u32)
    }
}

/// Debug Core Register Data Register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dcrdr(u32);

// Standard register data impls
register_data_rw!(Dcrdr);

impl Dcrdr {
    pub const ADDRESS: u32 = 0xE000_EDF8;

    pub fn new(data: u32) -> Self {
        Dcrdr(data)
    }

    /// Get data value
    pub fn data(&self) -> u32 {
        self.0
    }
}

/// Debug Exception and Monitor Control Register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Demcr(u32);

// Standard register data impls
register_data_rw!(Demcr);

impl Demcr {
    pub const ADDRESS: u32 = 0xE000_EDFC;

    const VC_CORERESET: u32 = 1 << 0;

    /// Set reset vector catch - halts the core immediately out of reset
    pub fn set_vc_corereset(&mut self, enable: bool) {
        if enable {
            self.0 |= Self::VC_CORERESET;
        } else {
            self.0 &= !Self::VC_CORERESET;
        }
    }

    /// Get reset vector catch flag
    pub fn vc_corereset(&self) -> bool {
        self.0 & Self::VC_CORERESET != 0
    }
}

/// Application Interrupt and Reset Control Register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aircr(u32);

// Standard register data impls
register_data_rw!(Aircr);

impl Aircr {
    pub const ADDRESS: u32 = 0xE000_ED0C;

    /// Key required in bits 31:16 for any write to take effect
    pub const VECTKEY: u32 = 0x05FA_0000;

    const SYSRESETREQ: u32 = 1 << 2;
    const VECTRESET: u32 = 1 << 0;

    /// A write value requesting a full system reset
    pub fn sysresetreq() -> Self {
        Aircr(Self::VECTKEY | Self::SYSRESETREQ)
    }

    /// A write value requesting a core-only reset
    ///
    /// VECTRESET resets the processor but not the on-chip peripherals.
    /// Deprecated from ARMv7-M onwards but still implemented on Cortex-M3/M4
    /// parts.
    pub fn vectreset() -> Self {
        Aircr(Self::VECTKEY | Self::VECTRESET)
    }
}

/// Cortex-M core registers, as numbered by DCRSR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreRegister {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    /// Current stack pointer
    Sp,
    /// Link register
    Lr,
    /// Program counter (debug return address)
    Pc,
    /// Program status register
    Xpsr,
}

impl CoreRegister {
    /// Get the DCRSR register number
    pub fn id(&self) -> u8 {
        match self {
            CoreRegister::R0 => 0,
            CoreRegister::R1 => 1,
            CoreRegister::R2 => 2,
            CoreRegister::R3 => 3,
            CoreRegister::R4 => 4,
            CoreRegister::R5 => 5,
            CoreRegister::R6 => 6,
            CoreRegister::R7 => 7,
            CoreRegister::R8 => 8,
            CoreRegister::R9 => 9,
            CoreRegister::R10 => 10,
            CoreRegister::R11 => 11,
            CoreRegister::R12 => 12,
            CoreRegister::Sp => 13,
            CoreRegister::Lr => 14,
            CoreRegister::Pc => 15,
            CoreRegister::Xpsr => 16,
        }
    }
}

impl fmt::Display for CoreRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreRegister::Sp => write!(f, "SP"),
            CoreRegister::Lr => write!(f, "LR"),
            CoreRegister::Pc => write!(f, "PC"),
            CoreRegister::Xpsr => write!(f, "xPSR"),
            other => write!(f, "R{}", other.id()),
        }
    }
}

// The SCS debug registers are contiguous from DHCSR
const_assert_eq!(Dcrsr::ADDRESS, Dhcsr::ADDRESS + 4);
const_assert_eq!(Dcrdr::ADDRESS, Dhcsr::ADDRESS + 8);
const_assert_eq!(Demcr::ADDRESS, Dhcsr::ADDRESS + 12);
