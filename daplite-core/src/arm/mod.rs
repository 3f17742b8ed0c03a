// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM debug register support
//!
//! Sub-modules:
//! - [`register`] - descriptor traits for typed register access
//! - [`dp`] - Debug Port registers
//! - [`map`] - MEM-AP registers
//! - [`scs`] - Cortex-M System Control Space debug registers

pub mod dp;
pub mod map;
pub mod register;
pub mod scs;

/// Cortex-M debug port IDCODE values, for targets this crate has been used
/// against.
pub struct Cortex;

impl Cortex {
    pub const IDCODE_M0: dp::IdCode = dp::IdCode::from_u32(0x0BB1_1477);
    pub const IDCODE_M3: dp::IdCode = dp::IdCode::from_u32(0x2BA0_1477);
    pub const IDCODE_M4: dp::IdCode = dp::IdCode::from_u32(0x2BA0_1477);
}
