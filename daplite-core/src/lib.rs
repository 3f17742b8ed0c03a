// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! daplite-core library
//!
//! ARM debug register data types used by the daplite probe core.
//!
//! This crate contains the strongly typed register values for the ARM Debug
//! Port (DP), the MEM-AP, and the Cortex-M System Control Space debug
//! registers, together with the descriptor traits used to read and write
//! them over the wire.  It contains no protocol logic - that lives in
//! `daplite-swd`.
//!
//! It is `no_std` and requires an `alloc` implementation, supplied by the
//! firmware that embeds it.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arm;
