// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash programming
//!
//! Programs the target's flash by downloading a target-side flash algorithm
//! blob into RAM and calling its routines through the debug port.
//!
//! Sub-modules:
//! - [`algo`] - flash algorithm and region descriptors (configuration data)
//! - [`runtime`] - the syscall runtime that invokes algorithm routines
//! - [`manager`] - the programming orchestrator

pub mod algo;
pub mod manager;
pub mod runtime;

#[doc(inline)]
pub use algo::{AlgoFlags, FlashAlgorithm, FlashRegion, SectorInfo};
#[doc(inline)]
pub use manager::FlashManager;

use alloc::format;
use alloc::string::String;
use core::fmt;
use serde::Serialize;

use crate::SwdError;

/// Flash programming error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// The operation requires an open programming session - call
    /// [`FlashManager::open()`] first.  Also returned after a previous
    /// failure has latched the session into its error state.
    NotOpen,

    /// No flash algorithm covers the requested address.
    AlgorithmMissing,

    /// The algorithm blob did not read back correctly after download.  The
    /// target's RAM may be faulty, undersized, or in use.
    DownloadFailed,

    /// The algorithm's `init` routine reported failure.
    InitFailed,

    /// The algorithm's `uninit` routine reported failure.
    UninitFailed,

    /// An erase routine reported failure.
    EraseFailed,

    /// The `program_page` routine reported failure.
    ProgramFailed,

    /// Post-program verification found a mismatch between the data written
    /// and the flash contents.
    VerifyMismatch,

    /// The erase address is not aligned to the sector containing it.
    UnalignedErase,

    /// An underlying SWD operation failed.
    Swd(SwdError),
}

impl FlashError {
    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashError::NotOpen => "Not Open",
            FlashError::AlgorithmMissing => "Algorithm Missing",
            FlashError::DownloadFailed => "Download Failed",
            FlashError::InitFailed => "Init Failed",
            FlashError::UninitFailed => "Uninit Failed",
            FlashError::EraseFailed => "Erase Failed",
            FlashError::ProgramFailed => "Program Failed",
            FlashError::VerifyMismatch => "Verify Mismatch",
            FlashError::UnalignedErase => "Unaligned Erase",
            FlashError::Swd(_) => "SWD Error",
        }
    }
}

impl From<SwdError> for FlashError {
    fn from(error: SwdError) -> Self {
        FlashError::Swd(error)
    }
}

impl Serialize for FlashError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("FlashError", 2)?;

        let kind = match self {
            FlashError::NotOpen => "not open",
            FlashError::AlgorithmMissing => "algorithm missing",
            FlashError::DownloadFailed => "download failed",
            FlashError::InitFailed => "init failed",
            FlashError::UninitFailed => "uninit failed",
            FlashError::EraseFailed => "erase failed",
            FlashError::ProgramFailed => "program failed",
            FlashError::VerifyMismatch => "verify mismatch",
            FlashError::UnalignedErase => "unaligned erase",
            FlashError::Swd(_) => "swd",
        };

        state.serialize_field("kind", kind)?;

        let detail = match self {
            FlashError::Swd(e) => format!("{e}"),
            _ => String::new(),
        };
        state.serialize_field("detail", detail.as_str())?;
        state.end()
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::Swd(e) => write!(f, "{}: {e}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}
