// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! daplite-swd library
//!
//! ARM Serial Wire Debug (SWD) protocol engine, flash programmer and Intel
//! HEX decoder for the daplite debug probe core.
//!
//! This can be used to connect to, debug and program ARM Cortex-M MCUs using
//! the
//! [ARM SWD protocol](https://developer.arm.com/documentation/ihi0031/latest/)
//!
//! It is `no_std` and hardware-agnostic: the firmware that embeds it supplies
//! the wire by implementing [`SwdTransport`], which also carries the delay
//! primitive, so the library itself performs no direct I/O and holds no
//! timers.  It requires an `alloc` implementation.
//!
//! The following diagram shows the key `daplite-swd` concepts.
//!
//! ```text
//!       Host tooling        |   firmware glue    |     daplite-swd
//! ------------------------                        --------------------
//!   Intel HEX image  ------------------------->     hex::HexDecoder
//!                                                         |
//!                                              flash::FlashManager
//! ------------------------                     -------------------
//!                                                TargetController
//!                                              -------------------
//!                                                  SwdInterface
//! ------------------------                     -------------------
//!     MCU under debug      <===================    SwdTransport
//!                           SWDIO/SWCLK/nRESET   (firmware supplies)
//! ```
//!
//! * [`SwdInterface`] provides typed DP/AP register access, bulk memory
//!   access and the target connection state machine.
//! * [`TargetController`] drives the target's execution state (halt, resume,
//!   reset) and core register access.
//! * [`FlashManager`] orchestrates flash programming through a target-side
//!   algorithm blob.
//! * [`hex::HexDecoder`] streams Intel HEX text into binary runs suitable
//!   for [`FlashManager::program()`].
//!
//! `daplite-swd` uses and is designed to be used alongside the
//! [`daplite_core`] library, which provides the strongly typed ARM debug
//! register values.

#![cfg_attr(not(test), no_std)]

pub mod family;
pub mod flash;
pub mod hex;
pub mod interface;
pub mod target;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

#[doc(inline)]
pub use crate::family::FamilyOps;
#[doc(inline)]
pub use crate::flash::FlashManager;
#[doc(inline)]
pub use crate::interface::SwdInterface;
#[doc(inline)]
pub use crate::target::TargetController;
#[doc(inline)]
pub use crate::transport::SwdTransport;

extern crate alloc;
use alloc::format;
use alloc::string::String;
use core::fmt;
use serde::Serialize;

/// Core error type used by all daplite-swd objects
///
/// Methods are provided to make it easier to handle errors, by checking if
/// either a retry or reset is required:
///
/// - [`SwdError::requires_retry()`]
/// - [`SwdError::requires_reset()`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwdError {
    /// Transient error that can likely be retried successfully.  Returned
    /// when a transfer has received WAIT acknowledgements for longer than
    /// the retry budget allows.
    WaitAck,

    /// Represents a fault condition on the target.  This typically means
    /// the target has got into a fault state; clear the sticky flags with
    /// [`SwdInterface::clear_errors()`] or reconnect with
    /// [`SwdInterface::connect()`].
    FaultAck,

    /// Represents no acknowledgement from the target.  This typically means
    /// it got into a bad state, or nothing is attached.  The value received
    /// is included - but it is unlikely to be terribly useful.  7 means the
    /// SWDIO line was high for the entire acknowledge cycle, which is the
    /// most common case.
    NoAck(u8),

    /// A Debug Port error was detected, signalled via the DP CTRL/STAT
    /// sticky error flags.  This usually requires writing the ABORT
    /// register, via [`SwdInterface::clear_errors()`], to clear, or
    /// reconnecting to the target.
    DpError,

    /// While there wasn't a SWD protocol level error, the requested
    /// operation failed.  Often occurs when a DP/AP register write doesn't
    /// "take".  The operation can be retried, but may fail again.
    OperationFailed(String),

    /// The target is not ready to receive the requested operation.  This
    /// normally means the debug domain has not been powered up - connect
    /// first with [`SwdInterface::connect()`].
    NotReady,

    /// A bounded wait on the target expired - for example the core failed
    /// to halt, or a flash algorithm routine failed to return.
    Timeout,

    /// All connection attempts failed.  Returned by
    /// [`SwdInterface::connect()`] once its retry budget, including
    /// hardware reset recovery, is exhausted.
    ConnectFailed,
}

impl SwdError {
    /// Returns true if the error requires a target reset or reconnect to
    /// recover.  If the error persists after
    /// [`SwdInterface::connect()`], the target may require a hard reset.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            SwdError::NoAck(_) | SwdError::FaultAck | SwdError::DpError | SwdError::ConnectFailed
        )
    }

    /// Returns true if the error is a transient error that can be retried.
    /// This is typically just the `Wait` error from the SWD target.
    pub fn requires_retry(&self) -> bool {
        matches!(self, SwdError::WaitAck)
    }

    /// Returns true if the error requires neither a reset nor retry to
    /// recover.  Normally this means an application error - the API has
    /// probably been used incorrectly, or the target is in a bad state.
    pub fn requires_other(&self) -> bool {
        !self.requires_reset() && !self.requires_retry()
    }
}

impl SwdError {
    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwdError::WaitAck => "Wait ACK",
            SwdError::FaultAck => "Fault ACK",
            SwdError::NoAck(_) => "No ACK",
            SwdError::DpError => "Debug Port Error",
            SwdError::OperationFailed(_) => "Operation Failed",
            SwdError::NotReady => "Not Ready",
            SwdError::Timeout => "Timeout",
            SwdError::ConnectFailed => "Connect Failed",
        }
    }
}

impl Serialize for SwdError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SwdError", 2)?;

        let kind = match self {
            SwdError::WaitAck => "wait ack",
            SwdError::FaultAck => "fault ack",
            SwdError::NoAck(_) => "no ack",
            SwdError::DpError => "debug port",
            SwdError::OperationFailed(_) => "operation failed",
            SwdError::NotReady => "not ready",
            SwdError::Timeout => "timeout",
            SwdError::ConnectFailed => "connect failed",
        };

        state.serialize_field("kind", kind)?;

        let detail = match self {
            SwdError::OperationFailed(msg) => msg.clone(),
            SwdError::NoAck(code) => format!("{code}"),
            _ => String::new(), // empty detail for variants without data
        };
        state.serialize_field("detail", detail.as_str())?;
        state.end()
    }
}

impl fmt::Display for SwdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdError::NoAck(ack) => write!(f, "{}: {ack}", self.as_str()),
            SwdError::OperationFailed(str) => write!(f, "{}: {str}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}
