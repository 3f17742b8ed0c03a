// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD wire transport boundary
//!
//! [`SwdTransport`] is the seam between this library and the hardware.  The
//! firmware embedding daplite implements it on top of whatever drives the
//! SWDIO/SWCLK/nRESET pins - bit-banged GPIO, a SPI peripheral, or a
//! dedicated DAP block.  Everything above ([`crate::SwdInterface`] upwards)
//! is pure protocol logic against this trait.
//!
//! The trait also carries the delay primitive, so the protocol engine's
//! bounded waits run off the firmware's clock rather than an internal timer.

use core::fmt;
use daplite_core::arm::dp::Select;

/// Acknowledgement returned by a single SWD transfer
///
/// This is the target's 3-bit ACK field, decoded.  `NoResponse` carries the
/// raw value; 7 means SWDIO was high for the entire acknowledge cycle, which
/// usually means nothing is attached or the target is not in SWD mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAck {
    /// Transfer accepted, data valid
    Ok,
    /// Target busy - retry the same transfer
    Wait,
    /// Target signalled a fault - sticky error flags need clearing
    Fault,
    /// Unrecognized acknowledgement, raw value included
    NoResponse(u8),
}

impl TransferAck {
    /// Decode a raw 3-bit ACK field
    pub fn from_raw(ack: u8) -> Self {
        match ack {
            1 => TransferAck::Ok,
            2 => TransferAck::Wait,
            4 => TransferAck::Fault,
            other => TransferAck::NoResponse(other),
        }
    }
}

impl fmt::Display for TransferAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferAck::Ok => write!(f, "OK"),
            TransferAck::Wait => write!(f, "WAIT"),
            TransferAck::Fault => write!(f, "FAULT"),
            TransferAck::NoResponse(ack) => write!(f, "no response ({ack})"),
        }
    }
}

/// The wire transport implemented by the embedding firmware
///
/// A transfer is one complete SWD transaction: request byte, acknowledge,
/// and (when the ACK is OK) the 32-bit data phase with parity.  The
/// transport owns parity generation and checking; a failed read parity
/// should be reported as [`TransferAck::NoResponse`].
pub trait SwdTransport {
    /// Perform one SWD transfer.
    ///
    /// Arguments:
    /// - `op`: Operation, carrying direction and register address
    /// - `data`: Data to write for write operations, ignored for reads
    ///
    /// Returns the acknowledge and, for reads that were accepted, the data
    /// read.  The data value is meaningless unless the ACK is
    /// [`TransferAck::Ok`] and the operation was a read.
    fn transfer(&mut self, op: SwdOp, data: u32) -> (TransferAck, u32);

    /// Drive the SWD line reset sequence (at least 50 clocks with SWDIO
    /// high, followed by idle cycles).
    fn line_reset(&mut self);

    /// Send the JTAG-to-SWD switch sequence (0xE79E).
    fn jtag_to_swd(&mut self);

    /// Drive the target's nRESET line.  `asserted` true holds the target
    /// in reset.
    fn set_nreset(&mut self, asserted: bool);

    /// Delay for at least the given number of microseconds.  Used for all
    /// bounded waits in the protocol engine.
    fn delay_us(&mut self, us: u32);
}

/// SWD Operations
///
/// Each operation contains the register address as a u8 (0x0, 0x4, etc).
///
/// SWD command format
/// Bit 0: Start (1)
/// Bit 1: APnDP (0=DP, 1=AP)
/// Bit 2: RnW (0=write, 1=read)
/// Bit 3: A2 (address bit 2)
/// Bit 4: A3 (address bit 3)
/// Bit 5: Parity
/// Bit 6: Stop (0)
/// Bit 7: Park (1)
///
/// Use this to create low-level SWD operations directly, which can be sent
/// to the target using [`crate::SwdInterface`] methods.
///
/// Create using `SwdOp::DpRead(0x0)`, `SwdOp::ApWrite(0x4)`, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdOp {
    DpRead(u8),
    DpWrite(u8),
    ApRead(u8),
    ApWrite(u8),
}

impl SwdOp {
    /// Build the request byte for this operation, including parity.
    ///
    /// Transports that shift the request out themselves can use this rather
    /// than re-deriving the encoding.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_cmd(&self) -> u8 {
        // SWD cmd: [start][APnDP][RnW][A3][A2][parity][stop][park][trn]
        let (base, addr) = match self {
            // start=1, APnDP=0, RnW=1, park=1
            SwdOp::DpRead(a) => (0x85, a),
            // start=1, APnDP=0, RnW=0, park=1
            SwdOp::DpWrite(a) => (0x81, a),
            // start=1, APnDP=1, RnW=1, park=1
            SwdOp::ApRead(a) => (0x87, a),
            // start=1, APnDP=1, RnW=0, park=1
            SwdOp::ApWrite(a) => (0x83, a),
        };

        let cmd = base | ((addr & 0x0C) << 1); // A[3:2] to bits 4:3
        Self::add_parity(cmd)
    }

    fn add_parity(cmd: u8) -> u8 {
        // Parity is calculated using APnDP, RnW and A[2:3]
        // This is bits 1, 2, 3 and 4 of our implementation
        let parity_bits = cmd & 0x1E;
        let parity = calculate_parity(parity_bits) as u8;
        cmd | (parity << 5)
    }

    /// Checks if the given SELECT register value has the correct bits already
    /// set.
    pub(crate) fn check_dp_select(&self, select: Select) -> bool {
        let (bank, mask) = match self {
            SwdOp::DpRead(addr) | SwdOp::DpWrite(addr) => {
                let bank = (((addr >> 4) & 0xF) as u32) << Select::DPBANKSEL_SHIFT;
                let mask = Select::DPBANKSEL_MASK << Select::DPBANKSEL_SHIFT;
                (bank, mask)
            }
            SwdOp::ApRead(addr) | SwdOp::ApWrite(addr) => {
                let bank = (((addr >> 4) & 0xF) as u32) << Select::APBANKSEL_SHIFT;
                let mask = Select::APBANKSEL_MASK << Select::APBANKSEL_SHIFT;
                (bank, mask)
            }
        };
        (select.value() & mask) == bank
    }
}

impl fmt::Display for SwdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdOp::DpRead(a) => write!(f, "DP Read 0x{a:02X}"),
            SwdOp::DpWrite(a) => write!(f, "DP Write 0x{a:02X}"),
            SwdOp::ApRead(a) => write!(f, "AP Read 0x{a:02X}"),
            SwdOp::ApWrite(a) => write!(f, "AP Write 0x{a:02X}"),
        }
    }
}

/// Calculate SWD parity - 1 for an odd number of bits set to 1, 0 otherwise.
pub fn calculate_parity<T>(value: T) -> bool
where
    T: Into<u32>,
{
    let value: u32 = value.into();
    value.count_ones() % 2 == 1
}
