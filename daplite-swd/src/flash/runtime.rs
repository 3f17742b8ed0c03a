// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash algorithm syscall runtime
//!
//! Invokes a routine inside a downloaded flash algorithm as a synchronous
//! remote procedure call over the debug port: arguments are marshalled into
//! core registers, the core resumes at the routine's entry with interrupts
//! masked, and completion is detected by polling for the halt the exit
//! breakpoint produces.  The return value comes back in r0.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use daplite_core::arm::scs::{CoreRegister, Dhcsr};

use crate::SwdError;
use crate::family::FamilyOps;
use crate::target::TargetController;
use crate::transport::SwdTransport;

// xPSR value for routine entry: thumb bit set, nothing else
const XPSR_THUMB: u32 = 0x0100_0000;

// Halt polls while a routine runs, at SYSCALL_POLL_US intervals.  Chip
// erases can legitimately take seconds.
const SYSCALL_POLLS: u32 = 100_000;
const SYSCALL_POLL_US: u32 = 100;

/// How a routine reports success in r0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnConvention {
    /// Zero is success, anything else is failure
    Boolean,
    /// The address one past the processed buffer (arg0 + arg1) is success
    Pointer,
}

/// One syscall invocation, constructed per call and discarded after
#[derive(Debug, Clone, Copy)]
pub struct SyscallFrame {
    /// Arguments, marshalled into r0-r3
    pub args: [u32; 4],
    /// Static base for the routine's data addressing (r9)
    pub static_base: u32,
    /// Initial stack pointer
    pub stack_pointer: u32,
    /// Exit breakpoint the routine returns to (lr, thumb bit added)
    pub return_address: u32,
    /// Routine entry point (pc)
    pub entry: u32,
}

impl SyscallFrame {
    /// Builds a frame for one routine invocation.
    pub fn new(
        entry: u32,
        args: [u32; 4],
        static_base: u32,
        stack_pointer: u32,
        return_address: u32,
    ) -> Self {
        Self {
            args,
            static_base,
            stack_pointer,
            return_address,
            entry,
        }
    }
}

/// Executes one flash algorithm routine on the target.
///
/// The core must already be halted (the orchestrator holds the target in
/// the programming state throughout a session).  On return the core is
/// halted again with interrupts unmasked.
///
/// Arguments:
/// - `ctl`: The target controller.
/// - `frame`: The invocation to execute.
///
/// Returns:
/// - `Ok(u32)`: the routine's r0 return value.  Not yet validated against
///   a return convention - see [`validate_return`].
/// - `Err(SwdError::Timeout)`: if the routine failed to reach the exit
///   breakpoint in time.
pub fn exec_syscall<T, F>(
    ctl: &mut TargetController<T, F>,
    frame: &SyscallFrame,
) -> Result<u32, SwdError>
where
    T: SwdTransport,
    F: FamilyOps<T>,
{
    trace!(
        "Exec:  Syscall 0x{:08X} ({:#010X}, {:#010X}, {:#010X}, {:#010X})",
        frame.entry, frame.args[0], frame.args[1], frame.args[2], frame.args[3]
    );

    // Marshal the arguments and execution context
    ctl.write_core_reg(CoreRegister::R0, frame.args[0])?;
    ctl.write_core_reg(CoreRegister::R1, frame.args[1])?;
    ctl.write_core_reg(CoreRegister::R2, frame.args[2])?;
    ctl.write_core_reg(CoreRegister::R3, frame.args[3])?;
    ctl.write_core_reg(CoreRegister::R9, frame.static_base)?;
    ctl.write_core_reg(CoreRegister::Sp, frame.stack_pointer)?;
    ctl.write_core_reg(CoreRegister::Lr, frame.return_address | 1)?;
    ctl.write_core_reg(CoreRegister::Pc, frame.entry)?;
    ctl.write_core_reg(CoreRegister::Xpsr, XPSR_THUMB)?;

    // Resume with interrupts masked: first assert halt+mask together, then
    // clear only the halt bit.  Masking and resuming in one write is not
    // reliable on all cores.
    ctl.iface()
        .write_mem(Dhcsr::ADDRESS, Dhcsr::control(true, true).into())?;
    ctl.iface()
        .write_mem(Dhcsr::ADDRESS, Dhcsr::control(false, true).into())?;

    // Poll for the halt at the exit breakpoint
    let mut halted = false;
    for _ in 0..SYSCALL_POLLS {
        let dhcsr = Dhcsr::from(ctl.iface().read_mem(Dhcsr::ADDRESS)?);
        if dhcsr.s_halt() {
            halted = true;
            break;
        }
        ctl.iface().delay_us(SYSCALL_POLL_US);
    }

    if !halted {
        warn!("Flash routine 0x{:08X} did not return", frame.entry);
        // Best effort re-halt so the session can recover
        let _ = ctl
            .iface()
            .write_mem(Dhcsr::ADDRESS, Dhcsr::control(true, false).into());
        return Err(SwdError::Timeout);
    }

    let result = ctl.read_core_reg(CoreRegister::R0)?;

    // Unmask interrupts, staying halted
    ctl.iface()
        .write_mem(Dhcsr::ADDRESS, Dhcsr::control(true, false).into())?;

    trace!("OK:    Syscall 0x{:08X} -> {result:#010X}", frame.entry);
    Ok(result)
}

/// Checks a routine's r0 return value against its convention.
///
/// Returns `true` only when the value signals success - an unexpected
/// value is never treated as success.
pub fn validate_return(convention: ReturnConvention, frame: &SyscallFrame, r0: u32) -> bool {
    match convention {
        ReturnConvention::Boolean => r0 == 0,
        ReturnConvention::Pointer => r0 == frame.args[0].wrapping_add(frame.args[1]),
    }
}
