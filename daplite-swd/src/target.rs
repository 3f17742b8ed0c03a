// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Target execution-state control
//!
//! [`TargetController`] drives a connected Cortex-M target between the
//! [`TargetState`]s: holding or pulsing reset, enabling and disabling debug,
//! halting and resuming the core, and the reset-into-halt sequence used
//! before flash programming.  It also provides core register access via the
//! DCRSR/DCRDR transfer interface.
//!
//! Reset behaviour is selected by [`ResetPolicy`]: hardware reset via the
//! nRESET line, or software reset through AIRCR for boards where nRESET is
//! not wired.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use daplite_core::arm::dp::IdCode;
use daplite_core::arm::scs::{Aircr, CoreRegister, Dcrdr, Dcrsr, Demcr, Dhcsr};

use crate::SwdError;
use crate::family::FamilyOps;
use crate::interface::SwdInterface;
use crate::transport::SwdTransport;

// Settle delay either side of an nRESET edge
const RESET_SETTLE_US: u32 = 10_000;

// Halt flag polls, at HALT_POLL_US intervals
const HALT_POLLS: u32 = 1_000;
const HALT_POLL_US: u32 = 100;

// Core register transfer polls, at REG_POLL_US intervals
const REG_POLLS: u32 = 100;
const REG_POLL_US: u32 = 10;

/// Target execution states
///
/// Passed to [`TargetController::set_state()`].  This is the complete set -
/// families may override individual transitions via
/// [`FamilyOps::set_state()`] but cannot add states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Assert the hardware reset line and leave it asserted
    ResetHold,
    /// Pulse the hardware reset line and let the target run; disconnects
    /// the debug session afterwards
    ResetRun,
    /// Connect and reset the target into a halted state, ready for flash
    /// programming
    ResetProgram,
    /// Disable debug, leaving the core running normally
    NoDebug,
    /// Enable debug without halting or resetting
    Debug,
    /// Halt the core
    Halt,
    /// Resume the core
    Run,
    /// Family-specific post-programming behaviour; a no-op generically
    PostFlashReset,
    /// Power the target up, on probes that control target power
    PowerOn,
    /// Power the target down, on probes that control target power
    Shutdown,
}

/// How a software reset is performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftResetKind {
    /// AIRCR VECTRESET - core only, peripherals untouched.  Cortex-M3/M4.
    VectorReset,
    /// AIRCR SYSRESETREQ - full system reset
    SysResetRequest,
}

/// How the target is reset
///
/// Selected per device family, overridable per board.  Boards without the
/// nRESET line wired must use `Software`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Pulse the nRESET line
    Hardware,
    /// Write the AIRCR reset request register
    Software(SoftResetKind),
}

/// When reset is asserted relative to the SWD connect during
/// [`TargetState::ResetProgram`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectTiming {
    /// Connect with the target running
    #[default]
    Normal,
    /// Hold the target in reset while connecting.  Needed for parts whose
    /// application code disables the SWD pins or sleeps immediately.
    UnderReset,
}

/// Target execution-state controller
///
/// Owns the [`SwdInterface`] and the family hooks, and sequences the
/// [`TargetState`] transitions on top of them.  Create one per debug
/// session.
#[derive(Debug)]
pub struct TargetController<T: SwdTransport, F: FamilyOps<T>> {
    iface: SwdInterface<T>,
    family: F,
    policy: ResetPolicy,
    timing: ConnectTiming,
}

impl<T: SwdTransport, F: FamilyOps<T>> TargetController<T, F> {
    /// Creates a new controller.
    ///
    /// Arguments:
    /// - `iface`: The SWD interface to drive the target through.
    /// - `family`: Family hooks for the target.
    /// - `policy`: Reset policy for this board.
    pub fn new(iface: SwdInterface<T>, family: F, policy: ResetPolicy) -> Self {
        Self {
            iface,
            family,
            policy,
            timing: ConnectTiming::default(),
        }
    }

    /// Sets the connect timing used by [`TargetState::ResetProgram`].
    pub fn set_connect_timing(&mut self, timing: ConnectTiming) {
        self.timing = timing;
    }

    /// Access the underlying SWD interface.
    pub fn iface(&mut self) -> &mut SwdInterface<T> {
        &mut self.iface
    }

    /// Consumes the controller, returning the interface.
    pub fn release(self) -> SwdInterface<T> {
        self.iface
    }

    /// Transitions the target to the requested execution state.
    ///
    /// The family's [`FamilyOps::set_state()`] hook is offered the
    /// transition first; if it declines, the generic Cortex-M sequence
    /// runs.  Every polled step is bounded - a target that fails to halt
    /// in time produces [`SwdError::Timeout`], never a hang.
    ///
    /// Arguments:
    /// - `state`: The state to transition to.
    ///
    /// Returns:
    /// - `Ok(())` if the transition completed.
    /// - `Err(SwdError)` if any step failed.
    pub fn set_state(&mut self, state: TargetState) -> Result<(), SwdError> {
        debug!("Exec:  Set target state {state:?}");

        if self.family.set_state(&mut self.iface, state)? {
            trace!("Value: State {state:?} handled by family");
            return Ok(());
        }

        match state {
            TargetState::ResetHold => {
                self.family.set_target_reset(&mut self.iface, true)?;
                self.iface.delay_us(RESET_SETTLE_US);
            }
            TargetState::ResetRun => {
                self.family.set_target_reset(&mut self.iface, true)?;
                self.iface.delay_us(RESET_SETTLE_US);
                self.family.set_target_reset(&mut self.iface, false)?;
                self.iface.delay_us(RESET_SETTLE_US);
                self.iface.disconnect();
            }
            TargetState::ResetProgram => self.reset_program()?,
            TargetState::NoDebug => {
                self.iface.write_mem(Dhcsr::ADDRESS, Dhcsr::disable().into())?;
            }
            TargetState::Debug => {
                self.iface
                    .write_mem(Dhcsr::ADDRESS, Dhcsr::control(false, false).into())?;
            }
            TargetState::Halt => {
                self.iface
                    .write_mem(Dhcsr::ADDRESS, Dhcsr::control(true, false).into())?;
                self.poll_halt()?;
            }
            TargetState::Run => {
                // Clearing the debug enable resumes the core
                self.iface.write_mem(Dhcsr::ADDRESS, Dhcsr::disable().into())?;
            }
            TargetState::PostFlashReset => {
                // Hook point only - generic targets need nothing here
            }
            TargetState::PowerOn => self.family.power_on(&mut self.iface)?,
            TargetState::Shutdown => self.family.shutdown(&mut self.iface)?,
        }

        trace!("OK:    Set target state {state:?}");
        Ok(())
    }

    /// Connects to the target and leaves it halted at its reset vector,
    /// ready for flash programming.
    ///
    /// Hardware-reset boards catch the reset vector: debug is enabled,
    /// VC_CORERESET set, nRESET pulsed, and the core halts on the first
    /// instruction.  Software-reset boards halt first, then request the
    /// reset through AIRCR with the vector catch armed.
    fn reset_program(&mut self) -> Result<(), SwdError> {
        if self.timing == ConnectTiming::UnderReset {
            self.family.set_target_reset(&mut self.iface, true)?;
            self.iface.delay_us(RESET_SETTLE_US);
        }

        let idcode = self.connect()?;
        trace!("Value: Reset program connect, IDCODE {idcode}");

        if self.timing == ConnectTiming::UnderReset {
            self.family.set_target_reset(&mut self.iface, false)?;
            self.iface.delay_us(RESET_SETTLE_US);
        }

        match self.policy {
            ResetPolicy::Hardware => {
                // Enable debug, arm the reset vector catch, then pulse reset
                self.iface
                    .write_mem(Dhcsr::ADDRESS, Dhcsr::control(false, false).into())?;

                let mut demcr = Demcr::default();
                demcr.set_vc_corereset(true);
                self.iface.write_mem(Demcr::ADDRESS, demcr.into())?;

                self.family.set_target_reset(&mut self.iface, true)?;
                self.iface.delay_us(RESET_SETTLE_US);
                self.family.set_target_reset(&mut self.iface, false)?;
                self.iface.delay_us(RESET_SETTLE_US);

                self.poll_halt()?;
            }
            ResetPolicy::Software(kind) => {
                // Halt first so the reset request takes effect under debug
                self.iface
                    .write_mem(Dhcsr::ADDRESS, Dhcsr::control(true, false).into())?;
                self.poll_halt()?;

                let mut demcr = Demcr::default();
                demcr.set_vc_corereset(true);
                self.iface.write_mem(Demcr::ADDRESS, demcr.into())?;

                let aircr = match kind {
                    SoftResetKind::VectorReset => Aircr::vectreset(),
                    SoftResetKind::SysResetRequest => Aircr::sysresetreq(),
                };
                self.iface.write_mem(Aircr::ADDRESS, aircr.into())?;
                self.iface.delay_us(RESET_SETTLE_US);

                self.poll_halt()?;
            }
        }

        // Disarm the vector catch
        self.iface.write_mem(Demcr::ADDRESS, Demcr::default().into())?;

        debug!("OK:    Target halted for programming");
        Ok(())
    }

    /// Connects to the target via the connection state machine, running the
    /// family hooks.
    pub fn connect(&mut self) -> Result<IdCode, SwdError> {
        self.iface.connect(&mut self.family)
    }

    /// Validates an image against the family's rules (vector table
    /// checksums, image headers) before it is programmed.
    pub fn validate_image(&mut self, address: u32, data: &[u8]) -> Result<(), SwdError> {
        self.family.validate_image(address, data)
    }

    /// Whether the core is currently halted.
    pub fn halted(&mut self) -> Result<bool, SwdError> {
        let dhcsr = Dhcsr::from(self.iface.read_mem(Dhcsr::ADDRESS)?);
        Ok(dhcsr.s_halt())
    }

    /// Reads a core register.  The core must be halted.
    ///
    /// Arguments:
    /// - `reg`: The register to read.
    ///
    /// Returns:
    /// - `Ok(u32)`: the register value.
    /// - `Err(SwdError)`: if the transfer failed or timed out.
    pub fn read_core_reg(&mut self, reg: CoreRegister) -> Result<u32, SwdError> {
        trace!("Exec:  Read core reg {reg}");
        self.iface
            .write_mem(Dcrsr::ADDRESS, Dcrsr::read(reg).into())?;
        self.poll_regrdy()?;

        let value = self.iface.read_mem(Dcrdr::ADDRESS)?;
        trace!("Value: {reg} = {value:#010X}");
        Ok(value)
    }

    /// Writes a core register.  The core must be halted.
    ///
    /// Arguments:
    /// - `reg`: The register to write.
    /// - `value`: The value to write.
    ///
    /// Returns:
    /// - `Ok(())` if the transfer completed.
    /// - `Err(SwdError)`: if the transfer failed or timed out.
    pub fn write_core_reg(&mut self, reg: CoreRegister, value: u32) -> Result<(), SwdError> {
        trace!("Exec:  Write core reg {reg} = {value:#010X}");
        self.iface
            .write_mem(Dcrdr::ADDRESS, Dcrdr::new(value).into())?;
        self.iface
            .write_mem(Dcrsr::ADDRESS, Dcrsr::write(reg).into())?;
        self.poll_regrdy()
    }

    // Bounded poll for the halt flag.
    fn poll_halt(&mut self) -> Result<(), SwdError> {
        for _ in 0..HALT_POLLS {
            let dhcsr = Dhcsr::from(self.iface.read_mem(Dhcsr::ADDRESS)?);
            if dhcsr.s_halt() {
                return Ok(());
            }
            self.iface.delay_us(HALT_POLL_US);
        }

        warn!("Target failed to halt");
        Err(SwdError::Timeout)
    }

    // Bounded poll for core register transfer completion.
    fn poll_regrdy(&mut self) -> Result<(), SwdError> {
        for _ in 0..REG_POLLS {
            let dhcsr = Dhcsr::from(self.iface.read_mem(Dhcsr::ADDRESS)?);
            if dhcsr.s_regrdy() {
                return Ok(());
            }
            self.iface.delay_us(REG_POLL_US);
        }

        warn!("Core register transfer did not complete");
        Err(SwdError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::GenericFamily;
    use crate::testutil::FakeTarget;

    fn controller(policy: ResetPolicy) -> TargetController<FakeTarget, GenericFamily> {
        let iface = SwdInterface::new(FakeTarget::new());
        let mut ctl = TargetController::new(iface, GenericFamily, policy);
        ctl.connect().unwrap();
        ctl
    }

    #[test]
    fn halt_and_run() {
        let mut ctl = controller(ResetPolicy::Hardware);
        assert!(!ctl.halted().unwrap());

        ctl.set_state(TargetState::Halt).unwrap();
        assert!(ctl.halted().unwrap());

        ctl.set_state(TargetState::Run).unwrap();
        assert!(!ctl.halted().unwrap());
    }

    #[test]
    fn halt_timeout_is_bounded() {
        let mut ctl = controller(ResetPolicy::Hardware);
        ctl.iface().transport_mut().refuse_halt = true;

        assert_eq!(ctl.set_state(TargetState::Halt), Err(SwdError::Timeout));
    }

    #[test]
    fn reset_program_halts_hardware_policy() {
        let mut ctl = controller(ResetPolicy::Hardware);
        ctl.set_state(TargetState::ResetProgram).unwrap();
        assert!(ctl.halted().unwrap());
    }

    #[test]
    fn reset_program_halts_software_policy() {
        let mut ctl = controller(ResetPolicy::Software(SoftResetKind::SysResetRequest));
        ctl.set_state(TargetState::ResetProgram).unwrap();
        assert!(ctl.halted().unwrap());
    }

    #[test]
    fn core_register_round_trip() {
        let mut ctl = controller(ResetPolicy::Hardware);
        ctl.set_state(TargetState::Halt).unwrap();

        ctl.write_core_reg(CoreRegister::R0, 0xCAFE_F00D).unwrap();
        ctl.write_core_reg(CoreRegister::Pc, 0x0800_0101).unwrap();

        assert_eq!(ctl.read_core_reg(CoreRegister::R0).unwrap(), 0xCAFE_F00D);
        assert_eq!(ctl.read_core_reg(CoreRegister::Pc).unwrap(), 0x0800_0101);
    }

    #[test]
    fn reset_run_disconnects() {
        let mut ctl = controller(ResetPolicy::Hardware);
        ctl.set_state(TargetState::ResetRun).unwrap();
        assert!(!ctl.iface().is_connected());
    }
}
