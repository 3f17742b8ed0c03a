// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD Interface
//!
//! This module implements the SWD register and memory access engine.  It
//! provides [`SwdInterface`] for performing typed DP/AP register operations,
//! bulk memory access, and the target connection state machine.

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use daplite_core::arm::dp::{Abort, CtrlStat, IdCode, Select};
use daplite_core::arm::dp::{
    AbortRegister, CtrlStatRegister, IdCodeRegister, RdBuffRegister, SelectRegister,
};
use daplite_core::arm::map::{Csw, CswRegister, DrwRegister, TarRegister};
use daplite_core::arm::register::{
    ApRegister, DpRegister, ReadableRegister, RegisterDescriptor, WritableRegister,
};

use crate::SwdError;
use crate::family::FamilyOps;
use crate::transport::{SwdOp, SwdTransport, TransferAck};

// SWD wraps read/writes using auto-incrementing at a 1K boundary, although
// this is implementation dependent.
const SWD_MEMORY_BOUNDARY: u32 = 0x400;

// Default retries after a Wait ACK
const DEFAULT_WAIT_RETRIES: u32 = 100;

// Connection attempts before giving up
const CONNECT_ATTEMPTS: u32 = 4;

// Power-up acknowledge polls, at POWER_UP_POLL_US intervals
const POWER_UP_POLLS: u32 = 100;
const POWER_UP_POLL_US: u32 = 100;

// Value marking a register shadow as invalid.  Never written to the target.
const SHADOW_INVALID: u32 = 0xFFFF_FFFF;

/// SWD Interface object
///
/// This performs individual SWD operations on the target: typed DP/AP
/// register access, memory access of any size and alignment, and the
/// connection sequence.  Higher-level target control lives in
/// [`crate::TargetController`], and flash programming in
/// [`crate::FlashManager`] - both drive the target through this interface.
///
/// Create using `SwdInterface::new()` passing in a [`SwdTransport`]
/// implementation, then call [`Self::connect()`] before any AP or memory
/// operations.
///
/// The interface shadows the DP SELECT and MEM-AP CSW registers, and elides
/// writes whose value already matches the shadow.  Shadows are only updated
/// after the corresponding wire write succeeds, and are invalidated on every
/// connection attempt.
#[derive(Debug)]
pub struct SwdInterface<T: SwdTransport> {
    transport: T,
    idcode: Option<IdCode>,
    powered_up: bool,
    dp_select: u32,
    csw: u32,
    wait_retries: u32,
}

impl<T: SwdTransport> SwdInterface<T> {
    // Resets internal state of the SWD interface.
    fn reset_internal_state(&mut self) {
        self.idcode = None;
        self.powered_up = false;
        self.dp_select = SHADOW_INVALID;
        self.csw = SHADOW_INVALID;
    }

    /// Creates a new SWD interface using the given [`SwdTransport`].
    ///
    /// Arguments:
    /// - `transport`: The wire transport to use for SWD communication.
    ///
    /// Returns:
    /// - A new [`SwdInterface`] instance.  Not yet connected - call
    ///   [`Self::connect()`] first.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            idcode: None,
            powered_up: false,
            dp_select: SHADOW_INVALID,
            csw: SHADOW_INVALID,
            wait_retries: DEFAULT_WAIT_RETRIES,
        }
    }

    /// Consumes the interface, returning the transport.
    pub fn release(self) -> T {
        self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns whether the SWD interface is currently connected to a target.
    pub fn is_connected(&self) -> bool {
        self.idcode.is_some()
    }

    /// Retrieves the IDCODE of the target device, if available.
    pub fn idcode(&self) -> Option<IdCode> {
        self.idcode
    }

    /// Sets the number of automatic retries after each SWD operation if a
    /// WAIT ack is received.
    pub fn set_wait_retries(&mut self, retries: u32) {
        self.wait_retries = retries;
    }

    /// Drives the target's nRESET line.  `asserted` true holds the target
    /// in reset.
    pub fn set_nreset(&mut self, asserted: bool) {
        trace!("Exec:  nRESET {}", if asserted { "assert" } else { "release" });
        self.transport.set_nreset(asserted);
    }

    /// Delays for at least the given number of microseconds, using the
    /// transport's clock.
    pub fn delay_us(&mut self, us: u32) {
        self.transport.delay_us(us);
    }

    /// Connects to the target.
    ///
    /// Performs the line reset and JTAG-to-SWD switch sequence, reads the
    /// IDCODE, clears any sticky errors, and powers up the debug domain.
    /// Family hooks run at the defined points: `before_connect()` ahead of
    /// the wire sequence, `unlock_sequence()` once the debug domain is
    /// powered.
    ///
    /// On failure the whole sequence is retried, up to 4 attempts in total.
    /// Between attempts any outstanding AP transaction is aborted and the
    /// target is pulsed through hardware reset.
    ///
    /// Arguments:
    /// - `family`: The family operations hooks for the target.  Use
    ///   [`crate::family::GenericFamily`] for a standard Cortex-M target.
    ///
    /// Returns:
    /// - `Ok(IdCode)`: if the connection succeeded, with the IDCODE read.
    /// - `Err(SwdError::ConnectFailed)`: once all attempts are exhausted.
    pub fn connect<F: FamilyOps<T>>(&mut self, family: &mut F) -> Result<IdCode, SwdError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            trace!("Exec:  Connect attempt {attempt}");

            match self.connect_attempt(family) {
                Ok(idcode) => {
                    debug!("OK:    Connected, IDCODE {idcode}");
                    return Ok(idcode);
                }
                Err(e) => {
                    warn!("Connect attempt {attempt} failed: {e}");
                    if attempt >= CONNECT_ATTEMPTS {
                        return Err(SwdError::ConnectFailed);
                    }
                    self.recover_for_retry();
                }
            }
        }
    }

    // One complete connection sequence.
    fn connect_attempt<F: FamilyOps<T>>(&mut self, family: &mut F) -> Result<IdCode, SwdError> {
        self.reset_internal_state();

        family.before_connect(self)?;

        // Line reset, switch from JTAG to SWD, then a second line reset to
        // leave the (now SWD) target in a known state
        self.transport.line_reset();
        self.transport.jtag_to_swd();
        self.transport.line_reset();
        self.transport.delay_us(100);

        // Read IDCODE to confirm SWD is now running.  Mandatory - the DP
        // does not respond to anything else until IDCODE has been read.
        let idcode = IdCode::from(self.do_op(SwdOp::DpRead(IdCodeRegister::ADDRESS), 0)?);
        trace!("Value: IDCODE: {idcode}");
        if !idcode.is_valid() {
            return Err(SwdError::OperationFailed(alloc::format!(
                "invalid idcode {idcode}"
            )));
        }

        // Clear any stale sticky errors from a previous session
        let abort = Abort::clear_all_errors();
        self.do_op(SwdOp::DpWrite(AbortRegister::ADDRESS), abort.into())?;

        // Set a known SELECT value - this also primes the shadow
        self.update_dp_select(Select::default())?;

        // Power up the debug and system domains
        let mut ctrl_stat = CtrlStat::default();
        ctrl_stat.set_cdbgpwrupreq(true);
        ctrl_stat.set_csyspwrupreq(true);
        self.do_op(SwdOp::DpWrite(CtrlStatRegister::ADDRESS), ctrl_stat.into())?;

        // Poll for the acknowledges, bounded
        let mut polls = 0;
        loop {
            let status = CtrlStat::from(self.do_op(SwdOp::DpRead(CtrlStatRegister::ADDRESS), 0)?);
            if status.cdbgpwrupack() && status.csyspwrupack() {
                debug!("OK:    Debug domain powered up {}", status.power_states());
                break;
            }
            polls += 1;
            if polls >= POWER_UP_POLLS {
                warn!("Power up not acknowledged: {}", status.power_states());
                return Err(SwdError::Timeout);
            }
            self.transport.delay_us(POWER_UP_POLL_US);
        }

        self.powered_up = true;
        self.idcode = Some(idcode);

        // Family-specific unlock, now that AP/memory access is possible
        family.unlock_sequence(self).inspect_err(|_| {
            self.powered_up = false;
            self.idcode = None;
        })?;

        Ok(idcode)
    }

    // Recovery between connection attempts: abort any outstanding AP
    // transaction, then pulse the target through hardware reset.
    fn recover_for_retry(&mut self) {
        let mut abort = Abort::clear_all_errors();
        abort.set_dapabort(true);
        // Best effort - the target may not be responding at all
        let _ = self.do_op(SwdOp::DpWrite(AbortRegister::ADDRESS), abort.into());

        self.transport.set_nreset(true);
        self.transport.delay_us(10_000);
        self.transport.set_nreset(false);
        self.transport.delay_us(10_000);
    }

    /// Disconnects from the target.
    ///
    /// Clears all internal state.  Does not touch the target - use
    /// [`crate::TargetController`] to restore the target's execution state
    /// first if required.
    pub fn disconnect(&mut self) {
        trace!("Exec:  Disconnect");
        self.reset_internal_state();
    }

    /// Read a Debug Port register.
    ///
    /// This function automatically handles setting the DP SELECT register if
    /// it is required.
    ///
    /// Arguments:
    /// - `reg`: The register to read, which must implement the `DpRegister`
    ///   trait.
    ///
    /// Returns:
    /// - `Ok(value)` if the register was read successfully.
    /// - `Err(SwdError)` if there was an error reading the register.
    pub fn read_dp_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + DpRegister,
        R::Value: From<u32>,
    {
        let op = SwdOp::DpRead(R::ADDRESS);
        self.check_and_update_dp_select(op)?;
        let raw_data = self.do_op(op, 0)?;
        Ok(R::from_raw(raw_data))
    }

    /// Write a Debug Port register.
    ///
    /// This function automatically handles setting the DP SELECT register if
    /// it is required.
    ///
    /// Arguments:
    /// - `reg`: The register to write, which must implement the `DpRegister`
    ///   trait.
    /// - `value`: The value to write.
    ///
    /// Returns:
    /// - `Ok(())` if the register was written successfully.
    /// - `Err(SwdError)` if there was an error writing the register.
    pub fn write_dp_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: WritableRegister + DpRegister,
        u32: From<R::Value>,
    {
        let op = SwdOp::DpWrite(R::ADDRESS);
        self.check_and_update_dp_select(op)?;
        let raw_data = R::to_raw(value);
        self.do_op(op, raw_data)?;

        // Must update the stored DP SELECT shadow if we wrote it
        if R::ADDRESS == SelectRegister::ADDRESS {
            self.dp_select = raw_data;
        }

        Ok(())
    }

    /// Read an Access Port register
    ///
    /// This function automatically handles setting the DP SELECT register if
    /// it is required.  It also reads the AP read result from the DP RDBUFF
    /// register automatically - AP reads are pipelined, so the access must
    /// be issued first and the result collected on the following transfer.
    ///
    /// Arguments:
    /// - `reg`: The register to read, which must implement the `ApRegister`
    ///   trait.
    ///
    /// Returns:
    /// - `Ok(value)` if the register was read successfully, where `value` is
    ///   the value read from the RDBUFF register.
    /// - `Err(SwdError)` if there was an error reading the register.
    pub fn read_ap_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + ApRegister,
        R::Value: From<u32>,
    {
        if !self.powered_up {
            return Err(SwdError::NotReady);
        }

        let op = SwdOp::ApRead(R::ADDRESS);
        self.check_and_update_dp_select(op)?;

        // Issue the access - the data returned belongs to a previous
        // transaction and is discarded
        let _ = self.do_op(op, 0)?;

        // Collect the result from RDBUFF.  RDBUFF never requires a DP SELECT
        // update.
        let raw_data = self.do_op(SwdOp::DpRead(RdBuffRegister::ADDRESS), 0)?;
        Ok(R::from_raw(raw_data))
    }

    /// Write an Access Port register
    ///
    /// This function automatically handles setting the DP SELECT register if
    /// it is required.
    ///
    /// Arguments:
    /// - `reg`: The register to write, which must implement the `ApRegister`
    ///   trait.
    /// - `value`: The value to write.
    ///
    /// Returns:
    /// - `Ok(())` if the register was written successfully.
    /// - `Err(SwdError)` if there was an error writing the register.
    pub fn write_ap_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: WritableRegister + ApRegister,
        u32: From<R::Value>,
    {
        if !self.powered_up {
            return Err(SwdError::NotReady);
        }

        let op = SwdOp::ApWrite(R::ADDRESS);
        self.check_and_update_dp_select(op)?;
        let raw_data = R::to_raw(value);
        self.do_op(op, raw_data)?;

        // Must update the stored CSW shadow if we wrote it
        if R::ADDRESS == CswRegister::ADDRESS {
            self.csw = raw_data;
        }

        Ok(())
    }

    /// Read a Debug Port register by raw address.  Use with caution.
    ///
    /// Arguments:
    /// - `register`: The raw register address (0x0, 0x4, 0x8, 0xC)
    ///
    /// Returns:
    /// - `Ok(u32)` if the register was read successfully
    /// - `Err(SwdError)` if there was an error reading the register.
    pub fn read_dp_register_raw(&mut self, register: u8) -> Result<u32, SwdError> {
        let op = SwdOp::DpRead(register);
        self.check_and_update_dp_select(op)?;
        self.do_op(op, 0)
    }

    /// Write a Debug Port register by raw address.  Use with caution.
    ///
    /// Arguments:
    /// - `register`: The raw register address (0x0, 0x4, 0x8, 0xC)
    /// - `value`: The raw 32-bit value to write
    ///
    /// Returns:
    /// - `Ok(())` if the register was written successfully.
    /// - `Err(SwdError)` if there was an error writing the register.
    pub fn write_dp_register_raw(&mut self, register: u8, value: u32) -> Result<(), SwdError> {
        let op = SwdOp::DpWrite(register);
        self.check_and_update_dp_select(op)?;
        self.do_op(op, value)?;

        if register == SelectRegister::ADDRESS {
            self.dp_select = value;
        }

        Ok(())
    }

    /// Call to check for errors in the Debug Port status.
    ///
    /// This function reads the DP CTRL/STAT register and checks for errors.
    ///
    /// Returns:
    /// - `Ok(())` if no errors are detected.
    /// - `Err(SwdError::DpError)` if any sticky errors are detected.
    pub fn check_dp_errors(&mut self) -> Result<(), SwdError> {
        let status = CtrlStat::from(self.read_dp_register_raw(CtrlStatRegister::ADDRESS)?);
        if status.has_errors() {
            warn!("DP status errors detected: {}", status.error_states());
            return Err(SwdError::DpError);
        }

        Ok(())
    }

    /// Call to clear any errors on the Debug Port.
    ///
    /// This function writes to the ABORT register to clear any error states
    /// in the Debug Port, such as STKERR, STKCMP, WDERR, and ORUNERR.
    ///
    /// Returns:
    /// - `Ok(())` if the errors were cleared successfully.
    /// - `Err(SwdError)` if there was an error writing to the ABORT register,
    ///   or if the errors could not be cleared.
    pub fn clear_errors(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Clear errors");
        let abort = Abort::clear_all_errors();
        self.write_dp_register(AbortRegister, abort)?;

        self.transport.delay_us(1_000);

        // Read the CtrlStat register to check they are now clear
        self.check_dp_errors()?;

        trace!("OK:    Clear errors");
        Ok(())
    }

    /// Reads a 32-bit value from the target's memory at the specified
    /// address, which must be 4-byte aligned.
    ///
    /// Arguments:
    /// - `addr`: The address in the target's memory to read from.
    ///
    /// Returns:
    /// - `Ok(u32)`: the value read.
    /// - `Err(SwdError)`: if there was an error reading from the target's
    ///   memory.
    pub fn read_mem(&mut self, addr: u32) -> Result<u32, SwdError> {
        if addr & 0x3 != 0 {
            return Err(SwdError::OperationFailed(alloc::format!(
                "unaligned word read 0x{addr:08X}"
            )));
        }

        self.ensure_csw(Csw::default())?;
        self.write_ap_register(TarRegister, addr.into())?;
        let data = self.read_ap_register(DrwRegister)?;
        Ok(data.into())
    }

    /// Writes a 32-bit value to the target's memory at the specified
    /// address, which must be 4-byte aligned.
    ///
    /// Arguments:
    /// - `addr`: The address in the target's memory to write to.
    /// - `data`: The value to write.
    ///
    /// Returns:
    /// - `Ok(())`: if the write was successful.
    /// - `Err(SwdError)`: if there was an error writing to the target's
    ///   memory.
    pub fn write_mem(&mut self, addr: u32, data: u32) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            return Err(SwdError::OperationFailed(alloc::format!(
                "unaligned word write 0x{addr:08X}"
            )));
        }

        self.ensure_csw(Csw::default())?;
        self.write_ap_register(TarRegister, addr.into())?;
        self.write_ap_register(DrwRegister, data.into())?;
        Ok(())
    }

    /// Reads a single byte from the target's memory.
    ///
    /// Arguments:
    /// - `addr`: The address in the target's memory to read from.
    ///
    /// Returns:
    /// - `Ok(u8)`: the byte read.
    /// - `Err(SwdError)`: if there was an error reading from the target's
    ///   memory.
    pub fn read_mem_u8(&mut self, addr: u32) -> Result<u8, SwdError> {
        self.ensure_csw(Csw::with_size_inc(Csw::SIZE_8BIT, Csw::ADDRINC_OFF))?;
        self.write_ap_register(TarRegister, addr.into())?;
        let data: u32 = self.read_ap_register(DrwRegister)?.into();

        // Sub-word data arrives in the byte lane selected by TAR[1:0]
        Ok((data >> ((addr & 0x3) * 8)) as u8)
    }

    /// Writes a single byte to the target's memory.
    ///
    /// Arguments:
    /// - `addr`: The address in the target's memory to write to.
    /// - `data`: The byte to write.
    ///
    /// Returns:
    /// - `Ok(())`: if the write was successful.
    /// - `Err(SwdError)`: if there was an error writing to the target's
    ///   memory.
    pub fn write_mem_u8(&mut self, addr: u32, data: u8) -> Result<(), SwdError> {
        self.ensure_csw(Csw::with_size_inc(Csw::SIZE_8BIT, Csw::ADDRINC_OFF))?;
        self.write_ap_register(TarRegister, addr.into())?;

        // Sub-word data goes in the byte lane selected by TAR[1:0]
        let lane = (data as u32) << ((addr & 0x3) * 8);
        self.write_ap_register(DrwRegister, lane.into())?;
        Ok(())
    }

    /// Reads a block of memory from the target device.
    ///
    /// Handles any address alignment and length: leading bytes to a 4-byte
    /// boundary are read individually, the aligned middle is read as
    /// auto-incrementing word blocks (chunked at the SWD 1KB wrap boundary),
    /// and any trailing bytes are read individually.
    ///
    /// Arguments:
    /// - `addr`: The starting address in the target's memory to read from.
    /// - `buf`: A mutable slice to store the read data.  The length of this
    ///   slice determines how many bytes will be read.
    ///
    /// Returns:
    /// - `Ok(())`: if the read was successful, with `buf` containing the
    ///   read data.
    /// - `Err(SwdError)`: if there was an error reading the memory.
    pub fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SwdError> {
        trace!("Exec:  Read memory 0x{addr:08X} len {}", buf.len());

        let mut offset = 0usize;
        let mut current = addr;

        // Byte prologue to 4-byte alignment
        while current & 0x3 != 0 && offset < buf.len() {
            buf[offset] = self.read_mem_u8(current)?;
            offset += 1;
            current += 1;
        }

        // Aligned word blocks
        let words = (buf.len() - offset) / 4;
        if words > 0 {
            self.ensure_csw(Csw::default())?;

            let mut remaining = words;
            while remaining > 0 {
                // Words before the 1KB wrap boundary
                let boundary_offset =
                    SWD_MEMORY_BOUNDARY - (current & (SWD_MEMORY_BOUNDARY - 1));
                let max_words = (boundary_offset / 4) as usize;
                let chunk_words = remaining.min(max_words);

                // Set TAR for this chunk
                self.write_ap_register(TarRegister, current.into())?;

                let mut chunk = vec![0u32; chunk_words];
                self.read_drw_block(&mut chunk)?;

                for word in chunk {
                    buf[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
                    offset += 4;
                }
                current += (chunk_words * 4) as u32;
                remaining -= chunk_words;
            }
        }

        // Byte epilogue
        while offset < buf.len() {
            buf[offset] = self.read_mem_u8(current)?;
            offset += 1;
            current += 1;
        }

        trace!("OK:    Read memory 0x{addr:08X}");
        Ok(())
    }

    /// Writes a block of memory to the target device.
    ///
    /// Handles any address alignment and length, in the same three phases as
    /// [`Self::read_memory()`].
    ///
    /// Arguments:
    /// - `addr`: The starting address in the target's memory to write to.
    /// - `data`: The data to write.
    ///
    /// Returns:
    /// - `Ok(())`: if the write was successful.
    /// - `Err(SwdError)`: if there was an error writing the memory.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        trace!("Exec:  Write memory 0x{addr:08X} len {}", data.len());

        let mut offset = 0usize;
        let mut current = addr;

        // Byte prologue to 4-byte alignment
        while current & 0x3 != 0 && offset < data.len() {
            self.write_mem_u8(current, data[offset])?;
            offset += 1;
            current += 1;
        }

        // Aligned word blocks
        let words = (data.len() - offset) / 4;
        if words > 0 {
            self.ensure_csw(Csw::default())?;

            let mut remaining = words;
            while remaining > 0 {
                let boundary_offset =
                    SWD_MEMORY_BOUNDARY - (current & (SWD_MEMORY_BOUNDARY - 1));
                let max_words = (boundary_offset / 4) as usize;
                let chunk_words = remaining.min(max_words);

                // Set TAR for this chunk
                self.write_ap_register(TarRegister, current.into())?;

                let mut chunk = Vec::with_capacity(chunk_words);
                for _ in 0..chunk_words {
                    let word = u32::from_le_bytes([
                        data[offset],
                        data[offset + 1],
                        data[offset + 2],
                        data[offset + 3],
                    ]);
                    chunk.push(word);
                    offset += 4;
                }
                self.write_drw_block(&chunk)?;

                current += (chunk_words * 4) as u32;
                remaining -= chunk_words;
            }
        }

        // Byte epilogue
        while offset < data.len() {
            self.write_mem_u8(current, data[offset])?;
            offset += 1;
            current += 1;
        }

        trace!("OK:    Write memory 0x{addr:08X}");
        Ok(())
    }
}

// Internal functions
impl<T: SwdTransport> SwdInterface<T> {
    // Lowest level operation which actually drives the transport.  Retries
    // on a WAIT ack, bounded by wait_retries.  A FAULT is never swallowed.
    fn do_op(&mut self, op: SwdOp, data: u32) -> Result<u32, SwdError> {
        let cmd = op.to_cmd();
        trace!("Exec:  {op} SWD: {cmd:#04X} {data:#010X}");

        let mut attempt = 0;
        let result = loop {
            let (ack, read_data) = self.transport.transfer(op, data);

            match ack {
                TransferAck::Ok => break Ok(read_data),
                TransferAck::Wait => trace!("Wait:  {op}"), // Retry
                TransferAck::Fault => break Err(SwdError::FaultAck),
                TransferAck::NoResponse(raw) => break Err(SwdError::NoAck(raw)),
            }

            attempt += 1;
            if attempt > self.wait_retries {
                break Err(SwdError::WaitAck);
            } else {
                trace!("Retry: {op} {}", attempt - 1);
            }
        };

        // Log result
        match &result {
            Ok(read_data) => trace!("OK:    {op} {read_data:#010X}"),
            Err(e) => debug!("Error: {op} {data:#010X}: {e:?}"),
        }

        result
    }

    fn check_and_update_dp_select(&mut self, op: SwdOp) -> Result<(), SwdError> {
        let check = match op {
            SwdOp::DpWrite(addr) => {
                // None of these DP registers require a DP SELECT update
                !matches!(
                    addr,
                    AbortRegister::ADDRESS | SelectRegister::ADDRESS | RdBuffRegister::ADDRESS
                )
            }
            SwdOp::DpRead(addr) => {
                // None of these DP registers require a DP SELECT update
                !matches!(
                    addr,
                    IdCodeRegister::ADDRESS | SelectRegister::ADDRESS | RdBuffRegister::ADDRESS
                )
            }
            SwdOp::ApWrite(_) | SwdOp::ApRead(_) => true,
        };

        if !check {
            // No DP SELECT update required
            return Ok(());
        }

        // Check whether the DP SELECT register value (that we last wrote, as
        // reading is deprecated) needs updating for this operation.  An
        // invalid shadow always forces a write.
        let shadow_valid = self.dp_select != SHADOW_INVALID;
        if !shadow_valid || !op.check_dp_select(Select::from(self.dp_select)) {
            let mut select = if shadow_valid {
                Select::from(self.dp_select)
            } else {
                Select::default()
            };

            match op {
                SwdOp::DpRead(addr) | SwdOp::DpWrite(addr) => {
                    select.set_dpbanksel_from_addr(addr);
                }
                SwdOp::ApRead(addr) | SwdOp::ApWrite(addr) => {
                    select.set_apbanksel_from_addr(addr);
                }
            }

            self.update_dp_select(select)?;
        }

        Ok(())
    }

    // Writes the DP SELECT register, updating the shadow only on success.
    fn update_dp_select(&mut self, select: Select) -> Result<(), SwdError> {
        trace!("Exec:  Update DP SELECT {select}");
        self.do_op(SwdOp::DpWrite(SelectRegister::ADDRESS), select.into())?;
        self.dp_select = select.into();
        Ok(())
    }

    // Writes the MEM-AP CSW register if its shadow does not already hold
    // the requested value.  Shadow updated only on success.
    fn ensure_csw(&mut self, csw: Csw) -> Result<(), SwdError> {
        let raw: u32 = csw.into();
        if self.csw == raw {
            return Ok(());
        }

        if !self.powered_up {
            return Err(SwdError::NotReady);
        }

        let op = SwdOp::ApWrite(CswRegister::ADDRESS);
        self.check_and_update_dp_select(op)?;
        self.do_op(op, raw)?;
        self.csw = raw;
        Ok(())
    }

    // Reads the DRW register buf.len() times with auto-increment.  Assumes
    // TAR and CSW are set.  AP reads are pipelined: the first read primes
    // the pipeline, each subsequent read returns the previous result, and
    // the final result is collected from RDBUFF without triggering another
    // memory access.
    fn read_drw_block(&mut self, buf: &mut [u32]) -> Result<(), SwdError> {
        let count = buf.len();
        if count == 0 {
            return Ok(());
        }
        trace!("Exec:  Read DRW block {count}");

        let op = SwdOp::ApRead(DrwRegister::ADDRESS);
        self.check_and_update_dp_select(op)?;

        // Prime the pipeline - this result belongs to a previous transaction
        let _ = self.do_op(op, 0)?;

        for item in buf.iter_mut().take(count - 1) {
            *item = self.do_op(op, 0)?;
        }

        // Final value from RDBUFF - does not trigger another memory access
        buf[count - 1] = self.do_op(SwdOp::DpRead(RdBuffRegister::ADDRESS), 0)?;

        self.check_dp_errors()
    }

    // Writes the DRW register once per value with auto-increment.  Assumes
    // TAR and CSW are set.
    fn write_drw_block(&mut self, buf: &[u32]) -> Result<(), SwdError> {
        if buf.is_empty() {
            return Ok(());
        }
        trace!("Exec:  Write DRW block {}", buf.len());

        let op = SwdOp::ApWrite(DrwRegister::ADDRESS);
        self.check_and_update_dp_select(op)?;

        for &value in buf {
            self.do_op(op, value)?;
        }

        self.check_dp_errors()
    }
}
