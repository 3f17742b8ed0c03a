// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash programming orchestrator
//!
//! [`FlashManager`] sequences a programming session: resetting the target
//! into a halted state, downloading the right algorithm for each address,
//! pairing `init`/`uninit` calls around function kinds, and chunking data
//! through the algorithm's scratch buffer.
//!
//! A session is `open()` → any number of erase/program operations →
//! `close()`.  The first failure latches the session into an error state;
//! subsequent operations fail fast until the session is closed.

use alloc::vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::family::FamilyOps;
use crate::flash::FlashError;
use crate::flash::algo::{FlashAlgorithm, FlashRegion};
use crate::flash::runtime::{ReturnConvention, SyscallFrame, exec_syscall, validate_return};
use crate::target::{TargetController, TargetState};
use crate::transport::SwdTransport;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashState {
    Closed,
    Open,
    Error,
}

/// The algorithm function kinds, as passed to `Init`/`UnInit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashFunc {
    Nop,
    Erase,
    Program,
    Verify,
}

impl FlashFunc {
    // CMSIS function codes
    fn code(&self) -> u32 {
        match self {
            FlashFunc::Nop => 0,
            FlashFunc::Erase => 1,
            FlashFunc::Program => 2,
            FlashFunc::Verify => 3,
        }
    }
}

/// Flash programming orchestrator
///
/// Borrows the [`TargetController`] for the duration of the session and a
/// region table supplied as immutable configuration.
///
/// The active-function latch pairs `init`/`uninit` around each function
/// kind: switching from programming to erasing calls `uninit(Program)`
/// then `init(Erase)`.  Algorithms flagged single-init instead get one
/// `init` at first use and one `uninit` at session close or algorithm
/// switch, with no calls in between.
#[derive(Debug)]
pub struct FlashManager<'a, T: SwdTransport, F: FamilyOps<T>> {
    ctl: &'a mut TargetController<T, F>,
    regions: &'a [FlashRegion<'a>],
    state: FlashState,
    resident: Option<&'a FlashAlgorithm>,
    current_region: Option<&'a FlashRegion<'a>>,
    active_func: FlashFunc,
    init_done: bool,
    verify_on_write: bool,
    auto_resume: bool,
}

impl<'a, T: SwdTransport, F: FamilyOps<T>> FlashManager<'a, T, F> {
    /// Creates a new orchestrator over the given controller and region
    /// table.
    ///
    /// Arguments:
    /// - `ctl`: The target controller, borrowed for the session.
    /// - `regions`: The flash region table.  Ordered, non-overlapping, at
    ///   most one entry flagged default.
    pub fn new(ctl: &'a mut TargetController<T, F>, regions: &'a [FlashRegion<'a>]) -> Self {
        Self {
            ctl,
            regions,
            state: FlashState::Closed,
            resident: None,
            current_region: None,
            active_func: FlashFunc::Nop,
            init_done: false,
            verify_on_write: true,
            auto_resume: true,
        }
    }

    /// Sets whether every programmed chunk is verified, via the algorithm's
    /// `verify` routine or a read-back compare.  Defaults to on.
    pub fn set_verify_on_write(&mut self, verify: bool) {
        self.verify_on_write = verify;
    }

    /// Sets whether [`Self::close()`] resets the target into normal
    /// execution (the default) or into a halted state.
    pub fn set_auto_resume(&mut self, auto_resume: bool) {
        self.auto_resume = auto_resume;
    }

    /// Whether an operation sequence is in progress.
    pub fn busy(&self) -> bool {
        self.state == FlashState::Open && self.active_func != FlashFunc::Nop
    }

    /// Opens a programming session: resets the target into a halted state
    /// ready for algorithm execution.
    ///
    /// Returns:
    /// - `Ok(())`: session open.  Idempotent if already open.
    /// - `Err(FlashError)`: if the target could not be prepared, or a
    ///   previous failure has not been cleared with [`Self::close()`].
    pub fn open(&mut self) -> Result<(), FlashError> {
        match self.state {
            FlashState::Open => return Ok(()),
            FlashState::Error => return Err(FlashError::NotOpen),
            FlashState::Closed => {}
        }

        debug!("Exec:  Flash open");
        self.ctl.set_state(TargetState::ResetProgram)?;

        if let Some(default) = self.regions.iter().find(|r| r.is_default) {
            trace!("Value: Default flash region {default}");
        }

        self.state = FlashState::Open;
        Ok(())
    }

    /// Closes the session: flushes the active function, resets the target
    /// per the auto-resume policy, and runs the family post-flash hook.
    ///
    /// Always leaves the session closed, including from the error state
    /// (in which case the target is not touched - its state is unknown).
    pub fn close(&mut self) -> Result<(), FlashError> {
        debug!("Exec:  Flash close");

        if self.state == FlashState::Error {
            self.reset_session();
            return Ok(());
        }
        if self.state == FlashState::Closed {
            return Ok(());
        }

        let result = self.close_inner();
        self.reset_session();
        result
    }

    fn close_inner(&mut self) -> Result<(), FlashError> {
        if self.resident.is_some() {
            self.func_start(FlashFunc::Nop)?;
        }

        if self.auto_resume {
            self.ctl.set_state(TargetState::ResetRun)?;
        } else {
            // A plain halt would leave the core parked at the algorithm's
            // exit breakpoint in the stale blob - reset into halt instead
            self.ctl.set_state(TargetState::ResetProgram)?;
        }
        self.ctl.set_state(TargetState::PostFlashReset)?;
        Ok(())
    }

    fn reset_session(&mut self) {
        self.state = FlashState::Closed;
        self.resident = None;
        self.current_region = None;
        self.active_func = FlashFunc::Nop;
        self.init_done = false;
    }

    /// Selects the flash region owning the given address, downloading its
    /// algorithm if it is not already resident.
    ///
    /// At most one algorithm is resident in target RAM at a time: switching
    /// algorithms closes out the previous one's active function first.
    ///
    /// Arguments:
    /// - `addr`: Any address within the desired region (the default region
    ///   catches addresses outside every table entry).
    ///
    /// Returns:
    /// - `Ok(())`: region selected, algorithm resident.
    /// - `Err(FlashError)`: lookup, download or close-out failure.
    pub fn set_region(&mut self, addr: u32) -> Result<(), FlashError> {
        self.guard_open()?;
        self.set_region_inner(addr)
            .inspect_err(|_| self.state = FlashState::Error)
    }

    fn set_region_inner(&mut self, addr: u32) -> Result<(), FlashError> {
        let region = self.region_for(addr).ok_or(FlashError::AlgorithmMissing)?;
        let algo = region.algo.ok_or(FlashError::AlgorithmMissing)?;

        let same = self
            .resident
            .is_some_and(|resident| core::ptr::eq(resident, algo));
        if !same {
            // Close out the outgoing algorithm before evicting it
            if self.resident.is_some() {
                self.func_start(FlashFunc::Nop)?;
            }

            debug!("Exec:  Download flash algorithm {algo}");
            self.ctl.iface().write_memory(algo.load_address, &algo.code)?;

            // Read back and compare - a blob that did not stick will fault
            // or corrupt the target later, fail early instead
            let mut readback = vec![0u8; algo.code.len()];
            self.ctl.iface().read_memory(algo.load_address, &mut readback)?;
            if readback != algo.code {
                warn!("Flash algorithm readback mismatch");
                return Err(FlashError::DownloadFailed);
            }

            self.resident = Some(algo);
            self.active_func = FlashFunc::Nop;
            self.init_done = false;
        }

        self.current_region = Some(region);
        Ok(())
    }

    /// Programs data at the given address.
    ///
    /// Chunks the data through the algorithm's scratch buffer, invoking
    /// `program_page` per chunk.  With verify-on-write set, each chunk is
    /// verified after programming - via the algorithm's `verify` routine if
    /// it has one, otherwise by reading back and comparing.
    ///
    /// Arguments:
    /// - `addr`: The flash address to program.
    /// - `data`: The data to program.
    ///
    /// Returns:
    /// - `Ok(())`: all chunks programmed (and verified).
    /// - `Err(FlashError)`: the first failure; the session latches into
    ///   the error state.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.guard_open()?;
        self.program_inner(addr, data)
            .inspect_err(|_| self.state = FlashState::Error)
    }

    fn program_inner(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let algo = self.resident.ok_or(FlashError::AlgorithmMissing)?;
        trace!("Exec:  Program 0x{addr:08X} len {}", data.len());

        self.ctl.validate_image(addr, data)?;

        let mut chunk_addr = addr;
        for chunk in data.chunks(algo.buffer_size as usize) {
            self.func_start(FlashFunc::Program)?;

            self.ctl.iface().write_memory(algo.buffer_address, chunk)?;
            self.run_routine(
                algo,
                algo.program_page,
                [chunk_addr, chunk.len() as u32, algo.buffer_address, 0],
                ReturnConvention::Boolean,
                FlashError::ProgramFailed,
            )?;

            if self.verify_on_write {
                self.verify_chunk(algo, chunk_addr, chunk)?;
            }

            chunk_addr += chunk.len() as u32;
        }

        trace!("OK:    Program 0x{addr:08X}");
        Ok(())
    }

    // Verifies one programmed chunk, still sitting in the scratch buffer.
    fn verify_chunk(
        &mut self,
        algo: &'a FlashAlgorithm,
        addr: u32,
        chunk: &[u8],
    ) -> Result<(), FlashError> {
        if let Some(verify) = algo.verify {
            self.func_start(FlashFunc::Verify)?;

            let convention = if algo.flags.verify_returns_pointer {
                ReturnConvention::Pointer
            } else {
                ReturnConvention::Boolean
            };
            self.run_routine(
                algo,
                verify,
                [addr, chunk.len() as u32, algo.buffer_address, 0],
                convention,
                FlashError::VerifyMismatch,
            )
        } else {
            let mut readback = vec![0u8; chunk.len()];
            self.ctl.iface().read_memory(addr, &mut readback)?;
            if readback != chunk {
                warn!("Verify mismatch at 0x{addr:08X}");
                return Err(FlashError::VerifyMismatch);
            }
            Ok(())
        }
    }

    /// Erases the sector containing the given address, which must be the
    /// sector's start address.
    ///
    /// Sector sizes are not uniform across a device - the algorithm's
    /// sector table is scanned from the highest start address at or below
    /// the target address.
    ///
    /// Arguments:
    /// - `addr`: The sector start address.
    ///
    /// Returns:
    /// - `Ok(())`: sector erased.
    /// - `Err(FlashError::UnalignedErase)`: if `addr` is not a sector
    ///   start.
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError> {
        self.guard_open()?;
        self.erase_sector_inner(addr)
            .inspect_err(|_| self.state = FlashState::Error)
    }

    fn erase_sector_inner(&mut self, addr: u32) -> Result<(), FlashError> {
        let algo = self.resident.ok_or(FlashError::AlgorithmMissing)?;

        let Some(info) = algo.sector_info(addr) else {
            return Err(FlashError::UnalignedErase);
        };
        if (addr - info.start) % info.size != 0 {
            warn!(
                "Erase address 0x{addr:08X} not aligned to 0x{:X} sector",
                info.size
            );
            return Err(FlashError::UnalignedErase);
        }

        trace!("Exec:  Erase sector 0x{addr:08X}");
        self.func_start(FlashFunc::Erase)?;
        self.run_routine(
            algo,
            algo.erase_sector,
            [addr, 0, 0, 0],
            ReturnConvention::Boolean,
            FlashError::EraseFailed,
        )
    }

    /// Erases the whole chip: every region in the table, skipping regions
    /// whose algorithm is flagged skip-chip-erase (aliased or mirrored
    /// mappings erased through their primary region).
    pub fn erase_chip(&mut self) -> Result<(), FlashError> {
        self.guard_open()?;
        self.erase_chip_inner()
            .inspect_err(|_| self.state = FlashState::Error)
    }

    fn erase_chip_inner(&mut self) -> Result<(), FlashError> {
        trace!("Exec:  Erase chip");

        for region in self.regions {
            let Some(algo) = region.algo else {
                continue;
            };
            if algo.flags.skip_chip_erase {
                trace!("Value: Skip chip erase for {region}");
                continue;
            }
            let Some(entry) = algo.erase_chip else {
                warn!("No chip erase routine for {region}");
                continue;
            };

            self.set_region_inner(region.start)?;
            self.func_start(FlashFunc::Erase)?;
            self.run_routine(
                algo,
                entry,
                [0, 0, 0, 0],
                ReturnConvention::Boolean,
                FlashError::EraseFailed,
            )?;
        }

        trace!("OK:    Erase chip");
        Ok(())
    }

    /// The minimum programming unit for the region owning the given
    /// address, or 0 if no algorithm covers it.
    pub fn program_page_min_size(&self, addr: u32) -> u32 {
        self.region_for(addr)
            .and_then(|r| r.algo)
            .map(|a| a.page_size)
            .unwrap_or(0)
    }

    /// The erase sector size at the given address, or 0 if no algorithm
    /// covers it.
    pub fn erase_sector_size(&self, addr: u32) -> u32 {
        self.region_for(addr)
            .and_then(|r| r.algo)
            .and_then(|a| a.sector_size(addr))
            .unwrap_or(0)
    }

    fn guard_open(&self) -> Result<(), FlashError> {
        if self.state != FlashState::Open {
            return Err(FlashError::NotOpen);
        }
        Ok(())
    }

    fn region_for(&self, addr: u32) -> Option<&'a FlashRegion<'a>> {
        self.regions
            .iter()
            .find(|r| r.contains(addr))
            .or_else(|| self.regions.iter().find(|r| r.is_default))
    }

    // Transitions the active-function latch, pairing uninit/init calls
    // around the change.  Single-init algorithms only see the true start
    // and stop edges.
    fn func_start(&mut self, func: FlashFunc) -> Result<(), FlashError> {
        if self.active_func == func {
            return Ok(());
        }
        let algo = self.resident.ok_or(FlashError::AlgorithmMissing)?;
        let region_start = self.current_region.map(|r| r.start).unwrap_or(0);

        trace!("Exec:  Flash func {:?} -> {func:?}", self.active_func);

        if algo.flags.single_init {
            if func == FlashFunc::Nop {
                // True stop edge - session close or algorithm switch
                if self.init_done {
                    self.call_uninit(algo, self.active_func)?;
                    self.init_done = false;
                }
            } else if !self.init_done {
                self.call_init(algo, region_start, func)?;
                self.init_done = true;
            }
        } else {
            if self.active_func != FlashFunc::Nop {
                self.call_uninit(algo, self.active_func)?;
            }
            if func != FlashFunc::Nop {
                self.call_init(algo, region_start, func)?;
            }
        }

        self.active_func = func;
        Ok(())
    }

    fn call_init(
        &mut self,
        algo: &'a FlashAlgorithm,
        region_start: u32,
        func: FlashFunc,
    ) -> Result<(), FlashError> {
        let Some(entry) = algo.init else {
            return Ok(());
        };
        self.run_routine(
            algo,
            entry,
            [region_start, 0, func.code(), 0],
            ReturnConvention::Boolean,
            FlashError::InitFailed,
        )
    }

    fn call_uninit(&mut self, algo: &'a FlashAlgorithm, func: FlashFunc) -> Result<(), FlashError> {
        let Some(entry) = algo.uninit else {
            return Ok(());
        };
        self.run_routine(
            algo,
            entry,
            [func.code(), 0, 0, 0],
            ReturnConvention::Boolean,
            FlashError::UninitFailed,
        )
    }

    fn run_routine(
        &mut self,
        algo: &FlashAlgorithm,
        entry: u32,
        args: [u32; 4],
        convention: ReturnConvention,
        failure: FlashError,
    ) -> Result<(), FlashError> {
        let frame = SyscallFrame::new(
            entry,
            args,
            algo.static_base,
            algo.stack_pointer,
            algo.exit_breakpoint,
        );

        let r0 = exec_syscall(self.ctl, &frame)?;
        if !validate_return(convention, &frame, r0) {
            warn!("Flash routine 0x{entry:08X} failed: r0 = {r0:#010X}");
            return Err(failure);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::GenericFamily;
    use crate::flash::algo::{AlgoFlags, SectorInfo};
    use crate::interface::SwdInterface;
    use crate::target::ResetPolicy;
    use crate::testutil::{AlgoEntryKind, FakeTarget};
    use alloc::vec::Vec;

    const LOAD: u32 = 0x2000_0000;
    const INIT: u32 = LOAD;
    const UNINIT: u32 = LOAD + 4;
    const ERASE_CHIP: u32 = LOAD + 8;
    const ERASE_SECTOR: u32 = LOAD + 12;
    const PROGRAM_PAGE: u32 = LOAD + 16;
    const VERIFY: u32 = LOAD + 20;
    const BREAKPOINT: u32 = LOAD + 24;
    const BUFFER: u32 = 0x2000_0400;

    fn test_algo(flags: AlgoFlags, with_verify: bool) -> FlashAlgorithm {
        FlashAlgorithm {
            name: "algo-a",
            load_address: LOAD,
            code: (0..32u8).collect(),
            init: Some(INIT),
            uninit: Some(UNINIT),
            erase_chip: Some(ERASE_CHIP),
            erase_sector: ERASE_SECTOR,
            program_page: PROGRAM_PAGE,
            verify: if with_verify { Some(VERIFY) } else { None },
            static_base: LOAD + 0x20,
            stack_pointer: 0x2000_1000,
            exit_breakpoint: BREAKPOINT,
            buffer_address: BUFFER,
            buffer_size: 0x100,
            page_size: 0x100,
            sectors: alloc::vec![
                SectorInfo {
                    start: 0x0000_0000,
                    size: 0x400,
                },
            ],
            flags,
        }
    }

    fn wired_target() -> FakeTarget {
        let mut target = FakeTarget::new();
        target.algo_map.insert(INIT, AlgoEntryKind::Init);
        target.algo_map.insert(UNINIT, AlgoEntryKind::Uninit);
        target.algo_map.insert(ERASE_CHIP, AlgoEntryKind::EraseChip);
        target
            .algo_map
            .insert(ERASE_SECTOR, AlgoEntryKind::EraseSector);
        target
            .algo_map
            .insert(PROGRAM_PAGE, AlgoEntryKind::ProgramPage);
        target
            .algo_map
            .insert(VERIFY, AlgoEntryKind::Verify { pointer: false });
        target
    }

    fn controller(target: FakeTarget) -> TargetController<FakeTarget, GenericFamily> {
        TargetController::new(SwdInterface::new(target), GenericFamily, ResetPolicy::Hardware)
    }

    fn calls_to(ctl: &mut TargetController<FakeTarget, GenericFamily>, entry: u32) -> Vec<[u32; 4]> {
        ctl.iface()
            .transport_mut()
            .invocations
            .iter()
            .filter(|(pc, _)| *pc == entry)
            .map(|(_, args)| *args)
            .collect()
    }

    #[test]
    fn program_one_page_with_readback_verify() {
        let algo = test_algo(AlgoFlags::default(), false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x1000,
            algo: Some(&algo),
            is_default: true,
        }];
        let mut ctl = controller(wired_target());

        {
            let mut flash = FlashManager::new(&mut ctl, &regions);
            flash.open().unwrap();
            flash.set_region(0x100).unwrap();
            flash.program(0x100, &[0xAA; 16]).unwrap();
            flash.close().unwrap();
        }

        // Exactly one program_page syscall, with (addr, len, buffer)
        let calls = calls_to(&mut ctl, PROGRAM_PAGE);
        assert_eq!(calls, alloc::vec![[0x100, 16, BUFFER, 0]]);

        // The chunk went through the scratch buffer and then to flash
        let target = ctl.iface().transport_mut();
        for i in 0..16 {
            assert_eq!(target.read_byte(BUFFER + i), 0xAA);
            assert_eq!(target.read_byte(0x100 + i), 0xAA);
        }
    }

    #[test]
    fn set_region_downloads_algorithm() {
        let algo = test_algo(AlgoFlags::default(), false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x1000,
            algo: Some(&algo),
            is_default: true,
        }];
        let mut ctl = controller(wired_target());

        {
            let mut flash = FlashManager::new(&mut ctl, &regions);
            flash.open().unwrap();
            flash.set_region(0).unwrap();

            // Second select of the same region must not re-download
            flash.set_region(0x800).unwrap();
        }

        let target = ctl.iface().transport_mut();
        for (i, byte) in algo.code.iter().enumerate() {
            assert_eq!(target.read_byte(LOAD + i as u32), *byte);
        }
    }

    #[test]
    fn verify_routine_used_when_present() {
        let mut flags = AlgoFlags::default();
        flags.verify_returns_pointer = true;
        let algo = test_algo(flags, true);
        let regions = [FlashRegion {
            start: 0,
            end: 0x1000,
            algo: Some(&algo),
            is_default: true,
        }];

        let mut target = wired_target();
        target
            .algo_map
            .insert(VERIFY, AlgoEntryKind::Verify { pointer: true });
        let mut ctl = controller(target);

        {
            let mut flash = FlashManager::new(&mut ctl, &regions);
            flash.open().unwrap();
            flash.set_region(0x100).unwrap();
            flash.program(0x100, &[0x55; 16]).unwrap();
        }

        assert_eq!(calls_to(&mut ctl, VERIFY), alloc::vec![[0x100, 16, BUFFER, 0]]);
    }

    #[test]
    fn function_switch_pairs_uninit_init() {
        let algo = test_algo(AlgoFlags::default(), false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x10_0000,
            algo: Some(&algo),
            is_default: true,
        }];
        let mut ctl = controller(wired_target());

        {
            let mut flash = FlashManager::new(&mut ctl, &regions);
            flash.set_verify_on_write(false);
            flash.open().unwrap();
            flash.set_region(0).unwrap();

            flash.program(0x000, &[1; 16]).unwrap();
            flash.erase_sector(0x400).unwrap();
            flash.program(0x800, &[2; 16]).unwrap();
            flash.close().unwrap();
        }

        // Program, Erase, Program: three inits, and an uninit per switch
        // plus the close
        let inits = calls_to(&mut ctl, INIT);
        assert_eq!(inits.len(), 3);
        assert_eq!(inits[0][2], FlashFunc::Program.code());
        assert_eq!(inits[1][2], FlashFunc::Erase.code());
        assert_eq!(inits[2][2], FlashFunc::Program.code());

        let uninits = calls_to(&mut ctl, UNINIT);
        assert_eq!(uninits.len(), 3);
    }

    #[test]
    fn single_init_algorithm_inits_once() {
        let mut flags = AlgoFlags::default();
        flags.single_init = true;
        let algo = test_algo(flags, false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x10_0000,
            algo: Some(&algo),
            is_default: true,
        }];
        let mut ctl = controller(wired_target());

        {
            let mut flash = FlashManager::new(&mut ctl, &regions);
            flash.set_verify_on_write(false);
            flash.open().unwrap();
            flash.set_region(0).unwrap();

            flash.program(0x000, &[1; 16]).unwrap();
            flash.erase_sector(0x400).unwrap();
            flash.program(0x800, &[2; 16]).unwrap();

            // Init once at first use, no uninit between functions
            assert_eq!(calls_to(flash.ctl, INIT).len(), 1);
            assert_eq!(calls_to(flash.ctl, UNINIT).len(), 0);

            flash.close().unwrap();
        }

        // Uninit exactly once, at close
        assert_eq!(calls_to(&mut ctl, INIT).len(), 1);
        assert_eq!(calls_to(&mut ctl, UNINIT).len(), 1);
    }

    #[test]
    fn close_without_resume_resets_into_halt() {
        let algo = test_algo(AlgoFlags::default(), false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x1000,
            algo: Some(&algo),
            is_default: true,
        }];
        let mut ctl = controller(wired_target());

        {
            let mut flash = FlashManager::new(&mut ctl, &regions);
            flash.set_auto_resume(false);
            flash.open().unwrap();
            flash.set_region(0x100).unwrap();
            flash.program(0x100, &[0x5A; 16]).unwrap();
            flash.close().unwrap();
        }

        // One reset opening the session and a second closing it: the core
        // ends up halted at its reset vector, not at the algorithm's exit
        // breakpoint
        assert!(ctl.halted().unwrap());
        assert_eq!(ctl.iface().transport_mut().nreset_pulses, 2);
    }

    #[test]
    fn erase_chip_skips_flagged_regions() {
        let algo_a = test_algo(AlgoFlags::default(), false);

        let mut flags_b = AlgoFlags::default();
        flags_b.skip_chip_erase = true;
        let mut algo_b = test_algo(flags_b, false);
        algo_b.name = "algo-b";
        algo_b.load_address = 0x2000_2000;
        // Same entry layout at the alternate load address
        algo_b.init = Some(0x2000_2000);
        algo_b.uninit = Some(0x2000_2004);
        algo_b.erase_chip = Some(0x2000_2008);
        algo_b.erase_sector = 0x2000_200C;
        algo_b.program_page = 0x2000_2010;
        algo_b.exit_breakpoint = 0x2000_2018;

        let regions = [
            FlashRegion {
                start: 0,
                end: 0x1000,
                algo: Some(&algo_a),
                is_default: true,
            },
            FlashRegion {
                start: 0x1000,
                end: 0x2000,
                algo: Some(&algo_b),
                is_default: false,
            },
        ];

        let mut target = wired_target();
        target.algo_map.insert(0x2000_2000, AlgoEntryKind::Init);
        target.algo_map.insert(0x2000_2004, AlgoEntryKind::Uninit);
        target.algo_map.insert(0x2000_2008, AlgoEntryKind::EraseChip);
        let mut ctl = controller(target);

        {
            let mut flash = FlashManager::new(&mut ctl, &regions);
            flash.open().unwrap();
            flash.erase_chip().unwrap();
        }

        // Only region 1's algorithm performed a chip erase
        assert_eq!(calls_to(&mut ctl, ERASE_CHIP).len(), 1);
        assert_eq!(calls_to(&mut ctl, 0x2000_2008).len(), 0);
    }

    #[test]
    fn unaligned_erase_rejected() {
        let algo = test_algo(AlgoFlags::default(), false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x10_0000,
            algo: Some(&algo),
            is_default: true,
        }];
        let mut ctl = controller(wired_target());

        let mut flash = FlashManager::new(&mut ctl, &regions);
        flash.open().unwrap();
        flash.set_region(0).unwrap();

        assert_eq!(
            flash.erase_sector(0x0200),
            Err(FlashError::UnalignedErase)
        );
    }

    #[test]
    fn sector_and_page_size_queries() {
        let mut algo = test_algo(AlgoFlags::default(), false);
        algo.sectors = alloc::vec![
            SectorInfo {
                start: 0x0800_0000,
                size: 0x400,
            },
            SectorInfo {
                start: 0x0801_0000,
                size: 0x800,
            },
        ];
        let regions = [FlashRegion {
            start: 0x0800_0000,
            end: 0x0802_0000,
            algo: Some(&algo),
            is_default: false,
        }];
        let mut ctl = controller(wired_target());
        let flash = FlashManager::new(&mut ctl, &regions);

        assert_eq!(flash.erase_sector_size(0x0800_0800), 0x400);
        assert_eq!(flash.erase_sector_size(0x0801_2000), 0x800);
        assert_eq!(flash.program_page_min_size(0x0800_0000), 0x100);
        assert_eq!(flash.erase_sector_size(0x0900_0000), 0);
    }

    #[test]
    fn operations_require_open_session() {
        let algo = test_algo(AlgoFlags::default(), false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x1000,
            algo: Some(&algo),
            is_default: true,
        }];
        let mut ctl = controller(wired_target());
        let mut flash = FlashManager::new(&mut ctl, &regions);

        assert_eq!(flash.program(0, &[0; 4]), Err(FlashError::NotOpen));
        assert_eq!(flash.erase_chip(), Err(FlashError::NotOpen));
        assert_eq!(flash.set_region(0), Err(FlashError::NotOpen));
    }

    #[test]
    fn failure_latches_error_state() {
        let algo = test_algo(AlgoFlags::default(), false);
        let regions = [FlashRegion {
            start: 0,
            end: 0x1000,
            algo: Some(&algo),
            is_default: true,
        }];

        let mut target = wired_target();
        // Programming reports failure in r0
        target.algo_map.insert(PROGRAM_PAGE, AlgoEntryKind::Fail(1));
        let mut ctl = controller(target);

        let mut flash = FlashManager::new(&mut ctl, &regions);
        flash.set_verify_on_write(false);
        flash.open().unwrap();
        flash.set_region(0x100).unwrap();

        assert_eq!(
            flash.program(0x100, &[0xAA; 16]),
            Err(FlashError::ProgramFailed)
        );

        // Latched - everything fails fast until close
        assert_eq!(flash.erase_chip(), Err(FlashError::NotOpen));
        assert_eq!(flash.open(), Err(FlashError::NotOpen));
        flash.close().unwrap();
    }
}
