// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Test transports
//!
//! [`ScriptedTransport`] replays a canned sequence of ACK/data responses,
//! for exercising the transfer layer's retry and error paths.
//!
//! [`FakeTarget`] emulates enough of a Cortex-M target behind a MEM-AP to
//! exercise everything above the wire: sparse memory, TAR auto-increment
//! with the 1KB page wrap, the pipelined AP read discipline, the core
//! debug registers, and flash algorithm routines that "execute" when the
//! core is resumed at their entry point.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use daplite_core::arm::Cortex;
use daplite_core::arm::dp::{CtrlStatRegister, IdCodeRegister, SelectRegister};
use daplite_core::arm::map::{CswRegister, DrwRegister, TarRegister};
use daplite_core::arm::register::RegisterDescriptor;
use daplite_core::arm::scs::{Aircr, Dcrdr, Dcrsr, Demcr, Dhcsr};

use crate::transport::{SwdOp, SwdTransport, TransferAck};

/// Transport returning a scripted sequence of responses.  Once the script
/// is exhausted, every transfer succeeds with data 0.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    responses: VecDeque<(TransferAck, u32)>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ack(&mut self, ack: TransferAck) {
        self.responses.push_back((ack, 0));
    }

    pub fn push_response(&mut self, ack: TransferAck, data: u32) {
        self.responses.push_back((ack, data));
    }
}

impl SwdTransport for ScriptedTransport {
    fn transfer(&mut self, _op: SwdOp, _data: u32) -> (TransferAck, u32) {
        self.responses.pop_front().unwrap_or((TransferAck::Ok, 0))
    }

    fn line_reset(&mut self) {}
    fn jtag_to_swd(&mut self) {}
    fn set_nreset(&mut self, _asserted: bool) {}
    fn delay_us(&mut self, _us: u32) {}
}

/// What a flash algorithm entry point does when the fake core is resumed
/// at it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AlgoEntryKind {
    /// Returns success
    Init,
    /// Returns success
    Uninit,
    /// Returns success
    EraseSector,
    /// Returns success
    EraseChip,
    /// Copies r1 bytes from the buffer at r2 to the address at r0
    ProgramPage,
    /// Compares r1 bytes at r0 against the buffer at r2, reporting in the
    /// boolean or pointer convention
    Verify { pointer: bool },
    /// Returns the given r0 value
    Fail(u32),
}

/// Emulated SWD target
///
/// Behavioural quirks are deliberate, to catch protocol mistakes above:
/// - AP reads are pipelined - each read returns the data of the previous
///   access, so code skipping the dummy-read discipline sees stale data.
/// - TAR auto-increment wraps within the 1KB page, so block transfers that
///   fail to rewrite TAR per chunk corrupt addresses.
#[derive(Debug, Default)]
pub(crate) struct FakeTarget {
    /// Number of connect attempts to refuse before responding
    pub fail_connects: u32,
    /// nRESET assert-release cycles seen
    pub nreset_pulses: u32,
    /// When set the core never reports halted
    pub refuse_halt: bool,
    /// Flash algorithm entry points, by address
    pub algo_map: BTreeMap<u32, AlgoEntryKind>,
    /// Every algorithm routine invocation: (entry, [r0, r1, r2, r3])
    pub invocations: Vec<(u32, [u32; 4])>,

    mem: BTreeMap<u32, u8>,
    regs: [u32; 17],
    tar: u32,
    csw: u32,
    ctrl_stat: u32,
    // Pipelined AP read data
    pending: u32,
    dhcsr: u32,
    demcr: u32,
    dcrdr: u32,
    halted: bool,
    nreset_asserted: bool,
    select_write_count: u32,
    csw_write_count: u32,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// DP SELECT writes seen on the wire.
    pub fn select_writes(&self) -> u32 {
        self.select_write_count
    }

    /// MEM-AP CSW writes seen on the wire.
    pub fn csw_writes(&self) -> u32 {
        self.csw_write_count
    }

    /// A byte of target memory.
    pub fn read_byte(&self, addr: u32) -> u8 {
        self.mem.get(&addr).copied().unwrap_or(0)
    }

    fn mem_read_word(&self, addr: u32) -> u32 {
        match addr {
            Dhcsr::ADDRESS => self.dhcsr_status(),
            Dcrdr::ADDRESS => self.dcrdr,
            Demcr::ADDRESS => self.demcr,
            _ => u32::from_le_bytes([
                self.read_byte(addr),
                self.read_byte(addr + 1),
                self.read_byte(addr + 2),
                self.read_byte(addr + 3),
            ]),
        }
    }

    fn dhcsr_status(&self) -> u32 {
        // Control bits as last written, status above.  Register transfers
        // complete immediately.
        let mut value = self.dhcsr & 0xFFFF;
        value |= 1 << 16;
        if self.halted {
            value |= 1 << 17;
        }
        value
    }

    fn drw_write(&mut self, data: u32) {
        let addr = self.tar;
        if self.csw & 0x7 == 0 {
            // Byte access, in the lane selected by TAR[1:0]
            let lane = (addr & 0x3) * 8;
            self.mem.insert(addr, (data >> lane) as u8);
        } else {
            let base = addr & !0x3;
            for (i, byte) in data.to_le_bytes().iter().enumerate() {
                self.mem.insert(base + i as u32, *byte);
            }
            self.scs_write(base, data);
        }
        self.advance_tar();
    }

    fn advance_tar(&mut self) {
        if (self.csw >> 4) & 0x3 != 1 {
            return;
        }
        let size = if self.csw & 0x7 == 0 { 1 } else { 4 };
        // Real MEM-APs only auto-increment the low bits, wrapping at the
        // 1KB page
        self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(size) & 0x3FF);
    }

    fn scs_write(&mut self, addr: u32, data: u32) {
        match addr {
            Dhcsr::ADDRESS => self.write_dhcsr(data),
            Dcrsr::ADDRESS => self.write_dcrsr(data),
            Dcrdr::ADDRESS => self.dcrdr = data,
            Demcr::ADDRESS => self.demcr = data,
            Aircr::ADDRESS => {
                // SYSRESETREQ or VECTRESET with the correct key
                if data >> 16 == 0x05FA && data & 0x5 != 0 {
                    self.reset();
                }
            }
            _ => {}
        }
    }

    fn write_dhcsr(&mut self, data: u32) {
        if data >> 16 != 0xA05F {
            return;
        }

        let was_halted = self.halted;
        self.dhcsr = data & 0xFFFF;
        let debugen = data & 0x1 != 0;
        let halt = data & 0x2 != 0;

        if debugen && halt {
            if !self.refuse_halt {
                self.halted = true;
            }
        } else if was_halted {
            // Resume.  If the pc sits on a flash algorithm entry, the
            // routine "runs" and the core halts at its exit breakpoint.
            self.halted = false;
            if debugen && self.algo_map.contains_key(&self.regs[15]) {
                self.run_algo(self.regs[15]);
            }
        }
    }

    fn write_dcrsr(&mut self, data: u32) {
        let sel = (data & 0x1F) as usize;
        if sel >= self.regs.len() {
            return;
        }
        if data & (1 << 16) != 0 {
            self.regs[sel] = self.dcrdr;
        } else {
            self.dcrdr = self.regs[sel];
        }
    }

    fn run_algo(&mut self, pc: u32) {
        let args = [self.regs[0], self.regs[1], self.regs[2], self.regs[3]];
        self.invocations.push((pc, args));

        let kind = self.algo_map.get(&pc).copied();
        let r0 = match kind {
            Some(AlgoEntryKind::Init)
            | Some(AlgoEntryKind::Uninit)
            | Some(AlgoEntryKind::EraseSector)
            | Some(AlgoEntryKind::EraseChip) => 0,
            Some(AlgoEntryKind::ProgramPage) => {
                for i in 0..args[1] {
                    let byte = self.read_byte(args[2].wrapping_add(i));
                    self.mem.insert(args[0].wrapping_add(i), byte);
                }
                0
            }
            Some(AlgoEntryKind::Verify { pointer }) => {
                let matches = (0..args[1]).all(|i| {
                    self.read_byte(args[0].wrapping_add(i))
                        == self.read_byte(args[2].wrapping_add(i))
                });
                match (matches, pointer) {
                    (true, true) => args[0].wrapping_add(args[1]),
                    (true, false) => 0,
                    (false, true) => args[0],
                    (false, false) => 1,
                }
            }
            Some(AlgoEntryKind::Fail(value)) => value,
            None => 0,
        };

        self.regs[0] = r0;
        self.halted = true;
    }

    fn reset(&mut self) {
        self.regs = [0; 17];
        let vector_catch = self.demcr & 0x1 != 0;
        let debugen = self.dhcsr & 0x1 != 0;
        self.halted = vector_catch && debugen && !self.refuse_halt;
    }
}

impl SwdTransport for FakeTarget {
    fn transfer(&mut self, op: SwdOp, data: u32) -> (TransferAck, u32) {
        match op {
            SwdOp::DpRead(addr) => match addr {
                IdCodeRegister::ADDRESS => {
                    if self.fail_connects > 0 {
                        self.fail_connects -= 1;
                        return (TransferAck::NoResponse(7), 0);
                    }
                    (TransferAck::Ok, Cortex::IDCODE_M4.data())
                }
                CtrlStatRegister::ADDRESS => {
                    // Power-up requests acknowledge immediately
                    let mut value = self.ctrl_stat;
                    if value & (1 << 28) != 0 {
                        value |= 1 << 29;
                    }
                    if value & (1 << 30) != 0 {
                        value |= 1 << 31;
                    }
                    (TransferAck::Ok, value)
                }
                // RDBUFF returns the pipelined data without a new access
                _ => (TransferAck::Ok, self.pending),
            },
            SwdOp::DpWrite(addr) => {
                match addr {
                    CtrlStatRegister::ADDRESS => self.ctrl_stat = data,
                    SelectRegister::ADDRESS => self.select_write_count += 1,
                    _ => {} // ABORT - nothing sticky to clear here
                }
                (TransferAck::Ok, 0)
            }
            SwdOp::ApRead(addr) => {
                // Pipelined: return the previous access's data, then issue
                // this one
                let result = self.pending;
                if addr == DrwRegister::ADDRESS {
                    self.pending = self.mem_read_word(self.tar & !0x3);
                    self.advance_tar();
                }
                (TransferAck::Ok, result)
            }
            SwdOp::ApWrite(addr) => {
                match addr {
                    CswRegister::ADDRESS => {
                        self.csw = data;
                        self.csw_write_count += 1;
                    }
                    TarRegister::ADDRESS => self.tar = data,
                    DrwRegister::ADDRESS => self.drw_write(data),
                    _ => {}
                }
                (TransferAck::Ok, 0)
            }
        }
    }

    fn line_reset(&mut self) {}

    fn jtag_to_swd(&mut self) {}

    fn set_nreset(&mut self, asserted: bool) {
        if self.nreset_asserted && !asserted {
            self.nreset_pulses += 1;
            self.reset();
        }
        self.nreset_asserted = asserted;
    }

    fn delay_us(&mut self, _us: u32) {}
}
