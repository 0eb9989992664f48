//! Simulating and executing linked images.
//!
//! This module is focused on executing a fully linked program
//! (i.e., [`LinkedImage`]).
//!
//! This module consists of:
//! - [`Simulator`]: the struct that runs the program
//! - [`mem`]: the module handling guest memory and the register file
//! - [`icache`]: the decoded-instruction cache driving the fetch loop
//! - [`io`]: the console sinks and the guest IO device
//! - [`libc`]: the host-implemented C library routines
//! - [`debug`]: the read-only debug observer
//!
//! The interpreter loop is exactly:
//!
//! ```text
//! while regs.advance():          // false once the guest has exited
//!     if the budget is exhausted → Time Limit Exceeded
//!     if pc is a libc trampoline → run the routine, pc := ra
//!     else                         fetch, decode (cached), execute
//! ```
//!
//! Any trap ([`SimErr`]) is surfaced once, at the loop boundary.

pub mod mem;
pub mod icache;
pub mod io;
pub mod libc;
pub mod debug;

use crate::ast::sim::{BFunct, IFunct, LFunct, RFunct, SFunct, SimInstr};
use crate::cfg::Config;
use crate::link::LinkedImage;

use self::debug::DebugObserver;
use self::icache::{Hint, ICache};
use self::io::{Console, Device};
use self::mem::{Mem, RegFile};

/// A run-time trap. Fatal; the run is not resumable.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SimErr {
    /// A load from an address not aligned to its width.
    LoadMisAligned {
        /// The faulting address.
        addr: u32,
        /// The access width in bytes.
        width: u32
    },
    /// A load past the end of memory.
    LoadOutOfBound {
        /// The faulting address.
        addr: u32,
        /// The access width in bytes.
        width: u32
    },
    /// A store to an address not aligned to its width.
    StoreMisAligned {
        /// The faulting address.
        addr: u32,
        /// The access width in bytes.
        width: u32
    },
    /// A store past the end of memory.
    StoreOutOfBound {
        /// The faulting address.
        addr: u32,
        /// The access width in bytes.
        width: u32
    },
    /// An instruction fetch from a PC that is not 4-byte aligned.
    InsMisAligned {
        /// The faulting PC.
        addr: u32
    },
    /// An instruction fetch from outside memory.
    InsOutOfBound {
        /// The faulting PC.
        addr: u32
    },
    /// A fetched word that is not a recognized RV32I encoding.
    InsUnknown {
        /// The PC of the word.
        addr: u32,
        /// The word itself.
        cmd: u32
    },
    /// A misaligned guest-memory access inside a libc routine.
    LibcMisAligned {
        /// The routine's index in [`libc::ROUTINES`].
        index: usize,
        /// The faulting address.
        addr: u32
    },
    /// An out-of-bounds guest-memory access inside a libc routine.
    LibcOutOfBound {
        /// The routine's index in [`libc::ROUTINES`].
        index: usize,
        /// The faulting address.
        addr: u32
    },
    /// Any other failure inside a libc routine.
    LibcError {
        /// The routine's index in [`libc::ROUTINES`].
        index: usize,
        /// What went wrong.
        message: String
    },
    /// The instruction budget ran out before the guest exited.
    TimeLimitExceeded,
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let libc_name = |index: usize| libc::ROUTINES.get(index).map_or("?", |r| r.name);
        match self {
            SimErr::LoadMisAligned { addr, width }  => write!(f, "misaligned load of width {width} at address {addr:#010x}"),
            SimErr::LoadOutOfBound { addr, width }  => write!(f, "out-of-bound load of width {width} at address {addr:#010x}"),
            SimErr::StoreMisAligned { addr, width } => write!(f, "misaligned store of width {width} at address {addr:#010x}"),
            SimErr::StoreOutOfBound { addr, width } => write!(f, "out-of-bound store of width {width} at address {addr:#010x}"),
            SimErr::InsMisAligned { addr }          => write!(f, "misaligned instruction fetch at address {addr:#010x}"),
            SimErr::InsOutOfBound { addr }          => write!(f, "out-of-bound instruction fetch at address {addr:#010x}"),
            SimErr::InsUnknown { addr, cmd }        => write!(f, "unknown instruction {cmd:#010x} at address {addr:#010x}"),
            SimErr::LibcMisAligned { index, addr }  => write!(f, "misaligned access at address {addr:#010x} in {}", libc_name(*index)),
            SimErr::LibcOutOfBound { index, addr }  => write!(f, "out-of-bound access at address {addr:#010x} in {}", libc_name(*index)),
            SimErr::LibcError { index, message }    => write!(f, "error in {}: {message}", libc_name(*index)),
            SimErr::TimeLimitExceeded               => f.write_str("Time Limit Exceeded"),
        }
    }
}
impl std::error::Error for SimErr {}
impl crate::err::Error for SimErr {}

impl SimErr {
    /// Renders the fatal diagnostic written to the `panic` sink: the trap,
    /// the PC it occurred at, and the register state.
    pub fn report(&self, regs: &RegFile) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "fatal: {self}");
        regs.write_dump(&mut out);
        out
    }
}

/// Executes a linked image.
///
/// # Example
/// ```no_run
/// use rv32_ensemble::cfg::Config;
/// use rv32_ensemble::sim::Simulator;
/// # fn get_image() -> rv32_ensemble::link::LinkedImage { unimplemented!() }
///
/// let image = get_image();
/// let mut sim = Simulator::new(&image, &Config::default());
/// sim.run().unwrap(); // <-- Result can be handled accordingly
/// assert_eq!(sim.regs.exit_code(), 0);
/// ```
pub struct Simulator {
    /// The guest memory.
    pub mem: Mem,
    /// The register file.
    pub regs: RegFile,
    /// The guest IO device.
    pub dev: Device,
    /// The host-facing output streams.
    pub console: Console,
    /// The debug observer (used when `debug` is set).
    pub observer: DebugObserver,

    icache: ICache,
    timeout: u64,
    debug: bool,
    detail: bool,
    hit_breakpoint: bool,
}

impl Simulator {
    /// Creates a simulator with the image loaded, the PC at the entry
    /// point, the stack pointer at the top of memory, and `ra` pointing
    /// at the exit trampoline (so returning from `main` exits with `a0`).
    pub fn new(image: &LinkedImage, config: &Config) -> Self {
        let mut mem = Mem::new(config.memory_size);
        mem.load_image(image);

        let regs = RegFile::new(image.entry, config.memory_size, libc::exit_addr());
        let icache = ICache::new(image.text.start, image.text.bytes.len() as u32);

        Simulator {
            mem,
            regs,
            dev: Device::default(),
            console: Console::default(),
            observer: DebugObserver::new(),
            icache,
            timeout: config.timeout,
            debug: config.debug,
            detail: config.detail,
            hit_breakpoint: false,
        }
    }

    /// Whether the last [`Simulator::run`] stopped at a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        self.hit_breakpoint
    }

    /// Runs until the guest exits, a breakpoint is hit (in debug mode),
    /// or a trap occurs.
    ///
    /// Normal termination (the guest's `exit`, including returning from
    /// `main`) is `Ok`; the exit code is available from
    /// [`RegFile::exit_code`]. Exhausting the instruction budget is the
    /// fatal [`SimErr::TimeLimitExceeded`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.hit_breakpoint = false;
        let mut budget = self.timeout;
        let mut hint = Hint::invalid();

        while self.regs.advance() {
            if budget == 0 {
                return Err(SimErr::TimeLimitExceeded);
            }
            budget -= 1;

            if self.debug {
                if self.observer.should_break(self.regs.pc) {
                    self.hit_breakpoint = true;
                    break;
                }
                self.trace_current(hint);
            }

            hint = self.step(hint)?;
        }
        Ok(())
    }

    /// Executes exactly one instruction (or libc dispatch).
    pub fn step_in(&mut self) -> Result<(), SimErr> {
        if self.regs.advance() {
            self.step(Hint::invalid())?;
        }
        Ok(())
    }

    /// Writes one observer trace line for the instruction at the PC.
    fn trace_current(&mut self, hint: Hint) {
        let pc = self.regs.pc;
        let step = self.regs.steps();
        if let Some(index) = libc::index_of_pc(pc) {
            self.observer.trace_libc(step, pc, libc::ROUTINES[index].name, &mut self.console.message);
        } else if let Ok((instr, _)) = self.icache.ifetch(pc, hint, &self.mem) {
            self.observer.trace(step, pc, &instr, &mut self.console.message);
        }
    }

    /// One fetch-decode-execute step. Returns the fetch hint for the
    /// next step.
    fn step(&mut self, hint: Hint) -> Result<Hint, SimErr> {
        let pc = self.regs.pc;

        // The libc trampolines are dispatched on PC, before any fetch.
        if let Some(index) = libc::index_of_pc(pc) {
            libc::dispatch(index, &mut self.regs, &mut self.mem, &mut self.dev)?;
            return Ok(Hint::invalid());
        }

        let (instr, next_hint) = self.icache.ifetch(pc, hint, &self.mem)?;
        self.execute(pc, instr, next_hint)
    }

    /// Executes one decoded instruction, updating registers and memory.
    fn execute(&mut self, pc: u32, instr: SimInstr, fallthrough: Hint) -> Result<Hint, SimErr> {
        let regs = &mut self.regs;

        match instr {
            SimInstr::R(f, rd, rs1, rs2) => {
                let a = regs[rs1];
                let b = regs[rs2];
                let result = match f {
                    RFunct::Add  => a.wrapping_add(b),
                    RFunct::Sub  => a.wrapping_sub(b),
                    RFunct::Sll  => a.wrapping_shl(b),
                    RFunct::Slt  => u32::from((a as i32) < (b as i32)),
                    RFunct::Sltu => u32::from(a < b),
                    RFunct::Xor  => a ^ b,
                    RFunct::Srl  => a.wrapping_shr(b),
                    RFunct::Sra  => ((a as i32).wrapping_shr(b)) as u32,
                    RFunct::Or   => a | b,
                    RFunct::And  => a & b,
                };
                regs.set(rd, result);
                regs.pc = pc.wrapping_add(4);
                Ok(fallthrough)
            },
            SimInstr::I(f, rd, rs1, imm) => {
                let a = regs[rs1];
                let b = imm as u32;
                let result = match f {
                    IFunct::Addi  => a.wrapping_add(b),
                    IFunct::Slti  => u32::from((a as i32) < imm),
                    IFunct::Sltiu => u32::from(a < b),
                    IFunct::Xori  => a ^ b,
                    IFunct::Ori   => a | b,
                    IFunct::Andi  => a & b,
                    IFunct::Slli  => a.wrapping_shl(b),
                    IFunct::Srli  => a.wrapping_shr(b),
                    IFunct::Srai  => ((a as i32).wrapping_shr(b)) as u32,
                };
                regs.set(rd, result);
                regs.pc = pc.wrapping_add(4);
                Ok(fallthrough)
            },
            SimInstr::Load(f, rd, base, offset) => {
                let ea = regs[base].wrapping_add(offset as u32);
                let value = match f {
                    LFunct::Lb  => self.mem.load_i8(ea)? as u32,
                    LFunct::Lh  => self.mem.load_i16(ea)? as u32,
                    LFunct::Lw  => self.mem.load_u32(ea)?,
                    LFunct::Lbu => u32::from(self.mem.load_u8(ea)?),
                    LFunct::Lhu => u32::from(self.mem.load_u16(ea)?),
                };
                self.regs.set(rd, value);
                self.regs.pc = pc.wrapping_add(4);
                Ok(fallthrough)
            },
            SimInstr::Store(f, src, base, offset) => {
                let ea = regs[base].wrapping_add(offset as u32);
                let value = regs[src];
                match f {
                    SFunct::Sb => self.mem.store_i8(ea, value as u8)?,
                    SFunct::Sh => self.mem.store_i16(ea, value as u16)?,
                    SFunct::Sw => self.mem.store_i32(ea, value)?,
                }
                self.regs.pc = pc.wrapping_add(4);
                Ok(fallthrough)
            },
            SimInstr::Br(f, rs1, rs2, offset) => {
                let a = regs[rs1];
                let b = regs[rs2];
                let taken = match f {
                    BFunct::Beq  => a == b,
                    BFunct::Bne  => a != b,
                    BFunct::Blt  => (a as i32) < (b as i32),
                    BFunct::Bge  => (a as i32) >= (b as i32),
                    BFunct::Bltu => a < b,
                    BFunct::Bgeu => a >= b,
                };
                match taken {
                    true => {
                        regs.pc = pc.wrapping_add(offset as u32);
                        Ok(Hint::invalid())
                    },
                    false => {
                        regs.pc = pc.wrapping_add(4);
                        Ok(fallthrough)
                    },
                }
            },
            SimInstr::Lui(rd, imm20) => {
                regs.set(rd, imm20 << 12);
                regs.pc = pc.wrapping_add(4);
                Ok(fallthrough)
            },
            SimInstr::Auipc(rd, imm20) => {
                regs.set(rd, pc.wrapping_add(imm20 << 12));
                regs.pc = pc.wrapping_add(4);
                Ok(fallthrough)
            },
            SimInstr::Jal(rd, offset) => {
                regs.set(rd, pc.wrapping_add(4));
                regs.pc = pc.wrapping_add(offset as u32);
                Ok(Hint::invalid())
            },
            SimInstr::Jalr(rd, base, offset) => {
                // Bit 0 of the computed target is cleared.
                let target = regs[base].wrapping_add(offset as u32) & !1;
                regs.set(rd, pc.wrapping_add(4));
                regs.pc = target;
                Ok(Hint::invalid())
            },
        }
    }

    /// Writes the end-of-run component summaries to the `profile` sink.
    pub fn print_details(&mut self) {
        use std::fmt::Write;
        let _ = writeln!(self.console.profile);
        self.regs.print_details(self.detail, &mut self.console.profile);
        self.mem.print_details(self.detail, &mut self.console.profile);
        self.dev.print_details(self.detail, &mut self.console.profile);
    }
}
