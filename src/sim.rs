//! Simulating and execution for RV32I assembly.
//!
//! This module is focused on executing an assembled [`Program`].
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling memory and the register file.
//! - [`decode`]: The module resolving instruction operands before execution.
//! - [`debug`]: The module handling types of breakpoints for the simulator.
//! - [`observer`]: The module tracking which state the last execution changed.
//! - [`snapshot`]: The module handling the textual state dump.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and load a program into it.
//! Loading never fails. Problems in the source become [diagnostics](crate::diag).
//!
//! ```
//! use rv32i_stepper::sim::Simulator;
//! use rv32i_stepper::ast::reg_consts::{X1, X2, X3};
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_source("
//!     addi x1, x0, 5
//!     addi x2, x0, 7
//!     add  x3, x1, x2
//!     ecall
//! ");
//!
//! // Running step by step:
//! assert!(sim.step());
//! assert_eq!(sim.reg_file[X1], 5);
//! assert!(sim.step());
//! assert_eq!(sim.reg_file[X2], 7);
//! assert!(sim.step());
//! assert_eq!(sim.reg_file[X3], 12);
//!
//! // ECALL halts (and leaves the PC on the ECALL):
//! assert!(!sim.step());
//! assert_eq!(sim.pc, 12);
//! assert!(sim.is_halted());
//! ```
//!
//! ## Flags
//!
//! Here, we define `sim` to have the default flags.
//! We could also configure the simulator by editing the flags. For example,
//! if we wish to have a smaller memory, we can edit the flags like so:
//!
//! ```
//! # use rv32i_stepper::sim::{Simulator, SimFlags};
//! let mut sim = Simulator::new(SimFlags { mem_size: 256, ..Default::default() });
//! assert_eq!(sim.mem.len(), 256);
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::step`] (which executes one instruction),
//! there are also:
//! - [`Simulator::step_in`]: a step that reports memory faults as errors
//! - [`Simulator::run`], [`Simulator::run_while`], [`Simulator::run_with_limit`]: more advanced programmatic execution
//!
//! Once halted (by `ECALL`, by the PC leaving the program, or by a memory fault),
//! the simulator stays halted until a program is loaded again.
//!
//! ## Querying State
//!
//! - The PC is the `sim.pc` field.
//! - The register file is the `sim.reg_file` field.
//! - Memory is the `sim.mem` field. [`Mem::as_bytes`] exposes the raw bytes.
//! - [`Simulator::dump_state`] renders the PC, all registers and the first memory words as text
//!   (see [`snapshot`] for the format).
//! - [`Simulator::source_line_for_pc`] maps a PC back to its source line.
//!
//! ```
//! use rv32i_stepper::sim::Simulator;
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_source("li t0, 0x12345678\nsw t0, 0(x0)\necall");
//! while sim.step() {}
//!
//! assert_eq!(&sim.mem.as_bytes()[..4], &[0x78, 0x56, 0x34, 0x12]);
//! assert!(sim.dump_state().starts_with("PC=0xc\n"));
//! assert_eq!(sim.source_line_for_pc(4), 0); // LI expands to two instructions
//! assert_eq!(sim.source_line_for_pc(12), 2);
//! assert_eq!(sim.source_line_for_pc(16), -1);
//! ```
//!
//! ## Debugging with breakpoints
//!
//! Breakpoints are accessible through the `breakpoints` field on [`Simulator`].
//!
//! To add a `breakpoint`, simply insert a [`Breakpoint`] and
//! it will break if its condition is met during the `run` functions.
//!
//! ```
//! use rv32i_stepper::sim::Simulator;
//! use rv32i_stepper::sim::debug::Breakpoint;
//!
//! let src = [
//!     "addi a0, a0, 1",
//!     "addi a0, a0, 2",
//!     "addi a0, a0, 3",
//!     "ecall",
//! ];
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&src);
//! sim.breakpoints.insert(Breakpoint::PC(8));
//! sim.run().unwrap();
//! assert_eq!(sim.pc, 8);
//! assert!(sim.hit_breakpoint());
//!
//! // Without breakpoint
//! sim.breakpoints.clear();
//! sim.run().unwrap();
//! assert_eq!(sim.pc, 12);
//! assert!(sim.hit_halt());
//! ```
//!
//! [`Breakpoint`]: self::debug::Breakpoint
//! [`Mem::as_bytes`]: self::mem::Mem::as_bytes
pub mod mem;
pub mod decode;
pub mod debug;
pub mod observer;
pub mod snapshot;
#[cfg(test)]
mod tests;

use std::borrow::Cow;
use std::collections::HashSet;

use crossbeam_channel as cbc;

use crate::asm::{assemble, split_hi_lo, Program};
use crate::ast::Reg;
use crate::ast::reg_consts::{GP, SP};
use crate::diag::{Diagnostic, DiagnosticKind, DiagnosticLog};
use debug::Breakpoint;

use self::decode::SimInstr;
use self::mem::{Mem, RegFile, Width};
use self::observer::AccessSet;
use self::snapshot::Snapshot;

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum SimErr {
    /// A halfword or word access was not aligned to its width.
    MisalignedAccess {
        /// The effective address.
        addr: i32,
        /// The access width.
        width: Width
    },
    /// Some byte of the access was outside of memory.
    AccessOutOfBounds {
        /// The effective address.
        addr: i32,
        /// The access width.
        width: Width
    },
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::MisalignedAccess { addr, width }  => write!(f, "misaligned {width} access at 0x{:x}", *addr as u32),
            SimErr::AccessOutOfBounds { addr, width } => write!(f, "{width} access out of bounds at 0x{:x}", *addr as u32),
        }
    }
}
impl std::error::Error for SimErr {}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            SimErr::MisalignedAccess { width, .. } => {
                Some(format!("{width} addresses must be a multiple of {}", width.bytes()).into())
            },
            SimErr::AccessOutOfBounds { .. } => {
                Some("check the base register and offset of this load or store".into())
            },
        }
    }
}

/// Why the simulator halted.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum HaltReason {
    /// `ECALL` was executed.
    Ecall,
    /// The PC was negative, misaligned or past the end of the program.
    PcOutOfRange(i32),
    /// A load or store faulted.
    Fault(SimErr),
}

/// Anything that can cause a step to abruptly end.
enum StepBreak {
    /// `ECALL` was executed.
    Ecall,
    /// There is no instruction at the PC.
    PcOutOfRange,
    /// A memory fault occurred.
    Err(SimErr)
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum PauseCondition {
    /// Program halted (by `ECALL` or by leaving the program).
    Halt,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`].
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The size of memory, in bytes.
    ///
    /// This flag only goes into effect after a `Simulator::new`,
    /// `Simulator::reset` or program load.
    /// The stack pointer starts at the end of memory,
    /// and the global pointer starts at its midpoint.
    ///
    /// By default, this flag is `4096`.
    pub mem_size: usize,

    /// Whether to record an [`Executed`] diagnostic for every executed instruction.
    ///
    /// By default, this flag is `false`.
    ///
    /// [`Executed`]: crate::diag::DiagnosticKind::Executed
    pub trace: bool,

    /// The number of memory words (starting at address 0) included in
    /// [`Simulator::snapshot`] and [`Simulator::dump_state`].
    ///
    /// The window is additionally limited by the size of memory.
    ///
    /// By default, this flag is `64`.
    pub dump_words: usize,
}

#[allow(clippy::derivable_impls)]
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            mem_size: 4096,
            trace: false,
            dump_words: 64
        }
    }
}

/// Executes assembled code.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Loading a program resets these values.

    /// The simulator's memory.
    pub mem: Mem,

    /// The simulator's register file.
    pub reg_file: RegFile,

    /// The program counter.
    pub pc: i32,

    /// The loaded program.
    program: Program,

    /// Why the simulator halted (or `None` if it is ready).
    halt: Option<HaltReason>,

    /// The number of instructions successfully run since the program was loaded.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// Indicates the reason why the last execution (via [`Simulator::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    /// Tracks changes in simulator state.
    pub observer: observer::ChangeObserver,

    /// Diagnostics from loading and executing the current program.
    diagnostics: DiagnosticLog,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Loading a program does not reset these values.

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between loads.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: HashSet<Breakpoint>,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    /// Creates a new simulator with the provided flags and an empty program.
    ///
    /// Stepping a simulator with no program halts immediately.
    pub fn new(flags: SimFlags) -> Self {
        let mut sim = Self {
            mem: Mem::new(flags.mem_size),
            reg_file: RegFile::new(),
            pc: 0,
            program: Program::empty(),
            halt: None,
            instructions_run: 0,
            pause_condition: Default::default(),
            observer: Default::default(),
            diagnostics: DiagnosticLog::new(),

            flags,
            breakpoints: Default::default(),
        };
        sim.reset();
        sim
    }

    /// Resets the machine state for the current program, so it can be run again.
    ///
    /// Memory is zeroed (and resized to `flags.mem_size`), registers are cleared
    /// (except `sp` and `gp`), and the PC returns to 0.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints
    /// - The loaded program
    /// - Diagnostics (and subscribers)
    pub fn reset(&mut self) {
        let mem_size = self.flags.mem_size;
        if self.mem.len() == mem_size {
            self.mem.clear();
        } else {
            self.mem = Mem::new(mem_size);
        }

        let top = i32::try_from(mem_size).unwrap_or(i32::MAX);
        self.reg_file = RegFile::new();
        self.reg_file.set(SP, top);
        self.reg_file.set(GP, top / 2);

        self.pc = 0;
        self.halt = None;
        self.instructions_run = 0;
        self.pause_condition = Default::default();
        self.observer.clear();
    }

    /// Loads an assembled program, replacing all machine state.
    ///
    /// The provided diagnostics (typically from [`assemble`])
    /// replace any diagnostics from the previous program.
    pub fn load(&mut self, program: Program, diagnostics: impl IntoIterator<Item=Diagnostic>) {
        self.program = program;
        self.reset();

        self.diagnostics.clear();
        for diag in diagnostics {
            self.diagnostics.push(diag);
        }
    }

    /// Assembles and loads a program given as lines of source.
    ///
    /// This never fails: problems with the source are reported as diagnostics
    /// and the offending lines degrade to no-ops.
    pub fn load_program<S: AsRef<str>>(&mut self, lines: &[S]) {
        let (program, diags) = assemble(lines);
        self.load(program, diags);
    }

    /// Assembles and loads a program given as a single source string.
    pub fn load_source(&mut self, src: &str) {
        let lines: Vec<_> = src.lines().collect();
        self.load_program(&lines);
    }

    /// The loaded program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Raw, read-only view of memory.
    pub fn memory(&self) -> &[u8] {
        self.mem.as_bytes()
    }

    /// Whether the simulator has halted.
    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    /// Why the simulator halted (if it has).
    pub fn halt_reason(&self) -> Option<&HaltReason> {
        self.halt.as_ref()
    }

    /// Indicates whether the last execution of the simulator hit a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Indicates whether the last execution of the simulator halted successfully
    /// (by `ECALL` or by running off the end of the program).
    pub fn hit_halt(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Halt)
    }

    /// Gets the zero-based source line of the instruction at `pc`,
    /// or `-1` if `pc` is not the address of an instruction.
    pub fn source_line_for_pc(&self, pc: i32) -> i32 {
        self.program.rev_lookup_line(pc)
            .and_then(|line| i32::try_from(line).ok())
            .unwrap_or(-1)
    }

    /// All diagnostics since the program was loaded.
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Takes all diagnostics recorded so far, clearing the log.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Creates a channel which receives every diagnostic recorded from now on.
    ///
    /// Subscriptions survive program loads.
    pub fn subscribe(&mut self) -> cbc::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Copies the PC, registers and first memory words.
    pub fn snapshot(&self) -> Snapshot {
        let n_words = self.flags.dump_words.min(self.mem.len() / 4);

        Snapshot {
            pc: self.pc,
            regs: *self.reg_file.as_array(),
            words: (0..n_words).filter_map(|n| self.mem.word(n)).collect(),
        }
    }

    /// Renders the current state in the dump format (see [`snapshot`]).
    pub fn dump_state(&self) -> String {
        self.snapshot().to_string()
    }

    fn push_diag(&mut self, kind: DiagnosticKind, pc: i32) {
        let line = self.program.rev_lookup_line(pc);
        self.diagnostics.push(Diagnostic { kind, line, pc: Some(pc) });
    }

    fn set_reg(&mut self, reg: Reg, value: i32) {
        if reg.reg_no() != 0 && self.reg_file[reg] != value {
            self.observer.set_reg_changed(reg);
        }
        self.reg_file.set(reg, value);
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the simulator halts
    /// - a breakpoint matches
    ///
    /// A memory fault halts the simulator and is returned as an error.
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimErr> {
        self.observer.clear();
        std::mem::take(&mut self.pause_condition);

        // event loop
        // run until:
        // 1. the simulator halts
        // 2. the tripwire condition returns false
        // 3. any of the breakpoints are hit
        let result = loop {
            if self.is_halted() {
                break Ok(PauseCondition::Halt);
            }
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }

            match self.step_once() {
                Ok(true) => {},
                Ok(false) => break Ok(PauseCondition::Halt),
                Err(e) => break Err(e),
            }

            // After executing, check that any breakpoints were hit.
            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break Ok(PauseCondition::Breakpoint);
            }
        };

        self.pause_condition = result?;
        Ok(())
    }

    /// Execute the program.
    ///
    /// This blocks until the program halts or hits a breakpoint.
    /// If you would like to limit the maximum number of steps to execute, consider [`Simulator::run_with_limit`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many steps to execute.
    ///
    /// This blocks until the program halts, hits a breakpoint,
    /// or until the number of steps to execute has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|sim| sim.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Simulate one step, executing one instruction.
    ///
    /// This does not handle halting. That is done by [`Simulator::step_once`].
    fn _step_inner(&mut self) -> Result<(), StepBreak> {
        self.reg_file.clear_zero();

        let pc = self.pc;
        let Some(instr) = self.program.fetch(pc) else {
            return Err(StepBreak::PcOutOfRange);
        };
        let line = Some(instr.line);

        if self.flags.trace {
            let kind = DiagnosticKind::Executed(instr.to_string());
            self.diagnostics.push(Diagnostic { kind, line, pc: Some(pc) });
        }

        let (decoded, issues) = SimInstr::decode(instr, self.program.symbol_table(), pc);
        for kind in issues {
            self.diagnostics.push(Diagnostic { kind, line, pc: Some(pc) });
        }

        let mut next_pc = pc.wrapping_add(4);
        match decoded {
            SimInstr::Alu(op, rd, rs1, rs2) => {
                let result = op.apply(self.reg_file[rs1], self.reg_file[rs2]);
                self.set_reg(rd, result);
            },
            SimInstr::AluImm(op, rd, rs1, imm) => {
                let result = op.apply(self.reg_file[rs1], imm);
                self.set_reg(rd, result);
            },
            SimInstr::Load { rd, base, offset, width, signed } => {
                let addr = self.reg_file[base].wrapping_add(offset);
                let raw = self.mem.read(addr, width)?;
                self.observer.update_mem_accesses(addr, width.bytes(), AccessSet::READ);

                let value = match (width, signed) {
                    (Width::Byte, true) => raw as u8 as i8 as i32,
                    (Width::Half, true) => raw as u16 as i16 as i32,
                    _ => raw as i32,
                };
                self.set_reg(rd, value);
            },
            SimInstr::Store { rs, base, offset, width } => {
                let addr = self.reg_file[base].wrapping_add(offset);
                let value = self.reg_file[rs] as u32;

                let old = self.mem.read(addr, width)?;
                self.mem.write(addr, width, value)?;

                // little-endian, so diff byte i belongs to addr + i
                let diff = (old ^ value).to_le_bytes();
                for (byte_addr, &d) in (addr..).zip(&diff[..width.bytes()]) {
                    let mut access = AccessSet::WRITTEN;
                    if d != 0 {
                        access |= AccessSet::MODIFIED;
                    }
                    self.observer.update_mem_accesses(byte_addr, 1, access);
                }
            },
            SimInstr::Branch(cond, rs1, rs2, offset) => {
                if let Some(offset) = offset {
                    if cond.check(self.reg_file[rs1], self.reg_file[rs2]) {
                        next_pc = pc.wrapping_add(offset);
                        self.observer.set_pc_jumped();
                    }
                }
            },
            SimInstr::Jal(rd, target) => {
                if let Some(target) = target {
                    self.set_reg(rd, pc.wrapping_add(4));
                    next_pc = target;
                    self.observer.set_pc_jumped();
                }
            },
            SimInstr::Jalr(rd, base, offset) => {
                // target is computed before rd is written (rd may be base)
                let target = self.reg_file[base].wrapping_add(offset) & !1;
                self.set_reg(rd, pc.wrapping_add(4));
                next_pc = target;
                self.observer.set_pc_jumped();
            },
            SimInstr::Lui(rd, imm) => self.set_reg(rd, imm << 12),
            SimInstr::Auipc(rd, imm) => self.set_reg(rd, pc.wrapping_add(imm << 12)),
            SimInstr::La(rd, addr) => {
                if let Some(addr) = addr {
                    let (upper, lower) = split_hi_lo(addr);
                    self.set_reg(rd, (upper << 12).wrapping_add(lower));
                }
            },
            SimInstr::Ecall => return Err(StepBreak::Ecall),
            SimInstr::Nop => {},
        }

        self.pc = next_pc;
        Ok(())
    }

    /// Simulate one step, transitioning to halted if the step could not continue.
    ///
    /// This returns whether the simulator is still ready.
    fn step_once(&mut self) -> Result<bool, SimErr> {
        if self.is_halted() {
            return Ok(false);
        }

        let pc = self.pc;
        match self._step_inner() {
            Ok(()) => {
                self.instructions_run += 1;
                Ok(true)
            },
            Err(StepBreak::Ecall) => {
                self.instructions_run += 1;
                self.halt = Some(HaltReason::Ecall);
                self.push_diag(DiagnosticKind::Ecall, pc);
                Ok(false)
            },
            Err(StepBreak::PcOutOfRange) => {
                self.halt = Some(HaltReason::PcOutOfRange(pc));
                self.push_diag(DiagnosticKind::PcOutOfRange(pc), pc);
                Ok(false)
            },
            Err(StepBreak::Err(e)) => {
                self.halt = Some(HaltReason::Fault(e.clone()));
                self.push_diag(DiagnosticKind::MemoryFault(e.clone()), pc);
                Err(e)
            },
        }
    }

    /// Simulate one step, executing one instruction.
    ///
    /// This returns whether the simulator is still ready, or the fault
    /// if the instruction faulted on memory (the simulator is then halted).
    /// Stepping a halted simulator does nothing.
    pub fn step_in(&mut self) -> Result<bool, SimErr> {
        self.observer.clear();
        self.step_once()
    }

    /// Simulate one step, executing one instruction.
    ///
    /// This returns `true` while the simulator is ready
    /// and `false` once it has halted (for any reason).
    pub fn step(&mut self) -> bool {
        self.step_in().unwrap_or(false)
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}
