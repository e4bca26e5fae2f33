//! Structured diagnostics emitted while loading and executing a program.
//!
//! Nothing in this crate prints. Every advisory event (an unknown register,
//! an unresolved label, the program halting, ...) is recorded as a [`Diagnostic`]
//! in a [`DiagnosticLog`], which is held by the [`Simulator`].
//!
//! Front-ends can either read the log after the fact
//! ([`DiagnosticLog::iter`], [`DiagnosticLog::take`]), or subscribe to it
//! with [`DiagnosticLog::subscribe`] and receive events over a channel
//! (which may be drained on a different thread).
//!
//! ```
//! use rv32i_stepper::sim::Simulator;
//! use rv32i_stepper::diag::{DiagnosticKind, Severity};
//!
//! let mut sim = Simulator::new(Default::default());
//! let rx = sim.subscribe();
//!
//! sim.load_source("addi q9, x0, 1\necall");
//! while sim.step() {}
//!
//! let events: Vec<_> = rx.try_iter().collect();
//! assert!(matches!(events[0].kind, DiagnosticKind::ProgramLoaded { instructions: 2, labels: 0 }));
//! assert!(events.iter().any(|d| d.severity() == Severity::Warning && d.line == Some(0)));
//! assert!(matches!(events.last().unwrap().kind, DiagnosticKind::Ecall));
//! ```
//!
//! [`Simulator`]: crate::sim::Simulator

use std::borrow::Cow;

use crossbeam_channel as cbc;

use crate::ast::OperandErr;
use crate::sim::SimErr;

/// How serious a [`Diagnostic`] is.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Severity {
    /// Progress information (program loaded, instruction executed, program halted).
    Info,
    /// Something was wrong with the program, but a default was used and execution continued.
    Warning,
    /// Execution could not continue.
    Error,
}
impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info    => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error   => f.write_str("error"),
        }
    }
}

/// The event a [`Diagnostic`] describes.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DiagnosticKind {
    /// A program was loaded.
    ProgramLoaded {
        /// Number of instructions after pseudo-instruction expansion.
        instructions: usize,
        /// Number of distinct labels.
        labels: usize
    },
    /// An instruction was executed (only emitted with [`SimFlags::trace`]).
    ///
    /// [`SimFlags::trace`]: crate::sim::SimFlags::trace
    Executed(String),
    /// The mnemonic is not recognized. The instruction is kept and executes as a no-op.
    UnknownOpcode(String),
    /// A pseudo-instruction had the wrong number of operands.
    /// It is kept unexpanded and executes as a no-op.
    MalformedPseudo(String),
    /// A label was defined more than once. The later definition is used.
    DuplicateLabel(String),
    /// An operand could not be resolved.
    Operand(OperandErr),
    /// A branch, jump or `LA` referred to a label that does not exist.
    UnresolvedLabel(String),
    /// The PC left the program (or is not word-aligned). The simulator is halted.
    PcOutOfRange(i32),
    /// An `ECALL` was executed. The simulator is halted.
    Ecall,
    /// A load or store faulted. The simulator is halted.
    MemoryFault(SimErr),
}
impl DiagnosticKind {
    /// The severity of this kind of event.
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::ProgramLoaded { .. } => Severity::Info,
            DiagnosticKind::Executed(_)          => Severity::Info,
            DiagnosticKind::UnknownOpcode(_)     => Severity::Warning,
            DiagnosticKind::MalformedPseudo(_)   => Severity::Warning,
            DiagnosticKind::DuplicateLabel(_)    => Severity::Warning,
            DiagnosticKind::Operand(_)           => Severity::Warning,
            DiagnosticKind::UnresolvedLabel(_)   => Severity::Warning,
            DiagnosticKind::PcOutOfRange(_)      => Severity::Info,
            DiagnosticKind::Ecall                => Severity::Info,
            DiagnosticKind::MemoryFault(_)       => Severity::Error,
        }
    }
}
impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticKind::ProgramLoaded { instructions, labels } => write!(f, "program loaded: {instructions} instructions, {labels} labels"),
            DiagnosticKind::Executed(instr)    => write!(f, "executed {instr}"),
            DiagnosticKind::UnknownOpcode(op)  => write!(f, "unknown opcode {op}"),
            DiagnosticKind::MalformedPseudo(i) => write!(f, "malformed pseudo-instruction: {i}"),
            DiagnosticKind::DuplicateLabel(l)  => write!(f, "label {l} was defined multiple times"),
            DiagnosticKind::Operand(e)         => e.fmt(f),
            DiagnosticKind::UnresolvedLabel(l) => write!(f, "label not found: {l}"),
            DiagnosticKind::PcOutOfRange(pc)   => write!(f, "PC out of range (0x{:x}), halting", *pc as u32),
            DiagnosticKind::Ecall              => f.write_str("ECALL, program halted"),
            DiagnosticKind::MemoryFault(e)     => write!(f, "{e}, halting"),
        }
    }
}

/// A single diagnostic event.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Diagnostic {
    /// What happened.
    pub kind: DiagnosticKind,
    /// The zero-based source line involved (if any).
    pub line: Option<usize>,
    /// The PC at the time of the event (if it happened during execution).
    pub pc: Option<i32>,
}
impl Diagnostic {
    /// Creates a diagnostic raised while loading (no PC).
    pub fn at_line(kind: DiagnosticKind, line: usize) -> Self {
        Self { kind, line: Some(line), pc: None }
    }

    /// The severity of this diagnostic.
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}
impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] ", self.severity())?;
        if let Some(line) = self.line {
            write!(f, "line {}: ", line + 1)?;
        }
        self.kind.fmt(f)?;
        if let Some(pc) = self.pc {
            write!(f, " (PC=0x{:x})", pc as u32)?;
        }
        Ok(())
    }
}
impl std::error::Error for Diagnostic {}
impl crate::err::Error for Diagnostic {
    fn line(&self) -> Option<usize> {
        self.line
    }

    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            DiagnosticKind::Operand(e)         => crate::err::Error::help(e),
            DiagnosticKind::MemoryFault(e)     => crate::err::Error::help(e),
            DiagnosticKind::UnknownOpcode(_)   => Some("this instruction is not part of the supported RV32I subset and will be skipped".into()),
            DiagnosticKind::MalformedPseudo(_) => Some("check the number of operands of this pseudo-instruction".into()),
            DiagnosticKind::DuplicateLabel(_)  => Some("labels must be unique, try renaming one of the labels".into()),
            DiagnosticKind::UnresolvedLabel(_) => Some("try adding this label before an instruction".into()),
            _ => None,
        }
    }
}

/// A log of diagnostics with any number of channel subscribers.
///
/// Every pushed diagnostic is both kept in the log and sent to each subscriber.
/// Subscribers whose receiver was dropped are removed on the next push.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    events: Vec<Diagnostic>,
    subscribers: Vec<cbc::Sender<Diagnostic>>,
}
impl DiagnosticLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a new channel which receives every diagnostic pushed from now on.
    pub fn subscribe(&mut self) -> cbc::Receiver<Diagnostic> {
        let (tx, rx) = cbc::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Records a diagnostic.
    pub fn push(&mut self, diag: Diagnostic) {
        self.subscribers.retain(|tx| tx.send(diag.clone()).is_ok());
        self.events.push(diag);
    }

    /// Iterates over every recorded diagnostic, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.events.iter()
    }

    /// Takes all recorded diagnostics out of the log.
    ///
    /// Subscribers are not affected.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.events)
    }

    /// Clears the recorded diagnostics (keeping subscribers).
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of recorded diagnostics.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no diagnostics are recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of recorded diagnostics at or above the given severity.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.events.iter()
            .filter(|d| d.severity() >= severity)
            .count()
    }
}
impl<'a> IntoIterator for &'a DiagnosticLog {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
