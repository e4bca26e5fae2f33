//! The textual state dump consumed by inspection front-ends.
//!
//! A [`Snapshot`] is a copy of the PC, the register file and a window
//! of memory words, taken with [`Simulator::snapshot`].
//! Its [`Display`] implementation is the dump format:
//!
//! ```text
//! PC=0x<hex>
//! x00=<signed, 11 wide>  x01=...  (8 registers per line, 4 lines)
//!
//! Memory[words 0..<n-1>]: <unsigned>(0x<hex>) <unsigned>(0x<hex>) ...
//! ```
//!
//! and [`Snapshot::parse`] (or [`str::parse`]) reads that text back.
//!
//! [`Simulator::snapshot`]: crate::sim::Simulator::snapshot
//! [`Display`]: std::fmt::Display

use std::borrow::Cow;
use std::fmt::Write;
use std::str::FromStr;

const MEM_HEADER: &str = "Memory[words 0..";

/// A copy of the simulator state.
///
/// ```
/// use rv32i_stepper::sim::snapshot::Snapshot;
///
/// let mut regs = [0; 32];
/// regs[1] = -5;
/// let snap = Snapshot { pc: 0x10, regs, words: vec![0, 255] };
///
/// let text = snap.to_string();
/// assert!(text.starts_with("PC=0x10\nx00=          0  x01=         -5  "));
/// assert!(text.ends_with("\nMemory[words 0..1]: 0(0x0) 255(0xff) \n"));
/// assert_eq!(Snapshot::parse(&text), Ok(snap));
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Snapshot {
    /// The program counter.
    pub pc: i32,
    /// Register values, indexed by register number.
    pub regs: [i32; 32],
    /// The first memory words (little-endian), starting at address 0.
    pub words: Vec<u32>,
}
impl Snapshot {
    /// Parses the dump format.
    pub fn parse(s: &str) -> Result<Self, SnapshotParseErr> {
        s.parse()
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PC=0x{:x}", self.pc as u32)?;
        for (i, value) in self.regs.iter().enumerate() {
            write!(f, "x{i:02}={value:>11}")?;
            f.write_str(if (i + 1) % 8 == 0 { "\n" } else { "  " })?;
        }

        write!(f, "\n{MEM_HEADER}{}]: ", self.words.len().saturating_sub(1))?;
        for word in &self.words {
            write!(f, "{word}({word:#x}) ")?;
        }
        f.write_char('\n')
    }
}

/// Errors from parsing a [`Snapshot`].
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum SnapshotParseErr {
    /// The `PC=0x...` line is missing or malformed.
    BadPc(String),
    /// A register entry is malformed.
    BadRegister(String),
    /// Not all 32 registers (or too many) were listed.
    RegisterCount(usize),
    /// The memory line is missing.
    MissingMemory,
    /// A memory word is malformed.
    BadWord(String),
}
impl std::fmt::Display for SnapshotParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotParseErr::BadPc(s)         => write!(f, "invalid PC line: {s:?}"),
            SnapshotParseErr::BadRegister(s)   => write!(f, "invalid register entry: {s:?}"),
            SnapshotParseErr::RegisterCount(n) => write!(f, "expected 32 registers, found {n}"),
            SnapshotParseErr::MissingMemory    => f.write_str("missing memory line"),
            SnapshotParseErr::BadWord(s)       => write!(f, "invalid memory word: {s:?}"),
        }
    }
}
impl std::error::Error for SnapshotParseErr {}
impl crate::err::Error for SnapshotParseErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            SnapshotParseErr::BadPc(_)         => Some("the first line should look like PC=0x1c".into()),
            SnapshotParseErr::BadRegister(_)   => Some("register entries look like x05=-12".into()),
            SnapshotParseErr::RegisterCount(_) => None,
            SnapshotParseErr::MissingMemory    => Some("the last line should start with Memory[words".into()),
            SnapshotParseErr::BadWord(_)       => Some("memory words look like 255(0xff)".into()),
        }
    }
}

impl FromStr for Snapshot {
    type Err = SnapshotParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.lines().filter(|l| !l.trim().is_empty());

        // PC
        let pc_line = lines.next().unwrap_or_default();
        let pc = pc_line.trim()
            .strip_prefix("PC=0x")
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .ok_or_else(|| SnapshotParseErr::BadPc(pc_line.to_string()))?;

        // Registers
        let mut regs = [0; 32];
        let mut count = 0;
        let mut mem_line = None;
        for line in lines.by_ref() {
            if line.trim_start().starts_with(MEM_HEADER) {
                mem_line = Some(line);
                break;
            }

            let mut tokens = line.split_whitespace();
            while let Some(tok) = tokens.next() {
                let bad = || SnapshotParseErr::BadRegister(tok.to_string());
                let (name, value) = tok.split_once('=').ok_or_else(bad)?;

                // values are right-aligned, so they usually land in the next token
                let value = match value {
                    "" => tokens.next().ok_or_else(bad)?,
                    v => v,
                };
                let n: usize = name.strip_prefix('x')
                    .and_then(|n| n.parse().ok())
                    .filter(|&n| n == count && n < 32)
                    .ok_or_else(bad)?;

                regs[n] = value.parse().map_err(|_| SnapshotParseErr::BadRegister(value.to_string()))?;
                count += 1;
            }
        }
        if count != 32 {
            return Err(SnapshotParseErr::RegisterCount(count));
        }

        // Memory
        let mem_line = mem_line.ok_or(SnapshotParseErr::MissingMemory)?;
        let (_, body) = mem_line.split_once("]:").ok_or(SnapshotParseErr::MissingMemory)?;
        let words: Vec<u32> = body.split_whitespace()
            .map(|tok| {
                let bad = || SnapshotParseErr::BadWord(tok.to_string());
                let (dec, hex) = tok.split_once('(').ok_or_else(bad)?;
                let hex = hex.strip_prefix("0x")
                    .and_then(|h| h.strip_suffix(')'))
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .ok_or_else(bad)?;
                let dec: u32 = dec.parse().map_err(|_| bad())?;

                match dec == hex {
                    true  => Ok(dec),
                    false => Err(bad()),
                }
            })
            .collect::<Result<_, _>>()?;

        Ok(Snapshot { pc: pc as i32, regs, words })
    }
}
