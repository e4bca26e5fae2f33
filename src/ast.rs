//! Components relating to the instruction representation
//! used between the loader and the simulator.
//!
//! The key types here are:
//! - [`Instruction`]: one canonical instruction, whose operands are kept as raw tokens,
//! - [`Opcode`]: the closed set of mnemonics the loader recognizes,
//! - [`Reg`]: a register index,
//!
//! as well as the operand helpers ([`parse_imm`], [`sext12`], [`parse_mem_operand`])
//! that the simulator uses to resolve those raw tokens when an instruction executes.

use std::borrow::Cow;
use std::str::FromStr;

/// A register. Must be between 0 and 31.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by parsing a register token with [`str::parse`].
///
/// ## Examples
///
/// ```text
/// ADDI a0, zero, 5
///      ~~  ~~~~
/// ADD x1, x1, t0
///     ~~  ~~  ~~
/// LW s1, 8(sp)
///    ~~    ~~
/// ```
///
/// ```
/// use rv32i_stepper::ast::Reg;
/// use rv32i_stepper::ast::reg_consts::{SP, X10};
///
/// assert_eq!("sp".parse::<Reg>(), Ok(SP));
/// assert_eq!("X10".parse::<Reg>(), Ok(X10));
/// assert_eq!("A0".parse::<Reg>(), Ok(X10));
/// assert!("x32".parse::<Reg>().is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct Reg(pub(crate) u8);

macro_rules! reg_consts {
    ($($num:ident = $value:literal, $abi:ident);+ $(;)?) => {
        /// Register constants!
        ///
        /// Every register is available both by its number (`X0`-`X31`)
        /// and by its ABI name (`ZERO`, `RA`, `SP`, ...).
        pub mod reg_consts {
            use super::Reg;

            $(
                #[doc = concat!("Register x", stringify!($value), ".")]
                pub const $num: Reg = Reg($value);
                #[doc = concat!("Register x", stringify!($value), " (ABI name).")]
                pub const $abi: Reg = Reg($value);
            )+
        }

        /// ABI names, indexed by register number.
        const ABI_NAMES: [&str; 32] = [$(stringify!($abi)),+];
    };
}
reg_consts! {
    X0 = 0, ZERO; X1 = 1, RA; X2 = 2, SP; X3 = 3, GP;
    X4 = 4, TP; X5 = 5, T0; X6 = 6, T1; X7 = 7, T2;
    X8 = 8, S0; X9 = 9, S1; X10 = 10, A0; X11 = 11, A1;
    X12 = 12, A2; X13 = 13, A3; X14 = 14, A4; X15 = 15, A5;
    X16 = 16, A6; X17 = 17, A7; X18 = 18, S2; X19 = 19, S3;
    X20 = 20, S4; X21 = 21, S5; X22 = 22, S6; X23 = 23, S7;
    X24 = 24, S8; X25 = 25, S9; X26 = 26, S10; X27 = 27, S11;
    X28 = 28, T3; X29 = 29, T4; X30 = 30, T5; X31 = 31, T6;
}

impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 31.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Gets the lowercase ABI name of this register (e.g., `sp` for `x2`).
    pub fn abi_name(self) -> String {
        ABI_NAMES[usize::from(self)].to_lowercase()
    }

    /// Looks up a register by its ABI name (case-insensitive).
    ///
    /// `fp` is accepted as an alias of `s0`.
    pub fn from_abi_name(name: &str) -> Option<Self> {
        let upper = name.to_uppercase();
        if upper == "FP" {
            return Some(reg_consts::S0);
        }

        ABI_NAMES.iter()
            .position(|&abi| abi == upper)
            .map(|n| Reg(n as u8))
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}", self.0)
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file in [`crate::sim::mem::RegFile`].
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = OperandErr;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=31 => Ok(Reg(value)),
            _      => Err(OperandErr::InvalidRegister(format!("x{value}"))),
        }
    }
}
impl FromStr for Reg {
    type Err = OperandErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(OperandErr::UnknownRegister(String::new()));
        }

        if let Some(digits) = s.strip_prefix(['x', 'X']) {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return digits.parse::<u8>().ok()
                    .filter(|&n| n < 32)
                    .map(Reg)
                    .ok_or_else(|| OperandErr::InvalidRegister(s.to_string()));
            }
        }

        Reg::from_abi_name(s)
            .ok_or_else(|| OperandErr::UnknownRegister(s.to_string()))
    }
}

/// Errors that can occur when resolving an operand token.
///
/// None of these are fatal. The simulator reports them as diagnostics
/// and continues with a default value (`x0` or `0`).
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum OperandErr {
    /// The immediate could not be read as a decimal or hex literal.
    BadImmediate(String),
    /// The register name is not a known ABI name.
    UnknownRegister(String),
    /// The register has the `xN` form, but `N` is not 0-31.
    InvalidRegister(String),
    /// The memory operand does not have the `imm(reg)` shape.
    MalformedMemOperand(String),
    /// The operand at the given (zero-based) position is missing.
    MissingOperand(usize),
}
impl std::fmt::Display for OperandErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperandErr::BadImmediate(s)        => write!(f, "bad immediate: {s}"),
            OperandErr::UnknownRegister(s)     => write!(f, "unknown register name: {s}"),
            OperandErr::InvalidRegister(s)     => write!(f, "invalid register: {s}"),
            OperandErr::MalformedMemOperand(s) => write!(f, "malformed memory operand: {s}"),
            OperandErr::MissingOperand(n)      => write!(f, "missing operand {}", n + 1),
        }
    }
}
impl std::error::Error for OperandErr {}
impl crate::err::Error for OperandErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            OperandErr::BadImmediate(_)        => Some("an immediate is a decimal literal (e.g., -12) or a hex literal (e.g., 0x7F)".into()),
            OperandErr::UnknownRegister(_)     => Some("registers are x0-x31 or one of the ABI names (zero, ra, sp, gp, tp, t0-t6, s0-s11, a0-a7)".into()),
            OperandErr::InvalidRegister(_)     => Some("this must be x0-x31".into()),
            OperandErr::MalformedMemOperand(_) => Some("memory operands are written as offset(register), e.g., 8(sp)".into()),
            OperandErr::MissingOperand(_)      => None,
        }
    }
}

/// Parses an immediate token.
///
/// The token can be:
/// - hex, prefixed with `0x` or `0X` (e.g., `0x7F`, `-0x10`)
/// - decimal (e.g., `12`, `-2048`)
///
/// Digits accumulate with 32-bit wrapping, so literals that do not fit in 32 bits
/// wrap instead of failing. An empty token is `0`.
///
/// ```
/// use rv32i_stepper::ast::parse_imm;
///
/// assert_eq!(parse_imm("42"), Ok(42));
/// assert_eq!(parse_imm("-0x10"), Ok(-16));
/// assert_eq!(parse_imm("0xFFFFFFFF"), Ok(-1));
/// assert_eq!(parse_imm(""), Ok(0));
/// assert!(parse_imm("12abc").is_err());
/// ```
pub fn parse_imm(tok: &str) -> Result<i32, OperandErr> {
    if tok.is_empty() {
        return Ok(0);
    }

    let (neg, unsigned) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok.strip_prefix('+').unwrap_or(tok)),
    };
    let (radix, digits) = match unsigned.strip_prefix("0x").or_else(|| unsigned.strip_prefix("0X")) {
        Some(hex) => (16, hex),
        None => (10, unsigned),
    };
    if digits.is_empty() {
        return Err(OperandErr::BadImmediate(tok.to_string()));
    }

    let mut acc = 0u32;
    for c in digits.chars() {
        let d = c.to_digit(radix)
            .ok_or_else(|| OperandErr::BadImmediate(tok.to_string()))?;
        acc = acc.wrapping_mul(radix).wrapping_add(d);
    }

    let value = acc as i32;
    Ok(if neg { value.wrapping_neg() } else { value })
}

/// Sign-extends the low 12 bits of a value.
///
/// ```
/// use rv32i_stepper::ast::sext12;
///
/// assert_eq!(sext12(0x7FF), 2047);
/// assert_eq!(sext12(0x800), -2048);
/// assert_eq!(sext12(0xFFF), -1);
/// assert_eq!(sext12(4096 + 5), 5);
/// ```
pub fn sext12(value: i32) -> i32 {
    (value << 20) >> 20
}

/// Splits a memory operand of the form `imm(reg)` into its offset and register tokens.
///
/// The offset token may be empty (`(sp)` is the same as `0(sp)`).
///
/// ```
/// use rv32i_stepper::ast::parse_mem_operand;
///
/// assert_eq!(parse_mem_operand("-4(sp)"), Ok(("-4", "sp")));
/// assert_eq!(parse_mem_operand("(a0)"), Ok(("", "a0")));
/// assert!(parse_mem_operand("sp").is_err());
/// ```
pub fn parse_mem_operand(tok: &str) -> Result<(&str, &str), OperandErr> {
    let malformed = || OperandErr::MalformedMemOperand(tok.to_string());

    let open = tok.find('(').ok_or_else(malformed)?;
    let close = tok[open..].find(')').map(|i| open + i).ok_or_else(malformed)?;

    Ok((tok[..open].trim(), tok[open + 1..close].trim()))
}

macro_rules! opcode_enum {
    ($($op:ident),+ $(,)?) => {
        /// An instruction mnemonic.
        ///
        /// This covers the supported RV32I subset, `MUL`/`DIV`/`REM`,
        /// `ECALL`, and the pseudo-instructions the loader expands.
        /// Any other mnemonic is kept verbatim as [`Opcode::Other`].
        ///
        /// Parsing is case-insensitive.
        #[derive(Debug, PartialEq, Eq, Hash, Clone)]
        pub enum Opcode {
            $(
                #[allow(missing_docs)]
                $op
            ),+,
            /// An unrecognized mnemonic (upper-cased).
            Other(String)
        }

        impl FromStr for Opcode {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match &*s.to_uppercase() {
                    $(stringify!($op) => Ok(Self::$op)),*,
                    other => Ok(Self::Other(other.to_string()))
                }
            }
        }

        impl std::fmt::Display for Opcode {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$op => f.write_str(stringify!($op))),*,
                    Self::Other(op) => f.write_str(op)
                }
            }
        }
    };
}
opcode_enum! {
    ADD, SUB, MUL, DIV, REM, AND, OR, XOR, SLL, SRL, SRA, SLT, SLTU,
    ADDI, SLTI, SLTIU, XORI, ORI, ANDI, SLLI, SRLI, SRAI,
    LB, LBU, LH, LHU, LW, SB, SH, SW,
    BEQ, BNE, BLT, BGE, BLTU, BGEU,
    JAL, JALR, LUI, AUIPC, LA, ECALL,
    MV, LI, J, JR, RET, NOP
}

impl Opcode {
    /// Whether this opcode is a pseudo-instruction that the loader rewrites
    /// into real instructions.
    ///
    /// `LA` is not included, as it is kept as-is and resolved when executed.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Opcode::MV | Opcode::LI | Opcode::J | Opcode::JR | Opcode::RET | Opcode::NOP)
    }
}

/// A single canonical instruction.
///
/// The operands are kept as raw tokens (e.g., `"a0"`, `"-4(sp)"`, `"LOOP"`)
/// and are only resolved when the instruction is executed.
///
/// ## Examples
///
/// ```
/// use rv32i_stepper::ast::{Instruction, Opcode};
///
/// let instr = Instruction::new(Opcode::ADDI, ["x1", "x0", "5"], 3);
/// assert_eq!(instr.to_string(), "ADDI x1, x0, 5");
/// assert_eq!(instr.arg(2), Some("5"));
/// assert_eq!(instr.arg(3), None);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Instruction {
    /// The opcode.
    pub op: Opcode,
    /// The raw operand tokens, in order.
    pub args: Vec<String>,
    /// The zero-based source line this instruction came from.
    pub line: usize,
}
impl Instruction {
    /// Creates a new instruction.
    pub fn new<S: Into<String>>(op: Opcode, args: impl IntoIterator<Item=S>, line: usize) -> Self {
        Self {
            op,
            args: args.into_iter().map(Into::into).collect(),
            line,
        }
    }

    /// Gets the operand token at the given position.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(|s| &**s)
    }
}
impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op)?;
        for (i, arg) in self.args.iter().enumerate() {
            match i {
                0 => write!(f, " {arg}")?,
                _ => write!(f, ", {arg}")?,
            }
        }
        Ok(())
    }
}
