//! Assembling source lines into a loadable program.
//!
//! This module converts raw source lines into a [`Program`], which can be loaded
//! into the simulator and executed.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: The main function which parses each line, builds the label table,
//!     and expands pseudo-instructions.
//! - [`SymbolTable`]: a struct holding the label table (label name to byte address).
//! - [`Program`]: a struct holding the flat instruction sequence and its symbol table.
//!
//! Assembling never fails. Problems in the source are reported as [`Diagnostic`]s
//! and the offending line is recovered as well as possible (usually by keeping the
//! instruction so that it executes as a no-op).
//!
//! # Pseudo-instructions
//!
//! | Pseudo          | Expansion                                         |
//! |-----------------|---------------------------------------------------|
//! | `MV rd, rs`     | `ADDI rd, rs, 0`                                  |
//! | `LI rd, imm`    | `ADDI rd, x0, imm` if `imm` fits in 12 bits, otherwise `LUI rd, upper` + `ADDI rd, rd, lower` |
//! | `J label`       | `JAL x0, label`                                   |
//! | `JR rs`         | `JALR x0, 0(rs)`                                  |
//! | `RET`           | `JALR x0, 0(x1)`                                  |
//! | `NOP`           | `ADDI x0, x0, 0`                                  |
//!
//! `LA rd, label` is kept as-is and resolved when it executes.

use std::collections::BTreeMap;

use crate::ast::{parse_imm, Instruction, Opcode};
use crate::diag::{Diagnostic, DiagnosticKind};
use crate::parse::parse_line;

/// Assembles source lines into a [`Program`].
///
/// This also returns every diagnostic raised while assembling,
/// ending with a [`DiagnosticKind::ProgramLoaded`] summary.
///
/// # Example
/// ```
/// use rv32i_stepper::asm::assemble;
///
/// let src = [
///     "# count down",
///     "    li t0, 3",
///     "loop:",
///     "    addi t0, t0, -1",
///     "    bne t0, zero, loop",
///     "    ecall",
/// ];
/// let (program, diags) = assemble(&src);
///
/// assert_eq!(program.len(), 4);
/// assert_eq!(program.symbol_table().lookup_label("loop"), Some(4));
/// assert_eq!(program.rev_lookup_line(8), Some(4));
/// assert_eq!(diags.len(), 1); // just the summary
/// ```
pub fn assemble<S: AsRef<str>>(lines: &[S]) -> (Program, Vec<Diagnostic>) {
    let mut instrs = vec![];
    let mut sym = SymbolTable::new();
    let mut diags = vec![];

    for (line_no, src) in lines.iter().enumerate() {
        let line = parse_line(src.as_ref(), line_no);

        // labels point to the next instruction
        let addr = (instrs.len() * 4) as i32;
        for label in line.labels {
            if sym.insert(label.clone(), addr) {
                diags.push(Diagnostic::at_line(DiagnosticKind::DuplicateLabel(label), line_no));
            }
        }

        if let Some(instr) = line.instr {
            if let Opcode::Other(op) = &instr.op {
                diags.push(Diagnostic::at_line(DiagnosticKind::UnknownOpcode(op.clone()), line_no));
            }
            expand_pseudo(instr, &mut instrs, &mut diags);
        }
    }

    let program = Program::new(instrs, sym);
    diags.push(Diagnostic {
        kind: DiagnosticKind::ProgramLoaded { instructions: program.len(), labels: program.symbol_table().len() },
        line: None,
        pc: None
    });

    (program, diags)
}

/// Splits a 32-bit value into the `(upper, lower)` pair used by a `LUI` + `ADDI` sequence.
///
/// `lower` is the low 12 bits, sign-adjusted to `[-2048, 2047]`,
/// and `upper` is rounded so that `(upper << 12) + lower == value` (wrapping).
///
/// ```
/// use rv32i_stepper::asm::split_hi_lo;
///
/// assert_eq!(split_hi_lo(0x12345678), (0x12345, 0x678));
/// assert_eq!(split_hi_lo(0x00000FFF), (0x1, -1));
/// assert_eq!(split_hi_lo(-1), (0, -1));
/// ```
pub fn split_hi_lo(value: i32) -> (i32, i32) {
    let uvalue = value as u32;
    let upper = (uvalue.wrapping_add(0x800) >> 12) as i32;
    let lower = crate::ast::sext12(value);

    (upper, lower)
}

/// Expands a (possibly pseudo) instruction, pushing the real instructions into `out`.
///
/// Malformed pseudo-instructions are pushed unchanged (and later execute as no-ops).
fn expand_pseudo(instr: Instruction, out: &mut Vec<Instruction>, diags: &mut Vec<Diagnostic>) {
    let line = instr.line;
    let args = &instr.args;

    let expansion = match (&instr.op, args.len()) {
        (Opcode::MV, 2) => vec![
            Instruction::new(Opcode::ADDI, [&*args[0], &*args[1], "0"], line)
        ],
        (Opcode::LI, 2) => {
            let imm = parse_imm(&args[1]).unwrap_or_else(|e| {
                diags.push(Diagnostic::at_line(DiagnosticKind::Operand(e), line));
                0
            });

            if (-2048..=2047).contains(&imm) {
                vec![Instruction::new(Opcode::ADDI, [args[0].clone(), "x0".to_string(), imm.to_string()], line)]
            } else {
                let (upper, lower) = split_hi_lo(imm);
                vec![
                    Instruction::new(Opcode::LUI, [args[0].clone(), upper.to_string()], line),
                    Instruction::new(Opcode::ADDI, [args[0].clone(), args[0].clone(), lower.to_string()], line),
                ]
            }
        },
        (Opcode::J, 1) => vec![
            Instruction::new(Opcode::JAL, ["x0", &*args[0]], line)
        ],
        (Opcode::JR, 1) => vec![
            Instruction::new(Opcode::JALR, ["x0".to_string(), format!("0({})", args[0])], line)
        ],
        (Opcode::RET, _) => vec![
            Instruction::new(Opcode::JALR, ["x0", "0(x1)"], line)
        ],
        (Opcode::NOP, _) => vec![
            Instruction::new(Opcode::ADDI, ["x0", "x0", "0"], line)
        ],
        _ => vec![],
    };

    if !expansion.is_empty() {
        out.extend(expansion);
        return;
    }
    if instr.op.is_pseudo() {
        diags.push(Diagnostic::at_line(DiagnosticKind::MalformedPseudo(instr.to_string()), line));
    }
    out.push(instr);
}

/// The label table.
///
/// This maps each (case-sensitive) label to the byte address of the instruction
/// immediately following its definition. A label at the end of the program maps
/// to one past the last instruction.
///
/// If a label is defined more than once, the last definition is kept.
#[derive(PartialEq, Eq, Clone, Default)]
pub struct SymbolTable {
    label_map: BTreeMap<String, i32>,
}
impl SymbolTable {
    /// Creates a new, empty symbol table.
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts a label, returning whether it was already defined.
    fn insert(&mut self, label: String, addr: i32) -> bool {
        self.label_map.insert(label, addr).is_some()
    }

    /// Gets the address of a given label (if it exists).
    ///
    /// ## Example
    /// ```
    /// use rv32i_stepper::asm::assemble;
    ///
    /// let src = [
    ///     "LOOP:",
    ///     "    addi a0, a0, 1",
    ///     "    j LOOP",
    ///     "LOOP2:",
    ///     "    addi a0, a0, 2",
    ///     "    j LOOP2",
    /// ];
    /// let (program, _) = assemble(&src);
    /// let sym = program.symbol_table();
    ///
    /// assert_eq!(sym.lookup_label("LOOP"), Some(0));
    /// assert_eq!(sym.lookup_label("LOOP2"), Some(8));
    /// assert_eq!(sym.lookup_label("loop"), None);
    /// ```
    pub fn lookup_label(&self, label: &str) -> Option<i32> {
        self.label_map.get(label).copied()
    }

    /// Gets a label at a given address (if one exists).
    ///
    /// If several labels share the address, the alphabetically first one is returned.
    ///
    /// ## Example
    /// ```
    /// use rv32i_stepper::asm::assemble;
    ///
    /// let (program, _) = assemble(&["main: nop", "end:"]);
    /// let sym = program.symbol_table();
    ///
    /// assert_eq!(sym.rev_lookup_label(0), Some("main"));
    /// assert_eq!(sym.rev_lookup_label(4), Some("end"));
    /// assert_eq!(sym.rev_lookup_label(8), None);
    /// ```
    pub fn rev_lookup_label(&self, addr: i32) -> Option<&str> {
        let (label, _) = self.label_map.iter()
            .find(|&(_, &a)| a == addr)?;

        Some(label)
    }

    /// Gets an iterable of the mapping from labels to addresses (sorted by label).
    pub fn label_iter(&self) -> impl Iterator<Item=(&str, i32)> + '_ {
        self.label_map.iter()
            .map(|(label, &addr)| (&**label, addr))
    }

    /// The number of labels.
    pub fn len(&self) -> usize {
        self.label_map.len()
    }

    /// Whether there are no labels.
    pub fn is_empty(&self) -> bool {
        self.label_map.is_empty()
    }
}
impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.label_map.iter().map(|(k, &v)| (k, Addr(v))))
            .finish()
    }
}

/// An assembled program: a flat sequence of canonical instructions
/// (instruction `i` lives at byte address `4 * i`) plus its label table.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Program {
    instrs: Vec<Instruction>,
    sym: SymbolTable,
    /// First address of each source line.
    line_map: BTreeMap<usize, i32>,
}
impl Program {
    fn new(instrs: Vec<Instruction>, sym: SymbolTable) -> Self {
        let mut line_map = BTreeMap::new();
        for (i, instr) in instrs.iter().enumerate() {
            line_map.entry(instr.line).or_insert((i * 4) as i32);
        }

        Self { instrs, sym, line_map }
    }

    /// Creates a program with no instructions.
    pub fn empty() -> Self {
        Default::default()
    }

    /// The number of instructions (after pseudo-instruction expansion).
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Whether the program has no instructions.
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// All instructions, in address order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs
    }

    /// The label table of this program.
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.sym
    }

    /// Gets the instruction at the given byte address.
    ///
    /// This is `None` if the address is negative, not a multiple of 4,
    /// or past the end of the program.
    pub fn fetch(&self, pc: i32) -> Option<&Instruction> {
        if pc < 0 || pc % 4 != 0 {
            return None;
        }
        self.instrs.get((pc / 4) as usize)
    }

    /// Gets the source line of the instruction at a given address (if it exists).
    ///
    /// Every instruction emitted from the same pseudo-instruction maps back to the same line.
    ///
    /// ## Example
    /// ```
    /// use rv32i_stepper::asm::assemble;
    ///
    /// let src = [
    ///     "main:",                 // 0
    ///     "    li a0, 0x12345",    // 1 (LUI + ADDI)
    ///     "",                      // 2
    ///     "    ecall",             // 3
    /// ];
    /// let (program, _) = assemble(&src);
    ///
    /// assert_eq!(program.rev_lookup_line(0), Some(1));
    /// assert_eq!(program.rev_lookup_line(4), Some(1));
    /// assert_eq!(program.rev_lookup_line(8), Some(3));
    /// assert_eq!(program.rev_lookup_line(12), None);
    /// assert_eq!(program.rev_lookup_line(-4), None);
    /// ```
    pub fn rev_lookup_line(&self, pc: i32) -> Option<usize> {
        self.fetch(pc).map(|instr| instr.line)
    }

    /// Gets the address of the first instruction emitted from a given source line (if any).
    ///
    /// ## Example
    /// ```
    /// use rv32i_stepper::asm::assemble;
    ///
    /// let (program, _) = assemble(&["# header", "li a0, 5000", "ecall"]);
    ///
    /// assert_eq!(program.lookup_line(0), None);
    /// assert_eq!(program.lookup_line(1), Some(0));
    /// assert_eq!(program.lookup_line(2), Some(8));
    /// ```
    pub fn lookup_line(&self, line: usize) -> Option<i32> {
        self.line_map.get(&line).copied()
    }

    /// Gets an iterable of the mapping from source lines to the first address of each line.
    pub fn line_iter(&self) -> impl Iterator<Item=(usize, i32)> + '_ {
        self.line_map.iter()
            .map(|(&line, &addr)| (line, addr))
    }
}

/// Used for [`std::fmt::Debug`] purposes.
#[repr(transparent)]
struct Addr(i32);
impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Instruction, Opcode, OperandErr};
    use crate::diag::DiagnosticKind;

    use super::{assemble, split_hi_lo, Program};

    fn assemble_src(src: &str) -> (Program, Vec<DiagnosticKind>) {
        let lines: Vec<_> = src.lines().collect();
        let (program, diags) = assemble(&lines);
        (program, diags.into_iter().map(|d| d.kind).collect())
    }
    fn ops(program: &Program) -> Vec<Opcode> {
        program.instructions().iter()
            .map(|i| i.op.clone())
            .collect()
    }

    #[test]
    fn test_sym_basic() {
        let src = "
            A: addi x1, x0, 0
            andi x1, x1, 1
            C: addi x1, x1, 0
            D: lw x1, 0(x2)
            ecall
            ecall
            E: beq x0, x0, C
            B: jal ra, A
        ";

        let (program, _) = assemble_src(src);
        let sym = program.symbol_table();
        assert_eq!(sym.lookup_label("A"), Some(0));
        assert_eq!(sym.lookup_label("C"), Some(8));
        assert_eq!(sym.lookup_label("D"), Some(12));
        assert_eq!(sym.lookup_label("E"), Some(24));
        assert_eq!(sym.lookup_label("B"), Some(28));
        assert_eq!(sym.len(), 5);
    }

    #[test]
    fn test_label_positions() {
        // labels on their own line, stacked labels, and a trailing label
        let src = "
            start:
            first: second: nop
            ecall
            end:
        ";
        let (program, _) = assemble_src(src);
        let sym = program.symbol_table();
        assert_eq!(sym.lookup_label("start"), Some(0));
        assert_eq!(sym.lookup_label("first"), Some(0));
        assert_eq!(sym.lookup_label("second"), Some(0));
        assert_eq!(sym.lookup_label("end"), Some(8));
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_labels_count_expanded_instrs() {
        let src = "
            li a0, 0x12345678
            after: ecall
        ";
        let (program, _) = assemble_src(src);
        assert_eq!(ops(&program), [Opcode::LUI, Opcode::ADDI, Opcode::ECALL]);
        assert_eq!(program.symbol_table().lookup_label("after"), Some(8));
    }

    #[test]
    fn test_duplicate_label() {
        let src = "
            dup: nop
            dup: nop
        ";
        let (program, diags) = assemble_src(src);
        assert_eq!(program.symbol_table().lookup_label("dup"), Some(4));
        assert!(diags.contains(&DiagnosticKind::DuplicateLabel("dup".into())));
    }

    #[test]
    fn test_pseudo_expansion() {
        let (program, diags) = assemble_src("mv a0, a1\nj end\njr ra\nret\nnop\nla t0, end\nend: ecall");
        let expected = [
            Instruction::new(Opcode::ADDI, ["a0", "a1", "0"], 0),
            Instruction::new(Opcode::JAL, ["x0", "end"], 1),
            Instruction::new(Opcode::JALR, ["x0", "0(ra)"], 2),
            Instruction::new(Opcode::JALR, ["x0", "0(x1)"], 3),
            Instruction::new(Opcode::ADDI, ["x0", "x0", "0"], 4),
            Instruction::new(Opcode::LA, ["t0", "end"], 5),
            Instruction::new(Opcode::ECALL, Vec::<String>::new(), 6),
        ];
        assert_eq!(program.instructions(), expected);
        assert_eq!(diags, [DiagnosticKind::ProgramLoaded { instructions: 7, labels: 1 }]);
    }

    #[test]
    fn test_li_expansion() {
        for imm in [0, 1, -1, 2047, -2048] {
            let (program, _) = assemble_src(&format!("li t1, {imm}"));
            assert_eq!(program.instructions(), [
                Instruction::new(Opcode::ADDI, ["t1".to_string(), "x0".to_string(), imm.to_string()], 0)
            ]);
        }

        // hex is normalized to decimal
        let (program, _) = assemble_src("li t1, 0x10");
        assert_eq!(program.instructions()[0].args, ["t1", "x0", "16"]);

        let (program, _) = assemble_src("li t1, 2048");
        assert_eq!(program.instructions(), [
            Instruction::new(Opcode::LUI, ["t1", "1"], 0),
            Instruction::new(Opcode::ADDI, ["t1", "t1", "-2048"], 0),
        ]);

        let (program, _) = assemble_src("li t1, -2049");
        assert_eq!(program.instructions(), [
            Instruction::new(Opcode::LUI, ["t1", "1048575"], 0),
            Instruction::new(Opcode::ADDI, ["t1", "t1", "2047"], 0),
        ]);
    }

    #[test]
    fn test_split_hi_lo() {
        for value in [0, 1, -1, 2047, 2048, -2048, -2049, 0x7FFF_F800, i32::MAX, i32::MIN, 0x1234_5FFF] {
            let (upper, lower) = split_hi_lo(value);
            assert!((-2048..=2047).contains(&lower));
            assert!((0..=0xFFFFF).contains(&upper));
            assert_eq!((upper << 12).wrapping_add(lower), value, "{value:#x}");
        }
    }

    #[test]
    fn test_malformed() {
        let (program, diags) = assemble_src("li a0\nmv a0, a1, a2\nfence\nli a0, zz");
        assert_eq!(ops(&program), [
            Opcode::LI,
            Opcode::MV,
            Opcode::Other("FENCE".into()),
            Opcode::ADDI,
        ]);
        assert_eq!(diags, [
            DiagnosticKind::MalformedPseudo("LI a0".into()),
            DiagnosticKind::MalformedPseudo("MV a0, a1, a2".into()),
            DiagnosticKind::UnknownOpcode("FENCE".into()),
            DiagnosticKind::Operand(OperandErr::BadImmediate("zz".into())),
            DiagnosticKind::ProgramLoaded { instructions: 4, labels: 0 },
        ]);
        assert_eq!(program.instructions()[3].args, ["a0", "x0", "0"]);
    }

    #[test]
    fn test_line_map() {
        let src = "# comment\n\nmain:\n  li a0, 100000\n  ecall";
        let (program, _) = assemble_src(src);
        assert_eq!(program.line_iter().collect::<Vec<_>>(), [(3, 0), (4, 8)]);
        assert_eq!(program.rev_lookup_line(0), Some(3));
        assert_eq!(program.rev_lookup_line(4), Some(3));
        assert_eq!(program.rev_lookup_line(8), Some(4));
        assert_eq!(program.rev_lookup_line(2), None);
        assert_eq!(program.lookup_line(2), None);
    }

    #[test]
    fn test_label_iter() {
        let (program, _) = assemble_src("start:\n  li a0, 100000\nloop: addi a0, a0, -1\nEnd: ecall");
        let sym = program.symbol_table();

        // sorted by label, byte order
        assert_eq!(sym.label_iter().collect::<Vec<_>>(), [("End", 12), ("loop", 8), ("start", 0)]);
        assert_eq!(sym.len(), 3);
    }

    #[test]
    fn test_deterministic() {
        let src = "a: li t0, 99999\nb: beq t0, x0, a\nc: ecall";
        let (p1, d1) = assemble_src(src);
        let (p2, d2) = assemble_src(src);
        assert_eq!(p1, p2);
        assert_eq!(d1, d2);
    }
}
