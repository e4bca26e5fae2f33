//! Resolving a text [`Instruction`] into an executable [`SimInstr`].
//!
//! Operands are only resolved when an instruction is about to execute,
//! because label addresses and register names are looked up against
//! the loaded program. Every problem found while resolving is recorded
//! (as a [`DiagnosticKind`]) and a default is used instead:
//! - an unknown or missing register resolves to `x0`,
//! - a bad or missing immediate resolves to `0`,
//! - a malformed or missing memory operand turns the instruction into a no-op,
//! - an unresolvable branch or jump target makes the instruction fall through.

use crate::asm::SymbolTable;
use crate::ast::reg_consts::{RA, X0};
use crate::ast::{parse_imm, parse_mem_operand, sext12, Instruction, Opcode, OperandErr, Reg};
use crate::diag::DiagnosticKind;

use super::mem::Width;

/// A register-register or register-immediate arithmetic operation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AluOp {
    #[allow(missing_docs)] Add,
    #[allow(missing_docs)] Sub,
    #[allow(missing_docs)] Mul,
    /// Signed division. Division by zero gives 0.
    Div,
    /// Signed remainder. Division by zero gives 0.
    Rem,
    #[allow(missing_docs)] And,
    #[allow(missing_docs)] Or,
    #[allow(missing_docs)] Xor,
    /// Shift left (by the low 5 bits of the second operand).
    Sll,
    /// Logical shift right (by the low 5 bits of the second operand).
    Srl,
    /// Arithmetic shift right (by the low 5 bits of the second operand).
    Sra,
    /// Signed less-than (1 or 0).
    Slt,
    /// Unsigned less-than (1 or 0).
    Sltu,
}
impl AluOp {
    /// Computes the result of this operation. All arithmetic wraps.
    ///
    /// ```
    /// use rv32i_stepper::sim::decode::AluOp;
    ///
    /// assert_eq!(AluOp::Add.apply(i32::MAX, 1), i32::MIN);
    /// assert_eq!(AluOp::Div.apply(7, 0), 0);
    /// assert_eq!(AluOp::Srl.apply(-1, 28), 0xF);
    /// assert_eq!(AluOp::Sltu.apply(1, -1), 1);
    /// ```
    pub fn apply(self, a: i32, b: i32) -> i32 {
        let shamt = (b & 0x1F) as u32;
        match self {
            AluOp::Add  => a.wrapping_add(b),
            AluOp::Sub  => a.wrapping_sub(b),
            AluOp::Mul  => a.wrapping_mul(b),
            AluOp::Div  => if b == 0 { 0 } else { a.wrapping_div(b) },
            AluOp::Rem  => if b == 0 { 0 } else { a.wrapping_rem(b) },
            AluOp::And  => a & b,
            AluOp::Or   => a | b,
            AluOp::Xor  => a ^ b,
            AluOp::Sll  => a << shamt,
            AluOp::Srl  => ((a as u32) >> shamt) as i32,
            AluOp::Sra  => a >> shamt,
            AluOp::Slt  => i32::from(a < b),
            AluOp::Sltu => i32::from((a as u32) < (b as u32)),
        }
    }
}

/// A branch condition.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BranchCond {
    #[allow(missing_docs)] Eq,
    #[allow(missing_docs)] Ne,
    /// Signed less-than.
    Lt,
    /// Signed greater-than-or-equal.
    Ge,
    /// Unsigned less-than.
    Ltu,
    /// Unsigned greater-than-or-equal.
    Geu,
}
impl BranchCond {
    /// Checks whether the branch is taken.
    pub fn check(self, a: i32, b: i32) -> bool {
        match self {
            BranchCond::Eq  => a == b,
            BranchCond::Ne  => a != b,
            BranchCond::Lt  => a < b,
            BranchCond::Ge  => a >= b,
            BranchCond::Ltu => (a as u32) < (b as u32),
            BranchCond::Geu => (a as u32) >= (b as u32),
        }
    }
}

/// A fully resolved instruction, ready to execute.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `rd = rs1 op rs2`
    Alu(AluOp, Reg, Reg, Reg),
    /// `rd = rs1 op imm`
    AluImm(AluOp, Reg, Reg, i32),
    /// `rd = mem[base + offset]`, sign- or zero-extended.
    Load {
        #[allow(missing_docs)] rd: Reg,
        #[allow(missing_docs)] base: Reg,
        #[allow(missing_docs)] offset: i32,
        #[allow(missing_docs)] width: Width,
        /// Whether the loaded value is sign-extended.
        signed: bool
    },
    /// `mem[base + offset] = rs` (truncated to the width).
    Store {
        #[allow(missing_docs)] rs: Reg,
        #[allow(missing_docs)] base: Reg,
        #[allow(missing_docs)] offset: i32,
        #[allow(missing_docs)] width: Width
    },
    /// If `cond(rs1, rs2)`, `PC += offset`. A `None` offset never branches.
    Branch(BranchCond, Reg, Reg, Option<i32>),
    /// `rd = PC + 4; PC = target`. A `None` target falls through without linking.
    Jal(Reg, Option<i32>),
    /// `rd = PC + 4; PC = (base + offset) & !1`
    Jalr(Reg, Reg, i32),
    /// `rd = imm << 12`
    Lui(Reg, i32),
    /// `rd = PC + (imm << 12)`
    Auipc(Reg, i32),
    /// `rd = address`. A `None` address does nothing.
    La(Reg, Option<i32>),
    /// Halts the simulator.
    Ecall,
    /// Does nothing.
    Nop,
}

/// A branch or jump target, before being made relative or absolute.
enum Target {
    /// The absolute address of a label.
    Label(i32),
    /// A literal offset.
    Literal(i32),
}

/// Operand resolver for a single instruction.
struct Decoder<'a> {
    instr: &'a Instruction,
    sym: &'a SymbolTable,
    issues: Vec<DiagnosticKind>,
}
impl<'a> Decoder<'a> {
    fn arg(&mut self, i: usize) -> Option<&'a str> {
        let arg = self.instr.arg(i);
        if arg.is_none() {
            self.issues.push(DiagnosticKind::Operand(OperandErr::MissingOperand(i)));
        }
        arg
    }

    fn reg(&mut self, i: usize) -> Reg {
        let Some(tok) = self.arg(i) else { return X0 };
        match tok.parse() {
            Ok(reg) => reg,
            Err(e) => {
                self.issues.push(DiagnosticKind::Operand(e));
                X0
            }
        }
    }

    fn imm_tok(&mut self, tok: &str) -> i32 {
        parse_imm(tok).unwrap_or_else(|e| {
            self.issues.push(DiagnosticKind::Operand(e));
            0
        })
    }

    fn imm(&mut self, i: usize) -> i32 {
        match self.instr.arg(i) {
            Some(tok) => self.imm_tok(tok),
            None => {
                self.issues.push(DiagnosticKind::Operand(OperandErr::MissingOperand(i)));
                0
            }
        }
    }

    /// Resolves an `imm(reg)` operand into `(base, sext12(imm))`.
    fn mem(&mut self, i: usize) -> Option<(Reg, i32)> {
        let Some(tok) = self.instr.arg(i) else {
            self.issues.push(DiagnosticKind::Operand(OperandErr::MissingOperand(i)));
            return None;
        };
        let (off, base) = match parse_mem_operand(tok) {
            Ok(parts) => parts,
            Err(e) => {
                self.issues.push(DiagnosticKind::Operand(e));
                return None;
            }
        };

        let offset = sext12(self.imm_tok(off));
        let base = match base.parse() {
            Ok(reg) => reg,
            Err(e) => {
                self.issues.push(DiagnosticKind::Operand(e));
                X0
            }
        };
        Some((base, offset))
    }

    fn target(&mut self, i: usize) -> Option<Target> {
        let sym = self.sym;
        let tok = self.arg(i)?;

        if let Some(addr) = sym.lookup_label(tok) {
            return Some(Target::Label(addr));
        }
        match parse_imm(tok) {
            Ok(off) => Some(Target::Literal(off)),
            Err(_) => {
                let label = tok.to_string();
                self.issues.push(DiagnosticKind::UnresolvedLabel(label));
                None
            }
        }
    }
}

impl SimInstr {
    /// Resolves the operands of an instruction located at `pc`.
    ///
    /// This also returns every problem found while resolving.
    /// Decoding never fails. Unsupported or malformed instructions become [`SimInstr::Nop`].
    ///
    /// ```
    /// use rv32i_stepper::asm::assemble;
    /// use rv32i_stepper::ast::reg_consts::{T0, ZERO};
    /// use rv32i_stepper::sim::decode::{BranchCond, SimInstr};
    ///
    /// let (program, _) = assemble(&["top: nop", "beq t0, zero, top"]);
    /// let instr = &program.instructions()[1];
    ///
    /// let (decoded, issues) = SimInstr::decode(instr, program.symbol_table(), 4);
    /// assert_eq!(decoded, SimInstr::Branch(BranchCond::Eq, T0, ZERO, Some(-4)));
    /// assert!(issues.is_empty());
    /// ```
    pub fn decode(instr: &Instruction, sym: &SymbolTable, pc: i32) -> (SimInstr, Vec<DiagnosticKind>) {
        let mut d = Decoder { instr, sym, issues: vec![] };

        let decoded = match &instr.op {
            Opcode::ADD  => alu(&mut d, AluOp::Add),
            Opcode::SUB  => alu(&mut d, AluOp::Sub),
            Opcode::MUL  => alu(&mut d, AluOp::Mul),
            Opcode::DIV  => alu(&mut d, AluOp::Div),
            Opcode::REM  => alu(&mut d, AluOp::Rem),
            Opcode::AND  => alu(&mut d, AluOp::And),
            Opcode::OR   => alu(&mut d, AluOp::Or),
            Opcode::XOR  => alu(&mut d, AluOp::Xor),
            Opcode::SLL  => alu(&mut d, AluOp::Sll),
            Opcode::SRL  => alu(&mut d, AluOp::Srl),
            Opcode::SRA  => alu(&mut d, AluOp::Sra),
            Opcode::SLT  => alu(&mut d, AluOp::Slt),
            Opcode::SLTU => alu(&mut d, AluOp::Sltu),

            Opcode::ADDI  => alu_imm(&mut d, AluOp::Add),
            Opcode::SLTI  => alu_imm(&mut d, AluOp::Slt),
            Opcode::SLTIU => alu_imm(&mut d, AluOp::Sltu),
            Opcode::XORI  => alu_imm(&mut d, AluOp::Xor),
            Opcode::ORI   => alu_imm(&mut d, AluOp::Or),
            Opcode::ANDI  => alu_imm(&mut d, AluOp::And),
            Opcode::SLLI  => alu_imm(&mut d, AluOp::Sll),
            Opcode::SRLI  => alu_imm(&mut d, AluOp::Srl),
            Opcode::SRAI  => alu_imm(&mut d, AluOp::Sra),

            Opcode::LB  => load(&mut d, Width::Byte, true),
            Opcode::LBU => load(&mut d, Width::Byte, false),
            Opcode::LH  => load(&mut d, Width::Half, true),
            Opcode::LHU => load(&mut d, Width::Half, false),
            Opcode::LW  => load(&mut d, Width::Word, true),
            Opcode::SB  => store(&mut d, Width::Byte),
            Opcode::SH  => store(&mut d, Width::Half),
            Opcode::SW  => store(&mut d, Width::Word),

            Opcode::BEQ  => branch(&mut d, BranchCond::Eq, pc),
            Opcode::BNE  => branch(&mut d, BranchCond::Ne, pc),
            Opcode::BLT  => branch(&mut d, BranchCond::Lt, pc),
            Opcode::BGE  => branch(&mut d, BranchCond::Ge, pc),
            Opcode::BLTU => branch(&mut d, BranchCond::Ltu, pc),
            Opcode::BGEU => branch(&mut d, BranchCond::Geu, pc),

            Opcode::JAL => {
                // `jal target` links into ra
                let (rd, t) = match instr.args.len() {
                    1 => (RA, 0),
                    _ => (d.reg(0), 1),
                };
                let target = d.target(t).map(|t| match t {
                    Target::Label(addr)  => addr,
                    Target::Literal(off) => pc.wrapping_add(off),
                });
                SimInstr::Jal(rd, target)
            },
            Opcode::JALR => match instr.args.len() {
                // jalr rs
                1 => SimInstr::Jalr(RA, d.reg(0), 0),
                // jalr rd, rs, imm
                3 => SimInstr::Jalr(d.reg(0), d.reg(1), sext12(d.imm(2))),
                // jalr rd, imm(rs) / jalr rd, rs
                _ => {
                    let rd = d.reg(0);
                    match instr.arg(1) {
                        Some(tok) if !tok.contains('(') => SimInstr::Jalr(rd, d.reg(1), 0),
                        _ => match d.mem(1) {
                            Some((base, offset)) => SimInstr::Jalr(rd, base, offset),
                            None => SimInstr::Nop,
                        }
                    }
                }
            },
            Opcode::LUI   => SimInstr::Lui(d.reg(0), d.imm(1)),
            Opcode::AUIPC => SimInstr::Auipc(d.reg(0), d.imm(1)),
            Opcode::LA => {
                let rd = d.reg(0);
                let addr = match d.arg(1) {
                    Some(label) => {
                        let label = label.to_string();
                        let addr = sym.lookup_label(&label);
                        if addr.is_none() {
                            d.issues.push(DiagnosticKind::UnresolvedLabel(label));
                        }
                        addr
                    },
                    None => None,
                };
                SimInstr::La(rd, addr)
            },
            Opcode::ECALL => SimInstr::Ecall,

            // Pseudo-instructions are expanded at load time,
            // so any left here were malformed (and already reported).
            Opcode::MV | Opcode::LI | Opcode::J | Opcode::JR | Opcode::RET | Opcode::NOP => SimInstr::Nop,
            Opcode::Other(_) => SimInstr::Nop,
        };

        (decoded, d.issues)
    }
}

fn alu(d: &mut Decoder, op: AluOp) -> SimInstr {
    SimInstr::Alu(op, d.reg(0), d.reg(1), d.reg(2))
}
fn alu_imm(d: &mut Decoder, op: AluOp) -> SimInstr {
    SimInstr::AluImm(op, d.reg(0), d.reg(1), sext12(d.imm(2)))
}
fn load(d: &mut Decoder, width: Width, signed: bool) -> SimInstr {
    let rd = d.reg(0);
    match d.mem(1) {
        Some((base, offset)) => SimInstr::Load { rd, base, offset, width, signed },
        None => SimInstr::Nop,
    }
}
fn store(d: &mut Decoder, width: Width) -> SimInstr {
    let rs = d.reg(0);
    match d.mem(1) {
        Some((base, offset)) => SimInstr::Store { rs, base, offset, width },
        None => SimInstr::Nop,
    }
}
fn branch(d: &mut Decoder, cond: BranchCond, pc: i32) -> SimInstr {
    let rs1 = d.reg(0);
    let rs2 = d.reg(1);
    let offset = d.target(2).map(|t| match t {
        Target::Label(addr)  => addr.wrapping_sub(pc),
        Target::Literal(off) => sext12(off),
    });
    SimInstr::Branch(cond, rs1, rs2, offset)
}
