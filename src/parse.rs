//! Parsing RV32I assembly lines.
//!
//! Assembly is processed one line at a time with [`parse_line`].
//! A line consists of (all optional):
//! - any number of label definitions (`LABEL:`),
//! - one instruction (an opcode followed by operands, separated by commas and/or whitespace),
//! - a comment (starting with `#`).
//!
//! ```
//! use rv32i_stepper::parse::parse_line;
//! use rv32i_stepper::ast::Opcode;
//!
//! let line = parse_line("start: main: addi a0, zero, 1  # a0 = 1", 0);
//! assert_eq!(line.labels, ["start", "main"]);
//!
//! let instr = line.instr.unwrap();
//! assert_eq!(instr.op, Opcode::ADDI);
//! assert_eq!(instr.args, ["a0", "zero", "1"]);
//! ```

pub mod lex;

use logos::Logos;

use crate::ast::{Instruction, Opcode};
use lex::Token;

/// The result of parsing one source line.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Line {
    /// Labels defined on this line, in order of appearance.
    pub labels: Vec<String>,
    /// The instruction on this line (if any).
    pub instr: Option<Instruction>,
}

/// Parses one line of assembly.
///
/// `line_no` is the zero-based line index and is recorded on the resulting [`Instruction`].
///
/// Every colon on the line ends a label definition, so the instruction consists of the
/// tokens after the last colon. Label text is taken verbatim (trimmed) from the source,
/// and empty labels (a lone `:`) are dropped. The opcode is upper-cased.
pub fn parse_line(src: &str, line_no: usize) -> Line {
    let mut labels = vec![];
    let mut words = vec![];
    let mut label_start = 0;

    for (token, span) in Token::lexer(src).spanned() {
        // every char is part of some token
        let Ok(token) = token else { continue };
        match token {
            Token::Word(w) => words.push(w),
            Token::Comma   => {},
            Token::Colon   => {
                let label = src[label_start..span.start].trim();
                if !label.is_empty() {
                    labels.push(label.to_string());
                }
                label_start = span.end;
                words.clear();
            },
            Token::Comment => break,
        }
    }

    let mut words = words.into_iter();
    let instr = words.next().map(|op| {
        Instruction::new(parse_opcode(&op), words, line_no)
    });

    Line { labels, instr }
}

fn parse_opcode(op: &str) -> Opcode {
    match op.parse::<Opcode>() {
        Ok(op) => op,
        Err(e) => match e {},
    }
}
