//! Tokenizing RV32I assembly.
//!
//! This module holds the tokens that characterize one line of assembly ([`Token`]).
//! It is used by the parser to split a line into labels, an opcode, and operands.
//!
//! The lexer is deliberately loose: anything that is not whitespace, a comma,
//! a colon or a comment is one [`Token::Word`]. Whether a word is a valid register,
//! immediate or label is only decided when the instruction executes.

use logos::Logos;

/// A unit of information in one line of RV32I source code.
#[derive(Debug, Logos, PartialEq, Eq)]
#[logos(skip r"\s+")]
pub enum Token {
    /// A run of non-separator characters.
    ///
    /// This can be an opcode (`addi`), a register (`a0`, `x5`),
    /// an immediate (`-12`, `0x7F`), a memory operand (`8(sp)`),
    /// or a label (`LOOP`).
    #[regex(r"[^\s,:#]+", |lx| lx.slice().to_string())]
    Word(String),

    /// A colon, which ends a label definition.
    #[token(":")]
    Colon,

    /// A comma, which delineates operands of an instruction.
    #[token(",")]
    Comma,

    /// A comment, which starts with `#` and spans the remaining part of the line.
    #[regex(r"#.*")]
    Comment,
}
