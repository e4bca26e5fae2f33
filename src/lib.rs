//! An RV32I text-assembly loader and single-step interpreter.
//!
//! This is meant as the core of a teaching/debugging tool:
//! a front-end loads source text, steps through it one instruction at a time,
//! and renders the machine state between steps.
//!
//! # Usage
//!
//! Source is assembled into a [`Program`](asm::Program) of canonical instructions
//! (pseudo-instructions like `li` and `ret` are expanded, labels are collected):
//! ```
//! use rv32i_stepper::asm::assemble;
//!
//! let code = [
//!     "main:",
//!     "    li   a0, 100000   # LUI + ADDI",
//!     "    addi a0, a0, 1",
//!     "    ecall",
//! ];
//! let (program, diagnostics) = assemble(&code);
//!
//! assert_eq!(program.len(), 4);
//! assert_eq!(program.symbol_table().lookup_label("main"), Some(0));
//! assert_eq!(diagnostics.len(), 1); // only the load summary
//! ```
//!
//! A program is executed with the simulator, which can also assemble for you:
//! ```
//! use rv32i_stepper::sim::Simulator;
//! use rv32i_stepper::ast::reg_consts::A0;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_source("li a0, 100000\naddi a0, a0, 1\necall");
//!
//! while simulator.step() {}
//! assert_eq!(simulator.reg_file[A0], 100001);
//!
//! println!("{}", simulator.dump_state());
//! ```
//!
//! Loading and stepping never fail. Malformed source degrades to no-ops and
//! is reported through [diagnostics](diag). See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod diag;
pub mod err;
