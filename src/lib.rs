//! A RISC-V RV32I assembler, linker, and interpreter.
//!
//! This is a self-contained toolchain for running GNU-style RV32I assembly:
//! source files are parsed and assembled into relocatable units, linked
//! into a flat memory image, and interpreted against a simulated memory,
//! register file, and a small libc.
//!
//! # Usage
//!
//! To run assembly source, it must be parsed, assembled, and linked:
//! ```
//! use rv32_ensemble::parse::parse_ast;
//! use rv32_ensemble::asm::assemble;
//! use rv32_ensemble::link::link;
//! use rv32_ensemble::cfg::Config;
//!
//! let code = "
//!     .globl main
//!     main:
//!         li a0, 7
//!         li a1, 5
//!         sub a0, a0, a1
//!         ret
//! ";
//! let config = Config::default();
//!
//! let ast = parse_ast(code).unwrap();
//! let unit = assemble(ast).unwrap();
//! let image = link(&[unit], &config).unwrap();
//! ```
//!
//! Once an image has been linked, it can be executed with the simulator:
//! ```
//! # use rv32_ensemble::{parse::parse_ast, asm::assemble, link::link, cfg::Config};
//! use rv32_ensemble::sim::Simulator;
//!
//! # let config = Config::default();
//! # let ast = parse_ast(".globl main\nmain: li a0, 7; li a1, 5; sub a0, a0, a1; ret").unwrap();
//! # let image = link(&[assemble(ast).unwrap()], &config).unwrap();
//! let mut simulator = Simulator::new(&image, &config);
//! simulator.run().unwrap(); // <-- Result can be handled accordingly
//! assert_eq!(simulator.regs.exit_code(), 2);
//! ```
//!
//! Guest and host IO can be redirected through [`sim::io`] (e.g. to
//! capture a program's stdout in tests), and `--debug`-style tracing is
//! available through [`sim::debug`].
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod link;
pub mod sim;
pub mod cfg;
pub mod err;
