//! Source-level statements.
//!
//! This module holds the AST produced by the parser:
//! - [`Stmt`]: one statement (its labels plus a directive or instruction)
//! - [`Directive`]: an assembler directive (e.g. `.word`, `.globl`, `.asciz`)
//! - [`AsmInstr`]: an instruction as written, with unresolved [`Imm`] operands
//!
//! Single-instruction pseudo-mnemonics (`mv`, `not`, `beqz`, `j`, `ret`, ...)
//! are normalized by the parser into their base instruction and do not appear
//! here. Pseudo-instructions that expand to *two* instructions (`li` with a
//! large value, `la`, `call`, `tail`) are kept as dedicated variants, since
//! their expansion needs the assembler's location counter.

use std::ops::Range;

use crate::ast::sim::{BFunct, IFunct, LFunct, RFunct, SFunct};
use crate::ast::{Imm, Label, Reg};

/// An output section of the linked image.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Section {
    /// Executable code (and any data placed among it).
    Text,
    /// Initialized writable data.
    Data,
    /// Initialized read-only data.
    Rodata,
    /// Zero-initialized data; only its size is recorded.
    Bss,
}
impl Section {
    /// All sections, in layout order.
    pub const ALL: [Section; 4] = [Section::Text, Section::Data, Section::Rodata, Section::Bss];
}
impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section::Text   => f.write_str("text"),
            Section::Data   => f.write_str("data"),
            Section::Rodata => f.write_str("rodata"),
            Section::Bss    => f.write_str("bss"),
        }
    }
}

/// One statement in an assembly source file.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stmt {
    /// The labels bound to this statement's location.
    /// Several labels may bind to the same offset.
    pub labels: Vec<Label>,
    /// The directive or instruction.
    pub kind: StmtKind,
    /// The span of the statement (not including its labels).
    pub span: Range<usize>
}

/// The content of a statement: either a directive or an instruction.
///
/// A label-only line produces a `Stmt` whose kind is [`StmtKind::Empty`];
/// its labels bind to the next emitted location.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum StmtKind {
    /// An assembler directive.
    Directive(Directive),
    /// An instruction.
    Instr(AsmInstr),
    /// Labels only; nothing is emitted.
    Empty,
}

/// An assembler directive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Directive {
    /// `.text`/`.data`/`.rodata`/`.bss` (or `.section <name>`): switch the
    /// current section.
    SetSection(Section),
    /// `.globl name`: export `name` to the global symbol table at link time.
    Global(Label),
    /// `.align n`/`.p2align n`: pad the current section to `2^n` bytes.
    /// Text pads with nops, other sections with zeroes; BSS only grows.
    Align(u32),
    /// `.byte`/`.half`/`.word v, ...`: emit little-endian values of the
    /// given width. Values may be link-time expressions.
    Emit {
        /// Width in bytes (1, 2, or 4).
        width: u8,
        /// The values, in source order.
        values: Vec<Imm>
    },
    /// `.ascii`/`.asciz`/`.string s`: emit the string's bytes;
    /// `nul` appends a trailing `\0` (`.asciz` and `.string`).
    Ascii {
        /// The decoded bytes of the string literal.
        text: Vec<u8>,
        /// Whether a trailing NUL byte is emitted.
        nul: bool
    },
    /// `.zero n`/`.space n`: emit `n` zero bytes (or grow BSS by `n`).
    Zero(u32),
    /// `.equ name, expr`: define a link-time constant symbol.
    Equ(Label, Imm),
}

/// An instruction as written in source, with unresolved immediates.
///
/// The variants mirror the encoding formats of [`SimInstr`]; the trailing
/// variants are the two-instruction pseudo-instructions that the assembler
/// expands once offsets are known.
///
/// [`SimInstr`]: crate::ast::sim::SimInstr
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AsmInstr {
    /// An R-format instruction: `op rd, rs1, rs2`.
    R(RFunct, Reg, Reg, Reg),
    /// An I-format arithmetic instruction: `op rd, rs1, imm`.
    I(IFunct, Reg, Reg, Imm),
    /// A load: `op rd, offset(base)`.
    Load(LFunct, Reg, Reg, Imm),
    /// A store: `op src, offset(base)`.
    Store(SFunct, Reg, Reg, Imm),
    /// A conditional branch. The target evaluates to an absolute address;
    /// the linker turns it into a PC-relative displacement.
    Br(BFunct, Reg, Reg, Imm),
    /// `lui rd, imm`: the operand is the raw 20-bit field
    /// (typically written as `%hi(sym)`).
    Lui(Reg, Imm),
    /// `auipc rd, imm`: the operand is the raw 20-bit field
    /// (typically written as `%pcrel_hi(sym)`).
    Auipc(Reg, Imm),
    /// `jal rd, target`: the target evaluates to an absolute address.
    Jal(Reg, Imm),
    /// `jalr rd, offset(base)`.
    Jalr(Reg, Reg, Imm),

    /// `li rd, imm` with a value not known to fit 12 bits:
    /// expands to `lui rd, %hi(imm); addi rd, rd, %lo(imm)`.
    Li(Reg, Imm),
    /// `la rd, addr`: expands to an `auipc`/`addi` pair against a
    /// synthesized label on the `auipc`.
    La(Reg, Imm),
    /// `call sym`: `la`-style expansion targeting `ra`.
    Call(Label),
    /// `tail sym`: `la`-style expansion through `t1`, not saving a
    /// return address.
    Tail(Label),
}

impl AsmInstr {
    /// The number of machine instructions this statement occupies.
    pub fn word_len(&self) -> u32 {
        match self {
            AsmInstr::Li(..)
            | AsmInstr::La(..)
            | AsmInstr::Call(_)
            | AsmInstr::Tail(_) => 2,
            _ => 1,
        }
    }
}
