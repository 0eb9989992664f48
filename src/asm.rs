//! Assembling a source AST into a relocatable object unit.
//!
//! This module is used to convert one parsed source file (`Vec<`[`Stmt`]`>`)
//! into an [`ObjectUnit`]: per-section byte buffers, a local symbol table,
//! and the lists of instructions and data expressions that still need
//! link-time resolution.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: the main function, which assembles statements into an object unit
//! - [`ObjectUnit`]: the per-file result consumed by the linker
//! - [`SourceInfo`]: a helper for mapping byte offsets to lines for error reporting
//!
//! [`Stmt`]: crate::ast::asm::Stmt

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::Range;

use crate::ast::asm::{AsmInstr, Directive, Section, Stmt, StmtKind};
use crate::ast::sim::IFunct;
use crate::ast::{Imm, Label, RelKind};
use crate::err::ErrSpan;

/// Kinds of errors that can occur from assembling a source file.
///
/// See [`AsmErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmErrKind {
    /// The same label was defined twice within one file.
    DuplicateLabel(String),
    /// An initialized-data directive was used in `.bss`.
    DataInBss,
    /// An instruction was placed in `.bss`.
    InstrInBss,
    /// A `.byte`/`.half` literal does not fit its width.
    ValueOutOfRange(i64),
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateLabel(name) => write!(f, "label \"{name}\" was defined multiple times"),
            Self::DataInBss  => f.write_str("cannot place initialized data in .bss"),
            Self::InstrInBss => f.write_str("cannot place instructions in .bss"),
            Self::ValueOutOfRange(v) => write!(f, "value {v} does not fit the directive's width"),
        }
    }
}

/// Error from assembling a source file.
#[derive(Debug)]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The span in the source associated with this error.
    pub span: ErrSpan
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::DuplicateLabel(_) => Some("labels must be unique within a file; try renaming one of them".into()),
            AsmErrKind::DataInBss  => Some(".bss only reserves zeroed space; use .zero or .space, or move the data to .data".into()),
            AsmErrKind::InstrInBss => Some("switch back to .text before writing instructions".into()),
            AsmErrKind::ValueOutOfRange(_) => Some("the value must fit the directive's width as a signed or unsigned integer".into()),
        }
    }
}

/// The value a symbol is defined to.
#[derive(Debug, PartialEq, Clone)]
pub enum SymValue {
    /// A location within a section of this file.
    Location {
        /// The section the symbol is in.
        section: Section,
        /// The symbol's offset from the start of this file's
        /// portion of that section.
        offset: u32
    },
    /// A `.equ` constant, evaluated at link time.
    Const(Imm),
}

/// A symbol definition in a file's local symbol table.
#[derive(Debug, PartialEq, Clone)]
pub struct SymDef {
    /// The symbol's value.
    pub value: SymValue,
    /// Where the symbol was defined.
    pub span: Range<usize>
}

/// An instruction awaiting link-time encoding.
#[derive(Debug, PartialEq, Clone)]
pub struct CodeItem {
    /// The section the instruction was emitted into (normally text).
    pub section: Section,
    /// Offset of the instruction from the start of this file's
    /// portion of the section.
    pub offset: u32,
    /// The instruction, with unresolved immediates.
    pub instr: AsmInstr,
    /// The source span of the statement, for link-error reporting.
    pub span: Range<usize>
}

/// A data value awaiting link-time evaluation.
#[derive(Debug, PartialEq, Clone)]
pub struct DataReloc {
    /// The section the value was emitted into.
    pub section: Section,
    /// Offset of the value from the start of this file's
    /// portion of the section.
    pub offset: u32,
    /// Width of the value in bytes (1, 2, or 4).
    pub width: u8,
    /// The expression to evaluate.
    pub value: Imm,
    /// The source span of the value.
    pub span: Range<usize>
}

/// A growable section image within one object unit.
#[derive(Debug, PartialEq, Clone)]
pub struct SectionBuf {
    section: Section,
    /// The raw bytes. Always empty for BSS.
    bytes: Vec<u8>,
    /// The section size. Equal to `bytes.len()` except for BSS.
    size: u32,
    /// The largest alignment requested within this buffer.
    align: u32,
}
impl SectionBuf {
    fn new(section: Section) -> Self {
        // Text keeps instructions word-aligned across unit boundaries.
        let align = match section {
            Section::Text => 4,
            _ => 1,
        };
        SectionBuf { section, bytes: vec![], size: 0, align }
    }

    /// The bytes of this buffer (empty for BSS).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
    /// The size of this buffer in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }
    /// The strictest alignment requested within this buffer.
    pub fn align(&self) -> u32 {
        self.align
    }

    fn push_bytes(&mut self, data: &[u8]) {
        debug_assert_ne!(self.section, Section::Bss, "byte emission into BSS is rejected before this point");
        self.bytes.extend_from_slice(data);
        self.size += data.len() as u32;
    }

    /// Reserves `n` bytes of zeroes (for BSS, only the size grows).
    fn reserve(&mut self, n: u32) {
        if self.section != Section::Bss {
            self.bytes.resize(self.bytes.len() + n as usize, 0);
        }
        self.size += n;
    }

    /// Pads this buffer so its size is a multiple of `align` bytes.
    ///
    /// Text is padded with the canonical nop (`0x00000013`) where whole
    /// aligned words fit, and zeroes otherwise.
    fn pad_to(&mut self, align: u32) {
        self.align = self.align.max(align);
        if self.section == Section::Bss {
            self.size = self.size.next_multiple_of(align);
            return;
        }

        while self.size % align != 0 {
            if self.section == Section::Text && self.size % 4 == 0 && align - (self.size % align) >= 4 {
                self.push_bytes(&NOP_BYTES);
            } else {
                self.push_bytes(&[0]);
            }
        }
    }
}

/// The canonical nop (`addi zero, zero, 0`), used as text padding.
const NOP_BYTES: [u8; 4] = 0x0000_0013u32.to_le_bytes();

/// A single assembled source file, awaiting linking.
///
/// This holds the file's section buffers (with instruction and deferred-data
/// slots zero-filled), its local symbol table, and its `.globl` exports.
#[derive(Debug, PartialEq, Clone)]
pub struct ObjectUnit {
    sections: [SectionBuf; 4],
    code: Vec<CodeItem>,
    data_relocs: Vec<DataReloc>,
    symbols: HashMap<String, SymDef>,
    globals: Vec<Label>,
}
impl ObjectUnit {
    /// The buffer of the given section.
    pub fn section(&self, section: Section) -> &SectionBuf {
        &self.sections[section as usize]
    }
    /// The instructions of this unit, in emission order.
    pub fn code(&self) -> &[CodeItem] {
        &self.code
    }
    /// The deferred data values of this unit.
    pub fn data_relocs(&self) -> &[DataReloc] {
        &self.data_relocs
    }
    /// The local symbol table of this unit.
    pub fn symbols(&self) -> &HashMap<String, SymDef> {
        &self.symbols
    }
    /// The `.globl` declarations of this unit.
    pub fn globals(&self) -> &[Label] {
        &self.globals
    }
}

/// Assembles a parsed source file into an [`ObjectUnit`].
///
/// This walks the statements once, maintaining the current section and its
/// location counter: labels are bound to `(section, offset)`, directives
/// emit or reserve bytes, and instructions are recorded (with zero-filled
/// placeholder bytes) for the linker to encode. Two-instruction
/// pseudo-instructions are expanded here, so every recorded instruction
/// occupies exactly four bytes.
///
/// # Example
/// ```
/// use rv32_ensemble::parse::parse_ast;
/// use rv32_ensemble::asm::assemble;
/// use rv32_ensemble::ast::asm::Section;
///
/// let ast = parse_ast("
///     .data
///     value: .word 42
///     .text
///     main: ret
/// ").unwrap();
/// let unit = assemble(ast).unwrap();
///
/// assert_eq!(unit.section(Section::Data).size(), 4);
/// assert_eq!(unit.section(Section::Text).size(), 4);
/// ```
pub fn assemble(ast: Vec<Stmt>) -> Result<ObjectUnit, AsmErr> {
    Assembler::new().run(ast)
}

struct Assembler {
    unit: ObjectUnit,
    current: Section,
    /// Counter for labels synthesized by pcrel expansions.
    pcrel_counter: u32,
}

impl Assembler {
    fn new() -> Self {
        Assembler {
            unit: ObjectUnit {
                sections: Section::ALL.map(SectionBuf::new),
                code: vec![],
                data_relocs: vec![],
                symbols: HashMap::new(),
                globals: vec![],
            },
            current: Section::Text,
            pcrel_counter: 0,
        }
    }

    fn buf(&mut self) -> &mut SectionBuf {
        &mut self.unit.sections[self.current as usize]
    }

    fn define(&mut self, label: &Label, value: SymValue) -> Result<(), AsmErr> {
        match self.unit.symbols.entry(label.name.clone()) {
            Entry::Occupied(e) => {
                let spans = [e.get().span.clone(), label.span()];
                Err(AsmErr::new(AsmErrKind::DuplicateLabel(label.name.clone()), spans))
            },
            Entry::Vacant(e) => {
                e.insert(SymDef { value, span: label.span() });
                Ok(())
            }
        }
    }

    /// Creates a fresh local label bound to the current location.
    ///
    /// Used by `la`/`call`/`tail` expansion to give `%pcrel_lo` an anchor
    /// at the matching `auipc`.
    fn synth_pcrel_label(&mut self, span: Range<usize>) -> Label {
        let name = loop {
            let candidate = format!("@pcrel.{}", self.pcrel_counter);
            self.pcrel_counter += 1;
            if !self.unit.symbols.contains_key(&candidate) {
                break candidate;
            }
        };
        // The span is borrowed from the instruction being expanded,
        // so diagnostics point at the pseudo-instruction.
        let end = span.start + name.len();
        Label::new(name, span.start..end)
    }

    fn run(mut self, ast: Vec<Stmt>) -> Result<ObjectUnit, AsmErr> {
        for stmt in ast {
            // Labels bind to the current location, before the statement
            // itself emits anything.
            for label in &stmt.labels {
                let value = SymValue::Location {
                    section: self.current,
                    offset: self.buf().size,
                };
                self.define(label, value)?;
            }

            match stmt.kind {
                StmtKind::Empty => {},
                StmtKind::Directive(d) => self.run_directive(d, stmt.span)?,
                StmtKind::Instr(instr) => self.run_instr(instr, stmt.span)?,
            }
        }
        Ok(self.unit)
    }

    fn run_directive(&mut self, directive: Directive, span: Range<usize>) -> Result<(), AsmErr> {
        match directive {
            Directive::SetSection(section) => self.current = section,
            Directive::Global(label) => self.unit.globals.push(label),
            Directive::Align(n) => self.buf().pad_to(1 << n),
            Directive::Zero(n) => self.buf().reserve(n),
            Directive::Equ(label, value) => self.define(&label, SymValue::Const(value))?,
            Directive::Emit { width, values } => {
                if self.current == Section::Bss {
                    return Err(AsmErr::new(AsmErrKind::DataInBss, span));
                }
                for value in values {
                    match value.as_int() {
                        Some(v) => {
                            // Literals must fit the width, signed or unsigned.
                            let fits = match width {
                                1 => (-0x80..0x100).contains(&i64::from(v)),
                                2 => (-0x8000..0x1_0000).contains(&i64::from(v)),
                                _ => true,
                            };
                            if !fits {
                                return Err(AsmErr::new(AsmErrKind::ValueOutOfRange(i64::from(v)), span.clone()));
                            }
                            let bytes = v.to_le_bytes();
                            self.buf().push_bytes(&bytes[..usize::from(width)]);
                        },
                        None => {
                            let offset = self.buf().size;
                            self.unit.data_relocs.push(DataReloc {
                                section: self.current,
                                offset,
                                width,
                                value,
                                span: span.clone(),
                            });
                            self.buf().reserve(u32::from(width));
                        },
                    }
                }
            },
            Directive::Ascii { text, nul } => {
                if self.current == Section::Bss {
                    return Err(AsmErr::new(AsmErrKind::DataInBss, span));
                }
                self.buf().push_bytes(&text);
                if nul {
                    self.buf().push_bytes(&[0]);
                }
            },
        }
        Ok(())
    }

    fn run_instr(&mut self, instr: AsmInstr, span: Range<usize>) -> Result<(), AsmErr> {
        use crate::ast::reg_consts::{RA, T1, ZERO};

        if self.current == Section::Bss {
            return Err(AsmErr::new(AsmErrKind::InstrInBss, span));
        }

        let words = instr.word_len();
        let expanded: Vec<AsmInstr> = match instr {
            AsmInstr::Li(rd, imm) => vec![
                AsmInstr::Lui(rd, Imm::Rel(RelKind::Hi, Box::new(imm.clone()))),
                AsmInstr::I(IFunct::Addi, rd, rd, Imm::Rel(RelKind::Lo, Box::new(imm))),
            ],
            AsmInstr::La(rd, addr) => {
                let anchor = self.synth_pcrel_label(span.clone());
                let section = self.current;
                let offset = self.buf().size;
                self.define(&anchor, SymValue::Location { section, offset })?;
                vec![
                    AsmInstr::Auipc(rd, Imm::Rel(RelKind::PcrelHi, Box::new(addr))),
                    AsmInstr::I(IFunct::Addi, rd, rd, Imm::Rel(RelKind::PcrelLo, Box::new(Imm::Sym(anchor)))),
                ]
            },
            AsmInstr::Call(target) => {
                let anchor = self.synth_pcrel_label(span.clone());
                let section = self.current;
                let offset = self.buf().size;
                self.define(&anchor, SymValue::Location { section, offset })?;
                vec![
                    AsmInstr::Auipc(RA, Imm::Rel(RelKind::PcrelHi, Box::new(Imm::Sym(target)))),
                    AsmInstr::Jalr(RA, RA, Imm::Rel(RelKind::PcrelLo, Box::new(Imm::Sym(anchor)))),
                ]
            },
            AsmInstr::Tail(target) => {
                let anchor = self.synth_pcrel_label(span.clone());
                let section = self.current;
                let offset = self.buf().size;
                self.define(&anchor, SymValue::Location { section, offset })?;
                vec![
                    AsmInstr::Auipc(T1, Imm::Rel(RelKind::PcrelHi, Box::new(Imm::Sym(target)))),
                    AsmInstr::Jalr(ZERO, T1, Imm::Rel(RelKind::PcrelLo, Box::new(Imm::Sym(anchor)))),
                ]
            },
            other => vec![other],
        };
        debug_assert_eq!(expanded.len() as u32, words, "expansion length must match word_len");

        for instr in expanded {
            let offset = self.buf().size;
            self.unit.code.push(CodeItem {
                section: self.current,
                offset,
                instr,
                span: span.clone(),
            });
            self.buf().push_bytes(&[0; 4]);
        }
        Ok(())
    }
}

/// Struct holding the source string and contains helpers
/// to index lines and to query position information from a source string.
#[derive(PartialEq, Eq, Clone)]
pub struct SourceInfo {
    /// The source code.
    src: String,
    /// The index of each new line in source code.
    nl_indices: Vec<usize>
}
impl std::fmt::Debug for SourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceInfo")
            .field("nl_indices", &self.nl_indices)
            .finish_non_exhaustive()
    }
}
impl SourceInfo {
    /// Computes the source info from a given string.
    pub fn new(src: &str) -> Self {
        Self::from_string(src.to_string())
    }
    fn from_string(src: String) -> Self {
        // Index where each new line appears.
        let nl_indices: Vec<_> = src
            .match_indices('\n')
            .map(|(i, _)| i)
            .chain([src.len()])
            .collect();

        Self { src, nl_indices }
    }

    /// Returns the entire source.
    pub fn source(&self) -> &str {
        &self.src
    }

    /// Counts the number of lines in the source string.
    pub fn count_lines(&self) -> usize {
        self.nl_indices.len()
    }

    /// Gets the character range for the provided line, including any whitespace
    /// and the newline character.
    fn raw_line_span(&self, line: usize) -> Option<Range<usize>> {
        if !(0..self.count_lines()).contains(&line) {
            return None;
        };

        let start = match line {
            0 => 0,
            _ => self.nl_indices[line - 1] + 1
        };

        let eof = self.src.len();
        let end = match self.nl_indices.get(line) {
            Some(i) => (i + 1).min(eof), // incl NL, but don't go over EOF
            None => eof,
        };

        Some(start..end)
    }

    /// Gets the character range for the provided line, excluding any whitespace.
    ///
    /// This returns None if line is not in the interval `[0, number of lines)`.
    pub fn line_span(&self, line: usize) -> Option<Range<usize>> {
        let Range { mut start, mut end } = self.raw_line_span(line)?;

        // shift line span by trim
        let line = &self.src[start..end];
        let end_trimmed = line.trim_end();
        end -= line.len() - end_trimmed.len();

        let line = end_trimmed;
        start += line.len() - line.trim_start().len();

        Some(start..end)
    }

    /// Reads a line from source.
    ///
    /// This returns None if line is not in the interval `[0, number of lines)`.
    pub fn read_line(&self, line: usize) -> Option<&str> {
        self.line_span(line).map(|r| &self.src[r])
    }

    /// Gets the line number of the current position.
    fn get_line(&self, index: usize) -> usize {
        self.nl_indices.partition_point(|&start| start < index)
    }

    /// Calculates the line and character number for a given character index.
    ///
    /// If the index exceeds the length of the string,
    /// the line number is given as the last line and the character number
    /// is given as the number of characters after the start of the line.
    pub fn get_pos_pair(&self, index: usize) -> (usize, usize) {
        let lno = self.get_line(index);

        let Range { start: lstart, .. } = self.raw_line_span(lno)
            .or_else(|| self.raw_line_span(self.nl_indices.len()))
            .unwrap_or(0..0);
        let cno = index - lstart;
        (lno, cno)
    }
}
impl From<&'_ str> for SourceInfo {
    fn from(value: &'_ str) -> Self {
        Self::new(value)
    }
}
impl From<String> for SourceInfo {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_ast;

    fn assemble_src(src: &str) -> Result<ObjectUnit, AsmErr> {
        assemble(parse_ast(src).unwrap())
    }

    fn sym_location(unit: &ObjectUnit, name: &str) -> (Section, u32) {
        match unit.symbols().get(name) {
            Some(SymDef { value: SymValue::Location { section, offset }, .. }) => (*section, *offset),
            other => panic!("expected location symbol for {name}, got {other:?}"),
        }
    }

    #[test]
    fn test_label_offsets() {
        let unit = assemble_src("
            start:
                addi a0, a0, 1
                addi a0, a0, 2
            mid:
                ret
            .data
            value: .word 3
        ").unwrap();

        assert_eq!(sym_location(&unit, "start"), (Section::Text, 0));
        assert_eq!(sym_location(&unit, "mid"), (Section::Text, 8));
        assert_eq!(sym_location(&unit, "value"), (Section::Data, 0));
        assert_eq!(unit.section(Section::Text).size(), 12);
    }

    #[test]
    fn test_data_emission() {
        let unit = assemble_src(r#"
            .data
            .byte 1, 2
            .half 0x0304
            .word 0x05060708
            .asciz "ab"
        "#).unwrap();

        assert_eq!(unit.section(Section::Data).bytes(), [
            1, 2, 0x04, 0x03, 0x08, 0x07, 0x06, 0x05, b'a', b'b', 0,
        ]);
    }

    #[test]
    fn test_deferred_data() {
        let unit = assemble_src("
            .data
            .word some_symbol
        ").unwrap();

        assert_eq!(unit.section(Section::Data).size(), 4);
        assert_eq!(unit.data_relocs().len(), 1);
        assert_eq!(unit.data_relocs()[0].offset, 0);
        assert_eq!(unit.data_relocs()[0].width, 4);
    }

    #[test]
    fn test_align_pads_text_with_nops() {
        let unit = assemble_src("
            .byte 1
            .align 3
            ret
        ").unwrap();

        let bytes = unit.section(Section::Text).bytes();
        assert_eq!(bytes.len(), 12);
        // 1 data byte, zeroes to the word boundary, then a nop word.
        assert_eq!(&bytes[..4], [1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], NOP_BYTES);
        assert_eq!(unit.section(Section::Text).align(), 8);
    }

    #[test]
    fn test_bss_size_only() {
        let unit = assemble_src("
            .bss
            buf: .zero 13
            .align 2
            end_buf:
        ").unwrap();

        let bss = unit.section(Section::Bss);
        assert_eq!(bss.bytes(), &[] as &[u8]);
        assert_eq!(bss.size(), 16);
        assert_eq!(sym_location(&unit, "buf"), (Section::Bss, 0));
        assert_eq!(sym_location(&unit, "end_buf"), (Section::Bss, 16));
    }

    #[test]
    fn test_bss_rejects_data_and_instrs() {
        let err = assemble_src(".bss\n.word 1").unwrap_err();
        assert_eq!(err.kind, AsmErrKind::DataInBss);

        let err = assemble_src(".bss\nret").unwrap_err();
        assert_eq!(err.kind, AsmErrKind::InstrInBss);
    }

    #[test]
    fn test_duplicate_label() {
        let err = assemble_src("foo: ret\nfoo: ret").unwrap_err();
        assert!(matches!(err.kind, AsmErrKind::DuplicateLabel(name) if name == "foo"));
    }

    #[test]
    fn test_la_expansion() {
        let unit = assemble_src("main: la a0, msg; ret").unwrap();

        // la occupies two words; ret follows at offset 8.
        assert_eq!(unit.code().len(), 3);
        assert_eq!(unit.code()[0].offset, 0);
        assert_eq!(unit.code()[1].offset, 4);
        assert_eq!(unit.code()[2].offset, 8);
        assert!(matches!(unit.code()[0].instr, AsmInstr::Auipc(_, Imm::Rel(RelKind::PcrelHi, _))));
        assert!(matches!(unit.code()[1].instr, AsmInstr::I(IFunct::Addi, ..)));

        // The synthesized anchor binds to the auipc.
        let anchor = unit.symbols().iter()
            .find(|(name, _)| name.starts_with("@pcrel."))
            .expect("expected a synthesized pcrel anchor");
        assert_eq!(anchor.1.value, SymValue::Location { section: Section::Text, offset: 0 });
    }

    #[test]
    fn test_li_expansion() {
        let unit = assemble_src("li a0, 0x12345678").unwrap();
        assert_eq!(unit.code().len(), 2);
        assert!(matches!(unit.code()[0].instr, AsmInstr::Lui(_, Imm::Rel(RelKind::Hi, _))));
        assert!(matches!(unit.code()[1].instr, AsmInstr::I(IFunct::Addi, _, _, Imm::Rel(RelKind::Lo, _))));
    }

    #[test]
    fn test_equ() {
        let unit = assemble_src(".equ SIZE, 64\nli a0, SIZE").unwrap();
        assert!(matches!(
            unit.symbols().get("SIZE"),
            Some(SymDef { value: SymValue::Const(Imm::Int(64)), .. })
        ));
    }
}
