//! Linking object units into a flat memory image.
//!
//! The linker ([`link`]) takes the assembled [`ObjectUnit`]s in input-file
//! order and produces a [`LinkedImage`]:
//!
//! 1. Sections are laid out: each unit's buffers are concatenated per
//!    section (honoring their alignment), and the sections are placed at
//!    the base addresses from [`Config`] in the order
//!    text < data < rodata < bss.
//! 2. A global symbol table is built from the `.globl` exports of every
//!    unit (plus the libc entry points); local symbols stay per-file and
//!    shadow globals within their file.
//! 3. Every instruction's immediates are evaluated (see [`eval`]) against
//!    its own PC and originating file, then packed into its encoding.
//! 4. Deferred data expressions (`.word sym`, `.word a - b`, ...) are
//!    evaluated and stored little-endian.
//!
//! The resulting image is consumed in-process by the simulator.

pub(crate) mod eval;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::Range;

use crate::asm::{ObjectUnit, SymValue};
use crate::ast::asm::{AsmInstr, Section};
use crate::ast::sim::{IFunct, SimInstr};
use crate::ast::{Imm, RelKind};
use crate::cfg::Config;
use crate::err::ErrSpan;
use crate::sim::libc;
use eval::{Evaluator, PcrelSite, SymAddr};

/// Kinds of errors that can occur from linking.
///
/// See [`LinkErr`] for this error type with file/span information included.
#[derive(Debug, PartialEq, Clone)]
pub enum LinkErrKind {
    /// A symbol was referenced but never defined.
    UnknownSymbol(String),
    /// The same global symbol was defined in more than one file
    /// (or collides with a libc entry point).
    DuplicateGlobal(String),
    /// An evaluated immediate does not fit its instruction field
    /// (or data width).
    ImmediateOutOfRange(i64),
    /// A branch or jump displacement is odd.
    UnalignedBranchTarget(i64),
    /// The laid-out sections overlap.
    SectionOverlap(Section, Section),
    /// The image does not fit within the configured memory size.
    ImageTooLarge,
    /// No global `main` symbol was found.
    MissingEntry,
    /// `.equ` definitions form a cycle.
    CircularDefinition,
    /// A `%pcrel_lo` operand does not name a label on an `auipc` carrying
    /// a `%pcrel_hi`.
    PcrelLoWithoutHi,
}
impl std::fmt::Display for LinkErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSymbol(name)      => write!(f, "unknown symbol \"{name}\""),
            Self::DuplicateGlobal(name)    => write!(f, "global symbol \"{name}\" is defined multiple times"),
            Self::ImmediateOutOfRange(v)   => write!(f, "immediate value {v} does not fit the instruction field"),
            Self::UnalignedBranchTarget(v) => write!(f, "branch target offset {v} is not a multiple of 2"),
            Self::SectionOverlap(a, b)     => write!(f, "section {a} overlaps section {b}"),
            Self::ImageTooLarge            => f.write_str("linked image does not fit in guest memory"),
            Self::MissingEntry             => f.write_str("no main function found"),
            Self::CircularDefinition       => f.write_str("symbol definition depends on itself"),
            Self::PcrelLoWithoutHi         => f.write_str("%pcrel_lo operand does not name a %pcrel_hi site"),
        }
    }
}

/// Error from linking.
#[derive(Debug)]
pub struct LinkErr {
    /// The kind of error.
    pub kind: LinkErrKind,
    /// The input file (by index) the error is associated with, if any.
    pub file: Option<usize>,
    /// The span in that file's source, if any.
    pub span: Option<ErrSpan>,
}
impl LinkErr {
    pub(crate) fn bare(kind: LinkErrKind) -> Self {
        LinkErr { kind, file: None, span: None }
    }
    pub(crate) fn at(kind: LinkErrKind, file: usize, span: Range<usize>) -> Self {
        LinkErr { kind, file: Some(file), span: Some(span.into()) }
    }
}
impl std::fmt::Display for LinkErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for LinkErr {}
impl crate::err::Error for LinkErr {
    fn span(&self) -> Option<ErrSpan> {
        self.span.clone()
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            LinkErrKind::UnknownSymbol(_)       => Some("define the symbol, or export it with .globl from the file that defines it".into()),
            LinkErrKind::DuplicateGlobal(_)     => Some("only one file may define a given .globl symbol".into()),
            LinkErrKind::ImmediateOutOfRange(_) => Some("move the target closer, or load the value through lui/auipc".into()),
            LinkErrKind::MissingEntry           => Some("define a global main: `.globl main` with a `main:` label".into()),
            LinkErrKind::SectionOverlap(..)     => Some("move the section base addresses apart".into()),
            LinkErrKind::PcrelLoWithoutHi       => Some("%pcrel_lo must reference the label of the auipc carrying the matching %pcrel_hi".into()),
            _ => None,
        }
    }
}

/// One contiguous, addressed chunk of the linked image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The absolute address of the first byte.
    pub start: u32,
    /// The segment contents.
    pub bytes: Vec<u8>,
}
impl Segment {
    /// One past the last address of this segment.
    pub fn end(&self) -> u32 {
        self.start + self.bytes.len() as u32
    }
}

/// The fully linked program image.
///
/// All symbols are resolved and all instructions encoded; the simulator
/// copies the segments into guest memory and starts at [`LinkedImage::entry`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedImage {
    /// The text segment.
    pub text: Segment,
    /// The data segment.
    pub data: Segment,
    /// The rodata segment.
    pub rodata: Segment,
    /// The absolute start of bss.
    pub bss_start: u32,
    /// The size of bss in bytes (no bytes are stored).
    pub bss_size: u32,
    /// Absolute addresses of all global symbols (including the libc
    /// entry points).
    pub position_table: HashMap<String, u32>,
    /// The entry point: the address of `main`.
    pub entry: u32,
}
impl LinkedImage {
    /// One past the last address of bss (where the heap begins).
    pub fn bss_end(&self) -> u32 {
        self.bss_start + self.bss_size
    }

    /// Renders the section placement table printed under `--detail`.
    pub fn layout_report(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "{:=^80}", " Section details ");
        let mut section = |name: &str, start: u32, end: u32| {
            let _ = writeln!(out, "Section {name:<8} at [{start:x}, {end:x})");
        };
        section("text", self.text.start, self.text.end());
        section("data", self.data.start, self.data.end());
        section("rodata", self.rodata.start, self.rodata.end());
        section("bss", self.bss_start, self.bss_end());
        let _ = writeln!(out, "{:=^80}", "");
        out
    }
}

/// The canonical nop word, used to pad text between units.
const NOP: u32 = 0x0000_0013;

/// Links the assembled units into a flat image.
///
/// Units are laid out in the order given, which is the input-file order.
/// See the [module docs](self) for the steps involved.
pub fn link(units: &[ObjectUnit], config: &Config) -> Result<LinkedImage, LinkErr> {
    let bases = &config.section_bases;

    // --- section layout ---
    // `starts[i][s]` is the absolute address of unit i's part of section s.
    let mut starts = vec![[0u32; 4]; units.len()];

    fn lay_out(units: &[ObjectUnit], starts: &mut [[u32; 4]], section: Section, base: u32) -> Vec<u8> {
        let mut bytes: Vec<u8> = vec![];
        for (i, unit) in units.iter().enumerate() {
            let buf = unit.section(section);
            let align = buf.align().max(1);

            // Pad the previous contents up to this unit's alignment.
            while (base + bytes.len() as u32) % align != 0 {
                let addr = base + bytes.len() as u32;
                if section == Section::Text && addr % 4 == 0 && align - (addr % align) >= 4 {
                    bytes.extend(NOP.to_le_bytes());
                } else {
                    bytes.push(0);
                }
            }

            starts[i][section as usize] = base + bytes.len() as u32;
            bytes.extend_from_slice(buf.bytes());
        }
        bytes
    }

    let mut text = Segment { start: bases.text, bytes: lay_out(units, &mut starts, Section::Text, bases.text) };
    let mut data = Segment { start: bases.data, bytes: lay_out(units, &mut starts, Section::Data, bases.data) };
    let mut rodata = Segment { start: bases.rodata, bytes: lay_out(units, &mut starts, Section::Rodata, bases.rodata) };

    let mut bss_size = 0u32;
    for (i, unit) in units.iter().enumerate() {
        let buf = unit.section(Section::Bss);
        bss_size = bss_size.next_multiple_of(buf.align().max(1));
        starts[i][Section::Bss as usize] = bases.bss + bss_size;
        bss_size += buf.size();
    }

    // Sections must sit in order without overlapping, and the whole image
    // must leave room for the stack at the top of memory.
    if text.end() > data.start {
        return Err(LinkErr::bare(LinkErrKind::SectionOverlap(Section::Text, Section::Data)));
    }
    if data.end() > rodata.start {
        return Err(LinkErr::bare(LinkErrKind::SectionOverlap(Section::Data, Section::Rodata)));
    }
    if rodata.end() > bases.bss {
        return Err(LinkErr::bare(LinkErrKind::SectionOverlap(Section::Rodata, Section::Bss)));
    }
    if bases.bss + bss_size > config.memory_size {
        return Err(LinkErr::bare(LinkErrKind::ImageTooLarge));
    }

    // --- symbol resolution ---
    let locals: Vec<HashMap<String, SymAddr>> = units.iter().enumerate()
        .map(|(i, unit)| {
            unit.symbols().iter()
                .map(|(name, def)| {
                    let value = match &def.value {
                        SymValue::Location { section, offset } => {
                            SymAddr::Addr(starts[i][*section as usize] + offset)
                        },
                        SymValue::Const(imm) => SymAddr::Const(imm.clone()),
                    };
                    (name.clone(), value)
                })
                .collect()
        })
        .collect();

    // Seed the globals with the libc entry points, then collect `.globl`s.
    // The sentinel file id never resolves to a local table.
    let mut globals: HashMap<String, (SymAddr, usize)> = libc::ROUTINES.iter()
        .enumerate()
        .map(|(index, routine)| {
            (routine.name.to_string(), (SymAddr::Addr(libc::trampoline_addr(index)), usize::MAX))
        })
        .collect();

    for (i, unit) in units.iter().enumerate() {
        for label in unit.globals() {
            let Some(value) = locals[i].get(&label.name) else {
                return Err(LinkErr::at(LinkErrKind::UnknownSymbol(label.name.clone()), i, label.span()));
            };
            match globals.entry(label.name.clone()) {
                Entry::Occupied(_) => {
                    return Err(LinkErr::at(LinkErrKind::DuplicateGlobal(label.name.clone()), i, label.span()));
                },
                Entry::Vacant(e) => {
                    e.insert((value.clone(), i));
                },
            }
        }
    }

    // --- %pcrel_hi site collection ---
    // %pcrel_lo chases its label to the auipc's PC and target, so every
    // site must be known before any instruction is encoded.
    let mut pcrel_sites: HashMap<u32, PcrelSite> = HashMap::new();
    for (i, unit) in units.iter().enumerate() {
        for item in unit.code() {
            if let AsmInstr::Auipc(_, Imm::Rel(RelKind::PcrelHi, inner)) = &item.instr {
                let pc = starts[i][item.section as usize] + item.offset;
                pcrel_sites.insert(pc, PcrelSite { file: i, target: (**inner).clone() });
            }
        }
    }

    // --- instruction encoding ---
    fn seg_of<'s>(
        text: &'s mut Segment,
        data: &'s mut Segment,
        rodata: &'s mut Segment,
        section: Section,
    ) -> &'s mut Segment {
        match section {
            Section::Text => text,
            Section::Data => data,
            Section::Rodata => rodata,
            Section::Bss => unreachable!("assembler rejects instructions and data in bss"),
        }
    }

    for (i, unit) in units.iter().enumerate() {
        for item in unit.code() {
            let pc = starts[i][item.section as usize] + item.offset;
            let ev = Evaluator {
                globals: &globals,
                locals: &locals,
                pcrel_sites: &pcrel_sites,
                file: i,
                pc,
            };

            let instr = encode_instr(&item.instr, pc, &ev, i, &item.span)?;
            let word = instr.encode().to_le_bytes();

            let seg = seg_of(&mut text, &mut data, &mut rodata, item.section);
            let at = (pc - seg.start) as usize;
            seg.bytes[at..at + 4].copy_from_slice(&word);
        }

        for reloc in unit.data_relocs() {
            let pos = starts[i][reloc.section as usize] + reloc.offset;
            let ev = Evaluator {
                globals: &globals,
                locals: &locals,
                pcrel_sites: &pcrel_sites,
                file: i,
                pc: pos,
            };
            let value = ev.eval(&reloc.value, &reloc.span)?;

            // The value must fit the width, as signed or unsigned.
            let fits = match reloc.width {
                1 => value <= 0xFF || value >= 0xFFFF_FF80,
                2 => value <= 0xFFFF || value >= 0xFFFF_8000,
                _ => true,
            };
            if !fits {
                return Err(LinkErr::at(LinkErrKind::ImmediateOutOfRange(i64::from(value as i32)), i, reloc.span.clone()));
            }

            let seg = seg_of(&mut text, &mut data, &mut rodata, reloc.section);
            let at = (pos - seg.start) as usize;
            let bytes = value.to_le_bytes();
            seg.bytes[at..at + usize::from(reloc.width)].copy_from_slice(&bytes[..usize::from(reloc.width)]);
        }
    }

    // --- entry and position table ---
    let position_table: HashMap<String, u32> = globals.iter()
        .filter_map(|(name, (value, _))| match value {
            SymAddr::Addr(addr) => Some((name.clone(), *addr)),
            SymAddr::Const(_) => None,
        })
        .collect();

    let Some(&entry) = position_table.get("main") else {
        return Err(LinkErr::bare(LinkErrKind::MissingEntry));
    };

    Ok(LinkedImage {
        text,
        data,
        rodata,
        bss_start: bases.bss,
        bss_size,
        position_table,
        entry,
    })
}

/// Evaluates an instruction's operands and converts it to its encodable
/// form, range-checking every immediate field.
fn encode_instr(
    instr: &AsmInstr,
    pc: u32,
    ev: &Evaluator<'_>,
    file: usize,
    span: &Range<usize>,
) -> Result<SimInstr, LinkErr> {
    let imm12 = |v: u32| -> Result<i32, LinkErr> {
        let v = v as i32;
        match (-0x800..0x800).contains(&v) {
            true => Ok(v),
            false => Err(LinkErr::at(LinkErrKind::ImmediateOutOfRange(i64::from(v)), file, span.clone())),
        }
    };
    let imm20 = |v: u32| -> Result<u32, LinkErr> {
        match v < (1 << 20) {
            true => Ok(v),
            false => Err(LinkErr::at(LinkErrKind::ImmediateOutOfRange(i64::from(v)), file, span.clone())),
        }
    };
    let shamt = |v: u32| -> Result<i32, LinkErr> {
        match v < 32 {
            true => Ok(v as i32),
            false => Err(LinkErr::at(LinkErrKind::ImmediateOutOfRange(i64::from(v)), file, span.clone())),
        }
    };
    let displacement = |target: u32, bits: u32| -> Result<i32, LinkErr> {
        let disp = target.wrapping_sub(pc) as i32;
        if disp % 2 != 0 {
            return Err(LinkErr::at(LinkErrKind::UnalignedBranchTarget(i64::from(disp)), file, span.clone()));
        }
        let bound = 1i32 << (bits - 1);
        match (-bound..bound).contains(&disp) {
            true => Ok(disp),
            false => Err(LinkErr::at(LinkErrKind::ImmediateOutOfRange(i64::from(disp)), file, span.clone())),
        }
    };

    match instr {
        AsmInstr::R(f, rd, rs1, rs2) => Ok(SimInstr::R(*f, *rd, *rs1, *rs2)),
        AsmInstr::I(f, rd, rs1, imm) => {
            let value = ev.eval(imm, span)?;
            let value = match f {
                IFunct::Slli | IFunct::Srli | IFunct::Srai => shamt(value)?,
                _ => imm12(value)?,
            };
            Ok(SimInstr::I(*f, *rd, *rs1, value))
        },
        AsmInstr::Load(f, rd, base, offset) => {
            Ok(SimInstr::Load(*f, *rd, *base, imm12(ev.eval(offset, span)?)?))
        },
        AsmInstr::Store(f, src, base, offset) => {
            Ok(SimInstr::Store(*f, *src, *base, imm12(ev.eval(offset, span)?)?))
        },
        AsmInstr::Br(f, rs1, rs2, target) => {
            let disp = displacement(ev.eval(target, span)?, 13)?;
            Ok(SimInstr::Br(*f, *rs1, *rs2, disp))
        },
        AsmInstr::Lui(rd, imm) => Ok(SimInstr::Lui(*rd, imm20(ev.eval(imm, span)?)?)),
        AsmInstr::Auipc(rd, imm) => Ok(SimInstr::Auipc(*rd, imm20(ev.eval(imm, span)?)?)),
        AsmInstr::Jal(rd, target) => {
            let disp = displacement(ev.eval(target, span)?, 21)?;
            Ok(SimInstr::Jal(*rd, disp))
        },
        AsmInstr::Jalr(rd, base, offset) => {
            Ok(SimInstr::Jalr(*rd, *base, imm12(ev.eval(offset, span)?)?))
        },
        AsmInstr::Li(..) | AsmInstr::La(..) | AsmInstr::Call(_) | AsmInstr::Tail(_) => {
            unreachable!("pseudo-instructions are expanded by the assembler")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;
    use crate::parse::parse_ast;

    fn link_srcs(srcs: &[&str]) -> Result<LinkedImage, LinkErr> {
        let units: Vec<_> = srcs.iter()
            .map(|src| assemble(parse_ast(src).unwrap()).unwrap())
            .collect();
        link(&units, &Config::default())
    }

    fn text_word(image: &LinkedImage, addr: u32) -> u32 {
        let at = (addr - image.text.start) as usize;
        u32::from_le_bytes(image.text.bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn test_entry_and_positions() {
        let image = link_srcs(&["
            .globl main
            .globl helper
            main: ret
            local: nop
            helper: ret
        "]).unwrap();

        assert_eq!(image.entry, 0x10000);
        assert_eq!(image.position_table["main"], 0x10000);
        assert_eq!(image.position_table["helper"], 0x10008);
        // Locals do not appear in the position table.
        assert!(!image.position_table.contains_key("local"));
        // Libc entry points do.
        assert!(image.position_table.contains_key("puts"));
    }

    #[test]
    fn test_missing_entry() {
        let err = link_srcs(&["start: ret"]).unwrap_err();
        assert!(matches!(err.kind, LinkErrKind::MissingEntry));
    }

    #[test]
    fn test_duplicate_global() {
        let err = link_srcs(&[
            ".globl main\nmain: ret",
            ".globl main\nmain: ret",
        ]).unwrap_err();
        assert!(matches!(err.kind, LinkErrKind::DuplicateGlobal(name) if name == "main"));
    }

    #[test]
    fn test_local_shadows_global() {
        // File 2 defines its own `shared`, which shadows the exported one
        // within that file.
        let image = link_srcs(&[
            ".globl main\n.globl shared\n.data\nshared: .word 1\n.text\nmain: ret",
            ".data\nshared: .word 2\nref: .word shared\n.text\nnop",
        ]).unwrap();

        // File 2's data starts after file 1's 4 bytes.
        let at = (0x20008 - image.data.start) as usize;
        let stored = u32::from_le_bytes(image.data.bytes[at..at + 4].try_into().unwrap());
        assert_eq!(stored, 0x20004, "local `shared` should shadow the global one");
    }

    #[test]
    fn test_branch_encoding_and_range() {
        let image = link_srcs(&["
            .globl main
            main:
                beq a0, a1, done
                nop
            done: ret
        "]).unwrap();

        // beq at 0x10000, done at 0x10008: displacement +8.
        let word = text_word(&image, 0x10000);
        assert_eq!(SimInstr::decode(word), Some(SimInstr::Br(
            crate::ast::sim::BFunct::Beq,
            crate::ast::reg_consts::A0,
            crate::ast::reg_consts::A1,
            8,
        )));
    }

    #[test]
    fn test_branch_out_of_range() {
        // A branch across a 0x2000-byte gap cannot fit 13 bits.
        let err = link_srcs(&["
            .globl main
            main: beq a0, a1, far
            .zero 8192
            far: ret
        "]).unwrap_err();
        assert!(matches!(err.kind, LinkErrKind::ImmediateOutOfRange(_)));
    }

    #[test]
    fn test_la_resolves_pcrel() {
        let image = link_srcs(&["
            .section .rodata
            msg: .asciz \"hi\"
            .text
            .globl main
            main: la a0, msg; ret
        "]).unwrap();

        // auipc a0, %pcrel_hi(msg) at 0x10000; addi a0, a0, %pcrel_lo at 0x10004.
        let auipc = SimInstr::decode(text_word(&image, 0x10000)).unwrap();
        let addi = SimInstr::decode(text_word(&image, 0x10004)).unwrap();

        let SimInstr::Auipc(rd, imm20) = auipc else { panic!("expected auipc, got {auipc}") };
        let SimInstr::I(IFunct::Addi, rd2, rs1, lo) = addi else { panic!("expected addi, got {addi}") };
        assert_eq!(rd, crate::ast::reg_consts::A0);
        assert_eq!((rd2, rs1), (rd, rd));

        // The pair reconstructs the address of msg relative to the auipc.
        let result = 0x10000u32
            .wrapping_add(imm20 << 12)
            .wrapping_add(lo as u32);
        assert_eq!(result, 0x30000, "la should compute the rodata address of msg");
    }

    #[test]
    fn test_word_dot_expression() {
        // A data word holding `target - .` placed one word before target
        // must read back 4.
        let image = link_srcs(&["
            .globl main
            main: ret
            .data
            .word target - .
            target: .word 0
        "]).unwrap();

        let at = 0;
        let stored = u32::from_le_bytes(image.data.bytes[at..at + 4].try_into().unwrap());
        assert_eq!(stored, 4);
    }

    #[test]
    fn test_section_overlap() {
        let mut config = Config::default();
        config.section_bases.data = config.section_bases.text; // collide
        let units = vec![assemble(parse_ast(".globl main\nmain: ret\n.data\n.word 1").unwrap()).unwrap()];
        let err = link(&units, &config).unwrap_err();
        assert!(matches!(err.kind, LinkErrKind::SectionOverlap(Section::Text, Section::Data)));
    }

    #[test]
    fn test_unit_concatenation_offsets() {
        let image = link_srcs(&[
            ".globl main\nmain: nop\nnop\n",
            ".globl second\nsecond: ret\n",
        ]).unwrap();

        // Second file's text follows the first (two words).
        assert_eq!(image.position_table["second"], 0x10008);
    }

    #[test]
    fn test_equ_across_files() {
        let image = link_srcs(&[
            ".globl main\n.globl BUFSZ\n.equ BUFSZ, 0x40\nmain: li a0, BUFSZ + 1; ret",
        ]).unwrap();

        // li of a symbolic value expands to lui+addi.
        let lui = SimInstr::decode(text_word(&image, 0x10000)).unwrap();
        let addi = SimInstr::decode(text_word(&image, 0x10004)).unwrap();
        let SimInstr::Lui(_, hi) = lui else { panic!("expected lui, got {lui}") };
        let SimInstr::I(IFunct::Addi, _, _, lo) = addi else { panic!("expected addi, got {addi}") };
        assert_eq!((hi << 12).wrapping_add(lo as u32), 0x41);
    }
}
