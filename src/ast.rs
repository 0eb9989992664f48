//! Components relating to the abstract syntax trees (ASTs)
//! used in representing assembly instructions.
//!
//! These components together are used to construct...
//! - [`asm::AsmInstr`] (a data structure holding an assembly source code instruction),
//! - [`asm::Directive`] (a data structure holding an assembly source code directive),
//! - and [`sim::SimInstr`] (a data structure holding an encodable machine instruction).

pub mod asm;
pub mod sim;

/// A register. Must be between 0 and 31.
///
/// A `Reg` can either be constructed by selecting a register from
/// [`reg_consts`], by using [`Reg::try_from`], or by parsing a register
/// name (either the numeric `x7` form or an ABI alias like `t2`).
///
/// ## Examples
///
/// ```text
/// add a0, a1, a2
///     ~~  ~~  ~~
/// lw t0, 8(sp)
///    ~~    ~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The hardwired zero register (`x0`).
    pub const ZERO: Reg = Reg(0);
    /// The return address register (`x1`).
    pub const RA: Reg = Reg(1);
    /// The stack pointer (`x2`).
    pub const SP: Reg = Reg(2);
    /// The global pointer (`x3`).
    pub const GP: Reg = Reg(3);
    /// The thread pointer (`x4`).
    pub const TP: Reg = Reg(4);
    /// Temporary register `t0` (`x5`).
    pub const T0: Reg = Reg(5);
    /// Temporary register `t1` (`x6`).
    pub const T1: Reg = Reg(6);
    /// Saved register / frame pointer `s0` (`x8`).
    pub const S0: Reg = Reg(8);
    /// Argument/return register `a0` (`x10`).
    pub const A0: Reg = Reg(10);
    /// Argument/return register `a1` (`x11`).
    pub const A1: Reg = Reg(11);
    /// Argument register `a2` (`x12`).
    pub const A2: Reg = Reg(12);
    /// Argument register `a7` (`x17`).
    pub const A7: Reg = Reg(17);
}

/// The ABI names of all 32 integer registers, in index order.
const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
    "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 31.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Parses a register name, accepting both the numeric form (`x0`-`x31`)
    /// and the ABI aliases (`zero`, `ra`, `sp`, `gp`, `tp`, `t0`-`t6`,
    /// `s0`-`s11`, `a0`-`a7`, and `fp` for `s0`).
    ///
    /// Returns `None` if the name is not a register.
    pub fn from_name(name: &str) -> Option<Reg> {
        if let Some(rest) = name.strip_prefix('x') {
            // Reject leading zeros and signs so that only x0..x31 match.
            if rest.len() > 1 && rest.starts_with('0') { return None; }
            let n: u8 = rest.parse().ok()?;
            return (n < 32).then_some(Reg(n));
        }
        if name == "fp" { return Some(Reg(8)); }
        ABI_NAMES.iter()
            .position(|&abi| abi == name)
            .map(|n| Reg(n as u8))
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(ABI_NAMES[usize::from(self.0)])
    }
}
impl From<Reg> for usize {
    // Used for indexing the register file in the simulator.
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = RegOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=31 => Ok(Reg(value)),
            _ => Err(RegOutOfRange(value)),
        }
    }
}

/// The error from calling [`Reg::try_from`] with a value above 31.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RegOutOfRange(pub u8);
impl std::fmt::Display for RegOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not a valid register number", self.0)
    }
}
impl std::error::Error for RegOutOfRange {}

/// A label (symbol reference or definition).
///
/// This struct stores the name of the label (accessible by the `name` field)
/// and the source code span indicating where the label is located in
/// assembly source code.
///
/// # Examples
/// ```text
/// loop:
/// ~~~~
///     addi a0, a0, 1
///     blt a0, a1, loop
///                 ~~~~
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Label {
    /// The label's identifier.
    pub name: String,

    /// The start of the label in assembly source code.
    ///
    /// Since name stores the length of the string,
    /// we don't need to store the whole span.
    start: usize
}
impl Label {
    /// Creates a new label.
    pub fn new(name: String, span: std::ops::Range<usize>) -> Self {
        debug_assert_eq!(span.start + name.len(), span.end, "span should have the same length as name");
        Label { name, start: span.start }
    }
    /// Returns the span of the label in assembly source code.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start .. (self.start + self.name.len())
    }
}
impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

/// The operator joining two terms of an immediate expression.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AddSub {
    /// The term is added to the running total.
    Add,
    /// The term is subtracted from the running total.
    Sub
}

/// The relocation applied by a `%...(expr)` specifier.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum RelKind {
    /// `%hi(expr)`: the high 20 bits, rounded so that
    /// `(hi << 12) + sign_extend12(lo)` reproduces the value.
    Hi,
    /// `%lo(expr)`: the low 12 bits (sign-extended at use).
    Lo,
    /// `%pcrel_hi(expr)`: `%hi` of `expr - pc`.
    PcrelHi,
    /// `%pcrel_lo(label)`: `%lo` of the offset computed by the `auipc`
    /// that `label` is attached to.
    PcrelLo,
}
impl std::fmt::Display for RelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelKind::Hi      => f.write_str("%hi"),
            RelKind::Lo      => f.write_str("%lo"),
            RelKind::PcrelHi => f.write_str("%pcrel_hi"),
            RelKind::PcrelLo => f.write_str("%pcrel_lo"),
        }
    }
}

/// An immediate operand, possibly unresolved until link time.
///
/// Immediates appear as instruction operands and as `.byte`/`.half`/`.word`
/// directive values. They are evaluated by the linker once every symbol
/// has an absolute address.
///
/// ## Examples
/// ```text
/// addi a0, a0, 12
///              ~~
/// lui t0, %hi(buffer + 4)
///         ~~~~~~~~~~~~~~~
/// .word table_end - table_start
///       ~~~~~~~~~~~~~~~~~~~~~~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Imm {
    /// An integer literal.
    Int(i32),
    /// A symbol reference, resolved to its absolute address
    /// (or its `.equ` value) at link time.
    Sym(Label),
    /// An additive expression: each term is added or subtracted
    /// in source order.
    Tree(Vec<(AddSub, Imm)>),
    /// A relocation specifier applied to an inner expression.
    Rel(RelKind, Box<Imm>),
}
impl Imm {
    /// If this immediate is a plain integer literal, returns its value.
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Imm::Int(v) => Some(v),
            _ => None
        }
    }

    /// The source span of this immediate, if it contains any symbol.
    ///
    /// Used to point link-time evaluation errors back at the source.
    pub fn span(&self) -> Option<std::ops::Range<usize>> {
        match self {
            Imm::Int(_) => None,
            Imm::Sym(label) => Some(label.span()),
            Imm::Tree(terms) => terms.iter().find_map(|(_, t)| t.span()),
            Imm::Rel(_, inner) => inner.span(),
        }
    }
}
impl From<i32> for Imm {
    fn from(value: i32) -> Self {
        Imm::Int(value)
    }
}
impl std::fmt::Display for Imm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Imm::Int(v) => v.fmt(f),
            Imm::Sym(label) => label.fmt(f),
            Imm::Tree(terms) => {
                for (i, (op, term)) in terms.iter().enumerate() {
                    match (i, op) {
                        (0, AddSub::Add) => {},
                        (0, AddSub::Sub) => f.write_str("-")?,
                        (_, AddSub::Add) => f.write_str(" + ")?,
                        (_, AddSub::Sub) => f.write_str(" - ")?,
                    }
                    term.fmt(f)?;
                }
                Ok(())
            },
            Imm::Rel(kind, inner) => write!(f, "{kind}({inner})"),
        }
    }
}
