//! Link-time evaluation of immediate expressions.
//!
//! Once the linker has assigned every symbol an absolute address, each
//! [`Imm`] collapses to a 32-bit value. The [`Evaluator`] carries the
//! context that evaluation needs: the global table, the local table of the
//! expression's originating file, the position (PC or data address) of the
//! expression's use site, and the table of `%pcrel_hi` sites used to
//! resolve `%pcrel_lo`.

use std::collections::HashMap;
use std::ops::Range;

use crate::ast::{AddSub, Imm, RelKind};
use crate::link::{LinkErr, LinkErrKind};

/// A resolved symbol value: an absolute address, or a `.equ` constant
/// that still needs evaluation in its defining file's context.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SymAddr {
    /// An absolute address (or plain value).
    Addr(u32),
    /// An unevaluated `.equ` expression and the file it was defined in.
    Const(Imm),
}

/// A recorded `auipc rd, %pcrel_hi(target)` site.
#[derive(Debug, Clone)]
pub(crate) struct PcrelSite {
    /// The file the `auipc` came from (selects the local table for
    /// evaluating `target`).
    pub file: usize,
    /// The `%pcrel_hi` operand.
    pub target: Imm,
}

/// The high 20 bits of a value, rounded so that
/// `(hi20(v) << 12) + lo12(v) == v`.
pub(crate) fn hi20(v: u32) -> u32 {
    (v.wrapping_add(0x800) >> 12) & 0xFFFFF
}

/// The low 12 bits of a value, sign-extended; always in `[-2048, 2047]`.
pub(crate) fn lo12(v: u32) -> i32 {
    (v as i32).wrapping_sub((v.wrapping_add(0x800) & !0xFFF) as i32)
}

/// Guard against runaway `.equ` chains (`.equ a, b` / `.equ b, a`).
const MAX_EVAL_DEPTH: u32 = 64;

pub(crate) struct Evaluator<'a> {
    /// Global symbols, already resolved to [`SymAddr`]s.
    pub globals: &'a HashMap<String, (SymAddr, usize)>,
    /// Per-file local tables, already resolved to [`SymAddr`]s.
    pub locals: &'a [HashMap<String, SymAddr>],
    /// Recorded `%pcrel_hi` sites, keyed by the `auipc` address.
    pub pcrel_sites: &'a HashMap<u32, PcrelSite>,
    /// The file the evaluated expression originates from.
    pub file: usize,
    /// The absolute address of the expression's use site.
    pub pc: u32,
}

impl Evaluator<'_> {
    /// Evaluates an immediate expression to its 32-bit value
    /// (arithmetic wraps).
    pub fn eval(&self, imm: &Imm, span: &Range<usize>) -> Result<u32, LinkErr> {
        self.eval_at(imm, span, self.file, self.pc, 0)
    }

    fn eval_at(&self, imm: &Imm, span: &Range<usize>, file: usize, pc: u32, depth: u32) -> Result<u32, LinkErr> {
        if depth > MAX_EVAL_DEPTH {
            return Err(LinkErr::at(LinkErrKind::CircularDefinition, file, imm.span().unwrap_or_else(|| span.clone())));
        }

        match imm {
            Imm::Int(v) => Ok(*v as u32),
            Imm::Sym(label) => {
                // `.` is the address of the use site.
                if label.name == "." {
                    return Ok(pc);
                }
                let (value, def_file) = self.lookup(&label.name, file)
                    .ok_or_else(|| LinkErr::at(LinkErrKind::UnknownSymbol(label.name.clone()), file, label.span()))?;
                match value {
                    SymAddr::Addr(addr) => Ok(addr),
                    SymAddr::Const(expr) => self.eval_at(&expr, span, def_file, pc, depth + 1),
                }
            },
            Imm::Tree(terms) => {
                let mut acc = 0u32;
                for (op, term) in terms {
                    let value = self.eval_at(term, span, file, pc, depth + 1)?;
                    acc = match op {
                        AddSub::Add => acc.wrapping_add(value),
                        AddSub::Sub => acc.wrapping_sub(value),
                    };
                }
                Ok(acc)
            },
            Imm::Rel(kind, inner) => match kind {
                RelKind::Hi => Ok(hi20(self.eval_at(inner, span, file, pc, depth + 1)?)),
                RelKind::Lo => Ok(lo12(self.eval_at(inner, span, file, pc, depth + 1)?) as u32),
                RelKind::PcrelHi => {
                    let value = self.eval_at(inner, span, file, pc, depth + 1)?;
                    Ok(hi20(value.wrapping_sub(pc)))
                },
                RelKind::PcrelLo => {
                    // The operand names a label on the matching auipc; the
                    // offset is computed against *that* instruction's PC and
                    // *its* %pcrel_hi target.
                    let anchor = self.eval_at(inner, span, file, pc, depth + 1)?;
                    let site = self.pcrel_sites.get(&anchor).ok_or_else(|| {
                        LinkErr::at(
                            LinkErrKind::PcrelLoWithoutHi,
                            file,
                            inner.span().unwrap_or_else(|| span.clone()),
                        )
                    })?;
                    let target = self.eval_at(&site.target, span, site.file, anchor, depth + 1)?;
                    Ok(lo12(target.wrapping_sub(anchor)) as u32)
                },
            },
        }
    }

    /// Looks a symbol up: the originating file's locals shadow globals.
    fn lookup(&self, name: &str, file: usize) -> Option<(SymAddr, usize)> {
        if let Some(value) = self.locals.get(file).and_then(|t| t.get(name)) {
            return Some((value.clone(), file));
        }
        self.globals.get(name).map(|(value, def_file)| (value.clone(), *def_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Label;

    fn sym(name: &str) -> Imm {
        Imm::Sym(Label::new(name.to_string(), 0..name.len()))
    }

    fn eval_with(locals: &[(&str, SymAddr)], imm: &Imm, pc: u32) -> Result<u32, LinkErr> {
        let globals = HashMap::new();
        let locals = vec![locals.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()];
        let pcrel_sites = HashMap::new();
        let ev = Evaluator { globals: &globals, locals: &locals, pcrel_sites: &pcrel_sites, file: 0, pc };
        ev.eval(imm, &(0..0))
    }

    #[test]
    fn test_hi_lo_round_trip() {
        for v in [0u32, 1, 0x7FF, 0x800, 0x801, 0xFFF, 0x1000, 0x12345FFF, 0x7FFFFFFF, 0x80000000, 0xFFFFFFFF] {
            let hi = hi20(v);
            let lo = lo12(v);
            assert!((-2048..2048).contains(&lo), "lo12({v:#x}) = {lo}");
            assert_eq!((hi << 12).wrapping_add(lo as u32), v, "round trip failed for {v:#x}");
        }
    }

    #[test]
    fn test_tree_fold() {
        let imm = Imm::Tree(vec![
            (AddSub::Add, sym("end")),
            (AddSub::Sub, sym("start")),
            (AddSub::Add, Imm::Int(4)),
        ]);
        let result = eval_with(
            &[("end", SymAddr::Addr(0x2000C)), ("start", SymAddr::Addr(0x20000))],
            &imm,
            0,
        );
        assert_eq!(result.unwrap(), 0x10);
    }

    #[test]
    fn test_dot_is_position() {
        // `target - .` one word before `target` evaluates to 4.
        let imm = Imm::Tree(vec![
            (AddSub::Add, sym("target")),
            (AddSub::Sub, sym(".")),
        ]);
        let result = eval_with(&[("target", SymAddr::Addr(0x20004))], &imm, 0x20000);
        assert_eq!(result.unwrap(), 4);
    }

    #[test]
    fn test_unknown_symbol() {
        let err = eval_with(&[], &sym("ghost"), 0).unwrap_err();
        assert!(matches!(err.kind, LinkErrKind::UnknownSymbol(name) if name == "ghost"));
    }

    #[test]
    fn test_equ_chain_and_cycle() {
        let locals = [
            ("a", SymAddr::Const(sym("b"))),
            ("b", SymAddr::Const(Imm::Int(12))),
        ];
        assert_eq!(eval_with(&locals, &sym("a"), 0).unwrap(), 12);

        let cyclic = [
            ("a", SymAddr::Const(sym("b"))),
            ("b", SymAddr::Const(sym("a"))),
        ];
        let err = eval_with(&cyclic, &sym("a"), 0).unwrap_err();
        assert!(matches!(err.kind, LinkErrKind::CircularDefinition));
    }

    #[test]
    fn test_pcrel_pair() {
        // auipc at 0x10000 pointing at 0x20010: %pcrel_hi rounds the delta,
        // and %pcrel_lo(anchor) recovers the low bits relative to the auipc.
        let globals = HashMap::new();
        let locals = vec![HashMap::from([
            ("anchor".to_string(), SymAddr::Addr(0x10000)),
            ("msg".to_string(), SymAddr::Addr(0x20010)),
        ])];
        let pcrel_sites = HashMap::from([
            (0x10000u32, PcrelSite { file: 0, target: sym("msg") }),
        ]);

        let hi_ev = Evaluator { globals: &globals, locals: &locals, pcrel_sites: &pcrel_sites, file: 0, pc: 0x10000 };
        let hi = hi_ev.eval(&Imm::Rel(RelKind::PcrelHi, Box::new(sym("msg"))), &(0..0)).unwrap();

        // The consumer (addi) sits at a different PC; the result must still
        // be relative to the auipc.
        let lo_ev = Evaluator { globals: &globals, locals: &locals, pcrel_sites: &pcrel_sites, file: 0, pc: 0x10004 };
        let lo = lo_ev.eval(&Imm::Rel(RelKind::PcrelLo, Box::new(sym("anchor"))), &(0..0)).unwrap();

        let delta = (hi << 12).wrapping_add(lo as i32 as u32).wrapping_add(0x10000);
        assert_eq!(delta, 0x20010);
    }

    #[test]
    fn test_pcrel_lo_without_hi() {
        let globals = HashMap::new();
        let locals = vec![HashMap::from([("anchor".to_string(), SymAddr::Addr(0x10000))])];
        let pcrel_sites = HashMap::new();
        let ev = Evaluator { globals: &globals, locals: &locals, pcrel_sites: &pcrel_sites, file: 0, pc: 0x10004 };

        let err = ev.eval(&Imm::Rel(RelKind::PcrelLo, Box::new(sym("anchor"))), &(0..0)).unwrap_err();
        assert!(matches!(err.kind, LinkErrKind::PcrelLoWithoutHi));
    }
}
