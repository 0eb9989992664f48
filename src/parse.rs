//! Parsing assembly source code into an AST.
//!
//! The main function of this module is [`parse_ast`], which tokenizes a
//! source file (see [`lex`]) and groups the tokens into statements
//! (see [`Stmt`]): labels, directives, and instructions.
//!
//! ```
//! use rv32_ensemble::parse::parse_ast;
//!
//! let ast = parse_ast("
//!     .globl main
//!     main:
//!         li a0, 0
//!         ret
//! ").unwrap();
//!
//! // .globl, then the labeled li, then ret.
//! assert_eq!(ast.len(), 3);
//! ```
//!
//! Statements are separated by newlines or `;`. Single-instruction
//! pseudo-mnemonics (`mv`, `j`, `beqz`, `ret`, ...) are normalized into
//! their base instruction here; multi-instruction pseudo-instructions
//! (`li`, `la`, `call`, `tail`) are expanded later, by the assembler.

pub mod lex;

use std::borrow::Cow;
use std::ops::Range;

use logos::Logos;

use crate::ast::asm::{AsmInstr, Directive, Section, Stmt, StmtKind};
use crate::ast::sim::{BFunct, IFunct, LFunct, RFunct, SFunct};
use crate::ast::{AddSub, Imm, Label, Reg, RelKind};
use crate::err::ErrSpan;
use lex::{LexErr, Token};

/// Parses assembly source code into a list of statements.
pub fn parse_ast(src: &str) -> Result<Vec<Stmt>, ParseErr> {
    let mut parser = Parser::new(src)?;
    let mut stmts = vec![];
    while let Some(stmt) = parser.parse_stmt()? {
        stmts.push(stmt);
    }
    Ok(stmts)
}

/// Kinds of errors that can occur from parsing assembly code.
///
/// See [`ParseErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrKind {
    /// The lexer failed to tokenize this part of the source.
    Lex(LexErr),
    /// The statement does not start with a directive or mnemonic.
    ExpectedStmt,
    /// The mnemonic is not a recognized instruction.
    UnknownMnemonic(String),
    /// The directive is not a recognized assembler directive.
    UnknownDirective(String),
    /// The `.section` operand is not one of the four output sections.
    UnknownSection(String),
    /// A register operand was expected.
    ExpectedReg,
    /// An immediate expression operand was expected.
    ExpectedImm,
    /// A memory operand (`offset(reg)`) was expected.
    ExpectedMemOperand,
    /// A label operand was expected.
    ExpectedLabel,
    /// A string literal operand was expected.
    ExpectedStrLit,
    /// An integer literal was expected (e.g. for `.align`).
    ExpectedIntLiteral,
    /// A specific punctuation token was expected.
    ExpectedToken(&'static str),
    /// The statement has trailing tokens after its operands.
    ExpectedEndOfStmt,
    /// The `.align` exponent is too large to be meaningful.
    AlignTooLarge,
}
impl std::fmt::Display for ParseErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lex(e)              => e.fmt(f),
            Self::ExpectedStmt        => f.write_str("expected a directive or instruction"),
            Self::UnknownMnemonic(m)  => write!(f, "unknown instruction \"{m}\""),
            Self::UnknownDirective(d) => write!(f, "unknown directive \"{d}\""),
            Self::UnknownSection(s)   => write!(f, "unknown section \"{s}\""),
            Self::ExpectedReg         => f.write_str("expected a register"),
            Self::ExpectedImm         => f.write_str("expected an immediate expression"),
            Self::ExpectedMemOperand  => f.write_str("expected a memory operand"),
            Self::ExpectedLabel       => f.write_str("expected a symbol name"),
            Self::ExpectedStrLit      => f.write_str("expected a string literal"),
            Self::ExpectedIntLiteral  => f.write_str("expected an integer literal"),
            Self::ExpectedToken(t)    => write!(f, "expected \"{t}\""),
            Self::ExpectedEndOfStmt   => f.write_str("unexpected token after statement"),
            Self::AlignTooLarge       => f.write_str("alignment exponent is too large"),
        }
    }
}

/// Error from parsing assembly code.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseErr {
    /// The kind of error.
    pub kind: ParseErrKind,
    /// The span in the source associated with this error.
    pub span: Range<usize>
}
impl ParseErr {
    fn new(kind: ParseErrKind, span: Range<usize>) -> Self {
        ParseErr { kind, span }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone().into())
    }

    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            ParseErrKind::Lex(e)             => e.help(),
            ParseErrKind::ExpectedMemOperand => Some("memory operands are written offset(register), e.g. 8(sp)".into()),
            ParseErrKind::UnknownSection(_)  => Some("the output sections are .text, .data, .rodata, and .bss".into()),
            ParseErrKind::AlignTooLarge      => Some("the exponent is a power of two; values above 30 cannot fit the address space".into()),
            _ => None,
        }
    }
}

struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    index: usize,
    /// One past the end of the source, for errors at EOF.
    eof: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, ParseErr> {
        let mut tokens = vec![];
        for (result, span) in Token::lexer(src).spanned() {
            match result {
                Ok(token) => tokens.push((token, span)),
                Err(e) => return Err(ParseErr::new(ParseErrKind::Lex(e), span)),
            }
        }
        Ok(Self { tokens, index: 0, eof: src.len() })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(t, _)| t)
    }
    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.index + 1).map(|(t, _)| t)
    }
    fn next(&mut self) -> Option<(Token, Range<usize>)> {
        let entry = self.tokens.get(self.index).cloned();
        if entry.is_some() {
            self.index += 1;
        }
        entry
    }
    /// The span of the next token (or an empty span at EOF).
    fn here(&self) -> Range<usize> {
        match self.tokens.get(self.index) {
            Some((_, span)) => span.clone(),
            None => self.eof..self.eof,
        }
    }
    fn prev_span(&self) -> Range<usize> {
        match self.index.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some((_, span)) => span.clone(),
            None => 0..0,
        }
    }

    fn err(&self, kind: ParseErrKind) -> ParseErr {
        ParseErr::new(kind, self.here())
    }

    fn match_(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.index += 1;
            true
        } else {
            false
        }
    }
    fn expect(&mut self, token: Token, name: &'static str) -> Result<(), ParseErr> {
        match self.match_(&token) {
            true => Ok(()),
            false => Err(self.err(ParseErrKind::ExpectedToken(name))),
        }
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::NewLine))
    }

    /// Parses one statement, returning `None` at the end of the file.
    fn parse_stmt(&mut self) -> Result<Option<Stmt>, ParseErr> {
        // Drop empty lines.
        while self.match_(&Token::NewLine) {}
        if self.peek().is_none() {
            return Ok(None);
        }

        // Leading labels: `ident:` pairs, possibly several.
        let mut labels = vec![];
        while let (Some(Token::Ident(_)), Some(Token::Colon)) = (self.peek(), self.peek2()) {
            let Some((Token::Ident(name), span)) = self.next() else { unreachable!() };
            labels.push(Label::new(name, span));
            self.next(); // colon

            // Labels may sit on their own line; keep scanning for more.
            while self.match_(&Token::NewLine) {
                if self.peek().is_none() {
                    return Ok(Some(Stmt {
                        span: labels.last().map_or(0..0, |l| l.span()),
                        labels,
                        kind: StmtKind::Empty,
                    }));
                }
            }
        }

        let start = self.here();
        let kind = match self.peek() {
            None | Some(Token::NewLine) => StmtKind::Empty,
            Some(Token::Ident(name)) if name.starts_with('.') => {
                let Some((Token::Ident(name), span)) = self.next() else { unreachable!() };
                StmtKind::Directive(self.parse_directive(&name, span)?)
            },
            Some(Token::Ident(_)) => {
                let Some((Token::Ident(name), span)) = self.next() else { unreachable!() };
                StmtKind::Instr(self.parse_instr(&name, span)?)
            },
            Some(_) => return Err(self.err(ParseErrKind::ExpectedStmt)),
        };

        if !matches!(kind, StmtKind::Empty) && !self.at_stmt_end() {
            return Err(self.err(ParseErrKind::ExpectedEndOfStmt));
        }

        let end = self.prev_span().end.max(start.start);
        let span = match kind {
            StmtKind::Empty => labels.last().map_or(start.start..end, |l| l.span()),
            _ => start.start..end,
        };
        Ok(Some(Stmt { labels, kind, span }))
    }

    /* ----- operand helpers ----- */

    fn parse_reg(&mut self) -> Result<Reg, ParseErr> {
        match self.peek() {
            Some(Token::Ident(name)) => match Reg::from_name(name) {
                Some(reg) => {
                    self.index += 1;
                    Ok(reg)
                },
                None => Err(self.err(ParseErrKind::ExpectedReg)),
            },
            _ => Err(self.err(ParseErrKind::ExpectedReg)),
        }
    }

    fn parse_label(&mut self) -> Result<Label, ParseErr> {
        match self.next() {
            Some((Token::Ident(name), span)) => Ok(Label::new(name, span)),
            _ => Err(ParseErr::new(ParseErrKind::ExpectedLabel, self.prev_span())),
        }
    }

    fn parse_int_literal(&mut self) -> Result<u32, ParseErr> {
        match self.next() {
            Some((Token::Int(v), _)) => Ok(v),
            _ => Err(ParseErr::new(ParseErrKind::ExpectedIntLiteral, self.prev_span())),
        }
    }

    /// Parses a single term of an immediate expression.
    fn parse_imm_term(&mut self) -> Result<Imm, ParseErr> {
        match self.next() {
            Some((Token::Int(v), _)) => Ok(Imm::Int(v as i32)),
            Some((Token::Ident(name), span)) => Ok(Imm::Sym(Label::new(name, span))),
            Some((Token::Reloc(kind), _)) => {
                self.expect(Token::LParen, "(")?;
                let inner = self.parse_imm()?;
                self.expect(Token::RParen, ")")?;
                Ok(Imm::Rel(kind, Box::new(inner)))
            },
            _ => Err(ParseErr::new(ParseErrKind::ExpectedImm, self.prev_span())),
        }
    }

    /// Parses an immediate expression: `[-] term ((+|-) term)*`.
    fn parse_imm(&mut self) -> Result<Imm, ParseErr> {
        let mut op = match self.match_(&Token::Minus) {
            true => AddSub::Sub,
            false => AddSub::Add,
        };
        let mut terms = vec![];
        loop {
            terms.push((op, self.parse_imm_term()?));
            op = match self.peek() {
                Some(Token::Plus)  => AddSub::Add,
                Some(Token::Minus) => AddSub::Sub,
                _ => break,
            };
            self.index += 1;
        }

        // Collapse the common single-term cases.
        match &terms[..] {
            [(AddSub::Add, term)] => Ok(term.clone()),
            [(AddSub::Sub, Imm::Int(v))] => Ok(Imm::Int(v.wrapping_neg())),
            _ => Ok(Imm::Tree(terms)),
        }
    }

    /// Parses a memory operand: `offset(base)`, `(base)`, or `sym(base)`.
    fn parse_mem(&mut self) -> Result<(Imm, Reg), ParseErr> {
        let offset = match self.peek() {
            Some(Token::LParen) => Imm::Int(0),
            _ => self.parse_imm()
                .map_err(|e| ParseErr::new(ParseErrKind::ExpectedMemOperand, e.span))?,
        };
        self.expect(Token::LParen, "(")?;
        let base = self.parse_reg()?;
        self.expect(Token::RParen, ")")?;
        Ok((offset, base))
    }

    fn comma(&mut self) -> Result<(), ParseErr> {
        self.expect(Token::Comma, ",")
    }

    /* ----- statement kinds ----- */

    fn parse_directive(&mut self, name: &str, span: Range<usize>) -> Result<Directive, ParseErr> {
        let section_of = |name: &str| match name {
            ".text" => Some(Section::Text),
            ".data" => Some(Section::Data),
            ".rodata" => Some(Section::Rodata),
            ".bss" => Some(Section::Bss),
            _ => None,
        };

        match name {
            ".text" | ".data" | ".rodata" | ".bss" => {
                Ok(Directive::SetSection(section_of(name).unwrap_or_else(|| unreachable!())))
            },
            ".section" => {
                let label = self.parse_label()?;
                match section_of(&label.name) {
                    Some(section) => Ok(Directive::SetSection(section)),
                    None => {
                        let span = label.span();
                        Err(ParseErr::new(ParseErrKind::UnknownSection(label.name), span))
                    },
                }
            },
            ".globl" | ".global" => Ok(Directive::Global(self.parse_label()?)),
            ".align" | ".p2align" => {
                let n = self.parse_int_literal()?;
                if n > 30 {
                    return Err(ParseErr::new(ParseErrKind::AlignTooLarge, self.prev_span()));
                }
                Ok(Directive::Align(n))
            },
            ".byte" | ".half" | ".word" => {
                let width = match name {
                    ".byte" => 1,
                    ".half" => 2,
                    _ => 4,
                };
                let mut values = vec![self.parse_imm()?];
                while self.match_(&Token::Comma) {
                    values.push(self.parse_imm()?);
                }
                Ok(Directive::Emit { width, values })
            },
            ".ascii" | ".asciz" | ".string" => {
                let nul = name != ".ascii";
                let mut text = vec![];
                loop {
                    match self.next() {
                        Some((Token::String(bytes), _)) => text.extend(bytes),
                        _ => return Err(ParseErr::new(ParseErrKind::ExpectedStrLit, self.prev_span())),
                    }
                    if !self.match_(&Token::Comma) { break; }
                    if nul { text.push(0); }
                }
                Ok(Directive::Ascii { text, nul })
            },
            ".zero" | ".space" => Ok(Directive::Zero(self.parse_int_literal()?)),
            ".equ" | ".set" => {
                let label = self.parse_label()?;
                self.comma()?;
                Ok(Directive::Equ(label, self.parse_imm()?))
            },
            _ => Err(ParseErr::new(ParseErrKind::UnknownDirective(name.to_string()), span)),
        }
    }

    fn parse_instr(&mut self, mnemonic: &str, span: Range<usize>) -> Result<AsmInstr, ParseErr> {
        use crate::ast::reg_consts::{RA, ZERO};

        let r_funct = |m: &str| match m {
            "add" => Some(RFunct::Add),
            "sub" => Some(RFunct::Sub),
            "sll" => Some(RFunct::Sll),
            "slt" => Some(RFunct::Slt),
            "sltu" => Some(RFunct::Sltu),
            "xor" => Some(RFunct::Xor),
            "srl" => Some(RFunct::Srl),
            "sra" => Some(RFunct::Sra),
            "or" => Some(RFunct::Or),
            "and" => Some(RFunct::And),
            _ => None,
        };
        let i_funct = |m: &str| match m {
            "addi" => Some(IFunct::Addi),
            "slti" => Some(IFunct::Slti),
            "sltiu" => Some(IFunct::Sltiu),
            "xori" => Some(IFunct::Xori),
            "ori" => Some(IFunct::Ori),
            "andi" => Some(IFunct::Andi),
            "slli" => Some(IFunct::Slli),
            "srli" => Some(IFunct::Srli),
            "srai" => Some(IFunct::Srai),
            _ => None,
        };
        let l_funct = |m: &str| match m {
            "lb" => Some(LFunct::Lb),
            "lh" => Some(LFunct::Lh),
            "lw" => Some(LFunct::Lw),
            "lbu" => Some(LFunct::Lbu),
            "lhu" => Some(LFunct::Lhu),
            _ => None,
        };
        let s_funct = |m: &str| match m {
            "sb" => Some(SFunct::Sb),
            "sh" => Some(SFunct::Sh),
            "sw" => Some(SFunct::Sw),
            _ => None,
        };
        // Branches, including the operand-swapped and zero-comparison aliases.
        // The bool is whether rs1/rs2 are swapped.
        let b_funct = |m: &str| match m {
            "beq" => Some((BFunct::Beq, false)),
            "bne" => Some((BFunct::Bne, false)),
            "blt" => Some((BFunct::Blt, false)),
            "bge" => Some((BFunct::Bge, false)),
            "bltu" => Some((BFunct::Bltu, false)),
            "bgeu" => Some((BFunct::Bgeu, false)),
            "bgt" => Some((BFunct::Blt, true)),
            "ble" => Some((BFunct::Bge, true)),
            "bgtu" => Some((BFunct::Bltu, true)),
            "bleu" => Some((BFunct::Bgeu, true)),
            _ => None,
        };
        let bz_funct = |m: &str| match m {
            // (funct, reg goes on the rs2 side)
            "beqz" => Some((BFunct::Beq, false)),
            "bnez" => Some((BFunct::Bne, false)),
            "bltz" => Some((BFunct::Blt, false)),
            "bgez" => Some((BFunct::Bge, false)),
            "bgtz" => Some((BFunct::Blt, true)),
            "blez" => Some((BFunct::Bge, true)),
            _ => None,
        };

        if let Some(f) = r_funct(mnemonic) {
            let rd = self.parse_reg()?;
            self.comma()?;
            let rs1 = self.parse_reg()?;
            self.comma()?;
            let rs2 = self.parse_reg()?;
            return Ok(AsmInstr::R(f, rd, rs1, rs2));
        }
        if let Some(f) = i_funct(mnemonic) {
            let rd = self.parse_reg()?;
            self.comma()?;
            let rs1 = self.parse_reg()?;
            self.comma()?;
            let imm = self.parse_imm()?;
            return Ok(AsmInstr::I(f, rd, rs1, imm));
        }
        if let Some(f) = l_funct(mnemonic) {
            let rd = self.parse_reg()?;
            self.comma()?;
            let (offset, base) = self.parse_mem()?;
            return Ok(AsmInstr::Load(f, rd, base, offset));
        }
        if let Some(f) = s_funct(mnemonic) {
            let src = self.parse_reg()?;
            self.comma()?;
            let (offset, base) = self.parse_mem()?;
            return Ok(AsmInstr::Store(f, src, base, offset));
        }
        if let Some((f, swap)) = b_funct(mnemonic) {
            let ra_ = self.parse_reg()?;
            self.comma()?;
            let rb = self.parse_reg()?;
            self.comma()?;
            let target = self.parse_imm()?;
            let (rs1, rs2) = if swap { (rb, ra_) } else { (ra_, rb) };
            return Ok(AsmInstr::Br(f, rs1, rs2, target));
        }
        if let Some((f, swap)) = bz_funct(mnemonic) {
            let rs = self.parse_reg()?;
            self.comma()?;
            let target = self.parse_imm()?;
            let (rs1, rs2) = if swap { (ZERO, rs) } else { (rs, ZERO) };
            return Ok(AsmInstr::Br(f, rs1, rs2, target));
        }

        match mnemonic {
            "lui" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::Lui(rd, self.parse_imm()?))
            },
            "auipc" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::Auipc(rd, self.parse_imm()?))
            },
            "jal" => {
                // `jal target` is `jal ra, target`.
                let rd = match (self.peek(), self.peek2()) {
                    (Some(Token::Ident(_)), Some(Token::Comma)) => {
                        let rd = self.parse_reg()?;
                        self.comma()?;
                        rd
                    },
                    _ => RA,
                };
                Ok(AsmInstr::Jal(rd, self.parse_imm()?))
            },
            "jalr" => {
                // `jalr rs` is `jalr ra, rs, 0`.
                let first = self.parse_reg()?;
                if !self.match_(&Token::Comma) {
                    return Ok(AsmInstr::Jalr(RA, first, Imm::Int(0)));
                }
                match self.peek() {
                    // `jalr rd, offset(rs)`
                    Some(Token::Int(_) | Token::LParen | Token::Minus) => {
                        let (offset, base) = self.parse_mem()?;
                        Ok(AsmInstr::Jalr(first, base, offset))
                    },
                    // `jalr rd, rs, offset`
                    _ => {
                        let base = self.parse_reg()?;
                        self.comma()?;
                        Ok(AsmInstr::Jalr(first, base, self.parse_imm()?))
                    },
                }
            },
            "li" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                let imm = self.parse_imm()?;
                // A literal that fits the addi immediate stays one instruction.
                match imm.as_int() {
                    Some(v) if (-0x800..0x800).contains(&v) => Ok(AsmInstr::I(IFunct::Addi, rd, ZERO, imm)),
                    _ => Ok(AsmInstr::Li(rd, imm)),
                }
            },
            "la" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::La(rd, self.parse_imm()?))
            },
            "call" => Ok(AsmInstr::Call(self.parse_label()?)),
            "tail" => Ok(AsmInstr::Tail(self.parse_label()?)),
            "j" => Ok(AsmInstr::Jal(ZERO, self.parse_imm()?)),
            "jr" => Ok(AsmInstr::Jalr(ZERO, self.parse_reg()?, Imm::Int(0))),
            "ret" => Ok(AsmInstr::Jalr(ZERO, RA, Imm::Int(0))),
            "nop" => Ok(AsmInstr::I(IFunct::Addi, ZERO, ZERO, Imm::Int(0))),
            "mv" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::I(IFunct::Addi, rd, self.parse_reg()?, Imm::Int(0)))
            },
            "not" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::I(IFunct::Xori, rd, self.parse_reg()?, Imm::Int(-1)))
            },
            "neg" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::R(RFunct::Sub, rd, ZERO, self.parse_reg()?))
            },
            "seqz" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::I(IFunct::Sltiu, rd, self.parse_reg()?, Imm::Int(1)))
            },
            "snez" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::R(RFunct::Sltu, rd, ZERO, self.parse_reg()?))
            },
            "sltz" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::R(RFunct::Slt, rd, self.parse_reg()?, ZERO))
            },
            "sgtz" => {
                let rd = self.parse_reg()?;
                self.comma()?;
                Ok(AsmInstr::R(RFunct::Slt, rd, ZERO, self.parse_reg()?))
            },
            _ => Err(ParseErr::new(ParseErrKind::UnknownMnemonic(mnemonic.to_string()), span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::reg_consts::*;

    fn instr(src: &str) -> AsmInstr {
        let ast = parse_ast(src).unwrap();
        let [stmt] = &ast[..] else { panic!("expected one statement, got {ast:?}") };
        match &stmt.kind {
            StmtKind::Instr(i) => i.clone(),
            k => panic!("expected instruction, got {k:?}"),
        }
    }
    fn directive(src: &str) -> Directive {
        let ast = parse_ast(src).unwrap();
        let [stmt] = &ast[..] else { panic!("expected one statement, got {ast:?}") };
        match &stmt.kind {
            StmtKind::Directive(d) => d.clone(),
            k => panic!("expected directive, got {k:?}"),
        }
    }
    fn parse_fails(src: &str) -> ParseErrKind {
        parse_ast(src).unwrap_err().kind
    }

    #[test]
    fn test_r_type() {
        assert_eq!(instr("add a0, a1, a2"), AsmInstr::R(RFunct::Add, A0, A1, A2));
        assert_eq!(instr("sltu t0, x10, x11"), AsmInstr::R(RFunct::Sltu, T0, A0, A1));
    }

    #[test]
    fn test_i_type() {
        assert_eq!(instr("addi a0, a0, -1"), AsmInstr::I(IFunct::Addi, A0, A0, Imm::Int(-1)));
        assert_eq!(instr("andi a0, a0, 0xFF"), AsmInstr::I(IFunct::Andi, A0, A0, Imm::Int(0xFF)));
        assert_eq!(instr("addi a0, a0, 'A'"), AsmInstr::I(IFunct::Addi, A0, A0, Imm::Int(65)));
    }

    #[test]
    fn test_mem_operands() {
        assert_eq!(instr("lw a1, 8(sp)"), AsmInstr::Load(LFunct::Lw, A1, SP, Imm::Int(8)));
        assert_eq!(instr("lw a1, (sp)"), AsmInstr::Load(LFunct::Lw, A1, SP, Imm::Int(0)));
        assert_eq!(instr("sb a1, -4(s0)"), AsmInstr::Store(SFunct::Sb, A1, S0, Imm::Int(-4)));
        assert_eq!(
            instr("lw a0, %lo(value)(a0)"),
            AsmInstr::Load(LFunct::Lw, A0, A0, Imm::Rel(RelKind::Lo, Box::new(Imm::Sym(Label::new("value".into(), 11..16)))))
        );
        assert_eq!(parse_fails("lw a1, 8"), ParseErrKind::ExpectedToken("("));
    }

    #[test]
    fn test_branches() {
        let beq = instr("beq a0, a1, done");
        assert!(matches!(beq, AsmInstr::Br(BFunct::Beq, A0, A1, Imm::Sym(_))));

        // Swapped aliases.
        assert!(matches!(instr("bgt a0, a1, done"), AsmInstr::Br(BFunct::Blt, A1, A0, _)));
        assert!(matches!(instr("bleu a0, a1, done"), AsmInstr::Br(BFunct::Bgeu, A1, A0, _)));

        // Zero-comparison aliases.
        assert!(matches!(instr("beqz a0, done"), AsmInstr::Br(BFunct::Beq, A0, ZERO, _)));
        assert!(matches!(instr("bgtz a0, done"), AsmInstr::Br(BFunct::Blt, ZERO, A0, _)));
    }

    #[test]
    fn test_jumps() {
        assert!(matches!(instr("jal foo"), AsmInstr::Jal(RA, Imm::Sym(_))));
        assert!(matches!(instr("jal zero, foo"), AsmInstr::Jal(ZERO, Imm::Sym(_))));
        assert!(matches!(instr("j foo"), AsmInstr::Jal(ZERO, Imm::Sym(_))));
        assert_eq!(instr("jalr a0"), AsmInstr::Jalr(RA, A0, Imm::Int(0)));
        assert_eq!(instr("jalr ra, a0, 4"), AsmInstr::Jalr(RA, A0, Imm::Int(4)));
        assert_eq!(instr("jalr ra, 4(a0)"), AsmInstr::Jalr(RA, A0, Imm::Int(4)));
        assert_eq!(instr("ret"), AsmInstr::Jalr(ZERO, RA, Imm::Int(0)));
    }

    #[test]
    fn test_li_sizing() {
        assert_eq!(instr("li a0, 7"), AsmInstr::I(IFunct::Addi, A0, ZERO, Imm::Int(7)));
        assert_eq!(instr("li a0, -2048"), AsmInstr::I(IFunct::Addi, A0, ZERO, Imm::Int(-2048)));
        assert_eq!(instr("li a0, 2048"), AsmInstr::Li(A0, Imm::Int(2048)));
        assert_eq!(instr("li a0, 0xDEADBEEF"), AsmInstr::Li(A0, Imm::Int(0xDEADBEEFu32 as i32)));
        assert!(matches!(instr("li a0, some_const"), AsmInstr::Li(A0, Imm::Sym(_))));
    }

    #[test]
    fn test_single_instr_pseudos() {
        assert_eq!(instr("mv a0, a1"), AsmInstr::I(IFunct::Addi, A0, A1, Imm::Int(0)));
        assert_eq!(instr("not a0, a1"), AsmInstr::I(IFunct::Xori, A0, A1, Imm::Int(-1)));
        assert_eq!(instr("neg a0, a1"), AsmInstr::R(RFunct::Sub, A0, ZERO, A1));
        assert_eq!(instr("seqz a0, a1"), AsmInstr::I(IFunct::Sltiu, A0, A1, Imm::Int(1)));
        assert_eq!(instr("snez a0, a1"), AsmInstr::R(RFunct::Sltu, A0, ZERO, A1));
        assert_eq!(instr("nop"), AsmInstr::I(IFunct::Addi, ZERO, ZERO, Imm::Int(0)));
    }

    #[test]
    fn test_imm_expressions() {
        let i = instr("addi a0, a0, end - start + 4");
        let AsmInstr::I(IFunct::Addi, _, _, Imm::Tree(terms)) = i else { panic!("expected tree: {i:?}") };
        assert_eq!(terms.len(), 3);
        assert_eq!(terms[0].0, AddSub::Add);
        assert_eq!(terms[1].0, AddSub::Sub);
        assert_eq!(terms[2].0, AddSub::Add);
        assert_eq!(terms[2].1, Imm::Int(4));
    }

    #[test]
    fn test_labels() {
        let ast = parse_ast("foo: bar:\n  baz: ret\n").unwrap();
        assert_eq!(ast.len(), 1);
        let names: Vec<_> = ast[0].labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["foo", "bar", "baz"]);
        assert!(matches!(ast[0].kind, StmtKind::Instr(_)));

        // Trailing label with nothing after it.
        let ast = parse_ast("ret\nend:\n").unwrap();
        assert_eq!(ast.len(), 2);
        assert!(matches!(ast[1].kind, StmtKind::Empty));
    }

    #[test]
    fn test_semicolon_separator() {
        let ast = parse_ast("main: li a0, 7; li a1, 5; sub a0, a0, a1; ret").unwrap();
        assert_eq!(ast.len(), 4);
        assert_eq!(ast[0].labels.len(), 1);
    }

    #[test]
    fn test_directives() {
        assert_eq!(directive(".text"), Directive::SetSection(Section::Text));
        assert_eq!(directive(".section .rodata"), Directive::SetSection(Section::Rodata));
        assert!(matches!(directive(".globl main"), Directive::Global(_)));
        assert_eq!(directive(".align 2"), Directive::Align(2));
        assert_eq!(directive(".zero 16"), Directive::Zero(16));
        let Directive::Emit { width: 4, values } = directive(".word 1, 2, end - start") else {
            panic!("expected .word directive")
        };
        assert_eq!(values[0], Imm::Int(1));
        assert_eq!(values[1], Imm::Int(2));
        assert!(matches!(&values[2], Imm::Tree(terms) if terms.len() == 2));
        assert_eq!(directive(".asciz \"hi\""), Directive::Ascii { text: b"hi".to_vec(), nul: true });
        assert_eq!(directive(".ascii \"hi\""), Directive::Ascii { text: b"hi".to_vec(), nul: false });
        assert!(matches!(directive(".equ SIZE, 64"), Directive::Equ(_, Imm::Int(64))));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_fails("frobnicate a0"), ParseErrKind::UnknownMnemonic(_)));
        assert!(matches!(parse_fails(".frobnicate"), ParseErrKind::UnknownDirective(_)));
        assert!(matches!(parse_fails(".section .stack"), ParseErrKind::UnknownSection(_)));
        assert_eq!(parse_fails("add a0, a1"), ParseErrKind::ExpectedToken(","));
        assert_eq!(parse_fails("add a0, a1, 3"), ParseErrKind::ExpectedReg);
        assert_eq!(parse_fails("ret ret"), ParseErrKind::ExpectedEndOfStmt);
        assert_eq!(parse_fails(".align 31"), ParseErrKind::AlignTooLarge);
        assert!(matches!(parse_fails("addi a0, a0, 99999999999"), ParseErrKind::Lex(_)));
    }
}
