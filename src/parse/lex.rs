//! Tokenizing RV32 assembly.
//!
//! This module holds the tokens that characterize GNU-style RISC-V assembly
//! ([`Token`]). This module is used by the parser to facilitate the
//! conversion of assembly source code into an AST.
//!
//! A few notes on token boundaries:
//! - `#` begins a comment which spans the rest of the line
//!   (comments are skipped by the lexer, except inside string literals).
//! - Identifiers cover mnemonics, labels, register names, *and* directives:
//!   names may contain `.` (e.g. `.L0`), so whether a leading-dot identifier
//!   is a directive is decided positionally by the parser.
//! - `;` separates statements exactly like a newline.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

use crate::ast::RelKind;

/// A unit of information in RV32 assembly source code.
#[derive(Debug, Logos, PartialEq, Clone)]
#[logos(error = LexErr)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    /// An unsigned numeric value (e.g. `9`, `0x7F`, `0b101`, `'a'`).
    ///
    /// Negative values are parsed as a [`Token::Minus`] followed by a
    /// numeric token.
    #[regex(r"\d\w*", lex_numeric)]
    #[regex(r"'", lex_char_literal)]
    Int(u32),

    /// An identifier: a mnemonic, register name, label, or directive.
    #[regex(r"[A-Za-z_.@][A-Za-z0-9_.@]*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A relocation specifier (e.g. `%hi`, `%pcrel_lo`).
    #[regex(r"%[A-Za-z_]+", lex_reloc)]
    Reloc(RelKind),

    /// A string literal (e.g. `"hello\n"`), with escapes decoded.
    #[token(r#"""#, lex_str_literal)]
    String(Vec<u8>),

    /// A colon, which ends a label definition.
    #[token(":")]
    Colon,

    /// A comma, which delineates operands of an instruction.
    #[token(",")]
    Comma,

    /// An opening parenthesis (memory operands, relocation specifiers).
    #[token("(")]
    LParen,

    /// A closing parenthesis.
    #[token(")")]
    RParen,

    /// A plus, joining terms of an immediate expression.
    #[token("+")]
    Plus,

    /// A minus: either negation or the subtraction of expression terms.
    #[token("-")]
    Minus,

    /// A statement separator: a new line, or `;`.
    #[regex(r"\n")]
    #[token(";")]
    NewLine,
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum LexErr {
    /// Numeric literal cannot fit within the range of a u32.
    DoesNotFitU32,
    /// Numeric literal has invalid digits for its base.
    InvalidNumeric,
    /// Numeric literal has a base prefix (`0x`, `0b`) but no digits.
    EmptyNumeric,
    /// String literal is missing an end quotation mark.
    UnclosedStrLit,
    /// A string or character literal contains an unsupported escape.
    InvalidEscape,
    /// Character literal is malformed (empty, unterminated, or too long).
    InvalidCharLit,
    /// A `%...` specifier other than `%hi`, `%lo`, `%pcrel_hi`, `%pcrel_lo`.
    UnknownReloc,
    /// A symbol was used which does not occur in any token.
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFitU32  => f.write_str("numeric token does not fit 32-bit integer"),
            LexErr::InvalidNumeric => f.write_str("invalid numeric literal"),
            LexErr::EmptyNumeric   => f.write_str("numeric literal has no digits"),
            LexErr::UnclosedStrLit => f.write_str("unclosed string literal"),
            LexErr::InvalidEscape  => f.write_str("invalid escape character"),
            LexErr::InvalidCharLit => f.write_str("invalid character literal"),
            LexErr::UnknownReloc   => f.write_str("unknown relocation specifier"),
            LexErr::InvalidSymbol  => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFitU32  => Some(format!("the range for a 32-bit integer literal is [0, {}]", u32::MAX).into()),
            LexErr::InvalidNumeric => Some("numeric literals are decimal, 0x hexadecimal, or 0b binary".into()),
            LexErr::EmptyNumeric   => Some("there should be digits after the base prefix".into()),
            LexErr::UnclosedStrLit => Some("add a quote to the end of the string literal".into()),
            LexErr::InvalidEscape  => Some(r#"the supported escapes are \n, \t, \r, \0, \\, and \""#.into()),
            LexErr::InvalidCharLit => Some("character literals hold exactly one character, e.g. 'a' or '\\n'".into()),
            LexErr::UnknownReloc   => Some("the supported specifiers are %hi, %lo, %pcrel_hi, and %pcrel_lo".into()),
            LexErr::InvalidSymbol  => Some("this char does not occur in any token in RV32 assembly".into()),
        }
    }
}

fn convert_int_error(e: &IntErrorKind) -> LexErr {
    match e {
        IntErrorKind::Empty        => LexErr::EmptyNumeric,
        IntErrorKind::InvalidDigit => LexErr::InvalidNumeric,
        IntErrorKind::PosOverflow  => LexErr::DoesNotFitU32,
        IntErrorKind::NegOverflow  => LexErr::DoesNotFitU32,
        _ => LexErr::InvalidNumeric,
    }
}

fn lex_numeric(lx: &Lexer<'_, Token>) -> Result<u32, LexErr> {
    let s = lx.slice();
    let (digits, radix) = match s.get(..2) {
        Some("0x") | Some("0X") => (&s[2..], 16),
        Some("0b") | Some("0B") => (&s[2..], 2),
        _ => (s, 10),
    };
    u32::from_str_radix(digits, radix)
        .map_err(|e| convert_int_error(e.kind()))
}

/// Decodes the escape following a backslash.
fn unescape(c: u8) -> Result<u8, LexErr> {
    match c {
        b'n'  => Ok(b'\n'),
        b't'  => Ok(b'\t'),
        b'r'  => Ok(b'\r'),
        b'0'  => Ok(b'\0'),
        b'\\' => Ok(b'\\'),
        b'"'  => Ok(b'"'),
        b'\'' => Ok(b'\''),
        _ => Err(LexErr::InvalidEscape),
    }
}

fn lex_char_literal(lx: &mut Lexer<'_, Token>) -> Result<u32, LexErr> {
    let rem = lx.remainder().as_bytes();

    let (value, len) = match rem {
        [b'\\', esc, b'\'', ..] => (unescape(*esc)?, 3),
        [b'\\', ..]             => return Err(LexErr::InvalidEscape),
        [c, b'\'', ..] if *c != b'\'' && *c != b'\n' => (*c, 2),
        _ => return Err(LexErr::InvalidCharLit),
    };

    lx.bump(len);
    Ok(u32::from(value))
}

fn lex_reloc(lx: &Lexer<'_, Token>) -> Result<RelKind, LexErr> {
    match lx.slice() {
        "%hi"       => Ok(RelKind::Hi),
        "%lo"       => Ok(RelKind::Lo),
        "%pcrel_hi" => Ok(RelKind::PcrelHi),
        "%pcrel_lo" => Ok(RelKind::PcrelLo),
        _ => Err(LexErr::UnknownReloc),
    }
}

fn lex_str_literal(lx: &mut Lexer<'_, Token>) -> Result<Vec<u8>, LexErr> {
    let rem = lx.remainder().as_bytes();
    let mut buf = Vec::new();

    let mut i = 0;
    while let Some(&c) = rem.get(i) {
        match c {
            b'"' => {
                lx.bump(i + 1);
                return Ok(buf);
            },
            b'\\' => {
                let Some(&esc) = rem.get(i + 1) else { break };
                buf.push(unescape(esc)?);
                i += 2;
            },
            b'\n' => break,
            _ => {
                buf.push(c);
                i += 1;
            },
        }
    }

    lx.bump(i);
    Err(LexErr::UnclosedStrLit)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{LexErr, Token};

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }
    fn str_literal(s: &str) -> Token {
        Token::String(s.as_bytes().to_vec())
    }

    #[test]
    fn test_numeric_success() {
        let mut tokens = Token::lexer("0 123 0x7F 0XAb 0b101 4294967295");
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(123))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0x7F))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0xAB))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0b101))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(u32::MAX))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_numeric_negative_is_two_tokens() {
        let mut tokens = Token::lexer("-42");
        assert_eq!(tokens.next(), Some(Ok(Token::Minus)));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(42))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_numeric_failures() {
        assert_eq!(Token::lexer("4294967296").next(), Some(Err(LexErr::DoesNotFitU32)));
        assert_eq!(Token::lexer("0x10000000000").next(), Some(Err(LexErr::DoesNotFitU32)));
        assert_eq!(Token::lexer("12ab").next(), Some(Err(LexErr::InvalidNumeric)));
        assert_eq!(Token::lexer("0b2").next(), Some(Err(LexErr::InvalidNumeric)));
        assert_eq!(Token::lexer("0x").next(), Some(Err(LexErr::EmptyNumeric)));
        assert_eq!(Token::lexer("0b").next(), Some(Err(LexErr::EmptyNumeric)));
    }

    #[test]
    fn test_char_literal() {
        let mut tokens = Token::lexer(r"'a' '0' '\n' '\\' '\'' ' '");
        assert_eq!(tokens.next(), Some(Ok(Token::Int(u32::from(b'a')))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(u32::from(b'0')))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(u32::from(b'\n')))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(u32::from(b'\\')))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(u32::from(b'\'')))));
        assert_eq!(tokens.next(), Some(Ok(Token::Int(u32::from(b' ')))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer(r"'\e'").next(), Some(Err(LexErr::InvalidEscape)));
        assert_eq!(Token::lexer("''").next(), Some(Err(LexErr::InvalidCharLit)));
        assert_eq!(Token::lexer("'ab'").next(), Some(Err(LexErr::InvalidCharLit)));
    }

    #[test]
    fn test_idents_and_directives() {
        let mut tokens = Token::lexer(".globl main .L0 a0 x31 foo_bar@plt");
        assert_eq!(tokens.next(), Some(Ok(ident(".globl"))));
        assert_eq!(tokens.next(), Some(Ok(ident("main"))));
        assert_eq!(tokens.next(), Some(Ok(ident(".L0"))));
        assert_eq!(tokens.next(), Some(Ok(ident("a0"))));
        assert_eq!(tokens.next(), Some(Ok(ident("x31"))));
        assert_eq!(tokens.next(), Some(Ok(ident("foo_bar@plt"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_reloc() {
        use crate::ast::RelKind;

        let mut tokens = Token::lexer("%hi %lo %pcrel_hi %pcrel_lo");
        assert_eq!(tokens.next(), Some(Ok(Token::Reloc(RelKind::Hi))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reloc(RelKind::Lo))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reloc(RelKind::PcrelHi))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reloc(RelKind::PcrelLo))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("%got").next(), Some(Err(LexErr::UnknownReloc)));
    }

    #[test]
    fn test_str() {
        let mut tokens = Token::lexer(r#" "" "abc" "hello\n" "a\tb\0" "say \"hi\"" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal(""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("abc"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("hello\n"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("a\tb\0"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("say \"hi\""))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_failures() {
        assert_eq!(Token::lexer(r#"""#).next(), Some(Err(LexErr::UnclosedStrLit)));
        assert_eq!(Token::lexer("\"abc\ndef\"").next(), Some(Err(LexErr::UnclosedStrLit)));
        assert_eq!(Token::lexer(r#""bad \e escape""#).next(), Some(Err(LexErr::InvalidEscape)));
    }

    #[test]
    fn test_comments() {
        let mut tokens = Token::lexer("addi # comment, with: tokens\nret");
        assert_eq!(tokens.next(), Some(Ok(ident("addi"))));
        assert_eq!(tokens.next(), Some(Ok(Token::NewLine)));
        assert_eq!(tokens.next(), Some(Ok(ident("ret"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_hash_inside_string_is_not_comment() {
        let mut tokens = Token::lexer(r##""a # b" # real comment"##);
        assert_eq!(tokens.next(), Some(Ok(str_literal("a # b"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_punct() {
        let mut tokens = Token::lexer("0(sp) , : + - ; \n");
        assert_eq!(tokens.next(), Some(Ok(Token::Int(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::LParen)));
        assert_eq!(tokens.next(), Some(Ok(ident("sp"))));
        assert_eq!(tokens.next(), Some(Ok(Token::RParen)));
        assert_eq!(tokens.next(), Some(Ok(Token::Comma)));
        assert_eq!(tokens.next(), Some(Ok(Token::Colon)));
        assert_eq!(tokens.next(), Some(Ok(Token::Plus)));
        assert_eq!(tokens.next(), Some(Ok(Token::Minus)));
        assert_eq!(tokens.next(), Some(Ok(Token::NewLine)));
        assert_eq!(tokens.next(), Some(Ok(Token::NewLine)));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_invalid_symbol() {
        assert_eq!(Token::lexer("{").next(), Some(Err(LexErr::InvalidSymbol)));
        assert_eq!(Token::lexer("!").next(), Some(Err(LexErr::InvalidSymbol)));
    }
}
