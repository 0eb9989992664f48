//! Error reporting utilities.
//!
//! All user-visible errors in this crate (lexing, parsing, assembling,
//! linking, and simulating) implement the [`Error`] trait, which extends
//! [`std::error::Error`] with:
//! - [`Error::span`]: the range of source code the error points at (if any)
//! - [`Error::help`]: a hint on how to resolve the error (if any)
//!
//! The [`report_error`] function renders an error against its source file
//! in a `file:line:col` + underlined-snippet format.

use std::borrow::Cow;
use std::ops::Range;

use crate::asm::SourceInfo;

/// Unified error interface for all of this crate's error types.
pub trait Error: std::error::Error {
    /// The section of source code that caused this error (if known).
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A hint describing how the error could be resolved (if one exists).
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}

/// A span of source code associated with an error.
///
/// This may consist of one contiguous range, or several
/// (e.g., for a duplicate-definition error pointing at both definitions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrSpan {
    /// One contiguous span.
    One(Range<usize>),
    /// Multiple spans, in source order.
    Many(Vec<Range<usize>>)
}
impl ErrSpan {
    /// The first (or only) range of this span.
    pub fn first(&self) -> Range<usize> {
        match self {
            ErrSpan::One(r) => r.clone(),
            ErrSpan::Many(v) => v.first().cloned().unwrap_or(0..0),
        }
    }

    /// Iterates over all ranges of this span.
    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        let (one, many): (Option<_>, &[_]) = match self {
            ErrSpan::One(r) => (Some(r.clone()), &[]),
            ErrSpan::Many(v) => (None, v),
        };
        one.into_iter().chain(many.iter().cloned())
    }
}
impl From<Range<usize>> for ErrSpan {
    fn from(value: Range<usize>) -> Self {
        ErrSpan::One(value)
    }
}
impl<const N: usize> From<[Range<usize>; N]> for ErrSpan {
    fn from(value: [Range<usize>; N]) -> Self {
        ErrSpan::Many(value.to_vec())
    }
}
impl From<Vec<Range<usize>>> for ErrSpan {
    fn from(value: Vec<Range<usize>>) -> Self {
        ErrSpan::Many(value)
    }
}

/// Renders an error against the source it came from.
///
/// The rendering consists of the error message, each source line the error
/// spans (with a `^~~~` underline), and the error's help hint (if any).
pub fn format_error(err: &dyn Error, filename: &str, src: &SourceInfo) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "error: {err}");

    if let Some(span) = err.span() {
        for range in span.iter() {
            let (line, col) = src.get_pos_pair(range.start);
            let _ = writeln!(out, "  --> {}:{}:{}", filename, line + 1, col + 1);

            if let Some(text) = src.read_line(line) {
                let Some(line_span) = src.line_span(line) else { continue };
                let _ = writeln!(out, "   |  {text}");

                // Underline the intersection of the span and this line.
                let start = range.start.clamp(line_span.start, line_span.end) - line_span.start;
                let end = range.end.clamp(line_span.start, line_span.end) - line_span.start;
                let _ = writeln!(out, "   |  {}{}", " ".repeat(start), "^".repeat(end.saturating_sub(start).max(1)));
            }
        }
    }

    if let Some(help) = err.help() {
        let _ = writeln!(out, "help: {help}");
    }

    out
}
