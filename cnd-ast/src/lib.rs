#![forbid(unsafe_code)]

mod expr;
mod fmt;
mod fragment;

use miette::SourceSpan;

pub use expr::{one_line, BinOp, Env, EvalError, Expr};
pub use fmt::format_expr;
pub use fragment::{
    Arg, AxisBounds, AxisSyntax, Delim, DimensionDecl, Fragment, HelperCall, HelperKind, Subscript,
    Unit,
};

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub type Ident = Spanned<String>;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub fn span_start(s: Span) -> usize {
    s.offset()
}

pub fn span_end(s: Span) -> usize {
    s.offset() + s.len()
}

/// Smallest span covering both `a` and `b`.
pub fn join(a: Span, b: Span) -> Span {
    let start = span_start(a).min(span_start(b));
    let end = span_end(a).max(span_end(b));
    span_between(start, end)
}

/// 1-based line and column of a byte offset. Offsets past the end clamp to the
/// last position.
pub fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(src.len());
    let before = &src[..offset];
    let line = before.bytes().filter(|b| *b == b'\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = before[line_start..].chars().count() + 1;
    (line, col)
}
