#![forbid(unsafe_code)]

use crate::{Expr, Ident, Span, Spanned};

/// A scanned translation unit: the source split into passthrough text and the
/// sites the translator rewrites.
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    pub fragments: Vec<Fragment>,
}

impl Unit {
    /// Every `dimension` declaration in source order, including ones nested in
    /// arguments.
    pub fn declarations(&self) -> Vec<&DimensionDecl> {
        let mut out = Vec::new();
        collect_decls(&self.fragments, &mut out);
        out
    }
}

fn collect_decls<'a>(fragments: &'a [Fragment], out: &mut Vec<&'a DimensionDecl>) {
    for f in fragments {
        match f {
            Fragment::Declaration(d) => out.push(d),
            Fragment::Subscript(s) => {
                for a in &s.args {
                    collect_decls(&a.fragments, out);
                }
            }
            Fragment::Helper(h) => {
                for a in &h.args {
                    collect_decls(&a.fragments, out);
                }
            }
            Fragment::Text(_) | Fragment::ScopeOpen(_) | Fragment::ScopeClose(_) => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Fragment {
    /// Source copied through unchanged.
    Text(Span),
    /// `{`
    ScopeOpen(Span),
    /// `}`
    ScopeClose(Span),
    Declaration(DimensionDecl),
    Subscript(Subscript),
    Helper(HelperCall),
}

impl Fragment {
    pub fn span(&self) -> Span {
        match self {
            Fragment::Text(s) | Fragment::ScopeOpen(s) | Fragment::ScopeClose(s) => *s,
            Fragment::Declaration(d) => d.span,
            Fragment::Subscript(s) => s.span,
            Fragment::Helper(h) => h.span,
        }
    }
}

/// `dimension ["order"] name[axis, ...];`
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionDecl {
    pub span: Span,
    pub name: Ident,
    /// Contents of the order string literal, quotes removed.
    pub layout: Option<Spanned<String>>,
    pub axes: Vec<AxisSyntax>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AxisSyntax {
    pub span: Span,
    pub bounds: AxisBounds,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AxisBounds {
    /// `hi`
    Upper(Arg),
    /// `lo:hi`, `lo:` (open upper bound) or `:hi` (lower bound defaults to 0),
    /// optionally followed by `:step` and `:leading_dim`
    Range {
        lower: Option<Arg>,
        upper: Option<Arg>,
        step: Option<Arg>,
        leading: Option<Arg>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delim {
    Bracket,
    Paren,
}

/// `name[i, j]` or `name(i, j)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Subscript {
    pub span: Span,
    pub name: Ident,
    pub delim: Delim,
    pub args: Vec<Arg>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HelperCall {
    pub span: Span,
    pub kind: HelperKind,
    pub name: Ident,
    pub args: Vec<Arg>,
}

/// One comma/semicolon separated piece of an argument list.
#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    pub span: Span,
    /// Sites nested inside the argument, with the text around them.
    pub fragments: Vec<Fragment>,
    /// The argument as integer arithmetic, when it is nothing more than that.
    pub expr: Option<Expr>,
    /// Set when the argument is a lone identifier.
    pub ident: Option<Ident>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HelperKind {
    Rank,
    ElementCount,
    LowerBound,
    UpperBound,
    PastUpperBound,
    Extent,
    LeadingDim,
    Stride,
    AllocHeap,
    DeclAllocHeap,
    DeclAllocStack,
    ForAxis,
}

impl HelperKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "rankof" => HelperKind::Rank,
            "nitemsof" => HelperKind::ElementCount,
            "lboundof" => HelperKind::LowerBound,
            "uboundof" => HelperKind::UpperBound,
            "puboundof" => HelperKind::PastUpperBound,
            "extentof" => HelperKind::Extent,
            "ldimof" => HelperKind::LeadingDim,
            "strideof" => HelperKind::Stride,
            "CND_ALLOC_HEAP" => HelperKind::AllocHeap,
            "CND_DECL_ALLOC_HEAP" => HelperKind::DeclAllocHeap,
            "CND_DECL_ALLOC_STACK" => HelperKind::DeclAllocStack,
            "CND_FOR_AXIS" => HelperKind::ForAxis,
            _ => return None,
        })
    }

    /// Allowed argument counts, as `(min, max)`; `None` means unbounded.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            HelperKind::Rank | HelperKind::ElementCount => (1, Some(1)),
            HelperKind::LowerBound
            | HelperKind::UpperBound
            | HelperKind::PastUpperBound
            | HelperKind::Extent
            | HelperKind::LeadingDim
            | HelperKind::Stride => (2, Some(2)),
            HelperKind::AllocHeap | HelperKind::DeclAllocHeap | HelperKind::DeclAllocStack => {
                (2, None)
            }
            HelperKind::ForAxis => (3, Some(3)),
        }
    }

    /// Position of the argument naming the dimensioned symbol.
    pub fn symbol_arg(self) -> usize {
        match self {
            HelperKind::Rank
            | HelperKind::ElementCount
            | HelperKind::LowerBound
            | HelperKind::UpperBound
            | HelperKind::PastUpperBound
            | HelperKind::Extent
            | HelperKind::LeadingDim
            | HelperKind::Stride => 0,
            HelperKind::AllocHeap
            | HelperKind::DeclAllocHeap
            | HelperKind::DeclAllocStack
            | HelperKind::ForAxis => 1,
        }
    }
}
