#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use cnd_ast::{EvalError, Span};
use cnd_lex::LexError;
use cnd_parse::ParseError;
use miette::Diagnostic;
use thiserror::Error;

/// Translation-time failure tied to a shape or a site that uses one. The
/// first one raised aborts translation of the unit.
#[derive(Debug, Error, Diagnostic)]
#[allow(unused_assignments)]
pub enum ShapeError {
    #[error("unknown shape: '{name}' has no visible dimension declaration")]
    #[diagnostic(code(cnd::unknown_shape))]
    UnknownShape {
        name: String,
        #[label("used here")]
        span: Span,
        #[help]
        help: Option<String>,
    },

    #[error("arity mismatch: '{name}' has {expected} axes but is subscripted with {found} indices")]
    #[diagnostic(code(cnd::arity_mismatch))]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        #[label("subscript")]
        span: Span,
    },

    #[error("incomplete shape: axis {axis} of '{name}' has no upper bound")]
    #[diagnostic(
        code(cnd::incomplete_shape),
        help("resolve the open bound by passing its extent to an allocation helper first")
    )]
    IncompleteShape {
        name: String,
        axis: usize,
        #[label("used here")]
        span: Span,
    },

    #[error("axis out of range: '{name}' has {rank} axes, axis {axis} requested")]
    #[diagnostic(code(cnd::axis_out_of_range))]
    AxisOutOfRange {
        name: String,
        axis: i64,
        rank: usize,
        #[label("axis index")]
        span: Span,
    },

    #[error("redeclaration of '{name}' is not allowed by the shadowing policy")]
    #[diagnostic(code(cnd::redeclaration))]
    Redeclaration {
        name: String,
        #[label("redeclared here")]
        span: Span,
        #[label("previous declaration")]
        previous: Span,
    },

    #[error("invalid storage order \"{layout}\"")]
    #[diagnostic(
        code(cnd::invalid_layout),
        help("use \"c\", \"row\" or \"row-major\" for row-major and \"fortran\", \"column\" or \"column-major\" for column-major")
    )]
    InvalidLayout {
        layout: String,
        #[label]
        span: Span,
    },

    #[error("'{helper}' expects {expected} arguments, found {found}")]
    #[diagnostic(code(cnd::helper_arity))]
    HelperArity {
        helper: String,
        expected: String,
        found: usize,
        #[label]
        span: Span,
    },

    #[error("'{helper}' expects an identifier here")]
    #[diagnostic(code(cnd::not_a_symbol))]
    NotASymbol {
        helper: String,
        #[label("not an identifier")]
        span: Span,
    },

    #[error("'{helper}' needs an integer constant axis index")]
    #[diagnostic(code(cnd::non_constant_axis))]
    NonConstantAxis {
        helper: String,
        #[label("not a constant")]
        span: Span,
    },

    #[error("unbalanced scope: closing brace without a matching opening brace")]
    #[diagnostic(code(cnd::unbalanced_scope))]
    UnbalancedScope {
        #[label]
        span: Span,
    },
}

impl ShapeError {
    pub fn span(&self) -> Span {
        match self {
            ShapeError::UnknownShape { span, .. }
            | ShapeError::ArityMismatch { span, .. }
            | ShapeError::IncompleteShape { span, .. }
            | ShapeError::AxisOutOfRange { span, .. }
            | ShapeError::Redeclaration { span, .. }
            | ShapeError::InvalidLayout { span, .. }
            | ShapeError::HelperArity { span, .. }
            | ShapeError::NotASymbol { span, .. }
            | ShapeError::NonConstantAxis { span, .. }
            | ShapeError::UnbalancedScope { span } => *span,
        }
    }
}

/// Any error that aborts translation of a unit.
#[derive(Debug, Error, Diagnostic)]
pub enum TranslateError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Shape(#[from] ShapeError),
}

impl TranslateError {
    pub fn span(&self) -> Span {
        match self {
            TranslateError::Lex(e) => e.span,
            TranslateError::Parse(e) => e.span,
            TranslateError::Shape(e) => e.span(),
        }
    }
}

/// An index outside its axis range, found while evaluating a shape for
/// concrete variable values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("index {value} out of range {lo}..={hi} on axis {axis}")]
pub struct IndexOutOfRange {
    pub axis: usize,
    pub value: i64,
    pub lo: i64,
    pub hi: i64,
}

/// Failures of the evaluated shape model ([`crate::ConcreteShape`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    IndexOutOfRange(#[from] IndexOutOfRange),
    #[error("axis {axis} has an open upper bound")]
    OpenAxis { axis: usize },
    #[error("axis {axis} has negative extent ({lo}..={hi})")]
    NegativeExtent { axis: usize, lo: i64, hi: i64 },
    #[error("expected {expected} indices, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("axis {axis} has step {step}; steps must be positive")]
    InvalidStep { axis: usize, step: i64 },
    #[error("axis {axis} has leading dimension {leading} but spans {needed} elements")]
    LeadingDimTooSmall { axis: usize, leading: i64, needed: usize },
    #[error("element count overflows")]
    Overflow,
}
