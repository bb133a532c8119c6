#![forbid(unsafe_code)]

use cnd_ast::{format_expr, Expr, Span};
use tracing::trace;

use crate::error::ShapeError;
use crate::shape::{ShapeDescriptor, StorageOrder};

/// Runtime check function emitted in the preamble when bounds checking is on.
pub const CHECK_INDEX_FN: &str = "cnd_check_index";

/// Source position a bounds check reports when it fails.
#[derive(Clone, Copy, Debug)]
pub struct CheckSite<'a> {
    pub file: &'a str,
    pub line: usize,
}

/// Linear offset of `indices` into storage shaped by `desc`.
///
/// The offset is built in Horner form over the axes from slowest to fastest
/// varying, `((n0 * e1 + n1) * e2 + n2) ...` for row-major storage, where
/// `nk = (idx_k - lo_k) * step_k` and `ek` is the leading dimension of axis
/// `k` (its extent unless written otherwise). Every index expression appears
/// exactly once in the result. With `check`, each index is routed through the
/// runtime range check first.
pub fn compile_offset(
    desc: &ShapeDescriptor,
    indices: &[Expr],
    span: Span,
    check: Option<CheckSite<'_>>,
) -> Result<Expr, ShapeError> {
    if indices.len() != desc.rank() {
        return Err(ShapeError::ArityMismatch {
            name: desc.name().to_string(),
            expected: desc.rank(),
            found: indices.len(),
            span,
        });
    }
    if let Some(axis) = desc.first_open_axis() {
        return Err(ShapeError::IncompleteShape {
            name: desc.name().to_string(),
            axis,
            span,
        });
    }

    let order: Vec<usize> = match desc.order() {
        StorageOrder::RowMajor => (0..desc.rank()).collect(),
        StorageOrder::ColumnMajor => (0..desc.rank()).rev().collect(),
    };

    let mut acc: Option<Expr> = None;
    for k in order {
        let normalized = normalized_index(desc, k, indices[k].clone(), check)?;
        acc = Some(match acc {
            None => normalized,
            Some(prev) => {
                let ld = leading_dim(desc, k, span)?;
                Expr::add(Expr::mul(prev, ld), normalized)
            }
        });
    }

    // A rank-0 shape has a single element.
    let offset = acc.unwrap_or_else(|| Expr::int(0));
    trace!(symbol = desc.name(), offset = %offset, "compiled offset");
    Ok(offset)
}

fn normalized_index(
    desc: &ShapeDescriptor,
    k: usize,
    index: Expr,
    check: Option<CheckSite<'_>>,
) -> Result<Expr, ShapeError> {
    let Some(axis) = desc.axis(k) else {
        return Err(incomplete(desc, k));
    };
    let Some(check) = check else {
        return Ok(axis.normalize(index));
    };
    let Some(upper) = &axis.upper else {
        return Err(incomplete(desc, k));
    };
    let call = format!(
        "{CHECK_INDEX_FN}({}, {}, {}, {k}, \"{}\", \"{}\", {})",
        format_expr(&index),
        format_expr(&axis.lower),
        format_expr(upper),
        desc.name(),
        escape_c_string(check.file),
        check.line,
    );
    Ok(axis.normalize(Expr::opaque(call)))
}

fn leading_dim(desc: &ShapeDescriptor, k: usize, span: Span) -> Result<Expr, ShapeError> {
    desc.leading_dim(k).cloned().ok_or_else(|| ShapeError::IncompleteShape {
        name: desc.name().to_string(),
        axis: k,
        span,
    })
}

fn incomplete(desc: &ShapeDescriptor, axis: usize) -> ShapeError {
    ShapeError::IncompleteShape {
        name: desc.name().to_string(),
        axis,
        span: desc.span(),
    }
}

pub(crate) fn escape_c_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
