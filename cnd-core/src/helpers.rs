#![forbid(unsafe_code)]

use cnd_ast::{format_expr, one_line, Expr, HelperCall, HelperKind, Ident, Span};
use tracing::debug;

use crate::config::TranslateConfig;
use crate::error::ShapeError;
use crate::offset::escape_c_string;
use crate::registry::ShapeRegistry;
use crate::shape::ShapeDescriptor;

/// Runtime function emitted in the preamble for checked allocations.
pub const ALLOC_FAILURE_FN: &str = "cnd_allocation_failure";

/// A helper argument after the sites nested inside it were rewritten.
#[derive(Clone, Debug)]
pub struct HelperArg<'a> {
    pub span: Span,
    /// Rewritten source text of the argument.
    pub text: String,
    /// The argument as integer arithmetic, when it is nothing more than that.
    pub expr: Option<Expr>,
    pub ident: Option<&'a Ident>,
}

impl HelperArg<'_> {
    /// The argument as an expression, host text included verbatim.
    pub fn value(&self) -> Expr {
        self.expr.clone().unwrap_or_else(|| Expr::opaque(&self.text))
    }
}

/// What a helper expansion needs to know about its surroundings.
#[derive(Clone, Copy, Debug)]
pub struct HelperContext<'a> {
    pub config: &'a TranslateConfig,
    pub file: &'a str,
    pub line: usize,
}

/// Expand one helper invocation against the live registry.
///
/// Queries become expressions and allocation and iteration helpers become
/// statement heads; the source text after the call (its `;` or loop body) is
/// left to complete them. Allocation helpers with trailing extent arguments
/// resolve the open axes of their symbol first.
pub fn expand_helper(
    call: &HelperCall,
    args: &[HelperArg<'_>],
    registry: &mut ShapeRegistry,
    ctx: HelperContext<'_>,
) -> Result<String, ShapeError> {
    check_arity(call, args.len())?;
    let helper = call.name.node.as_str();
    let symbol = symbol_arg(call, &args[call.kind.symbol_arg()])?;

    let out = match call.kind {
        HelperKind::Rank => {
            let desc = registry.lookup(&symbol.node, symbol.span)?;
            desc.rank().to_string()
        }
        HelperKind::ElementCount => {
            let desc = registry.lookup(&symbol.node, symbol.span)?;
            operand(&element_count(desc, call.span)?)
        }
        HelperKind::LowerBound
        | HelperKind::UpperBound
        | HelperKind::PastUpperBound
        | HelperKind::Extent
        | HelperKind::LeadingDim
        | HelperKind::Stride => {
            let desc = registry.lookup(&symbol.node, symbol.span)?;
            let k = axis_arg(helper, desc, &args[1])?;
            operand(&axis_query(call.kind, desc, k, call.span)?)
        }
        HelperKind::AllocHeap | HelperKind::DeclAllocHeap | HelperKind::DeclAllocStack => {
            let extents: Vec<Expr> = args[2..].iter().map(HelperArg::value).collect();
            let desc = registry.resolve_open(&symbol.node, &extents, call.span)?;
            let count = element_count(desc, call.span)?;
            let ty = one_line(&args[0].text);
            let ty = ty.as_str();
            let name = &symbol.node;
            match call.kind {
                HelperKind::DeclAllocStack => format!("{ty} {name}[{}]", format_expr(&count)),
                HelperKind::AllocHeap => {
                    let mut out = format!("{name} = malloc({})", alloc_bytes(count, ty));
                    push_allocation_check(&mut out, name, ctx);
                    out
                }
                _ => {
                    let mut out = format!("{ty} *{name} = malloc({})", alloc_bytes(count, ty));
                    push_allocation_check(&mut out, name, ctx);
                    out
                }
            }
        }
        HelperKind::ForAxis => {
            let var = args[0].ident.ok_or_else(|| ShapeError::NotASymbol {
                helper: helper.to_string(),
                span: args[0].span,
            })?;
            let desc = registry.lookup(&symbol.node, symbol.span)?;
            let k = axis_arg(helper, desc, &args[2])?;
            let lower = axis_query(HelperKind::LowerBound, desc, k, call.span)?;
            let upper = axis_query(HelperKind::UpperBound, desc, k, call.span)?;
            let v = &var.node;
            format!(
                "for ({} {v} = {}; {v} <= {}; ++{v})",
                ctx.config.index_type,
                format_expr(&lower),
                format_expr(&upper),
            )
        }
    };

    debug!(helper, symbol = symbol.node.as_str(), expansion = out.as_str(), "expand helper");
    Ok(out)
}

fn check_arity(call: &HelperCall, found: usize) -> Result<(), ShapeError> {
    let (min, max) = call.kind.arity();
    let ok = found >= min && max.is_none_or(|m| found <= m);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(m) if m == min => min.to_string(),
        Some(m) => format!("{min} to {m}"),
        None => format!("at least {min}"),
    };
    Err(ShapeError::HelperArity {
        helper: call.name.node.clone(),
        expected,
        found,
        span: call.span,
    })
}

fn symbol_arg<'a>(call: &HelperCall, arg: &HelperArg<'a>) -> Result<&'a Ident, ShapeError> {
    arg.ident.ok_or_else(|| ShapeError::NotASymbol {
        helper: call.name.node.clone(),
        span: arg.span,
    })
}

fn axis_arg(helper: &str, desc: &ShapeDescriptor, arg: &HelperArg<'_>) -> Result<usize, ShapeError> {
    let Some(k) = arg.expr.as_ref().and_then(Expr::as_int) else {
        return Err(ShapeError::NonConstantAxis {
            helper: helper.to_string(),
            span: arg.span,
        });
    };
    match usize::try_from(k) {
        Ok(axis) if axis < desc.rank() => Ok(axis),
        _ => Err(ShapeError::AxisOutOfRange {
            name: desc.name().to_string(),
            axis: k,
            rank: desc.rank(),
            span: arg.span,
        }),
    }
}

fn axis_query(kind: HelperKind, desc: &ShapeDescriptor, k: usize, span: Span) -> Result<Expr, ShapeError> {
    let incomplete = |axis: usize| ShapeError::IncompleteShape {
        name: desc.name().to_string(),
        axis,
        span,
    };
    let Some(axis) = desc.axis(k) else {
        return Err(incomplete(k));
    };
    match kind {
        HelperKind::LowerBound => Ok(axis.lower.clone()),
        HelperKind::UpperBound => axis.upper.clone().ok_or_else(|| incomplete(k)),
        HelperKind::PastUpperBound => axis.past_upper().ok_or_else(|| incomplete(k)),
        HelperKind::Extent => desc.extent(k).cloned().ok_or_else(|| incomplete(k)),
        HelperKind::LeadingDim => desc.leading_dim(k).cloned().ok_or_else(|| incomplete(k)),
        _ => desc
            .stride(k)
            .cloned()
            .ok_or_else(|| incomplete(desc.first_open_axis().unwrap_or(k))),
    }
}

fn element_count(desc: &ShapeDescriptor, span: Span) -> Result<Expr, ShapeError> {
    desc.element_count().ok_or_else(|| ShapeError::IncompleteShape {
        name: desc.name().to_string(),
        axis: desc.first_open_axis().unwrap_or(0),
        span,
    })
}

fn alloc_bytes(count: Expr, ty: &str) -> String {
    format_expr(&Expr::mul(count, Expr::opaque(format!("sizeof({ty})"))))
}

fn push_allocation_check(out: &mut String, name: &str, ctx: HelperContext<'_>) {
    if ctx.config.check_allocations {
        out.push_str(&format!(
            "; if ({name} == NULL) {ALLOC_FAILURE_FN}(\"{name}\", \"{}\", {})",
            escape_c_string(ctx.file),
            ctx.line
        ));
    }
}

/// Expression text that can stand in any operand position.
fn operand(e: &Expr) -> String {
    let text = format_expr(e);
    match e {
        Expr::Int(n) if *n >= 0 => text,
        Expr::Var(_) | Expr::Opaque(_) => text,
        _ => format!("({text})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{AxisSpec, StorageOrder};
    use cnd_ast::{span, HelperKind, Spanned};

    fn ident(name: &str, at: usize) -> Ident {
        Spanned::new(span(at, name.len()), name.to_string())
    }

    fn call(kind: HelperKind, name: &str) -> HelperCall {
        HelperCall {
            span: span(0, 20),
            kind,
            name: ident(name, 0),
            args: Vec::new(),
        }
    }

    fn sym(id: &Ident) -> HelperArg<'_> {
        HelperArg {
            span: id.span,
            text: id.node.clone(),
            expr: Some(Expr::var(id.node.clone())),
            ident: Some(id),
        }
    }

    fn lit(text: &str, value: Option<i64>) -> HelperArg<'static> {
        HelperArg {
            span: span(30, text.len()),
            text: text.to_string(),
            expr: value.map(Expr::int),
            ident: None,
        }
    }

    fn registry() -> ShapeRegistry {
        let mut reg = ShapeRegistry::default();
        let n = Expr::var("n");
        reg.declare(ShapeDescriptor::new(
            "m",
            StorageOrder::ColumnMajor,
            vec![
                AxisSpec::new(Expr::int(0), n.clone()),
                AxisSpec::new(Expr::neg(n.clone()), n),
            ],
            span(0, 1),
        ))
        .unwrap();
        reg.declare(ShapeDescriptor::new(
            "w",
            StorageOrder::RowMajor,
            vec![AxisSpec::new(Expr::int(0), Expr::int(3)), AxisSpec::open(Expr::int(1))],
            span(0, 1),
        ))
        .unwrap();
        reg
    }

    fn ctx(config: &TranslateConfig) -> HelperContext<'_> {
        HelperContext {
            config,
            file: "t.c",
            line: 4,
        }
    }

    #[test]
    fn queries_read_the_descriptor() {
        let config = TranslateConfig::default();
        let mut reg = registry();
        let m = ident("m", 10);
        let q = |kind, name, axis: i64, reg: &mut ShapeRegistry| {
            expand_helper(&call(kind, name), &[sym(&m), lit("k", Some(axis))], reg, ctx(&config))
                .unwrap()
        };
        assert_eq!(q(HelperKind::LowerBound, "lboundof", 1, &mut reg), "(-n)");
        assert_eq!(q(HelperKind::UpperBound, "uboundof", 1, &mut reg), "n");
        assert_eq!(q(HelperKind::PastUpperBound, "puboundof", 0, &mut reg), "(n + 1)");
        assert_eq!(q(HelperKind::Extent, "extentof", 1, &mut reg), "(n + n + 1)");
        assert_eq!(q(HelperKind::LeadingDim, "ldimof", 1, &mut reg), "(n + n + 1)");
        assert_eq!(q(HelperKind::Stride, "strideof", 1, &mut reg), "(n + 1)");
        assert_eq!(q(HelperKind::Stride, "strideof", 0, &mut reg), "1");

        let count = expand_helper(&call(HelperKind::ElementCount, "nitemsof"), &[sym(&m)], &mut reg, ctx(&config))
            .unwrap();
        assert_eq!(count, "((n + 1) * (n + n + 1))");
        let rank = expand_helper(&call(HelperKind::Rank, "rankof"), &[sym(&m)], &mut reg, ctx(&config)).unwrap();
        assert_eq!(rank, "2");
    }

    #[test]
    fn axis_arguments_are_checked() {
        let config = TranslateConfig::default();
        let mut reg = registry();
        let m = ident("m", 10);
        let lb = call(HelperKind::LowerBound, "lboundof");

        let err = expand_helper(&lb, &[sym(&m), lit("2", Some(2))], &mut reg, ctx(&config)).unwrap_err();
        assert!(matches!(err, ShapeError::AxisOutOfRange { axis: 2, rank: 2, .. }));
        let err = expand_helper(&lb, &[sym(&m), lit("-1", Some(-1))], &mut reg, ctx(&config)).unwrap_err();
        assert!(matches!(err, ShapeError::AxisOutOfRange { axis: -1, .. }));
        let err = expand_helper(&lb, &[sym(&m), lit("k", None)], &mut reg, ctx(&config)).unwrap_err();
        assert!(matches!(err, ShapeError::NonConstantAxis { .. }));
        let err = expand_helper(&lb, &[sym(&m)], &mut reg, ctx(&config)).unwrap_err();
        assert!(matches!(err, ShapeError::HelperArity { found: 1, .. }));
        let err = expand_helper(&lb, &[lit("m[0]", None), lit("0", Some(0))], &mut reg, ctx(&config)).unwrap_err();
        assert!(matches!(err, ShapeError::NotASymbol { .. }));
    }

    #[test]
    fn allocations_size_by_element_count() {
        let config = TranslateConfig::default();
        let mut reg = registry();
        let m = ident("m", 10);
        let ty = lit("complex double", None);

        let heap = expand_helper(&call(HelperKind::AllocHeap, "CND_ALLOC_HEAP"), &[ty.clone(), sym(&m)], &mut reg, ctx(&config))
            .unwrap();
        assert_eq!(heap, "m = malloc((n + 1) * (n + n + 1) * sizeof(complex double))");

        let stack = expand_helper(
            &call(HelperKind::DeclAllocStack, "CND_DECL_ALLOC_STACK"),
            &[ty, sym(&m)],
            &mut reg,
            ctx(&config),
        )
        .unwrap();
        assert_eq!(stack, "complex double m[(n + 1) * (n + n + 1)]");
    }

    #[test]
    fn checked_heap_allocation_tests_for_null() {
        let config = TranslateConfig {
            check_allocations: true,
            ..TranslateConfig::default()
        };
        let mut reg = registry();
        let m = ident("m", 10);
        let out = expand_helper(
            &call(HelperKind::DeclAllocHeap, "CND_DECL_ALLOC_HEAP"),
            &[lit("double", None), sym(&m)],
            &mut reg,
            ctx(&config),
        )
        .unwrap();
        assert_eq!(
            out,
            "double *m = malloc((n + 1) * (n + n + 1) * sizeof(double)); if (m == NULL) cnd_allocation_failure(\"m\", \"t.c\", 4)"
        );
    }

    #[test]
    fn extents_resolve_open_axes() {
        let config = TranslateConfig::default();
        let mut reg = registry();
        let w = ident("w", 10);
        let alloc = call(HelperKind::AllocHeap, "CND_ALLOC_HEAP");
        let count = call(HelperKind::ElementCount, "nitemsof");

        let err = expand_helper(&count, &[sym(&w)], &mut reg, ctx(&config)).unwrap_err();
        assert!(matches!(err, ShapeError::IncompleteShape { axis: 1, .. }));

        let out = expand_helper(&alloc, &[lit("float", None), sym(&w), lit("k", None)], &mut reg, ctx(&config))
            .unwrap();
        assert_eq!(out, "w = malloc(4 * k * sizeof(float))");
        assert_eq!(reg.get("w").unwrap().first_open_axis(), None);
    }

    #[test]
    fn axis_loops_are_inclusive() {
        let config = TranslateConfig::default();
        let mut reg = registry();
        let m = ident("m", 10);
        let j = ident("j", 2);
        let out = expand_helper(
            &call(HelperKind::ForAxis, "CND_FOR_AXIS"),
            &[sym(&j), sym(&m), lit("1", Some(1))],
            &mut reg,
            ctx(&config),
        )
        .unwrap();
        assert_eq!(out, "for (long j = -n; j <= n; ++j)");
    }
}
