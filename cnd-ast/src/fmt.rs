#![forbid(unsafe_code)]

use crate::{BinOp, Expr};

/// Render an expression as C source with the fewest parentheses that keep
/// integer semantics intact.
pub fn format_expr(expr: &Expr) -> String {
    let mut out = String::new();
    fmt_expr(&mut out, expr, Prec::Lowest);
    out
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_expr(self))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest,
    Add,
    Mul,
    Unary,
    Primary,
}

fn bin_prec(op: BinOp) -> Prec {
    match op {
        BinOp::Add | BinOp::Sub => Prec::Add,
        BinOp::Mul | BinOp::Div | BinOp::Rem => Prec::Mul,
    }
}

fn expr_prec(expr: &Expr) -> Prec {
    match expr {
        Expr::Int(n) if *n < 0 => Prec::Unary,
        Expr::Int(_) | Expr::Var(_) | Expr::Opaque(_) => Prec::Primary,
        Expr::Neg(_) => Prec::Unary,
        Expr::Binary { op, .. } => bin_prec(*op),
    }
}

// Integer division truncates, so only `+` over `+`/`-` and `*` over `*` may
// drop the parentheses around a right operand of equal precedence.
fn right_needs_parens(op: BinOp, child: &Expr) -> bool {
    let my = bin_prec(op);
    let theirs = expr_prec(child);
    if theirs != my {
        return theirs < my;
    }
    let Expr::Binary { op: child_op, .. } = child else {
        return false;
    };
    !matches!(
        (op, child_op),
        (BinOp::Add, BinOp::Add | BinOp::Sub) | (BinOp::Mul, BinOp::Mul)
    )
}

fn fmt_expr(out: &mut String, expr: &Expr, parent_prec: Prec) {
    let my = expr_prec(expr);
    let parens = my < parent_prec;
    if parens {
        out.push('(');
    }

    match expr {
        Expr::Int(n) => out.push_str(&n.to_string()),
        Expr::Var(name) => out.push_str(name),
        Expr::Opaque(text) => {
            if is_simple_token(text) {
                out.push_str(text);
            } else {
                out.push('(');
                out.push_str(text);
                out.push(')');
            }
        }
        Expr::Neg(inner) => {
            out.push('-');
            // `- -x` would lex as `--x`.
            let inner_prec = if matches!(**inner, Expr::Neg(_) | Expr::Int(i64::MIN..=-1)) {
                Prec::Primary
            } else {
                Prec::Unary
            };
            fmt_expr(out, inner, inner_prec);
        }
        Expr::Binary { op, left, right } => {
            fmt_expr(out, left, my);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            if right_needs_parens(*op, right) {
                out.push('(');
                fmt_expr(out, right, Prec::Lowest);
                out.push(')');
            } else {
                fmt_expr(out, right, my);
            }
        }
    }

    if parens {
        out.push(')');
    }
}

fn is_simple_token(text: &str) -> bool {
    let word = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    word || is_call(text)
}

/// `name(...)` or `name[...]` where the opening delimiter is closed by the
/// final character.
fn is_call(text: &str) -> bool {
    let Some(open) = text.find(['(', '[']) else {
        return false;
    };
    let callee = &text[..open];
    if callee.is_empty() || !callee.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices().skip(open) {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                _ if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str) -> Expr {
        Expr::var(name)
    }

    fn raw(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }

    #[test]
    fn horner_form_prints_without_redundant_parens() {
        // (i - 1) * n + (j - 1)
        let e = Expr::add(
            Expr::mul(Expr::sub(v("i"), Expr::int(1)), v("n")),
            Expr::sub(v("j"), Expr::int(1)),
        );
        assert_eq!(format_expr(&e), "(i - 1) * n + j - 1");
    }

    #[test]
    fn right_operands_keep_grouping() {
        assert_eq!(format_expr(&raw(BinOp::Sub, v("a"), raw(BinOp::Add, v("b"), v("c")))), "a - (b + c)");
        assert_eq!(format_expr(&raw(BinOp::Mul, v("a"), raw(BinOp::Div, v("b"), v("c")))), "a * (b / c)");
        assert_eq!(format_expr(&raw(BinOp::Mul, v("a"), raw(BinOp::Mul, v("b"), v("c")))), "a * b * c");
        assert_eq!(format_expr(&raw(BinOp::Div, v("a"), raw(BinOp::Mul, v("b"), v("c")))), "a / (b * c)");
    }

    #[test]
    fn negation_and_negative_literals() {
        assert_eq!(format_expr(&Expr::neg(raw(BinOp::Add, v("a"), v("b")))), "-(a + b)");
        assert_eq!(format_expr(&raw(BinOp::Mul, v("a"), Expr::int(-3))), "a * -3");
        assert_eq!(format_expr(&Expr::Neg(Box::new(Expr::int(-3)))), "-(-3)");
    }

    #[test]
    fn opaque_text_is_parenthesized_unless_simple() {
        assert_eq!(format_expr(&Expr::opaque("x.len")), "x.len");
        assert_eq!(format_expr(&Expr::opaque("f(i)")), "f(i)");
        assert_eq!(format_expr(&Expr::opaque("f(i) + g(j)")), "(f(i) + g(j))");
        assert_eq!(format_expr(&Expr::opaque("f(\")\") - 1")), "(f(\")\") - 1)");
        assert_eq!(format_expr(&Expr::opaque("(x)")), "((x))");
        assert_eq!(format_expr(&Expr::opaque("b[i * 4]")), "b[i * 4]");
        let e = Expr::mul(Expr::opaque("k ? 1 : 2"), v("n"));
        assert_eq!(format_expr(&e), "(k ? 1 : 2) * n");
    }
}
